//! Scheduling shim: turns compressor operations into engine tasks.
//!
//! Every public compress/decompress entry point validates its operands
//! up front, then submits a task with explicit dependency sets. The engine
//! serializes tasks whose write sets overlap; because every compress task
//! over a given residual declares that residual as a write, compress calls
//! for one parameter are totally ordered and no gradient energy can be
//! lost or double-counted across steps.

use std::sync::Arc;

use crate::compressor::Compressor;
use crate::engine::{Engine, RunContext};
use crate::error::{BitgradError, Result};
use crate::tensor::TensorHandle;
use crate::types::{DeviceKind, Priority};

fn require_known(t: &TensorHandle, operand: &'static str) -> Result<()> {
    if t.is_empty() {
        return Err(BitgradError::UndefinedShape { operand });
    }
    Ok(())
}

fn require_device(t: &TensorHandle, expected: DeviceKind, operand: &'static str) -> Result<()> {
    if t.device() != expected {
        return Err(BitgradError::DeviceMismatch {
            operand,
            expected,
            actual: t.device(),
        });
    }
    Ok(())
}

fn require_device_supported(device: DeviceKind) -> Result<()> {
    if device == DeviceKind::Accel && !cfg!(feature = "cuda") {
        return Err(BitgradError::AccelDisabled);
    }
    Ok(())
}

/// Packed element count `compressed` must provide for `dense` elements.
fn require_size_law(
    compressor: &dyn Compressor,
    dense: usize,
    compressed: &TensorHandle,
    operand: &'static str,
) -> Result<()> {
    let needed = compressor.compressed_size(dense as i64);
    if (compressed.len() as i64) < needed {
        return Err(BitgradError::ShapeMismatch {
            operand,
            expected: needed,
            actual: compressed.len() as i64,
        });
    }
    Ok(())
}

/// Accelerator launches are asynchronous; the task's completion edge must
/// reflect device-side completion, so accel task bodies end with a
/// stream wait.
fn finish(rctx: &mut RunContext) -> Result<()> {
    match rctx.device() {
        DeviceKind::Host => Ok(()),
        DeviceKind::Accel => {
            #[cfg(feature = "cuda")]
            {
                rctx.accel()?.synchronize()
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(BitgradError::AccelDisabled)
            }
        }
    }
}

pub(crate) fn schedule_compress(
    engine: &dyn Engine,
    compressor: Arc<dyn Compressor>,
    from: TensorHandle,
    to: TensorHandle,
    residual: TensorHandle,
    priority: Priority,
) -> Result<()> {
    require_known(&from, "source")?;
    require_known(&to, "destination")?;
    require_known(&residual, "residual")?;
    let device = from.device();
    require_device_supported(device)?;
    require_device(&to, device, "destination")?;
    require_device(&residual, device, "residual")?;
    if residual.len() != from.len() {
        return Err(BitgradError::ShapeMismatch {
            operand: "residual",
            expected: from.len() as i64,
            actual: residual.len() as i64,
        });
    }
    require_size_law(compressor.as_ref(), from.len(), &to, "destination")?;

    let label = match device {
        DeviceKind::Host => "CompressHost",
        DeviceKind::Accel => "CompressAccel",
    };
    let reads = [from.var()];
    let writes = [to.var(), residual.var()];
    engine.push_sync(
        Box::new(move |rctx| {
            compressor.compress(rctx, &from, &to, &residual)?;
            finish(rctx)
        }),
        device,
        &reads,
        &writes,
        priority,
        label,
    )
}

pub(crate) fn schedule_decompress(
    engine: &dyn Engine,
    compressor: Arc<dyn Compressor>,
    from: TensorHandle,
    to: TensorHandle,
    priority: Priority,
) -> Result<()> {
    require_known(&from, "source")?;
    require_known(&to, "destination")?;
    let device = from.device();
    require_device_supported(device)?;
    require_device(&to, device, "destination")?;
    require_size_law(compressor.as_ref(), to.len(), &from, "source")?;

    let label = match device {
        DeviceKind::Host => "DecompressHost",
        DeviceKind::Accel => "DecompressAccel",
    };
    let reads = [from.var()];
    let writes = [to.var()];
    engine.push_sync(
        Box::new(move |rctx| {
            compressor.decompress(rctx, &from, &to)?;
            finish(rctx)
        }),
        device,
        &reads,
        &writes,
        priority,
        label,
    )
}

pub(crate) fn schedule_decompress_aggregate(
    engine: &dyn Engine,
    compressor: Arc<dyn Compressor>,
    from: TensorHandle,
    acc: TensorHandle,
    priority: Priority,
) -> Result<()> {
    // Surface the capability error synchronously so callers can fall back
    // to decompress plus a separate add.
    if !compressor.supports_fast_aggregate() {
        return Err(BitgradError::FastAggregateUnsupported {
            scheme: compressor.type_string(),
        });
    }
    require_known(&from, "source")?;
    require_known(&acc, "accumulator")?;
    let device = from.device();
    require_device_supported(device)?;
    require_device(&acc, device, "accumulator")?;
    require_size_law(compressor.as_ref(), acc.len(), &from, "source")?;

    let label = match device {
        DeviceKind::Host => "DecompressAggregateHost",
        DeviceKind::Accel => "DecompressAggregateAccel",
    };
    let reads = [from.var()];
    let writes = [acc.var()];
    engine.push_sync(
        Box::new(move |rctx| {
            compressor.decompress_and_aggregate(rctx, &from, &acc)?;
            finish(rctx)
        }),
        device,
        &reads,
        &writes,
        priority,
        label,
    )
}
