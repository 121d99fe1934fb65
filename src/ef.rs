//! Momentum error-feedback accumulation.
//!
//! The sign-form schemes run this as a separate pre-pass before packing:
//! `r = (1 - alpha) * r + alpha * g`. With `alpha = 1` the residual is the
//! raw gradient; smaller alphas give the residual momentum, so with no
//! incoming gradient it decays geometrically with ratio `1 - alpha`. The
//! charging-form schemes fuse the same update into their pack kernels and
//! never call this module.

use crate::engine::RunContext;
use crate::error::Result;
use crate::tensor::TensorHandle;
use crate::types::DeviceKind;

/// Host accumulation loop. Element-parallel; no write hazards.
pub(crate) fn accumulate_host(grad: &[f32], residual: &mut [f32], alpha: f32) {
    debug_assert_eq!(grad.len(), residual.len());
    for (r, g) in residual.iter_mut().zip(grad.iter()) {
        *r = (1.0 - alpha) * *r + alpha * *g;
    }
}

/// Accumulate `grad` into `residual` on the device the task runs on.
pub(crate) fn accumulate(
    rctx: &mut RunContext,
    grad: &TensorHandle,
    residual: &TensorHandle,
    alpha: f32,
) -> Result<()> {
    match rctx.device() {
        DeviceKind::Host => {
            let g = unsafe { grad.host_f32() };
            let r = unsafe { residual.host_f32_mut() };
            accumulate_host(g, r, alpha);
            Ok(())
        }
        DeviceKind::Accel => {
            #[cfg(feature = "cuda")]
            {
                rctx.accel()?
                    .accumulate(grad.as_u64(), residual.as_u64(), grad.len(), alpha)
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(crate::error::BitgradError::AccelDisabled)
            }
        }
    }
}
