//! One-bit quantization, threshold-charging form.

use crate::engine::RunContext;
use crate::error::Result;
use crate::kernels::host;
use crate::tensor::TensorHandle;
use crate::types::{DeviceKind, KwargList};

use super::{Compressor, ParamBlock};

/// 32x compression. Each bit records whether the error-feedback residual
/// exceeded the threshold; the emitted magnitude is charged back into the
/// residual, so no sub-threshold gradient energy is dropped. Decodes to ±1.
pub struct OneBitCompressor {
    param: ParamBlock,
}

impl Default for OneBitCompressor {
    fn default() -> Self {
        Self {
            param: ParamBlock::one_bit_default(),
        }
    }
}

impl Compressor for OneBitCompressor {
    fn init(&mut self, kwargs: &[(String, String)]) -> Result<()> {
        self.param.apply(kwargs)?;
        self.param.validate_one_bit()
    }

    fn type_string(&self) -> &'static str {
        "OneBitCompressor"
    }

    fn compress_factor(&self) -> usize {
        32
    }

    fn supports_fast_aggregate(&self) -> bool {
        false
    }

    fn params(&self) -> KwargList {
        self.param.to_kwargs()
    }

    fn compress(
        &self,
        rctx: &mut RunContext,
        grad: &TensorHandle,
        compressed: &TensorHandle,
        residual: &TensorHandle,
    ) -> Result<()> {
        match rctx.device() {
            DeviceKind::Host => {
                let g = unsafe { grad.host_f32() };
                let c = unsafe { compressed.host_bytes_mut() };
                let r = unsafe { residual.host_f32_mut() };
                host::quantize_one_bit(g, c, r, self.param.threshold, self.param.ef_alpha);
                Ok(())
            }
            DeviceKind::Accel => {
                #[cfg(feature = "cuda")]
                {
                    rctx.accel()?.quantize_one_bit(
                        grad.as_u64(),
                        compressed.as_u64(),
                        residual.as_u64(),
                        grad.len(),
                        self.param.threshold,
                        self.param.ef_alpha,
                    )
                }
                #[cfg(not(feature = "cuda"))]
                {
                    Err(crate::error::BitgradError::AccelDisabled)
                }
            }
        }
    }

    fn decompress(
        &self,
        rctx: &mut RunContext,
        compressed: &TensorHandle,
        out: &TensorHandle,
    ) -> Result<()> {
        match rctx.device() {
            DeviceKind::Host => {
                let c = unsafe { compressed.host_bytes() };
                let o = unsafe { out.host_f32_mut() };
                host::dequantize_one_bit(c, o);
                Ok(())
            }
            DeviceKind::Accel => {
                #[cfg(feature = "cuda")]
                {
                    rctx.accel()?
                        .dequantize_one_bit(compressed.as_u64(), out.as_u64(), out.len())
                }
                #[cfg(not(feature = "cuda"))]
                {
                    Err(crate::error::BitgradError::AccelDisabled)
                }
            }
        }
    }
}
