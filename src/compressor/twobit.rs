//! Two-bit quantization, threshold-charging form.

use crate::engine::RunContext;
use crate::error::Result;
use crate::kernels::host;
use crate::tensor::TensorHandle;
use crate::types::{DeviceKind, KwargList};

use super::{Compressor, ParamBlock};

/// 16x compression. Residuals at or beyond ±threshold emit ±threshold and
/// are charged back; the band in between emits zero and keeps
/// accumulating. Decodes to ±threshold or 0.
pub struct TwoBitCompressor {
    param: ParamBlock,
}

impl Default for TwoBitCompressor {
    fn default() -> Self {
        Self {
            param: ParamBlock::two_bit_default(),
        }
    }
}

impl Compressor for TwoBitCompressor {
    fn init(&mut self, kwargs: &[(String, String)]) -> Result<()> {
        self.param.apply(kwargs)?;
        self.param.validate_two_bit()
    }

    fn type_string(&self) -> &'static str {
        "TwoBitCompressor"
    }

    fn compress_factor(&self) -> usize {
        16
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
                host::quantize_two_bit(g, c, r, self.param.threshold, self.param.ef_alpha);
                Ok(())
            }
            DeviceKind::Accel => {
                #[cfg(feature = "cuda")]
                {
                    rctx.accel()?.quantize_two_bit(
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
                host::dequantize_two_bit(c, o, self.param.threshold);
                Ok(())
            }
            DeviceKind::Accel => {
                #[cfg(feature = "cuda")]
                {
                    rctx.accel()?.dequantize_two_bit(
                        compressed.as_u64(),
                        out.as_u64(),
                        out.len(),
                        self.param.threshold,
                    )
                }
                #[cfg(not(feature = "cuda"))]
                {
                    Err(crate::error::BitgradError::AccelDisabled)
                }
            }
        }
    }
}
