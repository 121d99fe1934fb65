//! Two-bit quantization, sign form.

use crate::ef;
use crate::engine::RunContext;
use crate::error::Result;
use crate::kernels::host;
use crate::tensor::TensorHandle;
use crate::types::{DeviceKind, KwargList};

use super::{Compressor, ParamBlock};

/// 16x compression, momentum pre-pass then a pure code pack. The packer
/// reads the residual without charging it; bookkeeping is deferred to the
/// caller's scaling layer.
pub struct TwoBitCompressorV2 {
    param: ParamBlock,
}

impl Default for TwoBitCompressorV2 {
    fn default() -> Self {
        Self {
            param: ParamBlock::two_bit_default(),
        }
    }
}

impl Compressor for TwoBitCompressorV2 {
    fn init(&mut self, kwargs: &[(String, String)]) -> Result<()> {
        self.param.apply(kwargs)?;
        self.param.validate_two_bit()
    }

    fn type_string(&self) -> &'static str {
        "TwoBitCompressorV2"
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
        ef::accumulate(rctx, grad, residual, self.param.ef_alpha)?;
        match rctx.device() {
            DeviceKind::Host => {
                let r = unsafe { residual.host_f32() };
                let c = unsafe { compressed.host_bytes_mut() };
                host::pack_two_bit_sign(r, c, self.param.threshold);
                Ok(())
            }
            DeviceKind::Accel => {
                #[cfg(feature = "cuda")]
                {
                    rctx.accel()?.pack_two_bit_sign(
                        residual.as_u64(),
                        compressed.as_u64(),
                        grad.len(),
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
