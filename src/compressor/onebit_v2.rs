//! One-bit quantization, sign forms.
//!
//! Both variants here emit a pure sign tensor (±1 after decode) that a
//! separate scaling layer multiplies. They differ in residual semantics:
//! the plain V2 runs momentum error feedback as a pre-pass and leaves the
//! residual untouched by the packer, while the fused variant charges ±1
//! inside the pack kernel and is the one scheme that supports fast
//! aggregation on the server side.

use crate::ef;
use crate::engine::RunContext;
use crate::error::Result;
use crate::kernels::host;
use crate::tensor::TensorHandle;
use crate::types::{DeviceKind, KwargList};

use super::{Compressor, ParamBlock};

/// 32x compression, momentum pre-pass then sign pack.
pub struct OneBitCompressorV2 {
    param: ParamBlock,
}

impl Default for OneBitCompressorV2 {
    fn default() -> Self {
        Self {
            param: ParamBlock::one_bit_default(),
        }
    }
}

impl Compressor for OneBitCompressorV2 {
    fn init(&mut self, kwargs: &[(String, String)]) -> Result<()> {
        self.param.apply(kwargs)?;
        self.param.validate_one_bit()
    }

    fn type_string(&self) -> &'static str {
        "OneBitCompressorV2"
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
        ef::accumulate(rctx, grad, residual, self.param.ef_alpha)?;
        match rctx.device() {
            DeviceKind::Host => {
                let r = unsafe { residual.host_f32() };
                let c = unsafe { compressed.host_bytes_mut() };
                host::pack_one_bit_sign(r, c, self.param.threshold);
                Ok(())
            }
            DeviceKind::Accel => {
                #[cfg(feature = "cuda")]
                {
                    rctx.accel()?.pack_one_bit_sign(
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

/// 32x compression, fused ±1 charge. Supports fast aggregation.
pub struct OneBitCompressorV2Fused {
    param: ParamBlock,
}

impl Default for OneBitCompressorV2Fused {
    fn default() -> Self {
        Self {
            param: ParamBlock::one_bit_default(),
        }
    }
}

impl Compressor for OneBitCompressorV2Fused {
    fn init(&mut self, kwargs: &[(String, String)]) -> Result<()> {
        self.param.apply(kwargs)?;
        self.param.validate_one_bit()
    }

    fn type_string(&self) -> &'static str {
        "OneBitCompressorV2Fused"
    }

    fn compress_factor(&self) -> usize {
        32
    }

    fn supports_fast_aggregate(&self) -> bool {
        true
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
                host::quantize_one_bit_fused(g, c, r, self.param.threshold, self.param.ef_alpha);
                Ok(())
            }
            DeviceKind::Accel => {
                #[cfg(feature = "cuda")]
                {
                    rctx.accel()?.quantize_one_bit_fused(
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

    fn decompress_and_aggregate(
        &self,
        rctx: &mut RunContext,
        compressed: &TensorHandle,
        acc: &TensorHandle,
    ) -> Result<()> {
        match rctx.device() {
            DeviceKind::Host => {
                let c = unsafe { compressed.host_bytes() };
                let a = unsafe { acc.host_f32_mut() };
                host::dequantize_one_bit_add(c, a);
                Ok(())
            }
            DeviceKind::Accel => {
                #[cfg(feature = "cuda")]
                {
                    rctx.accel()?.dequantize_one_bit_add(
                        compressed.as_u64(),
                        acc.as_u64(),
                        acc.len(),
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

#[cfg(test)]
mod tests {
    use super::*;

    fn handles(
        grad: &mut Vec<f32>,
        packed: &mut Vec<f32>,
        residual: &mut Vec<f32>,
    ) -> (TensorHandle, TensorHandle, TensorHandle) {
        unsafe {
            (
                TensorHandle::from_host_slice(grad),
                TensorHandle::from_host_slice(packed),
                TensorHandle::from_host_slice(residual),
            )
        }
    }

    #[test]
    fn test_sign_form_leaves_residual_to_pre_pass() {
        // With alpha = 1 the pre-pass copies the gradient into the residual
        // and the packer does not modify it further.
        let mut c = OneBitCompressorV2::default();
        c.init(&[]).unwrap();
        let mut grad = vec![-2.0f32, -0.5, 0.5, 2.0];
        let mut packed = vec![0.0f32; 1];
        let mut residual = vec![0.0f32; 4];
        let (gt, ct, rt) = handles(&mut grad, &mut packed, &mut residual);

        let mut rctx = RunContext::host();
        c.compress(&mut rctx, &gt, &ct, &rt).unwrap();
        assert_eq!(residual, grad);

        let packed_bytes = unsafe { ct.host_bytes() };
        assert_eq!(packed_bytes[0], 0b0011_0000);

        let mut out = vec![0.0f32; 4];
        let ot = unsafe { TensorHandle::from_host_slice(&mut out) };
        c.decompress(&mut rctx, &ct, &ot).unwrap();
        assert_eq!(out, vec![-1.0, -1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_sign_form_momentum_blends() {
        let mut c = OneBitCompressorV2::default();
        c.init(&[("ef_alpha".to_string(), "0.5".to_string())])
            .unwrap();
        let mut grad = vec![4.0f32];
        let mut packed = vec![0.0f32; 1];
        let mut residual = vec![2.0f32];
        let (gt, ct, rt) = handles(&mut grad, &mut packed, &mut residual);

        let mut rctx = RunContext::host();
        c.compress(&mut rctx, &gt, &ct, &rt).unwrap();
        assert!((residual[0] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_fused_form_charges_unit() {
        let mut c = OneBitCompressorV2Fused::default();
        c.init(&[]).unwrap();
        let mut grad = vec![2.5f32, -2.5];
        let mut packed = vec![0.0f32; 1];
        let mut residual = vec![0.0f32; 2];
        let (gt, ct, rt) = handles(&mut grad, &mut packed, &mut residual);

        let mut rctx = RunContext::host();
        c.compress(&mut rctx, &gt, &ct, &rt).unwrap();
        assert!((residual[0] - 1.5).abs() < 1e-6);
        assert!((residual[1] + 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_fused_fast_aggregate() {
        let mut c = OneBitCompressorV2Fused::default();
        c.init(&[]).unwrap();
        assert!(c.supports_fast_aggregate());

        // c1 encodes [+,-,+,-], c2 encodes [+,+,-,-].
        let mut g1 = vec![1.0f32, -1.0, 1.0, -1.0];
        let mut g2 = vec![1.0f32, 1.0, -1.0, -1.0];
        let mut p1 = vec![0.0f32; 1];
        let mut p2 = vec![0.0f32; 1];
        let mut r1 = vec![0.0f32; 4];
        let mut r2 = vec![0.0f32; 4];
        let (g1t, p1t, r1t) = handles(&mut g1, &mut p1, &mut r1);
        let (g2t, p2t, r2t) = handles(&mut g2, &mut p2, &mut r2);

        let mut rctx = RunContext::host();
        c.compress(&mut rctx, &g1t, &p1t, &r1t).unwrap();
        c.compress(&mut rctx, &g2t, &p2t, &r2t).unwrap();

        let mut acc = vec![0.0f32; 4];
        let at = unsafe { TensorHandle::from_host_slice(&mut acc) };
        c.decompress_and_aggregate(&mut rctx, &p1t, &at).unwrap();
        c.decompress_and_aggregate(&mut rctx, &p2t, &at).unwrap();
        assert_eq!(acc, vec![2.0, 0.0, 0.0, -2.0]);
    }

    #[test]
    fn test_plain_v2_rejects_fast_aggregate() {
        let c = OneBitCompressorV2::default();
        let mut data = vec![0.0f32; 1];
        let t = unsafe { TensorHandle::from_host_slice(&mut data) };
        let mut rctx = RunContext::host();
        assert!(c.decompress_and_aggregate(&mut rctx, &t, &t).is_err());
    }
}
