//! Compressor schemes and the registry that names them.
//!
//! # Available schemes
//!
//! - [`OneBitCompressor`]: 1 bit/element, threshold-charging residual.
//!   The emitted magnitude is charged back into the residual, which keeps
//!   it bounded by the threshold.
//! - [`OneBitCompressorV2`]: 1 bit/element, momentum pre-pass then a pure
//!   sign pack. Residual bookkeeping is deferred to the caller's scaling
//!   layer.
//! - [`OneBitCompressorV2Fused`]: 1 bit/element, fused ±1 charge. The only
//!   scheme supporting fast aggregation.
//! - [`TwoBitCompressor`]: 2 bits/element with a zero band,
//!   threshold-charging residual.
//! - [`TwoBitCompressorV2`]: 2 bits/element, momentum pre-pass then a pure
//!   code pack.
//!
//! Each scheme commits to exactly one residual-update form at the type
//! level; there is no runtime switch between the charging and sign forms.

pub mod params;
pub mod registry;

mod onebit;
mod onebit_v2;
mod twobit;
mod twobit_v2;

pub use onebit::OneBitCompressor;
pub use onebit_v2::{OneBitCompressorV2, OneBitCompressorV2Fused};
pub use params::ParamBlock;
pub use registry::Registry;
pub use twobit::TwoBitCompressor;
pub use twobit_v2::TwoBitCompressorV2;

use crate::engine::RunContext;
use crate::error::{BitgradError, Result};
use crate::tensor::TensorHandle;
use crate::types::KwargList;

/// A quantization scheme: bit-packing encode/decode plus the residual
/// update that compensates the quantization bias across steps.
///
/// Implementations hold only their parameter block; the gradient, the
/// compressed payload, and the residual are all caller-owned buffers, so a
/// driver can cheaply construct one compressor per parameter tensor.
pub trait Compressor: Send + Sync {
    /// Parse and validate parameters. Called once, before any other method.
    fn init(&mut self, kwargs: &[(String, String)]) -> Result<()>;

    /// Registered name of this scheme.
    fn type_string(&self) -> &'static str;

    /// Elements packed per compressed f32 (32 for one-bit, 16 for two-bit).
    fn compress_factor(&self) -> usize;

    /// Compressed element count for an `original_size`-element gradient.
    fn compressed_size(&self, original_size: i64) -> i64 {
        let factor = self.compress_factor() as i64;
        if original_size % factor == 0 {
            original_size / factor
        } else {
            original_size / factor + 1
        }
    }

    /// Whether [`Compressor::decompress_and_aggregate`] is implemented.
    fn supports_fast_aggregate(&self) -> bool;

    /// Current parameters in declaration order, for wire encoding.
    fn params(&self) -> KwargList;

    /// Quantize `grad` into `compressed`, updating `residual` in place.
    fn compress(
        &self,
        rctx: &mut RunContext,
        grad: &TensorHandle,
        compressed: &TensorHandle,
        residual: &TensorHandle,
    ) -> Result<()>;

    /// Reconstruct a dense gradient from `compressed` into `out`.
    fn decompress(
        &self,
        rctx: &mut RunContext,
        compressed: &TensorHandle,
        out: &TensorHandle,
    ) -> Result<()>;

    /// Decode `compressed` and sum the symbols into `acc` in one pass.
    ///
    /// Aggregating servers use this to fold many workers' payloads into one
    /// dense tensor without materializing intermediates. Schemes that do
    /// not declare fast-aggregate support return a capability error the
    /// caller can distinguish and fall back to decompress-plus-add.
    fn decompress_and_aggregate(
        &self,
        _rctx: &mut RunContext,
        _compressed: &TensorHandle,
        _acc: &TensorHandle,
    ) -> Result<()> {
        Err(BitgradError::FastAggregateUnsupported {
            scheme: self.type_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubCompressor;

    impl Compressor for StubCompressor {
        fn init(&mut self, _kwargs: &[(String, String)]) -> Result<()> {
            Ok(())
        }
        fn type_string(&self) -> &'static str {
            "StubCompressor"
        }
        fn compress_factor(&self) -> usize {
            32
        }
        fn supports_fast_aggregate(&self) -> bool {
            false
        }
        fn params(&self) -> KwargList {
            vec![]
        }
        fn compress(
            &self,
            _rctx: &mut RunContext,
            _grad: &TensorHandle,
            _compressed: &TensorHandle,
            _residual: &TensorHandle,
        ) -> Result<()> {
            Ok(())
        }
        fn decompress(
            &self,
            _rctx: &mut RunContext,
            _compressed: &TensorHandle,
            _out: &TensorHandle,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_compressed_size_rounds_up() {
        let c = StubCompressor;
        assert_eq!(c.compressed_size(32), 1);
        assert_eq!(c.compressed_size(33), 2);
        assert_eq!(c.compressed_size(64), 2);
        assert_eq!(c.compressed_size(1), 1);
        assert_eq!(c.compressed_size(0), 0);
    }

    #[test]
    fn test_default_aggregate_is_capability_error() {
        let c = StubCompressor;
        let mut data = vec![0.0f32; 1];
        let t = unsafe { TensorHandle::from_host_slice(&mut data) };
        let mut rctx = RunContext::host();
        let err = c.decompress_and_aggregate(&mut rctx, &t, &t).unwrap_err();
        assert!(matches!(
            err,
            BitgradError::FastAggregateUnsupported {
                scheme: "StubCompressor"
            }
        ));
    }
}
