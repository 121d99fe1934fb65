//! The stable outward-facing gradient-compression object.
//!
//! A `GradientCompression` owns exactly one compressor, chosen by name at
//! init. The name and parameters travel between nodes as a single
//! comma-separated string (`name,k1,v1,k2,v2,...`) so a receiver can
//! reconstruct an equivalent compressor during session setup.

use std::sync::Arc;

use crate::compressor::{Compressor, Registry};
use crate::engine::Engine;
use crate::error::{BitgradError, Result};
use crate::sched;
use crate::tensor::TensorHandle;
use crate::types::{KwargList, Priority};

fn valid_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-')
}

/// Facade over one registered compressor instance.
#[derive(Default)]
pub struct GradientCompression {
    compressor: Option<Arc<dyn Compressor>>,
}

impl GradientCompression {
    pub fn new() -> Self {
        Self { compressor: None }
    }

    /// Create the named compressor and apply its parameters.
    ///
    /// A second call is a warning, not an error: the first init wins and
    /// the existing compressor is kept.
    pub fn init(&mut self, name: &str, kwargs: &[(String, String)]) -> Result<()> {
        if let Some(existing) = &self.compressor {
            tracing::warn!(
                existing = existing.type_string(),
                requested = name,
                "gradient compression is already initialized; keeping existing compressor"
            );
            return Ok(());
        }
        let mut compressor = Registry::global().create(name)?;
        compressor.init(kwargs)?;
        self.compressor = Some(Arc::from(compressor));
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.compressor.is_some()
    }

    fn compressor(&self) -> Result<&Arc<dyn Compressor>> {
        self.compressor.as_ref().ok_or(BitgradError::NotInitialized)
    }

    /// Registered name of the owned compressor.
    pub fn type_str(&self) -> Result<&'static str> {
        Ok(self.compressor()?.type_string())
    }

    /// Elements packed per compressed f32.
    pub fn compression_factor(&self) -> Result<usize> {
        Ok(self.compressor()?.compress_factor())
    }

    /// Compressed element count for an `original_size`-element gradient.
    pub fn compressed_size(&self, original_size: i64) -> Result<i64> {
        Ok(self.compressor()?.compressed_size(original_size))
    }

    /// Encode the compressor choice and parameters as a wire string.
    pub fn encode_params(&self) -> Result<String> {
        let compressor = self.compressor()?;
        let mut encoded = String::from(compressor.type_string());
        for (key, value) in compressor.params() {
            encoded.push(',');
            encoded.push_str(&key);
            encoded.push(',');
            encoded.push_str(&value);
        }
        Ok(encoded)
    }

    /// Decode a wire string back into a compressor name and kwarg list.
    pub fn decode_params(encoded: &str) -> Result<(String, KwargList)> {
        if encoded.is_empty() {
            return Err(BitgradError::MalformedParamString {
                reason: "empty parameter string".to_string(),
            });
        }
        let tokens: Vec<&str> = encoded.split(',').collect();
        for token in &tokens {
            if token.is_empty() || !token.chars().all(valid_token_char) {
                return Err(BitgradError::MalformedParamString {
                    reason: format!("invalid token {token:?}"),
                });
            }
        }
        let tail = &tokens[1..];
        if tail.len() % 2 != 0 {
            return Err(BitgradError::MalformedParamString {
                reason: format!("odd number of key/value tokens ({})", tail.len()),
            });
        }
        let kwargs = tail
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect();
        Ok((tokens[0].to_string(), kwargs))
    }

    /// Issue a quantize task: compress `from` into `to`, folding the
    /// quantization error into `residual`.
    pub fn compress_ex(
        &self,
        engine: &dyn Engine,
        from: &TensorHandle,
        to: &TensorHandle,
        residual: &TensorHandle,
        priority: Priority,
    ) -> Result<()> {
        sched::schedule_compress(
            engine,
            Arc::clone(self.compressor()?),
            *from,
            *to,
            *residual,
            priority,
        )
    }

    /// Issue a dequantize task: reconstruct `to` from `from`.
    pub fn decompress_ex(
        &self,
        engine: &dyn Engine,
        from: &TensorHandle,
        to: &TensorHandle,
        priority: Priority,
    ) -> Result<()> {
        sched::schedule_decompress(engine, Arc::clone(self.compressor()?), *from, *to, priority)
    }

    /// Issue a dequantize-and-sum task into `acc`, for aggregating servers.
    pub fn decompress_aggregate_ex(
        &self,
        engine: &dyn Engine,
        from: &TensorHandle,
        acc: &TensorHandle,
        priority: Priority,
    ) -> Result<()> {
        sched::schedule_decompress_aggregate(
            engine,
            Arc::clone(self.compressor()?),
            *from,
            *acc,
            priority,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_uninitialized_errors() {
        let gc = GradientCompression::new();
        assert!(!gc.is_initialized());
        assert!(matches!(
            gc.type_str().unwrap_err(),
            BitgradError::NotInitialized
        ));
        assert!(gc.encode_params().is_err());
    }

    #[test]
    fn test_init_and_queries() {
        let mut gc = GradientCompression::new();
        gc.init("TwoBitCompressor", &[]).unwrap();
        assert!(gc.is_initialized());
        assert_eq!(gc.type_str().unwrap(), "TwoBitCompressor");
        assert_eq!(gc.compression_factor().unwrap(), 16);
        assert_eq!(gc.compressed_size(17).unwrap(), 2);
        assert_eq!(gc.compressed_size(16).unwrap(), 1);
    }

    #[test]
    fn test_one_bit_sizes() {
        let mut gc = GradientCompression::new();
        gc.init("OneBitCompressor", &[]).unwrap();
        assert_eq!(gc.compressed_size(33).unwrap(), 2);
        assert_eq!(gc.compressed_size(32).unwrap(), 1);
    }

    #[test]
    fn test_double_init_keeps_first() {
        let mut gc = GradientCompression::new();
        gc.init("OneBitCompressor", &[]).unwrap();
        gc.init("TwoBitCompressor", &[]).unwrap();
        assert_eq!(gc.type_str().unwrap(), "OneBitCompressor");
    }

    #[test]
    fn test_init_unknown_name() {
        let mut gc = GradientCompression::new();
        let err = gc.init("ThreeBitCompressor", &[]).unwrap_err();
        assert!(matches!(err, BitgradError::UnknownCompressor { .. }));
        assert!(!gc.is_initialized());
    }

    #[test]
    fn test_init_invalid_params_leave_uninitialized() {
        let mut gc = GradientCompression::new();
        assert!(gc
            .init("TwoBitCompressor", &kw(&[("threshold", "-1")]))
            .is_err());
        assert!(!gc.is_initialized());
    }

    #[test]
    fn test_encode_params_wire_form() {
        let mut gc = GradientCompression::new();
        gc.init(
            "TwoBitCompressor",
            &kw(&[("threshold", "0.5"), ("ef_alpha", "0.9")]),
        )
        .unwrap();
        assert_eq!(
            gc.encode_params().unwrap(),
            "TwoBitCompressor,threshold,0.5,ef_alpha,0.9"
        );
    }

    #[test]
    fn test_param_round_trip() {
        let mut gc = GradientCompression::new();
        gc.init(
            "TwoBitCompressor",
            &kw(&[("threshold", "0.5"), ("ef_alpha", "0.9")]),
        )
        .unwrap();
        let encoded = gc.encode_params().unwrap();
        let (name, kwargs) = GradientCompression::decode_params(&encoded).unwrap();
        assert_eq!(name, "TwoBitCompressor");
        assert_eq!(kwargs, kw(&[("threshold", "0.5"), ("ef_alpha", "0.9")]));

        let mut remote = GradientCompression::new();
        remote.init(&name, &kwargs).unwrap();
        assert_eq!(remote.encode_params().unwrap(), encoded);
    }

    #[test]
    fn test_decode_rejects_odd_tail() {
        let err =
            GradientCompression::decode_params("OneBitCompressor,threshold").unwrap_err();
        assert!(matches!(err, BitgradError::MalformedParamString { .. }));
    }

    #[test]
    fn test_decode_rejects_empty_and_bad_tokens() {
        assert!(GradientCompression::decode_params("").is_err());
        assert!(GradientCompression::decode_params("OneBitCompressor,,x").is_err());
        assert!(GradientCompression::decode_params("OneBit Compressor").is_err());
    }

    #[test]
    fn test_decode_bare_name() {
        let (name, kwargs) = GradientCompression::decode_params("OneBitCompressor").unwrap();
        assert_eq!(name, "OneBitCompressor");
        assert!(kwargs.is_empty());
    }
}
