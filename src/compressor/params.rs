//! Per-scheme parameter blocks.

use crate::error::{BitgradError, Result};
use crate::types::KwargList;

/// Configuration shared by every quantization scheme. Immutable after the
/// owning compressor's init.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamBlock {
    /// Quantization threshold. The negative threshold used by the two-bit
    /// schemes is `-threshold`; only positive values are ever configured.
    pub threshold: f32,
    /// Momentum for error feedback, in `(0, 1]`. At 1 the residual is the
    /// raw accumulator, with no momentum.
    pub ef_alpha: f32,
}

impl ParamBlock {
    /// Defaults for the one-bit schemes.
    pub const fn one_bit_default() -> Self {
        Self {
            threshold: 0.0,
            ef_alpha: 1.0,
        }
    }

    /// Defaults for the two-bit schemes.
    pub const fn two_bit_default() -> Self {
        Self {
            threshold: 0.5,
            ef_alpha: 1.0,
        }
    }

    /// Overlay a kwarg list onto the current values.
    ///
    /// Unknown keys are ignored so a shared session-setup list can carry
    /// parameters for other components; unparsable values are errors.
    pub fn apply(&mut self, kwargs: &[(String, String)]) -> Result<()> {
        for (key, value) in kwargs {
            match key.as_str() {
                "threshold" => self.threshold = parse_f32("threshold", value)?,
                "ef_alpha" => self.ef_alpha = parse_f32("ef_alpha", value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Validation for the one-bit schemes: any non-negative threshold.
    pub fn validate_one_bit(&self) -> Result<()> {
        if !(self.threshold >= 0.0) {
            return Err(BitgradError::InvalidParameter {
                key: "threshold",
                reason: format!(
                    "one-bit quantization requires a non-negative threshold, got {}",
                    self.threshold
                ),
            });
        }
        self.validate_alpha()
    }

    /// Validation for the two-bit schemes: the threshold bounds the zero
    /// band and must be strictly positive.
    pub fn validate_two_bit(&self) -> Result<()> {
        if !(self.threshold > 0.0) {
            return Err(BitgradError::InvalidParameter {
                key: "threshold",
                reason: format!(
                    "two-bit quantization requires a threshold larger than 0, got {}",
                    self.threshold
                ),
            });
        }
        self.validate_alpha()
    }

    fn validate_alpha(&self) -> Result<()> {
        if !(self.ef_alpha > 0.0 && self.ef_alpha <= 1.0) {
            return Err(BitgradError::InvalidParameter {
                key: "ef_alpha",
                reason: format!("ef_alpha must be in (0, 1], got {}", self.ef_alpha),
            });
        }
        Ok(())
    }

    /// Parameters in declaration order: `threshold`, then `ef_alpha`.
    pub fn to_kwargs(&self) -> KwargList {
        vec![
            ("threshold".to_string(), self.threshold.to_string()),
            ("ef_alpha".to_string(), self.ef_alpha.to_string()),
        ]
    }
}

fn parse_f32(key: &'static str, value: &str) -> Result<f32> {
    value
        .parse::<f32>()
        .map_err(|_| BitgradError::InvalidParameter {
            key,
            reason: format!("cannot parse {value:?} as a float"),
        })
}
