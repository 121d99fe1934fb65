//! Runtime-configurable tuning parameters for bitgrad.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `BITGRAD_`) or by constructing a custom `Config`.

/// Tuning parameters for the built-in engine and accelerator kernels.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ordinal of the accelerator device the built-in engine binds.
    pub accel_device: usize,

    /// Threads per block for accelerator kernel launches. The quantize
    /// kernels run one thread per compressed word, the dequantize kernels
    /// one thread per element; both use this launch width.
    pub accel_threads_per_block: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accel_device: 0,
            accel_threads_per_block: 256,
        }
    }
}

impl Config {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `BITGRAD_ACCEL_DEVICE`
    /// - `BITGRAD_ACCEL_THREADS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("BITGRAD_ACCEL_DEVICE") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.accel_device = n;
            }
        }
        if let Ok(v) = std::env::var("BITGRAD_ACCEL_THREADS") {
            if let Ok(n) = v.parse::<u32>() {
                if n > 0 {
                    cfg.accel_threads_per_block = n;
                }
            }
        }

        cfg
    }
}
