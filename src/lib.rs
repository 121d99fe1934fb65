//! Lossy gradient compression for bandwidth-bound data-parallel training.
//!
//! Dense f32 gradients are quantized to 1 or 2 bits per element and the
//! quantization error is folded back through a per-parameter residual
//! (momentum error feedback), so the decoded stream tracks the true
//! gradient over steps. The crate owns the bit-exact packed layout, the
//! encode/decode kernels for host and accelerator, the residual semantics
//! of each scheme, and the registry that binds scheme names to factories;
//! tensor storage, task execution, and transport stay with the caller.

pub mod compressor;
pub mod config;
pub mod engine;
pub mod error;
pub mod gradient;
pub mod kernels;
pub mod tensor;
pub mod types;

pub(crate) mod ef;
pub(crate) mod sched;

pub use compressor::{
    Compressor, OneBitCompressor, OneBitCompressorV2, OneBitCompressorV2Fused, ParamBlock,
    Registry, TwoBitCompressor, TwoBitCompressorV2,
};
pub use config::Config;
pub use engine::{Engine, InlineEngine, RunContext, TaskFn};
pub use error::{BitgradError, Result};
pub use gradient::GradientCompression;
pub use tensor::{TensorHandle, VarId};
pub use types::{DeviceKind, KwargList, Priority};
