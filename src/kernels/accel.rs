//! Accelerator implementations of the packing kernels.
//!
//! The CUDA C below is the line-for-line mirror of [`super::host`]: same
//! bit tables, same comparisons, same block decomposition. Quantizers run
//! one thread per 32-bit compressed word so no two threads write the same
//! byte; dequantizers and the accumulator run one thread per element.
//! Kernels are compiled once per context via NVRTC and launched on the
//! context's default stream. Launches are asynchronous; the scheduling
//! shim ends every accelerator task with [`AccelContext::synchronize`] so
//! task completion implies device completion.
//!
//! Buffer arguments are raw device addresses carried as `u64`, matching
//! the [`crate::TensorHandle`] representation; each kernel casts them back
//! to typed pointers on entry.

use std::sync::Arc;

use cudarc::driver::{CudaContext, CudaFunction, CudaStream, LaunchConfig, PushKernelArg};
use cudarc::nvrtc::compile_ptx;

use crate::config::Config;
use crate::error::{BitgradError, Result};

use super::{one_bit_words, two_bit_words};

const KERNEL_SRC: &str = r#"
#define ONE_BIT_MASK(i)  ((unsigned char)(0x80u >> ((i) & 7)))
#define POS_BITS(i)      ((unsigned char)(0xc0u >> (((i) & 3) * 2)))
#define NEG_BITS(i)      ((unsigned char)(0x80u >> (((i) & 3) * 2)))

extern "C" __global__ void bitgrad_quantize_one_bit(
    unsigned long long grad_ptr, unsigned long long out_ptr,
    unsigned long long residual_ptr, int n, float threshold, float alpha)
{
    const float* grad = (const float*)grad_ptr;
    unsigned char* out = (unsigned char*)out_ptr;
    float* residual = (float*)residual_ptr;

    int block = blockIdx.x * blockDim.x + threadIdx.x;
    int nblocks = (n + 31) / 32;
    if (block >= nblocks) return;

    int start = block * 32;
    int end = min(start + 32, n);
    unsigned char* word = out + block * 4;
    word[0] = 0; word[1] = 0; word[2] = 0; word[3] = 0;

    for (int i = start; i < end; ++i) {
        float r = residual[i] + alpha * grad[i];
        if (r > threshold) {
            word[(i - start) >> 3] |= ONE_BIT_MASK(i);
            r -= threshold;
        } else {
            r += threshold;
        }
        residual[i] = r;
    }
}

extern "C" __global__ void bitgrad_quantize_one_bit_fused(
    unsigned long long grad_ptr, unsigned long long out_ptr,
    unsigned long long residual_ptr, int n, float threshold, float alpha)
{
    const float* grad = (const float*)grad_ptr;
    unsigned char* out = (unsigned char*)out_ptr;
    float* residual = (float*)residual_ptr;

    int block = blockIdx.x * blockDim.x + threadIdx.x;
    int nblocks = (n + 31) / 32;
    if (block >= nblocks) return;

    int start = block * 32;
    int end = min(start + 32, n);
    unsigned char* word = out + block * 4;
    word[0] = 0; word[1] = 0; word[2] = 0; word[3] = 0;

    for (int i = start; i < end; ++i) {
        float r = residual[i] + alpha * grad[i];
        if (r > threshold) {
            word[(i - start) >> 3] |= ONE_BIT_MASK(i);
            r -= 1.0f;
        } else {
            r += 1.0f;
        }
        residual[i] = r;
    }
}

extern "C" __global__ void bitgrad_pack_one_bit_sign(
    unsigned long long residual_ptr, unsigned long long out_ptr,
    int n, float threshold)
{
    const float* residual = (const float*)residual_ptr;
    unsigned char* out = (unsigned char*)out_ptr;

    int block = blockIdx.x * blockDim.x + threadIdx.x;
    int nblocks = (n + 31) / 32;
    if (block >= nblocks) return;

    int start = block * 32;
    int end = min(start + 32, n);
    unsigned char* word = out + block * 4;
    word[0] = 0; word[1] = 0; word[2] = 0; word[3] = 0;

    for (int i = start; i < end; ++i) {
        if (residual[i] >= threshold) {
            word[(i - start) >> 3] |= ONE_BIT_MASK(i);
        }
    }
}

extern "C" __global__ void bitgrad_dequantize_one_bit(
    unsigned long long in_ptr, unsigned long long out_ptr, int n)
{
    const unsigned char* in = (const unsigned char*)in_ptr;
    float* out = (float*)out_ptr;

    int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i >= n) return;
    out[i] = (in[i >> 3] & ONE_BIT_MASK(i)) ? 1.0f : -1.0f;
}

extern "C" __global__ void bitgrad_dequantize_one_bit_add(
    unsigned long long in_ptr, unsigned long long acc_ptr, int n)
{
    const unsigned char* in = (const unsigned char*)in_ptr;
    float* acc = (float*)acc_ptr;

    int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i >= n) return;
    if (in[i >> 3] & ONE_BIT_MASK(i)) {
        acc[i] += 1.0f;
    } else {
        acc[i] -= 1.0f;
    }
}

extern "C" __global__ void bitgrad_quantize_two_bit(
    unsigned long long grad_ptr, unsigned long long out_ptr,
    unsigned long long residual_ptr, int n, float threshold, float alpha)
{
    const float* grad = (const float*)grad_ptr;
    unsigned char* out = (unsigned char*)out_ptr;
    float* residual = (float*)residual_ptr;

    int block = blockIdx.x * blockDim.x + threadIdx.x;
    int nblocks = (n + 15) / 16;
    if (block >= nblocks) return;

    int start = block * 16;
    int end = min(start + 16, n);
    unsigned char* word = out + block * 4;
    word[0] = 0; word[1] = 0; word[2] = 0; word[3] = 0;

    for (int i = start; i < end; ++i) {
        float r = residual[i] + alpha * grad[i];
        if (r >= threshold) {
            word[(i - start) >> 2] |= POS_BITS(i);
            r -= threshold;
        } else if (r <= -threshold) {
            word[(i - start) >> 2] |= NEG_BITS(i);
            r += threshold;
        }
        residual[i] = r;
    }
}

extern "C" __global__ void bitgrad_pack_two_bit_sign(
    unsigned long long residual_ptr, unsigned long long out_ptr,
    int n, float threshold)
{
    const float* residual = (const float*)residual_ptr;
    unsigned char* out = (unsigned char*)out_ptr;

    int block = blockIdx.x * blockDim.x + threadIdx.x;
    int nblocks = (n + 15) / 16;
    if (block >= nblocks) return;

    int start = block * 16;
    int end = min(start + 16, n);
    unsigned char* word = out + block * 4;
    word[0] = 0; word[1] = 0; word[2] = 0; word[3] = 0;

    for (int i = start; i < end; ++i) {
        if (residual[i] >= threshold) {
            word[(i - start) >> 2] |= POS_BITS(i);
        } else if (residual[i] <= -threshold) {
            word[(i - start) >> 2] |= NEG_BITS(i);
        }
    }
}

extern "C" __global__ void bitgrad_dequantize_two_bit(
    unsigned long long in_ptr, unsigned long long out_ptr,
    int n, float threshold)
{
    const unsigned char* in = (const unsigned char*)in_ptr;
    float* out = (float*)out_ptr;

    int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i >= n) return;
    unsigned char posmask = POS_BITS(i);
    unsigned char negmask = NEG_BITS(i);
    unsigned char masked = in[i >> 2] & posmask;
    if (masked == posmask) {
        out[i] = threshold;
    } else if (masked == negmask) {
        out[i] = -threshold;
    } else {
        out[i] = 0.0f;
    }
}

extern "C" __global__ void bitgrad_accumulate(
    unsigned long long grad_ptr, unsigned long long residual_ptr,
    int n, float alpha)
{
    const float* grad = (const float*)grad_ptr;
    float* residual = (float*)residual_ptr;

    int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i >= n) return;
    residual[i] = (1.0f - alpha) * residual[i] + alpha * grad[i];
}
"#;

const KERNEL_NAMES: [&str; 9] = [
    "bitgrad_quantize_one_bit",
    "bitgrad_quantize_one_bit_fused",
    "bitgrad_pack_one_bit_sign",
    "bitgrad_dequantize_one_bit",
    "bitgrad_dequantize_one_bit_add",
    "bitgrad_quantize_two_bit",
    "bitgrad_pack_two_bit_sign",
    "bitgrad_dequantize_two_bit",
    "bitgrad_accumulate",
];

/// One accelerator device with the bitgrad kernels loaded.
///
/// Construction compiles the kernel source via NVRTC, which takes tens of
/// milliseconds; contexts are meant to be created once per process and
/// shared behind an `Arc`.
pub struct AccelContext {
    // Keep the owning context and module alive as long as the functions.
    _ctx: Arc<CudaContext>,
    _module: Arc<cudarc::driver::CudaModule>,
    stream: Arc<CudaStream>,
    funcs: std::collections::HashMap<&'static str, CudaFunction>,
    threads_per_block: u32,
}

impl AccelContext {
    /// Bind device `cfg.accel_device` and compile the kernels.
    pub fn new(cfg: &Config) -> Result<Self> {
        let ctx = CudaContext::new(cfg.accel_device)
            .map_err(|e| BitgradError::accel(format!("create context: {e:?}")))?;
        let stream = ctx.default_stream();
        let ptx = compile_ptx(KERNEL_SRC)
            .map_err(|e| BitgradError::accel(format!("nvrtc compile: {e:?}")))?;
        let module = ctx
            .load_module(ptx)
            .map_err(|e| BitgradError::accel(format!("load module: {e:?}")))?;

        let mut funcs = std::collections::HashMap::new();
        for name in KERNEL_NAMES {
            let f = module
                .load_function(name)
                .map_err(|e| BitgradError::accel(format!("load {name}: {e:?}")))?;
            funcs.insert(name, f);
        }

        tracing::debug!(
            device = cfg.accel_device,
            threads = cfg.accel_threads_per_block,
            "accelerator context ready"
        );
        Ok(Self {
            _ctx: ctx,
            _module: module,
            stream,
            funcs,
            threads_per_block: cfg.accel_threads_per_block,
        })
    }

    fn func(&self, name: &'static str) -> &CudaFunction {
        // Every name in KERNEL_NAMES was loaded in new().
        &self.funcs[name]
    }

    fn launch_cfg(&self, workers: usize) -> LaunchConfig {
        let threads = self.threads_per_block;
        let blocks = (workers as u32).div_ceil(threads).max(1);
        LaunchConfig {
            grid_dim: (blocks, 1, 1),
            block_dim: (threads, 1, 1),
            shared_mem_bytes: 0,
        }
    }

    /// Block until all launched kernels have completed.
    pub fn synchronize(&self) -> Result<()> {
        self.stream
            .synchronize()
            .map_err(|e| BitgradError::accel(format!("stream synchronize: {e:?}")))
    }

    fn launch_quantize(
        &self,
        name: &'static str,
        workers: usize,
        grad: u64,
        compressed: u64,
        residual: u64,
        n: usize,
        threshold: f32,
        alpha: f32,
    ) -> Result<()> {
        let cfg = self.launch_cfg(workers);
        let n_arg = n as i32;
        let mut builder = self.stream.launch_builder(self.func(name));
        builder.arg(&grad);
        builder.arg(&compressed);
        builder.arg(&residual);
        builder.arg(&n_arg);
        builder.arg(&threshold);
        builder.arg(&alpha);
        unsafe { builder.launch(cfg) }
            .map_err(|e| BitgradError::accel(format!("launch {name}: {e:?}")))?;
        Ok(())
    }

    fn launch_pack_sign(
        &self,
        name: &'static str,
        workers: usize,
        residual: u64,
        compressed: u64,
        n: usize,
        threshold: f32,
    ) -> Result<()> {
        let cfg = self.launch_cfg(workers);
        let n_arg = n as i32;
        let mut builder = self.stream.launch_builder(self.func(name));
        builder.arg(&residual);
        builder.arg(&compressed);
        builder.arg(&n_arg);
        builder.arg(&threshold);
        unsafe { builder.launch(cfg) }
            .map_err(|e| BitgradError::accel(format!("launch {name}: {e:?}")))?;
        Ok(())
    }

    pub fn quantize_one_bit(
        &self,
        grad: u64,
        compressed: u64,
        residual: u64,
        n: usize,
        threshold: f32,
        alpha: f32,
    ) -> Result<()> {
        self.launch_quantize(
            "bitgrad_quantize_one_bit",
            one_bit_words(n),
            grad,
            compressed,
            residual,
            n,
            threshold,
            alpha,
        )
    }

    pub fn quantize_one_bit_fused(
        &self,
        grad: u64,
        compressed: u64,
        residual: u64,
        n: usize,
        threshold: f32,
        alpha: f32,
    ) -> Result<()> {
        self.launch_quantize(
            "bitgrad_quantize_one_bit_fused",
            one_bit_words(n),
            grad,
            compressed,
            residual,
            n,
            threshold,
            alpha,
        )
    }

    pub fn pack_one_bit_sign(
        &self,
        residual: u64,
        compressed: u64,
        n: usize,
        threshold: f32,
    ) -> Result<()> {
        self.launch_pack_sign(
            "bitgrad_pack_one_bit_sign",
            one_bit_words(n),
            residual,
            compressed,
            n,
            threshold,
        )
    }

    pub fn dequantize_one_bit(&self, compressed: u64, out: u64, n: usize) -> Result<()> {
        let cfg = self.launch_cfg(n);
        let n_arg = n as i32;
        let mut builder = self
            .stream
            .launch_builder(self.func("bitgrad_dequantize_one_bit"));
        builder.arg(&compressed);
        builder.arg(&out);
        builder.arg(&n_arg);
        unsafe { builder.launch(cfg) }
            .map_err(|e| BitgradError::accel(format!("launch dequantize_one_bit: {e:?}")))?;
        Ok(())
    }

    pub fn dequantize_one_bit_add(&self, compressed: u64, acc: u64, n: usize) -> Result<()> {
        let cfg = self.launch_cfg(n);
        let n_arg = n as i32;
        let mut builder = self
            .stream
            .launch_builder(self.func("bitgrad_dequantize_one_bit_add"));
        builder.arg(&compressed);
        builder.arg(&acc);
        builder.arg(&n_arg);
        unsafe { builder.launch(cfg) }
            .map_err(|e| BitgradError::accel(format!("launch dequantize_one_bit_add: {e:?}")))?;
        Ok(())
    }

    pub fn quantize_two_bit(
        &self,
        grad: u64,
        compressed: u64,
        residual: u64,
        n: usize,
        threshold: f32,
        alpha: f32,
    ) -> Result<()> {
        self.launch_quantize(
            "bitgrad_quantize_two_bit",
            two_bit_words(n),
            grad,
            compressed,
            residual,
            n,
            threshold,
            alpha,
        )
    }

    pub fn pack_two_bit_sign(
        &self,
        residual: u64,
        compressed: u64,
        n: usize,
        threshold: f32,
    ) -> Result<()> {
        self.launch_pack_sign(
            "bitgrad_pack_two_bit_sign",
            two_bit_words(n),
            residual,
            compressed,
            n,
            threshold,
        )
    }

    pub fn dequantize_two_bit(
        &self,
        compressed: u64,
        out: u64,
        n: usize,
        threshold: f32,
    ) -> Result<()> {
        let cfg = self.launch_cfg(n);
        let n_arg = n as i32;
        let mut builder = self
            .stream
            .launch_builder(self.func("bitgrad_dequantize_two_bit"));
        builder.arg(&compressed);
        builder.arg(&out);
        builder.arg(&n_arg);
        builder.arg(&threshold);
        unsafe { builder.launch(cfg) }
            .map_err(|e| BitgradError::accel(format!("launch dequantize_two_bit: {e:?}")))?;
        Ok(())
    }

    pub fn accumulate(&self, grad: u64, residual: u64, n: usize, alpha: f32) -> Result<()> {
        let cfg = self.launch_cfg(n);
        let n_arg = n as i32;
        let mut builder = self.stream.launch_builder(self.func("bitgrad_accumulate"));
        builder.arg(&grad);
        builder.arg(&residual);
        builder.arg(&n_arg);
        builder.arg(&alpha);
        unsafe { builder.launch(cfg) }
            .map_err(|e| BitgradError::accel(format!("launch accumulate: {e:?}")))?;
        Ok(())
    }
}
