//! The execution-engine seam.
//!
//! bitgrad performs no thread creation of its own. Every compress or
//! decompress call becomes a task object handed to an external dataflow
//! engine through [`Engine::push_sync`], together with the read and write
//! dependency sets the engine orders tasks by: tasks with overlapping
//! writes are serialized, tasks with disjoint sets may run in parallel.
//! The scheduling shim relies on that guarantee for residual correctness.
//!
//! The crate ships [`InlineEngine`], an executor that runs each task at the
//! point of submission. Program order is a total order, so the overlapping-
//! writes guarantee holds trivially; it is the right engine for tests,
//! single-threaded drivers, and as a reference for adapter authors.

use crate::error::Result;
use crate::tensor::VarId;
use crate::types::{DeviceKind, Priority};

#[cfg(feature = "cuda")]
use std::sync::Arc;

#[cfg(feature = "cuda")]
use crate::kernels::accel::AccelContext;

/// A task body. Invoked by the engine once its dependencies are satisfied.
pub type TaskFn = Box<dyn FnOnce(&mut RunContext) -> Result<()> + Send + 'static>;

/// Execution context handed to a running task.
///
/// Carries the device the task was scheduled on and, on accelerator
/// contexts, the handle kernels launch through.
pub struct RunContext {
    device: DeviceKind,
    #[cfg(feature = "cuda")]
    accel: Option<Arc<AccelContext>>,
}

impl RunContext {
    /// A host execution context.
    pub fn host() -> Self {
        Self {
            device: DeviceKind::Host,
            #[cfg(feature = "cuda")]
            accel: None,
        }
    }

    /// An accelerator execution context bound to `ctx`.
    #[cfg(feature = "cuda")]
    pub fn on_accel(ctx: Arc<AccelContext>) -> Self {
        Self {
            device: DeviceKind::Accel,
            accel: Some(ctx),
        }
    }

    /// Device this task runs on.
    pub fn device(&self) -> DeviceKind {
        self.device
    }

    /// The accelerator context, or an error on host contexts.
    #[cfg(feature = "cuda")]
    pub fn accel(&self) -> Result<&Arc<AccelContext>> {
        self.accel
            .as_ref()
            .ok_or(crate::error::BitgradError::AccelDisabled)
    }
}

/// Interface to the external execution engine (consumed, not provided).
///
/// `push_sync` must not block: the caller obtains ordering through the
/// engine's dependency tracking, not by waiting. The engine must serialize
/// tasks whose `writes` sets overlap and may run all others concurrently.
pub trait Engine: Send + Sync {
    /// Submit a task with explicit dependency sets.
    ///
    /// `ctx` names the device the task body expects its [`RunContext`] to
    /// be bound to. `label` is a short static tag for logs and profiles.
    fn push_sync(
        &self,
        task: TaskFn,
        ctx: DeviceKind,
        reads: &[VarId],
        writes: &[VarId],
        priority: Priority,
        label: &'static str,
    ) -> Result<()>;
}

/// Built-in synchronous executor.
///
/// Runs every task at the point of submission, on the calling thread.
/// Errors from the task body surface directly from `push_sync`.
pub struct InlineEngine {
    #[cfg(feature = "cuda")]
    accel: Option<Arc<AccelContext>>,
}

impl InlineEngine {
    /// An engine that can only run host tasks.
    pub fn host() -> Self {
        Self {
            #[cfg(feature = "cuda")]
            accel: None,
        }
    }

    /// An engine bound to an accelerator device per `cfg`.
    #[cfg(feature = "cuda")]
    pub fn with_accel(cfg: &crate::config::Config) -> Result<Self> {
        Ok(Self {
            accel: Some(Arc::new(AccelContext::new(cfg)?)),
        })
    }
}

impl Default for InlineEngine {
    fn default() -> Self {
        Self::host()
    }
}

impl Engine for InlineEngine {
    fn push_sync(
        &self,
        task: TaskFn,
        ctx: DeviceKind,
        _reads: &[VarId],
        _writes: &[VarId],
        priority: Priority,
        label: &'static str,
    ) -> Result<()> {
        tracing::trace!(%ctx, %priority, label, "inline engine task");
        let mut rctx = match ctx {
            DeviceKind::Host => RunContext::host(),
            DeviceKind::Accel => {
                #[cfg(feature = "cuda")]
                {
                    match &self.accel {
                        Some(accel) => RunContext::on_accel(Arc::clone(accel)),
                        None => return Err(crate::error::BitgradError::AccelDisabled),
                    }
                }
                #[cfg(not(feature = "cuda"))]
                {
                    return Err(crate::error::BitgradError::AccelDisabled);
                }
            }
        };
        task(&mut rctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BitgradError;

    #[test]
    fn test_inline_engine_runs_task() {
        let engine = InlineEngine::host();
        // The task must run before push_sync returns.
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag2 = std::sync::Arc::clone(&flag);
        engine
            .push_sync(
                Box::new(move |rctx| {
                    assert_eq!(rctx.device(), DeviceKind::Host);
                    flag2.store(true, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                }),
                DeviceKind::Host,
                &[],
                &[],
                Priority::Normal,
                "TestTask",
            )
            .unwrap();
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_inline_engine_propagates_task_error() {
        let engine = InlineEngine::host();
        let err = engine
            .push_sync(
                Box::new(|_| Err(BitgradError::NotInitialized)),
                DeviceKind::Host,
                &[],
                &[],
                Priority::Normal,
                "FailingTask",
            )
            .unwrap_err();
        assert!(matches!(err, BitgradError::NotInitialized));
    }

    #[test]
    fn test_host_engine_rejects_accel_tasks() {
        let engine = InlineEngine::host();
        let err = engine
            .push_sync(
                Box::new(|_| Ok(())),
                DeviceKind::Accel,
                &[],
                &[],
                Priority::Normal,
                "AccelTask",
            )
            .unwrap_err();
        assert!(matches!(err, BitgradError::AccelDisabled));
    }
}
