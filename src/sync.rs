//! GPU synchronization primitives.
//!
//! [`Fence`] lets the CPU wait for GPU work. [`Semaphore`] orders GPU work
//! against other GPU work and cannot be observed from the CPU.
//!
//! Both are created by [`GraphicsContext`](crate::GraphicsContext) and are
//! cheap to clone: clones refer to the same underlying object.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{GpuFence, GpuSemaphore};
use crate::error::GraphicsResult;

/// GPU semaphore for ordering submissions.
///
/// One submission signals the semaphore when it completes. Another submission
/// waits on it before it starts.
#[derive(Debug, Clone)]
pub struct Semaphore {
    gpu: Arc<GpuSemaphore>,
}

impl Semaphore {
    pub(crate) fn new(gpu: GpuSemaphore) -> Self {
        Self { gpu: Arc::new(gpu) }
    }

    /// Backend identifier, unique per device. Matches the id in backend logs.
    pub fn id(&self) -> u64 {
        self.gpu.id()
    }

    pub(crate) fn gpu(&self) -> &GpuSemaphore {
        &self.gpu
    }
}

impl PartialEq for Semaphore {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.gpu, &other.gpu)
    }
}

impl Eq for Semaphore {}

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

/// CPU-GPU synchronization primitive.
///
/// A fence is signaled by the queue when the submission it was attached to
/// completes. [`Fence::reset`] returns it to the unsignaled state so it can be
/// attached to the next submission.
///
/// # Example
///
/// ```ignore
/// fence.reset()?;
/// queue.submit(&cmd, &[], &[], Some(&fence))?;
/// fence.wait()?;
/// assert_eq!(fence.status(), FenceStatus::Signaled);
/// ```
#[derive(Debug, Clone)]
pub struct Fence {
    gpu: Arc<GpuFence>,
}

impl Fence {
    pub(crate) fn new(gpu: GpuFence) -> Self {
        Self { gpu: Arc::new(gpu) }
    }

    pub(crate) fn gpu(&self) -> &GpuFence {
        &self.gpu
    }

    /// Check the current status of the fence.
    pub fn status(&self) -> FenceStatus {
        if self.gpu.is_signaled() {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        }
    }

    /// Check if the fence is signaled (non-blocking).
    pub fn is_signaled(&self) -> bool {
        self.status() == FenceStatus::Signaled
    }

    /// Block until the fence is signaled.
    ///
    /// Returns immediately if it already is. Waiting on a reset fence that is
    /// never submitted blocks forever; use [`Fence::wait_timeout`] when that
    /// cannot be ruled out.
    pub fn wait(&self) -> GraphicsResult<()> {
        self.gpu.wait(None).map(|_| ())
    }

    /// Wait for the fence with a timeout.
    ///
    /// Returns `true` if the fence was signaled, `false` if timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> GraphicsResult<bool> {
        self.gpu.wait(Some(timeout))
    }

    /// Reset the fence to unsignaled state.
    ///
    /// Must only be called when no GPU work is pending on this fence.
    pub fn reset(&self) -> GraphicsResult<()> {
        self.gpu.reset()
    }

    /// Check whether two handles refer to the same fence.
    pub fn same_as(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.gpu, &other.gpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererConfig;
    use crate::context::GraphicsContext;

    fn context(latency: Duration) -> Arc<GraphicsContext> {
        GraphicsContext::new(RendererConfig::new().with_dummy_latency(latency)).unwrap()
    }

    #[test]
    fn test_fence_initial_state() {
        let ctx = context(Duration::ZERO);
        let signaled = ctx.create_fence(true).unwrap();
        let unsignaled = ctx.create_fence(false).unwrap();
        assert_eq!(signaled.status(), FenceStatus::Signaled);
        assert_eq!(unsignaled.status(), FenceStatus::Unsignaled);
    }

    #[test]
    fn test_fence_clone_shares_state() {
        let ctx = context(Duration::ZERO);
        let fence = ctx.create_fence(true).unwrap();
        let clone = fence.clone();
        fence.reset().unwrap();
        assert!(!clone.is_signaled());
        assert!(clone.same_as(&fence));
    }

    #[test]
    fn test_wait_on_signaled_fence_returns_immediately() {
        let ctx = context(Duration::ZERO);
        let fence = ctx.create_fence(true).unwrap();
        fence.wait().unwrap();
        fence.wait().unwrap();
        assert!(fence.wait_timeout(Duration::ZERO).unwrap());
    }

    #[test]
    fn test_wait_timeout_on_unsignaled_fence() {
        let ctx = context(Duration::ZERO);
        let fence = ctx.create_fence(false).unwrap();
        assert!(!fence.wait_timeout(Duration::from_millis(5)).unwrap());
    }

    #[test]
    fn test_reset_then_wait_for_async_signal() {
        let ctx = context(Duration::from_millis(30));
        let queue = ctx.queue().unwrap();
        let mut pool = ctx.create_command_pool().unwrap();
        let mut cmd = pool.create_command_buffer().unwrap();
        let fence = ctx.create_fence(true).unwrap();

        fence.reset().unwrap();
        assert!(!fence.is_signaled());

        cmd.begin().unwrap();
        cmd.end().unwrap();
        queue.submit(&cmd, &[], &[], Some(&fence)).unwrap();
        assert!(!fence.is_signaled());

        fence.wait().unwrap();
        assert!(fence.is_signaled());
    }

    #[test]
    fn test_semaphore_ids_are_unique() {
        let ctx = context(Duration::ZERO);
        let a = ctx.create_semaphore().unwrap();
        let b = ctx.create_semaphore().unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_semaphore_id_matches_backend_reports() {
        let ctx = context(Duration::ZERO);
        let queue = ctx.queue().unwrap();
        let mut pool = ctx.create_command_pool().unwrap();
        let mut cmd = pool.create_command_buffer().unwrap();
        cmd.begin().unwrap();
        cmd.end().unwrap();
        let semaphore = ctx.create_semaphore().unwrap();

        let err = queue.submit(&cmd, &[&semaphore], &[], None).unwrap_err();
        let expected = format!("semaphore {} ", semaphore.id());
        assert!(err.to_string().contains(&expected), "{err}");
    }
}
