//! Command pools, command buffers and queue submission.
//!
//! A [`CommandBuffer`] moves through a fixed state machine:
//!
//! ```text
//! Initial --begin--> Recording --end--> Executable --submit--> Pending
//!    ^                                                            |
//!    +------------------- CommandPool::reset ----------------------+
//! ```
//!
//! There is no per-buffer reset. Resetting the owning [`CommandPool`] returns
//! every buffer it allocated to `Initial`.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{GpuCommandBuffer, GpuCommandPool, GpuQueue, GpuSubmission};
use crate::error::{CommandError, GraphicsResult};
use crate::sync::{Fence, Semaphore};

/// Recording state of a [`CommandBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    /// Freshly allocated or recycled by a pool reset.
    Initial,
    /// Between `begin` and `end`.
    Recording,
    /// Recorded and ready for submission.
    Executable,
    /// Submitted to a queue. Only a pool reset leaves this state.
    Pending,
}

/// A command recorded into a [`CommandBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCommand {
    /// Debug label.
    Marker(String),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    /// Make prior writes to `resource` visible to subsequent commands.
    Barrier { resource: String },
}

#[derive(Debug)]
struct Lifecycle {
    state: CommandBufferState,
    /// Fence of the submission that moved the buffer to `Pending`.
    in_flight: Option<Fence>,
    recorded: usize,
}

impl Lifecycle {
    fn require(&self, expected: CommandBufferState) -> Result<(), CommandError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CommandError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }
}

/// A primary command buffer bound to one pool and one queue family.
pub struct CommandBuffer {
    gpu: GpuCommandBuffer,
    lifecycle: Arc<Mutex<Lifecycle>>,
    queue_family: u32,
}

impl CommandBuffer {
    pub fn state(&self) -> CommandBufferState {
        self.lifecycle.lock().state
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Number of commands recorded since the last `begin`.
    pub fn command_count(&self) -> usize {
        self.lifecycle.lock().recorded
    }

    /// Start recording. Only valid in the `Initial` state.
    pub fn begin(&mut self) -> GraphicsResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.require(CommandBufferState::Initial)?;
        self.gpu.begin()?;
        lifecycle.state = CommandBufferState::Recording;
        lifecycle.recorded = 0;
        Ok(())
    }

    /// Record a command. Only valid while recording.
    pub fn record(&mut self, command: RecordedCommand) -> Result<(), CommandError> {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.require(CommandBufferState::Recording)?;
        self.gpu.record(&command);
        lifecycle.recorded += 1;
        Ok(())
    }

    /// Finish recording. Only valid while recording.
    pub fn end(&mut self) -> GraphicsResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.require(CommandBufferState::Recording)?;
        self.gpu.end()?;
        lifecycle.state = CommandBufferState::Executable;
        Ok(())
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lifecycle = self.lifecycle.lock();
        f.debug_struct("CommandBuffer")
            .field("state", &lifecycle.state)
            .field("recorded", &lifecycle.recorded)
            .field("queue_family", &self.queue_family)
            .finish()
    }
}

/// Allocator and lifetime owner for a batch of command buffers.
///
/// Buffers must not be dropped while `Pending`; wait on their fence first.
pub struct CommandPool {
    gpu: GpuCommandPool,
    queue_family: u32,
    buffers: Vec<Weak<Mutex<Lifecycle>>>,
}

impl CommandPool {
    pub(crate) fn new(gpu: GpuCommandPool, queue_family: u32) -> Self {
        Self {
            gpu,
            queue_family,
            buffers: Vec::new(),
        }
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Number of live buffers allocated from this pool.
    pub fn buffer_count(&self) -> usize {
        self.buffers.iter().filter(|b| b.strong_count() > 0).count()
    }

    /// Allocate a primary command buffer in the `Initial` state.
    pub fn create_command_buffer(&mut self) -> GraphicsResult<CommandBuffer> {
        let gpu = self.gpu.allocate()?;
        let lifecycle = Arc::new(Mutex::new(Lifecycle {
            state: CommandBufferState::Initial,
            in_flight: None,
            recorded: 0,
        }));
        self.buffers.retain(|b| b.strong_count() > 0);
        self.buffers.push(Arc::downgrade(&lifecycle));
        Ok(CommandBuffer {
            gpu,
            lifecycle,
            queue_family: self.queue_family,
        })
    }

    /// Return every buffer allocated from this pool to `Initial`.
    ///
    /// Fails with [`CommandError::PoolBusy`] if a pending buffer's fence has
    /// not been signaled yet. A pending buffer submitted without a fence cannot
    /// be checked and is assumed complete.
    pub fn reset(&mut self) -> GraphicsResult<()> {
        self.buffers.retain(|b| b.strong_count() > 0);
        let lifecycles: Vec<_> = self.buffers.iter().filter_map(Weak::upgrade).collect();

        let busy = lifecycles
            .iter()
            .filter(|l| {
                let l = l.lock();
                l.state == CommandBufferState::Pending
                    && l.in_flight.as_ref().is_some_and(|fence| !fence.is_signaled())
            })
            .count();
        if busy > 0 {
            return Err(CommandError::PoolBusy(busy).into());
        }

        let unfenced = lifecycles
            .iter()
            .filter(|l| {
                let l = l.lock();
                l.state == CommandBufferState::Pending && l.in_flight.is_none()
            })
            .count();
        if unfenced > 0 {
            log::warn!(
                "Resetting command pool with {} pending buffer(s) submitted without a fence",
                unfenced
            );
        }

        self.gpu.reset()?;

        for lifecycle in &lifecycles {
            let mut l = lifecycle.lock();
            l.state = CommandBufferState::Initial;
            l.in_flight = None;
            l.recorded = 0;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPool")
            .field("queue_family", &self.queue_family)
            .field("buffers", &self.buffer_count())
            .finish()
    }
}

/// One entry of [`Queue::submit_batch`]: a command buffer with the semaphores
/// it waits on and signals.
#[derive(Debug, Clone)]
pub struct Submission<'a> {
    command_buffer: &'a CommandBuffer,
    wait_semaphores: Vec<&'a Semaphore>,
    signal_semaphores: Vec<&'a Semaphore>,
}

impl<'a> Submission<'a> {
    pub fn new(command_buffer: &'a CommandBuffer) -> Self {
        Self {
            command_buffer,
            wait_semaphores: Vec::new(),
            signal_semaphores: Vec::new(),
        }
    }

    pub fn with_waits(mut self, semaphores: impl IntoIterator<Item = &'a Semaphore>) -> Self {
        self.wait_semaphores.extend(semaphores);
        self
    }

    pub fn with_signals(mut self, semaphores: impl IntoIterator<Item = &'a Semaphore>) -> Self {
        self.signal_semaphores.extend(semaphores);
        self
    }

    pub fn command_buffer(&self) -> &'a CommandBuffer {
        self.command_buffer
    }
}

/// A device queue.
pub struct Queue {
    gpu: GpuQueue,
    family: u32,
}

impl Queue {
    pub(crate) fn new(gpu: GpuQueue, family: u32) -> Self {
        Self { gpu, family }
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    /// Submit an executable command buffer.
    ///
    /// The submission starts after every semaphore in `wait_semaphores` has
    /// been signaled, signals every semaphore in `signal_semaphores` when it
    /// completes, and then signals `fence`. On success the buffer is `Pending`.
    /// On failure it stays `Executable` and nothing is signaled.
    pub fn submit(
        &self,
        command_buffer: &CommandBuffer,
        wait_semaphores: &[&Semaphore],
        signal_semaphores: &[&Semaphore],
        fence: Option<&Fence>,
    ) -> GraphicsResult<()> {
        let submission = Submission::new(command_buffer)
            .with_waits(wait_semaphores.iter().copied())
            .with_signals(signal_semaphores.iter().copied());
        self.submit_batch(std::slice::from_ref(&submission), fence)
    }

    /// Submit several command buffers in one hand-off.
    ///
    /// Entries start in order, and an entry may wait on a semaphore signaled by
    /// an earlier entry of the same batch. `fence` is signaled once every entry
    /// has completed. The batch is all or nothing: on failure every buffer
    /// stays `Executable` and no semaphore or fence is signaled.
    pub fn submit_batch(
        &self,
        submissions: &[Submission<'_>],
        fence: Option<&Fence>,
    ) -> GraphicsResult<()> {
        for (index, submission) in submissions.iter().enumerate() {
            let buffer = submission.command_buffer;
            if buffer.queue_family != self.family {
                return Err(CommandError::ForeignObject.into());
            }
            let repeated = submissions[..index]
                .iter()
                .any(|earlier| Arc::ptr_eq(&earlier.command_buffer.lifecycle, &buffer.lifecycle));
            if repeated {
                // The second occurrence would find the buffer already pending.
                return Err(CommandError::InvalidState {
                    expected: CommandBufferState::Executable,
                    actual: CommandBufferState::Pending,
                }
                .into());
            }
        }

        let mut lifecycles: Vec<_> = submissions
            .iter()
            .map(|submission| submission.command_buffer.lifecycle.lock())
            .collect();
        for lifecycle in &lifecycles {
            lifecycle.require(CommandBufferState::Executable)?;
        }

        let batch: Vec<GpuSubmission<'_>> = submissions
            .iter()
            .map(|submission| GpuSubmission {
                command_buffer: &submission.command_buffer.gpu,
                wait_semaphores: submission.wait_semaphores.iter().map(|s| s.gpu()).collect(),
                signal_semaphores: submission.signal_semaphores.iter().map(|s| s.gpu()).collect(),
            })
            .collect();
        self.gpu.submit_batch(&batch, fence.map(Fence::gpu))?;

        for lifecycle in &mut lifecycles {
            lifecycle.state = CommandBufferState::Pending;
            lifecycle.in_flight = fence.cloned();
        }
        Ok(())
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").field("family", &self.family).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererConfig;
    use crate::context::GraphicsContext;
    use crate::error::GraphicsError;
    use std::time::Duration;

    fn context() -> Arc<GraphicsContext> {
        GraphicsContext::new(RendererConfig::new()).unwrap()
    }

    fn invalid_state(err: GraphicsError) -> (CommandBufferState, CommandBufferState) {
        match err {
            GraphicsError::Command(CommandError::InvalidState { expected, actual }) => {
                (expected, actual)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_state_machine() {
        let ctx = context();
        let queue = ctx.queue().unwrap();
        let mut pool = ctx.create_command_pool().unwrap();
        let mut cmd = pool.create_command_buffer().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Initial);

        cmd.begin().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Recording);
        cmd.record(RecordedCommand::Draw {
            vertex_count: 3,
            instance_count: 1,
        })
        .unwrap();
        cmd.end().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Executable);
        assert_eq!(cmd.command_count(), 1);

        queue.submit(&cmd, &[], &[], None).unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Pending);

        pool.reset().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Initial);
        assert_eq!(cmd.command_count(), 0);
    }

    #[test]
    fn test_begin_while_recording_rejected() {
        let ctx = context();
        let mut pool = ctx.create_command_pool().unwrap();
        let mut cmd = pool.create_command_buffer().unwrap();
        cmd.begin().unwrap();
        let (expected, actual) = invalid_state(cmd.begin().unwrap_err());
        assert_eq!(expected, CommandBufferState::Initial);
        assert_eq!(actual, CommandBufferState::Recording);
    }

    #[test]
    fn test_begin_end_begin_rejected() {
        let ctx = context();
        let mut pool = ctx.create_command_pool().unwrap();
        let mut cmd = pool.create_command_buffer().unwrap();
        cmd.begin().unwrap();
        cmd.end().unwrap();
        let (_, actual) = invalid_state(cmd.begin().unwrap_err());
        assert_eq!(actual, CommandBufferState::Executable);

        pool.reset().unwrap();
        cmd.begin().unwrap();
    }

    #[test]
    fn test_end_without_begin_rejected() {
        let ctx = context();
        let mut pool = ctx.create_command_pool().unwrap();
        let mut cmd = pool.create_command_buffer().unwrap();
        let (expected, actual) = invalid_state(cmd.end().unwrap_err());
        assert_eq!(expected, CommandBufferState::Recording);
        assert_eq!(actual, CommandBufferState::Initial);
        assert!(cmd
            .record(RecordedCommand::Marker("outside".into()))
            .is_err());
    }

    #[test]
    fn test_submit_requires_executable() {
        let ctx = context();
        let queue = ctx.queue().unwrap();
        let mut pool = ctx.create_command_pool().unwrap();
        let mut cmd = pool.create_command_buffer().unwrap();
        assert!(queue.submit(&cmd, &[], &[], None).is_err());
        cmd.begin().unwrap();
        assert!(queue.submit(&cmd, &[], &[], None).is_err());
        cmd.end().unwrap();
        queue.submit(&cmd, &[], &[], None).unwrap();
        let (expected, actual) = invalid_state(queue.submit(&cmd, &[], &[], None).unwrap_err());
        assert_eq!(expected, CommandBufferState::Executable);
        assert_eq!(actual, CommandBufferState::Pending);
    }

    #[test]
    fn test_pool_reset_while_busy() {
        let ctx =
            GraphicsContext::new(RendererConfig::new().with_dummy_latency(Duration::from_millis(50)))
                .unwrap();
        let queue = ctx.queue().unwrap();
        let mut pool = ctx.create_command_pool().unwrap();
        let mut cmd = pool.create_command_buffer().unwrap();
        let fence = ctx.create_fence(false).unwrap();

        cmd.begin().unwrap();
        cmd.end().unwrap();
        queue.submit(&cmd, &[], &[], Some(&fence)).unwrap();

        let err = pool.reset().unwrap_err();
        assert_eq!(err, GraphicsError::Command(CommandError::PoolBusy(1)));
        assert_eq!(cmd.state(), CommandBufferState::Pending);

        fence.wait().unwrap();
        pool.reset().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Initial);
    }

    #[test]
    fn test_semaphore_chain() {
        let ctx = context();
        let queue = ctx.queue().unwrap();
        let mut pool = ctx.create_command_pool().unwrap();
        let mut first = pool.create_command_buffer().unwrap();
        let mut second = pool.create_command_buffer().unwrap();
        let semaphore = ctx.create_semaphore().unwrap();

        for cmd in [&mut first, &mut second] {
            cmd.begin().unwrap();
            cmd.end().unwrap();
        }

        // Waiting before anything signals the semaphore is rejected.
        assert!(queue.submit(&second, &[&semaphore], &[], None).is_err());
        assert_eq!(second.state(), CommandBufferState::Executable);

        queue.submit(&first, &[], &[&semaphore], None).unwrap();
        queue.submit(&second, &[&semaphore], &[], None).unwrap();
        assert_eq!(pool.buffer_count(), 2);
    }

    #[test]
    fn test_batch_chains_semaphores_under_one_fence() {
        let ctx =
            GraphicsContext::new(RendererConfig::new().with_dummy_latency(Duration::from_millis(10)))
                .unwrap();
        let queue = ctx.queue().unwrap();
        let mut pool = ctx.create_command_pool().unwrap();
        let mut first = pool.create_command_buffer().unwrap();
        let mut second = pool.create_command_buffer().unwrap();
        let link = ctx.create_semaphore().unwrap();
        let fence = ctx.create_fence(false).unwrap();
        for cmd in [&mut first, &mut second] {
            cmd.begin().unwrap();
            cmd.end().unwrap();
        }

        let batch = [
            Submission::new(&first).with_signals([&link]),
            Submission::new(&second).with_waits([&link]),
        ];
        queue.submit_batch(&batch, Some(&fence)).unwrap();
        assert_eq!(first.state(), CommandBufferState::Pending);
        assert_eq!(second.state(), CommandBufferState::Pending);
        assert_eq!(
            pool.reset().unwrap_err(),
            GraphicsError::Command(CommandError::PoolBusy(2))
        );

        fence.wait().unwrap();
        pool.reset().unwrap();
    }

    #[test]
    fn test_rejected_batch_leaves_every_buffer_executable() {
        let ctx = context();
        let queue = ctx.queue().unwrap();
        let mut pool = ctx.create_command_pool().unwrap();
        let mut first = pool.create_command_buffer().unwrap();
        let mut second = pool.create_command_buffer().unwrap();
        let link = ctx.create_semaphore().unwrap();
        let unsignaled = ctx.create_semaphore().unwrap();
        let fence = ctx.create_fence(false).unwrap();
        for cmd in [&mut first, &mut second] {
            cmd.begin().unwrap();
            cmd.end().unwrap();
        }

        let batch = [
            Submission::new(&first).with_signals([&link]),
            Submission::new(&second).with_waits([&link, &unsignaled]),
        ];
        let err = queue.submit_batch(&batch, Some(&fence)).unwrap_err();
        assert!(matches!(err, GraphicsError::SubmissionFailed(_)));
        assert_eq!(first.state(), CommandBufferState::Executable);
        assert_eq!(second.state(), CommandBufferState::Executable);
        assert!(!fence.is_signaled());

        // `link` was not signaled by the rejected batch, so it can be signaled now.
        queue.submit(&first, &[], &[&link], None).unwrap();
        queue.submit(&second, &[&link], &[], None).unwrap();
    }

    #[test]
    fn test_batch_rejects_repeated_buffer() {
        let ctx = context();
        let queue = ctx.queue().unwrap();
        let mut pool = ctx.create_command_pool().unwrap();
        let mut cmd = pool.create_command_buffer().unwrap();
        cmd.begin().unwrap();
        cmd.end().unwrap();

        let batch = [Submission::new(&cmd), Submission::new(&cmd)];
        let (_, actual) = invalid_state(queue.submit_batch(&batch, None).unwrap_err());
        assert_eq!(actual, CommandBufferState::Pending);
        assert_eq!(cmd.state(), CommandBufferState::Executable);
    }

    #[test]
    fn test_dropped_buffers_are_forgotten() {
        let ctx = context();
        let mut pool = ctx.create_command_pool().unwrap();
        let cmd = pool.create_command_buffer().unwrap();
        assert_eq!(pool.buffer_count(), 1);
        drop(cmd);
        assert_eq!(pool.buffer_count(), 0);
        pool.reset().unwrap();
    }
}
