//! Dummy GPU backend for testing and development.
//!
//! No GPU work is performed. The queue executes submissions instantly (or after
//! a configured latency on a worker thread), which is enough to drive fences,
//! semaphores and command buffer lifecycles without hardware.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::command::RecordedCommand;
use crate::config::DummyConfig;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{BufferDescriptor, TextureDescriptor};

/// Dummy device. Hands out ids and tracks outstanding simulated work.
#[derive(Debug)]
pub(crate) struct DummyDevice {
    config: DummyConfig,
    next_id: AtomicU64,
    in_flight: Mutex<usize>,
    idle: Condvar,
}

impl DummyDevice {
    pub const GRAPHICS_QUEUE_FAMILY: u32 = 0;

    pub fn new(config: DummyConfig) -> Arc<Self> {
        log::info!(
            "DummyDevice: created (completion latency: {:?})",
            config.completion_latency
        );
        Arc::new(Self {
            config,
            next_id: AtomicU64::new(1),
            in_flight: Mutex::new(0),
            idle: Condvar::new(),
        })
    }

    pub fn name(&self) -> &str {
        "Dummy Device"
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn create_fence(&self, signaled: bool) -> Arc<DummyFence> {
        Arc::new(DummyFence {
            signaled: Mutex::new(signaled),
            condvar: Condvar::new(),
        })
    }

    pub fn create_semaphore(&self) -> Arc<DummySemaphore> {
        Arc::new(DummySemaphore {
            id: self.next_id(),
            pending: AtomicBool::new(false),
        })
    }

    pub fn create_command_pool(&self) -> DummyCommandPool {
        let id = self.next_id();
        log::trace!("DummyDevice: creating command pool {}", id);
        DummyCommandPool {
            id,
            next_buffer: AtomicU64::new(0),
        }
    }

    pub fn create_queue(device: &Arc<Self>) -> GraphicsResult<DummyQueue> {
        DummyQueue::new(device)
    }

    pub fn create_buffer(&self, descriptor: &BufferDescriptor) -> GraphicsResult<DummyAllocation> {
        log::trace!(
            "DummyDevice: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        if descriptor.size == 0 {
            return Err(GraphicsError::ResourceCreationFailed(
                "buffer size must be non-zero".into(),
            ));
        }
        Ok(DummyAllocation {
            id: self.next_id(),
            bytes: descriptor.size,
        })
    }

    pub fn create_texture(&self, descriptor: &TextureDescriptor) -> GraphicsResult<DummyAllocation> {
        log::trace!(
            "DummyDevice: creating texture {:?} ({}x{}, {:?})",
            descriptor.label,
            descriptor.width,
            descriptor.height,
            descriptor.format
        );
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "texture extent must be non-zero, got {}x{}",
                descriptor.width, descriptor.height
            )));
        }
        Ok(DummyAllocation {
            id: self.next_id(),
            bytes: descriptor.width as u64
                * descriptor.height as u64
                * descriptor.format.bytes_per_pixel() as u64,
        })
    }

    /// Block until every delayed completion has fired.
    pub fn wait_idle(&self) {
        let mut in_flight = self.in_flight.lock();
        while *in_flight > 0 {
            self.idle.wait(&mut in_flight);
        }
    }

    fn begin_work(&self) {
        *self.in_flight.lock() += 1;
    }

    fn finish_work(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.idle.notify_all();
        }
    }
}

/// Host-visible fence state.
#[derive(Debug)]
pub(crate) struct DummyFence {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl DummyFence {
    pub fn signal(&self) {
        *self.signaled.lock() = true;
        self.condvar.notify_all();
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }

    /// Returns `false` if `timeout` elapsed before the fence was signaled.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut signaled = self.signaled.lock();
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        while !*signaled {
            match deadline {
                Some(deadline) => {
                    if self.condvar.wait_until(&mut signaled, deadline).timed_out() {
                        return *signaled;
                    }
                }
                None => self.condvar.wait(&mut signaled),
            }
        }
        true
    }
}

/// Binary semaphore with a single pending-signal bit.
#[derive(Debug)]
pub(crate) struct DummySemaphore {
    id: u64,
    pending: AtomicBool,
}

impl DummySemaphore {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::Release);
    }
}

#[derive(Debug)]
pub(crate) struct DummyCommandPool {
    id: u64,
    next_buffer: AtomicU64,
}

impl DummyCommandPool {
    pub fn allocate(&self) -> DummyCommandBuffer {
        let index = self.next_buffer.fetch_add(1, Ordering::Relaxed);
        DummyCommandBuffer {
            label: format!("pool{}/cmd{}", self.id, index),
            commands: Vec::new(),
        }
    }

    pub fn reset(&self) {
        log::trace!("DummyCommandPool {}: reset", self.id);
    }
}

/// Records commands into a plain vector.
#[derive(Debug)]
pub(crate) struct DummyCommandBuffer {
    label: String,
    commands: Vec<RecordedCommand>,
}

impl DummyCommandBuffer {
    pub fn begin(&mut self) {
        self.commands.clear();
    }

    pub fn record(&mut self, command: &RecordedCommand) {
        self.commands.push(command.clone());
    }

    pub fn end(&mut self) {
        log::trace!(
            "DummyCommandBuffer {}: recorded {} command(s)",
            self.label,
            self.commands.len()
        );
    }
}

/// One command buffer of a batch, with its semaphore operations.
#[derive(Debug)]
pub(crate) struct DummySubmission<'a> {
    pub command_buffer: &'a DummyCommandBuffer,
    pub wait_semaphores: Vec<&'a DummySemaphore>,
    pub signal_semaphores: Vec<&'a DummySemaphore>,
}

/// A fenced batch waiting for its simulated completion.
#[derive(Debug)]
struct Completion {
    submitted: Instant,
    fence: Arc<DummyFence>,
}

/// Simulated queue.
///
/// With a completion latency, fences are signaled by a single worker thread
/// that drains a FIFO channel, so batches complete in submission order.
#[derive(Debug)]
pub(crate) struct DummyQueue {
    device: Arc<DummyDevice>,
    submissions: AtomicU64,
    completions: Mutex<Option<mpsc::Sender<Completion>>>,
    worker: Option<JoinHandle<()>>,
}

impl DummyQueue {
    fn new(device: &Arc<DummyDevice>) -> GraphicsResult<Self> {
        let latency = device.config.completion_latency;
        let (completions, worker) = if latency.is_zero() {
            (None, None)
        } else {
            let (sender, receiver) = mpsc::channel::<Completion>();
            let worker_device = Arc::clone(device);
            let worker = thread::Builder::new()
                .name("dummy-queue".into())
                .spawn(move || {
                    for completion in receiver {
                        let elapsed = completion.submitted.elapsed();
                        if elapsed < latency {
                            thread::sleep(latency - elapsed);
                        }
                        completion.fence.signal();
                        worker_device.finish_work();
                    }
                })
                .map_err(|e| {
                    GraphicsError::InitializationFailed(format!(
                        "failed to spawn dummy queue worker: {e}"
                    ))
                })?;
            (Some(sender), Some(worker))
        };
        Ok(Self {
            device: Arc::clone(device),
            submissions: AtomicU64::new(0),
            completions: Mutex::new(completions),
            worker,
        })
    }

    /// Execute a batch of submissions as one hand-off.
    ///
    /// Every entry counts toward `fail_submission_at`. The batch is validated
    /// as a whole before any semaphore changes, so a rejected batch leaves no
    /// trace. `fence` is signaled once the whole batch has completed.
    pub fn submit(
        &self,
        batch: &[DummySubmission<'_>],
        fence: Option<Arc<DummyFence>>,
    ) -> GraphicsResult<()> {
        let count = batch.len() as u64;
        let first = self.submissions.fetch_add(count, Ordering::Relaxed);
        if let Some(index) = self
            .device
            .config
            .fail_submission_at
            .filter(|index| (first..first + count).contains(index))
        {
            let label = &batch[(index - first) as usize].command_buffer.label;
            return Err(GraphicsError::SubmissionFailed(format!(
                "dummy queue rejected submission {index} ({label})"
            )));
        }

        let completions = self.completions.lock();
        let pending = Self::replay_semaphores(batch)?;

        if let Some(fence) = fence {
            match completions.as_ref() {
                None => fence.signal(),
                Some(sender) => {
                    self.device.begin_work();
                    let completion = Completion {
                        submitted: Instant::now(),
                        fence,
                    };
                    if sender.send(completion).is_err() {
                        self.device.finish_work();
                        return Err(GraphicsError::SubmissionFailed(
                            "dummy queue worker has stopped".into(),
                        ));
                    }
                }
            }
        }

        for submission in batch {
            for semaphore in submission
                .wait_semaphores
                .iter()
                .chain(&submission.signal_semaphores)
            {
                if let Some(&state) = pending.get(&semaphore.id()) {
                    semaphore.set_pending(state);
                }
            }
            log::trace!(
                "DummyQueue: executing {} ({} command(s), {} wait(s), {} signal(s))",
                submission.command_buffer.label,
                submission.command_buffer.commands.len(),
                submission.wait_semaphores.len(),
                submission.signal_semaphores.len()
            );
        }
        Ok(())
    }

    /// Apply the batch's semaphore operations to a scratch copy and return
    /// the resulting pending bits.
    ///
    /// A wait needs a pending signal and a signal needs none, as for a binary
    /// semaphore on a real queue. Later entries see earlier entries' signals.
    fn replay_semaphores(batch: &[DummySubmission<'_>]) -> GraphicsResult<HashMap<u64, bool>> {
        let mut pending: HashMap<u64, bool> = HashMap::new();
        for submission in batch {
            for semaphore in &submission.wait_semaphores {
                let state = pending
                    .entry(semaphore.id())
                    .or_insert_with(|| semaphore.is_pending());
                if !*state {
                    return Err(GraphicsError::SubmissionFailed(format!(
                        "wait on semaphore {} that has no pending signal",
                        semaphore.id()
                    )));
                }
                *state = false;
            }
            for semaphore in &submission.signal_semaphores {
                let state = pending
                    .entry(semaphore.id())
                    .or_insert_with(|| semaphore.is_pending());
                if *state {
                    return Err(GraphicsError::SubmissionFailed(format!(
                        "signal of semaphore {} that already has a pending signal",
                        semaphore.id()
                    )));
                }
                *state = true;
            }
        }
        Ok(pending)
    }
}

impl Drop for DummyQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish the queued completions and exit.
        self.completions.lock().take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("DummyQueue: completion worker panicked");
            }
        }
    }
}

/// Placeholder for a buffer or texture allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DummyAllocation {
    pub id: u64,
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(latency: Duration) -> Arc<DummyDevice> {
        DummyDevice::new(DummyConfig {
            completion_latency: latency,
            fail_submission_at: None,
        })
    }

    #[test]
    fn test_fence_wait_times_out() {
        let device = device(Duration::ZERO);
        let fence = device.create_fence(false);
        assert!(!fence.wait(Some(Duration::from_millis(5))));
        fence.signal();
        assert!(fence.wait(Some(Duration::from_millis(5))));
    }

    #[test]
    fn test_fence_signaled_from_other_thread() {
        let device = device(Duration::ZERO);
        let fence = device.create_fence(false);
        let signaller = Arc::clone(&fence);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signaller.signal();
        });
        assert!(fence.wait(None));
        handle.join().unwrap();
    }

    fn entry<'a>(
        cmd: &'a DummyCommandBuffer,
        waits: &[&'a Arc<DummySemaphore>],
        signals: &[&'a Arc<DummySemaphore>],
    ) -> DummySubmission<'a> {
        DummySubmission {
            command_buffer: cmd,
            wait_semaphores: waits.iter().map(|&s| &**s).collect(),
            signal_semaphores: signals.iter().map(|&s| &**s).collect(),
        }
    }

    #[test]
    fn test_wait_requires_pending_signal() {
        let device = device(Duration::ZERO);
        let queue = DummyDevice::create_queue(&device).unwrap();
        let pool = device.create_command_pool();
        let cmd = pool.allocate();
        let semaphore = device.create_semaphore();

        let err = queue.submit(&[entry(&cmd, &[&semaphore], &[])], None).unwrap_err();
        assert!(matches!(err, GraphicsError::SubmissionFailed(_)));

        queue.submit(&[entry(&cmd, &[], &[&semaphore])], None).unwrap();
        queue.submit(&[entry(&cmd, &[&semaphore], &[])], None).unwrap();
        assert!(!semaphore.is_pending());
    }

    #[test]
    fn test_signal_requires_no_pending_signal() {
        let device = device(Duration::ZERO);
        let queue = DummyDevice::create_queue(&device).unwrap();
        let cmd = device.create_command_pool().allocate();
        let semaphore = device.create_semaphore();

        queue.submit(&[entry(&cmd, &[], &[&semaphore])], None).unwrap();
        let err = queue.submit(&[entry(&cmd, &[], &[&semaphore])], None).unwrap_err();
        assert!(matches!(err, GraphicsError::SubmissionFailed(_)));
        assert!(semaphore.is_pending());
    }

    #[test]
    fn test_rejected_batch_changes_no_semaphore() {
        let device = device(Duration::ZERO);
        let queue = DummyDevice::create_queue(&device).unwrap();
        let pool = device.create_command_pool();
        let (a, b, c) = (pool.allocate(), pool.allocate(), pool.allocate());
        let first = device.create_semaphore();
        let second = device.create_semaphore();
        let never = device.create_semaphore();
        let fence = device.create_fence(false);

        let batch = [
            entry(&a, &[], &[&first]),
            entry(&b, &[&first], &[&second]),
            entry(&c, &[&second, &never], &[]),
        ];
        assert!(queue.submit(&batch, Some(Arc::clone(&fence))).is_err());
        assert!(!first.is_pending());
        assert!(!second.is_pending());
        assert!(!fence.is_signaled());

        // Later entries may consume signals of earlier ones.
        queue.submit(&batch[..2], Some(Arc::clone(&fence))).unwrap();
        assert!(!first.is_pending());
        assert!(second.is_pending());
        assert!(fence.is_signaled());
    }

    #[test]
    fn test_delayed_completion_and_wait_idle() {
        let device = device(Duration::from_millis(20));
        let queue = DummyDevice::create_queue(&device).unwrap();
        let cmd = device.create_command_pool().allocate();
        let fence = device.create_fence(false);

        queue.submit(&[entry(&cmd, &[], &[])], Some(Arc::clone(&fence))).unwrap();
        assert!(!fence.is_signaled());
        device.wait_idle();
        assert!(fence.is_signaled());
    }

    #[test]
    fn test_fences_signal_in_submission_order() {
        let device = device(Duration::from_millis(5));
        let queue = DummyDevice::create_queue(&device).unwrap();
        let cmd = device.create_command_pool().allocate();
        let fences: Vec<_> = (0..8).map(|_| device.create_fence(false)).collect();

        for fence in &fences {
            queue.submit(&[entry(&cmd, &[], &[])], Some(Arc::clone(fence))).unwrap();
        }
        // Once a fence is signaled, every earlier one already is.
        for (index, fence) in fences.iter().enumerate().rev() {
            assert!(fence.wait(Some(Duration::from_secs(5))));
            if index > 0 {
                assert!(fences[index - 1].is_signaled());
            }
        }
        drop(queue);
        device.wait_idle();
    }

    #[test]
    fn test_injected_submission_failure() {
        let device = DummyDevice::new(DummyConfig {
            completion_latency: Duration::ZERO,
            fail_submission_at: Some(1),
        });
        let queue = DummyDevice::create_queue(&device).unwrap();
        let cmd = device.create_command_pool().allocate();

        assert!(queue.submit(&[entry(&cmd, &[], &[])], None).is_ok());
        assert!(queue.submit(&[entry(&cmd, &[], &[])], None).is_err());
        assert!(queue.submit(&[entry(&cmd, &[], &[])], None).is_ok());

        // Every entry of a batch counts; one bad entry rejects the batch.
        let device = DummyDevice::new(DummyConfig {
            completion_latency: Duration::ZERO,
            fail_submission_at: Some(2),
        });
        let queue = DummyDevice::create_queue(&device).unwrap();
        let batch = [entry(&cmd, &[], &[]), entry(&cmd, &[], &[])];
        assert!(queue.submit(&batch, None).is_ok());
        assert!(queue.submit(&batch, None).is_err());
    }
}
