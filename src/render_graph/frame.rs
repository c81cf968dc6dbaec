//! Per-frame synchronization objects of a compiled graph.

use std::time::Duration;

use crate::command::{CommandBuffer, CommandPool};
use crate::context::GraphicsContext;
use crate::error::{GraphicsError, GraphicsResult};
use crate::sync::{Fence, Semaphore};

/// Objects owned by one pass in one frame slot.
pub(super) struct PassSync {
    pub command_buffer: CommandBuffer,
    /// Signaled when the pass completes. Waited on by the next pass, or by the
    /// frame's consumer for the last pass.
    pub semaphore: Semaphore,
}

/// One frame in flight: a command pool, one [`PassSync`] per compiled pass and
/// the fence of the frame's batched submission.
pub(super) struct FrameSlot {
    pub pool: CommandPool,
    pub passes: Vec<PassSync>,
    pub fence: Fence,
    /// Set once a submission carrying `fence` was accepted; cleared after the
    /// fence was waited on. An unarmed fence is never waited on.
    pub armed: bool,
    /// The last pass's semaphore holds a signal nothing has waited on yet.
    pub completion_pending: bool,
}

impl FrameSlot {
    pub fn new(context: &GraphicsContext, pass_count: usize) -> GraphicsResult<Self> {
        let mut pool = context.create_command_pool()?;
        let passes = (0..pass_count)
            .map(|_| -> GraphicsResult<PassSync> {
                Ok(PassSync {
                    command_buffer: pool.create_command_buffer()?,
                    semaphore: context.create_semaphore()?,
                })
            })
            .collect::<GraphicsResult<Vec<_>>>()?;
        Ok(Self {
            pool,
            passes,
            fence: context.create_fence(true)?,
            armed: false,
            completion_pending: false,
        })
    }

    /// Block until the slot's last accepted submission has completed.
    pub fn wait(&mut self, timeout: Option<Duration>) -> GraphicsResult<()> {
        if !self.armed {
            return Ok(());
        }
        match timeout {
            Some(timeout) => {
                if !self.fence.wait_timeout(timeout)? {
                    log::error!("Fence wait timed out after {:?}", timeout);
                    return Err(GraphicsError::Timeout);
                }
            }
            None => self.fence.wait()?,
        }
        self.armed = false;
        Ok(())
    }

    pub fn last_semaphore(&self) -> Option<&Semaphore> {
        self.passes.last().map(|sync| &sync.semaphore)
    }
}
