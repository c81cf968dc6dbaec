//! Render graph definition, compilation and execution.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use crate::command::{Queue, RecordedCommand, Submission};
use crate::context::GraphicsContext;
use crate::error::{CompileError, ConfigError, GraphicsError, GraphicsResult};
use crate::resources::{GraphResource, ResourceId, ResourceRegistry};
use crate::sync::Semaphore;

use super::frame::FrameSlot;
use super::pass::{Pass, PassContext, PassSetupContext};
use super::{ExecuteStatus, PassStats, RenderCommand};

/// Callback run at the start of every executed frame with the frame slot index.
type PreExecuteHook = Box<dyn FnMut(usize) + Send>;

/// The main render graph structure.
///
/// Declarations (`add_*`) invalidate the graph; [`RenderGraph::compile`] must
/// succeed before [`RenderGraph::execute`] does any work. `compile` and
/// `execute` must not run concurrently on one graph.
pub struct RenderGraph {
    context: Arc<GraphicsContext>,
    registry: ResourceRegistry,
    /// Declaration order is the topological tie-break.
    passes: Vec<Pass>,
    pass_index: HashMap<String, usize>,
    /// Indices into `passes`, in execution order.
    compiled: Vec<usize>,
    compiled_names: Vec<String>,
    valid: bool,
    queue: Option<Queue>,
    frames: Vec<FrameSlot>,
    frame_index: usize,
    frame_number: u64,
    commands: Vec<RenderCommand>,
    stats: Vec<PassStats>,
    extent: (u32, u32),
    pending_resize: Option<(u32, u32)>,
    pre_execute: Option<PreExecuteHook>,
}

impl RenderGraph {
    pub fn new(context: Arc<GraphicsContext>) -> Self {
        let extent = (context.config().width, context.config().height);
        Self {
            context,
            registry: ResourceRegistry::new(),
            passes: Vec::new(),
            pass_index: HashMap::new(),
            compiled: Vec::new(),
            compiled_names: Vec::new(),
            valid: false,
            queue: None,
            frames: Vec::new(),
            frame_index: 0,
            frame_number: 0,
            commands: Vec::new(),
            stats: Vec::new(),
            extent,
            pending_resize: None,
            pre_execute: None,
        }
    }

    pub fn context(&self) -> &Arc<GraphicsContext> {
        &self.context
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    /// Register a resource under a unique name.
    ///
    /// A duplicate name is rejected and logged; the existing resource stays.
    pub fn add_resource(
        &mut self,
        name: &str,
        resource: impl Into<GraphResource>,
    ) -> Result<ResourceId, ConfigError> {
        match self.registry.insert(name, resource) {
            Ok(id) => {
                self.invalidate();
                Ok(id)
            }
            Err(e) => {
                log::warn!("Resource already exists: {}", name);
                Err(e)
            }
        }
    }

    /// Register a pass built from a recording closure.
    ///
    /// A duplicate name is rejected and logged; the existing pass stays.
    pub fn add_pass<F>(
        &mut self,
        name: &str,
        inputs: &[&str],
        outputs: &[&str],
        record: F,
    ) -> Result<(), ConfigError>
    where
        F: FnMut(&mut PassContext<'_>) -> GraphicsResult<()> + Send + 'static,
    {
        let pass = Pass::from_fn(name, record)
            .reads(inputs.iter().copied())
            .writes(outputs.iter().copied());
        self.add_render_pass(pass)
    }

    /// Register a fully declared pass.
    pub fn add_render_pass(&mut self, pass: Pass) -> Result<(), ConfigError> {
        if self.pass_index.contains_key(pass.name()) {
            log::warn!("Pass already exists: {}", pass.name());
            return Err(ConfigError::DuplicatePass(pass.name().to_string()));
        }
        self.pass_index
            .insert(pass.name().to_string(), self.passes.len());
        self.passes.push(pass);
        self.invalidate();
        Ok(())
    }

    /// Require `dependency` to run before `pass`.
    ///
    /// `dependency` may be declared later; unknown names fail at compile time.
    pub fn add_dependency(&mut self, pass: &str, dependency: &str) -> Result<(), ConfigError> {
        let Some(&index) = self.pass_index.get(pass) else {
            log::warn!("Cannot add dependency to unknown pass: {}", pass);
            return Err(ConfigError::UnknownPass(pass.to_string()));
        };
        self.passes[index].add_dependency(dependency)?;
        self.invalidate();
        Ok(())
    }

    fn invalidate(&mut self) {
        if self.valid {
            log::debug!("Render graph topology changed; recompilation required");
        }
        self.valid = false;
        self.compiled.clear();
        self.compiled_names.clear();
    }

    // ------------------------------------------------------------------
    // Compilation
    // ------------------------------------------------------------------

    /// Order the passes and allocate per-frame command buffers, fences and
    /// semaphores.
    ///
    /// On failure the graph stays invalid and `execute` is a no-op.
    pub fn compile(&mut self) -> Result<(), CompileError> {
        self.invalidate();
        match self.try_compile() {
            Ok(()) => {
                self.valid = true;
                log::debug!(
                    "Render graph compiled: {} pass(es), order [{}]",
                    self.compiled_names.len(),
                    self.compiled_names.join(", ")
                );
                Ok(())
            }
            Err(e) => {
                log::error!("Render graph compilation failed: {}", e);
                Err(e)
            }
        }
    }

    fn try_compile(&mut self) -> Result<(), CompileError> {
        // Setup hooks may replace resources and old frame objects are dropped
        // below, so in-flight work must finish first.
        self.wait_all()?;
        self.run_setup_hooks()?;
        let order = self.sort()?;

        self.frames.clear();
        let queue = match self.queue.take() {
            Some(queue) => queue,
            None => self.context.queue()?,
        };
        self.queue = Some(queue);
        for _ in 0..self.context.frames_in_flight() {
            self.frames.push(FrameSlot::new(&self.context, order.len())?);
        }
        self.frame_index = 0;

        self.compiled_names = order
            .iter()
            .map(|&index| self.passes[index].name().to_string())
            .collect();
        self.compiled = order;
        Ok(())
    }

    fn run_setup_hooks(&mut self) -> GraphicsResult<()> {
        let (width, height) = self.extent;
        for pass in self.passes.iter_mut().filter(|pass| !pass.set_up) {
            let mut ctx = PassSetupContext {
                registry: &mut self.registry,
                graphics: &self.context,
                width,
                height,
            };
            pass.node.setup(&mut ctx)?;
            pass.set_up = true;
        }
        Ok(())
    }

    /// Kahn's algorithm. Ready passes are taken in declaration order.
    fn sort(&self) -> Result<Vec<usize>, CompileError> {
        let count = self.passes.len();

        let mut producers: HashMap<&str, Vec<usize>> = HashMap::new();
        for (index, pass) in self.passes.iter().enumerate() {
            for output in pass.outputs() {
                producers.entry(output.as_str()).or_default().push(index);
            }
        }

        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
        let mut predecessors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
        let mut add_edge = |from: usize, to: usize| {
            if from != to {
                successors[from].insert(to);
                predecessors[to].insert(from);
            }
        };

        for (index, pass) in self.passes.iter().enumerate() {
            for input in pass.inputs() {
                let upstream: Vec<usize> = producers
                    .get(input.as_str())
                    .map(|list| list.iter().copied().filter(|&p| p != index).collect())
                    .unwrap_or_default();
                if upstream.is_empty() && !self.registry.contains(input) {
                    return Err(CompileError::MissingResource {
                        pass: pass.name().to_string(),
                        resource: input.clone(),
                    });
                }
                for producer in upstream {
                    add_edge(producer, index);
                }
            }
            for dependency in pass.dependencies() {
                let Some(&producer) = self.pass_index.get(dependency) else {
                    return Err(CompileError::UnknownDependency {
                        pass: pass.name().to_string(),
                        dependency: dependency.clone(),
                    });
                };
                add_edge(producer, index);
            }
        }

        let mut in_degree: Vec<usize> = predecessors.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(index) = ready.pop_first() {
            order.push(index);
            for &next in &successors[index] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() < count {
            return Err(CompileError::Cycle {
                cycle: self.find_cycle(&predecessors, &in_degree),
            });
        }
        Ok(order)
    }

    /// Name a cycle among the passes Kahn's algorithm could not order.
    ///
    /// Every such pass still has an unordered predecessor, so walking
    /// predecessors must revisit a pass.
    fn find_cycle(&self, predecessors: &[BTreeSet<usize>], in_degree: &[usize]) -> Vec<String> {
        let blocked = |index: usize| in_degree[index] > 0;
        let Some(start) = (0..in_degree.len()).find(|&i| blocked(i)) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
        let mut current = start;
        let cycle_start = loop {
            let Some(&previous) = predecessors[current].iter().find(|&&p| blocked(p)) else {
                return Vec::new();
            };
            if let Some(&at) = position.get(&previous) {
                break at;
            }
            position.insert(previous, path.len());
            path.push(previous);
            current = previous;
        };

        // `path` follows edges backwards.
        let mut cycle: Vec<usize> = path[cycle_start..].iter().rev().copied().collect();
        if let Some(lowest) = (0..cycle.len()).min_by_key(|&i| cycle[i]) {
            cycle.rotate_left(lowest);
        }
        if let Some(&first) = cycle.first() {
            cycle.push(first);
        }
        cycle
            .into_iter()
            .map(|index| self.passes[index].name().to_string())
            .collect()
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Queue a render command for every pass of the next executed frame.
    pub fn push_command(&mut self, command: RenderCommand) {
        self.commands.push(command);
    }

    /// Install a callback run by every `execute` once the frame slot is free
    /// and before any pass records. It receives the frame slot index.
    pub fn set_pre_execute<F>(&mut self, hook: F)
    where
        F: FnMut(usize) + Send + 'static,
    {
        self.pre_execute = Some(Box::new(hook));
    }

    /// Request a viewport resize, applied at the start of the next `execute`.
    ///
    /// Zero-sized requests (e.g. a minimized window) are ignored.
    pub fn request_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            log::debug!("Ignoring zero-sized resize request {}x{}", width, height);
            return;
        }
        self.pending_resize = Some((width, height));
    }

    /// Record and submit every pass of the current frame slot.
    ///
    /// The first pass waits on `wait_semaphores`; each later pass waits on its
    /// predecessor's semaphore. Returns [`ExecuteStatus::Skipped`] (and logs a
    /// warning) if the graph is not compiled.
    ///
    /// All passes are recorded first and then handed to the queue as one batch,
    /// so a frame is either submitted whole or not at all.
    pub fn execute(&mut self, wait_semaphores: &[&Semaphore]) -> GraphicsResult<ExecuteStatus> {
        let commands = std::mem::take(&mut self.commands);

        if !self.valid {
            log::warn!("Render graph is not compiled; skipping execution");
            return Ok(ExecuteStatus::Skipped);
        }

        let timeout = self.context.config().fence_timeout;
        self.frames[self.frame_index].wait(timeout)?;

        if let Some((width, height)) = self.pending_resize.take() {
            self.apply_resize(width, height)?;
        }
        if let Some(hook) = self.pre_execute.as_mut() {
            hook(self.frame_index);
        }

        if let Err(e) = self.record_frame(&commands) {
            log::error!("Recording failed, dropping frame {}: {}", self.frame_number, e);
            return Err(e);
        }
        self.submit_frame(wait_semaphores)?;

        log::trace!(
            "Frame {} submitted ({} pass(es), slot {})",
            self.frame_number,
            self.compiled.len(),
            self.frame_index
        );
        Ok(ExecuteStatus::Submitted {
            passes: self.compiled.len(),
        })
    }

    fn record_frame(&mut self, commands: &[RenderCommand]) -> GraphicsResult<()> {
        let Self {
            passes,
            compiled,
            frames,
            registry,
            stats,
            frame_index,
            frame_number,
            ..
        } = self;
        let slot = &mut frames[*frame_index];
        slot.pool.reset()?;
        stats.clear();

        for (&pass_index, sync) in compiled.iter().zip(slot.passes.iter_mut()) {
            let pass = &mut passes[pass_index];
            let name = pass.name().to_string();
            let started = Instant::now();

            sync.command_buffer.begin()?;
            for input in pass.inputs() {
                sync.command_buffer.record(RecordedCommand::Barrier {
                    resource: input.clone(),
                })?;
            }
            let mut ctx = PassContext {
                command_buffer: &mut sync.command_buffer,
                commands,
                registry: &*registry,
                pass_name: &name,
                frame_index: *frame_index,
                frame_number: *frame_number,
            };
            pass.node.record(&mut ctx)?;
            sync.command_buffer.end()?;

            stats.push(PassStats {
                name,
                cpu_time: started.elapsed(),
                commands: sync.command_buffer.command_count(),
            });
        }
        Ok(())
    }

    fn submit_frame(&mut self, wait_semaphores: &[&Semaphore]) -> GraphicsResult<()> {
        let queue = self.queue.as_ref().ok_or(GraphicsError::NoBackend)?;
        let current = self.frame_index;

        // Completion signals this frame waits on, by slot.
        let consumed: Vec<usize> = self
            .frames
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.completion_pending
                    && slot
                        .last_semaphore()
                        .is_some_and(|done| wait_semaphores.iter().any(|&w| w == done))
            })
            .map(|(index, _)| index)
            .collect();

        let submitted = {
            let slot = &self.frames[current];
            let mut first_waits: Vec<&Semaphore> = wait_semaphores.to_vec();
            if slot.completion_pending && !consumed.contains(&current) {
                // A binary semaphore cannot be signaled twice; wait off the old signal.
                if let Some(stale) = slot.last_semaphore() {
                    log::debug!(
                        "Completion semaphore {} of slot {} was never waited on; consuming it",
                        stale.id(),
                        current
                    );
                    first_waits.push(stale);
                }
            }

            let batch: Vec<Submission<'_>> = slot
                .passes
                .iter()
                .enumerate()
                .map(|(position, sync)| {
                    let waits = match position.checked_sub(1) {
                        Some(previous) => vec![&slot.passes[previous].semaphore],
                        None => first_waits.clone(),
                    };
                    Submission::new(&sync.command_buffer)
                        .with_waits(waits)
                        .with_signals([&sync.semaphore])
                })
                .collect();

            slot.fence.reset()?;
            queue.submit_batch(&batch, Some(&slot.fence))
        };
        if let Err(e) = submitted {
            log::error!(
                "Submission of frame {} failed, dropping it: {}",
                self.frame_number,
                e
            );
            return Err(e);
        }

        for index in consumed {
            self.frames[index].completion_pending = false;
        }
        let slot = &mut self.frames[current];
        slot.armed = true;
        slot.completion_pending = !slot.passes.is_empty();
        Ok(())
    }

    fn apply_resize(&mut self, width: u32, height: u32) -> GraphicsResult<()> {
        self.wait_all()?;
        log::info!(
            "Resizing render graph from {}x{} to {}x{}",
            self.extent.0,
            self.extent.1,
            width,
            height
        );
        self.extent = (width, height);
        for &index in &self.compiled {
            let mut ctx = PassSetupContext {
                registry: &mut self.registry,
                graphics: &self.context,
                width,
                height,
            };
            self.passes[index].node.resize(&mut ctx)?;
        }
        Ok(())
    }

    /// Advance to the next frame slot.
    pub fn next_frame(&mut self) {
        self.frame_number += 1;
        if !self.frames.is_empty() {
            self.frame_index = (self.frame_index + 1) % self.frames.len();
        }
    }

    /// Block until the current frame slot's submitted work has completed.
    pub fn wait(&mut self) -> GraphicsResult<()> {
        let timeout = self.context.config().fence_timeout;
        match self.frames.get_mut(self.frame_index) {
            Some(slot) => slot.wait(timeout),
            None => Ok(()),
        }
    }

    /// Block until every frame slot's submitted work has completed.
    pub fn wait_all(&mut self) -> GraphicsResult<()> {
        let timeout = self.context.config().fence_timeout;
        for slot in &mut self.frames {
            slot.wait(timeout)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Semaphore signaled by the last pass of the current frame slot.
    ///
    /// Passing it to a later `execute` consumes the signal. A signal nobody
    /// waited on is consumed by the slot's next frame. A consumer outside the
    /// graph must use [`RenderGraph::take_completion_semaphore`] instead.
    pub fn completion_semaphore(&self) -> Option<&Semaphore> {
        if !self.valid {
            return None;
        }
        self.frames
            .get(self.frame_index)
            .and_then(FrameSlot::last_semaphore)
    }

    /// The current slot's completion semaphore for a consumer outside the
    /// graph, such as a presentation submission.
    ///
    /// The caller must wait on it exactly once; the graph no longer does.
    pub fn take_completion_semaphore(&mut self) -> Option<Semaphore> {
        if !self.valid {
            return None;
        }
        let slot = self.frames.get_mut(self.frame_index)?;
        slot.completion_pending = false;
        slot.last_semaphore().cloned()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Pass names in execution order. Empty unless compiled.
    pub fn compiled_order(&self) -> &[String] {
        &self.compiled_names
    }

    pub fn pass(&self, name: &str) -> Option<&Pass> {
        self.pass_index.get(name).map(|&index| &self.passes[index])
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Statistics of the last recorded frame, in execution order.
    pub fn stats(&self) -> &[PassStats] {
        &self.stats
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        if let Err(e) = self.wait_all() {
            log::error!("Failed to wait for in-flight frames on drop: {}", e);
        }
    }
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("passes", &self.passes)
            .field("compiled_order", &self.compiled_names)
            .field("valid", &self.valid)
            .field("frame_index", &self.frame_index)
            .field("pre_execute", &self.pre_execute.is_some())
            .finish_non_exhaustive()
    }
}
