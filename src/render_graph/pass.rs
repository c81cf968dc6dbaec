//! Render pass definitions for the render graph.

use crate::command::{CommandBuffer, RecordedCommand};
use crate::context::GraphicsContext;
use crate::error::{CommandError, ConfigError, GraphicsResult};
use crate::resources::{
    BufferDescriptor, GraphResource, ResourceId, ResourceRegistry, TextureDescriptor,
};

use super::RenderCommand;

/// Context for the `setup` and `resize` hooks of a pass.
///
/// Both hooks run outside frame execution, after in-flight work referencing
/// the registry has completed.
pub struct PassSetupContext<'a> {
    pub(crate) registry: &'a mut ResourceRegistry,
    pub(crate) graphics: &'a GraphicsContext,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

impl<'a> PassSetupContext<'a> {
    pub fn registry(&self) -> &ResourceRegistry {
        &*self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ResourceRegistry {
        &mut *self.registry
    }

    pub fn graphics(&self) -> &GraphicsContext {
        self.graphics
    }

    /// Get the current viewport size.
    pub fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Create a texture and store it under `name`.
    ///
    /// An existing resource of that name is replaced and keeps its id.
    pub fn create_texture(
        &mut self,
        name: &str,
        descriptor: TextureDescriptor,
    ) -> GraphicsResult<ResourceId> {
        let texture = self.graphics.create_texture(&descriptor)?;
        Ok(self.store(name, texture.into()))
    }

    /// Create a buffer and store it under `name`.
    ///
    /// An existing resource of that name is replaced and keeps its id.
    pub fn create_buffer(
        &mut self,
        name: &str,
        descriptor: BufferDescriptor,
    ) -> GraphicsResult<ResourceId> {
        let buffer = self.graphics.create_buffer(&descriptor)?;
        Ok(self.store(name, buffer.into()))
    }

    fn store(&mut self, name: &str, resource: GraphResource) -> ResourceId {
        if self.registry.contains(name) {
            self.registry.replace(name, resource);
            log::debug!("Recreated resource '{}'", name);
            self.registry.id(name).unwrap_or_default()
        } else {
            // The name is free, so insertion cannot be rejected.
            self.registry.insert(name, resource).unwrap_or_default()
        }
    }
}

/// Context handed to a pass while its commands are recorded.
pub struct PassContext<'a> {
    pub(crate) command_buffer: &'a mut CommandBuffer,
    pub(crate) commands: &'a [RenderCommand],
    pub(crate) registry: &'a ResourceRegistry,
    pub(crate) pass_name: &'a str,
    pub(crate) frame_index: usize,
    pub(crate) frame_number: u64,
}

impl<'a> PassContext<'a> {
    /// Record a command into this pass's command buffer.
    pub fn record(&mut self, command: RecordedCommand) -> Result<(), CommandError> {
        self.command_buffer.record(command)
    }

    /// The active command buffer (already recording).
    pub fn command_buffer(&self) -> &CommandBuffer {
        &*self.command_buffer
    }

    /// Render commands pushed since the previous execution.
    pub fn commands(&self) -> &[RenderCommand] {
        self.commands
    }

    pub fn registry(&self) -> &ResourceRegistry {
        self.registry
    }

    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    /// Frame slot being recorded, in `0..frames_in_flight`.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Monotonic frame counter.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
}

/// Trait for render passes.
///
/// Closures `FnMut(&mut PassContext) -> GraphicsResult<()>` implement it with
/// no-op hooks.
pub trait RenderPass: Send {
    /// Record this pass's commands for one frame.
    fn record(&mut self, ctx: &mut PassContext<'_>) -> GraphicsResult<()>;

    /// Declare or acquire default resources. Runs once, on the first compile
    /// after the pass was added.
    fn setup(&mut self, _ctx: &mut PassSetupContext<'_>) -> GraphicsResult<()> {
        Ok(())
    }

    /// Recreate size-dependent resources for the new viewport size.
    fn resize(&mut self, _ctx: &mut PassSetupContext<'_>) -> GraphicsResult<()> {
        Ok(())
    }
}

impl<F> RenderPass for F
where
    F: FnMut(&mut PassContext<'_>) -> GraphicsResult<()> + Send,
{
    fn record(&mut self, ctx: &mut PassContext<'_>) -> GraphicsResult<()> {
        self(ctx)
    }
}

/// A named unit of GPU work with declared inputs, outputs and dependencies.
pub struct Pass {
    name: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    dependencies: Vec<String>,
    pub(crate) node: Box<dyn RenderPass>,
    pub(crate) set_up: bool,
}

impl Pass {
    pub fn new(name: impl Into<String>, node: impl RenderPass + 'static) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            dependencies: Vec::new(),
            node: Box::new(node),
            set_up: false,
        }
    }

    /// Build a pass from a recording closure.
    pub fn from_fn<F>(name: impl Into<String>, record: F) -> Self
    where
        F: FnMut(&mut PassContext<'_>) -> GraphicsResult<()> + Send + 'static,
    {
        Self::new(name, record)
    }

    /// Declare resources this pass reads.
    pub fn reads<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        extend_unique(&mut self.inputs, names);
        self
    }

    /// Declare resources this pass writes.
    pub fn writes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        extend_unique(&mut self.outputs, names);
        self
    }

    /// Require `dependency` to run before this pass.
    ///
    /// Duplicate and self dependencies are rejected; the existing list is kept.
    pub fn add_dependency(&mut self, dependency: impl Into<String>) -> Result<(), ConfigError> {
        let dependency = dependency.into();
        let result = if dependency == self.name {
            Err(ConfigError::SelfDependency(dependency))
        } else if self.dependencies.contains(&dependency) {
            Err(ConfigError::DuplicateDependency {
                pass: self.name.clone(),
                dependency,
            })
        } else {
            self.dependencies.push(dependency);
            Ok(())
        };
        if let Err(e) = &result {
            log::warn!("Rejected dependency: {}", e);
        }
        result
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn reads_resource(&self, name: &str) -> bool {
        self.inputs.iter().any(|input| input == name)
    }

    pub fn writes_resource(&self, name: &str) -> bool {
        self.outputs.iter().any(|output| output == name)
    }
}

impl std::fmt::Debug for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pass")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

fn extend_unique<I, S>(list: &mut Vec<String>, names: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    for name in names {
        let name = name.into();
        if !list.contains(&name) {
            list.push(name);
        }
    }
}
