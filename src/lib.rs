//! Frame Graph - a render graph scheduler with CPU/GPU synchronization
//!
//! Passes declare the resources they read and write plus explicit ordering
//! dependencies. The graph compiles them into a deterministic execution order
//! and each frame records one command buffer per pass, chaining submissions
//! with semaphores and gating frame-slot reuse with fences.
//!
//! Two backends are available:
//! - **Dummy**: in-process simulation with configurable completion latency
//! - **Vulkan**: headless Vulkan device via ash (native only, `vulkan` feature)
//!
//! # Example
//!
//! ```
//! use frame_graph::{GraphicsContext, RenderGraph, RendererConfig, RecordedCommand};
//!
//! let context = GraphicsContext::new(RendererConfig::new()).unwrap();
//! let mut graph = RenderGraph::new(context);
//! graph
//!     .add_pass("shadow", &[], &["shadow_map"], |ctx| {
//!         ctx.record(RecordedCommand::Draw { vertex_count: 3, instance_count: 1 })?;
//!         Ok(())
//!     })
//!     .unwrap();
//! graph
//!     .add_pass("main", &["shadow_map"], &["color"], |_ctx| Ok(()))
//!     .unwrap();
//! graph.compile().unwrap();
//! graph.execute(&[]).unwrap();
//! graph.wait_all().unwrap();
//! ```

pub mod assets;
pub(crate) mod backend;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod handle;
pub mod layer;
pub mod render_graph;
pub mod resources;
pub mod sync;

pub use assets::{Asset, AssetHandle, AssetLoader, AssetRegistry, AssetType};
pub use command::{
    CommandBuffer, CommandBufferState, CommandPool, Queue, RecordedCommand, Submission,
};
pub use config::{BackendType, DummyConfig, RendererConfig};
pub use context::GraphicsContext;
pub use error::{
    AssetLoadError, CommandError, CompileError, ConfigError, GraphicsError, GraphicsResult,
};
pub use handle::ResourceHandle;
pub use layer::{Layer, LayerStack};
pub use render_graph::{
    ExecuteStatus, Pass, PassContext, PassSetupContext, PassStats, RenderCommand, RenderGraph,
    RenderPass,
};
pub use resources::{
    Buffer, BufferDescriptor, BufferUsage, GraphResource, ResourceId, ResourceRegistry, Texture,
    TextureDescriptor, TextureFormat, TextureUsage, WeakResource,
};
pub use sync::{Fence, FenceStatus, Semaphore};
