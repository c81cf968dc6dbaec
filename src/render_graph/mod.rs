//! Render graph system.
//!
//! A [`RenderGraph`] orders named passes by the resources they produce and
//! consume plus explicit dependencies, then records and submits one command
//! buffer per pass each frame. Consecutive passes are chained with semaphores
//! and every submission carries a fence, so a frame slot is only reused once
//! the GPU is done with it.
//!
//! ```ignore
//! let mut graph = RenderGraph::new(context);
//! graph.add_pass("gbuffer", &[], &["albedo"], |ctx| { /* record */ Ok(()) })?;
//! graph.add_pass("lighting", &["albedo"], &["hdr"], |ctx| { /* record */ Ok(()) })?;
//! graph.compile()?;
//!
//! loop {
//!     graph.execute(&[])?;
//!     graph.next_frame();
//! }
//! ```

mod frame;
mod graph;
mod pass;

use std::time::Duration;

use glam::Mat4;

use crate::assets::AssetHandle;

pub use graph::RenderGraph;
pub use pass::{Pass, PassContext, PassSetupContext, RenderPass};

/// A per-frame draw request visible to every pass.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    DrawMesh {
        mesh: AssetHandle,
        material: AssetHandle,
        transform: Mat4,
    },
    Marker(String),
}

/// Outcome of [`RenderGraph::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteStatus {
    /// The graph is not compiled; nothing was recorded or submitted.
    Skipped,
    /// Every pass was recorded and submitted.
    Submitted { passes: usize },
}

/// CPU-side statistics for one pass of the last executed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassStats {
    pub name: String,
    /// Time spent recording the pass, including its callback.
    pub cpu_time: Duration,
    /// Commands recorded into the pass's command buffer.
    pub commands: usize,
}
