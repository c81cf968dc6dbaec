//! Error types.
//!
//! Errors are split by how the caller is expected to react:
//!
//! - [`ConfigError`]: a declaration was rejected; prior state is retained.
//! - [`CompileError`]: the graph could not be compiled and stays invalid.
//! - [`CommandError`]: a command buffer or pool was used in the wrong state.
//! - [`GraphicsError`]: a backend object could not be created or work could not
//!   be submitted. The current frame should be dropped.
//! - [`AssetLoadError`]: a loader could not produce a resource.

use thiserror::Error;

use crate::command::CommandBufferState;

/// A rejected graph declaration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("resource already exists: {0}")]
    DuplicateResource(String),
    #[error("pass already exists: {0}")]
    DuplicatePass(String),
    #[error("dependency already added to pass: {pass}, dependency: {dependency}")]
    DuplicateDependency { pass: String, dependency: String },
    #[error("pass cannot depend on itself: {0}")]
    SelfDependency(String),
    #[error("unknown pass: {0}")]
    UnknownPass(String),
}

/// Failure to compile a render graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("cycle detected: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },
    #[error("pass '{pass}' reads missing resource '{resource}'")]
    MissingResource { pass: String, resource: String },
    #[error("pass '{pass}' depends on unknown pass '{dependency}'")]
    UnknownDependency { pass: String, dependency: String },
    #[error(transparent)]
    Gpu(#[from] GraphicsError),
}

/// Command buffer and pool usage errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command buffer is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: CommandBufferState,
        actual: CommandBufferState,
    },
    #[error("command pool reset while {0} submission(s) are still executing")]
    PoolBusy(usize),
    #[error("command buffer belongs to a different backend or device")]
    ForeignObject,
}

/// GPU resource errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    #[error("no graphics backend is active")]
    NoBackend,
    #[error("backend not available: {0}")]
    BackendUnavailable(String),
    #[error("failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("failed to create resource: {0}")]
    ResourceCreationFailed(String),
    #[error("queue submission failed: {0}")]
    SubmissionFailed(String),
    #[error("fence wait failed: {0}")]
    FenceWaitFailed(String),
    #[error("timed out waiting for the GPU")]
    Timeout,
    #[error("device lost")]
    DeviceLost,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Failure reported by an asset loader.
#[derive(Error, Debug)]
pub enum AssetLoadError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode asset: {0}")]
    Decode(String),
    #[error("unsupported asset: {0}")]
    Unsupported(String),
}

pub type GraphicsResult<T> = Result<T, GraphicsError>;
