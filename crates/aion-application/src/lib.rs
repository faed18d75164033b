//! Application layer for Aion.
//!
//! The asynchronous components that keep client state in step with the
//! backend: the shared session store, the PTY event bridge, the render
//! reconciler, the workspace and usage orchestrators, and the session use
//! case.

mod deadline;
pub mod event_bridge;
pub mod render;
pub mod session_store;
pub mod session_usecase;
pub mod usage;
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_support;

pub use event_bridge::{EventBridge, Utf8StreamDecoder};
pub use render::{
    Geometry, RenderAccelerator, RenderBackendKind, RenderReconciler, RenderStats, RenderSurface,
};
pub use session_store::{SessionStore, StoreEvent};
pub use session_usecase::SessionUseCase;
pub use usage::UsageOrchestrator;
pub use workspace::WorkspaceOrchestrator;
