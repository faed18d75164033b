//! Infrastructure layer for Aion: the in-process push bus, configuration
//! loading, platform paths and logging.

pub mod config_service;
pub mod event_hub;
pub mod logging;
pub mod paths;
pub mod tracing_layer;

pub use config_service::ConfigService;
pub use event_hub::EventHub;
pub use logging::init_tracing;
pub use paths::AionPaths;
pub use tracing_layer::{DiagnosticEvent, DiagnosticsLayer};
