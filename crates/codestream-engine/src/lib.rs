pub mod client;
pub mod config;
pub mod controller;
pub mod screenshot;
pub mod transport;

pub use client::{
    CancelHandle, CancelReason, CodegenClient, GenerationCallbacks, GenerationOutcome, Notice,
};
pub use config::EngineConfig;
pub use controller::{GenerationReport, GenerationRequest, ProjectController};
pub use screenshot::{ScreenshotClient, ScreenshotError};
pub use transport::{CodegenTransport, TransportEvent, WebSocketTransport};
