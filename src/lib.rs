// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod metrics;
pub mod preview;
pub mod registration;
pub mod resolver;
pub mod scanner;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::preview::{ArtifactStatus, PreviewDescriptor, PreviewService};
pub use crate::registration::{preload, HostApp};
pub use crate::resolver::{ProjectResolver, ResolveError};
pub use crate::scanner::{scan, ArtifactFilter, ArtifactReference, ExtensionFilter};
