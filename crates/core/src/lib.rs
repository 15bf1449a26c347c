//! HyDocPusher core library.
//!
//! This crate turns CMS publish events into archive submissions:
//! configuration, the source message model, channel classification with
//! hot reload, field mapping, attachment resolution, and the transform
//! coordinator that ties them together.

pub mod attachment;
pub mod classification;
pub mod config;
pub mod errors;
pub mod mapping;
pub mod message;
pub mod models;
pub mod transform;

// Re-exports for convenience.
pub use attachment::AttachmentResolver;
pub use classification::ClassificationResolver;
pub use config::AppConfig;
pub use mapping::FieldMapper;
pub use message::SourceMessage;
pub use models::ArchiveSubmission;
pub use transform::{TransformCoordinator, TransformStats};
