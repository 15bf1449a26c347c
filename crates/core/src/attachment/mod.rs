//! Attachment extraction, normalization and ordering.

pub mod category;
pub mod markup;
pub mod resolver;
pub mod source;
pub mod url;

pub use resolver::{AttachmentResolver, Resolution, SourceReport};
pub use source::{AttachmentSource, SourceKind};
