//! Narrow interfaces onto the services the campaign engine depends on but
//! does not own, with their production implementations.
//!
//! Each collaborator is placed in managed state as an `Arc<dyn Trait>`.

pub mod directory;
pub mod notifier;
pub mod storage;

#[cfg(test)]
pub mod fakes;

pub use directory::{MemberFilter, MembershipDirectory, MongoDirectory};
pub use notifier::{notify_in_background, Notifier, SnsNotifier, TemplateKind};
pub use storage::{DocumentMetadata, DocumentStorage, GridFsStorage};
