//! Read access to sequence files held in object storage.

pub mod object_store;
pub mod source;

pub use self::object_store::{ObjectStorageConfig, ObjectStoreSource};
pub use source::SourceStore;
