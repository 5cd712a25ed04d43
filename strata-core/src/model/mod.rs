//! Data model: media package documents, snapshots, properties and checksums.

pub mod checksum;
pub mod document;
pub mod property;
pub mod snapshot;

pub use checksum::{compute_checksum, verify_checksum};
pub use document::{
    flavor_matches, Element, ElementFilter, ElementKind, ElementReference, MediaPackage,
    ReferenceTarget,
};
pub use property::{Property, PropertyId, PropertyValue};
pub use snapshot::{Snapshot, SnapshotKey, Version, DEFAULT_OWNER};
