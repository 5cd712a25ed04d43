/*!
# Strata Core Engine

Versioned snapshot store for media packages with tiered payload storage.

Every snapshot preserves the full document of a media package under a per package
version number. Element payloads live in a named storage tier and can be migrated
between tiers by background jobs without changing what readers see.

- Snapshots with monotonically assigned versions, scoped per organization
- Composable predicate queries with ordering and pagination
- Owner-scoped deletion, optionally keeping the latest version
- Typed per media package properties that live as long as its snapshots
- Tier migration by version or creation date, as verified copy, optimistic row update,
  then source cleanup
- Local filesystem, in-memory and S3 tiers behind one [`PayloadStore`] port

## Architecture

The [`AssetManager`] facade sits on top of a small set of ports: the
[`SnapshotRepository`] for rows, [`PayloadStore`] for tiers, [`Workspace`] for element
content and [`JobDispatcher`] for background work. Adapters for each live next to
their port.

## Usage

```rust,no_run
use std::sync::Arc;
use strata_core::query::{owner, version};
use strata_core::{AssetManager, Element, ElementKind, MediaPackage, MemoryStorage, TierRegistry};

# async fn run() -> strata_core::Result<()> {
let tiers = TierRegistry::new("hot", Arc::new(MemoryStorage::new()))
    .with_tier("cold", Arc::new(MemoryStorage::new()));
let manager = AssetManager::builder(tiers).build()?;

let document = MediaPackage::new("mp-1")
    .with_element(Element::new("t1", ElementKind::Track, "presenter/source", "recordings/t1.mp4"));
let snapshot = manager.take_snapshot("alice", document)?;

let mine = manager.select_where(owner("alice") & version().is_latest())?;
assert_eq!(mine[0].version, snapshot.version);

let report = manager.migrate_and_wait("mp-1", None, "cold").await?;
assert!(report.all_succeeded());
# Ok(())
# }
```
*/

pub mod compression;
pub mod config;
pub mod error;
pub mod jobs;
pub mod manager;
pub mod migration;
pub mod model;
pub mod observability;
pub mod query;
pub mod repository;
pub mod security;
pub mod storage;
pub mod workspace;

pub use compression::{Compressor, GzipCompressor};
pub use config::{StrataConfig, TierBackend, TierConfig};
pub use error::{Result, StrataError};
pub use jobs::{DispatchStatus, InProcessDispatcher, JobDescriptor, JobDispatcher, JobId, JobService};
pub use manager::{create_manager_from_config, AssetManager, AssetManagerBuilder, VersionSelector};
pub use migration::{JobHandle, MigrationCoordinator, MigrationReport, SubJobStatus};
pub use model::{
    Element, ElementFilter, ElementKind, ElementReference, MediaPackage, Property, PropertyId,
    PropertyValue, ReferenceTarget, Snapshot, SnapshotKey, Version, DEFAULT_OWNER,
};
pub use query::{Predicate, QueryEngine, SelectQuery};
pub use repository::{ChangeEvent, ChangeListener, MemorySnapshotRepository, SnapshotRepository};
pub use security::{SecurityContext, StaticSecurityContext};
pub use storage::{LocalFileStorage, MemoryStorage, PayloadStore, StoragePath, TierRegistry};
#[cfg(feature = "s3")]
pub use storage::S3PayloadStore;
pub use workspace::{FileWorkspace, MemoryWorkspace, Workspace};
