/*!
Snapshot queries.

A query is an immutable predicate tree built from small constructor functions and
combined with `and`, `or` and `not` (or the `&`, `|` and `!` operators). Trees are plain
values: they can be cloned, stored and reused, and are interpreted by the
[`QueryEngine`].

```rust
use strata_core::query::{mediapackage_id, owner, version, OrderBy, SelectQuery};

let latest_of_mp = mediapackage_id("mp-1") & version().is_latest();
let older_by_someone_else = mediapackage_id("mp-1") & !owner("archiver") & version().lt(5);

let query = SelectQuery::new(older_by_someone_else)
    .order_by(OrderBy::Version.desc())
    .limit(10);
# let _ = (latest_of_mp, query);
```
*/

pub mod eval;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::{BitAnd, BitOr, Not};

use crate::model::{Snapshot, Version};
use crate::{Result, StrataError};

pub use eval::QueryEngine;

/// Comparison against the snapshot version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VersionPredicate {
    Eq(Version),
    Lt(Version),
    Gt(Version),
    /// Highest existing version of the row's media package
    Latest,
}

/// Boolean expression over snapshot rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Predicate {
    Always,
    MediaPackageId(String),
    MediaPackageIdIn(Vec<String>),
    Version(VersionPredicate),
    Owner(String),
    CreatedBefore(DateTime<Utc>),
    CreatedAfter(DateTime<Utc>),
    StorageTier(String),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Predicate {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }

    /// Whether evaluation needs the per media package maximum versions
    pub fn mentions_latest(&self) -> bool {
        match self {
            Predicate::Version(VersionPredicate::Latest) => true,
            Predicate::And(a, b) | Predicate::Or(a, b) => a.mentions_latest() || b.mentions_latest(),
            Predicate::Not(inner) => inner.mentions_latest(),
            _ => false,
        }
    }

    /// Reject trees that can never be meaningful
    pub fn validate(&self) -> Result<()> {
        match self {
            Predicate::MediaPackageIdIn(ids) if ids.is_empty() => Err(StrataError::validation(
                "media package id set must not be empty",
            )),
            Predicate::And(a, b) | Predicate::Or(a, b) => {
                a.validate()?;
                b.validate()
            }
            Predicate::Not(inner) => inner.validate(),
            _ => Ok(()),
        }
    }

    /// Evaluate against one row; `latest` holds the maximum version per media package
    pub(crate) fn matches(&self, snapshot: &Snapshot, latest: &HashMap<String, Version>) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::MediaPackageId(id) => snapshot.media_package_id == *id,
            Predicate::MediaPackageIdIn(ids) => ids.iter().any(|id| *id == snapshot.media_package_id),
            Predicate::Version(VersionPredicate::Eq(v)) => snapshot.version == *v,
            Predicate::Version(VersionPredicate::Lt(v)) => snapshot.version < *v,
            Predicate::Version(VersionPredicate::Gt(v)) => snapshot.version > *v,
            Predicate::Version(VersionPredicate::Latest) => {
                latest.get(&snapshot.media_package_id) == Some(&snapshot.version)
            }
            Predicate::Owner(owner) => snapshot.owner == *owner,
            Predicate::CreatedBefore(t) => snapshot.created_at < *t,
            Predicate::CreatedAfter(t) => snapshot.created_at > *t,
            Predicate::StorageTier(tier) => snapshot.storage_tier == *tier,
            Predicate::And(a, b) => a.matches(snapshot, latest) && b.matches(snapshot, latest),
            Predicate::Or(a, b) => a.matches(snapshot, latest) || b.matches(snapshot, latest),
            Predicate::Not(inner) => !inner.matches(snapshot, latest),
        }
    }
}

impl Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}

impl BitAnd for Predicate {
    type Output = Predicate;

    fn bitand(self, rhs: Predicate) -> Predicate {
        self.and(rhs)
    }
}

impl BitOr for Predicate {
    type Output = Predicate;

    fn bitor(self, rhs: Predicate) -> Predicate {
        self.or(rhs)
    }
}

/// Matches every row
pub fn always() -> Predicate {
    Predicate::Always
}

pub fn mediapackage_id<S: Into<String>>(id: S) -> Predicate {
    Predicate::MediaPackageId(id.into())
}

pub fn mediapackage_ids<I, S>(ids: I) -> Predicate
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Predicate::MediaPackageIdIn(ids.into_iter().map(Into::into).collect())
}

pub fn owner<S: Into<String>>(owner: S) -> Predicate {
    Predicate::Owner(owner.into())
}

pub fn created_before(t: DateTime<Utc>) -> Predicate {
    Predicate::CreatedBefore(t)
}

pub fn created_after(t: DateTime<Utc>) -> Predicate {
    Predicate::CreatedAfter(t)
}

pub fn storage_tier<S: Into<String>>(tier: S) -> Predicate {
    Predicate::StorageTier(tier.into())
}

/// Entry point for version comparisons: `version().eq(3)`, `version().is_latest()`
pub fn version() -> VersionField {
    VersionField
}

#[derive(Debug, Clone, Copy)]
pub struct VersionField;

impl VersionField {
    #[allow(clippy::should_implement_trait)]
    pub fn eq<V: Into<Version>>(self, v: V) -> Predicate {
        Predicate::Version(VersionPredicate::Eq(v.into()))
    }

    pub fn lt<V: Into<Version>>(self, v: V) -> Predicate {
        Predicate::Version(VersionPredicate::Lt(v.into()))
    }

    pub fn gt<V: Into<Version>>(self, v: V) -> Predicate {
        Predicate::Version(VersionPredicate::Gt(v.into()))
    }

    pub fn is_latest(self) -> Predicate {
        Predicate::Version(VersionPredicate::Latest)
    }
}

/// Sortable snapshot fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderBy {
    MediaPackageId,
    Version,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Asc,
    Desc,
}

/// One sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortKey {
    pub field: OrderBy,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(self) -> SortKey {
        SortKey {
            field: self,
            direction: Direction::Asc,
        }
    }

    pub fn desc(self) -> SortKey {
        SortKey {
            field: self,
            direction: Direction::Desc,
        }
    }
}

impl SortKey {
    fn compare(&self, a: &Snapshot, b: &Snapshot) -> Ordering {
        let ord = match self.field {
            OrderBy::MediaPackageId => a.media_package_id.cmp(&b.media_package_id),
            OrderBy::Version => a.version.cmp(&b.version),
            OrderBy::CreatedAt => a.created_at.cmp(&b.created_at),
        };
        match self.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        }
    }
}

/// Select rows matching a predicate
///
/// Without explicit ordering, rows come back in key order (media package id, then
/// version). There is no implicit limit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectQuery {
    pub filter: Predicate,
    pub order: Vec<SortKey>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl SelectQuery {
    pub fn new(filter: Predicate) -> Self {
        Self {
            filter,
            order: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    /// Add a sort key; earlier keys take precedence
    pub fn order_by(mut self, ordering: SortKey) -> Self {
        self.order.push(ordering);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == Some(0) {
            return Err(StrataError::validation("query limit must be positive"));
        }
        self.filter.validate()
    }

    pub(crate) fn compare(&self, a: &Snapshot, b: &Snapshot) -> Ordering {
        self.order
            .iter()
            .map(|o| o.compare(a, b))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| a.key().cmp(&b.key()))
    }
}

/// Delete the rows of one owner that match a predicate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteQuery {
    pub owner: String,
    pub filter: Predicate,
}

impl DeleteQuery {
    pub fn new<S: Into<String>>(owner: S, filter: Predicate) -> Self {
        Self {
            owner: owner.into(),
            filter,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.filter.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaPackage;

    fn row(id: &str, v: u64, owner: &str) -> Snapshot {
        Snapshot::new(MediaPackage::new(id), Version(v), owner, "org", "hot")
    }

    #[test]
    fn test_operators_build_the_same_tree_as_methods() {
        let a = mediapackage_id("mp-1") & !owner("x") | version().gt(2);
        let b = mediapackage_id("mp-1")
            .and(owner("x").not())
            .or(version().gt(2));
        assert_eq!(a, b);
    }

    #[test]
    fn test_mentions_latest() {
        assert!(!mediapackage_id("a").mentions_latest());
        assert!((mediapackage_id("a") & !version().is_latest()).mentions_latest());
    }

    #[test]
    fn test_validation() {
        assert!(SelectQuery::new(always()).limit(0).validate().is_err());
        let empty: Vec<String> = Vec::new();
        assert!(SelectQuery::new(owner("a") | mediapackage_ids(empty))
            .validate()
            .is_err());
        assert!(SelectQuery::new(mediapackage_ids(["a", "b"])).limit(3).validate().is_ok());
    }

    #[test]
    fn test_matches_without_latest() {
        let latest = HashMap::new();
        let snapshot = row("mp-1", 3, "alice");

        assert!((mediapackage_id("mp-1") & version().eq(3)).matches(&snapshot, &latest));
        assert!(version().lt(4).matches(&snapshot, &latest));
        assert!(!version().gt(3).matches(&snapshot, &latest));
        assert!(!owner("bob").matches(&snapshot, &latest));
        assert!(storage_tier("hot").matches(&snapshot, &latest));
        assert!(mediapackage_ids(["mp-0", "mp-1"]).matches(&snapshot, &latest));
    }

    #[test]
    fn test_ordering_falls_back_to_key() {
        let query = SelectQuery::new(always()).order_by(OrderBy::MediaPackageId.desc());
        let a = row("mp-1", 1, "x");
        let b = row("mp-1", 2, "x");
        let c = row("mp-2", 0, "x");
        assert_eq!(query.compare(&a, &b), Ordering::Less);
        assert_eq!(query.compare(&c, &a), Ordering::Less);
    }
}
