/*!
Query evaluation against a snapshot repository.
*/

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{DeleteQuery, SelectQuery};
use crate::model::{Snapshot, Version};
use crate::repository::SnapshotRepository;
use crate::Result;

/// Interprets query trees over the rows visible to one organization
#[derive(Clone)]
pub struct QueryEngine {
    repository: Arc<dyn SnapshotRepository>,
}

impl QueryEngine {
    pub fn new(repository: Arc<dyn SnapshotRepository>) -> Self {
        Self { repository }
    }

    /// Rows matching `query`, ordered and paginated; no match is an empty vector
    ///
    /// Trees that mention `latest` are evaluated in two passes: first the maximum version
    /// of every media package is collected over all visible rows, then the filter runs.
    /// `latest` therefore means the latest existing version, not the latest among rows
    /// that survive the rest of the filter.
    pub fn select(&self, organization_id: &str, query: &SelectQuery) -> Result<Vec<Snapshot>> {
        query.validate()?;
        let rows = self.repository.scan(organization_id)?;

        let latest = if query.filter.mentions_latest() {
            latest_versions(&rows)
        } else {
            HashMap::new()
        };

        let mut matched: Vec<Snapshot> = rows
            .into_iter()
            .filter(|row| query.filter.matches(row, &latest))
            .collect();
        matched.sort_by(|a, b| query.compare(a, b));

        let page: Vec<Snapshot> = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        debug!(
            organization_id = %organization_id,
            results = page.len(),
            "Evaluated select query"
        );
        Ok(page)
    }

    /// Delete the matching rows of the query's owner and return them
    ///
    /// The returned rows are the ones the repository removed, not the candidates read
    /// before, so their storage tier is the one that held the payloads at removal time.
    pub fn delete_matching(&self, organization_id: &str, query: &DeleteQuery) -> Result<Vec<Snapshot>> {
        query.validate()?;
        let candidates = self.select(organization_id, &SelectQuery::new(query.filter.clone()))?;

        let mut deleted = Vec::new();
        for candidate in candidates.into_iter().filter(|s| s.owner == query.owner) {
            if let Some(removed) =
                self.repository
                    .delete(organization_id, &candidate.media_package_id, candidate.version)?
            {
                deleted.push(removed);
            }
        }
        debug!(
            organization_id = %organization_id,
            owner = %query.owner,
            deleted = deleted.len(),
            "Evaluated delete query"
        );
        Ok(deleted)
    }

    /// Delete the matching rows of the query's owner; returns how many were removed
    pub fn delete(&self, organization_id: &str, query: &DeleteQuery) -> Result<usize> {
        Ok(self.delete_matching(organization_id, query)?.len())
    }
}

fn latest_versions(rows: &[Snapshot]) -> HashMap<String, Version> {
    let mut latest: HashMap<String, Version> = HashMap::new();
    for row in rows {
        latest
            .entry(row.media_package_id.clone())
            .and_modify(|v| *v = (*v).max(row.version))
            .or_insert(row.version);
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaPackage;
    use crate::query::{always, mediapackage_id, owner, version, OrderBy};
    use crate::repository::MemorySnapshotRepository;
    use crate::StrataError;

    fn engine_with(rows: &[(&str, u64, &str)]) -> (Arc<MemorySnapshotRepository>, QueryEngine) {
        let repo = Arc::new(MemorySnapshotRepository::new());
        for (id, v, o) in rows {
            repo.put(Snapshot::new(MediaPackage::new(*id), Version(*v), *o, "org", "hot"))
                .unwrap();
        }
        let engine = QueryEngine::new(repo.clone());
        (repo, engine)
    }

    fn versions(rows: &[Snapshot]) -> Vec<(&str, u64)> {
        rows.iter()
            .map(|s| (s.media_package_id.as_str(), s.version.0))
            .collect()
    }

    #[test]
    fn test_latest_is_evaluated_over_all_rows() {
        let (_, engine) = engine_with(&[("a", 0, "x"), ("a", 1, "y"), ("b", 0, "x")]);

        let latest = engine
            .select("org", &SelectQuery::new(version().is_latest()))
            .unwrap();
        assert_eq!(versions(&latest), vec![("a", 1), ("b", 0)]);

        // owner x does not own the latest version of "a", so "a" drops out entirely
        let latest_of_x = engine
            .select("org", &SelectQuery::new(owner("x") & version().is_latest()))
            .unwrap();
        assert_eq!(versions(&latest_of_x), vec![("b", 0)]);

        let not_latest = engine
            .select("org", &SelectQuery::new(!version().is_latest()))
            .unwrap();
        assert_eq!(versions(&not_latest), vec![("a", 0)]);
    }

    #[test]
    fn test_ordering_and_pagination() {
        let (_, engine) = engine_with(&[("a", 0, "x"), ("a", 1, "x"), ("a", 2, "x"), ("b", 0, "x")]);
        let query = SelectQuery::new(mediapackage_id("a")).order_by(OrderBy::Version.desc());

        let all = engine.select("org", &query).unwrap();
        assert_eq!(versions(&all), vec![("a", 2), ("a", 1), ("a", 0)]);

        let page = engine.select("org", &query.clone().offset(1).limit(1)).unwrap();
        assert_eq!(versions(&page), vec![("a", 1)]);

        let past_end = engine.select("org", &query.offset(10)).unwrap();
        assert!(past_end.is_empty());
    }

    #[test]
    fn test_empty_result_and_validation() {
        let (_, engine) = engine_with(&[("a", 0, "x")]);
        assert!(engine
            .select("org", &SelectQuery::new(mediapackage_id("zzz")))
            .unwrap()
            .is_empty());
        assert!(engine.select("other-org", &SelectQuery::new(always())).unwrap().is_empty());
        assert!(matches!(
            engine.select("org", &SelectQuery::new(always()).limit(0)),
            Err(StrataError::Validation(_))
        ));
    }

    #[test]
    fn test_delete_only_touches_owner_rows() {
        let (repo, engine) = engine_with(&[("a", 0, "x"), ("a", 1, "y"), ("a", 2, "x")]);

        let removed = engine
            .delete("org", &DeleteQuery::new("x", mediapackage_id("a")))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(repo.len(), 1);
        assert!(repo.get("org", "a", Version(1)).is_ok());

        // the engine has no keep-latest policy of its own
        let removed = engine
            .delete("org", &DeleteQuery::new("y", version().is_latest()))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(repo.is_empty());
    }

    #[test]
    fn test_delete_returns_rows_as_removed() {
        let (repo, engine) = engine_with(&[("a", 0, "x"), ("a", 1, "x")]);
        repo.update_tier("org", "a", Version(1), 0, "cold").unwrap();

        let removed = engine
            .delete_matching("org", &DeleteQuery::new("x", mediapackage_id("a")))
            .unwrap();
        let tiers: Vec<&str> = removed.iter().map(|s| s.storage_tier.as_str()).collect();
        assert_eq!(tiers, vec!["hot", "cold"]);
        assert_eq!(removed[1].row_version, 1);
    }
}
