//! Cached (client, site) connectivity facts
//!
//! An association records the client endpoint and key a site's exit node
//! last observed, plus whether the pair is relayed. Rows are created on the
//! first hole punch for a pair and are only removed when the client or site
//! itself goes away.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use wr_core::model::Association;
use wr_core::{ClientId, SiteId};

/// Outcome of recording a hole punch against the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationChange {
    /// First observation for this pair
    Created(Association),
    /// Endpoint or key differs from what was cached
    Updated {
        previous: Association,
        current: Association,
    },
    /// Same endpoint and key as before; nothing to propagate
    Unchanged(Association),
}

impl AssociationChange {
    pub fn current(&self) -> &Association {
        match self {
            AssociationChange::Created(current)
            | AssociationChange::Updated { current, .. }
            | AssociationChange::Unchanged(current) => current,
        }
    }

    pub fn is_changed(&self) -> bool {
        !matches!(self, AssociationChange::Unchanged(_))
    }
}

/// Concurrent association store keyed by `(client, site)`.
///
/// Every mutation runs under the entry's shard lock, so a compare-and-update
/// of one pair is atomic. Concurrent updates of the same pair are
/// last-write-wins.
#[derive(Debug, Default)]
pub struct AssociationCache {
    entries: DashMap<(ClientId, SiteId), Association>,
}

impl AssociationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache, e.g. from persisted rows
    pub fn load(&self, rows: impl IntoIterator<Item = Association>) {
        for row in rows {
            self.entries.insert((row.client_id, row.site_id), row);
        }
    }

    pub fn get(&self, client_id: ClientId, site_id: SiteId) -> Option<Association> {
        self.entries.get(&(client_id, site_id)).map(|r| r.clone())
    }

    /// The cached row, or an empty non-relayed one
    pub fn get_or_default(&self, client_id: ClientId, site_id: SiteId) -> Association {
        self.get(client_id, site_id)
            .unwrap_or_else(|| Association::new(client_id, site_id))
    }

    /// Store the observed endpoint (and key, if reported) for a pair.
    ///
    /// A missing `public_key` keeps the cached key and only the endpoint is
    /// compared.
    pub fn record_hole_punch(
        &self,
        client_id: ClientId,
        site_id: SiteId,
        endpoint: &str,
        public_key: Option<&str>,
    ) -> AssociationChange {
        match self.entries.entry((client_id, site_id)) {
            Entry::Occupied(mut entry) => {
                let row = entry.get_mut();
                let key_changed = public_key.is_some_and(|k| row.public_key.as_deref() != Some(k));
                let endpoint_changed = row.endpoint.as_deref() != Some(endpoint);

                if !key_changed && !endpoint_changed {
                    return AssociationChange::Unchanged(row.clone());
                }

                let previous = row.clone();
                row.endpoint = Some(endpoint.to_string());
                if let Some(key) = public_key {
                    row.public_key = Some(key.to_string());
                }
                AssociationChange::Updated {
                    previous,
                    current: row.clone(),
                }
            }
            Entry::Vacant(entry) => {
                let mut row = Association::new(client_id, site_id);
                row.endpoint = Some(endpoint.to_string());
                row.public_key = public_key.map(str::to_string);
                AssociationChange::Created(entry.insert(row).clone())
            }
        }
    }

    /// Flip the relay flag of an existing pair, returning the updated row
    pub fn set_relayed(
        &self,
        client_id: ClientId,
        site_id: SiteId,
        relayed: bool,
    ) -> Option<Association> {
        self.entries.get_mut(&(client_id, site_id)).map(|mut row| {
            row.is_relayed = relayed;
            row.clone()
        })
    }

    /// Set the relay flag on every association of a client (key rotation).
    ///
    /// Returns the number of rows touched.
    pub fn reset_relay_for_client(&self, client_id: ClientId, relayed: bool) -> usize {
        let mut touched = 0;
        for mut row in self.entries.iter_mut() {
            if row.client_id == client_id {
                row.is_relayed = relayed;
                touched += 1;
            }
        }
        touched
    }

    pub fn for_client(&self, client_id: ClientId) -> Vec<Association> {
        let mut rows: Vec<_> = self
            .entries
            .iter()
            .filter(|r| r.client_id == client_id)
            .map(|r| r.clone())
            .collect();
        rows.sort_by_key(|r| r.site_id);
        rows
    }

    /// Drop every association of a deleted client
    pub fn remove_client(&self, client_id: ClientId) {
        self.entries.retain(|(client, _), _| *client != client_id);
    }

    /// Drop every association of a deleted site
    pub fn remove_site(&self, site_id: SiteId) {
        self.entries.retain(|(_, site), _| *site != site_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ids(client: u32, site: u32) -> (ClientId, SiteId) {
        (ClientId::new(client), SiteId::new(site))
    }

    #[test]
    fn test_first_punch_creates_association() {
        let cache = AssociationCache::new();
        let (client, site) = ids(1, 2);

        let change = cache.record_hole_punch(client, site, "203.0.113.5:51820", Some("ck"));
        assert!(matches!(change, AssociationChange::Created(_)));
        assert!(change.is_changed());

        let row = cache.get(client, site).unwrap();
        assert_eq!(row.endpoint.as_deref(), Some("203.0.113.5:51820"));
        assert_eq!(row.public_key.as_deref(), Some("ck"));
        assert!(!row.is_relayed);
    }

    #[test]
    fn test_identical_punch_is_unchanged() {
        let cache = AssociationCache::new();
        let (client, site) = ids(1, 2);

        cache.record_hole_punch(client, site, "203.0.113.5:51820", Some("ck"));
        let change = cache.record_hole_punch(client, site, "203.0.113.5:51820", Some("ck"));
        assert!(!change.is_changed());

        // A report without a key compares only the endpoint
        let change = cache.record_hole_punch(client, site, "203.0.113.5:51820", None);
        assert!(!change.is_changed());
    }

    #[test]
    fn test_moved_endpoint_is_updated_with_previous() {
        let cache = AssociationCache::new();
        let (client, site) = ids(1, 2);

        cache.record_hole_punch(client, site, "203.0.113.5:51820", Some("ck"));
        let change = cache.record_hole_punch(client, site, "198.51.100.7:40000", None);

        match change {
            AssociationChange::Updated { previous, current } => {
                assert_eq!(previous.endpoint.as_deref(), Some("203.0.113.5:51820"));
                assert_eq!(current.endpoint.as_deref(), Some("198.51.100.7:40000"));
                assert_eq!(current.public_key.as_deref(), Some("ck"));
            }
            other => panic!("expected Updated, got {other:?}"),
        }
    }

    #[test]
    fn test_relay_flags() {
        let cache = AssociationCache::new();
        let (client, site_a) = ids(1, 2);
        let site_b = SiteId::new(3);

        assert!(cache.set_relayed(client, site_a, true).is_none());

        cache.record_hole_punch(client, site_a, "203.0.113.5:1", None);
        cache.record_hole_punch(client, site_b, "203.0.113.5:2", None);
        assert!(cache.set_relayed(client, site_a, true).unwrap().is_relayed);
        assert!(cache.get_or_default(client, site_a).is_relayed);

        assert_eq!(cache.reset_relay_for_client(client, false), 2);
        assert!(cache.for_client(client).iter().all(|a| !a.is_relayed));

        // Relay flag survives an endpoint update
        cache.set_relayed(client, site_b, true);
        cache.record_hole_punch(client, site_b, "203.0.113.5:9", None);
        assert!(cache.get(client, site_b).unwrap().is_relayed);
    }

    #[test]
    fn test_remove_client_and_site() {
        let cache = AssociationCache::new();
        cache.record_hole_punch(ClientId::new(1), SiteId::new(1), "a:1", None);
        cache.record_hole_punch(ClientId::new(1), SiteId::new(2), "a:1", None);
        cache.record_hole_punch(ClientId::new(2), SiteId::new(2), "b:1", None);

        cache.remove_site(SiteId::new(2));
        assert_eq!(cache.len(), 1);
        cache.remove_client(ClientId::new(1));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_punches_for_one_pair() {
        let cache = Arc::new(AssociationCache::new());
        let (client, site) = ids(1, 1);

        let mut handles = vec![];
        for port in 0..20u16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.record_hole_punch(client, site, &format!("203.0.113.5:{}", port), None)
            }));
        }

        let mut created = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), AssociationChange::Created(_)) {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(cache.len(), 1);
    }
}
