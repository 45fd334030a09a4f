use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::error::ValidationError;

/// A column the remote store should sort by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderKey {
    pub column: &'static str,
    pub ascending: bool,
}

impl OrderKey {
    pub const fn asc(column: &'static str) -> Self {
        Self { column, ascending: true }
    }

    pub const fn desc(column: &'static str) -> Self {
        Self { column, ascending: false }
    }
}

/// A row type mirrored by an [`EntityCache`](super::cache::EntityCache).
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Fields supplied by the caller on creation.
    type Draft: Clone + Send + Sync + Serialize;
    /// Field-level partial update.
    type Patch: Clone + Send + Sync + Serialize;

    /// Remote table name.
    const TABLE: &'static str;

    fn id(&self) -> Uuid;
    fn owner_id(&self) -> Uuid;

    /// Business-priority flag. Entities where this is `true` sort first.
    fn ranks_first(&self) -> bool;

    /// Recency tiebreak, most recent first.
    fn recency(&self) -> DateTime<Utc>;

    /// Order requested from the remote store on load.
    fn default_order() -> Vec<OrderKey>;

    fn validate_draft(draft: &Self::Draft) -> Result<(), ValidationError>;
    fn validate_patch(patch: &Self::Patch) -> Result<(), ValidationError>;

    /// Stamp `updated_at` on an outgoing patch.
    fn touch(patch: &mut Self::Patch, now: DateTime<Utc>);

    /// Build the row a store would return for an accepted insert.
    fn from_draft(id: Uuid, owner_id: Uuid, draft: &Self::Draft, now: DateTime<Utc>) -> Self;

    /// Apply an accepted patch the way the store would.
    fn apply(&mut self, patch: &Self::Patch);
}

/// Two-key ordering shared by every cache: priority flag first, then most recent first.
pub fn compare<E: Entity>(a: &E, b: &E) -> Ordering {
    b.ranks_first()
        .cmp(&a.ranks_first())
        .then_with(|| b.recency().cmp(&a.recency()))
}

/// Stable sort with [`compare`].
pub fn sort_entities<E: Entity>(entities: &mut [E]) {
    entities.sort_by(compare);
}
