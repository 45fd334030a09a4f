use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use super::entity::{Entity, OrderKey, sort_entities};
use super::error::CacheError;
use super::note::{Note, NotePatch};
use super::task::{Task, TaskPatch};
use crate::sync::EntityGateway;

struct CacheState<E> {
    entries: Vec<E>,
    in_flight: HashSet<Uuid>,
    closed: bool,
}

/// In-memory ordered mirror of one remote table for one owner.
///
/// Mutations wait for the gateway to acknowledge before touching local state,
/// so a failed call leaves the cache exactly as it was. Only one mutation per
/// entity id may be outstanding; a second one fails with [`CacheError::Busy`].
pub struct EntityCache<E: Entity> {
    owner_id: Uuid,
    gateway: Arc<dyn EntityGateway<E>>,
    state: Mutex<CacheState<E>>,
    revision: watch::Sender<u64>,
}

/// Exclusive hold on one cached entity. The in-flight mark is cleared when
/// the claim is dropped, however the change ends.
pub struct Claim<'a, E: Entity> {
    cache: &'a EntityCache<E>,
    id: Uuid,
}

impl<E: Entity> Drop for Claim<'_, E> {
    fn drop(&mut self) {
        self.cache.lock().in_flight.remove(&self.id);
    }
}

impl<E: Entity> Claim<'_, E> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The cached entity as of now.
    pub fn current(&self) -> Option<E> {
        self.cache.get(self.id)
    }

    pub async fn patch(&self, mut patch: E::Patch) -> Result<E, CacheError> {
        let (cache, id) = (self.cache, self.id);
        E::validate_patch(&patch)?;
        E::touch(&mut patch, Utc::now());

        let rows = cache.gateway.update(id, &patch).await.map_err(|e| {
            log::error!("Failed to update {} in {}: {}", id, E::TABLE, e);
            CacheError::Fetch(e)
        })?;
        let Some(updated) = rows.into_iter().find(|r| r.id() == id) else {
            log::warn!("Update of {} in {} affected no rows", id, E::TABLE);
            return Err(CacheError::Denied { id });
        };

        {
            let mut state = cache.lock();
            if state.closed {
                return Err(CacheError::Closed);
            }
            if let Some(slot) = state.entries.iter_mut().find(|e| e.id() == id) {
                *slot = updated.clone();
            }
            sort_entities(&mut state.entries);
        }
        cache.bump();
        Ok(updated)
    }

    pub async fn remove(&self) -> Result<(), CacheError> {
        let (cache, id) = (self.cache, self.id);
        let affected = cache.gateway.delete(id).await.map_err(|e| {
            log::error!("Failed to delete {} from {}: {}", id, E::TABLE, e);
            CacheError::Fetch(e)
        })?;
        if affected == 0 {
            log::warn!("Delete of {} from {} affected no rows", id, E::TABLE);
            return Err(CacheError::Denied { id });
        }

        {
            let mut state = cache.lock();
            if state.closed {
                return Err(CacheError::Closed);
            }
            state.entries.retain(|e| e.id() != id);
        }
        cache.bump();
        Ok(())
    }
}

impl<E: Entity> EntityCache<E> {
    pub fn new(owner_id: Uuid, gateway: Arc<dyn EntityGateway<E>>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            owner_id,
            gateway,
            state: Mutex::new(CacheState {
                entries: Vec::new(),
                in_flight: HashSet::new(),
                closed: false,
            }),
            revision,
        }
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    /// Session start: first load with the entity's default ordering.
    pub async fn init(&self) -> Result<(), CacheError> {
        self.load(&E::default_order()).await
    }

    /// Session end. Drops all entries; later calls fail with [`CacheError::Closed`].
    pub fn dispose(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.entries.clear();
        }
        self.bump();
    }

    /// Receiver that changes whenever the snapshot does.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn snapshot(&self) -> Vec<E> {
        self.lock().entries.clone()
    }

    pub fn get(&self, id: Uuid) -> Option<E> {
        self.lock().entries.iter().find(|e| e.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Replace the cache wholesale with the owner's rows. On failure the
    /// previous contents stay as they were.
    pub async fn load(&self, order: &[OrderKey]) -> Result<(), CacheError> {
        self.ensure_open()?;
        let mut rows = self.gateway.list(self.owner_id, order).await.map_err(|e| {
            log::error!("Failed to load {}: {}", E::TABLE, e);
            CacheError::Fetch(e)
        })?;
        sort_entities(&mut rows);
        log::info!("Loaded {} {} for {}", rows.len(), E::TABLE, self.owner_id);
        {
            let mut state = self.lock();
            if state.closed {
                return Err(CacheError::Closed);
            }
            state.entries = rows;
        }
        self.bump();
        Ok(())
    }

    /// Insert a new entity remotely, then place the stored row into order.
    pub async fn create(&self, draft: E::Draft) -> Result<E, CacheError> {
        E::validate_draft(&draft)?;
        self.ensure_open()?;
        let created = self
            .gateway
            .insert(self.owner_id, &draft)
            .await
            .map_err(|e| {
                log::error!("Failed to create row in {}: {}", E::TABLE, e);
                CacheError::Fetch(e)
            })?;
        {
            let mut state = self.lock();
            if state.closed {
                return Err(CacheError::Closed);
            }
            state.entries.insert(0, created.clone());
            sort_entities(&mut state.entries);
        }
        self.bump();
        Ok(created)
    }

    /// Apply a field-level patch. `updated_at` is always stamped. The entity is
    /// re-sorted afterwards since the patch may touch an order key.
    pub async fn patch(&self, id: Uuid, patch: E::Patch) -> Result<E, CacheError> {
        E::validate_patch(&patch)?;
        self.claim(id)?.patch(patch).await
    }

    /// Delete remotely, then drop from the cache. Zero affected rows is a denial.
    pub async fn remove(&self, id: Uuid) -> Result<(), CacheError> {
        self.claim(id)?.remove().await
    }

    /// Reserve `id` for a multi-step change. Other mutations of the same id
    /// fail with [`CacheError::Busy`] until the claim is dropped.
    pub fn claim(&self, id: Uuid) -> Result<Claim<'_, E>, CacheError> {
        let mut state = self.lock();
        if state.closed {
            return Err(CacheError::Closed);
        }
        if !state.entries.iter().any(|e| e.id() == id) {
            return Err(CacheError::UnknownEntity { id });
        }
        if !state.in_flight.insert(id) {
            return Err(CacheError::Busy { id });
        }
        Ok(Claim { cache: self, id })
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.lock().closed {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

impl EntityCache<Task> {
    /// Flip `is_done`. Waits for acknowledgment like any other patch.
    pub async fn toggle_done(&self, id: Uuid) -> Result<Task, CacheError> {
        let current = self.get(id).ok_or(CacheError::UnknownEntity { id })?;
        self.patch(id, TaskPatch::done(!current.is_done)).await
    }
}

impl EntityCache<Note> {
    pub async fn toggle_favorite(&self, id: Uuid) -> Result<Note, CacheError> {
        let current = self.get(id).ok_or(CacheError::UnknownEntity { id })?;
        self.patch(id, NotePatch::favorite(!current.is_favorite)).await
    }
}
