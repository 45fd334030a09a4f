use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{BlobStore, EntityGateway};
use crate::core::entity::{Entity, OrderKey, sort_entities};
use crate::core::error::GatewayError;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process row store acting as a single signed-in user.
///
/// Rows owned by anyone else are invisible to updates and deletes, the way a
/// row-level policy hides them on the hosted backend: the call succeeds but
/// affects nothing.
pub struct MemoryStore<E: Entity> {
    acting_owner: Uuid,
    rows: Mutex<Vec<E>>,
    last_stamp: Mutex<DateTime<Utc>>,
    offline: AtomicBool,
}

impl<E: Entity> MemoryStore<E> {
    pub fn new(acting_owner: Uuid) -> Self {
        Self::with_rows(acting_owner, Vec::new())
    }

    pub fn with_rows(acting_owner: Uuid, rows: Vec<E>) -> Self {
        let last = rows
            .iter()
            .map(|r| r.recency())
            .max()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self {
            acting_owner,
            rows: Mutex::new(rows),
            last_stamp: Mutex::new(last),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every call fail with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Hand a row to another owner, as if a sharing policy had been revoked.
    pub fn revoke(&self, id: Uuid, new_owner: Uuid, reassign: impl FnOnce(&mut E, Uuid)) {
        if let Some(row) = lock(&self.rows).iter_mut().find(|r| r.id() == id) {
            reassign(row, new_owner);
        }
    }

    /// Every row regardless of owner.
    pub fn rows(&self) -> Vec<E> {
        lock(&self.rows).clone()
    }

    fn check_online(&self) -> Result<(), GatewayError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(GatewayError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    /// Strictly increasing timestamps so fast successive inserts still order.
    fn stamp(&self) -> DateTime<Utc> {
        let mut last = lock(&self.last_stamp);
        let now = Utc::now().max(*last + Duration::microseconds(1));
        *last = now;
        now
    }
}

#[async_trait]
impl<E: Entity> EntityGateway<E> for MemoryStore<E> {
    async fn list(&self, owner_id: Uuid, _order: &[OrderKey]) -> Result<Vec<E>, GatewayError> {
        self.check_online()?;
        if owner_id != self.acting_owner {
            return Ok(Vec::new());
        }
        let mut rows: Vec<E> = lock(&self.rows)
            .iter()
            .filter(|r| r.owner_id() == owner_id)
            .cloned()
            .collect();
        sort_entities(&mut rows);
        Ok(rows)
    }

    async fn insert(&self, owner_id: Uuid, draft: &E::Draft) -> Result<E, GatewayError> {
        self.check_online()?;
        if owner_id != self.acting_owner {
            return Err(GatewayError::PermissionDenied(
                "new row violates row-level security policy".to_string(),
            ));
        }
        let row = E::from_draft(Uuid::new_v4(), owner_id, draft, self.stamp());
        lock(&self.rows).push(row.clone());
        Ok(row)
    }

    async fn update(&self, id: Uuid, patch: &E::Patch) -> Result<Vec<E>, GatewayError> {
        self.check_online()?;
        let mut rows = lock(&self.rows);
        match rows
            .iter_mut()
            .find(|r| r.id() == id && r.owner_id() == self.acting_owner)
        {
            Some(row) => {
                row.apply(patch);
                Ok(vec![row.clone()])
            }
            None => Ok(Vec::new()),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<u64, GatewayError> {
        self.check_online()?;
        let mut rows = lock(&self.rows);
        let before = rows.len();
        rows.retain(|r| !(r.id() == id && r.owner_id() == self.acting_owner));
        Ok((before - rows.len()) as u64)
    }
}

/// In-process blob bucket.
pub struct MemoryBlobs {
    bucket: String,
    base_url: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_removals: AtomicBool,
}

impl MemoryBlobs {
    pub fn new(bucket: &str, base_url: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            objects: Mutex::new(BTreeMap::new()),
            fail_removals: AtomicBool::new(false),
        }
    }

    pub fn set_fail_removals(&self, fail: bool) {
        self.fail_removals.store(fail, Ordering::Relaxed);
    }

    pub fn insert(&self, path: &str, bytes: Vec<u8>) {
        lock(&self.objects).insert(path.to_string(), bytes);
    }

    pub fn paths(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }

    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, GatewayError> {
        self.insert(path, bytes);
        Ok(self.public_url(path))
    }

    async fn remove(&self, paths: &[String]) -> Result<(), GatewayError> {
        if self.fail_removals.load(Ordering::Relaxed) {
            return Err(GatewayError::Status {
                status: 500,
                message: "storage unavailable".to_string(),
            });
        }
        let mut objects = lock(&self.objects);
        for path in paths {
            objects.remove(path);
        }
        Ok(())
    }
}
