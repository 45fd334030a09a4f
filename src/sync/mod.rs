pub mod calendar;
pub mod ical;
pub mod keyring;
pub mod memory;
pub mod rest;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::account::{Credentials, Session};
use crate::core::entity::{Entity, OrderKey};
use crate::core::error::GatewayError;

/// Row-level CRUD against one remote table, scoped to the signed-in owner.
#[async_trait]
pub trait EntityGateway<E: Entity>: Send + Sync {
    /// All rows owned by `owner_id`, in the requested order.
    async fn list(&self, owner_id: Uuid, order: &[OrderKey]) -> Result<Vec<E>, GatewayError>;

    /// Insert a row and return it as stored (with its assigned id and timestamps).
    async fn insert(&self, owner_id: Uuid, draft: &E::Draft) -> Result<E, GatewayError>;

    /// Returns the rows the update touched. An empty result means nothing matched,
    /// usually because a row-level policy hid the row.
    async fn update(&self, id: Uuid, patch: &E::Patch) -> Result<Vec<E>, GatewayError>;

    /// Returns the number of rows deleted.
    async fn delete(&self, id: Uuid) -> Result<u64, GatewayError>;
}

/// Blob storage for images embedded in notes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Bucket name; also the marker that identifies owned blob URLs.
    fn bucket(&self) -> &str;

    /// Public URL for a stored path.
    fn public_url(&self, path: &str) -> String;

    /// Upload bytes to `path` and return the public URL.
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, GatewayError>;

    async fn remove(&self, paths: &[String]) -> Result<(), GatewayError>;
}

/// Password-based authentication against the hosted backend.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, GatewayError>;

    /// Returns `None` when the account must be confirmed before a session is issued.
    async fn sign_up(&self, credentials: &Credentials) -> Result<Option<Session>, GatewayError>;

    async fn refresh(&self, refresh_token: &str) -> Result<Session, GatewayError>;

    async fn update_password(
        &self,
        session: &Session,
        new_password: &str,
    ) -> Result<(), GatewayError>;

    async fn sign_out(&self, session: &Session) -> Result<(), GatewayError>;
}
