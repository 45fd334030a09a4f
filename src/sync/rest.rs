use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use uuid::Uuid;

use super::{AuthGateway, BlobStore, EntityGateway};
use crate::core::account::{Credentials, Session};
use crate::core::entity::{Entity, OrderKey};
use crate::core::error::GatewayError;

/// Client for the hosted backend: REST rows, auth, and object storage.
#[derive(Clone)]
pub struct RestClient {
    base_url: String,
    api_key: String,
    bucket: String,
    access_token: Option<String>,
    http: Client,
}

/// Insert payload: the caller's draft plus the owning user.
#[derive(Serialize)]
struct InsertRow<'a, D: Serialize> {
    user_id: Uuid,
    #[serde(flatten)]
    draft: &'a D,
}

impl RestClient {
    pub fn new(base_url: &str, api_key: &str, bucket: &str) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .build()
            .map_err(|e| GatewayError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            bucket: bucket.to_string(),
            access_token: None,
            http,
        })
    }

    /// Same client, acting as the session's user.
    pub fn with_session(mut self, session: &Session) -> Self {
        self.access_token = Some(session.access_token.clone());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, endpoint)
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let token = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.request_as(method, url, token)
    }

    fn request_as(&self, method: Method, url: &str, token: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
    }

    async fn send(&self, what: &str, req: RequestBuilder) -> Result<Response, GatewayError> {
        let resp = req
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("{} failed: {}", what, e)))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        log::debug!("{} returned {}: {}", what, status, body);
        Err(status_error(status, &body))
    }

    async fn decode<T: serde::de::DeserializeOwned>(what: &str, resp: Response) -> Result<T, GatewayError> {
        resp.json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(format!("{}: {}", what, e)))
    }
}

/// Map a non-success HTTP status onto the gateway taxonomy.
pub(crate) fn status_error(status: StatusCode, body: &str) -> GatewayError {
    let message = error_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    });
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::PermissionDenied(message),
        StatusCode::NOT_FOUND => GatewayError::NotFound(message),
        s => GatewayError::Status {
            status: s.as_u16(),
            message,
        },
    }
}

/// Pull a human-readable message out of the backend's JSON error bodies.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| value[*key].as_str())
        .map(str::to_string)
}

/// "is_done.asc,updated_at.desc"
pub(crate) fn order_param(order: &[OrderKey]) -> String {
    order
        .iter()
        .map(|k| format!("{}.{}", k.column, if k.ascending { "asc" } else { "desc" }))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl<E: Entity> EntityGateway<E> for RestClient {
    async fn list(&self, owner_id: Uuid, order: &[OrderKey]) -> Result<Vec<E>, GatewayError> {
        let owner_filter = format!("eq.{}", owner_id);
        let mut query = vec![("select", "*".to_string()), ("user_id", owner_filter)];
        if !order.is_empty() {
            query.push(("order", order_param(order)));
        }
        let req = self
            .request(Method::GET, &self.table_url(E::TABLE))
            .query(&query);
        let resp = self.send("List", req).await?;
        Self::decode("List", resp).await
    }

    async fn insert(&self, owner_id: Uuid, draft: &E::Draft) -> Result<E, GatewayError> {
        let row = [InsertRow {
            user_id: owner_id,
            draft,
        }];
        let req = self
            .request(Method::POST, &self.table_url(E::TABLE))
            .header("Prefer", "return=representation")
            .json(&row);
        let resp = self.send("Insert", req).await?;
        let rows: Vec<E> = Self::decode("Insert", resp).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| GatewayError::Decode("Insert returned no rows".to_string()))
    }

    async fn update(&self, id: Uuid, patch: &E::Patch) -> Result<Vec<E>, GatewayError> {
        let req = self
            .request(Method::PATCH, &self.table_url(E::TABLE))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(patch);
        let resp = self.send("Update", req).await?;
        Self::decode("Update", resp).await
    }

    async fn delete(&self, id: Uuid) -> Result<u64, GatewayError> {
        let req = self
            .request(Method::DELETE, &self.table_url(E::TABLE))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation");
        let resp = self.send("Delete", req).await?;
        let rows: Vec<serde_json::Value> = Self::decode("Delete", resp).await?;
        Ok(rows.len() as u64)
    }
}

#[async_trait]
impl BlobStore for RestClient {
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
        content_type: &str,
    ) -> Result<String, GatewayError> {
        let req = self
            .request(Method::POST, &self.object_url(path))
            .header(CONTENT_TYPE, content_type)
            .body(bytes);
        self.send("Upload", req).await?;
        Ok(self.public_url(path))
    }

    async fn remove(&self, paths: &[String]) -> Result<(), GatewayError> {
        let url = format!("{}/storage/v1/object/{}", self.base_url, self.bucket);
        let req = self
            .request(Method::DELETE, &url)
            .json(&serde_json::json!({ "prefixes": paths }));
        self.send("Remove objects", req).await?;
        Ok(())
    }
}

#[async_trait]
impl AuthGateway for RestClient {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, GatewayError> {
        let req = self
            .request_as(Method::POST, &self.auth_url("token"), &self.api_key)
            .query(&[("grant_type", "password")])
            .json(credentials);
        let resp = self.send("Sign in", req).await?;
        Self::decode("Sign in", resp).await
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<Option<Session>, GatewayError> {
        let req = self
            .request_as(Method::POST, &self.auth_url("signup"), &self.api_key)
            .json(credentials);
        let resp = self.send("Sign up", req).await?;
        let value: serde_json::Value = Self::decode("Sign up", resp).await?;
        // Without a session the account awaits email confirmation.
        if value.get("access_token").is_none() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| GatewayError::Decode(format!("Sign up: {}", e)))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, GatewayError> {
        let req = self
            .request_as(Method::POST, &self.auth_url("token"), &self.api_key)
            .query(&[("grant_type", "refresh_token")])
            .json(&serde_json::json!({ "refresh_token": refresh_token }));
        let resp = self.send("Refresh session", req).await?;
        Self::decode("Refresh session", resp).await
    }

    async fn update_password(
        &self,
        session: &Session,
        new_password: &str,
    ) -> Result<(), GatewayError> {
        let req = self
            .request_as(Method::PUT, &self.auth_url("user"), &session.access_token)
            .json(&serde_json::json!({ "password": new_password }));
        self.send("Update password", req).await?;
        Ok(())
    }

    async fn sign_out(&self, session: &Session) -> Result<(), GatewayError> {
        let req = self.request_as(Method::POST, &self.auth_url("logout"), &session.access_token);
        self.send("Sign out", req).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::note::Note;
    use crate::core::task::{Category, Task, TaskDraft};

    #[test]
    fn order_param_joins_keys() {
        assert_eq!(order_param(&Task::default_order()), "is_done.asc,updated_at.desc");
        assert_eq!(order_param(&Note::default_order()), "is_favorite.desc,updated_at.desc");
        assert_eq!(order_param(&[]), "");
    }

    #[test]
    fn auth_failures_map_to_permission_denied() {
        let err = status_error(StatusCode::UNAUTHORIZED, r#"{"message":"JWT expired"}"#);
        assert_eq!(err, GatewayError::PermissionDenied("JWT expired".into()));
        let err = status_error(StatusCode::FORBIDDEN, "");
        assert_eq!(err, GatewayError::PermissionDenied("Forbidden".into()));
    }

    #[test]
    fn other_failures_keep_status() {
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, r#"{"error":"Bucket not found"}"#),
            GatewayError::NotFound("Bucket not found".into())
        );
        assert_eq!(
            status_error(StatusCode::BAD_REQUEST, r#"{"error_description":"Invalid login credentials"}"#),
            GatewayError::Status {
                status: 400,
                message: "Invalid login credentials".into()
            }
        );
    }

    #[test]
    fn insert_row_flattens_draft() {
        let owner = Uuid::new_v4();
        let draft = TaskDraft::new("Water plants", Category::Home);
        let value = serde_json::to_value([InsertRow {
            user_id: owner,
            draft: &draft,
        }])
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!([{ "user_id": owner, "title": "Water plants", "category": "home" }])
        );
    }

    #[test]
    fn urls_are_built_from_trimmed_base() {
        let client = RestClient::new("https://demo.example.co/", "anon", "note-images").unwrap();
        assert_eq!(client.table_url("tasks"), "https://demo.example.co/rest/v1/tasks");
        assert_eq!(
            client.public_url("u/a.png"),
            "https://demo.example.co/storage/v1/object/public/note-images/u/a.png"
        );
        assert_eq!(
            client.object_url("u/a.png"),
            "https://demo.example.co/storage/v1/object/note-images/u/a.png"
        );
    }
}
