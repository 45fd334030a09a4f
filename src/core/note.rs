use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::{Entity, OrderKey};
use super::error::ValidationError;

pub const UNTITLED_NOTE: &str = "Untitled Note";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    #[serde(rename = "user_id")]
    pub owner_id: Uuid,
    pub title: String,
    /// Rich-text HTML. May embed `<img>` references to uploaded blobs.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_favorite: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
}

impl Default for NoteDraft {
    fn default() -> Self {
        Self {
            title: UNTITLED_NOTE.to_string(),
            content: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl NotePatch {
    pub fn favorite(is_favorite: bool) -> Self {
        Self {
            is_favorite: Some(is_favorite),
            ..Self::default()
        }
    }
}

impl Entity for Note {
    type Draft = NoteDraft;
    type Patch = NotePatch;

    const TABLE: &'static str = "notes";

    fn id(&self) -> Uuid {
        self.id
    }

    fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    fn ranks_first(&self) -> bool {
        self.is_favorite
    }

    fn recency(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn default_order() -> Vec<OrderKey> {
        vec![OrderKey::desc("is_favorite"), OrderKey::desc("updated_at")]
    }

    fn validate_draft(draft: &NoteDraft) -> Result<(), ValidationError> {
        if draft.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        Ok(())
    }

    fn validate_patch(patch: &NotePatch) -> Result<(), ValidationError> {
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ValidationError::EmptyTitle);
        }
        Ok(())
    }

    fn touch(patch: &mut NotePatch, now: DateTime<Utc>) {
        patch.updated_at = Some(now);
    }

    fn from_draft(id: Uuid, owner_id: Uuid, draft: &NoteDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id,
            title: draft.title.clone(),
            content: draft.content.clone(),
            is_favorite: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, patch: &NotePatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(is_favorite) = patch.is_favorite {
            self.is_favorite = is_favorite;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }
    }
}
