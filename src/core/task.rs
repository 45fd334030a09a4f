use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::{Entity, OrderKey};
use super::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Work,
    /// Rows written before the seven-category set use `personal`; they read as `Home`.
    #[serde(alias = "personal")]
    Home,
    Health,
    Learning,
    Finance,
    Social,
    Ideas,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Self::Work,
        Self::Home,
        Self::Health,
        Self::Learning,
        Self::Finance,
        Self::Social,
        Self::Ideas,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Home => "home",
            Self::Health => "health",
            Self::Learning => "learning",
            Self::Finance => "finance",
            Self::Social => "social",
            Self::Ideas => "ideas",
        }
    }
}

impl Default for Category {
    fn default() -> Self {
        Self::Work
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "work" => Ok(Self::Work),
            "home" | "personal" => Ok(Self::Home),
            "health" => Ok(Self::Health),
            "learning" => Ok(Self::Learning),
            "finance" => Ok(Self::Finance),
            "social" => Ok(Self::Social),
            "ideas" => Ok(Self::Ideas),
            _ => Err(ValidationError::UnknownCategory(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    #[serde(rename = "user_id")]
    pub owner_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub is_done: bool,
    /// Raw due date as stored; may carry a time suffix or be malformed. Read it through [`Task::due`].
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Due date as a plain calendar date, or `None` if undated or unparseable.
    pub fn due(&self) -> Option<NaiveDate> {
        self.due_date.as_deref().and_then(parse_due_date)
    }

    /// True when a due date is present but cannot be read as a calendar date.
    pub fn has_malformed_due_date(&self) -> bool {
        self.due_date
            .as_deref()
            .is_some_and(|raw| !raw.trim().is_empty() && parse_due_date(raw).is_none())
    }
}

/// Parse "2024-06-01" or "2024-06-01T00:00:00+00:00", keeping only the date part.
pub fn parse_due_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.trim().split(['T', ' ']).next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDraft {
    pub title: String,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>, category: Category) -> Self {
        Self {
            title: title.into(),
            category,
            due_date: None,
            description: None,
        }
    }

    pub fn due(mut self, date: NaiveDate) -> Self {
        self.due_date = Some(date);
        self
    }
}

/// Field-level update. `None` leaves a field alone; `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_done: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn done(is_done: bool) -> Self {
        Self {
            is_done: Some(is_done),
            ..Self::default()
        }
    }
}

impl Entity for Task {
    type Draft = TaskDraft;
    type Patch = TaskPatch;

    const TABLE: &'static str = "tasks";

    fn id(&self) -> Uuid {
        self.id
    }

    fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    fn ranks_first(&self) -> bool {
        !self.is_done
    }

    fn recency(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn default_order() -> Vec<OrderKey> {
        vec![OrderKey::asc("is_done"), OrderKey::desc("updated_at")]
    }

    fn validate_draft(draft: &TaskDraft) -> Result<(), ValidationError> {
        if draft.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        Ok(())
    }

    fn validate_patch(patch: &TaskPatch) -> Result<(), ValidationError> {
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ValidationError::EmptyTitle);
        }
        Ok(())
    }

    fn touch(patch: &mut TaskPatch, now: DateTime<Utc>) {
        patch.updated_at = Some(now);
    }

    fn from_draft(id: Uuid, owner_id: Uuid, draft: &TaskDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id,
            title: draft.title.clone(),
            category: draft.category,
            is_done: false,
            due_date: draft.due_date.map(|d| d.to_string()),
            description: draft.description.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(is_done) = patch.is_done {
            self.is_done = is_done;
        }
        if let Some(due) = patch.due_date {
            self.due_date = due.map(|d| d.to_string());
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(json: &str) -> Task {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn legacy_personal_category_reads_as_home() {
        let task = row(r#"{
            "id": "5f0c6a2e-8a51-4f3e-9a59-0f6c1b9a1a01",
            "user_id": "0c1b0a6e-9f4d-4e2a-8f51-2a9d8c7b6a51",
            "title": "Call mom",
            "category": "personal",
            "is_done": false,
            "due_date": null,
            "created_at": "2024-06-01T10:00:00Z",
            "updated_at": "2024-06-01T10:00:00Z"
        }"#);
        assert_eq!(task.category, Category::Home);
        assert_eq!(serde_json::to_value(task.category).unwrap(), "home");
    }

    #[test]
    fn unknown_category_is_rejected() {
        assert_eq!(
            "chores".parse::<Category>(),
            Err(ValidationError::UnknownCategory("chores".into()))
        );
        assert_eq!("Finance".parse::<Category>(), Ok(Category::Finance));
    }

    #[test]
    fn due_date_ignores_time_suffix() {
        assert_eq!(
            parse_due_date("2024-06-01T23:30:00+02:00"),
            NaiveDate::from_ymd_opt(2024, 6, 1)
        );
        assert_eq!(parse_due_date("2024-02-30"), None);
        assert_eq!(parse_due_date("soon"), None);
    }

    #[test]
    fn malformed_due_date_detected() {
        let now = Utc::now();
        let mut task = Task::from_draft(
            Uuid::new_v4(),
            Uuid::new_v4(),
            &TaskDraft::new("Pay rent", Category::Finance),
            now,
        );
        assert!(!task.has_malformed_due_date());
        task.due_date = Some("next tuesday".into());
        assert!(task.has_malformed_due_date());
        assert_eq!(task.due(), None);
    }

    #[test]
    fn patch_serializes_only_set_fields() {
        let mut patch = TaskPatch::done(true);
        patch.due_date = Some(None);
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, serde_json::json!({ "is_done": true, "due_date": null }));
    }

    #[test]
    fn empty_title_fails_validation() {
        let draft = TaskDraft::new("   ", Category::Work);
        assert_eq!(Task::validate_draft(&draft), Err(ValidationError::EmptyTitle));
        let patch = TaskPatch {
            title: Some(String::new()),
            ..TaskPatch::default()
        };
        assert_eq!(Task::validate_patch(&patch), Err(ValidationError::EmptyTitle));
    }

    #[test]
    fn apply_patch_sets_fields() {
        let now = Utc::now();
        let mut task = Task::from_draft(
            Uuid::new_v4(),
            Uuid::new_v4(),
            &TaskDraft::new("Read", Category::Learning),
            now,
        );
        let due = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap();
        task.apply(&TaskPatch {
            due_date: Some(Some(due)),
            is_done: Some(true),
            ..TaskPatch::default()
        });
        assert!(task.is_done);
        assert_eq!(task.due_date.as_deref(), Some("2024-06-05"));
        assert_eq!(task.due(), Some(due));
    }
}
