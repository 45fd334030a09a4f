use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::Entity;
use super::error::GatewayError;
use super::note::Note;
use super::task::Task;
use crate::sync::EntityGateway;

/// Everything one owner has, as a single JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub export_date: DateTime<Utc>,
    pub user: String,
    pub tasks: Vec<Task>,
    pub notes: Vec<Note>,
}

impl Backup {
    pub fn from_snapshots(user: impl Into<String>, tasks: Vec<Task>, notes: Vec<Note>, now: DateTime<Utc>) -> Self {
        Self {
            export_date: now,
            user: user.into(),
            tasks,
            notes,
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let json = self.to_json_pretty().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Fresh listing of both tables for `owner_id`, fetched concurrently.
pub async fn fetch_backup(
    tasks: &dyn EntityGateway<Task>,
    notes: &dyn EntityGateway<Note>,
    owner_id: Uuid,
    user: impl Into<String>,
) -> Result<Backup, GatewayError> {
    let task_order = Task::default_order();
    let note_order = Note::default_order();
    let (tasks, notes) = futures::try_join!(
        tasks.list(owner_id, &task_order),
        notes.list(owner_id, &note_order)
    )?;
    log::info!("Exporting {} tasks and {} notes", tasks.len(), notes.len());
    Ok(Backup::from_snapshots(user, tasks, notes, Utc::now()))
}

pub fn default_file_name(date: NaiveDate) -> String {
    format!("second-brain-backup-{}.json", date.format("%Y-%m-%d"))
}

pub fn default_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(default_file_name(date))
}
