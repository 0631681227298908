//! Replicated document types.
//!
//! Three entity kinds, each a schema-complete document with a
//! client-generated id so creation works offline. Unknown remote fields are
//! dropped at deserialization; missing optional fields take their defaults.
//! A freshly constructed document is valid and pushable with no extra
//! finalize step.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::stamp::Stamp;

/// Client-generated document identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(Uuid);

impl DocId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        DocId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocId {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(raw).map(DocId).map_err(|e| CoreError::InvalidId {
            raw: raw.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Owning user identifier; every remote read and write is scoped by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new(raw: Uuid) -> Self {
        UserId(raw)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectKind {
    #[default]
    List,
    Board,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[default]
    Task,
    Note,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleStyle {
    #[default]
    Plain,
    Heading,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: DocId,
    pub user_id: UserId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub sort_order: f64,
    #[serde(default)]
    pub is_highlighted: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub kind: ProjectKind,
    #[serde(default)]
    pub parent_project_id: Option<DocId>,
    #[serde(default)]
    pub slug: Option<String>,
    pub created_at: Stamp,
    pub updated_at: Stamp,
}

impl Project {
    pub fn new(user_id: UserId, title: impl Into<String>) -> Self {
        let now = Stamp::now();
        Project {
            id: DocId::new(),
            user_id,
            title: title.into(),
            color: String::new(),
            sort_order: 0.0,
            is_highlighted: false,
            is_deleted: false,
            is_disabled: false,
            kind: ProjectKind::default(),
            parent_project_id: None,
            slug: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Stamp::now_after(self.updated_at);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: DocId,
    #[serde(default)]
    pub title: String,
    pub project_id: DocId,
    #[serde(default)]
    pub sort_order: f64,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: Stamp,
    pub updated_at: Stamp,
}

impl Folder {
    pub fn new(project_id: DocId, title: impl Into<String>) -> Self {
        let now = Stamp::now();
        Folder {
            id: DocId::new(),
            title: title.into(),
            project_id,
            sort_order: 0.0,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Stamp::now_after(self.updated_at);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: DocId,
    pub user_id: UserId,
    #[serde(default)]
    pub content: String,
    /// Absent means an inbox task.
    #[serde(default)]
    pub folder_id: Option<DocId>,
    #[serde(default)]
    pub sort_order: f64,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub kind: TaskKind,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub title_style: TitleStyle,
    #[serde(default)]
    pub is_today: bool,
    #[serde(default)]
    pub group_id: Option<DocId>,
    #[serde(default)]
    pub is_closed: bool,
    pub created_at: Stamp,
    pub updated_at: Stamp,
}

impl Task {
    pub fn new(user_id: UserId, content: impl Into<String>) -> Self {
        let now = Stamp::now();
        Task {
            id: DocId::new(),
            user_id,
            content: content.into(),
            folder_id: None,
            sort_order: 0.0,
            is_completed: false,
            is_deleted: false,
            kind: TaskKind::default(),
            notes: String::new(),
            title_style: TitleStyle::default(),
            is_today: false,
            group_id: None,
            is_closed: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Stamp::now_after(self.updated_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_schema_complete() {
        let user = UserId::new(Uuid::from_bytes([1u8; 16]));
        let task = Task::new(user, "buy milk");

        assert_eq!(task.created_at, task.updated_at);
        assert!(task.folder_id.is_none(), "new tasks land in the inbox");

        // Serialize and parse back: nothing missing, nothing extra needed.
        let value = serde_json::to_value(&task).unwrap();
        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn touch_advances_updated_at() {
        let user = UserId::new(Uuid::from_bytes([2u8; 16]));
        let mut project = Project::new(user, "home");
        let before = project.updated_at;
        project.touch();
        assert!(project.updated_at > before);
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let raw = serde_json::json!({
            "id": "8f14e45f-ceea-4b7a-9a1c-000000000001",
            "user_id": "8f14e45f-ceea-4b7a-9a1c-000000000002",
            "project_id": "8f14e45f-ceea-4b7a-9a1c-000000000003",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
        });
        let folder: Folder = serde_json::from_value(raw).unwrap();
        assert_eq!(folder.title, "");
        assert!(!folder.is_deleted);
    }

    #[test]
    fn doc_id_parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<DocId>().is_err());
    }
}
