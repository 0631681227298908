//! Collection registry: versioned field allow-lists and row projection.
//!
//! Each collection has a monotonically increasing schema version; the
//! allow-list of public fields is derived from the current version only.
//! Projection is the compiled replacement for per-row dynamic schema
//! filtering: retain allowed fields, then validate through the typed struct
//! so the canonical shape flows onward.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::doc::{DocId, Folder, Project, Task};
use crate::error::CoreError;
use crate::stamp::Stamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Projects,
    Folders,
    Tasks,
}

const PROJECT_FIELDS: &[&str] = &[
    "id",
    "user_id",
    "title",
    "color",
    "sort_order",
    "is_highlighted",
    "is_deleted",
    "is_disabled",
    "kind",
    "parent_project_id",
    "slug",
    "created_at",
    "updated_at",
];

const FOLDER_FIELDS: &[&str] = &[
    "id",
    "title",
    "project_id",
    "sort_order",
    "is_deleted",
    "created_at",
    "updated_at",
];

const TASK_FIELDS: &[&str] = &[
    "id",
    "user_id",
    "content",
    "folder_id",
    "sort_order",
    "is_completed",
    "is_deleted",
    "kind",
    "notes",
    "title_style",
    "is_today",
    "group_id",
    "is_closed",
    "created_at",
    "updated_at",
];

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Projects, Collection::Folders, Collection::Tasks];

    pub fn table(self) -> &'static str {
        match self {
            Collection::Projects => "projects",
            Collection::Folders => "folders",
            Collection::Tasks => "tasks",
        }
    }

    /// Current schema version. Structural migrations are not replicated;
    /// only the current version's field set matters for projection.
    pub fn schema_version(self) -> u32 {
        match self {
            Collection::Projects => 4,
            Collection::Folders => 2,
            Collection::Tasks => 7,
        }
    }

    pub fn allowed_fields(self) -> &'static [&'static str] {
        match self {
            Collection::Projects => PROJECT_FIELDS,
            Collection::Folders => FOLDER_FIELDS,
            Collection::Tasks => TASK_FIELDS,
        }
    }

    /// Project a remote row down to the locally-valid shape.
    ///
    /// Unknown/extra remote fields are dropped; the survivors must
    /// deserialize into the collection's typed document. The same path
    /// serves the pull pipeline, the realtime feed, and local inserts.
    pub fn project_row(self, row: &Value) -> Result<Value, CoreError> {
        let filtered = self.retain_allowed(row)?;
        match self {
            Collection::Projects => self.canonicalize::<Project>(filtered),
            Collection::Folders => self.canonicalize::<Folder>(filtered),
            Collection::Tasks => self.canonicalize::<Task>(filtered),
        }
    }

    /// Strip bookkeeping fields that are not part of the public schema
    /// before a document goes over the wire.
    pub fn strip_internal(self, doc: &Value) -> Value {
        match doc.as_object() {
            Some(fields) => {
                let allowed = self.allowed_fields();
                let kept: Map<String, Value> = fields
                    .iter()
                    .filter(|(key, _)| allowed.contains(&key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                Value::Object(kept)
            }
            None => doc.clone(),
        }
    }

    /// Read the document id out of a projected document.
    pub fn doc_id(doc: &Value) -> Result<DocId, CoreError> {
        let raw = doc
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::InvalidId {
                raw: String::new(),
                reason: "missing `id` field".to_string(),
            })?;
        raw.parse()
    }

    /// Read the replication stamp out of a projected document.
    pub fn doc_stamp(doc: &Value) -> Result<Stamp, CoreError> {
        let raw = doc
            .get("updated_at")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::InvalidStamp {
                raw: String::new(),
                reason: "missing `updated_at` field".to_string(),
            })?;
        Stamp::parse(raw)
    }

    fn retain_allowed(self, row: &Value) -> Result<Map<String, Value>, CoreError> {
        let fields = row.as_object().ok_or_else(|| CoreError::InvalidDocument {
            collection: self,
            reason: "row is not a JSON object".to_string(),
        })?;
        let allowed = self.allowed_fields();
        Ok(fields
            .iter()
            .filter(|(key, _)| allowed.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn canonicalize<T>(self, fields: Map<String, Value>) -> Result<Value, CoreError>
    where
        T: serde::de::DeserializeOwned + Serialize,
    {
        let doc: T =
            serde_json::from_value(Value::Object(fields)).map_err(|e| CoreError::InvalidDocument {
                collection: self,
                reason: e.to_string(),
            })?;
        serde_json::to_value(doc).map_err(|e| CoreError::InvalidDocument {
            collection: self,
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}
