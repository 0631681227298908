//! Pure domain layer for the Tidemark replication engine.
//!
//! Documents, collections with versioned field allow-lists, replication
//! stamps and checkpoints. No I/O lives here.

#![forbid(unsafe_code)]

pub mod checkpoint;
pub mod collection;
pub mod doc;
pub mod error;
pub mod stamp;

pub use checkpoint::Checkpoint;
pub use collection::Collection;
pub use doc::{DocId, Folder, Project, ProjectKind, Task, TaskKind, TitleStyle, UserId};
pub use error::{CoreError, Transience};
pub use stamp::Stamp;
