//! SQLite-backed task storage for TaskFlow.
//!
//! This crate is the record store gateway: every read and write goes through
//! a parameterized statement scoped by the owning principal. No caller can
//! reach another user's tasks through this interface, regardless of what
//! identifiers it supplies — ownership is part of every WHERE clause.
//!
//! # Example
//!
//! ```no_run
//! use store::{NewTask, Priority, TaskStore};
//!
//! let store = TaskStore::open("tasks.db")?;
//! let task = store.insert("user-1", NewTask::new("Call the dentist").priority(Priority::High))?;
//! let tasks = store.list("user-1", &Default::default())?;
//! assert_eq!(tasks[0].id, task.id);
//! # Ok::<(), store::Error>(())
//! ```

mod error;
mod store;
mod task;

pub use error::{Error, Result};
pub use store::{TaskFilter, TaskPatch, TaskStore};
pub use task::{NewTask, Priority, Status, Task};
