//! SQLite task store implementation.

use crate::{Error, NewTask, Priority, Result, Status, Task};
use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Filter for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub limit: Option<u32>,
}

/// Partial update applied to a task. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<Status>,
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskPatch {
    /// Whether this patch changes anything.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.status.is_none()
            && self.due_date.is_none()
    }
}

/// SQLite-backed task store.
///
/// Every query is parameterized and filtered by the owning principal. The
/// owner column is the single enforcement point for record isolation.
pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    /// Open or create a task store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory task store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    // A poisoned lock only means another thread panicked mid-query; the
    // connection itself is still usable.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                priority TEXT NOT NULL,
                status TEXT NOT NULL,
                due_date TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_owner
                ON tasks(owner, created_at);
            "#,
        )?;
        Ok(())
    }

    /// Insert a new task owned by `owner`.
    pub fn insert(&self, owner: &str, new: NewTask) -> Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            title: new.title,
            description: new.description,
            priority: new.priority,
            status: Status::Pending,
            due_date: new.due_date,
            created_at: now,
            updated_at: now,
        };

        self.conn().execute(
            "INSERT INTO tasks (id, owner, title, description, priority, status, due_date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                task.id.to_string(),
                owner,
                task.title,
                task.description,
                task.priority.as_str(),
                task.status.as_str(),
                task.due_date.map(|d| d.to_rfc3339()),
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(task)
    }

    /// List `owner`'s tasks, newest first.
    pub fn list(&self, owner: &str, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut sql = String::from("SELECT * FROM tasks WHERE owner = ?1");
        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(owner.to_string())];

        if let Some(status) = filter.status {
            values.push(Box::new(status.as_str()));
            sql.push_str(&format!(" AND status = ?{}", values.len()));
        }
        if let Some(priority) = filter.priority {
            values.push(Box::new(priority.as_str()));
            sql.push_str(&format!(" AND priority = ?{}", values.len()));
        }

        values.push(Box::new(filter.limit.unwrap_or(20)));
        sql.push_str(&format!(" ORDER BY created_at DESC LIMIT ?{}", values.len()));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(params_from_iter(values.iter().map(|v| v.as_ref())), row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Find a task by id, scoped to `owner`.
    pub fn find(&self, owner: &str, id: Uuid) -> Result<Option<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1 AND owner = ?2")?;
        let mut rows = stmt.query_map(params![id.to_string(), owner], row_to_task)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Find `owner`'s tasks whose title contains `needle` (case-insensitive).
    pub fn search_title(&self, owner: &str, needle: &str) -> Result<Vec<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE owner = ?1 AND LOWER(title) LIKE LOWER(?2)
             ORDER BY created_at DESC",
        )?;
        let pattern = format!("%{needle}%");
        let tasks = stmt
            .query_map(params![owner, pattern], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Apply a patch to `owner`'s task, returning the updated row.
    pub fn update(&self, owner: &str, id: Uuid, patch: &TaskPatch) -> Result<Task> {
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(title) = &patch.title {
            values.push(Box::new(title.clone()));
            sets.push(format!("title = ?{}", values.len()));
        }
        if let Some(description) = &patch.description {
            values.push(Box::new(description.clone()));
            sets.push(format!("description = ?{}", values.len()));
        }
        if let Some(priority) = patch.priority {
            values.push(Box::new(priority.as_str()));
            sets.push(format!("priority = ?{}", values.len()));
        }
        if let Some(status) = patch.status {
            values.push(Box::new(status.as_str()));
            sets.push(format!("status = ?{}", values.len()));
        }
        if let Some(due_date) = patch.due_date {
            values.push(Box::new(due_date.to_rfc3339()));
            sets.push(format!("due_date = ?{}", values.len()));
        }

        values.push(Box::new(Utc::now().to_rfc3339()));
        sets.push(format!("updated_at = ?{}", values.len()));

        values.push(Box::new(id.to_string()));
        let id_pos = values.len();
        values.push(Box::new(owner.to_string()));
        let owner_pos = values.len();

        let sql = format!(
            "UPDATE tasks SET {} WHERE id = ?{id_pos} AND owner = ?{owner_pos}",
            sets.join(", "),
        );

        let changed = self
            .conn()
            .execute(&sql, params_from_iter(values.iter().map(|v| v.as_ref())))?;
        if changed == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        self.find(owner, id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Delete `owner`'s task. Returns whether a row was removed.
    pub fn delete(&self, owner: &str, id: Uuid) -> Result<bool> {
        let changed = self.conn().execute(
            "DELETE FROM tasks WHERE id = ?1 AND owner = ?2",
            params![id.to_string(), owner],
        )?;
        Ok(changed > 0)
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let id: String = row.get("id")?;
    let priority: String = row.get("priority")?;
    let status: String = row.get("status")?;
    let due_date: Option<String> = row.get("due_date")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Task {
        id: id.parse().unwrap_or_default(),
        title: row.get("title")?,
        description: row.get("description")?,
        priority: Priority::parse(&priority).unwrap_or(Priority::Medium),
        status: Status::parse(&status).unwrap_or(Status::Pending),
        due_date: due_date
            .and_then(|d| DateTime::parse_from_rfc3339(&d).ok())
            .map(|d| d.with_timezone(&Utc)),
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TaskStore {
        TaskStore::in_memory().unwrap()
    }

    #[test]
    fn insert_and_list() {
        let store = store();
        store.insert("alice", NewTask::new("Buy milk")).unwrap();
        store
            .insert("alice", NewTask::new("Call dentist").priority(Priority::High))
            .unwrap();

        let tasks = store.list("alice", &TaskFilter::default()).unwrap();
        assert_eq!(tasks.len(), 2);
    }

    #[test]
    fn list_with_filters() {
        let store = store();
        let t = store
            .insert("alice", NewTask::new("Urgent thing").priority(Priority::High))
            .unwrap();
        store.insert("alice", NewTask::new("Later thing")).unwrap();

        let high = store
            .list(
                "alice",
                &TaskFilter {
                    priority: Some(Priority::High),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].id, t.id);

        let completed = store
            .list(
                "alice",
                &TaskFilter {
                    status: Some(Status::Completed),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(completed.is_empty());
    }

    #[test]
    fn owner_isolation() {
        let store = store();
        let alices = store.insert("alice", NewTask::new("Private")).unwrap();

        // Bob cannot see, update, or delete Alice's task even with its id.
        assert!(store.list("bob", &TaskFilter::default()).unwrap().is_empty());
        assert!(store.find("bob", alices.id).unwrap().is_none());
        assert!(store
            .update(
                "bob",
                alices.id,
                &TaskPatch {
                    title: Some("stolen".into()),
                    ..Default::default()
                },
            )
            .is_err());
        assert!(!store.delete("bob", alices.id).unwrap());

        // And the task is untouched.
        let still = store.find("alice", alices.id).unwrap().unwrap();
        assert_eq!(still.title, "Private");
    }

    #[test]
    fn update_patch() {
        let store = store();
        let t = store.insert("alice", NewTask::new("Draft report")).unwrap();

        let updated = store
            .update(
                "alice",
                t.id,
                &TaskPatch {
                    status: Some(Status::Completed),
                    priority: Some(Priority::Low),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.status, Status::Completed);
        assert_eq!(updated.priority, Priority::Low);
        assert_eq!(updated.title, "Draft report");
    }

    #[test]
    fn search_title_case_insensitive() {
        let store = store();
        store.insert("alice", NewTask::new("Call the Dentist")).unwrap();
        store.insert("alice", NewTask::new("dentist follow-up")).unwrap();
        store.insert("alice", NewTask::new("Groceries")).unwrap();

        let hits = store.search_title("alice", "DENTIST").unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn delete_task() {
        let store = store();
        let t = store.insert("alice", NewTask::new("Temp")).unwrap();
        assert!(store.delete("alice", t.id).unwrap());
        assert!(!store.delete("alice", t.id).unwrap());
    }
}
