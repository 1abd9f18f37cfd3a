//! The five task-management tools.
//!
//! Each tool is a pure function of (validated arguments, principal) against
//! the task store, and every store call is scoped by the principal. Results
//! are prose summaries: the model reasons over text, not payloads, when it
//! produces its next turn.

use crate::model::ToolSpec;
use crate::tools::{ToolError, ToolRegistry};
use auth::Principal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use store::{NewTask, Priority, Status, Task, TaskFilter, TaskPatch, TaskStore};
use uuid::Uuid;

/// Task tools backed by the record store.
pub struct TaskTools {
    store: Arc<TaskStore>,
    specs: Vec<ToolSpec>,
}

#[derive(Debug, Deserialize)]
struct CreateArgs {
    title: String,
    description: Option<String>,
    priority: Option<Priority>,
    due_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ListArgs {
    status: Option<Status>,
    priority: Option<Priority>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct UpdateArgs {
    task_id: Option<String>,
    title_search: Option<String>,
    new_title: Option<String>,
    new_description: Option<String>,
    new_priority: Option<Priority>,
    new_status: Option<Status>,
    new_due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SelectArgs {
    task_id: Option<String>,
    title_search: Option<String>,
}

/// Outcome of resolving a task reference supplied by the model.
enum Lookup {
    Found(Task),
    NotFound(String),
    /// Several tasks matched; candidates are reported back so the model can
    /// ask the user which one they meant. Nothing is mutated.
    Ambiguous(Vec<String>),
}

impl TaskTools {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self {
            store,
            specs: build_specs(),
        }
    }

    fn create(&self, principal: &Principal, args: CreateArgs) -> Result<String, ToolError> {
        let mut new = NewTask::new(args.title);
        if let Some(description) = args.description {
            new = new.description(description);
        }
        if let Some(priority) = args.priority {
            new = new.priority(priority);
        }
        // A due date the model phrased badly is dropped rather than fatal.
        if let Some(due) = args.due_date.as_deref().and_then(parse_due_date) {
            new = new.due_date(due);
        }

        let task = self
            .store
            .insert(principal.as_str(), new)
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        Ok(format!(
            "Task created: \"{}\" (priority {}, status {}{}).",
            task.title,
            task.priority.as_str(),
            task.status.as_str(),
            task.due_date
                .map(|d| format!(", due {}", d.format("%Y-%m-%d")))
                .unwrap_or_default(),
        ))
    }

    fn list(&self, principal: &Principal, args: ListArgs) -> Result<String, ToolError> {
        let filter = TaskFilter {
            status: args.status,
            priority: args.priority,
            limit: args.limit,
        };
        let tasks = self
            .store
            .list(principal.as_str(), &filter)
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        if tasks.is_empty() {
            let mut scope = String::new();
            if let Some(status) = args.status {
                scope.push_str(&format!(" with status {}", status.as_str()));
            }
            if let Some(priority) = args.priority {
                scope.push_str(&format!(" with priority {}", priority.as_str()));
            }
            return Ok(format!("No tasks found{scope}."));
        }

        let mut lines = vec![format!("{} task(s):", tasks.len())];
        for task in &tasks {
            lines.push(format_task_line(task));
        }
        Ok(lines.join("\n"))
    }

    fn update(&self, principal: &Principal, args: UpdateArgs) -> Result<String, ToolError> {
        let patch = TaskPatch {
            title: args.new_title,
            description: args.new_description,
            priority: args.new_priority,
            status: args.new_status,
            due_date: args.new_due_date.as_deref().and_then(parse_due_date),
        };
        if patch.is_empty() {
            return Err(ToolError::InvalidArguments(
                "no changes requested; provide at least one new_* field".into(),
            ));
        }

        let task = match self.locate(principal, args.task_id.as_deref(), args.title_search.as_deref())? {
            Lookup::Found(task) => task,
            Lookup::NotFound(reference) => return Ok(not_found(&reference)),
            Lookup::Ambiguous(titles) => return Ok(clarification(&titles)),
        };

        let updated = self
            .store
            .update(principal.as_str(), task.id, &patch)
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        Ok(format!(
            "Task \"{}\" updated (priority {}, status {}).",
            updated.title,
            updated.priority.as_str(),
            updated.status.as_str(),
        ))
    }

    fn delete(&self, principal: &Principal, args: SelectArgs) -> Result<String, ToolError> {
        let task = match self.locate(principal, args.task_id.as_deref(), args.title_search.as_deref())? {
            Lookup::Found(task) => task,
            Lookup::NotFound(reference) => return Ok(not_found(&reference)),
            Lookup::Ambiguous(titles) => return Ok(clarification(&titles)),
        };

        let deleted = self
            .store
            .delete(principal.as_str(), task.id)
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        // The row can vanish between lookup and delete.
        if !deleted {
            return Ok(not_found(&task.title));
        }

        Ok(format!("Task \"{}\" deleted.", task.title))
    }

    fn complete(&self, principal: &Principal, args: SelectArgs) -> Result<String, ToolError> {
        let task = match self.locate(principal, args.task_id.as_deref(), args.title_search.as_deref())? {
            Lookup::Found(task) => task,
            Lookup::NotFound(reference) => return Ok(not_found(&reference)),
            Lookup::Ambiguous(titles) => return Ok(clarification(&titles)),
        };

        if task.status == Status::Completed {
            return Ok(format!("Task \"{}\" is already completed.", task.title));
        }

        let patch = TaskPatch {
            status: Some(Status::Completed),
            ..Default::default()
        };
        let updated = self
            .store
            .update(principal.as_str(), task.id, &patch)
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        Ok(format!("Task \"{}\" marked as completed.", updated.title))
    }

    /// Resolve a task reference by id or title search, scoped to the
    /// principal.
    fn locate(
        &self,
        principal: &Principal,
        task_id: Option<&str>,
        title_search: Option<&str>,
    ) -> Result<Lookup, ToolError> {
        if let Some(raw) = task_id {
            let Ok(id) = raw.parse::<Uuid>() else {
                return Ok(Lookup::NotFound(raw.to_string()));
            };
            return match self
                .store
                .find(principal.as_str(), id)
                .map_err(|e| ToolError::Execution(e.to_string()))?
            {
                Some(task) => Ok(Lookup::Found(task)),
                None => Ok(Lookup::NotFound(raw.to_string())),
            };
        }

        if let Some(needle) = title_search {
            let mut matches = self
                .store
                .search_title(principal.as_str(), needle)
                .map_err(|e| ToolError::Execution(e.to_string()))?;
            return Ok(match matches.len() {
                0 => Lookup::NotFound(needle.to_string()),
                1 => Lookup::Found(matches.remove(0)),
                _ => Lookup::Ambiguous(matches.into_iter().map(|t| t.title).collect()),
            });
        }

        Err(ToolError::InvalidArguments(
            "either task_id or title_search is required".into(),
        ))
    }
}

impl ToolRegistry for TaskTools {
    fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    async fn dispatch(
        &self,
        name: &str,
        arguments: Value,
        principal: &Principal,
    ) -> Result<String, ToolError> {
        match name {
            "create_task" => self.create(principal, parse_args(arguments)?),
            "list_tasks" => self.list(principal, parse_args(arguments)?),
            "update_task" => self.update(principal, parse_args(arguments)?),
            "delete_task" => self.delete(principal, parse_args(arguments)?),
            "complete_task" => self.complete(principal, parse_args(arguments)?),
            _ => Err(ToolError::UnknownTool(name.to_string())),
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

fn parse_due_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

fn format_task_line(task: &Task) -> String {
    let mut line = format!(
        "- \"{}\" [{}] priority {} (id {})",
        task.title,
        task.status.as_str(),
        task.priority.as_str(),
        task.id,
    );
    if let Some(due) = task.due_date {
        line.push_str(&format!(", due {}", due.format("%Y-%m-%d")));
    }
    if let Some(description) = &task.description {
        line.push_str(&format!(" — {description}"));
    }
    line
}

fn not_found(reference: &str) -> String {
    format!("No task found matching \"{reference}\". Use list_tasks to see existing tasks.")
}

fn clarification(titles: &[String]) -> String {
    let quoted: Vec<String> = titles.iter().map(|t| format!("\"{t}\"")).collect();
    format!(
        "Multiple tasks match: {}. Ask the user which one they meant before acting.",
        quoted.join(", "),
    )
}

fn build_specs() -> Vec<ToolSpec> {
    let priority_schema = json!({
        "type": "string",
        "enum": ["HIGH", "MEDIUM", "LOW"],
    });
    let status_schema = json!({
        "type": "string",
        "enum": ["PENDING", "IN_PROGRESS", "COMPLETED"],
    });

    vec![
        ToolSpec {
            name: "create_task".into(),
            description: "Create a new task. Extract the title from the user's message, plus \
                          description, priority (HIGH/MEDIUM/LOW), and due date if mentioned."
                .into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "title": {
                        "type": "string",
                        "description": "The task title (required)",
                    },
                    "description": {
                        "type": "string",
                        "description": "Optional detailed description",
                    },
                    "priority": priority_schema.clone(),
                    "due_date": {
                        "type": "string",
                        "description": "ISO 8601 date (e.g. 2026-02-01) if mentioned",
                    },
                },
                "required": ["title"],
            }),
        },
        ToolSpec {
            name: "list_tasks".into(),
            description: "List the user's tasks with optional status/priority filters. Use when \
                          the user asks to see their tasks or check what's pending."
                .into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "status": status_schema.clone(),
                    "priority": priority_schema.clone(),
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of tasks to return (default 20)",
                    },
                },
            }),
        },
        ToolSpec {
            name: "update_task".into(),
            description: "Update an existing task's details, located by task_id or by a title \
                          search."
                .into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "task_id": {
                        "type": "string",
                        "description": "The id of the task to update (if known)",
                    },
                    "title_search": {
                        "type": "string",
                        "description": "Find the task by title (if id not known)",
                    },
                    "new_title": { "type": "string" },
                    "new_description": { "type": "string" },
                    "new_priority": priority_schema.clone(),
                    "new_status": status_schema.clone(),
                    "new_due_date": {
                        "type": "string",
                        "description": "New due date (ISO 8601)",
                    },
                },
            }),
        },
        ToolSpec {
            name: "delete_task".into(),
            description: "Delete a task, located by task_id or by a title search.".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" },
                    "title_search": { "type": "string" },
                },
            }),
        },
        ToolSpec {
            name: "complete_task".into(),
            description: "Mark a task as completed. Use when the user says they finished \
                          something."
                .into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" },
                    "title_search": { "type": "string" },
                },
            }),
        },
    ]
}
