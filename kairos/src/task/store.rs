//! Task storage.
//!
//! Operations on a single task are serialized by the store; reads of
//! distinct tasks are independent. The in-memory implementation keeps a
//! per-task lock map guarded by one registry lock, so a mutation on one
//! task never blocks readers of another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::{Task, TaskState};
use crate::error::{Error, Result};

/// Filter for [`TaskStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListTasksFilter {
    /// Only tasks in this conversation.
    pub context_id: Option<String>,
    /// Only tasks in this state.
    pub status: Option<TaskState>,
    /// Only tasks updated at or after this instant.
    pub updated_after: Option<SystemTime>,
    /// Page size (default 50).
    pub page_size: Option<usize>,
    /// Opaque continuation token from a previous page.
    pub page_token: Option<String>,
}

/// One page of list results.
#[derive(Debug, Clone)]
pub struct TaskPage {
    /// Matching tasks, most recently updated first.
    pub tasks: Vec<Task>,
    /// Token for the next page, absent on the last page.
    pub next_page_token: Option<String>,
}

/// Storage seam for tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task.
    async fn insert(&self, task: Task) -> Result<()>;

    /// Fetch a task by id.
    async fn get(&self, id: &str) -> Result<Task>;

    /// Apply a mutation to a task under its lock and return the result.
    async fn update(
        &self,
        id: &str,
        mutate: Box<dyn for<'a> FnOnce(&'a mut Task) -> Result<()> + Send>,
    ) -> Result<Task>;

    /// List tasks matching a filter, paginated.
    async fn list(&self, filter: ListTasksFilter) -> Result<TaskPage>;
}

const DEFAULT_PAGE_SIZE: usize = 50;

/// In-memory task store.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Arc<Mutex<Task>>>>,
}

impl InMemoryTaskStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, id: &str) -> Result<Arc<Mutex<Task>>> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("task '{id}' does not exist")))
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(Error::invalid_input(format!(
                "task '{}' already exists",
                task.id
            )));
        }
        tasks.insert(task.id.clone(), Arc::new(Mutex::new(task)));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Task> {
        let entry = self.entry(id).await?;
        let task = entry.lock().await;
        Ok(task.clone())
    }

    async fn update(
        &self,
        id: &str,
        mutate: Box<dyn for<'a> FnOnce(&'a mut Task) -> Result<()> + Send>,
    ) -> Result<Task> {
        let entry = self.entry(id).await?;
        let mut task = entry.lock().await;
        mutate(&mut task)?;
        Ok(task.clone())
    }

    async fn list(&self, filter: ListTasksFilter) -> Result<TaskPage> {
        let tasks = self.tasks.read().await;
        let mut matched = Vec::new();
        for entry in tasks.values() {
            let task = entry.lock().await;
            if let Some(ref ctx) = filter.context_id {
                if task.context_id != *ctx {
                    continue;
                }
            }
            if let Some(status) = filter.status {
                if task.status.state != status {
                    continue;
                }
            }
            if let Some(after) = filter.updated_after {
                if task.updated_at < after {
                    continue;
                }
            }
            matched.push(task.clone());
        }
        drop(tasks);

        // Most recently updated first; id as a stable tie-break so
        // pagination tokens stay meaningful.
        matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));

        let page_size = filter.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        let start = match filter.page_token.as_deref() {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| Error::invalid_input(format!("malformed page token '{token}'")))?,
        };

        let page: Vec<Task> = matched.iter().skip(start).take(page_size).cloned().collect();
        let next = start + page.len();
        let next_page_token = (next < matched.len()).then(|| next.to_string());

        Ok(TaskPage {
            tasks: page,
            next_page_token,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn seeded(contexts: &[&str]) -> InMemoryTaskStore {
        let store = InMemoryTaskStore::new();
        for ctx in contexts {
            let task = Task::new(Some((*ctx).to_owned()));
            store.insert(task).await.unwrap();
            // Distinct updated_at stamps for a stable sort.
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        store
    }

    #[tokio::test]
    async fn insert_get_roundtrip() {
        let store = InMemoryTaskStore::new();
        let task = Task::new(None);
        let id = task.id.clone();
        store.insert(task).await.unwrap();

        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched.id, id);

        let err = store.get("missing").await.unwrap_err();
        assert!(err.is(crate::error::ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryTaskStore::new();
        let task = Task::new(None);
        store.insert(task.clone()).await.unwrap();
        assert!(store.insert(task).await.is_err());
    }

    #[tokio::test]
    async fn update_runs_under_the_task_lock() {
        let store = InMemoryTaskStore::new();
        let task = Task::new(None);
        let id = task.id.clone();
        store.insert(task).await.unwrap();

        let updated = store
            .update(
                &id,
                Box::new(|task| task.transition(TaskState::Working, None)),
            )
            .await
            .unwrap();
        assert_eq!(updated.status.state, TaskState::Working);
    }

    #[tokio::test]
    async fn list_filters_by_context_and_status() {
        let store = seeded(&["ctx-a", "ctx-a", "ctx-b"]).await;

        let page = store
            .list(ListTasksFilter {
                context_id: Some("ctx-a".into()),
                ..ListTasksFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.tasks.len(), 2);

        let page = store
            .list(ListTasksFilter {
                status: Some(TaskState::Working),
                ..ListTasksFilter::default()
            })
            .await
            .unwrap();
        assert!(page.tasks.is_empty());
    }

    #[tokio::test]
    async fn list_paginates_with_tokens() {
        let store = seeded(&["c", "c", "c", "c", "c"]).await;

        let first = store
            .list(ListTasksFilter {
                page_size: Some(2),
                ..ListTasksFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(first.tasks.len(), 2);
        let token = first.next_page_token.clone().unwrap();

        let second = store
            .list(ListTasksFilter {
                page_size: Some(2),
                page_token: Some(token),
                ..ListTasksFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(second.tasks.len(), 2);
        // No overlap between pages.
        for task in &second.tasks {
            assert!(first.tasks.iter().all(|t| t.id != task.id));
        }

        let third = store
            .list(ListTasksFilter {
                page_size: Some(2),
                page_token: second.next_page_token.clone(),
                ..ListTasksFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(third.tasks.len(), 1);
        assert!(third.next_page_token.is_none());
    }

    #[tokio::test]
    async fn list_filters_by_updated_after() {
        let store = InMemoryTaskStore::new();
        let old = Task::new(None);
        store.insert(old).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let cutoff = SystemTime::now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let recent = Task::new(None);
        let recent_id = recent.id.clone();
        store.insert(recent).await.unwrap();

        let page = store
            .list(ListTasksFilter {
                updated_after: Some(cutoff),
                ..ListTasksFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.tasks.len(), 1);
        assert_eq!(page.tasks[0].id, recent_id);
    }
}
