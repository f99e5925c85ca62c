//! The behavioral contract with the external task store, plus the in-memory
//! implementation used for demo wiring and tests. Status transitions are
//! linearized by the store; the core never orders them itself.

use chrono::Utc;
use models::{TaskRecord, TaskStatus};
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, record: TaskRecord) -> anyhow::Result<()>;

    async fn get(&self, id: &str) -> anyhow::Result<Option<TaskRecord>>;

    async fn list_for_user(&self, user_id: &str) -> anyhow::Result<Vec<TaskRecord>>;

    /// Transition a task's status, maintaining start/end times. Returns the
    /// updated record, or `None` for an unknown id.
    async fn set_status(&self, id: &str, status: TaskStatus) -> anyhow::Result<Option<TaskRecord>>;

    /// Mark the named step completed; `current_step` is recomputed by the
    /// store, never trusted from the caller.
    async fn complete_step(&self, id: &str, step_name: &str) -> anyhow::Result<()>;

    async fn set_result_url(&self, id: &str, url: &str) -> anyhow::Result<()>;

    async fn delete(&self, id: &str) -> anyhow::Result<bool>;
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<String, TaskRecord>>,
}

#[async_trait::async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, record: TaskRecord) -> anyhow::Result<()> {
        self.tasks.lock().unwrap().insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<TaskRecord>> {
        Ok(self.tasks.lock().unwrap().get(id).cloned())
    }

    async fn list_for_user(&self, user_id: &str) -> anyhow::Result<Vec<TaskRecord>> {
        let mut tasks: Vec<TaskRecord> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|task| task.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn set_status(&self, id: &str, status: TaskStatus) -> anyhow::Result<Option<TaskRecord>> {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(task) = tasks.get_mut(id) else {
            return Ok(None);
        };
        task.status = status;
        match status {
            TaskStatus::Running => {
                if task.start_time.is_none() {
                    task.start_time = Some(Utc::now());
                }
            }
            TaskStatus::Completed | TaskStatus::Failed => {
                task.end_time = Some(Utc::now());
            }
            TaskStatus::Pending | TaskStatus::Paused => {}
        }
        Ok(Some(task.clone()))
    }

    async fn complete_step(&self, id: &str, step_name: &str) -> anyhow::Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(id) {
            task.complete_step(step_name);
        }
        Ok(())
    }

    async fn set_result_url(&self, id: &str, url: &str) -> anyhow::Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(id) {
            task.result_file_url = Some(url.to_string());
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.tasks.lock().unwrap().remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::Priority;

    #[tokio::test]
    async fn status_transitions_maintain_timestamps() {
        let store = InMemoryTaskStore::default();
        let record = TaskRecord::new(
            "t1",
            Some("user-1".to_string()),
            "title",
            "",
            Priority::Medium,
            &["a", "b"],
        );
        store.insert(record).await.unwrap();

        let running = store
            .set_status("t1", TaskStatus::Running)
            .await
            .unwrap()
            .unwrap();
        assert!(running.start_time.is_some());
        assert!(running.end_time.is_none());

        store.complete_step("t1", "a").await.unwrap();
        let completed = store
            .set_status("t1", TaskStatus::Completed)
            .await
            .unwrap()
            .unwrap();
        assert!(completed.end_time.is_some());
        assert_eq!(completed.current_step, 1);

        assert!(store.set_status("nope", TaskStatus::Failed).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_is_scoped_to_the_user() {
        let store = InMemoryTaskStore::default();
        for (id, user) in [("t1", "alice"), ("t2", "bob"), ("t3", "alice")] {
            store
                .insert(TaskRecord::new(
                    id,
                    Some(user.to_string()),
                    "t",
                    "",
                    Priority::Low,
                    &[],
                ))
                .await
                .unwrap();
        }
        let alice = store.list_for_user("alice").await.unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|t| t.user_id.as_deref() == Some("alice")));

        assert!(store.delete("t2").await.unwrap());
        assert!(!store.delete("t2").await.unwrap());
    }
}
