use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// TaskKind selects the handler which runs a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    MarketAnalysis,
    AutoTrade,
    Forecast,
}

impl TaskKind {
    /// The registered queue handler name for this kind.
    pub fn handler_name(&self) -> &'static str {
        match self {
            TaskKind::MarketAnalysis => "task:market_analysis",
            TaskKind::AutoTrade => "task:auto_trade",
            TaskKind::Forecast => "task:forecast",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// One named step of a task's plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    pub name: String,
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_completed: false,
            completed_at: None,
        }
    }
}

/// The task record as persisted by the external task store.
///
/// `current_step` is always the count of completed entries in `steps`; the
/// store recomputes it on every step completion rather than trusting callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub current_step: u32,
    pub total_steps: u32,
    pub steps: Vec<TaskStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_file_url: Option<String>,
}

impl TaskRecord {
    pub fn new(
        id: impl Into<String>,
        user_id: Option<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: Priority,
        step_names: &[&str],
    ) -> Self {
        let steps: Vec<TaskStep> = step_names.iter().map(|name| TaskStep::new(*name)).collect();
        Self {
            id: id.into(),
            user_id,
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            current_step: 0,
            total_steps: steps.len() as u32,
            steps,
            result_file_url: None,
        }
    }

    /// Mark the named step completed and recompute `current_step`.
    /// Completing an already-completed or unknown step is a no-op.
    pub fn complete_step(&mut self, name: &str) {
        let mut updated = false;
        for step in self.steps.iter_mut() {
            if step.name == name && !step.is_completed {
                step.is_completed = true;
                step.completed_at = Some(Utc::now());
                updated = true;
            }
        }
        if updated {
            self.current_step = self.steps.iter().filter(|s| s.is_completed).count() as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_completion_recomputes_current_step() {
        let mut task = TaskRecord::new(
            "t1",
            None,
            "EUR watch",
            "",
            Priority::Medium,
            &["Fetching Data", "Analyzing Markets"],
        );
        assert_eq!(task.current_step, 0);
        assert_eq!(task.total_steps, 2);

        task.complete_step("Analyzing Markets");
        assert_eq!(task.current_step, 1);

        // Completing the same step twice does not advance the count.
        task.complete_step("Analyzing Markets");
        assert_eq!(task.current_step, 1);

        // Unknown steps are ignored.
        task.complete_step("Mystery Step");
        assert_eq!(task.current_step, 1);

        task.complete_step("Fetching Data");
        assert_eq!(task.current_step, 2);
        assert_eq!(
            task.current_step,
            task.steps.iter().filter(|s| s.is_completed).count() as u32
        );
    }

    #[test]
    fn task_kind_round_trips_snake_case() {
        let kind: TaskKind = serde_json::from_str(r#""market_analysis""#).unwrap();
        assert_eq!(kind, TaskKind::MarketAnalysis);
        assert_eq!(
            serde_json::to_string(&TaskKind::AutoTrade).unwrap(),
            r#""auto_trade""#
        );
    }
}
