//! Dependency-ordered scheduling for parallel plans.

use std::collections::HashSet;

use crate::types::WorkerTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug)]
struct ScheduledTask {
    task: WorkerTask,
    /// 1-based position in the plan.
    number: usize,
    state: TaskState,
}

/// Resolves which workers are ready to run based on their `depends_on`
/// relationships. Failed workers poison their transitive dependents, which
/// get skipped rather than run against missing inputs.
pub struct WorkerScheduler {
    tasks: Vec<ScheduledTask>,
}

impl WorkerScheduler {
    pub fn new(tasks: &[WorkerTask]) -> Self {
        let scheduled = tasks
            .iter()
            .enumerate()
            .map(|(i, task)| ScheduledTask {
                task: task.clone(),
                number: i + 1,
                state: TaskState::Pending,
            })
            .collect();
        Self { tasks: scheduled }
    }

    /// Pending workers whose dependencies have all settled. Returns
    /// `(number, task)` pairs in plan order.
    pub fn ready(&self) -> Vec<(usize, WorkerTask)> {
        self.tasks
            .iter()
            .filter(|st| st.state == TaskState::Pending && self.deps_settled(&st.task))
            .map(|st| (st.number, st.task.clone()))
            .collect()
    }

    fn deps_settled(&self, task: &WorkerTask) -> bool {
        task.depends_on.iter().all(|dep| {
            self.tasks
                .iter()
                .find(|st| st.task.id == *dep)
                .map(|st| st.state == TaskState::Completed)
                // An id that names no worker (e.g. one lost to the plan cap)
                // can never settle; the deadlock check reports it.
                .unwrap_or(false)
        })
    }

    pub fn mark_running(&mut self, id: &str) {
        self.set_state(id, TaskState::Running);
    }

    pub fn mark_completed(&mut self, id: &str) {
        self.set_state(id, TaskState::Completed);
    }

    pub fn mark_failed(&mut self, id: &str) {
        self.set_state(id, TaskState::Failed);
    }

    fn set_state(&mut self, id: &str, state: TaskState) {
        if let Some(st) = self.tasks.iter_mut().find(|st| st.task.id == id) {
            st.state = state;
        }
    }

    /// Skip every pending worker that transitively depends on `id`.
    /// Returns the skipped ids in plan order.
    pub fn skip_dependents_of(&mut self, id: &str) -> Vec<String> {
        let mut poisoned: HashSet<String> = HashSet::new();
        poisoned.insert(id.to_string());

        // Plans are position-ordered, so one forward sweep reaches the
        // whole transitive closure.
        let mut skipped = Vec::new();
        for st in &mut self.tasks {
            if st.state != TaskState::Pending {
                continue;
            }
            if st.task.depends_on.iter().any(|d| poisoned.contains(d)) {
                poisoned.insert(st.task.id.clone());
                st.state = TaskState::Skipped;
                skipped.push(st.task.id.clone());
            }
        }
        skipped
    }

    pub fn has_pending(&self) -> bool {
        self.tasks.iter().any(|st| st.state == TaskState::Pending)
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|st| st.state == TaskState::Pending)
            .map(|st| st.task.id.clone())
            .collect()
    }
}
