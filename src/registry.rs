//! In-memory directory of running agents.
//!
//! Shared across every orchestration in the process; the single instance is
//! constructed at the composition root and passed by reference. External
//! control (kill/retry a worker) goes through the handles stored here.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What an agent is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Orchestrator,
    Worker,
}

/// Lifecycle phase of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPhase {
    Planning,
    Executing,
    Summarizing,
    Complete,
}

/// Bounded ring holding the tail of a worker's output.
#[derive(Debug)]
pub struct OutputRing {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl OutputRing {
    pub fn new(capacity: usize) -> Self {
        OutputRing {
            buf: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        for &b in chunk.as_bytes() {
            if self.buf.len() == self.capacity {
                self.buf.pop_front();
            }
            self.buf.push_back(b);
        }
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.iter().copied().collect::<Vec<_>>()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

struct AgentEntry {
    id: u64,
    role: AgentRole,
    chat_id: String,
    description: String,
    phase: AgentPhase,
    parent_id: Option<u64>,
    worker_number: Option<usize>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    last_activity_at: DateTime<Utc>,
    success: Option<bool>,
    cost_usd: Option<f64>,
    task_prompt: Option<String>,
    task_description: Option<String>,
    progress: Option<String>,
    output: OutputRing,
}

/// Read-only view of a registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub id: u64,
    pub role: AgentRole,
    pub chat_id: String,
    pub description: String,
    pub phase: AgentPhase,
    pub parent_id: Option<u64>,
    pub worker_number: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub success: Option<bool>,
    pub cost_usd: Option<f64>,
    pub task_description: Option<String>,
    pub progress: Option<String>,
    pub output_tail: String,
}

impl AgentEntry {
    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            role: self.role,
            chat_id: self.chat_id.clone(),
            description: self.description.clone(),
            phase: self.phase,
            parent_id: self.parent_id,
            worker_number: self.worker_number,
            started_at: self.started_at,
            finished_at: self.finished_at,
            last_activity_at: self.last_activity_at,
            success: self.success,
            cost_usd: self.cost_usd,
            task_description: self.task_description.clone(),
            progress: self.progress.clone(),
            output_tail: self.output.contents(),
        }
    }
}

/// A request from outside the orchestration to re-run one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryRequest {
    pub worker_number: usize,
}

struct Inner {
    agents: HashMap<u64, AgentEntry>,
    cancel_handles: HashMap<u64, CancellationToken>,
    retry_channels: HashMap<u64, mpsc::UnboundedSender<RetryRequest>>,
}

/// Thread-safe agent directory with monotonic id generation.
pub struct AgentRegistry {
    next_id: AtomicU64,
    output_capacity: usize,
    inner: Mutex<Inner>,
}

impl AgentRegistry {
    pub fn new(output_capacity: usize) -> Self {
        AgentRegistry {
            next_id: AtomicU64::new(1),
            output_capacity,
            inner: Mutex::new(Inner {
                agents: HashMap::new(),
                cancel_handles: HashMap::new(),
                retry_channels: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("registry lock poisoned")
    }

    pub fn register_orchestrator(&self, chat_id: &str, description: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        self.lock().agents.insert(
            id,
            AgentEntry {
                id,
                role: AgentRole::Orchestrator,
                chat_id: chat_id.to_string(),
                description: description.to_string(),
                phase: AgentPhase::Planning,
                parent_id: None,
                worker_number: None,
                started_at: now,
                finished_at: None,
                last_activity_at: now,
                success: None,
                cost_usd: None,
                task_prompt: None,
                task_description: None,
                progress: None,
                output: OutputRing::new(self.output_capacity),
            },
        );
        id
    }

    pub fn register_worker(
        &self,
        chat_id: &str,
        parent_id: u64,
        worker_number: usize,
        description: &str,
        prompt: &str,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        self.lock().agents.insert(
            id,
            AgentEntry {
                id,
                role: AgentRole::Worker,
                chat_id: chat_id.to_string(),
                description: description.to_string(),
                phase: AgentPhase::Executing,
                parent_id: Some(parent_id),
                worker_number: Some(worker_number),
                started_at: now,
                finished_at: None,
                last_activity_at: now,
                success: None,
                cost_usd: None,
                task_prompt: Some(prompt.to_string()),
                task_description: Some(description.to_string()),
                progress: None,
                output: OutputRing::new(self.output_capacity),
            },
        );
        id
    }

    pub fn set_phase(&self, id: u64, phase: AgentPhase) {
        if let Some(entry) = self.lock().agents.get_mut(&id) {
            entry.phase = phase;
            entry.last_activity_at = Utc::now();
        }
    }

    pub fn set_progress(&self, id: u64, progress: &str) {
        if let Some(entry) = self.lock().agents.get_mut(&id) {
            entry.progress = Some(progress.to_string());
        }
    }

    pub fn set_description(&self, id: u64, description: &str) {
        if let Some(entry) = self.lock().agents.get_mut(&id) {
            entry.description = description.to_string();
        }
    }

    /// Refresh `last_activity_at`.
    pub fn touch(&self, id: u64) {
        if let Some(entry) = self.lock().agents.get_mut(&id) {
            entry.last_activity_at = Utc::now();
        }
    }

    pub fn complete(&self, id: u64, success: bool, cost_usd: Option<f64>) {
        let mut inner = self.lock();
        if let Some(entry) = inner.agents.get_mut(&id) {
            entry.phase = AgentPhase::Complete;
            entry.finished_at = Some(Utc::now());
            entry.success = Some(success);
            entry.cost_usd = cost_usd;
        }
        inner.cancel_handles.remove(&id);
        inner.retry_channels.remove(&id);
    }

    pub fn append_output(&self, id: u64, chunk: &str) {
        if let Some(entry) = self.lock().agents.get_mut(&id) {
            entry.output.push(chunk);
        }
    }

    pub fn snapshot(&self, id: u64) -> Option<AgentSnapshot> {
        self.lock().agents.get(&id).map(AgentEntry::snapshot)
    }

    pub fn list(&self) -> Vec<AgentSnapshot> {
        let inner = self.lock();
        let mut all: Vec<AgentSnapshot> = inner.agents.values().map(AgentEntry::snapshot).collect();
        all.sort_by_key(|a| a.id);
        all
    }

    /// The orchestrator currently planning/executing/summarizing for a chat.
    pub fn active_orchestrator(&self, chat_id: &str) -> Option<AgentSnapshot> {
        self.lock()
            .agents
            .values()
            .find(|e| {
                e.role == AgentRole::Orchestrator
                    && e.chat_id == chat_id
                    && e.phase != AgentPhase::Complete
            })
            .map(AgentEntry::snapshot)
    }

    /// Resolve a worker by its 1-based number. Retries register a fresh
    /// entry under the same number, so prefer a live entry, then the newest.
    pub fn worker_by_number(&self, parent_id: u64, worker_number: usize) -> Option<AgentSnapshot> {
        self.lock()
            .agents
            .values()
            .filter(|e| e.parent_id == Some(parent_id) && e.worker_number == Some(worker_number))
            .max_by_key(|e| (e.phase != AgentPhase::Complete, e.id))
            .map(AgentEntry::snapshot)
    }

    pub fn workers_of(&self, parent_id: u64) -> Vec<AgentSnapshot> {
        let inner = self.lock();
        let mut workers: Vec<AgentSnapshot> = inner
            .agents
            .values()
            .filter(|e| e.parent_id == Some(parent_id))
            .map(AgentEntry::snapshot)
            .collect();
        workers.sort_by_key(|a| a.id);
        workers
    }

    pub fn set_cancel_handle(&self, id: u64, token: CancellationToken) {
        self.lock().cancel_handles.insert(id, token);
    }

    pub fn cancel_handle(&self, id: u64) -> Option<CancellationToken> {
        self.lock().cancel_handles.get(&id).cloned()
    }

    pub fn remove_cancel_handle(&self, id: u64) {
        self.lock().cancel_handles.remove(&id);
    }

    /// Cancel one agent through its stored handle. Returns whether a live
    /// handle was found.
    pub fn cancel(&self, id: u64) -> bool {
        let handle = self.cancel_handle(id);
        match handle {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Register the channel an orchestrator drains for external retries.
    pub fn set_retry_channel(&self, id: u64, tx: mpsc::UnboundedSender<RetryRequest>) {
        self.lock().retry_channels.insert(id, tx);
    }

    /// Ask a running orchestrator to re-run one of its workers.
    pub fn request_retry(&self, orchestrator_id: u64, worker_number: usize) -> bool {
        let tx = self.lock().retry_channels.get(&orchestrator_id).cloned();
        match tx {
            Some(tx) => tx.send(RetryRequest { worker_number }).is_ok(),
            None => false,
        }
    }
}
