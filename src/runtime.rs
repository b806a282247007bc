//! Composition root: owns the shared components and wires a chat message
//! through classify → orchestrate → summarize.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chat::ChatAgent;
use crate::client::AssistantClient;
use crate::config::RumpbotConfig;
use crate::events::{InvocationSink, StatusEmitter};
use crate::invocations::InvocationLog;
use crate::invoker::CliInvoker;
use crate::memory::MemoryStore;
use crate::orchestrator::{ExecuteRequest, Orchestrator};
use crate::registry::AgentRegistry;
use crate::session::SessionStore;
use crate::types::{NoteSource, OrchestratorSummary};

/// What a handled message produced.
pub struct MessageOutcome {
    pub chat_text: String,
    /// Present when the message carried a work request that was orchestrated.
    pub summary: Option<OrchestratorSummary>,
}

/// The assembled runtime. One instance per process; the registry inside it
/// is the process-wide agent directory.
pub struct Runtime {
    config: Arc<RumpbotConfig>,
    registry: Arc<AgentRegistry>,
    sessions: Arc<SessionStore>,
    memory: Arc<MemoryStore>,
    invocations: Arc<InvocationLog>,
    client: Arc<dyn AssistantClient>,
}

impl Runtime {
    /// Build against the real assistant CLI.
    pub async fn new(config: RumpbotConfig) -> Result<Self> {
        let config = Arc::new(config);
        let client: Arc<dyn AssistantClient> = Arc::new(CliInvoker::new(config.clone()));
        Runtime::with_client(config, client).await
    }

    /// Build with an explicit client (tests inject scripted assistants).
    pub async fn with_client(
        config: Arc<RumpbotConfig>,
        client: Arc<dyn AssistantClient>,
    ) -> Result<Self> {
        let sessions = Arc::new(SessionStore::load(config.sessions_path()).await?);
        let memory = Arc::new(MemoryStore::load(config.memory_path()).await?);
        let invocations = Arc::new(InvocationLog::new(config.invocations_path()));
        let registry = Arc::new(AgentRegistry::new(config.output_buffer_bytes));
        Ok(Runtime {
            config,
            registry,
            sessions,
            memory,
            invocations,
            client,
        })
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn invocation_log(&self) -> &Arc<InvocationLog> {
        &self.invocations
    }

    fn invocation_sink(&self) -> InvocationSink {
        let log = self.invocations.clone();
        InvocationSink::new(Arc::new(move |record| {
            if let Err(e) = log.append(&record) {
                warn!(error = %e, "failed to persist invocation record");
            }
        }))
    }

    /// Run one chat message through the full pipeline.
    pub async fn handle_message(
        &self,
        chat_id: &str,
        text: &str,
        cwd: &Path,
        status: StatusEmitter,
        cancel: CancellationToken,
    ) -> Result<MessageOutcome> {
        let sink = self.invocation_sink();
        let chat_agent = ChatAgent::new(
            self.client.clone(),
            self.config.clone(),
            self.sessions.clone(),
            self.memory.clone(),
        );
        let reply = chat_agent
            .handle(chat_id, text, cwd, cancel.clone(), &sink)
            .await?;

        if let Some(note) = &reply.memory_note {
            info!(chat_id, "storing memory note");
            if self.memory.add(chat_id, note, NoteSource::Auto).await.is_some() {
                if let Err(e) = self.memory.save().await {
                    warn!(error = %e, "failed to persist memory");
                }
            }
        }

        let Some(request) = reply.work_request else {
            return Ok(MessageOutcome {
                chat_text: reply.chat_text,
                summary: None,
            });
        };

        // At most one orchestration per chat may be planning or executing.
        if self.registry.active_orchestrator(chat_id).is_some() {
            return Ok(MessageOutcome {
                chat_text: format!(
                    "{}\n\nWork is already running for this chat; send the new request again once it finishes.",
                    reply.chat_text
                ),
                summary: None,
            });
        }

        info!(chat_id, task = %request.task, "starting orchestration");
        let orchestrator = Orchestrator::new(
            self.client.clone(),
            self.registry.clone(),
            self.config.clone(),
        );
        let summary = orchestrator
            .execute(
                ExecuteRequest {
                    chat_id: chat_id.to_string(),
                    request,
                    cwd: cwd.to_path_buf(),
                    cancel,
                },
                &status,
                &sink,
            )
            .await;

        Ok(MessageOutcome {
            chat_text: reply.chat_text,
            summary: Some(summary),
        })
    }

    /// Cancel exactly one running worker by its 1-based number.
    pub fn kill_worker(&self, chat_id: &str, worker_number: usize) -> bool {
        let Some(orchestrator) = self.registry.active_orchestrator(chat_id) else {
            return false;
        };
        let Some(worker) = self.registry.worker_by_number(orchestrator.id, worker_number) else {
            return false;
        };
        self.registry.cancel(worker.id)
    }

    /// Ask the running orchestrator to re-run one worker.
    pub fn retry_worker(&self, chat_id: &str, worker_number: usize) -> bool {
        let Some(orchestrator) = self.registry.active_orchestrator(chat_id) else {
            return false;
        };
        self.registry.request_retry(orchestrator.id, worker_number)
    }
}
