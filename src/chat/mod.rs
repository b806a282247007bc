//! Chat tier: intent classification and persona wrapper over the invoker.

pub mod blocks;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::client::{AssistantClient, InvokeRequest};
use crate::config::RumpbotConfig;
use crate::events::InvocationSink;
use crate::invocations::record_from_response;
use crate::memory::MemoryStore;
use crate::session::SessionStore;
use crate::types::{Tier, WorkRequest};

pub use blocks::{parse_reply, ParsedReply, PLACEHOLDER_TEXT};

/// The chat agent's answer to one user message.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub chat_text: String,
    pub work_request: Option<WorkRequest>,
    pub memory_note: Option<String>,
}

/// Classifies user messages and carries the bot persona. Work extraction and
/// memory capture ride on delimited blocks in the assistant's reply.
pub struct ChatAgent {
    client: Arc<dyn AssistantClient>,
    config: Arc<RumpbotConfig>,
    sessions: Arc<SessionStore>,
    memory: Arc<MemoryStore>,
}

impl ChatAgent {
    pub fn new(
        client: Arc<dyn AssistantClient>,
        config: Arc<RumpbotConfig>,
        sessions: Arc<SessionStore>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        ChatAgent {
            client,
            config,
            sessions,
            memory,
        }
    }

    /// Run one user message through the chat tier.
    pub async fn handle(
        &self,
        chat_id: &str,
        message: &str,
        cwd: &Path,
        cancel: CancellationToken,
        invocations: &InvocationSink,
    ) -> Result<ChatReply> {
        let prompt = match self.memory.context_block(chat_id).await {
            Some(block) => format!("{block}\n{message}"),
            None => message.to_string(),
        };

        let tier = self.config.tier(Tier::Chat);
        let mut request = InvokeRequest::new(prompt, Tier::Chat);
        request.max_turns = tier.max_turns;
        request.model = tier.model.clone();
        request.timeout = tier.timeout();
        request.system_prompt = self.config.persona.clone();
        request.cwd = Some(cwd.to_path_buf());
        request.cancel = cancel;
        request.resume_session = self.sessions.session_id(chat_id, Tier::Chat).await;

        let started = Instant::now();
        let response = self.client.invoke(request).await?;
        let wall_ms = started.elapsed().as_millis() as u64;

        invocations.record(record_from_response(chat_id, Tier::Chat, &response, wall_ms));

        if let Some(session_id) = &response.session_id {
            self.sessions
                .set(chat_id, session_id, &cwd.to_string_lossy(), Tier::Chat)
                .await;
            if let Err(e) = self.sessions.save().await {
                warn!(error = %e, "failed to persist sessions");
            }
        }

        let parsed = blocks::parse_reply(&response.text);
        Ok(ChatReply {
            chat_text: parsed.chat_text,
            work_request: parsed.work_request,
            memory_note: parsed.memory_note,
        })
    }
}
