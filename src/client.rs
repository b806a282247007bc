//! The seam between the orchestration engine and the assistant CLI.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::events::{ActivityFn, OutputFn};
use crate::types::{ModelTokens, Tier};

/// One assistant call.
pub struct InvokeRequest {
    pub prompt: String,
    pub tier: Tier,
    pub max_turns: u32,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    /// Comma-separated allowed tools. `Some("")` disables all tools;
    /// `None` leaves the CLI's tool policy untouched.
    pub allowed_tools: Option<String>,
    pub resume_session: Option<String>,
    pub cwd: Option<PathBuf>,
    /// Call timeout. `None` means unlimited.
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
    pub on_activity: Option<ActivityFn>,
    pub on_output: Option<OutputFn>,
}

impl InvokeRequest {
    pub fn new(prompt: impl Into<String>, tier: Tier) -> Self {
        InvokeRequest {
            prompt: prompt.into(),
            tier,
            max_turns: 1,
            system_prompt: None,
            model: None,
            allowed_tools: None,
            resume_session: None,
            cwd: None,
            timeout: None,
            cancel: CancellationToken::new(),
            on_activity: None,
            on_output: None,
        }
    }
}

/// Normalized assistant response. `is_error` carries assistant-reported
/// failures (error subtypes); transport-level failures are `InvokeError`s.
#[derive(Debug, Clone, Default)]
pub struct InvokeResponse {
    pub text: String,
    pub is_error: bool,
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub duration_api_ms: Option<u64>,
    pub num_turns: Option<u64>,
    pub stop_reason: Option<String>,
    pub model_usage: HashMap<String, ModelTokens>,
    /// Explicit restart flag, on the rare structured responses that carry one.
    pub needs_restart: Option<bool>,
}

/// Transport-level call failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvokeError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("call cancelled")]
    Cancelled,

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("{0}")]
    Process(String),

    #[error("failed to spawn assistant: {0}")]
    Spawn(String),
}

pub type InvokeResult = Result<InvokeResponse, InvokeError>;

/// Anything that can answer an assistant call. Production uses the CLI
/// invoker; tests drive the engine with scripted fakes.
#[async_trait]
pub trait AssistantClient: Send + Sync {
    async fn invoke(&self, request: InvokeRequest) -> InvokeResult;
}
