//! Rumpbot - a multi-tier agent orchestration runtime bridging a chat surface
//! to an external AI coding assistant CLI.
//!
//! A user message flows chat agent → orchestrator → supervised workers →
//! summary. Each tier is a separate invocation of the assistant CLI with its
//! own model, turn cap, and timeout.
//!
//! # Modules
//!
//! - `chat`: intent classification and action/memory block extraction
//! - `client`: the assistant-client seam (trait + call/response types)
//! - `config`: configuration loading and orchestration tunables
//! - `events`: status/invocation/activity/output effect channels
//! - `invocations`: append-only invocation log with aggregate reads
//! - `invoker`: assistant CLI process spawning and output normalization
//! - `memory`: durable per-chat notes and the memory context prefix
//! - `orchestrator`: plan, schedule, supervise, aggregate, summarize
//! - `registry`: process-wide directory of running agents
//! - `runtime`: composition root wiring a message through the tiers
//! - `session`: per-(chat, tier) session handles
//! - `types`: shared data model

pub mod chat;
pub mod client;
pub mod config;
pub mod events;
pub mod invocations;
pub mod invoker;
pub mod memory;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod types;
