//! Effect channels between the engine and its caller.
//!
//! Status updates, invocation records, worker activity and worker output are
//! independent sinks. Each is invoked synchronously and must not block.

use std::sync::Arc;

use crate::types::{InvocationRecord, StatusKind, StatusUpdate};

pub type StatusFn = Arc<dyn Fn(StatusUpdate) + Send + Sync>;
pub type InvocationFn = Arc<dyn Fn(InvocationRecord) + Send + Sync>;
pub type ActivityFn = Arc<dyn Fn() + Send + Sync>;
pub type OutputFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Pushes status updates to the chat surface.
#[derive(Clone)]
pub struct StatusEmitter {
    sink: StatusFn,
}

impl StatusEmitter {
    pub fn new(sink: StatusFn) -> Self {
        StatusEmitter { sink }
    }

    /// Emitter that drops everything. Handy for tests and CLI one-shots.
    pub fn noop() -> Self {
        StatusEmitter {
            sink: Arc::new(|_| {}),
        }
    }

    pub fn emit(&self, update: StatusUpdate) {
        (self.sink)(update);
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(StatusUpdate::status(message));
    }

    pub fn important(&self, message: impl Into<String>) {
        self.emit(StatusUpdate::important(message));
    }

    pub fn progress(&self, message: impl Into<String>, progress: impl Into<String>) {
        self.emit(StatusUpdate {
            progress: Some(progress.into()),
            ..StatusUpdate::status(message)
        });
    }

    pub fn plan_breakdown(&self, message: impl Into<String>) {
        self.emit(StatusUpdate {
            kind: StatusKind::PlanBreakdown,
            important: true,
            ..StatusUpdate::status(message)
        });
    }

    pub fn worker_complete(&self, message: impl Into<String>, progress: impl Into<String>) {
        self.emit(StatusUpdate {
            kind: StatusKind::WorkerComplete,
            progress: Some(progress.into()),
            ..StatusUpdate::status(message)
        });
    }
}

/// Receives one record per assistant call.
#[derive(Clone)]
pub struct InvocationSink {
    sink: InvocationFn,
}

impl InvocationSink {
    pub fn new(sink: InvocationFn) -> Self {
        InvocationSink { sink }
    }

    pub fn noop() -> Self {
        InvocationSink {
            sink: Arc::new(|_| {}),
        }
    }

    pub fn record(&self, record: InvocationRecord) {
        (self.sink)(record);
    }
}
