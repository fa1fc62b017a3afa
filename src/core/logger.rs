//! Logger capability handed to the update orchestrator.
//!
//! The pipeline itself logs through the `log` facade; the orchestrator's
//! user-facing lifecycle messages go through whatever logger the host
//! configured, which may also be a no-op.

use std::fmt;
use std::sync::Arc;

pub trait UpdateLogger: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
    fn debug(&self, _message: &str) {}
}

/// Forwards to the `log` facade under the `updatex` target
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacadeLogger;

impl UpdateLogger for LogFacadeLogger {
    fn info(&self, message: &str) {
        log::info!(target: "updatex", "{}", message);
    }

    fn warn(&self, message: &str) {
        log::warn!(target: "updatex", "{}", message);
    }

    fn error(&self, message: &str) {
        log::error!(target: "updatex", "{}", message);
    }

    fn debug(&self, message: &str) {
        log::debug!(target: "updatex", "{}", message);
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl UpdateLogger for NoopLogger {
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Cloneable, shareable logger slot for the configuration record
#[derive(Clone)]
pub struct LoggerHandle(Arc<dyn UpdateLogger>);

impl LoggerHandle {
    pub fn new(logger: impl UpdateLogger + 'static) -> Self {
        Self(Arc::new(logger))
    }

    pub fn noop() -> Self {
        Self::new(NoopLogger)
    }
}

impl Default for LoggerHandle {
    fn default() -> Self {
        Self::new(LogFacadeLogger)
    }
}

impl std::ops::Deref for LoggerHandle {
    type Target = dyn UpdateLogger;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for LoggerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LoggerHandle")
    }
}
