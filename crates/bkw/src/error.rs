//! 💀 The errors callers actually branch on.
//!
//! Everything else travels as `anyhow::Error` with a context chain attached.
//! These two get a real type because "the cluster never answered" and "the
//! writer is already gone" deserve different reactions from whoever called us.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriterError {
    /// 📡 The health check ran out of attempts. Only reachable with a finite retry policy.
    #[error(
        "💀 Cannot connect to the store: gave up after {attempts} health check attempt(s). \
         Last thing it said: {last_error}"
    )]
    ConnectionExhausted { attempts: usize, last_error: String },

    /// 🗑️ The worker task has exited (closed, or every handle was dropped).
    #[error("💀 The bulk writer worker is gone. It was closed, and closed things stay closed.")]
    WorkerGone,
}
