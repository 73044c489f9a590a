// errors.rs — error taxonomy consumed/raised by the trade-management core.
//
// Mirrors the retry policy described for the exchange adapter: transient
// failures are retried by the caller, everything else is either fatal to
// the in-flight order or treated as an idempotent success.

use std::fmt;

#[derive(Debug, Clone)]
pub enum EngineError {
    /// Network error, rate-limit, or 5xx. Retried with fixed backoff up to
    /// the configured budget; the tick continues once the budget is spent.
    Transient(String),
    /// Bad precision, qty below minimum, unknown symbol. Fatal to the
    /// in-flight order only — logged and skipped, the next tick replans.
    InvalidArgument(String),
    /// Position reported missing, order reported unknown during cancel.
    /// Treated as idempotent success; the reconciler re-reads live state.
    StateMismatch(String),
    /// Exchange reports "in settlement / in delivery". Waits a fixed 10s
    /// and retries until accepted; does NOT count against the retry budget.
    InSettlement,
    /// "Insufficient close amount" — short 5s backoff and retry; the
    /// position may already be closed by the next tick.
    InsufficientCloseAmount,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Transient(s) => write!(f, "transient error: {s}"),
            EngineError::InvalidArgument(s) => write!(f, "invalid argument: {s}"),
            EngineError::StateMismatch(s) => write!(f, "state mismatch: {s}"),
            EngineError::InSettlement => write!(f, "exchange in settlement/delivery"),
            EngineError::InsufficientCloseAmount => write!(f, "insufficient close amount"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Whether this error is eligible for the general retry budget.
    /// `InSettlement` has its own unlimited fixed-delay wait and is
    /// excluded.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Transient(_)
                | EngineError::StateMismatch(_)
                | EngineError::InsufficientCloseAmount
        )
    }

    /// `fixed_delay_ms` is the configured retry delay (`retry_fixed_delay_ms`,
    /// matching a fixed-delay `retry_api_call(..., delay=10)` loop);
    /// `InSettlement` and `InsufficientCloseAmount` override it with their
    /// own fixed waits.
    pub fn backoff(&self, fixed_delay_ms: u64) -> std::time::Duration {
        match self {
            EngineError::Transient(_) | EngineError::StateMismatch(_) => {
                std::time::Duration::from_millis(fixed_delay_ms)
            }
            EngineError::InSettlement => std::time::Duration::from_secs(10),
            EngineError::InsufficientCloseAmount => std::time::Duration::from_secs(5),
            EngineError::InvalidArgument(_) => std::time::Duration::ZERO,
        }
    }
}
