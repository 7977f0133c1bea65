//! Error taxonomy for the ingestion and intelligence pipeline.
//!
//! Every fallible boundary in the crate (adapter fetch/transform/validate,
//! bus handlers, the resolver, scorers) classifies its failures into one of
//! the kinds below so callers can decide retry-vs-drop-vs-DLQ without
//! re-deriving that policy at every call site.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed adapter record, missing required canonical field.
    /// Recovered at the single event: drop + log + increment `failed`.
    BadInput,
    /// Rate limited / network / 5xx / timeout. Retried with backoff.
    Transient,
    /// 4xx (non-rate) / schema change upstream. Not retried.
    Permanent,
    /// Duplicate by id or URL-in-window. Counted separately from failures.
    Duplicate,
    /// Column store / queue / LLM endpoint unreachable. Handler retried,
    /// DLQ after the retry budget is exhausted.
    DependencyUnavailable,
    /// Normalized scalar out of range, category outside the closed set.
    /// Fails `validate`; the event is dropped and logged.
    InvariantViolation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::BadInput => "bad_input",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::DependencyUnavailable => "dependency_unavailable",
            ErrorKind::InvariantViolation => "invariant_violation",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug)]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadInput, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate, message)
    }

    pub fn dependency_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyUnavailable, message)
    }

    pub fn invariant_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvariantViolation, message)
    }

    /// Transient and dependency-unavailable errors are retryable; everything
    /// else is terminal for the current message/record.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Transient | ErrorKind::DependencyUnavailable
        )
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Per-run outcome tallies surfaced to callers of ingestion/analysis (§7).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunOutcome {
    pub created: u64,
    pub skipped: u64,
    pub failed: u64,
    pub duplicates: u64,
}

impl RunOutcome {
    pub fn record(&mut self, result: &PipelineResult<()>) {
        match result {
            Ok(()) => self.created += 1,
            Err(e) if e.kind == ErrorKind::Duplicate => self.duplicates += 1,
            Err(e) if e.kind == ErrorKind::BadInput || e.kind == ErrorKind::InvariantViolation => {
                self.skipped += 1
            }
            Err(_) => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &RunOutcome) {
        self.created += other.created;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.duplicates += other.duplicates;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(PipelineError::transient("x").is_retryable());
        assert!(PipelineError::dependency_unavailable("x").is_retryable());
        assert!(!PipelineError::bad_input("x").is_retryable());
        assert!(!PipelineError::permanent("x").is_retryable());
        assert!(!PipelineError::duplicate("x").is_retryable());
        assert!(!PipelineError::invariant_violation("x").is_retryable());
    }

    #[test]
    fn run_outcome_tally() {
        let mut outcome = RunOutcome::default();
        outcome.record(&Ok(()));
        outcome.record(&Err(PipelineError::duplicate("dup")));
        outcome.record(&Err(PipelineError::bad_input("bad")));
        outcome.record(&Err(PipelineError::transient("timeout")));
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.failed, 1);
    }
}
