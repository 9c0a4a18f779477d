//! Query execution records and their state machine.
//!
//! ```text
//! Submitted -> Running -> Succeeded
//!     |           |-----> Failed
//!     |           '-----> Cancelled
//!     '-----------------> Cancelled
//! ```
//!
//! Terminal states never change again.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::id::QueryExecutionId;

/// State of one query execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    /// Accepted, waiting for a gateway slot.
    Submitted,
    /// Executing.
    Running,
    /// Results are available.
    Succeeded,
    /// The engine failed the query; the reason is the engine's message.
    Failed {
        /// Underlying error text.
        reason: String,
    },
    /// Stopped by the caller.
    Cancelled,
}

impl QueryState {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true for states that never change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. } | Self::Cancelled)
    }

    /// Returns true if moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Submitted, Self::Running | Self::Cancelled)
                | (
                    Self::Running,
                    Self::Succeeded | Self::Failed { .. } | Self::Cancelled
                )
        )
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One query as seen by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryExecution {
    /// Execution ID.
    pub query_id: QueryExecutionId,
    /// SQL text as submitted.
    pub sql: String,
    /// Workgroup the query ran in.
    pub workgroup: String,
    /// Default database for unqualified table names.
    pub database: String,
    /// Principal that submitted the query.
    pub owner: String,
    /// Current state.
    pub state: QueryState,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
    /// When a gateway slot was acquired.
    pub started_at: Option<DateTime<Utc>>,
    /// When the query reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// URI of the result artifact.
    pub output_location: String,
    /// Rows in the result, once succeeded.
    pub rows: Option<usize>,
}

impl QueryExecution {
    /// Moves to `next`, stamping start and completion times.
    ///
    /// Returns false (and changes nothing) for an illegal transition.
    pub fn transition(&mut self, next: QueryState) -> bool {
        if !self.state.can_transition_to(&next) {
            return false;
        }
        let now = Utc::now();
        if next == QueryState::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.state = next;
        true
    }

    /// Wall-clock time between start and completion.
    #[must_use]
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at?)
    }
}
