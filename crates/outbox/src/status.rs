//! Aggregate saga status derived from outbox row statuses.

use serde::{Deserialize, Serialize};

use crate::OutboxStatus;

/// Status of a saga execution as seen through its outbox rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    InProgress,
    Completed,
    Failed,
}

impl SagaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::InProgress => "in_progress",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `(status, total, completed)` triple for one correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStatusSummary {
    pub status: SagaStatus,
    pub total: u64,
    pub completed: u64,
}

impl SagaStatusSummary {
    /// Computes the summary from row counts.
    ///
    /// Any failed row makes the saga failed. Otherwise the saga is completed
    /// only when it has at least one row and every row is processed.
    pub fn from_counts(total: u64, completed: u64, failed: u64) -> Self {
        let status = if failed > 0 {
            SagaStatus::Failed
        } else if total > 0 && completed == total {
            SagaStatus::Completed
        } else {
            SagaStatus::InProgress
        };
        Self {
            status,
            total,
            completed,
        }
    }

    pub fn from_statuses(statuses: impl IntoIterator<Item = OutboxStatus>) -> Self {
        let (mut total, mut completed, mut failed) = (0, 0, 0);
        for status in statuses {
            total += 1;
            match status {
                OutboxStatus::Processed => completed += 1,
                OutboxStatus::Failed => failed += 1,
                OutboxStatus::Pending | OutboxStatus::Processing => {}
            }
        }
        Self::from_counts(total, completed, failed)
    }
}
