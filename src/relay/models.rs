use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Applying,
    Applied,
    PartiallyApplied,
    Failed,
    Committed,
    Reverted,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Applying => "APPLYING",
            Self::Applied => "APPLIED",
            Self::PartiallyApplied => "PARTIALLYAPPLIED",
            Self::Failed => "FAILED",
            Self::Committed => "COMMITTED",
            Self::Reverted => "REVERTED",
        }
    }

    /// COMMITTED and REVERTED are display end-states; nothing leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Reverted)
    }

    /// Edges of the lifecycle state machine.
    ///
    /// ```text
    /// PENDING ──> APPLYING ──> APPLIED ──> COMMITTED
    ///    │            ├──────> PARTIALLYAPPLIED
    ///    │            └──────> FAILED
    ///    └─> REVERTED <── APPLIED | PARTIALLYAPPLIED
    /// ```
    ///
    /// The edges are owned by two callers. PENDING → APPLYING and every
    /// outcome edge belong to the simulation engine; see
    /// [`can_settle_to`](Self::can_settle_to). Commit and revert are
    /// administrative; see [`can_set_manually`](Self::can_set_manually).
    pub fn can_set_manually(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Applied, Committed) | (Pending | Applied | PartiallyApplied, Reverted)
        )
    }

    /// Outcome edges taken when a run settles from its file states.
    ///
    /// Re-applying failed files may lift FAILED or PARTIALLYAPPLIED to a
    /// better outcome, or leave it where it was.
    pub fn can_settle_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Applying, Applied | PartiallyApplied | Failed)
                | (Failed, Applied | PartiallyApplied | Failed)
                | (PartiallyApplied, Applied | PartiallyApplied)
        )
    }

    /// A reapply run may only start from a settled, non-final outcome.
    pub fn is_reapplicable(&self) -> bool {
        matches!(self, Self::Failed | Self::PartiallyApplied)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "APPLYING" => Ok(Self::Applying),
            "APPLIED" => Ok(Self::Applied),
            "PARTIALLYAPPLIED" => Ok(Self::PartiallyApplied),
            "FAILED" => Ok(Self::Failed),
            "COMMITTED" => Ok(Self::Committed),
            "REVERTED" => Ok(Self::Reverted),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

/// Per-file sub-state, only meaningful while a transaction is being applied.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileApplyStatus {
    #[default]
    Pending,
    Applying,
    Applied,
    Failed,
}

impl FileApplyStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }
}

impl fmt::Display for FileApplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Applying => "APPLYING",
            Self::Applied => "APPLIED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// The file-system operation a change performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Created,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFile {
    pub path: String,
    pub status: FileStatus,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub diff: String,
    #[serde(default)]
    pub apply_status: FileApplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// One narrative unit of a transaction, in display order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    Markdown { content: String },
    File { file: TransactionFile },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub status: TransactionStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub prompt_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub author: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub cost: String,
    #[serde(default)]
    pub tokens: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub files: Vec<TransactionFile>,
}

impl Transaction {
    /// The transaction's file set: standalone `files` when present,
    /// otherwise the file blocks in narrative order.
    pub fn file_set(&self) -> Vec<&TransactionFile> {
        if !self.files.is_empty() {
            return self.files.iter().collect();
        }
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::File { file } => Some(file),
                Block::Markdown { .. } => None,
            })
            .collect()
    }

    pub fn file(&self, path: &str) -> Option<&TransactionFile> {
        self.file_set().into_iter().find(|f| f.path == path)
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.file_set().into_iter().map(|f| f.path.clone()).collect()
    }

    /// Update a file's apply state everywhere it appears (standalone list and
    /// file blocks). Returns false if no file has that path.
    pub fn set_file_apply_status(
        &mut self,
        path: &str,
        status: FileApplyStatus,
        error_message: Option<String>,
    ) -> bool {
        let mut found = false;
        let files = self.files.iter_mut().chain(self.blocks.iter_mut().filter_map(|b| match b {
            Block::File { file } => Some(file),
            Block::Markdown { .. } => None,
        }));
        for file in files.filter(|f| f.path == path) {
            file.apply_status = status;
            file.error_message = error_message.clone();
            found = true;
        }
        found
    }

    /// Aggregate outcome over the file set, or `None` while any file is
    /// still non-terminal.
    pub fn aggregate_file_status(&self) -> Option<TransactionStatus> {
        let files = self.file_set();
        if files.iter().any(|f| !f.apply_status.is_terminal()) {
            return None;
        }
        let failed = files
            .iter()
            .filter(|f| f.apply_status == FileApplyStatus::Failed)
            .count();
        Some(if failed == 0 {
            TransactionStatus::Applied
        } else if failed == files.len() {
            TransactionStatus::Failed
        } else {
            TransactionStatus::PartiallyApplied
        })
    }

    /// Case-insensitive match over description, author, markdown content and
    /// file paths. `needle` must already be lowercase.
    pub fn matches_search(&self, needle: &str) -> bool {
        self.description.to_lowercase().contains(needle)
            || self.author.to_lowercase().contains(needle)
            || self.blocks.iter().any(|b| match b {
                Block::Markdown { content } => content.to_lowercase().contains(needle),
                Block::File { file } => file.path.to_lowercase().contains(needle),
            })
            || self
                .files
                .iter()
                .any(|f| f.path.to_lowercase().contains(needle))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PromptStatus {
    Draft,
    Active,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: String,
    pub status: PromptStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SimulationScenario {
    FastSuccess,
    SimulatedFailure,
    LongRunning,
    PartialFailure,
}

impl fmt::Display for SimulationScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FastSuccess => "fast-success",
            Self::SimulatedFailure => "simulated-failure",
            Self::LongRunning => "long-running",
            Self::PartialFailure => "partial-failure",
        };
        f.write_str(s)
    }
}

// ── Stream events ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatusEvent {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileStatusEvent {
    pub transaction_id: String,
    pub file_path: String,
    pub apply_status: FileApplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// A frame on the `/api/events` stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayEvent {
    Connected,
    Transaction(TransactionStatusEvent),
    File(FileStatusEvent),
}

impl RelayEvent {
    pub fn transaction_status(tx: &Transaction) -> Self {
        RelayEvent::Transaction(TransactionStatusEvent {
            transaction_id: tx.id.clone(),
            status: tx.status,
            timestamp: Utc::now(),
        })
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            RelayEvent::Connected => None,
            RelayEvent::Transaction(e) => Some(&e.transaction_id),
            RelayEvent::File(e) => Some(&e.transaction_id),
        }
    }
}

// ── HTTP payloads ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<SimulationScenario>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkActionRequest {
    pub ids: Vec<String>,
    pub action: TransactionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkActionResponse {
    pub success: bool,
    pub updated_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReapplyFileRequest {
    pub file_path: String,
}
