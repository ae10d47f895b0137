//! In-memory transaction table.
//!
//! Every mutation is paired with a broadcaster notify. The pair runs under a
//! dedicated publish lock, so each subscriber observes events in exactly the
//! order the mutations were applied. The data lock itself is released before
//! subscribers run; callbacks may read the store but must not mutate it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use super::broadcaster::{EventBroadcaster, Subscription};
use super::models::*;
use crate::errors::RelayError;

type Result<T> = std::result::Result<T, RelayError>;

#[derive(Default)]
struct StoreState {
    transactions: Vec<Transaction>,
    index: HashMap<String, usize>,
    prompts: Vec<Prompt>,
}

impl StoreState {
    fn build(transactions: Vec<Transaction>, prompts: Vec<Prompt>) -> Result<Self> {
        let mut index = HashMap::with_capacity(transactions.len());
        for (pos, tx) in transactions.iter().enumerate() {
            if index.insert(tx.id.clone(), pos).is_some() {
                return Err(RelayError::DuplicateTransaction { id: tx.id.clone() });
            }
        }
        Ok(Self {
            transactions,
            index,
            prompts,
        })
    }

    fn get(&self, id: &str) -> Result<&Transaction> {
        self.index
            .get(id)
            .map(|&pos| &self.transactions[pos])
            .ok_or_else(|| RelayError::TransactionNotFound { id: id.to_string() })
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Transaction> {
        match self.index.get(id) {
            Some(&pos) => Ok(&mut self.transactions[pos]),
            None => Err(RelayError::TransactionNotFound { id: id.to_string() }),
        }
    }
}

pub struct TransactionStore {
    state: RwLock<StoreState>,
    publish: Mutex<()>,
    broadcaster: EventBroadcaster,
}

impl TransactionStore {
    pub fn new(broadcaster: EventBroadcaster) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            publish: Mutex::new(()),
            broadcaster,
        }
    }

    pub fn with_data(
        broadcaster: EventBroadcaster,
        transactions: Vec<Transaction>,
        prompts: Vec<Prompt>,
    ) -> Result<Self> {
        Ok(Self {
            state: RwLock::new(StoreState::build(transactions, prompts)?),
            publish: Mutex::new(()),
            broadcaster,
        })
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RelayEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.broadcaster.subscribe(callback)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state.read().map_err(|_| RelayError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state.write().map_err(|_| RelayError::LockPoisoned)
    }

    fn publishing(&self) -> Result<MutexGuard<'_, ()>> {
        self.publish.lock().map_err(|_| RelayError::LockPoisoned)
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Filter by status and search text, then paginate (`page` is 1-based).
    /// Pages past the end yield an empty list.
    pub fn list(
        &self,
        page: usize,
        limit: usize,
        search: Option<&str>,
        status: Option<TransactionStatus>,
    ) -> Result<Vec<Transaction>> {
        let state = self.read()?;
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let start = page.saturating_sub(1).saturating_mul(limit);

        Ok(state
            .transactions
            .iter()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .filter(|t| needle.as_deref().is_none_or(|n| t.matches_search(n)))
            .skip(start)
            .take(limit)
            .cloned()
            .collect())
    }

    pub fn get(&self, id: &str) -> Result<Transaction> {
        Ok(self.read()?.get(id)?.clone())
    }

    pub fn prompts(&self) -> Result<Vec<Prompt>> {
        Ok(self.read()?.prompts.clone())
    }

    pub fn snapshot(&self) -> Result<Vec<Transaction>> {
        Ok(self.read()?.transactions.clone())
    }

    /// Paths of files whose applyStatus is FAILED, in file-set order.
    pub fn failed_files(&self, id: &str) -> Result<Vec<String>> {
        let state = self.read()?;
        Ok(state
            .get(id)?
            .file_set()
            .into_iter()
            .filter(|f| f.apply_status == FileApplyStatus::Failed)
            .map(|f| f.path.clone())
            .collect())
    }

    // ── Mutations ─────────────────────────────────────────────────────

    /// Administrative status change (commit or revert) and notify.
    ///
    /// Only the manual edges are accepted here; outcome edges go through
    /// [`settle`](Self::settle) and [`settle_from_files`](Self::settle_from_files).
    pub fn update_status(&self, id: &str, status: TransactionStatus) -> Result<Transaction> {
        let updated = self.transition(id, status, TransactionStatus::can_set_manually)?;
        debug!(transaction_id = %id, status = %status, "status updated");
        Ok(updated)
    }

    /// Record the outcome of a run that does not track files.
    pub fn settle(&self, id: &str, status: TransactionStatus) -> Result<Transaction> {
        self.transition(id, status, TransactionStatus::can_settle_to)
    }

    fn transition(
        &self,
        id: &str,
        status: TransactionStatus,
        allowed: fn(&TransactionStatus, TransactionStatus) -> bool,
    ) -> Result<Transaction> {
        let _publish = self.publishing()?;
        let updated = {
            let mut state = self.write()?;
            let tx = state.get_mut(id)?;
            if !allowed(&tx.status, status) {
                return Err(RelayError::InvalidTransition {
                    id: id.to_string(),
                    from: tx.status,
                    to: status,
                });
            }
            tx.status = status;
            tx.clone()
        };
        self.broadcaster.notify(&RelayEvent::transaction_status(&updated));
        Ok(updated)
    }

    /// Add a proposed transaction at the end of the table and notify.
    ///
    /// Whatever status the caller sent, it enters as PENDING with every file
    /// back at PENDING.
    pub fn insert(&self, mut transaction: Transaction) -> Result<Transaction> {
        transaction.status = TransactionStatus::Pending;
        for path in transaction.file_paths() {
            transaction.set_file_apply_status(&path, FileApplyStatus::Pending, None);
        }

        let _publish = self.publishing()?;
        {
            let mut state = self.write()?;
            if state.index.contains_key(&transaction.id) {
                return Err(RelayError::DuplicateTransaction {
                    id: transaction.id.clone(),
                });
            }
            let pos = state.transactions.len();
            state.index.insert(transaction.id.clone(), pos);
            state.transactions.push(transaction.clone());
        }
        debug!(transaction_id = %transaction.id, "transaction inserted");
        self.broadcaster.notify(&RelayEvent::transaction_status(&transaction));
        Ok(transaction)
    }

    /// Apply `status` to every listed id that exists and allows the edge.
    /// Unknown or rejected ids are skipped; each update notifies on its own,
    /// in input order.
    pub fn update_status_bulk(
        &self,
        ids: &[String],
        status: TransactionStatus,
    ) -> Result<Vec<String>> {
        let mut updated_ids = Vec::with_capacity(ids.len());
        for id in ids {
            match self.update_status(id, status) {
                Ok(_) => updated_ids.push(id.clone()),
                Err(RelayError::LockPoisoned) => return Err(RelayError::LockPoisoned),
                Err(e) => {
                    warn!(transaction_id = %id, error = %e, "skipping bulk update");
                }
            }
        }
        Ok(updated_ids)
    }

    /// Atomically move a PENDING transaction to APPLYING.
    pub fn begin_apply(&self, id: &str) -> Result<Transaction> {
        let _publish = self.publishing()?;
        let updated = {
            let mut state = self.write()?;
            let tx = state.get_mut(id)?;
            if tx.status != TransactionStatus::Pending {
                return Err(RelayError::NotPending {
                    id: id.to_string(),
                    status: tx.status,
                });
            }
            tx.status = TransactionStatus::Applying;
            tx.clone()
        };
        self.broadcaster.notify(&RelayEvent::transaction_status(&updated));
        Ok(updated)
    }

    /// Set one file's apply state and emit a file event.
    pub fn set_file_apply_status(
        &self,
        id: &str,
        path: &str,
        apply_status: FileApplyStatus,
        error_message: Option<String>,
    ) -> Result<Transaction> {
        let _publish = self.publishing()?;
        let updated = {
            let mut state = self.write()?;
            let tx = state.get_mut(id)?;
            if !tx.set_file_apply_status(path, apply_status, error_message.clone()) {
                return Err(RelayError::FileNotFound {
                    id: id.to_string(),
                    path: path.to_string(),
                });
            }
            tx.clone()
        };
        self.broadcaster.notify(&RelayEvent::File(FileStatusEvent {
            transaction_id: id.to_string(),
            file_path: path.to_string(),
            apply_status,
            error_message,
        }));
        Ok(updated)
    }

    /// Derive the aggregate status from the file set and store it.
    ///
    /// Returns `Ok(None)` without mutating while any file is still
    /// non-terminal.
    pub fn settle_from_files(&self, id: &str) -> Result<Option<Transaction>> {
        let _publish = self.publishing()?;
        let updated = {
            let mut state = self.write()?;
            let tx = state.get_mut(id)?;
            let Some(status) = tx.aggregate_file_status() else {
                return Ok(None);
            };
            if !tx.status.can_settle_to(status) {
                return Err(RelayError::InvalidTransition {
                    id: id.to_string(),
                    from: tx.status,
                    to: status,
                });
            }
            tx.status = status;
            tx.clone()
        };
        self.broadcaster.notify(&RelayEvent::transaction_status(&updated));
        Ok(Some(updated))
    }

    /// Swap in a fresh data set (seed reset). Does not notify.
    pub fn replace_all(&self, transactions: Vec<Transaction>, prompts: Vec<Prompt>) -> Result<()> {
        let fresh = StoreState::build(transactions, prompts)?;
        let _publish = self.publishing()?;
        *self.write()? = fresh;
        Ok(())
    }
}
