//! Timed emulation of a backend applying transactions.
//!
//! A run claims its transaction id in the active set, moves it to APPLYING,
//! then resolves it from a spawned task after one or more randomized delays.
//! The claim is an RAII guard owned by the task, so the id is released on
//! every exit path including panics and cancellation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::models::*;
use super::store::TransactionStore;
use crate::errors::RelayError;

type Result<T> = std::result::Result<T, RelayError>;

const APPLY_ERROR_MESSAGE: &str = "Patch conflict: file content mismatch";
const REAPPLY_ERROR_MESSAGE: &str = "Retry failed: unresolved conflict";

/// Inclusive millisecond range a delay is drawn from uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn sample(&self) -> Duration {
        let ms = if self.max_ms <= self.min_ms {
            self.min_ms
        } else {
            rand::rng().random_range(self.min_ms..=self.max_ms)
        };
        Duration::from_millis(ms)
    }

    pub fn contains(&self, d: Duration) -> bool {
        let ms = d.as_millis() as u64;
        ms >= self.min_ms && ms <= self.max_ms
    }
}

/// Timing and outcome knobs, loaded from the `[simulation]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub default_duration: DelayRange,
    pub fast_success: DelayRange,
    pub long_running: DelayRange,
    pub file_delay: DelayRange,
    pub failure_probability: f64,
    /// Abort an in-flight run when its transaction is reverted.
    pub cancel_on_revert: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            default_duration: DelayRange::new(2000, 6000),
            fast_success: DelayRange::new(500, 1000),
            long_running: DelayRange::new(8000, 12000),
            file_delay: DelayRange::new(600, 2000),
            failure_probability: 0.3,
            cancel_on_revert: false,
        }
    }
}

impl SimulationConfig {
    pub fn duration_for(&self, scenario: Option<SimulationScenario>) -> DelayRange {
        match scenario {
            Some(SimulationScenario::FastSuccess) => self.fast_success,
            Some(SimulationScenario::LongRunning) => self.long_running,
            Some(SimulationScenario::PartialFailure) => self.file_delay,
            Some(SimulationScenario::SimulatedFailure) | None => self.default_duration,
        }
    }
}

/// Decides the outcome of applying a single file.
pub trait OutcomePolicy: Send + Sync {
    fn file_fails(&self, transaction_id: &str, path: &str) -> bool;
}

/// Independent coin flip per file.
pub struct RandomOutcome {
    pub failure_probability: f64,
}

impl OutcomePolicy for RandomOutcome {
    fn file_fails(&self, _transaction_id: &str, _path: &str) -> bool {
        rand::rng().random_bool(self.failure_probability.clamp(0.0, 1.0))
    }
}

type ActiveMap = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Membership of one id in the active set, released on drop.
struct ActiveRun {
    id: String,
    active: ActiveMap,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.remove(&self.id);
    }
}

/// A started run: the transaction as it stood when the call returned, plus
/// the background task driving it.
pub struct SimulationRun {
    pub transaction: Transaction,
    handle: JoinHandle<Option<Transaction>>,
}

impl SimulationRun {
    /// Wait for the run to finish. Returns the settled transaction, or `None`
    /// if the run was cancelled or failed.
    pub async fn wait(self) -> Option<Transaction> {
        match self.handle.await {
            Ok(settled) => settled,
            Err(e) => {
                warn!(transaction_id = %self.transaction.id, error = %e, "simulation task aborted");
                None
            }
        }
    }
}

struct EngineInner {
    store: Arc<TransactionStore>,
    config: SimulationConfig,
    outcome: Arc<dyn OutcomePolicy>,
    active: ActiveMap,
}

#[derive(Clone)]
pub struct SimulationEngine {
    inner: Arc<EngineInner>,
}

impl SimulationEngine {
    pub fn new(store: Arc<TransactionStore>, config: SimulationConfig) -> Self {
        let outcome = Arc::new(RandomOutcome {
            failure_probability: config.failure_probability,
        });
        Self::with_outcome(store, config, outcome)
    }

    pub fn with_outcome(
        store: Arc<TransactionStore>,
        config: SimulationConfig,
        outcome: Arc<dyn OutcomePolicy>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                config,
                outcome,
                active: Arc::new(Mutex::new(HashMap::new())),
            }),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.inner.config
    }

    pub fn is_active(&self, id: &str) -> bool {
        match self.inner.active.lock() {
            Ok(active) => active.contains_key(id),
            Err(poisoned) => poisoned.into_inner().contains_key(id),
        }
    }

    /// Cancel the in-flight run for `id`, if any. Pending timers stop and
    /// no further mutations are made by that run.
    pub fn cancel(&self, id: &str) -> bool {
        let active = match self.inner.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match active.get(id) {
            Some(token) => {
                token.cancel();
                info!(transaction_id = %id, "simulation cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight run. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let active = match self.inner.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for token in active.values() {
            token.cancel();
        }
        if !active.is_empty() {
            info!(count = active.len(), "all simulations cancelled");
        }
        active.len()
    }

    /// Check-and-insert into the active set as one atomic step.
    fn claim(&self, id: &str) -> Result<(ActiveRun, CancellationToken)> {
        let mut active = self
            .inner
            .active
            .lock()
            .map_err(|_| RelayError::LockPoisoned)?;
        if active.contains_key(id) {
            return Err(RelayError::SimulationActive { id: id.to_string() });
        }
        let token = CancellationToken::new();
        active.insert(id.to_string(), token.clone());
        Ok((
            ActiveRun {
                id: id.to_string(),
                active: Arc::clone(&self.inner.active),
            },
            token,
        ))
    }

    /// Drive a PENDING transaction through APPLYING to its outcome.
    ///
    /// Fails with a conflict if the transaction already has an active run
    /// or is not PENDING.
    pub fn start_simulation(
        &self,
        id: &str,
        scenario: Option<SimulationScenario>,
    ) -> Result<SimulationRun> {
        let (claim, token) = self.claim(id)?;
        let store = &self.inner.store;
        let mut transaction = store.begin_apply(id)?;
        let paths = match scenario {
            Some(SimulationScenario::PartialFailure) => transaction.file_paths(),
            _ => Vec::new(),
        };
        if !paths.is_empty() {
            for path in &paths {
                store.set_file_apply_status(id, path, FileApplyStatus::Applying, None)?;
            }
            transaction = store.get(id)?;
        }
        info!(
            transaction_id = %id,
            scenario = %scenario.map(|s| s.to_string()).unwrap_or_else(|| "default".into()),
            "simulation started"
        );

        let engine = self.clone();
        let run_id = id.to_string();
        let handle = tokio::spawn(async move {
            let _claim = claim;
            let result = match scenario {
                Some(SimulationScenario::PartialFailure) => {
                    engine
                        .resolve_files(&run_id, paths, &token, APPLY_ERROR_MESSAGE)
                        .await
                }
                other => engine.run_single(&run_id, other, &token).await,
            };
            engine.finish(&run_id, result)
        });

        Ok(SimulationRun {
            transaction,
            handle,
        })
    }

    /// Retry one FAILED file.
    pub fn reapply_file(&self, id: &str, path: &str) -> Result<SimulationRun> {
        let path = path.to_string();
        self.reapply(id, move |tx| {
            let file = tx.file(&path).ok_or_else(|| RelayError::FileNotFound {
                id: tx.id.clone(),
                path: path.clone(),
            })?;
            if file.apply_status != FileApplyStatus::Failed {
                return Err(RelayError::FileNotFailed {
                    id: tx.id.clone(),
                    path: path.clone(),
                    status: file.apply_status,
                });
            }
            Ok(vec![path.clone()])
        })
    }

    /// Retry every FAILED file of the transaction.
    pub fn reapply_all_failed(&self, id: &str) -> Result<SimulationRun> {
        self.reapply(id, |tx| {
            let failed: Vec<String> = tx
                .file_set()
                .into_iter()
                .filter(|f| f.apply_status == FileApplyStatus::Failed)
                .map(|f| f.path.clone())
                .collect();
            if failed.is_empty() {
                return Err(RelayError::NoFailedFiles { id: tx.id.clone() });
            }
            Ok(failed)
        })
    }

    fn reapply<F>(&self, id: &str, select: F) -> Result<SimulationRun>
    where
        F: FnOnce(&Transaction) -> Result<Vec<String>>,
    {
        let (claim, token) = self.claim(id)?;
        let store = &self.inner.store;
        let current = store.get(id)?;
        if !current.status.is_reapplicable() {
            return Err(RelayError::NotReapplicable {
                id: id.to_string(),
                status: current.status,
            });
        }
        let paths = select(&current)?;
        for path in &paths {
            store.set_file_apply_status(id, path, FileApplyStatus::Applying, None)?;
        }
        let transaction = store.get(id)?;
        info!(transaction_id = %id, files = paths.len(), "reapply started");

        let engine = self.clone();
        let run_id = id.to_string();
        let handle = tokio::spawn(async move {
            let _claim = claim;
            let result = engine
                .resolve_files(&run_id, paths, &token, REAPPLY_ERROR_MESSAGE)
                .await;
            engine.finish(&run_id, result)
        });

        Ok(SimulationRun {
            transaction,
            handle,
        })
    }

    fn finish(&self, id: &str, result: Result<Option<Transaction>>) -> Option<Transaction> {
        match result {
            Ok(Some(tx)) => {
                info!(transaction_id = %id, status = %tx.status, "simulation settled");
                Some(tx)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(transaction_id = %id, error = %e, "simulation could not settle");
                None
            }
        }
    }

    async fn run_single(
        &self,
        id: &str,
        scenario: Option<SimulationScenario>,
        token: &CancellationToken,
    ) -> Result<Option<Transaction>> {
        let delay = self.inner.config.duration_for(scenario).sample();
        tokio::select! {
            _ = token.cancelled() => return Ok(None),
            _ = tokio::time::sleep(delay) => {}
        }
        let status = match scenario {
            Some(SimulationScenario::SimulatedFailure) => TransactionStatus::Failed,
            _ => TransactionStatus::Applied,
        };
        self.inner.store.settle(id, status).map(Some)
    }

    /// Run one timer per file, then aggregate once every timer resolved.
    async fn resolve_files(
        &self,
        id: &str,
        paths: Vec<String>,
        token: &CancellationToken,
        error_message: &'static str,
    ) -> Result<Option<Transaction>> {
        let timers = paths
            .iter()
            .map(|path| self.resolve_file(id, path, token, error_message));
        for result in join_all(timers).await {
            result?;
        }
        if token.is_cancelled() {
            return Ok(None);
        }
        self.inner.store.settle_from_files(id)
    }

    async fn resolve_file(
        &self,
        id: &str,
        path: &str,
        token: &CancellationToken,
        error_message: &'static str,
    ) -> Result<()> {
        let delay = self.inner.config.file_delay.sample();
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
        let (status, message) = if self.inner.outcome.file_fails(id, path) {
            (FileApplyStatus::Failed, Some(error_message.to_string()))
        } else {
            (FileApplyStatus::Applied, None)
        };
        self.inner
            .store
            .set_file_apply_status(id, path, status, message)
            .map(|_| ())
    }
}
