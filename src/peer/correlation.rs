//! Correlation table: in-flight request id → pending completion.
//!
//! Each entry owns a [`oneshot`] sender and the abort handle of its expiry
//! timer. Every settlement path (`resolve`, `expire`, `reject`, `reject_all`)
//! removes the entry under the lock before completing it, so an id is
//! settled at most once no matter which path runs first.
//!
//! Dropping a [`PendingResponse`] before it settles (the HTTP caller went
//! away) removes its entry and cancels the timer. Entries carry a sequence
//! number so a stale handle never removes a later registration of the same id.
//!
//! The lock is a plain [`std::sync::Mutex`]: it is never held across an
//! `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::protocol::{RequestId, ResponseEnvelope};
use crate::{AppError, Result};

/// Default deadline for a pending entry.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Outcome delivered to the waiting caller.
pub type Settlement = Result<ResponseEnvelope>;

#[derive(Debug)]
struct PendingEntry {
    seq: u64,
    created_at: Instant,
    on_settle: oneshot::Sender<Settlement>,
    timeout: Option<AbortHandle>,
}

impl PendingEntry {
    fn settle(self, id: &RequestId, outcome: Settlement) {
        if let Some(timer) = self.timeout {
            timer.abort();
        }
        if self.on_settle.send(outcome).is_err() {
            debug!(%id, "correlation: caller went away before settlement");
        }
    }
}

#[derive(Debug, Default)]
struct TableState {
    entries: HashMap<RequestId, PendingEntry>,
    closed: Option<String>,
    next_seq: u64,
}

/// Shared, cloneable correlation table.
#[derive(Debug, Clone, Default)]
pub struct CorrelationTable {
    state: Arc<Mutex<TableState>>,
}

/// Handle the caller suspends on until its entry is settled.
#[derive(Debug)]
pub struct PendingResponse {
    id: RequestId,
    seq: u64,
    rx: oneshot::Receiver<Settlement>,
    table: CorrelationTable,
    settled: bool,
}

impl PendingResponse {
    /// Id this handle is waiting for.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the response, the timeout, or channel teardown.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Timeout` when the deadline elapsed first and
    /// `AppError::ChannelClosed` when the peer went away.
    pub async fn wait(mut self) -> Settlement {
        let outcome = (&mut self.rx).await;
        self.settled = true;
        outcome.unwrap_or_else(|_| {
            Err(AppError::ChannelClosed(format!(
                "pending entry {} dropped without settlement",
                self.id
            )))
        })
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if !self.settled && self.table.discard(&self.id, self.seq) {
            debug!(id = %self.id, "correlation: caller gone, entry discarded");
        }
    }
}

impl CorrelationTable {
    /// Create an empty, open table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `id` and schedule its expiry after `timeout`.
    ///
    /// Must be called from within a tokio runtime (the timer is a spawned task).
    ///
    /// # Errors
    ///
    /// - `AppError::DuplicateId` if `id` is already pending.
    /// - `AppError::ChannelClosed` if the table has been torn down.
    pub fn register(&self, id: RequestId, timeout: Duration) -> Result<PendingResponse> {
        let (tx, rx) = oneshot::channel();
        let seq = {
            let mut state = self.lock();
            if let Some(ref reason) = state.closed {
                return Err(AppError::ChannelClosed(reason.clone()));
            }
            if state.entries.contains_key(&id) {
                return Err(AppError::DuplicateId(format!("{id} is already pending")));
            }

            let seq = state.next_seq;
            state.next_seq += 1;

            let table = self.clone();
            let timer_id = id.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(entry) = table.take_registration(&timer_id, seq) {
                    Self::time_out(&timer_id, entry);
                }
            });

            state.entries.insert(
                id.clone(),
                PendingEntry {
                    seq,
                    created_at: Instant::now(),
                    on_settle: tx,
                    timeout: Some(timer.abort_handle()),
                },
            );
            seq
        };
        debug!(%id, timeout_ms = timeout.as_millis(), "correlation: registered");
        Ok(PendingResponse {
            id,
            seq,
            rx,
            table: self.clone(),
            settled: false,
        })
    }

    fn take(&self, id: &RequestId) -> Option<PendingEntry> {
        self.lock().entries.remove(id)
    }

    /// Remove the entry for `id` only if it is the registration numbered `seq`.
    fn take_registration(&self, id: &RequestId, seq: u64) -> Option<PendingEntry> {
        let mut state = self.lock();
        match state.entries.get(id) {
            Some(entry) if entry.seq == seq => state.entries.remove(id),
            _ => None,
        }
    }

    /// Drop a registration without settling it.
    fn discard(&self, id: &RequestId, seq: u64) -> bool {
        match self.take_registration(id, seq) {
            Some(entry) => {
                if let Some(timer) = entry.timeout {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Complete the entry for `response.id` with the response.
    ///
    /// Returns `false` (and drops the response) if the id is not pending,
    /// e.g. because it already timed out.
    #[must_use = "false means the id was no longer pending"]
    pub fn resolve(&self, response: ResponseEnvelope) -> bool {
        let id = response.id.clone();
        match self.take(&id) {
            Some(entry) => {
                debug!(
                    %id,
                    elapsed_ms = entry.created_at.elapsed().as_millis(),
                    "correlation: resolved"
                );
                entry.settle(&id, Ok(response));
                true
            }
            None => {
                debug!(%id, "correlation: dropping response for unknown or settled id");
                false
            }
        }
    }

    /// Complete the entry for `id` with a timeout error, if still pending.
    #[must_use = "false means the id was no longer pending"]
    pub fn expire(&self, id: &RequestId) -> bool {
        match self.take(id) {
            Some(entry) => {
                Self::time_out(id, entry);
                true
            }
            None => false,
        }
    }

    fn time_out(id: &RequestId, entry: PendingEntry) {
        let elapsed = entry.created_at.elapsed();
        warn!(%id, elapsed_ms = elapsed.as_millis(), "correlation: request timed out");
        entry.settle(
            id,
            Err(AppError::Timeout(format!(
                "no response for {id} after {}ms",
                elapsed.as_millis()
            ))),
        );
    }

    /// Complete the entry for `id` with `err`, if still pending.
    #[must_use = "false means the id was no longer pending"]
    pub fn reject(&self, id: &RequestId, err: AppError) -> bool {
        match self.take(id) {
            Some(entry) => {
                entry.settle(id, Err(err));
                true
            }
            None => false,
        }
    }

    /// Settle every pending entry with a channel-closed error and refuse
    /// further registrations.
    ///
    /// Returns the number of entries that were rejected.
    #[must_use]
    pub fn reject_all(&self, reason: &str) -> usize {
        let drained: Vec<(RequestId, PendingEntry)> = {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.to_owned());
            }
            state.entries.drain().collect()
        };

        let count = drained.len();
        for (id, entry) in drained {
            entry.settle(&id, Err(AppError::ChannelClosed(reason.to_owned())));
        }
        if count > 0 {
            warn!(count, reason, "correlation: rejected all pending requests");
        }
        count
    }

    /// Whether `id` is currently pending.
    #[must_use]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether no entries are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`CorrelationTable::reject_all`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }
}
