mod admission;
mod catalog;
mod error;
mod ledger;
mod promotion;
mod queries;
mod workflow;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::journal::Journal;
use crate::model::*;
use crate::notify::{notice_for_event, NotifyHub};

pub type SharedEmployeeState = Arc<RwLock<EmployeeState>>;

/// Engine policy switches. The balance cap mirrors the open policy question:
/// whether "requested days ≤ remaining" is checked at submission or left to
/// reviewer judgment. Off by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    pub enforce_balance_cap: bool,
}

// ── Group-commit journal channel ─────────────────────────

pub(super) struct JournalAppend {
    event: Event,
    response: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the journal and batches appends for group
/// commit:
/// 1. Block until the first append arrives.
/// 2. Drain all immediately available appends (the batch window).
/// 3. Single flush + fsync for the whole batch.
/// 4. Respond to all senders.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalAppend>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE)
            .record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut journal, &batch);
        metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        for JournalAppend { response, .. } in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = response.send(r);
        }
    }
}

fn flush_batch(journal: &mut Journal, batch: &[JournalAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for JournalAppend { event, .. } in batch {
        if let Err(e) = journal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = journal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

/// The approval-workflow engine. All mutable state is in memory, keyed by
/// employee; every change is journaled before it is applied. One employee's
/// write lock serializes every guard-check-then-mutate sequence touching
/// that employee — the admission check, the status guard, and the ledger
/// deduction all run inside the same critical section as the insert.
pub struct Engine {
    pub state: DashMap<Ulid, SharedEmployeeState>,
    pub notify: Arc<NotifyHub>,
    pub(super) journal_tx: mpsc::Sender<JournalAppend>,
    /// Reverse lookup: request id → employee id.
    pub(super) request_to_employee: DashMap<Ulid, Ulid>,
    pub(super) periods: DashMap<Ulid, EntitlementPeriod>,
    pub(super) rules: DashMap<RuleKey, u32>,
    pub(super) probations: DashMap<Ulid, ProbationRecord>,
    pub(super) config: EngineConfig,
}

impl Engine {
    pub fn new(journal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_config(journal_path, notify, EngineConfig::default())
    }

    pub fn with_config(
        journal_path: PathBuf,
        notify: Arc<NotifyHub>,
        config: EngineConfig,
    ) -> io::Result<Self> {
        let events = Journal::replay(&journal_path)?;
        let journal = Journal::open(&journal_path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let engine = Self {
            state: DashMap::new(),
            notify,
            journal_tx,
            request_to_employee: DashMap::new(),
            periods: DashMap::new(),
            rules: DashMap::new(),
            probations: DashMap::new(),
            config,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this may
        // run inside an async context.
        for event in &events {
            engine.replay_event(event);
        }
        tracing::debug!(events = events.len(), "journal replayed");

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::EmployeeRegistered {
                id,
                name,
                department,
                role,
                status,
            } => {
                let es = EmployeeState::new(
                    *id,
                    name.clone(),
                    department.clone(),
                    role.clone(),
                    *status,
                );
                self.state.insert(*id, Arc::new(RwLock::new(es)));
            }
            Event::PeriodRegistered { .. }
            | Event::CurrentPeriodSet { .. }
            | Event::RuleSet { .. }
            | Event::ProbationStarted { .. } => self.apply_registry(event),
            other => {
                if let Some(employee_id) = event_employee_id(other)
                    && let Some(entry) = self.state.get(&employee_id)
                {
                    let es = entry.value().clone();
                    drop(entry);
                    let mut guard = es.try_write().expect("replay: uncontended write");
                    self.apply_to_employee(&mut guard, other);
                }
            }
        }
    }

    /// Apply a registry event: reference data held at the engine level
    /// rather than inside an employee's state.
    /// (EmployeeRegistered is handled at the DashMap level, not here.)
    pub(super) fn apply_registry(&self, event: &Event) {
        match event {
            Event::PeriodRegistered {
                id,
                name,
                range,
                term,
                shared_pool,
            } => {
                self.periods.insert(
                    *id,
                    EntitlementPeriod {
                        id: *id,
                        name: name.clone(),
                        range: *range,
                        term: *term,
                        shared_pool: *shared_pool,
                        current: false,
                    },
                );
            }
            Event::CurrentPeriodSet { id } => {
                // Exactly one current period: setting one clears the rest.
                for mut period in self.periods.iter_mut() {
                    period.current = period.id == *id;
                }
            }
            Event::RuleSet {
                status,
                term,
                category,
                days,
            } => {
                self.rules.insert(
                    RuleKey {
                        status: *status,
                        term: *term,
                        category: *category,
                    },
                    *days,
                );
            }
            Event::ProbationStarted {
                id,
                employee_id,
                start,
                end,
            } => {
                self.probations.insert(
                    *id,
                    ProbationRecord {
                        id: *id,
                        employee_id: *employee_id,
                        start: *start,
                        end: *end,
                        status: ProbationStatus::Active,
                        completed_at: None,
                        notified: false,
                    },
                );
            }
            _ => {}
        }
    }

    /// Apply an event to an employee's state (no locking — caller holds the
    /// write lock). Infallible: anything that can refuse was checked before
    /// the event was journaled, on the live path and therefore also on
    /// replay.
    pub(super) fn apply_to_employee(&self, es: &mut EmployeeState, event: &Event) {
        match event {
            Event::RequestSubmitted {
                id,
                employee_id,
                period_id,
                kind,
                range,
                days,
                justification,
                at,
            } => {
                es.insert_request(Request {
                    id: *id,
                    employee_id: *employee_id,
                    period_id: *period_id,
                    kind: kind.clone(),
                    range: *range,
                    days: *days,
                    justification: justification.clone(),
                    status: RequestStatus::Pending,
                    submitted_at: *at,
                    first_review: None,
                    final_review: None,
                    reject_reason: None,
                });
                self.request_to_employee.insert(*id, *employee_id);
            }
            Event::RequestEdited {
                id,
                range,
                days,
                justification,
                ..
            } => {
                // Remove and re-insert so the list stays sorted by start.
                if let Some(mut request) = es.remove_request(id) {
                    request.range = *range;
                    request.days = *days;
                    request.justification = justification.clone();
                    es.insert_request(request);
                }
            }
            Event::FirstStageApproved {
                id, reviewer, at, ..
            } => {
                if let Some(request) = es.request_mut(id) {
                    request.status = RequestStatus::FirstApproved;
                    request.first_review = Some(Review {
                        reviewer: *reviewer,
                        at: *at,
                    });
                }
            }
            Event::FirstStageRejected {
                id,
                reviewer,
                at,
                reason,
                ..
            } => {
                if let Some(request) = es.request_mut(id) {
                    request.status = RequestStatus::FirstRejected;
                    request.first_review = Some(Review {
                        reviewer: *reviewer,
                        at: *at,
                    });
                    request.reject_reason = Some(reason.clone());
                }
            }
            Event::FinalApproved {
                id,
                reviewer,
                at,
                period_id,
                slot,
                days,
                ..
            } => {
                if let Some(request) = es.request_mut(id) {
                    request.status = RequestStatus::FinalApproved;
                    request.final_review = Some(Review {
                        reviewer: *reviewer,
                        at: *at,
                    });
                }
                self.apply_deduction(es, *period_id, *slot, *days);
            }
            Event::FinalRejected {
                id,
                reviewer,
                at,
                reason,
                ..
            } => {
                if let Some(request) = es.request_mut(id) {
                    request.status = RequestStatus::FinalRejected;
                    request.final_review = Some(Review {
                        reviewer: *reviewer,
                        at: *at,
                    });
                    request.reject_reason = Some(reason.clone());
                }
            }
            Event::BalanceOpened {
                period_id,
                slot,
                allowed_days,
                ..
            } => {
                es.balances
                    .entry((*period_id, *slot))
                    .or_insert(BalanceRecord {
                        allowed_days: *allowed_days,
                        used_days: 0,
                    });
            }
            Event::ProbationCompleted {
                id,
                employee_id: _,
                at,
            } => {
                es.status = EmploymentStatus::Regular;
                if let Some(mut record) = self.probations.get_mut(id) {
                    record.status = ProbationStatus::Completed;
                    record.completed_at = Some(*at);
                    // Dispatch flag set before the notice is attempted, so a
                    // re-run never re-sends for a completed record.
                    record.notified = true;
                }
            }
            _ => {}
        }
    }

    /// Write an event to the journal via the background group-commit writer.
    pub(super) async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalAppend {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))
    }

    pub fn get_employee_state(&self, id: &Ulid) -> Option<SharedEmployeeState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// Journal append + apply + default notice in one call. The notice is
    /// derived from the event and addressed to the affected employee;
    /// operations with extra recipients send those themselves.
    pub(super) async fn persist_and_apply(
        &self,
        es: &mut EmployeeState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        self.apply_to_employee(es, event);
        if let Some(notice) = notice_for_event(event) {
            self.notify.send(notice);
        }
        Ok(())
    }

    /// Lookup request → employee, get the employee's state, acquire the
    /// write lock.
    pub(super) async fn resolve_request_write(
        &self,
        request_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<EmployeeState>), EngineError> {
        let employee_id = self
            .request_to_employee
            .get(request_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*request_id))?;
        let es = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let guard = es.write_owned().await;
        Ok((employee_id, guard))
    }
}

/// Extract the employee id from an event scoped to one employee's state.
fn event_employee_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RequestSubmitted { employee_id, .. }
        | Event::RequestEdited { employee_id, .. }
        | Event::FirstStageApproved { employee_id, .. }
        | Event::FirstStageRejected { employee_id, .. }
        | Event::FinalApproved { employee_id, .. }
        | Event::FinalRejected { employee_id, .. }
        | Event::BalanceOpened { employee_id, .. }
        | Event::ProbationCompleted { employee_id, .. } => Some(*employee_id),
        Event::EmployeeRegistered { .. }
        | Event::PeriodRegistered { .. }
        | Event::CurrentPeriodSet { .. }
        | Event::RuleSet { .. }
        | Event::ProbationStarted { .. } => None,
    }
}
