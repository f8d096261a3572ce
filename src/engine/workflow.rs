use chrono::Utc;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::Notice;

use super::admission::{check_admission, overlap_conflicts, validate_range};
use super::{Engine, EngineError};

fn require_reason(reason: &str) -> Result<(), EngineError> {
    if reason.trim().is_empty() {
        return Err(EngineError::refused(
            "a rejection reason is required",
            Vec::new(),
        ));
    }
    if reason.len() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded("rejection reason too long"));
    }
    Ok(())
}

impl Engine {
    /// Create a request in `Pending` against the current entitlement period.
    /// The admission rules run inside the same critical section as the
    /// insert: between the check and the create, no other submission for
    /// this employee can be interleaved.
    pub async fn submit_request(
        &self,
        id: Ulid,
        employee_id: Ulid,
        kind: RequestKind,
        range: DayRange,
        justification: String,
    ) -> Result<Request, EngineError> {
        validate_range(&range)?;
        if justification.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("justification too long"));
        }
        if let RequestKind::Travel {
            destination,
            purpose,
        } = &kind
        {
            if destination.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("destination too long"));
            }
            if purpose.len() > MAX_TEXT_LEN {
                return Err(EngineError::LimitExceeded("purpose too long"));
            }
        }
        if self.request_to_employee.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let es = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let mut guard = es.write().await;
        if guard.requests.len() >= MAX_REQUESTS_PER_EMPLOYEE {
            return Err(EngineError::LimitExceeded("too many requests on employee"));
        }

        let period = self
            .current_period()
            .ok_or(EngineError::DataIntegrity("no current entitlement period"))?;

        check_admission(&guard, &range)?;
        let days = range.day_count();
        self.check_balance_cap(&guard, &period, &kind, days)?;

        let event = Event::RequestSubmitted {
            id,
            employee_id,
            period_id: period.id,
            kind,
            range,
            days,
            justification,
            at: Utc::now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        Ok(guard
            .request(&id)
            .cloned()
            .expect("submitted request present after apply"))
    }

    /// Change dates or justification. Legal only while `Pending`; a date
    /// change re-runs the overlap rule (and the cap rule, when enabled)
    /// against committed state.
    pub async fn edit_request(
        &self,
        id: Ulid,
        range: DayRange,
        justification: String,
    ) -> Result<Request, EngineError> {
        validate_range(&range)?;
        if justification.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("justification too long"));
        }

        let (employee_id, mut guard) = self.resolve_request_write(&id).await?;
        let (status, old_range, kind, period_id) = {
            let request = guard.request(&id).ok_or(EngineError::NotFound(id))?;
            (
                request.status,
                request.range,
                request.kind.clone(),
                request.period_id,
            )
        };
        if status != RequestStatus::Pending {
            return Err(EngineError::InvalidTransition {
                request: id,
                from: status,
                action: "edit",
            });
        }

        let days = range.day_count();
        if range != old_range {
            let blocking = overlap_conflicts(&guard, &range);
            if !blocking.is_empty() {
                return Err(EngineError::refused(
                    "requested dates overlap an already approved absence",
                    blocking,
                ));
            }
            let period = self
                .periods
                .get(&period_id)
                .map(|p| p.value().clone())
                .ok_or(EngineError::NotFound(period_id))?;
            self.check_balance_cap(&guard, &period, &kind, days)?;
        }

        let event = Event::RequestEdited {
            id,
            employee_id,
            range,
            days,
            justification,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        Ok(guard
            .request(&id)
            .cloned()
            .expect("edited request present after apply"))
    }

    /// Department-head stage. Legal only from `Pending`.
    pub async fn first_stage_approve(
        &self,
        id: Ulid,
        reviewer: Ulid,
    ) -> Result<Request, EngineError> {
        let (employee_id, mut guard) = self.resolve_request_write(&id).await?;
        let status = guard
            .request(&id)
            .map(|r| r.status)
            .ok_or(EngineError::NotFound(id))?;
        if status != RequestStatus::Pending {
            return Err(EngineError::InvalidTransition {
                request: id,
                from: status,
                action: "first-stage approve",
            });
        }

        let event = Event::FirstStageApproved {
            id,
            employee_id,
            reviewer,
            at: Utc::now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        Ok(guard
            .request(&id)
            .cloned()
            .expect("request present after apply"))
    }

    /// Department-head rejection: terminal, requires a reason.
    pub async fn first_stage_reject(
        &self,
        id: Ulid,
        reviewer: Ulid,
        reason: String,
    ) -> Result<Request, EngineError> {
        require_reason(&reason)?;
        let (employee_id, mut guard) = self.resolve_request_write(&id).await?;
        let status = guard
            .request(&id)
            .map(|r| r.status)
            .ok_or(EngineError::NotFound(id))?;
        if status != RequestStatus::Pending {
            return Err(EngineError::InvalidTransition {
                request: id,
                from: status,
                action: "first-stage reject",
            });
        }

        let event = Event::FirstStageRejected {
            id,
            employee_id,
            reviewer,
            at: Utc::now(),
            reason,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        Ok(guard
            .request(&id)
            .cloned()
            .expect("request present after apply"))
    }

    /// Finance stage. Legal only from `FirstApproved`. The status change and
    /// the ledger deduction are one event: both commit or neither does.
    /// Concurrent calls serialize on the employee lock; only the first
    /// passes the guard.
    pub async fn final_approve(&self, id: Ulid, reviewer: Ulid) -> Result<Request, EngineError> {
        let (employee_id, mut guard) = self.resolve_request_write(&id).await?;
        let status = guard
            .request(&id)
            .map(|r| r.status)
            .ok_or(EngineError::NotFound(id))?;
        if status != RequestStatus::FirstApproved {
            return Err(EngineError::InvalidTransition {
                request: id,
                from: status,
                action: "final approve",
            });
        }

        // Deduction target validated before the event is journaled — a
        // request must never commit approved with an unbookable balance.
        let (period_id, slot, days) = self.prepare_deduction(&guard, &id)?;

        let event = Event::FinalApproved {
            id,
            employee_id,
            reviewer,
            at: Utc::now(),
            period_id,
            slot,
            days,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        Ok(guard
            .request(&id)
            .cloned()
            .expect("request present after apply"))
    }

    /// Finance rejection: terminal, requires a reason, deducts nothing.
    /// A first-stage approval is being overridden, so the first reviewer
    /// gets a direct cross-role signal in addition to the requester's
    /// decision notice.
    pub async fn final_reject(
        &self,
        id: Ulid,
        reviewer: Ulid,
        reason: String,
    ) -> Result<Request, EngineError> {
        require_reason(&reason)?;
        let (employee_id, mut guard) = self.resolve_request_write(&id).await?;
        let status = guard
            .request(&id)
            .map(|r| r.status)
            .ok_or(EngineError::NotFound(id))?;
        if status != RequestStatus::FirstApproved {
            return Err(EngineError::InvalidTransition {
                request: id,
                from: status,
                action: "final reject",
            });
        }

        let event = Event::FinalRejected {
            id,
            employee_id,
            reviewer,
            at: Utc::now(),
            reason: reason.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        if let Some(first) = guard.request(&id).and_then(|r| r.first_review) {
            self.notify
                .send(Notice::review_overridden(first.reviewer, id, &reason));
        }

        Ok(guard
            .request(&id)
            .cloned()
            .expect("request present after apply"))
    }
}
