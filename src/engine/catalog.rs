use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::admission::validate_range;
use super::{Engine, EngineError};

/// Journaled setup operations: reference data the engine needs in replayable
/// form. The administration surface over these is the embedding service's
/// concern; the engine only enforces bounds and identity.
impl Engine {
    pub async fn register_employee(
        &self,
        id: Ulid,
        name: String,
        department: String,
        role: String,
        status: EmploymentStatus,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_EMPLOYEES {
            return Err(EngineError::LimitExceeded("too many employees"));
        }
        if name.len() > MAX_NAME_LEN || department.len() > MAX_NAME_LEN || role.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::EmployeeRegistered {
            id,
            name: name.clone(),
            department: department.clone(),
            role: role.clone(),
            status,
        };
        self.journal_append(&event).await?;
        let es = EmployeeState::new(id, name, department, role, status);
        self.state.insert(id, Arc::new(RwLock::new(es)));
        Ok(())
    }

    pub async fn register_period(
        &self,
        id: Ulid,
        name: String,
        range: DayRange,
        term: TermKind,
        shared_pool: bool,
    ) -> Result<(), EngineError> {
        validate_range(&range)?;
        if self.periods.len() >= MAX_PERIODS {
            return Err(EngineError::LimitExceeded("too many periods"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        if self.periods.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::PeriodRegistered {
            id,
            name,
            range,
            term,
            shared_pool,
        };
        self.journal_append(&event).await?;
        self.apply_registry(&event);
        Ok(())
    }

    /// Mark a period current. Exactly one period is current at a time; the
    /// previous holder is cleared in the same event application.
    pub async fn set_current_period(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.periods.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::CurrentPeriodSet { id };
        self.journal_append(&event).await?;
        self.apply_registry(&event);
        Ok(())
    }

    /// Set (or replace) one entitlement rule row:
    /// (status × term × category-or-pool) → days allowed.
    pub async fn set_rule(
        &self,
        status: EmploymentStatus,
        term: TermKind,
        category: Option<LeaveCategory>,
        days: u32,
    ) -> Result<(), EngineError> {
        if days > MAX_ALLOWED_DAYS {
            return Err(EngineError::LimitExceeded("allowance too large"));
        }
        let event = Event::RuleSet {
            status,
            term,
            category,
            days,
        };
        self.journal_append(&event).await?;
        self.apply_registry(&event);
        Ok(())
    }

    /// Provision a balance record sized from the rule table. For shared-pool
    /// periods this creates the one canonical pool row; `category` is
    /// ignored there. Idempotent: an already-open record is returned as-is.
    pub async fn open_balance(
        &self,
        employee_id: Ulid,
        period_id: Ulid,
        category: Option<LeaveCategory>,
    ) -> Result<BalanceView, EngineError> {
        let period = self
            .periods
            .get(&period_id)
            .map(|p| p.value().clone())
            .ok_or(EngineError::NotFound(period_id))?;
        let es = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let mut guard = es.write().await;

        let (slot, rule_category) = if period.shared_pool {
            (BalanceSlot::Pool, None)
        } else {
            let category =
                category.ok_or(EngineError::LimitExceeded("leave category required"))?;
            (BalanceSlot::Category(category), Some(category))
        };

        if let Some(record) = guard.balances.get(&(period_id, slot)) {
            return Ok(BalanceView {
                period_id,
                slot,
                allowed_days: record.allowed_days,
                used_days: record.used_days,
                remaining_days: record.remaining_days(),
            });
        }

        let allowed_days = self
            .rule_days(guard.status, period.term, rule_category)
            .ok_or(EngineError::DataIntegrity(
                "no entitlement rule for this status and term",
            ))?;

        let event = Event::BalanceOpened {
            employee_id,
            period_id,
            slot,
            allowed_days,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        Ok(BalanceView {
            period_id,
            slot,
            allowed_days,
            used_days: 0,
            remaining_days: allowed_days as i64,
        })
    }

    /// Open a probation term for a probationary employee. One active record
    /// per employee.
    pub async fn start_probation(
        &self,
        id: Ulid,
        employee_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), EngineError> {
        if end < start {
            return Err(EngineError::LimitExceeded("probation ends before it starts"));
        }
        if self.probations.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let es = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        // Held through the insert so two HR calls can't both pass the checks.
        let guard = es.write().await;
        if guard.status != EmploymentStatus::Probationary {
            return Err(EngineError::refused(
                "employee is not probationary",
                Vec::new(),
            ));
        }
        if let Some(existing) = self
            .probations
            .iter()
            .find(|p| p.employee_id == employee_id && p.status == ProbationStatus::Active)
        {
            return Err(EngineError::AlreadyExists(existing.id));
        }

        let event = Event::ProbationStarted {
            id,
            employee_id,
            start,
            end,
        };
        self.journal_append(&event).await?;
        self.apply_registry(&event);
        drop(guard);
        Ok(())
    }
}
