use ulid::Ulid;

use crate::model::*;

use super::admission::{in_flight_conflicts, overlap_conflicts, validate_range};
use super::{Engine, EngineError};

impl Engine {
    /// Advisory form of the admission rules, for display before a submission
    /// attempt. Evaluated against committed state only — `submit_request`
    /// re-runs the same rules under the employee's lock, so the answer here
    /// is a preview, not a reservation.
    pub async fn check_admission(
        &self,
        employee_id: Ulid,
        range: DayRange,
    ) -> Result<Admission, EngineError> {
        validate_range(&range)?;
        let es = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let guard = es.read().await;

        let blocking = in_flight_conflicts(&guard);
        if !blocking.is_empty() {
            return Ok(Admission {
                allowed: false,
                reason: Some("another request is still under review".into()),
                blocking,
            });
        }
        let blocking = overlap_conflicts(&guard, &range);
        if !blocking.is_empty() {
            return Ok(Admission {
                allowed: false,
                reason: Some("requested dates overlap an already approved absence".into()),
                blocking,
            });
        }
        Ok(Admission {
            allowed: true,
            reason: None,
            blocking: Vec::new(),
        })
    }

    pub async fn get_balance(
        &self,
        employee_id: Ulid,
        period_id: Ulid,
        category: LeaveCategory,
    ) -> Result<BalanceView, EngineError> {
        let period = self
            .periods
            .get(&period_id)
            .map(|p| p.value().clone())
            .ok_or(EngineError::NotFound(period_id))?;
        let es = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let guard = es.read().await;
        self.balance_view(&guard, &period, category)
    }

    pub async fn get_request(&self, id: Ulid) -> Result<Request, EngineError> {
        let employee_id = self
            .request_to_employee
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let es = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let guard = es.read().await;
        guard
            .request(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Full request history, sorted by start date.
    pub async fn list_requests(&self, employee_id: Ulid) -> Result<Vec<Request>, EngineError> {
        let es = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let guard = es.read().await;
        Ok(guard.requests.clone())
    }

    /// The request currently occupying the employee's submission slot, if
    /// any. The single in-flight invariant makes "at most one" a given.
    pub async fn in_flight_request(
        &self,
        employee_id: Ulid,
    ) -> Result<Option<Request>, EngineError> {
        let es = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let guard = es.read().await;
        Ok(guard.in_flight().next().cloned())
    }

    pub async fn get_employee(&self, id: Ulid) -> Result<EmployeeInfo, EngineError> {
        let es = self
            .get_employee_state(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = es.read().await;
        Ok(EmployeeInfo {
            id: guard.id,
            name: guard.name.clone(),
            department: guard.department.clone(),
            role: guard.role.clone(),
            status: guard.status,
        })
    }

    pub fn list_employees(&self) -> Vec<EmployeeInfo> {
        self.state
            .iter()
            .map(|entry| {
                let es = entry.value().clone();
                let guard = es.try_read().expect("list_employees: uncontended read");
                EmployeeInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                    department: guard.department.clone(),
                    role: guard.role.clone(),
                    status: guard.status,
                }
            })
            .collect()
    }

    pub fn current_period(&self) -> Option<EntitlementPeriod> {
        self.periods.iter().find(|p| p.current).map(|p| p.value().clone())
    }

    pub fn get_period(&self, id: &Ulid) -> Option<EntitlementPeriod> {
        self.periods.get(id).map(|p| p.value().clone())
    }

    pub fn get_probation(&self, id: &Ulid) -> Option<ProbationRecord> {
        self.probations.get(id).map(|p| p.value().clone())
    }
}
