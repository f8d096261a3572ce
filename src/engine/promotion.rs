use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Active probation records whose term has ended as of the given
    /// instant. Snapshot only — each record's guard is re-checked under its
    /// employee's lock before anything changes.
    pub fn collect_expired_probations(&self, as_of: DateTime<Utc>) -> Vec<(Ulid, Ulid)> {
        let cutoff = as_of.date_naive();
        self.probations
            .iter()
            .filter(|p| p.status == ProbationStatus::Active && p.end <= cutoff)
            .map(|p| (p.id, p.employee_id))
            .collect()
    }

    /// Promote every employee whose probation has expired. Records are
    /// processed independently: one record's failure never aborts the rest,
    /// and a record completed by an earlier or concurrent run is skipped —
    /// the whole batch is safe to invoke repeatedly.
    pub async fn process_expired_probations(&self, as_of: DateTime<Utc>) -> PromotionReport {
        let mut promoted = 0usize;
        let mut outcomes = Vec::new();

        for (probation_id, employee_id) in self.collect_expired_probations(as_of) {
            let result = match self.promote_one(probation_id, employee_id, as_of).await {
                Ok(true) => {
                    promoted += 1;
                    tracing::info!(%probation_id, %employee_id, "probation completed, employee promoted");
                    PromotionResult::Promoted
                }
                Ok(false) => {
                    tracing::debug!(%probation_id, "already completed, skipped");
                    PromotionResult::Skipped
                }
                Err(e) => {
                    tracing::warn!(%probation_id, %employee_id, error = %e, "promotion failed");
                    PromotionResult::Failed(e.to_string())
                }
            };
            outcomes.push(PromotionOutcome {
                probation_id,
                employee_id,
                result,
            });
        }

        if promoted > 0 {
            metrics::counter!(crate::observability::PROMOTIONS_TOTAL).increment(promoted as u64);
        }
        PromotionReport { promoted, outcomes }
    }

    /// One record's read-modify-write, atomic under the employee's lock.
    /// Returns Ok(false) when a concurrent run already completed it.
    async fn promote_one(
        &self,
        probation_id: Ulid,
        employee_id: Ulid,
        as_of: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let es = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let mut guard = es.write().await;

        match self.probations.get(&probation_id).map(|p| p.status) {
            None => return Err(EngineError::NotFound(probation_id)),
            Some(ProbationStatus::Completed) => return Ok(false),
            Some(ProbationStatus::Active) => {}
        }

        // One event completes the record and promotes the employee; the
        // notice toward the employee follows the commit, best-effort.
        let event = Event::ProbationCompleted {
            id: probation_id,
            employee_id,
            at: as_of,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }
}
