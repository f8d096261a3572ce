use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Which slot a request draws from: the one shared pool for shared-pool
/// periods, the per-category record otherwise.
pub(super) fn resolve_slot(period: &EntitlementPeriod, kind: &RequestKind) -> BalanceSlot {
    if period.shared_pool {
        BalanceSlot::Pool
    } else {
        BalanceSlot::Category(kind.category())
    }
}

impl Engine {
    /// Allowance from the entitlement rule table for
    /// (employment status, term kind, category-or-pool).
    pub(super) fn rule_days(
        &self,
        status: EmploymentStatus,
        term: TermKind,
        category: Option<LeaveCategory>,
    ) -> Option<u32> {
        self.rules
            .get(&RuleKey {
                status,
                term,
                category,
            })
            .map(|e| *e.value())
    }

    /// Allowance for a slot: the provisioned record wins, the rule table is
    /// the fallback for per-category slots that were never opened.
    fn allowed_days(
        &self,
        es: &EmployeeState,
        period: &EntitlementPeriod,
        slot: BalanceSlot,
    ) -> Option<u32> {
        if let Some(record) = es.balances.get(&(period.id, slot)) {
            return Some(record.allowed_days);
        }
        let category = match slot {
            BalanceSlot::Category(c) => Some(c),
            BalanceSlot::Pool => None,
        };
        self.rule_days(es.status, period.term, category)
    }

    /// Balance for one (employee, period, category): allowed from the rule
    /// table or record, used summed into the record by terminal approvals.
    pub(super) fn balance_view(
        &self,
        es: &EmployeeState,
        period: &EntitlementPeriod,
        category: LeaveCategory,
    ) -> Result<BalanceView, EngineError> {
        let slot = if period.shared_pool {
            BalanceSlot::Pool
        } else {
            BalanceSlot::Category(category)
        };
        let allowed_days = self
            .allowed_days(es, period, slot)
            .ok_or(EngineError::DataIntegrity(
                "no entitlement rule for this status and term",
            ))?;
        let used_days = es
            .balances
            .get(&(period.id, slot))
            .map_or(0, |r| r.used_days);
        Ok(BalanceView {
            period_id: period.id,
            slot,
            allowed_days,
            used_days,
            remaining_days: allowed_days as i64 - used_days as i64,
        })
    }

    /// Policy-gated Rule 3: requested days must fit the remaining balance.
    pub(super) fn check_balance_cap(
        &self,
        es: &EmployeeState,
        period: &EntitlementPeriod,
        kind: &RequestKind,
        days: u32,
    ) -> Result<(), EngineError> {
        if !self.config.enforce_balance_cap {
            return Ok(());
        }
        let view = self.balance_view(es, period, kind.category())?;
        if days as i64 > view.remaining_days {
            return Err(EngineError::refused(
                format!(
                    "requested {days} days but only {} remaining",
                    view.remaining_days
                ),
                Vec::new(),
            ));
        }
        Ok(())
    }

    /// Validate that a terminal approval can deduct, and resolve its target.
    /// Runs before the `FinalApproved` event is journaled: a request must
    /// never commit as approved with nowhere to book its days.
    ///
    /// Shared-pool periods require the provisioned pool row — its absence is
    /// a setup bug, never a silent no-op. Per-category rows may be opened
    /// lazily at apply time as long as a rule sizes them.
    pub(super) fn prepare_deduction(
        &self,
        es: &EmployeeState,
        request_id: &Ulid,
    ) -> Result<(Ulid, BalanceSlot, u32), EngineError> {
        let request = es
            .request(request_id)
            .ok_or(EngineError::NotFound(*request_id))?;
        let period = self
            .periods
            .get(&request.period_id)
            .ok_or(EngineError::NotFound(request.period_id))?;
        let slot = resolve_slot(&period, &request.kind);
        match slot {
            BalanceSlot::Pool => {
                if !es.balances.contains_key(&(period.id, BalanceSlot::Pool)) {
                    tracing::error!(
                        employee = %es.id,
                        period = %period.id,
                        "shared-pool balance row missing"
                    );
                    return Err(EngineError::DataIntegrity(
                        "shared-pool balance row missing",
                    ));
                }
            }
            BalanceSlot::Category(category) => {
                if !es.balances.contains_key(&(period.id, slot))
                    && self
                        .rule_days(es.status, period.term, Some(category))
                        .is_none()
                {
                    return Err(EngineError::DataIntegrity(
                        "no entitlement rule for this status and term",
                    ));
                }
            }
        }
        Ok((period.id, slot, request.days))
    }

    /// Book the days. Called only from the application of `FinalApproved`,
    /// after `prepare_deduction` validated the target, so the fallbacks here
    /// never fire on the live path and replay sees the same rule table state.
    pub(super) fn apply_deduction(
        &self,
        es: &mut EmployeeState,
        period_id: Ulid,
        slot: BalanceSlot,
        days: u32,
    ) {
        let allowed = match slot {
            BalanceSlot::Pool => 0,
            BalanceSlot::Category(category) => self
                .periods
                .get(&period_id)
                .and_then(|p| self.rule_days(es.status, p.term, Some(category)))
                .unwrap_or(0),
        };
        let record = es
            .balances
            .entry((period_id, slot))
            .or_insert(BalanceRecord {
                allowed_days: allowed,
                used_days: 0,
            });
        record.used_days += days;
    }
}
