use chrono::Datelike;
use ulid::Ulid;

use crate::model::{DayRange, EmployeeState};

use super::EngineError;

pub(crate) fn validate_range(range: &DayRange) -> Result<(), EngineError> {
    use crate::limits::*;
    if range.end < range.start {
        return Err(EngineError::LimitExceeded("range ends before it starts"));
    }
    if range.start.year() < MIN_VALID_YEAR || range.end.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if range.day_count() > MAX_REQUEST_DAYS {
        return Err(EngineError::LimitExceeded("request spans too many days"));
    }
    Ok(())
}

/// Rule 1 — single in-flight request: leave and travel counted together,
/// at most one in `Pending` or `FirstApproved`.
pub(crate) fn in_flight_conflicts(es: &EmployeeState) -> Vec<Ulid> {
    es.in_flight().map(|r| r.id).collect()
}

/// Rule 2 — no double-booking: the proposed range must not intersect any
/// fully-approved request. Inclusive interval intersection, so start-inside,
/// end-inside, and full containment are all caught.
pub(crate) fn overlap_conflicts(es: &EmployeeState, range: &DayRange) -> Vec<Ulid> {
    es.overlapping_approved(range).map(|r| r.id).collect()
}

/// Both admission rules against the state the caller has locked. Evaluated
/// a second time inside `submit_request`'s critical section, so the check
/// and the insert can never be interleaved by another submission.
pub(crate) fn check_admission(es: &EmployeeState, range: &DayRange) -> Result<(), EngineError> {
    let blocking = in_flight_conflicts(es);
    if !blocking.is_empty() {
        return Err(EngineError::refused(
            "another request is still under review",
            blocking,
        ));
    }
    let blocking = overlap_conflicts(es, range);
    if !blocking.is_empty() {
        return Err(EngineError::refused(
            "requested dates overlap an already approved absence",
            blocking,
        ));
    }
    Ok(())
}
