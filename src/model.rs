use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Inclusive calendar-day interval `[start, end]`. Leave is taken in whole
/// days, so both endpoints count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DayRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DayRange start must not be after end");
        Self { start, end }
    }

    pub fn day_count(&self) -> u32 {
        (self.end - self.start).num_days() as u32 + 1
    }

    /// Any intersection counts: start inside, end inside, or full containment.
    pub fn overlaps(&self, other: &DayRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_range(&self, other: &DayRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Employment status. Mutated only by the promotion batch
/// (Probationary → Regular); fixed at registration otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmploymentStatus {
    Probationary,
    Regular,
    Contractual,
}

/// Kinds of absence. Static reference data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaveCategory {
    Vacation,
    Sick,
    Maternity,
    Paternity,
    Emergency,
    Travel,
}

/// Term category of an entitlement period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TermKind {
    Regular,
    Intensive,
}

/// A bounded calendar term against which leave allowances are computed.
/// `shared_pool` is an explicit policy flag: when set, every category draws
/// from one common day allowance instead of per-category allowances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementPeriod {
    pub id: Ulid,
    pub name: String,
    pub range: DayRange,
    pub term: TermKind,
    pub shared_pool: bool,
    pub current: bool,
}

/// Key into the entitlement rule table. `category: None` is the shared-pool
/// row for terms where all categories draw from one allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleKey {
    pub status: EmploymentStatus,
    pub term: TermKind,
    pub category: Option<LeaveCategory>,
}

/// Which balance record a request draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BalanceSlot {
    Category(LeaveCategory),
    Pool,
}

/// Day accounting for one (employee, period, slot). `used_days` only ever
/// grows, and only inside the application of a `FinalApproved` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub allowed_days: u32,
    pub used_days: u32,
}

impl BalanceRecord {
    /// Signed: policy may legally drive a balance negative.
    pub fn remaining_days(&self) -> i64 {
        self.allowed_days as i64 - self.used_days as i64
    }
}

/// Payload distinguishing the two request variants. Both share the same
/// state machine and ledger path; travel draws on the Travel category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Leave { category: LeaveCategory },
    Travel { destination: String, purpose: String },
}

impl RequestKind {
    pub fn category(&self) -> LeaveCategory {
        match self {
            RequestKind::Leave { category } => *category,
            RequestKind::Travel { .. } => LeaveCategory::Travel,
        }
    }
}

/// Request lifecycle. Pending → FirstApproved | FirstRejected;
/// FirstApproved → FinalApproved | FinalRejected. The last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    FirstApproved,
    FirstRejected,
    FinalApproved,
    FinalRejected,
}

impl RequestStatus {
    /// Still occupying the employee's single submission slot.
    pub fn is_in_flight(self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::FirstApproved)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_in_flight()
    }
}

/// One completed review stage: who acted, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub reviewer: Ulid,
    pub at: DateTime<Utc>,
}

/// A leave application or travel order. Editable while Pending; immutable
/// audit record once it leaves that state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: Ulid,
    pub employee_id: Ulid,
    pub period_id: Ulid,
    pub kind: RequestKind,
    pub range: DayRange,
    pub days: u32,
    pub justification: String,
    pub status: RequestStatus,
    pub submitted_at: DateTime<Utc>,
    pub first_review: Option<Review>,
    pub final_review: Option<Review>,
    pub reject_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbationStatus {
    Active,
    Completed,
}

/// One probation term per employee. Created by HR, completed only by the
/// promotion batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbationRecord {
    pub id: Ulid,
    pub employee_id: Ulid,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub status: ProbationStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub notified: bool,
}

/// Per-employee state: identity, current employment status, the full request
/// history, and balance records. One write lock around this struct is the
/// row lock that serializes every guard-check-then-mutate sequence.
#[derive(Debug, Clone)]
pub struct EmployeeState {
    pub id: Ulid,
    pub name: String,
    pub department: String,
    pub role: String,
    pub status: EmploymentStatus,
    /// All requests, sorted by `range.start`.
    pub requests: Vec<Request>,
    pub balances: HashMap<(Ulid, BalanceSlot), BalanceRecord>,
}

impl EmployeeState {
    pub fn new(
        id: Ulid,
        name: String,
        department: String,
        role: String,
        status: EmploymentStatus,
    ) -> Self {
        Self {
            id,
            name,
            department,
            role,
            status,
            requests: Vec::new(),
            balances: HashMap::new(),
        }
    }

    /// Insert a request maintaining sort order by `range.start`.
    pub fn insert_request(&mut self, request: Request) {
        let pos = self
            .requests
            .binary_search_by_key(&request.range.start, |r| r.range.start)
            .unwrap_or_else(|e| e);
        self.requests.insert(pos, request);
    }

    /// Remove a request by id (used only to re-sort after a date edit —
    /// requests past Pending are never removed).
    pub fn remove_request(&mut self, id: &Ulid) -> Option<Request> {
        let pos = self.requests.iter().position(|r| &r.id == id)?;
        Some(self.requests.remove(pos))
    }

    pub fn request(&self, id: &Ulid) -> Option<&Request> {
        self.requests.iter().find(|r| &r.id == id)
    }

    pub fn request_mut(&mut self, id: &Ulid) -> Option<&mut Request> {
        self.requests.iter_mut().find(|r| &r.id == id)
    }

    /// Requests still occupying the single submission slot.
    pub fn in_flight(&self) -> impl Iterator<Item = &Request> {
        self.requests.iter().filter(|r| r.status.is_in_flight())
    }

    /// Fully-approved requests whose date range intersects `query`.
    /// Binary search skips requests starting after the query end.
    pub fn overlapping_approved(&self, query: &DayRange) -> impl Iterator<Item = &Request> {
        // Everything at index >= right_bound starts after query.end → can't
        // overlap an inclusive range.
        let right_bound = self
            .requests
            .partition_point(|r| r.range.start <= query.end);
        self.requests[..right_bound]
            .iter()
            .filter(move |r| r.status == RequestStatus::FinalApproved && r.range.end >= query.start)
    }
}

/// The event types — flat, no nesting. This is the journal record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    EmployeeRegistered {
        id: Ulid,
        name: String,
        department: String,
        role: String,
        status: EmploymentStatus,
    },
    PeriodRegistered {
        id: Ulid,
        name: String,
        range: DayRange,
        term: TermKind,
        shared_pool: bool,
    },
    CurrentPeriodSet {
        id: Ulid,
    },
    RuleSet {
        status: EmploymentStatus,
        term: TermKind,
        category: Option<LeaveCategory>,
        days: u32,
    },
    BalanceOpened {
        employee_id: Ulid,
        period_id: Ulid,
        slot: BalanceSlot,
        allowed_days: u32,
    },
    RequestSubmitted {
        id: Ulid,
        employee_id: Ulid,
        period_id: Ulid,
        kind: RequestKind,
        range: DayRange,
        days: u32,
        justification: String,
        at: DateTime<Utc>,
    },
    RequestEdited {
        id: Ulid,
        employee_id: Ulid,
        range: DayRange,
        days: u32,
        justification: String,
    },
    FirstStageApproved {
        id: Ulid,
        employee_id: Ulid,
        reviewer: Ulid,
        at: DateTime<Utc>,
    },
    FirstStageRejected {
        id: Ulid,
        employee_id: Ulid,
        reviewer: Ulid,
        at: DateTime<Utc>,
        reason: String,
    },
    FinalApproved {
        id: Ulid,
        employee_id: Ulid,
        reviewer: Ulid,
        at: DateTime<Utc>,
        period_id: Ulid,
        slot: BalanceSlot,
        days: u32,
    },
    FinalRejected {
        id: Ulid,
        employee_id: Ulid,
        reviewer: Ulid,
        at: DateTime<Utc>,
        reason: String,
    },
    ProbationStarted {
        id: Ulid,
        employee_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    },
    ProbationCompleted {
        id: Ulid,
        employee_id: Ulid,
        at: DateTime<Utc>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmployeeInfo {
    pub id: Ulid,
    pub name: String,
    pub department: String,
    pub role: String,
    pub status: EmploymentStatus,
}

/// Admission check outcome. Refusals are expected control flow: `reason` is
/// displayable and `blocking` lists the requests in the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub allowed: bool,
    pub reason: Option<String>,
    pub blocking: Vec<Ulid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceView {
    pub period_id: Ulid,
    pub slot: BalanceSlot,
    pub allowed_days: u32,
    pub used_days: u32,
    pub remaining_days: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PromotionResult {
    Promoted,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionOutcome {
    pub probation_id: Ulid,
    pub employee_id: Ulid,
    pub result: PromotionResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    pub promoted: usize,
    pub outcomes: Vec<PromotionOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn pending(id: Ulid, start: NaiveDate, end: NaiveDate) -> Request {
        Request {
            id,
            employee_id: Ulid::new(),
            period_id: Ulid::new(),
            kind: RequestKind::Leave {
                category: LeaveCategory::Vacation,
            },
            range: DayRange::new(start, end),
            days: DayRange::new(start, end).day_count(),
            justification: String::new(),
            status: RequestStatus::Pending,
            submitted_at: Utc::now(),
            first_review: None,
            final_review: None,
            reject_reason: None,
        }
    }

    #[test]
    fn day_range_basics() {
        let r = DayRange::new(d(2025, 3, 10), d(2025, 3, 15));
        assert_eq!(r.day_count(), 6); // inclusive on both ends
        assert!(r.contains_day(d(2025, 3, 10)));
        assert!(r.contains_day(d(2025, 3, 15)));
        assert!(!r.contains_day(d(2025, 3, 16)));
    }

    #[test]
    fn single_day_range() {
        let r = DayRange::new(d(2025, 6, 1), d(2025, 6, 1));
        assert_eq!(r.day_count(), 1);
    }

    #[test]
    fn overlap_is_inclusive_intersection() {
        let existing = DayRange::new(d(2025, 3, 10), d(2025, 3, 15));
        // start falls inside
        assert!(existing.overlaps(&DayRange::new(d(2025, 3, 12), d(2025, 3, 20))));
        // end falls inside
        assert!(existing.overlaps(&DayRange::new(d(2025, 3, 5), d(2025, 3, 10))));
        // full containment
        assert!(existing.overlaps(&DayRange::new(d(2025, 3, 1), d(2025, 3, 31))));
        // shared single endpoint still overlaps (inclusive)
        assert!(existing.overlaps(&DayRange::new(d(2025, 3, 15), d(2025, 3, 20))));
        // adjacent day does not
        assert!(!existing.overlaps(&DayRange::new(d(2025, 3, 16), d(2025, 3, 20))));
    }

    #[test]
    fn contains_range() {
        let outer = DayRange::new(d(2025, 1, 1), d(2025, 12, 31));
        let inner = DayRange::new(d(2025, 6, 1), d(2025, 6, 15));
        let partial = DayRange::new(d(2024, 12, 20), d(2025, 1, 5));
        assert!(outer.contains_range(&inner));
        assert!(outer.contains_range(&outer));
        assert!(!outer.contains_range(&partial));
    }

    #[test]
    fn request_kind_category() {
        let leave = RequestKind::Leave {
            category: LeaveCategory::Sick,
        };
        assert_eq!(leave.category(), LeaveCategory::Sick);
        let travel = RequestKind::Travel {
            destination: "Regional office".into(),
            purpose: "Audit".into(),
        };
        assert_eq!(travel.category(), LeaveCategory::Travel);
    }

    #[test]
    fn status_flags() {
        assert!(RequestStatus::Pending.is_in_flight());
        assert!(RequestStatus::FirstApproved.is_in_flight());
        assert!(RequestStatus::FirstRejected.is_terminal());
        assert!(RequestStatus::FinalApproved.is_terminal());
        assert!(RequestStatus::FinalRejected.is_terminal());
    }

    #[test]
    fn request_ordering() {
        let mut es = EmployeeState::new(
            Ulid::new(),
            "A".into(),
            "Math".into(),
            "Instructor".into(),
            EmploymentStatus::Regular,
        );
        es.insert_request(pending(Ulid::new(), d(2025, 5, 1), d(2025, 5, 3)));
        es.insert_request(pending(Ulid::new(), d(2025, 2, 1), d(2025, 2, 3)));
        es.insert_request(pending(Ulid::new(), d(2025, 3, 1), d(2025, 3, 3)));
        assert_eq!(es.requests[0].range.start, d(2025, 2, 1));
        assert_eq!(es.requests[1].range.start, d(2025, 3, 1));
        assert_eq!(es.requests[2].range.start, d(2025, 5, 1));
    }

    #[test]
    fn remove_request_preserves_order() {
        let mut es = EmployeeState::new(
            Ulid::new(),
            "A".into(),
            "Math".into(),
            "Instructor".into(),
            EmploymentStatus::Regular,
        );
        let ids: Vec<Ulid> = (0..3).map(|_| Ulid::new()).collect();
        for (i, &id) in ids.iter().enumerate() {
            es.insert_request(pending(id, d(2025, (i + 1) as u32, 1), d(2025, (i + 1) as u32, 5)));
        }
        es.remove_request(&ids[1]);
        assert_eq!(es.requests.len(), 2);
        assert_eq!(es.requests[0].id, ids[0]);
        assert_eq!(es.requests[1].id, ids[2]);
        assert!(es.remove_request(&Ulid::new()).is_none());
    }

    #[test]
    fn overlapping_approved_filters_status_and_range() {
        let mut es = EmployeeState::new(
            Ulid::new(),
            "A".into(),
            "Math".into(),
            "Instructor".into(),
            EmploymentStatus::Regular,
        );
        let mut approved = pending(Ulid::new(), d(2025, 3, 10), d(2025, 3, 15));
        approved.status = RequestStatus::FinalApproved;
        let approved_id = approved.id;
        es.insert_request(approved);
        // pending in the same window — must not count
        es.insert_request(pending(Ulid::new(), d(2025, 3, 12), d(2025, 3, 14)));
        // approved but far away — must not count
        let mut far = pending(Ulid::new(), d(2025, 8, 1), d(2025, 8, 5));
        far.status = RequestStatus::FinalApproved;
        es.insert_request(far);

        let query = DayRange::new(d(2025, 3, 12), d(2025, 3, 20));
        let hits: Vec<_> = es.overlapping_approved(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, approved_id);

        let clear = DayRange::new(d(2025, 3, 16), d(2025, 3, 20));
        assert!(es.overlapping_approved(&clear).next().is_none());
    }

    #[test]
    fn in_flight_counts_leave_and_travel_together() {
        let mut es = EmployeeState::new(
            Ulid::new(),
            "A".into(),
            "Math".into(),
            "Instructor".into(),
            EmploymentStatus::Regular,
        );
        let mut travel = pending(Ulid::new(), d(2025, 4, 1), d(2025, 4, 2));
        travel.kind = RequestKind::Travel {
            destination: "Capital".into(),
            purpose: "Conference".into(),
        };
        travel.status = RequestStatus::FirstApproved;
        es.insert_request(travel);
        let mut done = pending(Ulid::new(), d(2025, 1, 1), d(2025, 1, 2));
        done.status = RequestStatus::FinalRejected;
        es.insert_request(done);
        assert_eq!(es.in_flight().count(), 1);
    }

    #[test]
    fn balance_remaining_may_go_negative() {
        let rec = BalanceRecord {
            allowed_days: 10,
            used_days: 14,
        };
        assert_eq!(rec.remaining_days(), -4);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RequestSubmitted {
            id: Ulid::new(),
            employee_id: Ulid::new(),
            period_id: Ulid::new(),
            kind: RequestKind::Leave {
                category: LeaveCategory::Vacation,
            },
            range: DayRange::new(d(2025, 3, 10), d(2025, 3, 15)),
            days: 6,
            justification: "Family trip".into(),
            at: Utc::now(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn terminal_event_roundtrip() {
        let event = Event::FinalApproved {
            id: Ulid::new(),
            employee_id: Ulid::new(),
            reviewer: Ulid::new(),
            at: Utc::now(),
            period_id: Ulid::new(),
            slot: BalanceSlot::Pool,
            days: 5,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
