//! Upper bounds on caller-supplied input. Every unbounded string, count, or
//! date the engine accepts is capped here.

/// Max length of names: employees, departments, roles, periods, destinations.
pub const MAX_NAME_LEN: usize = 128;

/// Max length of free-text fields: justification, purpose, rejection reason.
pub const MAX_TEXT_LEN: usize = 2000;

/// Max requests a single employee can accumulate (lifetime, audit trail included).
pub const MAX_REQUESTS_PER_EMPLOYEE: usize = 512;

/// Max calendar days a single request may span.
pub const MAX_REQUEST_DAYS: u32 = 366;

/// Max days an entitlement rule may grant.
pub const MAX_ALLOWED_DAYS: u32 = 366;

/// Valid calendar window for request and period dates.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2100;

/// Max registered employees per engine.
pub const MAX_EMPLOYEES: usize = 100_000;

/// Max registered entitlement periods per engine.
pub const MAX_PERIODS: usize = 1024;
