//! End-to-end exercise of the public engine surface: catalog setup, the
//! two-stage approval flow with notices, ledger accounting, the promotion
//! batch, and a restart that replays everything from the journal.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use ulid::Ulid;

use furlough::engine::{Engine, EngineError};
use furlough::model::*;
use furlough::notify::{NoticeKind, NotifyHub};

fn test_journal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("furlough_test_integration");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

#[tokio::test]
async fn leave_lifecycle_end_to_end() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let path = test_journal_path("lifecycle.journal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(path.clone(), notify.clone()).unwrap());

    // ── Catalog setup ────────────────────────────────────

    let alice = Ulid::new();
    engine
        .register_employee(
            alice,
            "Alice Ramos".into(),
            "Mathematics".into(),
            "Instructor".into(),
            EmploymentStatus::Regular,
        )
        .await
        .unwrap();
    let head = Ulid::new();
    engine
        .register_employee(
            head,
            "Dan Ocampo".into(),
            "Mathematics".into(),
            "Department Head".into(),
            EmploymentStatus::Regular,
        )
        .await
        .unwrap();

    let period = Ulid::new();
    engine
        .register_period(
            period,
            "AY 2025".into(),
            DayRange::new(d(2025, 1, 1), d(2025, 12, 31)),
            TermKind::Regular,
            false,
        )
        .await
        .unwrap();
    engine.set_current_period(period).await.unwrap();
    engine
        .set_rule(
            EmploymentStatus::Regular,
            TermKind::Regular,
            Some(LeaveCategory::Vacation),
            15,
        )
        .await
        .unwrap();

    // ── Submit → first stage → final stage ───────────────

    let mut alice_rx = notify.subscribe(alice);

    let admission = engine
        .check_admission(alice, DayRange::new(d(2025, 3, 10), d(2025, 3, 15)))
        .await
        .unwrap();
    assert!(admission.allowed);

    let request_id = Ulid::new();
    engine
        .submit_request(
            request_id,
            alice,
            RequestKind::Leave {
                category: LeaveCategory::Vacation,
            },
            DayRange::new(d(2025, 3, 10), d(2025, 3, 15)),
            "Family trip".into(),
        )
        .await
        .unwrap();

    let notice = alice_rx.recv().await.unwrap();
    assert_eq!(notice.kind, NoticeKind::RequestSubmitted);

    // A second submission is refused while the first is under review
    let blocked = engine
        .submit_request(
            Ulid::new(),
            alice,
            RequestKind::Leave {
                category: LeaveCategory::Vacation,
            },
            DayRange::new(d(2025, 7, 1), d(2025, 7, 2)),
            "Too eager".into(),
        )
        .await;
    match blocked {
        Err(EngineError::Refused { blocking, .. }) => assert_eq!(blocking, vec![request_id]),
        other => panic!("expected Refused, got {other:?}"),
    }

    engine.first_stage_approve(request_id, head).await.unwrap();
    assert_eq!(
        alice_rx.recv().await.unwrap().kind,
        NoticeKind::FirstStageDecision
    );

    let finance = Ulid::new();
    let approved = engine.final_approve(request_id, finance).await.unwrap();
    assert_eq!(approved.status, RequestStatus::FinalApproved);
    assert_eq!(
        alice_rx.recv().await.unwrap().kind,
        NoticeKind::FinalDecision
    );

    // ── Ledger reflects the terminal approval exactly once ──

    let balance = engine
        .get_balance(alice, period, LeaveCategory::Vacation)
        .await
        .unwrap();
    assert_eq!(balance.allowed_days, 15);
    assert_eq!(balance.used_days, 6);
    assert_eq!(balance.remaining_days, 9);

    // Approved dates now block overlapping submissions
    let admission = engine
        .check_admission(alice, DayRange::new(d(2025, 3, 12), d(2025, 3, 20)))
        .await
        .unwrap();
    assert!(!admission.allowed);
    assert_eq!(admission.blocking, vec![request_id]);

    // ── Restart: everything replays from the journal ─────

    drop(engine);
    let engine2 = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();

    let request = engine2.get_request(request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::FinalApproved);
    assert_eq!(request.first_review.unwrap().reviewer, head);
    assert_eq!(request.final_review.unwrap().reviewer, finance);

    let balance = engine2
        .get_balance(alice, period, LeaveCategory::Vacation)
        .await
        .unwrap();
    assert_eq!(balance.used_days, 6);
}

#[tokio::test]
async fn final_rejection_signals_the_overridden_reviewer() {
    let path = test_journal_path("override.journal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Engine::new(path, notify.clone()).unwrap();

    let bea = Ulid::new();
    engine
        .register_employee(
            bea,
            "Bea Santos".into(),
            "Registrar".into(),
            "Clerk".into(),
            EmploymentStatus::Regular,
        )
        .await
        .unwrap();
    let period = Ulid::new();
    engine
        .register_period(
            period,
            "AY 2025".into(),
            DayRange::new(d(2025, 1, 1), d(2025, 12, 31)),
            TermKind::Regular,
            false,
        )
        .await
        .unwrap();
    engine.set_current_period(period).await.unwrap();

    let request_id = Ulid::new();
    engine
        .submit_request(
            request_id,
            bea,
            RequestKind::Travel {
                destination: "Provincial office".into(),
                purpose: "Records audit".into(),
            },
            DayRange::new(d(2025, 5, 5), d(2025, 5, 6)),
            "Scheduled audit".into(),
        )
        .await
        .unwrap();

    let head = Ulid::new();
    engine.first_stage_approve(request_id, head).await.unwrap();

    let mut head_rx = notify.subscribe(head);
    engine
        .final_reject(request_id, Ulid::new(), "Travel budget exhausted".into())
        .await
        .unwrap();

    let notice = head_rx.recv().await.unwrap();
    assert_eq!(notice.kind, NoticeKind::ReviewOverridden);
    assert_eq!(notice.payload["request_id"], request_id.to_string());

    // Rejection is terminal and deducted nothing — no balance row needed:
    // the request never touched the ledger
    let request = engine.get_request(request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::FinalRejected);
    assert_eq!(
        request.reject_reason.as_deref(),
        Some("Travel budget exhausted")
    );
}

#[tokio::test]
async fn promotion_batch_survives_restart() {
    let path = test_journal_path("promotion.journal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Engine::new(path.clone(), notify.clone()).unwrap();

    let mut staff = Vec::new();
    for i in 0..3 {
        let employee = Ulid::new();
        engine
            .register_employee(
                employee,
                format!("Probationer {i}"),
                "Library".into(),
                "Assistant".into(),
                EmploymentStatus::Probationary,
            )
            .await
            .unwrap();
        engine
            .start_probation(Ulid::new(), employee, d(2025, 1, 1), d(2025, 6, 30))
            .await
            .unwrap();
        staff.push(employee);
    }

    let report = engine.process_expired_probations(Utc::now()).await;
    assert_eq!(report.promoted, 3);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.result == PromotionResult::Promoted));

    // Re-running is a no-op
    let again = engine.process_expired_probations(Utc::now()).await;
    assert_eq!(again.promoted, 0);

    drop(engine);
    let engine2 = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    for employee in staff {
        let info = engine2.get_employee(employee).await.unwrap();
        assert_eq!(info.status, EmploymentStatus::Regular);
    }
    let after_restart = engine2.process_expired_probations(Utc::now()).await;
    assert_eq!(after_restart.promoted, 0);
}
