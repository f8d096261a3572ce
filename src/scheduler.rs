use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::engine::Engine;
use crate::model::PromotionResult;

/// Background task that periodically promotes employees whose probation term
/// has ended. The batch is idempotent, so the interval only bounds promotion
/// latency, and a manual `process_expired_probations` run can happen at any
/// time alongside this loop.
pub async fn run_promoter(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let report = engine.process_expired_probations(Utc::now()).await;
        if report.promoted > 0 {
            info!(promoted = report.promoted, "promotion batch applied");
        }
        for outcome in &report.outcomes {
            if let PromotionResult::Failed(reason) = &outcome.result {
                tracing::warn!(
                    probation = %outcome.probation_id,
                    employee = %outcome.employee_id,
                    %reason,
                    "promotion failed, will retry next run"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_journal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("furlough_test_scheduler");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn promoter_collects_expired_probations() {
        let path = test_journal_path("promoter_collect.journal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify).unwrap());

        let employee = Ulid::new();
        engine
            .register_employee(
                employee,
                "Probie".into(),
                "Library".into(),
                "Assistant".into(),
                EmploymentStatus::Probationary,
            )
            .await
            .unwrap();

        let probation = Ulid::new();
        engine
            .start_probation(probation, employee, d(2025, 1, 1), d(2025, 6, 30))
            .await
            .unwrap();

        let as_of = Utc::now();
        let expired = engine.collect_expired_probations(as_of);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0], (probation, employee));

        let report = engine.process_expired_probations(as_of).await;
        assert_eq!(report.promoted, 1);

        // Nothing left to collect
        assert!(engine.collect_expired_probations(as_of).is_empty());
    }

    #[tokio::test]
    async fn promoter_ignores_unexpired_probations() {
        let path = test_journal_path("promoter_unexpired.journal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify).unwrap());

        let employee = Ulid::new();
        engine
            .register_employee(
                employee,
                "Probie".into(),
                "Library".into(),
                "Assistant".into(),
                EmploymentStatus::Probationary,
            )
            .await
            .unwrap();

        let end = (Utc::now() + chrono::Duration::days(90)).date_naive();
        engine
            .start_probation(Ulid::new(), employee, Utc::now().date_naive(), end)
            .await
            .unwrap();

        assert!(engine.collect_expired_probations(Utc::now()).is_empty());
        let report = engine.process_expired_probations(Utc::now()).await;
        assert_eq!(report.promoted, 0);
        assert!(report.outcomes.is_empty());
    }
}
