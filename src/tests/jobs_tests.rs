#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::http::{Method, StatusCode};
    use chrono::{Duration, NaiveDate, Utc};
    use tokio_util::sync::CancellationToken;

    use crate::circulation::{loans, CirculationPolicy};
    use crate::jobs;
    use crate::notify::{Reminder, ReminderSink};
    use crate::tests::{setup, TestApp};
    use crate::types::{BorrowRequest, SlipDto, SlipStatus};

    struct BrokenSink;

    #[async_trait]
    impl ReminderSink for BrokenSink {
        async fn deliver(&self, _reminder: &Reminder) -> anyhow::Result<bool> {
            Err(anyhow::anyhow!("mail relay unreachable"))
        }
    }

    async fn lend(t: &TestApp, reader_id: i64, title: &str, borrowed_on: NaiveDate) -> SlipDto {
        let admin = t.admin_token().await;
        let (_, copies) = t.create_book(&admin, title, 30_000, 1).await;
        let policy = CirculationPolicy::load(t.db()).await.unwrap();
        loans::borrow(
            t.db(),
            &policy,
            &BorrowRequest { reader_id, copy_ids: copies, loan_days: None },
            t.admin_id().await,
            borrowed_on,
        )
        .await
        .unwrap()
    }

    async fn slip_status(t: &TestApp, slip_id: i64) -> SlipStatus {
        sqlx::query_scalar("SELECT status FROM borrow_slips WHERE id = ?1")
            .bind(slip_id)
            .fetch_one(t.db())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_overdue_slips_flagged_and_noticed_once_per_day() {
        let t = setup().await;
        let (token, reader_id) = t.register_reader("reader1").await;
        let today = crate::today();
        let slip = lend(&t, reader_id, "Số đỏ", today - Duration::days(20)).await;

        let report = jobs::run_daily(&t.state, today, Utc::now()).await.unwrap();
        assert_eq!(report.run_on, Some(today));
        assert_eq!(report.slips_marked_overdue, 1);
        assert_eq!(report.overdue_queued, 1);
        assert_eq!(report.due_soon_queued, 0);
        assert_eq!(slip_status(&t, slip.slip.id).await, SlipStatus::Overdue);

        let again = jobs::run_daily(&t.state, today, Utc::now()).await.unwrap();
        assert_eq!(again.slips_marked_overdue, 0);
        assert_eq!(again.overdue_queued, 0);

        let next_day = jobs::run_daily(&t.state, today + Duration::days(1), Utc::now()).await.unwrap();
        assert_eq!(next_day.overdue_queued, 1);

        let (status, inbox) = t.get("/api/me/notifications", &token).await;
        assert_eq!(status, StatusCode::OK);
        let inbox = inbox.as_array().unwrap();
        assert_eq!(inbox.len(), 2);
        assert!(inbox.iter().all(|n| n["kind"] == "QuaHan" && n["slip_id"] == slip.slip.id));
        assert!(inbox[1]["body"].as_str().unwrap().contains("Số đỏ"));
    }

    #[tokio::test]
    async fn test_due_soon_reminder_on_exact_day() {
        let t = setup().await;
        let (token, reader_id) = t.register_reader("reader1").await;
        let today = crate::today();

        // default loan is 14 days and reminders go out 2 days ahead
        let due_in_two = lend(&t, reader_id, "Chí Phèo", today - Duration::days(12)).await;
        lend(&t, reader_id, "Đời thừa", today - Duration::days(11)).await;
        lend(&t, reader_id, "Trăng sáng", today).await;

        let report = jobs::run_daily(&t.state, today, Utc::now()).await.unwrap();
        assert_eq!(report.due_soon_queued, 1);
        assert_eq!(report.overdue_queued, 0);
        assert_eq!(slip_status(&t, due_in_two.slip.id).await, SlipStatus::Open);

        let (_, inbox) = t.get("/api/me/notifications", &token).await;
        assert_eq!(inbox.as_array().unwrap().len(), 1);
        assert_eq!(inbox[0]["kind"], "SapDenHan");
        assert_eq!(inbox[0]["slip_id"], due_in_two.slip.id);
        assert!(inbox[0]["body"].as_str().unwrap().contains("Chí Phèo"));
    }

    #[tokio::test]
    async fn test_returned_slips_get_no_reminders() {
        let t = setup().await;
        let admin = t.admin_token().await;
        let (_, reader_id) = t.register_reader("reader1").await;
        let slip = lend(&t, reader_id, "Vang bóng một thời", crate::today() - Duration::days(12)).await;

        let line_id = slip.lines[0].id;
        let (status, _) = t
            .post(
                &format!("/api/borrow/{}/return", slip.slip.id),
                &admin,
                serde_json::json!({ "items": [{ "line_id": line_id, "condition": "Tot" }] }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let report = jobs::run_daily(&t.state, crate::today(), Utc::now()).await.unwrap();
        assert_eq!(report.due_soon_queued + report.overdue_queued, 0);
        assert_eq!(slip_status(&t, slip.slip.id).await, SlipStatus::Returned);
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_abort_run() {
        let t = setup().await;
        let (_, reader_a) = t.register_reader("reader1").await;
        let (_, reader_b) = t.register_reader("reader2").await;
        lend(&t, reader_a, "Truyện Kiều", crate::today() - Duration::days(30)).await;
        lend(&t, reader_b, "Lục Vân Tiên", crate::today() - Duration::days(30)).await;

        let mut state = t.state.clone();
        state.reminders = Arc::new(BrokenSink);

        let report = jobs::run_daily(&state, crate::today(), Utc::now()).await.unwrap();
        assert_eq!(report.slips_marked_overdue, 2);
        assert_eq!(report.delivery_failures, 2);
        assert_eq!(report.overdue_queued, 0);
    }

    #[tokio::test]
    async fn test_run_expires_stale_payments() {
        let t = setup().await;
        let (_, reader_id) = t.register_reader("reader1").await;
        let slip = lend(&t, reader_id, "Bình Ngô đại cáo", crate::today() - Duration::days(15)).await;
        let admin = t.admin_token().await;
        t.post(
            &format!("/api/borrow/{}/return", slip.slip.id),
            &admin,
            serde_json::json!({ "items": [{ "line_id": slip.lines[0].id, "condition": "Tot" }] }),
        )
        .await;

        let cfg = t.state.config.payment.clone();
        crate::payment::create_payment(t.db(), &cfg, reader_id, None, Utc::now() - Duration::hours(2))
            .await
            .unwrap();

        let report = jobs::run_daily(&t.state, crate::today(), Utc::now()).await.unwrap();
        assert_eq!(report.payments_expired, 1);
    }

    #[tokio::test]
    async fn test_manual_trigger_is_admin_only() {
        let t = setup().await;
        let admin = t.admin_token().await;
        let (reader_token, reader_id) = t.register_reader("reader1").await;
        lend(&t, reader_id, "Tây Tiến", crate::today() - Duration::days(20)).await;

        let (status, _) = t.call(Method::POST, "/api/jobs/run", Some(&reader_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, report) = t.call(Method::POST, "/api/jobs/run", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK, "{}", report);
        assert_eq!(report["run_on"], crate::today().to_string());
        assert_eq!(report["slips_marked_overdue"], 1);
        assert_eq!(report["overdue_queued"], 1);
    }

    #[tokio::test]
    async fn test_runner_stops_on_cancel() {
        let t = setup().await;
        let cancel = CancellationToken::new();
        let handle = jobs::spawn(t.state.clone(), cancel.clone());

        // the first tick fires immediately
        for _ in 0..50 {
            if t.state.metrics.get_snapshot().job_runs > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("runner did not stop")
            .unwrap();

        // one run per calendar day
        assert_eq!(t.state.metrics.get_snapshot().job_runs, 1);
        let queued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications").fetch_one(t.db()).await.unwrap();
        assert_eq!(queued, 0);
    }
}
