#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};
    use serde_json::json;

    use crate::circulation::{loans, CirculationPolicy};
    use crate::payment;
    use crate::tests::{setup, setup_with, TestApp};
    use crate::types::{BorrowRequest, PaymentStatus, ReturnCondition, ReturnItem, ReturnRequest};

    /// Registers a reader who returned a copy two days late and owes 10 000 VND.
    async fn reader_with_fine(t: &TestApp, username: &str) -> (String, i64, i64) {
        let admin = t.admin_token().await;
        let (_, copies) = t.create_book(&admin, &format!("Sách của {}", username), 40_000, 1).await;
        let (token, reader_id) = t.register_reader(username).await;

        let policy = CirculationPolicy::load(t.db()).await.unwrap();
        let staff = t.admin_id().await;
        let borrowed_on = crate::today() - Duration::days(16);
        let slip = loans::borrow(
            t.db(),
            &policy,
            &BorrowRequest { reader_id, copy_ids: copies, loan_days: None },
            staff,
            borrowed_on,
        )
        .await
        .unwrap();
        let outcome = loans::return_items(
            t.db(),
            &policy,
            slip.slip.id,
            &ReturnRequest {
                items: vec![ReturnItem { line_id: slip.lines[0].id, condition: ReturnCondition::Good, note: None }],
                returned_on: None,
            },
            staff,
            crate::today(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.fines.len(), 1);
        assert_eq!(outcome.fines[0].amount, 10_000);
        (token, reader_id, outcome.fines[0].id)
    }

    #[tokio::test]
    async fn test_qr_payment_confirmed_by_matching_transfer() {
        let t = setup().await;
        let (token, reader_id, fine_id) = reader_with_fine(&t, "reader1").await;

        let (status, created) = t.post("/api/payments", &token, json!({})).await;
        assert_eq!(status, StatusCode::CREATED, "{}", created);
        assert_eq!(created["status"], "ChoThanhToan");
        assert_eq!(created["amount"], 10_000);
        let code = created["code"].as_str().unwrap().to_string();
        assert!(code.starts_with("TV"));
        let qr = created["qr_url"].as_str().unwrap();
        assert!(qr.contains("amount=10000"));
        assert!(qr.contains(&code));

        let uri = format!("/api/payments/{}", created["id"]);
        let (status, polled) = t.get(&uri, &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(polled["status"], "ChoThanhToan");

        // bank apps often lower-case the content and split it with spaces
        let content = format!("NGUYEN VAN A {} {} tra phi", &code[..6].to_lowercase(), &code[6..]);
        t.gateway.push("501", 10_000, &content);

        let (status, polled) = t.get(&uri, &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(polled["status"], "DaThanhToan");
        assert_eq!(polled["gateway_ref"], "FT501");
        assert!(polled["paid_at"].is_string());

        let (_, fines) = t.get("/api/me/fines", &token).await;
        assert_eq!(fines[0]["id"], fine_id);
        assert_eq!(fines[0]["status"], "DaThanhToan");
        assert_eq!(fines[0]["payment_id"], created["id"]);

        // the fine no longer blocks borrowing
        let admin = t.admin_token().await;
        let (_, copies) = t.create_book(&admin, "Sách mới", 20_000, 1).await;
        let (status, _) = t.post("/api/borrow", &admin, json!({ "reader_id": reader_id, "copy_ids": copies })).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_short_or_unrelated_transfer_is_ignored() {
        let t = setup().await;
        let (token, _, _) = reader_with_fine(&t, "reader1").await;

        let (_, created) = t.post("/api/payments", &token, json!({})).await;
        let code = created["code"].as_str().unwrap().to_string();
        t.gateway.push("1", 9_999, &code);
        t.gateway.push("2", 10_000, "TV0000000000 chuyen khoan");

        let (status, polled) = t.get(&format!("/api/payments/{}", created["id"]), &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(polled["status"], "ChoThanhToan");
        assert!(polled["gateway_ref"].is_null());
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_payment_pending() {
        let t = setup().await;
        let (token, _, _) = reader_with_fine(&t, "reader1").await;

        let (_, created) = t.post("/api/payments", &token, json!({})).await;
        let uri = format!("/api/payments/{}", created["id"]);

        t.gateway.set_failing(true);
        let (status, body) = t.get(&uri, &token).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "GATEWAY_ERROR");

        t.gateway.set_failing(false);
        let (status, polled) = t.get(&uri, &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(polled["status"], "ChoThanhToan");
    }

    #[tokio::test]
    async fn test_expired_payment_releases_its_fines() {
        let t = setup_with(|c| c.payment.expiry_minutes = 5).await;
        let (_, reader_id, fine_id) = reader_with_fine(&t, "reader1").await;
        let cfg = t.state.config.payment.clone();

        let opened_at = Utc::now() - Duration::minutes(10);
        let stale = payment::create_payment(t.db(), &cfg, reader_id, None, opened_at).await.unwrap();
        assert_eq!(stale.expires_at, opened_at + Duration::minutes(5));

        // a matching transfer after the deadline does not revive it
        t.gateway.push("9", 10_000, &stale.code);
        let (dto, confirmed) = payment::refresh_payment(t.db(), t.gateway.as_ref(), stale.id, Utc::now()).await.unwrap();
        assert!(!confirmed);
        assert_eq!(dto.status, PaymentStatus::Expired);

        let fresh = payment::create_payment(t.db(), &cfg, reader_id, Some(&[fine_id]), Utc::now()).await.unwrap();
        assert_eq!(fresh.status, PaymentStatus::Pending);
        assert_eq!(fresh.amount, 10_000);
        assert_ne!(fresh.code, stale.code);
    }

    #[tokio::test]
    async fn test_expire_stale_sweeps_only_past_deadline() {
        let t = setup().await;
        let (_, reader_a, _) = reader_with_fine(&t, "reader1").await;
        let (_, reader_b, _) = reader_with_fine(&t, "reader2").await;
        let cfg = t.state.config.payment.clone();

        let old = payment::create_payment(t.db(), &cfg, reader_a, None, Utc::now() - Duration::hours(1)).await.unwrap();
        let live = payment::create_payment(t.db(), &cfg, reader_b, None, Utc::now()).await.unwrap();

        assert_eq!(payment::expire_stale(t.db(), Utc::now()).await.unwrap(), 1);
        assert_eq!(payment::fetch_payment(t.db(), old.id).await.unwrap().status, PaymentStatus::Expired);
        assert_eq!(payment::fetch_payment(t.db(), live.id).await.unwrap().status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_fine_on_pending_payment_cannot_be_paid_twice() {
        let t = setup().await;
        let admin = t.admin_token().await;
        let (token, _, fine_id) = reader_with_fine(&t, "reader1").await;

        let (status, _) = t.post("/api/payments", &token, json!({ "fine_ids": [fine_id] })).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = t.post("/api/payments", &token, json!({ "fine_ids": [fine_id] })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = t.post("/api/payments", &token, json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let pay_uri = format!("/api/fines/{}/pay", fine_id);
        let (status, _) = t.call(axum::http::Method::POST, &pay_uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_desk_payment() {
        let t = setup().await;
        let admin = t.admin_token().await;
        let (token, _, fine_id) = reader_with_fine(&t, "reader1").await;
        let pay_uri = format!("/api/fines/{}/pay", fine_id);

        let (status, _) = t.call(axum::http::Method::POST, &pay_uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, fine) = t.call(axum::http::Method::POST, &pay_uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK, "{}", fine);
        assert_eq!(fine["status"], "DaThanhToan");
        assert!(fine["payment_id"].is_null());

        let (status, _) = t.call(axum::http::Method::POST, &pay_uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = t.post("/api/payments", &token, json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, fines) = t.get("/api/fines?status=DaThanhToan", &admin).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fines.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_payment_ownership_rules() {
        let t = setup().await;
        let admin = t.admin_token().await;
        let (token_a, reader_a, fine_a) = reader_with_fine(&t, "reader1").await;
        let (token_b, reader_b, _) = reader_with_fine(&t, "reader2").await;

        let (status, _) = t.post("/api/payments", &token_a, json!({ "reader_id": reader_b })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = t.post("/api/payments", &admin, json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, _) = t.post("/api/payments", &admin, json!({ "reader_id": reader_b, "fine_ids": [fine_a] })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, created) = t.post("/api/payments", &admin, json!({ "reader_id": reader_a })).await;
        assert_eq!(status, StatusCode::CREATED);

        let uri = format!("/api/payments/{}", created["id"]);
        let (status, _) = t.get(&uri, &token_b).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = t.get(&uri, &token_a).await;
        assert_eq!(status, StatusCode::OK);

        let (status, listed) = t.get(&format!("/api/payments?reader_id={}", reader_a), &admin).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
        let (status, _) = t.get("/api/payments", &token_a).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
