#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::tests::setup;

    async fn get_raw(app: &Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type =
            response.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_string);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_healthz_endpoint() {
        let t = setup().await;
        let (status, _, body) = get_raw(&t.app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_version_endpoint() {
        let t = setup().await;
        let (status, _, body) = get_raw(&t.app, "/version").await;
        assert_eq!(status, StatusCode::OK);
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["name"], "thuvien");
        assert!(!v["version"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_readyz_endpoint_ok() {
        let t = setup().await;
        let (status, _, body) = get_raw(&t.app, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ready");
    }

    #[tokio::test]
    async fn test_readyz_endpoint_db_closed() {
        let t = setup().await;
        t.db().close().await;

        let (status, _, body) = get_raw(&t.app, "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("not ready"));
    }

    #[tokio::test]
    async fn test_metrics_count_circulation() {
        let t = setup().await;
        let admin = t.admin_token().await;
        let (_, copies) = t.create_book(&admin, "Người mẹ cầm súng", 20_000, 2).await;
        let (_, reader_id) = t.register_reader("reader1").await;
        let (status, _) = t.post("/api/borrow", &admin, json!({ "reader_id": reader_id, "copy_ids": copies })).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _, body) = get_raw(&t.app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["loans_opened"], 1);
        assert_eq!(v["copies_lent"], 2);
        assert_eq!(v["fines_issued"], 0);
    }

    #[tokio::test]
    async fn test_metrics_prometheus_endpoint() {
        let t = setup().await;
        let (status, content_type, body) = get_raw(&t.app, "/metrics/prometheus").await;

        assert_eq!(status, StatusCode::OK);
        assert!(content_type.unwrap().starts_with("text/plain"));
        assert!(body.contains("thuvien_loans_opened 0"));
        assert!(body.contains("thuvien_payments_confirmed 0"));
        assert!(body.contains("# TYPE thuvien_uptime_seconds gauge"));
        assert_eq!(body.lines().filter(|l| l.starts_with("# HELP")).count(), 11);
    }
}
