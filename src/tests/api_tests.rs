#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::tests::{setup, setup_with};

    #[tokio::test]
    async fn test_login_with_bootstrap_admin() {
        let t = setup().await;
        let (status, body) = t
            .call(Method::POST, "/api/auth/login", None, Some(json!({ "username": "admin", "password": "admin123" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["token"].as_str().is_some_and(|s| !s.is_empty()));
        assert_eq!(body["account"]["role"], "Admin");
    }

    #[tokio::test]
    async fn test_login_wrong_password_and_unknown_user_look_the_same() {
        let t = setup().await;
        let (s1, b1) = t
            .call(Method::POST, "/api/auth/login", None, Some(json!({ "username": "admin", "password": "nope-nope" })))
            .await;
        let (s2, b2) = t
            .call(Method::POST, "/api/auth/login", None, Some(json!({ "username": "ghost", "password": "nope-nope" })))
            .await;
        assert_eq!(s1, StatusCode::UNAUTHORIZED);
        assert_eq!(s2, StatusCode::UNAUTHORIZED);
        assert_eq!(b1["error"]["message"], b2["error"]["message"]);
    }

    #[tokio::test]
    async fn test_login_limit_is_per_client() {
        let t = setup().await;
        for _ in 0..10 {
            assert_eq!(t.login_attempt_from("10.0.0.1", None).await, StatusCode::UNAUTHORIZED);
            assert_eq!(t.login_attempt_from("10.0.0.2", None).await, StatusCode::UNAUTHORIZED);
        }
        assert_eq!(t.login_attempt_from("10.0.0.1", None).await, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(t.login_attempt_from("10.0.0.3", None).await, StatusCode::UNAUTHORIZED);

        // the real admin on another machine is not locked out
        let (status, _) = t
            .call(Method::POST, "/api/auth/login", None, Some(json!({ "username": "admin", "password": "admin123" })))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_forwarded_for_from_direct_client_is_ignored() {
        let t = setup().await;
        for i in 0..10 {
            let spoofed = format!("198.51.100.{}", i);
            assert_eq!(t.login_attempt_from("203.0.113.5", Some(&spoofed)).await, StatusCode::UNAUTHORIZED);
        }
        let status = t.login_attempt_from("203.0.113.5", Some("198.51.100.99")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_trusted_proxy_forwards_client_address() {
        let t = setup_with(|c| c.server.trusted_proxies = "10.0.0.2".to_string()).await;
        for _ in 0..10 {
            assert_eq!(t.login_attempt_from("10.0.0.2", Some("198.51.100.7")).await, StatusCode::UNAUTHORIZED);
        }
        let blocked = t.login_attempt_from("10.0.0.2", Some("198.51.100.7")).await;
        assert_eq!(blocked, StatusCode::TOO_MANY_REQUESTS);

        let other_client = t.login_attempt_from("10.0.0.2", Some("198.51.100.8")).await;
        assert_eq!(other_client, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_protected_route_requires_token() {
        let t = setup().await;
        let (status, _) = t.call(Method::GET, "/api/readers", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = t.get("/api/readers", "not-a-jwt").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_creates_reader_profile() {
        let t = setup().await;
        let (token, reader_id) = t.register_reader("lan").await;

        let (status, me) = t.get("/api/me", &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["id"], reader_id);
        assert_eq!(me["full_name"], "Độc giả lan");
        assert_eq!(me["card_expires_on"], (crate::today() + chrono::Duration::days(365)).to_string());

        let (status, _) = t
            .call(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "username": "lan", "password": "secret-pass", "full_name": "Trùng tên" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_register_rejects_short_password() {
        let t = setup().await;
        let (status, body) = t
            .call(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "username": "minh", "password": "123", "full_name": "Minh" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_reader_cannot_use_staff_endpoints() {
        let t = setup().await;
        let (token, _) = t.register_reader("hoa").await;

        let (status, _) = t.get("/api/readers", &token).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = t.post("/api/books", &token, json!({ "title": "Không được" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_reader_sees_only_own_profile() {
        let t = setup().await;
        let (token_a, reader_a) = t.register_reader("anh").await;
        let (_, reader_b) = t.register_reader("binh").await;

        let (status, _) = t.get(&format!("/api/readers/{}", reader_a), &token_a).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = t.get(&format!("/api/readers/{}", reader_b), &token_a).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_change_password() {
        let t = setup().await;
        let (token, _) = t.register_reader("cuong").await;

        let (status, _) = t
            .post(
                "/api/auth/change-password",
                &token,
                json!({ "current_password": "wrong-one", "new_password": "brand-new-pass" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = t
            .post(
                "/api/auth/change-password",
                &token,
                json!({ "current_password": "secret-pass", "new_password": "brand-new-pass" }),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        t.login("cuong", "brand-new-pass").await;
    }

    #[tokio::test]
    async fn test_admin_manages_accounts() {
        let t = setup().await;
        let admin = t.admin_token().await;

        let (status, account) = t
            .post("/api/accounts", &admin, json!({ "username": "thuthu1", "password": "desk-pass", "role": "ThuThu" }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let librarian = t.login("thuthu1", "desk-pass").await;

        // librarians are staff but not admins
        let (status, _) = t.get("/api/readers", &librarian).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = t.get("/api/accounts", &librarian).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let id = account["id"].as_i64().unwrap();
        let (status, updated) = t.put(&format!("/api/accounts/{}", id), &admin, json!({ "active": false })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["active"], false);
        let (status, _) = t.get("/api/readers", &librarian).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_cannot_delete_self() {
        let t = setup().await;
        let admin = t.admin_token().await;
        let admin_id = t.admin_id().await;
        let (status, _) = t.delete(&format!("/api/accounts/{}", admin_id), &admin).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_catalog_crud_and_public_reads() {
        let t = setup().await;
        let admin = t.admin_token().await;

        let (status, author) = t.post("/api/authors", &admin, json!({ "name": "Nguyễn Nhật Ánh" })).await;
        assert_eq!(status, StatusCode::CREATED);
        let author_id = author["id"].as_i64().unwrap();

        let (status, _) = t.post("/api/authors", &admin, json!({ "name": "Nguyễn Nhật Ánh" })).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, list) = t.call(Method::GET, "/api/authors", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, renamed) = t
            .put(&format!("/api/authors/{}", author_id), &admin, json!({ "name": "Nguyễn Nhật Ánh (NXB Trẻ)" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(renamed["name"], "Nguyễn Nhật Ánh (NXB Trẻ)");

        let (status, _) = t.delete(&format!("/api/authors/{}", author_id), &admin).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = t.call(Method::GET, &format!("/api/authors/{}", author_id), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_author_with_books_conflicts() {
        let t = setup().await;
        let admin = t.admin_token().await;

        let (_, author) = t.post("/api/authors", &admin, json!({ "name": "Tô Hoài" })).await;
        let author_id = author["id"].as_i64().unwrap();
        let (status, _) = t
            .post("/api/books", &admin, json!({ "title": "Dế Mèn phiêu lưu ký", "author_id": author_id }))
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = t.delete(&format!("/api/authors/{}", author_id), &admin).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_book_with_unknown_author_is_rejected() {
        let t = setup().await;
        let admin = t.admin_token().await;
        let (status, _) = t.post("/api/books", &admin, json!({ "title": "Mồ côi", "author_id": 999 })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_book_copies_and_search() {
        let t = setup().await;
        let admin = t.admin_token().await;

        let (book_id, copies) = t.create_book(&admin, "Số đỏ", 80_000, 3).await;
        assert_eq!(copies.len(), 3);
        t.create_book(&admin, "Tắt đèn", 60_000, 1).await;

        let (status, detail) = t.call(Method::GET, &format!("/api/books/{}", book_id), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["total_copies"], 3);
        assert_eq!(detail["available_copies"], 3);
        assert_eq!(detail["copies"][0]["barcode"], format!("B{:06}-001", book_id));

        let (status, added) = t.post(&format!("/api/books/{}/copies", book_id), &admin, json!({ "count": 2 })).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(added.as_array().unwrap().len(), 2);

        let (status, page) = t.call(Method::GET, "/api/books?q=%C4%91%E1%BB%8F", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 1);
        assert_eq!(page["items"][0]["title"], "Số đỏ");
        assert_eq!(page["items"][0]["total_copies"], 5);
    }

    #[tokio::test]
    async fn test_huge_page_number_returns_empty_page() {
        let t = setup().await;
        let admin = t.admin_token().await;
        t.create_book(&admin, "Bến không chồng", 70_000, 1).await;

        let (status, page) = t.call(Method::GET, "/api/books?page=9223372036854775807", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 1);
        assert!(page["items"].as_array().unwrap().is_empty());

        let (status, _) = t.get("/api/readers?page=9223372036854775807&page_size=100", &admin).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_copy_status_cannot_be_set_to_borrowed() {
        let t = setup().await;
        let admin = t.admin_token().await;
        let (_, copies) = t.create_book(&admin, "Chí Phèo", 50_000, 1).await;

        let (status, _) = t.put(&format!("/api/copies/{}", copies[0]), &admin, json!({ "status": "DangMuon" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, copy) = t.put(&format!("/api/copies/{}", copies[0]), &admin, json!({ "status": "Hong" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(copy["status"], "Hong");
    }

    #[tokio::test]
    async fn test_reader_crud_by_staff() {
        let t = setup().await;
        let admin = t.admin_token().await;

        let (status, reader) = t
            .post(
                "/api/readers",
                &admin,
                json!({ "full_name": "Trần Thị Mai", "email": "mai@example.com", "card_expires_on": "2030-12-31" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = reader["id"].as_i64().unwrap();

        let (status, _) = t.post("/api/readers", &admin, json!({ "full_name": "Sai email", "email": "khong-co-a-cong" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, page) = t.get("/api/readers?q=Mai", &admin).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 1);

        let (status, _) = t.delete(&format!("/api/readers/{}", id), &admin).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_settings_update_is_admin_only_and_validated() {
        let t = setup().await;
        let admin = t.admin_token().await;
        let (reader, _) = t.register_reader("dung").await;

        let (status, settings) = t.get("/api/settings", &admin).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(settings["loan_days"], 14);

        let (status, _) = t.put("/api/settings", &reader, json!({ "daily_fine": 1000 })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = t.put("/api/settings", &admin, json!({ "loan_days": 0 })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, updated) = t.put("/api/settings", &admin, json!({ "daily_fine": 2000 })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["daily_fine"], 2000);
        assert_eq!(updated["loan_days"], 14);

        let (_, reloaded) = t.get("/api/settings", &admin).await;
        assert_eq!(reloaded["daily_fine"], 2000);
    }

    #[tokio::test]
    async fn test_export_csv_and_xlsx() {
        let t = setup().await;
        let admin = t.admin_token().await;
        t.create_book(&admin, "Truyện Kiều", 120_000, 2).await;

        let response = {
            use axum::body::Body;
            use axum::http::{header, Request};
            use tower::ServiceExt;
            t.app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/api/export/books?format=csv")
                        .header(header::AUTHORIZATION, format!("Bearer {}", admin))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap()
        };
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers().get("content-disposition").unwrap().to_str().unwrap().to_string();
        assert!(disposition.starts_with("attachment; filename=\"sach_"));
        assert!(disposition.ends_with(".csv\""));
        let body = {
            use http_body_util::BodyExt;
            response.into_body().collect().await.unwrap().to_bytes()
        };
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("\"Truyện Kiều\""));
        assert_eq!(text.lines().count(), 2);

        let (status, _) = t.get("/api/export/books?format=pdf", &admin).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = t.get("/api/export/accounts", &admin).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
