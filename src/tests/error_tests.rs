#[cfg(test)]
mod tests {
    use crate::error::{validation, AppError, AppResult, OptionExt};
    use crate::payment::sepay::GatewayError;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;
    use std::io;

    async fn body_json(error: AppError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_app_error_display() {
        let error = AppError::BadRequest("Invalid input".to_string());
        assert_eq!(format!("{}", error), "Bad request: Invalid input");

        let error = AppError::NotFound("Resource not found".to_string());
        assert_eq!(format!("{}", error), "Not found: Resource not found");

        let error = AppError::RateLimited { retry_after_seconds: 60 };
        assert_eq!(format!("{}", error), "Rate limited. Retry after 60 seconds");

        let error = AppError::Forbidden("Staff role required".to_string());
        assert_eq!(format!("{}", error), "Forbidden: Staff role required");
    }

    #[test]
    fn test_app_error_into_response() {
        let cases = [
            (AppError::BadRequest("x".to_string()), StatusCode::BAD_REQUEST),
            (AppError::InvalidInput("x".to_string()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("x".to_string()), StatusCode::NOT_FOUND),
            (AppError::Conflict("x".to_string()), StatusCode::CONFLICT),
            (AppError::ServiceUnavailable("x".to_string()), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Unauthorized("x".to_string()), StatusCode::UNAUTHORIZED),
            (AppError::Forbidden("x".to_string()), StatusCode::FORBIDDEN),
            (AppError::Gateway("x".to_string()), StatusCode::BAD_GATEWAY),
            (AppError::Database("x".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::RateLimited { retry_after_seconds: 30 }, StatusCode::TOO_MANY_REQUESTS),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn test_validation_error_body() {
        let (status, body) = body_json(AppError::ValidationError {
            field: "email".to_string(),
            message: "Invalid email format".to_string(),
        })
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["details"]["field"], "email");
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn test_internal_error_hides_cause() {
        let (status, body) = body_json(AppError::Internal(anyhow::anyhow!("secret connection string"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.to_string().contains("secret"));
        assert!(body["error"]["details"]["error_id"].is_string());
    }

    #[tokio::test]
    async fn test_gateway_error_conversion() {
        let error: AppError = GatewayError::Status(503).into();
        let (status, body) = body_json(error).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "GATEWAY_ERROR");
        assert!(body["error"]["details"]["details"].as_str().unwrap().contains("503"));
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let app_error: AppError = io_error.into();

        match app_error {
            AppError::IoError(msg) => {
                assert!(msg.contains("not found"));
                assert!(msg.contains("File not found"));
            }
            _ => panic!("Expected IoError variant"),
        }
    }

    #[test]
    fn test_from_sqlx_row_not_found() {
        let app_error: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(app_error, AppError::NotFound(_)));
    }

    #[test]
    fn test_from_jwt_error() {
        let err = jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::ExpiredSignature);
        match AppError::from(err) {
            AppError::Unauthorized(msg) => assert_eq!(msg, "Token expired"),
            other => panic!("Expected Unauthorized, got {:?}", other),
        }
    }

    #[test]
    fn test_option_ext() {
        let some_value: Option<i32> = Some(42);
        let result: AppResult<i32> = some_value.ok_or_not_found("Reader");
        assert_eq!(result.unwrap(), 42);

        let none_value: Option<i32> = None;
        match none_value.ok_or_not_found("Reader").unwrap_err() {
            AppError::NotFound(msg) => assert_eq!(msg, "Reader not found"),
            _ => panic!("Expected NotFound error"),
        }
    }

    #[test]
    fn test_required_text_trims() {
        assert_eq!(validation::required_text("  Nam Cao  ", "name", 10).unwrap(), "Nam Cao");

        match validation::required_text("   ", "name", 10).unwrap_err() {
            AppError::ValidationError { field, message } => {
                assert_eq!(field, "name");
                assert_eq!(message, "Value cannot be empty");
            }
            _ => panic!("Expected ValidationError"),
        }

        // length counts characters, not bytes
        assert!(validation::required_text("Nguyễn Du", "name", 9).is_ok());
        assert!(validation::required_text("Nguyễn Du!", "name", 9).is_err());
    }

    #[test]
    fn test_optional_text_blank_is_none() {
        assert_eq!(validation::optional_text(None, "note", 10).unwrap(), None);
        assert_eq!(validation::optional_text(Some("  "), "note", 10).unwrap(), None);
        assert_eq!(validation::optional_text(Some(" hi "), "note", 10).unwrap(), Some("hi".to_string()));
    }

    #[test]
    fn test_validate_non_negative() {
        assert!(validation::validate_non_negative(Some(0), "price").is_ok());
        assert!(validation::validate_non_negative(None, "price").is_ok());

        match validation::validate_non_negative(Some(-5), "price").unwrap_err() {
            AppError::ValidationError { field, message } => {
                assert_eq!(field, "price");
                assert!(message.contains("-5"));
            }
            _ => panic!("Expected ValidationError"),
        }
    }

    #[test]
    fn test_validate_email() {
        assert!(validation::validate_email(None).is_ok());
        assert!(validation::validate_email(Some("")).is_ok());
        assert!(validation::validate_email(Some("docgia@thuvien.vn")).is_ok());

        for bad in ["no-at-sign", "@thuvien.vn", "a@b", "a@.vn", "a@b.", "a b@c.vn", "a@b@c.vn"] {
            assert!(validation::validate_email(Some(bad)).is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_validate_password() {
        assert!(validation::validate_password("secret").is_ok());
        assert!(validation::validate_password("short").is_err());
        assert!(validation::validate_password(&"x".repeat(72)).is_ok());
        assert!(validation::validate_password(&"x".repeat(73)).is_err());
    }
}
