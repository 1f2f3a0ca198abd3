use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use domain::models::PolicyError;
use domain::services::{RateLimitError, VerificationError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Inbound webhook failed verification.
    #[error("Webhook rejected: {0}")]
    WebhookRejected(#[from] VerificationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: u64 },
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            // A misconfigured verifier is our fault, not the sender's.
            ApiError::WebhookRejected(VerificationError::Configuration(msg)) => {
                tracing::error!("Webhook verifier misconfigured: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".into(),
                )
            }
            ApiError::WebhookRejected(err) => {
                (StatusCode::UNAUTHORIZED, err.code(), err.to_string())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            ApiError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests. Please try again later.".into(),
            ),
        };

        let body = ErrorBody {
            error: error_code.into(),
            message,
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

/// Failures while wiring the application together at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid retry policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("invalid rate limit: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_webhook_rejected_is_unauthorized_with_reason() {
        let response = ApiError::WebhookRejected(VerificationError::ReplayDetected).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = body_json(response).await;
        assert_eq!(body["error"], "replay_detected");
        assert_eq!(body["message"], "replay detected");
    }

    #[test]
    fn test_every_rejection_reason_is_unauthorized() {
        let errors = vec![
            VerificationError::MissingSignature,
            VerificationError::UnsupportedAlgorithm("sha1".into()),
            VerificationError::MalformedSignature("bad base64".into()),
            VerificationError::SignatureMismatch,
            VerificationError::InvalidTimestamp("abc".into()),
            VerificationError::TimestampOutOfTolerance {
                skew_secs: 900,
                tolerance_secs: 300,
            },
            VerificationError::ReplayDetected,
        ];
        for error in errors {
            let response = ApiError::from(error).into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_verifier_misconfiguration_is_internal() {
        let error = VerificationError::Configuration("empty secret".into());
        let response = ApiError::WebhookRejected(error).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], "internal_error");
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited {
            retry_after_secs: 7,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "7");
    }

    #[test]
    fn test_not_found() {
        let response = ApiError::NotFound("retry record wh_1".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_api_error_display() {
        assert_eq!(
            ApiError::WebhookRejected(VerificationError::SignatureMismatch).to_string(),
            "Webhook rejected: signature mismatch"
        );
        assert_eq!(
            ApiError::RateLimited {
                retry_after_secs: 1
            }
            .to_string(),
            "Rate limited"
        );
    }
}
