//! `AppError`: the HTTP face of `ShepherdError`.
//!
//! Every core error becomes `{ error: { code, message, details? }, meta }`
//! with the status from `ShepherdError::http_status`. Internal failures are
//! logged in full and reported to the caller with a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use shepherd_core::ShepherdError;

use crate::envelope::Meta;

const INTERNAL_MESSAGE: &str = "An unexpected error occurred";

#[derive(Debug)]
pub struct AppError(pub ShepherdError);

impl From<ShepherdError> for AppError {
    fn from(err: ShepherdError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = if err.is_client_error() {
            tracing::warn!(code = err.code(), error = %err, "request rejected");
            err.to_string()
        } else {
            tracing::error!(code = err.code(), error = ?err, "request failed");
            INTERNAL_MESSAGE.to_string()
        };

        let mut error = json!({
            "code": err.code(),
            "message": message,
        });
        if let Some(details) = err.details() {
            error["details"] = details;
        }

        let body = json!({
            "error": error,
            "meta": Meta::now(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use uuid::Uuid;

    async fn body(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn not_found_carries_code_and_details() {
        let id = Uuid::new_v4();
        let resp = AppError(ShepherdError::StageNotFound(id)).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body(resp).await;
        assert_eq!(json["error"]["code"], "STAGE_NOT_FOUND");
        assert_eq!(json["error"]["details"]["stageId"], id.to_string());
        assert!(json["meta"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn internal_errors_hide_their_cause() {
        let resp =
            AppError(ShepherdError::Internal(anyhow::anyhow!("password=hunter2"))).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body(resp).await;
        assert_eq!(json["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(json["error"]["message"], INTERNAL_MESSAGE);
        assert!(json["error"].get("details").is_none());
    }
}
