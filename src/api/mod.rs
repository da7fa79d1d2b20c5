use crate::core::traits::ChatError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::error;
use serde::Serialize;

pub mod chat;

#[derive(Serialize, Debug)]
pub struct Status {
    pub message: &'static str,
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

/// All routes, without CORS or DI wiring.
pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .merge(chat::router())
}

async fn index() -> Json<Status> {
    Json(Status {
        message: "Server is running!",
    })
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = match &self {
            ChatError::MissingMessage => StatusCode::BAD_REQUEST,
            ChatError::Busy => StatusCode::CONFLICT,
            ChatError::UnknownConversation => StatusCode::NOT_FOUND,
            ChatError::Backend(e) => {
                error!("chat backend error: {e:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
