use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::AtlasError;

/// Successful response in the `{"data", "error"}` envelope. Errors use
/// the same envelope through `AtlasError`'s `IntoResponse`.
#[derive(Debug)]
pub struct Envelope<T>(pub T);

#[derive(Serialize)]
struct Body<T> {
    data: T,
    error: Option<Value>,
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        Json(Body {
            data: self.0,
            error: None,
        })
        .into_response()
    }
}

pub type ApiResult<T> = std::result::Result<Envelope<T>, AtlasError>;
