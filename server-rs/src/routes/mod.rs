pub mod admin;
pub mod comments;
pub mod health;

use axum::extract::{FromRequest, FromRequestParts};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// JSON body whose rejections use the API error envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub fn parse_id(raw: &str, what: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid {what} ID")))
}

pub fn parse_optional_id(raw: Option<&str>, what: &str) -> AppResult<Option<Uuid>> {
    raw.filter(|s| !s.is_empty())
        .map(|s| parse_id(s, what))
        .transpose()
}
