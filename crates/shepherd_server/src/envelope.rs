//! Success envelope: `{ data, meta: { timestamp } }`.

use axum::{http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub data: T,
    pub meta: Meta,
}

pub type ApiResult<T> = Result<Json<Envelope<T>>, AppError>;

/// 201 responses for creates.
pub type Created<T> = Result<(StatusCode, Json<Envelope<T>>), AppError>;

pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        data,
        meta: Meta::now(),
    })
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<Envelope<T>>) {
    (StatusCode::CREATED, ok(data))
}

/// Body returned by DELETE endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deleted {
    pub id: uuid::Uuid,
    pub deleted: bool,
}

impl Deleted {
    pub fn new(id: uuid::Uuid) -> Self {
        Self { id, deleted: true }
    }
}
