//! Task handlers.
//!
//! Completing a task may move its member to the next stage; the outcome
//! reports whether that happened.

use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde::Deserialize;
use shepherd_core::ports::TaskFilter;
use shepherd_core::principal::Principal;
use shepherd_core::tasks::{CompletionOutcome, NewTask};
use shepherd_core::types::Task;
use shepherd_core::Shepherd;
use uuid::Uuid;

use crate::envelope::{created, ok, ApiResult, Created};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    pub member_id: Option<Uuid>,
    pub completed: Option<bool>,
}

pub async fn list_tasks(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<Vec<Task>> {
    let filter = TaskFilter {
        member_id: query.member_id,
        completed: query.completed,
    };
    Ok(ok(app.tasks.list_tasks(&principal, filter).await?))
}

pub async fn get_task(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Task> {
    Ok(ok(app.tasks.get_task(&principal, id).await?))
}

pub async fn create_task(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Json(body): Json<NewTask>,
) -> Created<Task> {
    Ok(created(app.tasks.create_task(&principal, body).await?))
}

pub async fn complete_task(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(id): Path<Uuid>,
) -> ApiResult<CompletionOutcome> {
    Ok(ok(app.tasks.complete_task(&principal, id).await?))
}
