//! Stage registry handlers.
//!
//! GET    /api/stages?pathway=              list, ordered by (pathway, order)
//! GET    /api/stages/:id                   one stage
//! POST   /api/stages                       create
//! PATCH  /api/stages/:id                   rename, move, change auto-advance policy
//! POST   /api/stages/reorder               batch reorder within one pathway
//! DELETE /api/stages/:id                   delete an empty stage
//! POST   /api/stages/auto-advance/sweep    run the time-in-stage sweep

use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde::Deserialize;
use shepherd_core::principal::Principal;
use shepherd_core::stages::{NewStage, StageOrder, StagePatch};
use shepherd_core::sweep::SweepReport;
use shepherd_core::types::{Pathway, Stage};
use shepherd_core::Shepherd;
use uuid::Uuid;

use crate::envelope::{created, ok, ApiResult, Created, Deleted};

#[derive(Debug, Deserialize)]
pub struct StageQuery {
    pub pathway: Option<Pathway>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderBody {
    pub pathway: Pathway,
    #[serde(alias = "orders")]
    pub stages: Vec<StageOrder>,
}

pub async fn list_stages(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Query(query): Query<StageQuery>,
) -> ApiResult<Vec<Stage>> {
    let stages = app.stages.list_stages(&principal, query.pathway).await?;
    Ok(ok(stages))
}

pub async fn get_stage(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Stage> {
    Ok(ok(app.stages.get_stage(&principal, id).await?))
}

pub async fn create_stage(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Json(body): Json<NewStage>,
) -> Created<Stage> {
    let stage = app.stages.create_stage(&principal, body).await?;
    Ok(created(stage))
}

pub async fn update_stage(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(id): Path<Uuid>,
    Json(body): Json<StagePatch>,
) -> ApiResult<Stage> {
    let stage = app.stages.update_stage(&principal, id, body).await?;
    Ok(ok(stage))
}

pub async fn reorder_stages(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Json(body): Json<ReorderBody>,
) -> ApiResult<Vec<Stage>> {
    let stages = app
        .stages
        .reorder_stages(&principal, body.pathway, body.stages)
        .await?;
    Ok(ok(stages))
}

pub async fn delete_stage(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Deleted> {
    app.stages.delete_stage(&principal, id).await?;
    Ok(ok(Deleted::new(id)))
}

pub async fn sweep(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
) -> ApiResult<SweepReport> {
    let report = app.sweep.advance_stale_members(&principal).await?;
    Ok(ok(report))
}
