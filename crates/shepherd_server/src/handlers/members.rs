//! Member handlers: CRUD, progression, status, history, notes and bulk import.

use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde::Deserialize;
use shepherd_core::import::{ImportReport, ImportRequest};
use shepherd_core::members::{NewMember, StatusChange};
use shepherd_core::ports::MemberFilter;
use shepherd_core::principal::Principal;
use shepherd_core::progression::{AdvanceOutcome, AdvanceRequest};
use shepherd_core::types::{Member, MemberStatus, Note, Pathway, StageHistory};
use shepherd_core::Shepherd;
use uuid::Uuid;

use crate::envelope::{created, ok, ApiResult, Created, Deleted};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberQuery {
    pub pathway: Option<Pathway>,
    pub stage_id: Option<Uuid>,
    pub status: Option<MemberStatus>,
}

impl From<MemberQuery> for MemberFilter {
    fn from(q: MemberQuery) -> Self {
        MemberFilter {
            pathway: q.pathway,
            stage_id: q.stage_id,
            status: q.status,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NoteBody {
    pub content: String,
}

/// GET /api/members
pub async fn list_members(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Query(query): Query<MemberQuery>,
) -> ApiResult<Vec<Member>> {
    Ok(ok(app.members.list_members(&principal, query.into()).await?))
}

/// POST /api/members: places the member and fires the initial stage's rules.
pub async fn create_member(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Json(body): Json<NewMember>,
) -> Created<AdvanceOutcome> {
    let outcome = app.members.create_member(&principal, body).await?;
    Ok(created(outcome))
}

/// GET /api/members/:id
pub async fn get_member(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Member> {
    Ok(ok(app.members.get_member(&principal, id).await?))
}

/// DELETE /api/members/:id
pub async fn delete_member(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Deleted> {
    app.members.delete_member(&principal, id).await?;
    Ok(ok(Deleted::new(id)))
}

/// PATCH /api/members/:id/status
pub async fn update_status(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusChange>,
) -> ApiResult<Member> {
    Ok(ok(app.members.update_status(&principal, id, body).await?))
}

/// PATCH /api/members/:id/stage
pub async fn advance_stage(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(id): Path<Uuid>,
    Json(body): Json<AdvanceRequest>,
) -> ApiResult<AdvanceOutcome> {
    let outcome = app.progression.advance_stage(&principal, id, body).await?;
    Ok(ok(outcome))
}

/// GET /api/members/:id/history
pub async fn history(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<StageHistory>> {
    Ok(ok(app.members.history(&principal, id).await?))
}

/// GET /api/members/:id/notes
pub async fn list_notes(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<Note>> {
    Ok(ok(app.members.notes(&principal, id).await?))
}

/// POST /api/members/:id/notes
pub async fn add_note(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(id): Path<Uuid>,
    Json(body): Json<NoteBody>,
) -> Created<Note> {
    let note = app.members.add_note(&principal, id, &body.content).await?;
    Ok(created(note))
}

/// POST /api/members/import
pub async fn import_members(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Json(body): Json<ImportRequest>,
) -> ApiResult<ImportReport> {
    Ok(ok(app.import.import_members(&principal, body).await?))
}
