//! Automation rule handlers. Rules hang off a stage.

use std::sync::Arc;

use axum::{extract::Path, Extension, Json};
use shepherd_core::automation::{NewRule, RulePatch};
use shepherd_core::principal::Principal;
use shepherd_core::types::AutomationRule;
use shepherd_core::Shepherd;
use uuid::Uuid;

use crate::envelope::{created, ok, ApiResult, Created, Deleted};

/// GET /api/stages/:id/rules
pub async fn list_rules(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(stage_id): Path<Uuid>,
) -> ApiResult<Vec<AutomationRule>> {
    Ok(ok(app.rules.list_rules(&principal, stage_id).await?))
}

/// POST /api/stages/:id/rules
pub async fn create_rule(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(stage_id): Path<Uuid>,
    Json(body): Json<NewRule>,
) -> Created<AutomationRule> {
    let rule = app.rules.create_rule(&principal, stage_id, body).await?;
    Ok(created(rule))
}

/// PATCH /api/rules/:id
pub async fn update_rule(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(rule_id): Path<Uuid>,
    Json(body): Json<RulePatch>,
) -> ApiResult<AutomationRule> {
    Ok(ok(app.rules.update_rule(&principal, rule_id, body).await?))
}

/// DELETE /api/rules/:id
pub async fn delete_rule(
    Extension(principal): Extension<Principal>,
    Extension(app): Extension<Arc<Shepherd>>,
    Path(rule_id): Path<Uuid>,
) -> ApiResult<Deleted> {
    app.rules.delete_rule(&principal, rule_id).await?;
    Ok(ok(Deleted::new(rule_id)))
}
