//! Stage Registry
//!
//! Per-tenant, per-pathway ordered stage lists. Every mutation runs in one
//! unit of work holding the pathway lock, and leaves the pathway's orders
//! exactly `0..N-1` when it commits.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ShepherdError;
use crate::ports::{Result, Store, UnitOfWork};
use crate::principal::{Permission, Principal};
use crate::sweep::parse_stage_duration;
use crate::types::{AutoAdvanceType, Pathway, Stage};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStage {
    pub pathway: Pathway,
    pub name: String,
    /// Requested slot. Appends when absent.
    pub order: Option<i32>,
    #[serde(default)]
    pub auto_advance_enabled: bool,
    #[serde(default)]
    pub auto_advance_type: AutoAdvanceType,
    pub auto_advance_value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagePatch {
    pub name: Option<String>,
    pub order: Option<i32>,
    pub auto_advance_enabled: Option<bool>,
    pub auto_advance_type: Option<AutoAdvanceType>,
    pub auto_advance_value: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOrder {
    pub stage_id: Uuid,
    pub new_order: i32,
}

// ── Shared helpers (used by progression, import and sweep) ────

/// Re-sequence the pathway to `0..N-1`, preserving current relative order.
/// Only rows whose order actually changes are written.
pub(crate) async fn normalize_orders(
    uow: &mut dyn UnitOfWork,
    tenant_id: Uuid,
    pathway: Pathway,
) -> Result<Vec<Stage>> {
    let mut stages = uow.list_stages(tenant_id, Some(pathway)).await?;
    let now = Utc::now();
    for (index, stage) in stages.iter_mut().enumerate() {
        let order = index as i32;
        if stage.order != order {
            stage.order = order;
            stage.updated_at = now;
            uow.update_stage(stage).await?;
        }
    }
    Ok(stages)
}

/// The explicitly requested stage, or the lowest-order stage of the pathway.
pub(crate) async fn resolve_target_stage(
    uow: &mut dyn UnitOfWork,
    tenant_id: Uuid,
    pathway: Pathway,
    stage_id: Option<Uuid>,
) -> Result<Stage> {
    match stage_id {
        Some(id) => uow
            .get_stage(tenant_id, id)
            .await?
            .filter(|s| s.pathway == pathway)
            .ok_or(ShepherdError::StageNotFound(id)),
        None => uow
            .list_stages(tenant_id, Some(pathway))
            .await?
            .into_iter()
            .next()
            .ok_or(ShepherdError::NoStagesConfigured(pathway)),
    }
}

/// Load a stage and take its pathway lock, re-reading after the lock so the
/// returned order is current.
async fn load_locked(uow: &mut dyn UnitOfWork, tenant_id: Uuid, stage_id: Uuid) -> Result<Stage> {
    let stage = uow
        .get_stage(tenant_id, stage_id)
        .await?
        .ok_or(ShepherdError::StageNotFound(stage_id))?;
    uow.lock_pathway(tenant_id, stage.pathway).await?;
    uow.get_stage(tenant_id, stage_id)
        .await?
        .ok_or(ShepherdError::StageNotFound(stage_id))
}

fn clean_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ShepherdError::InvalidInput("stage name must not be empty".into()));
    }
    Ok(name.to_string())
}

/// Normalise the auto-advance triple: a `NONE` type carries no value, blank
/// values become `None`, and time-in-stage values must parse as a duration.
fn clean_auto_advance(kind: AutoAdvanceType, value: Option<String>) -> Result<Option<String>> {
    if kind == AutoAdvanceType::None {
        return Ok(None);
    }
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    if kind == AutoAdvanceType::TimeInStage {
        if let Some(v) = value.as_deref() {
            parse_stage_duration(v)?;
        }
    }
    Ok(value)
}

fn ensure_unique_name(siblings: &[Stage], name: &str, except: Option<Uuid>, pathway: Pathway) -> Result<()> {
    let taken = siblings
        .iter()
        .any(|s| s.name == name && Some(s.id) != except);
    if taken {
        return Err(ShepherdError::DuplicateName {
            pathway,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Minimal-shift move of `stage` to `new_order` (clamped to the pathway).
/// Siblings between the old and new slot move one step to close the gap.
async fn move_stage(uow: &mut dyn UnitOfWork, stage: &mut Stage, new_order: i32) -> Result<()> {
    let siblings = normalize_orders(uow, stage.tenant_id, stage.pathway).await?;
    let last = siblings.len() as i32 - 1;
    let old_order = siblings
        .iter()
        .find(|s| s.id == stage.id)
        .map(|s| s.order)
        .ok_or(ShepherdError::StageNotFound(stage.id))?;
    let new_order = new_order.clamp(0, last.max(0));
    stage.order = old_order;

    if new_order == old_order {
        return Ok(());
    }
    if new_order > old_order {
        uow.shift_stage_orders(stage.tenant_id, stage.pathway, old_order + 1, Some(new_order), -1)
            .await?;
    } else {
        uow.shift_stage_orders(stage.tenant_id, stage.pathway, new_order, Some(old_order - 1), 1)
            .await?;
    }
    debug!(stage_id = %stage.id, from = old_order, to = new_order, "stage moved");
    stage.order = new_order;
    stage.updated_at = Utc::now();
    uow.update_stage(stage).await
}

// ── Registry ──────────────────────────────────────────────────

pub struct StageRegistry {
    store: Arc<dyn Store>,
}

impl StageRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list_stages(
        &self,
        principal: &Principal,
        pathway: Option<Pathway>,
    ) -> Result<Vec<Stage>> {
        principal.require(Permission::StageView)?;
        let mut uow = self.store.begin().await?;
        let stages = uow.list_stages(principal.tenant_id, pathway).await?;
        uow.commit().await?;
        Ok(stages)
    }

    pub async fn get_stage(&self, principal: &Principal, stage_id: Uuid) -> Result<Stage> {
        principal.require(Permission::StageView)?;
        let mut uow = self.store.begin().await?;
        let stage = uow
            .get_stage(principal.tenant_id, stage_id)
            .await?
            .ok_or(ShepherdError::StageNotFound(stage_id))?;
        uow.commit().await?;
        Ok(stage)
    }

    /// Insert a stage at its requested slot. A colliding slot pushes that
    /// stage and everything after it up by one.
    pub async fn create_stage(&self, principal: &Principal, new: NewStage) -> Result<Stage> {
        principal.require(Permission::StageCreate)?;
        let tenant_id = principal.tenant_id;
        let name = clean_name(&new.name)?;
        let auto_advance_value = clean_auto_advance(new.auto_advance_type, new.auto_advance_value)?;
        if new.order.is_some_and(|o| o < 0) {
            return Err(ShepherdError::InvalidInput("order must be zero or more".into()));
        }

        let mut uow = self.store.begin().await?;
        uow.lock_pathway(tenant_id, new.pathway).await?;
        let siblings = normalize_orders(uow.as_mut(), tenant_id, new.pathway).await?;
        ensure_unique_name(&siblings, &name, None, new.pathway)?;

        let count = siblings.len() as i32;
        let order = new.order.unwrap_or(count).min(count);
        if order < count {
            uow.shift_stage_orders(tenant_id, new.pathway, order, None, 1)
                .await?;
        }

        let now = Utc::now();
        let stage = Stage {
            id: Uuid::new_v4(),
            tenant_id,
            pathway: new.pathway,
            name,
            order,
            auto_advance_enabled: new.auto_advance_enabled,
            auto_advance_type: new.auto_advance_type,
            auto_advance_value,
            created_at: now,
            updated_at: now,
        };
        uow.insert_stage(&stage).await?;
        uow.commit().await?;

        info!(
            tenant_id = %tenant_id,
            stage_id = %stage.id,
            pathway = %stage.pathway,
            order = stage.order,
            "stage created"
        );
        Ok(stage)
    }

    /// Patch a stage. A changed order goes through the minimal-shift move.
    pub async fn update_stage(
        &self,
        principal: &Principal,
        stage_id: Uuid,
        patch: StagePatch,
    ) -> Result<Stage> {
        principal.require(Permission::StageUpdate)?;
        let tenant_id = principal.tenant_id;

        let mut uow = self.store.begin().await?;
        let mut stage = load_locked(uow.as_mut(), tenant_id, stage_id).await?;

        if let Some(name) = patch.name.as_deref() {
            let name = clean_name(name)?;
            if name != stage.name {
                let siblings = uow.list_stages(tenant_id, Some(stage.pathway)).await?;
                ensure_unique_name(&siblings, &name, Some(stage.id), stage.pathway)?;
                stage.name = name;
            }
        }

        if let Some(enabled) = patch.auto_advance_enabled {
            stage.auto_advance_enabled = enabled;
        }
        let kind = patch.auto_advance_type.unwrap_or(stage.auto_advance_type);
        let value = match patch.auto_advance_value {
            Some(v) => Some(v),
            None => stage.auto_advance_value.take(),
        };
        stage.auto_advance_type = kind;
        stage.auto_advance_value = clean_auto_advance(kind, value)?;
        stage.updated_at = Utc::now();
        uow.update_stage(&stage).await?;

        if let Some(order) = patch.order {
            if order != stage.order {
                move_stage(uow.as_mut(), &mut stage, order).await?;
            }
        }

        uow.commit().await?;
        info!(tenant_id = %tenant_id, stage_id = %stage.id, "stage updated");
        Ok(stage)
    }

    pub async fn reorder_single(
        &self,
        principal: &Principal,
        stage_id: Uuid,
        new_order: i32,
    ) -> Result<Stage> {
        principal.require(Permission::StageUpdate)?;
        let mut uow = self.store.begin().await?;
        let mut stage = load_locked(uow.as_mut(), principal.tenant_id, stage_id).await?;
        move_stage(uow.as_mut(), &mut stage, new_order).await?;
        uow.commit().await?;
        Ok(stage)
    }

    /// Batch reorder. The requested orders are validated as a partial
    /// permutation, applied, then the whole pathway is re-sequenced: stages
    /// not named in the batch keep their relative order and lose ties.
    pub async fn reorder_stages(
        &self,
        principal: &Principal,
        pathway: Pathway,
        orders: Vec<StageOrder>,
    ) -> Result<Vec<Stage>> {
        principal.require(Permission::StageUpdate)?;
        let tenant_id = principal.tenant_id;
        if orders.is_empty() {
            return Err(ShepherdError::InvalidReorder("no stages supplied".into()));
        }

        let mut seen_ids = HashSet::new();
        let mut seen_orders = HashSet::new();
        for entry in &orders {
            if entry.new_order < 0 {
                return Err(ShepherdError::InvalidReorder(format!(
                    "negative order {} for stage {}",
                    entry.new_order, entry.stage_id
                )));
            }
            if !seen_ids.insert(entry.stage_id) {
                return Err(ShepherdError::InvalidReorder(format!(
                    "stage {} listed more than once",
                    entry.stage_id
                )));
            }
            if !seen_orders.insert(entry.new_order) {
                return Err(ShepherdError::InvalidReorder(format!(
                    "order {} requested more than once",
                    entry.new_order
                )));
            }
        }

        let mut uow = self.store.begin().await?;
        uow.lock_pathway(tenant_id, pathway).await?;
        let mut stages = uow.list_stages(tenant_id, Some(pathway)).await?;

        let requested: HashMap<Uuid, i32> =
            orders.iter().map(|o| (o.stage_id, o.new_order)).collect();
        if let Some(missing) = orders
            .iter()
            .find(|o| !stages.iter().any(|s| s.id == o.stage_id))
        {
            return Err(ShepherdError::StageNotFound(missing.stage_id));
        }

        stages.sort_by_key(|s| match requested.get(&s.id) {
            Some(order) => (*order, 0, s.order),
            None => (s.order, 1, s.order),
        });

        let now = Utc::now();
        for (index, stage) in stages.iter_mut().enumerate() {
            let order = index as i32;
            if stage.order != order {
                stage.order = order;
                stage.updated_at = now;
                uow.update_stage(stage).await?;
            }
        }
        uow.commit().await?;

        info!(
            tenant_id = %tenant_id,
            pathway = %pathway,
            moved = orders.len(),
            "stages reordered"
        );
        Ok(stages)
    }

    /// Delete an empty stage and close the gap it leaves.
    pub async fn delete_stage(&self, principal: &Principal, stage_id: Uuid) -> Result<()> {
        principal.require(Permission::StageDelete)?;
        let tenant_id = principal.tenant_id;

        let mut uow = self.store.begin().await?;
        let stage = load_locked(uow.as_mut(), tenant_id, stage_id).await?;
        let member_count = uow.count_members_in_stage(tenant_id, stage_id).await?;
        if member_count > 0 {
            return Err(ShepherdError::StageHasMembers {
                stage_id,
                member_count,
            });
        }

        uow.delete_stage(tenant_id, stage_id).await?;
        normalize_orders(uow.as_mut(), tenant_id, stage.pathway).await?;
        uow.commit().await?;

        info!(tenant_id = %tenant_id, stage_id = %stage_id, "stage deleted");
        Ok(())
    }
}
