//! Member Progression Engine
//!
//! The only code that moves `Member::current_stage_id`. A transition writes
//! the history row, the member pointer, the narrating system note and the
//! automation fan-out inside the caller's unit of work, so the pointer and
//! the history trail commit together or not at all.
//!
//! `enter_stage`, `apply_transition` and `integrate_member` are shared with
//! the task-completion trigger, member creation and the time-in-stage sweep;
//! they never open or commit a unit of work themselves.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::automation::{find_enabled_rules_for_stage, plan_rule_tasks};
use crate::error::ShepherdError;
use crate::ports::{Result, Store, UnitOfWork};
use crate::principal::{Permission, Principal};
use crate::types::{Member, MemberStatus, Note, Stage, StageHistory, Task};

pub const MANUAL_ADVANCE_REASON: &str = "Manual advance";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceRequest {
    #[serde(alias = "toStageId")]
    pub stage_id: Uuid,
    pub reason: Option<String>,
    /// Optimistic concurrency precondition on `Member::version`.
    pub expected_version: Option<i64>,
}

/// A member after a stage entry, with the tasks that entry created.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceOutcome {
    pub member: Member,
    pub tasks_created: Vec<Task>,
}

pub(crate) fn check_version(member: &Member, expected: Option<i64>) -> Result<()> {
    match expected {
        Some(v) if v != member.version => Err(ShepherdError::Conflict(format!(
            "member {} is at version {}, expected {}",
            member.id, member.version, v
        ))),
        _ => Ok(()),
    }
}

/// Record `member`'s arrival in `to`: history row, narrating note, and one
/// task plus note per enabled rule of `to`. `from = None` is an initial
/// placement.
pub(crate) async fn enter_stage(
    uow: &mut dyn UnitOfWork,
    member: &Member,
    from: Option<&Stage>,
    to: &Stage,
    actor_id: Uuid,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Task>> {
    let history = StageHistory {
        id: Uuid::new_v4(),
        tenant_id: member.tenant_id,
        member_id: member.id,
        from_stage_id: from.map(|s| s.id),
        to_stage_id: to.id,
        changed_by: actor_id,
        reason: reason.to_string(),
        created_at: now,
    };
    uow.insert_history(std::slice::from_ref(&history)).await?;

    let narration = match from {
        Some(from) => format!("Moved from \"{}\" to \"{}\": {}", from.name, to.name, reason),
        None => format!("Placed in \"{}\": {}", to.name, reason),
    };
    let mut notes = vec![Note::system(member, narration, now)];

    let rules = find_enabled_rules_for_stage(uow, member.tenant_id, to.id).await?;
    let (tasks, rule_notes) = plan_rule_tasks(&rules, member, to, actor_id, now)?;
    notes.extend(rule_notes);

    if !tasks.is_empty() {
        uow.insert_tasks(&tasks).await?;
    }
    uow.insert_notes(&notes).await?;
    Ok(tasks)
}

/// Move `member` from `from` to `to` and record the arrival.
pub(crate) async fn apply_transition(
    uow: &mut dyn UnitOfWork,
    member: &mut Member,
    from: &Stage,
    to: &Stage,
    actor_id: Uuid,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Task>> {
    member.current_stage_id = to.id;
    member.last_stage_change_date = now;
    member.version += 1;
    member.updated_at = now;
    uow.update_member(member).await?;
    enter_stage(uow, member, Some(from), to, actor_id, reason, now).await
}

/// Terminal transition for a member with no stage after `last`.
pub(crate) async fn integrate_member(
    uow: &mut dyn UnitOfWork,
    member: &mut Member,
    last: &Stage,
    now: DateTime<Utc>,
) -> Result<()> {
    member.status = MemberStatus::Integrated;
    member.version += 1;
    member.updated_at = now;
    uow.update_member(member).await?;

    let note = Note::system(
        member,
        format!(
            "{} completed the {} pathway after \"{}\" and is now integrated",
            member.full_name(),
            member.pathway,
            last.name
        ),
        now,
    );
    uow.insert_notes(std::slice::from_ref(&note)).await
}

pub struct ProgressionEngine {
    store: Arc<dyn Store>,
}

impl ProgressionEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Move a member to another stage of its own pathway.
    ///
    /// Fails with `MEMBER_NOT_FOUND` or `STAGE_NOT_FOUND` (including a
    /// destination in a different pathway) and with `CONFLICT` when
    /// `expected_version` is stale. Nothing is written on failure.
    pub async fn advance_stage(
        &self,
        principal: &Principal,
        member_id: Uuid,
        request: AdvanceRequest,
    ) -> Result<AdvanceOutcome> {
        principal.require(Permission::MemberUpdate)?;
        let tenant_id = principal.tenant_id;

        let mut uow = self.store.begin().await?;
        let mut member = uow
            .get_member(tenant_id, member_id)
            .await?
            .ok_or(ShepherdError::MemberNotFound(member_id))?;
        check_version(&member, request.expected_version)?;

        let to = uow
            .get_stage(tenant_id, request.stage_id)
            .await?
            .filter(|s| s.pathway == member.pathway)
            .ok_or(ShepherdError::StageNotFound(request.stage_id))?;
        let from = uow
            .get_stage(tenant_id, member.current_stage_id)
            .await?
            .ok_or(ShepherdError::StageNotFound(member.current_stage_id))?;

        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(MANUAL_ADVANCE_REASON)
            .to_string();

        let now = Utc::now();
        let tasks_created = apply_transition(
            uow.as_mut(),
            &mut member,
            &from,
            &to,
            principal.user_id,
            &reason,
            now,
        )
        .await?;
        uow.commit().await?;

        info!(
            tenant_id = %tenant_id,
            member_id = %member.id,
            from = %from.name,
            to = %to.name,
            tasks = tasks_created.len(),
            "member advanced"
        );
        Ok(AdvanceOutcome {
            member,
            tasks_created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::principal::Role;
    use crate::test_support::{add_rule, admin, place_member, seed_pathway, seed_stages};
    use crate::types::Pathway;
    use chrono::Duration;

    async fn snapshot(store: &InMemoryStore, member: &Member) -> (Member, usize, usize, usize) {
        let mut uow = store.begin().await.unwrap();
        let m = uow.get_member(member.tenant_id, member.id).await.unwrap().unwrap();
        let history = uow.list_history(member.tenant_id, member.id).await.unwrap().len();
        let notes = uow.list_notes(member.tenant_id, member.id).await.unwrap().len();
        let tasks = uow
            .list_tasks(member.tenant_id, &Default::default())
            .await
            .unwrap()
            .len();
        (m, history, notes, tasks)
    }

    fn to(stage: &Stage) -> AdvanceRequest {
        AdvanceRequest {
            stage_id: stage.id,
            reason: None,
            expected_version: None,
        }
    }

    #[tokio::test]
    async fn follow_up_scenario() {
        let store = Arc::new(InMemoryStore::new());
        let (tenant, stages) =
            seed_pathway(&store, &["First Visit", "Follow-up", "Connect Group"]).await;
        add_rule(&store, &stages[1], "Invite to group", 7, true).await;
        let member = place_member(&store, &stages[0], "Ada", "Lovelace").await;
        let (_, history_before, notes_before, _) = snapshot(&store, &member).await;

        let engine = ProgressionEngine::new(store.clone());
        let started = Utc::now();
        let outcome = engine
            .advance_stage(&admin(&tenant), member.id, to(&stages[1]))
            .await
            .unwrap();

        assert_eq!(outcome.member.current_stage_id, stages[1].id);
        assert_eq!(outcome.tasks_created.len(), 1);
        let due = outcome.tasks_created[0].due_date.unwrap();
        assert!(due >= started + Duration::days(7));
        assert!(due <= Utc::now() + Duration::days(7));

        let (stored, history, notes, tasks) = snapshot(&store, &member).await;
        assert_eq!(stored.current_stage_id, stages[1].id);
        assert_eq!(stored.version, member.version + 1);
        assert_eq!(history, history_before + 1);
        // One narration plus one task announcement.
        assert_eq!(notes, notes_before + 2);
        assert_eq!(tasks, 1);
    }

    #[tokio::test]
    async fn history_matches_pointer() {
        let store = Arc::new(InMemoryStore::new());
        let (tenant, stages) = seed_pathway(&store, &["A", "B", "C"]).await;
        let member = place_member(&store, &stages[0], "Ada", "Lovelace").await;
        let engine = ProgressionEngine::new(store.clone());
        let actor = admin(&tenant);

        engine.advance_stage(&actor, member.id, to(&stages[2])).await.unwrap();
        engine.advance_stage(&actor, member.id, to(&stages[1])).await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let history = uow.list_history(tenant.id, member.id).await.unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.from_stage_id, Some(stages[2].id));
        assert_eq!(last.to_stage_id, stages[1].id);
        assert_eq!(last.reason, MANUAL_ADVANCE_REASON);
        assert_eq!(last.changed_by, actor.user_id);
        let notes = uow.list_notes(tenant.id, member.id).await.unwrap();
        assert!(notes
            .iter()
            .any(|n| n.is_system && n.content.contains("\"C\" to \"B\"")));
    }

    #[tokio::test]
    async fn cross_pathway_advance_is_rejected_without_writes() {
        let store = Arc::new(InMemoryStore::new());
        let (tenant, stages) = seed_pathway(&store, &["A", "B"]).await;
        let believer = seed_stages(&store, tenant.id, Pathway::NewBeliever, &["Baptism"]).await;
        let member = place_member(&store, &stages[0], "Ada", "Lovelace").await;
        let before = snapshot(&store, &member).await;

        let err = ProgressionEngine::new(store.clone())
            .advance_stage(&admin(&tenant), member.id, to(&believer[0]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STAGE_NOT_FOUND");
        assert_eq!(snapshot(&store, &member).await, before);
    }

    #[tokio::test]
    async fn rule_fan_out_skips_disabled_rules() {
        let store = Arc::new(InMemoryStore::new());
        let (tenant, stages) = seed_pathway(&store, &["A", "B"]).await;
        add_rule(&store, &stages[1], "one", 1, true).await;
        add_rule(&store, &stages[1], "two", 2, true).await;
        add_rule(&store, &stages[1], "three", 0, true).await;
        add_rule(&store, &stages[1], "off", 1, false).await;
        add_rule(&store, &stages[1], "also off", 1, false).await;
        let member = place_member(&store, &stages[0], "Ada", "Lovelace").await;

        let outcome = ProgressionEngine::new(store.clone())
            .advance_stage(&admin(&tenant), member.id, to(&stages[1]))
            .await
            .unwrap();
        assert_eq!(outcome.tasks_created.len(), 3);
        assert!(outcome
            .tasks_created
            .iter()
            .all(|t| !t.description.contains("off")));
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let store = Arc::new(InMemoryStore::new());
        let (tenant, stages) = seed_pathway(&store, &["A", "B", "C"]).await;
        let member = place_member(&store, &stages[0], "Ada", "Lovelace").await;
        let engine = ProgressionEngine::new(store.clone());
        let actor = admin(&tenant);

        let mut request = to(&stages[1]);
        request.expected_version = Some(member.version);
        engine.advance_stage(&actor, member.id, request).await.unwrap();

        let mut stale = to(&stages[2]);
        stale.expected_version = Some(member.version);
        let err = engine.advance_stage(&actor, member.id, stale).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn members_are_invisible_across_tenants() {
        let store = Arc::new(InMemoryStore::new());
        let (_, stages) = seed_pathway(&store, &["A", "B"]).await;
        let member = place_member(&store, &stages[0], "Ada", "Lovelace").await;
        let outsider = Principal::in_process(Uuid::new_v4(), Uuid::new_v4(), Role::Admin);

        let err = ProgressionEngine::new(store.clone())
            .advance_stage(&outsider, member.id, to(&stages[1]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MEMBER_NOT_FOUND");
    }

    #[tokio::test]
    async fn custom_reason_is_recorded() {
        let store = Arc::new(InMemoryStore::new());
        let (tenant, stages) = seed_pathway(&store, &["A", "B"]).await;
        let member = place_member(&store, &stages[0], "Ada", "Lovelace").await;

        let mut request = to(&stages[1]);
        request.reason = Some("Attended twice".into());
        ProgressionEngine::new(store.clone())
            .advance_stage(&admin(&tenant), member.id, request)
            .await
            .unwrap();

        let mut uow = store.begin().await.unwrap();
        let history = uow.list_history(tenant.id, member.id).await.unwrap();
        assert_eq!(history.last().unwrap().reason, "Attended twice");
    }

    #[test]
    fn advance_request_accepts_either_field_name() {
        let id = Uuid::new_v4();
        let a: AdvanceRequest =
            serde_json::from_value(serde_json::json!({ "stageId": id })).unwrap();
        let b: AdvanceRequest =
            serde_json::from_value(serde_json::json!({ "toStageId": id, "reason": "x" })).unwrap();
        assert_eq!(a.stage_id, id);
        assert_eq!(b.stage_id, id);
    }
}
