//! Fixtures shared by the unit tests.

use chrono::Utc;
use uuid::Uuid;

use crate::memory::InMemoryStore;
use crate::ports::Store;
use crate::principal::{Principal, Role};
use crate::types::*;

pub(crate) fn stage(tenant_id: Uuid, pathway: Pathway, name: &str, order: i32) -> Stage {
    let now = Utc::now();
    Stage {
        id: Uuid::new_v4(),
        tenant_id,
        pathway,
        name: name.into(),
        order,
        auto_advance_enabled: false,
        auto_advance_type: AutoAdvanceType::None,
        auto_advance_value: None,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn member_on(stage: &Stage, first: &str, last: &str) -> Member {
    let now = Utc::now();
    Member {
        id: Uuid::new_v4(),
        tenant_id: stage.tenant_id,
        first_name: first.into(),
        last_name: last.into(),
        email: None,
        phone: None,
        gender: None,
        marital_status: None,
        date_of_birth: None,
        address: None,
        pathway: stage.pathway,
        current_stage_id: stage.id,
        status: MemberStatus::Active,
        assigned_to_id: None,
        last_stage_change_date: now,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn admin(tenant: &Tenant) -> Principal {
    Principal::in_process(Uuid::new_v4(), tenant.id, Role::Admin)
}

pub(crate) async fn seed_stages(
    store: &InMemoryStore,
    tenant_id: Uuid,
    pathway: Pathway,
    names: &[&str],
) -> Vec<Stage> {
    let stages: Vec<Stage> = names
        .iter()
        .enumerate()
        .map(|(i, name)| stage(tenant_id, pathway, name, i as i32))
        .collect();
    let mut uow = store.begin().await.unwrap();
    for s in &stages {
        uow.insert_stage(s).await.unwrap();
    }
    uow.commit().await.unwrap();
    stages
}

/// A fresh tenant with the given NEWCOMER stages at orders `0..`.
pub(crate) async fn seed_pathway(store: &InMemoryStore, names: &[&str]) -> (Tenant, Vec<Stage>) {
    let tenant = Tenant::new("Grace Chapel");
    store.insert_tenant(tenant.clone()).await;
    let stages = seed_stages(store, tenant.id, Pathway::Newcomer, names).await;
    (tenant, stages)
}

/// Insert a member directly, bypassing the progression engine.
pub(crate) async fn place_member(store: &InMemoryStore, stage: &Stage, first: &str, last: &str) -> Member {
    let member = member_on(stage, first, last);
    let mut uow = store.begin().await.unwrap();
    uow.insert_members(std::slice::from_ref(&member)).await.unwrap();
    uow.adjust_member_count(stage.tenant_id, 1).await.unwrap();
    uow.commit().await.unwrap();
    member
}

pub(crate) async fn add_rule(
    store: &InMemoryStore,
    stage: &Stage,
    description: &str,
    days_due: i32,
    enabled: bool,
) -> AutomationRule {
    let rule = AutomationRule {
        id: Uuid::new_v4(),
        tenant_id: stage.tenant_id,
        stage_id: stage.id,
        task_description: description.into(),
        days_due,
        priority: Priority::Medium,
        enabled,
        created_at: Utc::now(),
    };
    let mut uow = store.begin().await.unwrap();
    uow.insert_rule(&rule).await.unwrap();
    uow.commit().await.unwrap();
    rule
}

pub(crate) async fn set_policy(store: &InMemoryStore, stage: &Stage, kind: AutoAdvanceType, value: &str) {
    let mut uow = store.begin().await.unwrap();
    let mut s = uow.get_stage(stage.tenant_id, stage.id).await.unwrap().unwrap();
    s.auto_advance_enabled = true;
    s.auto_advance_type = kind;
    s.auto_advance_value = Some(value.into());
    uow.update_stage(&s).await.unwrap();
    uow.commit().await.unwrap();
}

pub(crate) async fn set_keyword(store: &InMemoryStore, stage: &Stage, keyword: &str) {
    set_policy(store, stage, AutoAdvanceType::TaskCompleted, keyword).await;
}
