//! PostgreSQL integration tests for `PgStore`.
//!
//! Each test provisions its own tenant, so runs never interfere.
//!
//! Requires a running PostgreSQL database.
//! Run with: DATABASE_URL="postgresql:///shepherd_test" cargo test -p shepherd_postgres --test pg_store -- --ignored --nocapture

use std::sync::Arc;

use shepherd_core::members::NewMember;
use shepherd_core::ports::Store;
use shepherd_core::progression::AdvanceRequest;
use shepherd_core::stages::{NewStage, StageOrder};
use shepherd_core::types::{AutoAdvanceType, Pathway, Stage, Tenant};
use shepherd_core::{EngineConfig, Principal, Role, Shepherd};
use shepherd_postgres::{connect, migrate, DatabaseConfig, PgStore};
use uuid::Uuid;

async fn setup() -> (PgStore, Tenant, Principal) {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    let pool = connect(&DatabaseConfig::new(database_url, 5))
        .await
        .expect("failed to connect to test database");
    migrate(&pool).await.expect("migrations failed");

    let store = PgStore::new(pool);
    let tenant = Tenant::new(format!("pg-test-{}", Uuid::new_v4()));
    store.insert_tenant(&tenant).await.unwrap();
    let admin = Principal::in_process(Uuid::new_v4(), tenant.id, Role::Admin);
    (store, tenant, admin)
}

fn new_stage(name: &str, order: Option<i32>) -> NewStage {
    NewStage {
        pathway: Pathway::Newcomer,
        name: name.into(),
        order,
        auto_advance_enabled: false,
        auto_advance_type: AutoAdvanceType::None,
        auto_advance_value: None,
    }
}

fn new_member(first: &str, email: Option<&str>) -> NewMember {
    NewMember {
        first_name: first.into(),
        last_name: "Tester".into(),
        email: email.map(String::from),
        phone: None,
        gender: None,
        marital_status: None,
        date_of_birth: None,
        address: None,
        pathway: Pathway::Newcomer,
        current_stage_id: None,
        assigned_to_id: None,
        notes: None,
    }
}

fn orders(stages: &[Stage]) -> Vec<(String, i32)> {
    stages.iter().map(|s| (s.name.clone(), s.order)).collect()
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn insert_at_front_shifts_under_deferred_unique() {
    let (store, _tenant, admin) = setup().await;
    let app = Shepherd::new(Arc::new(store), EngineConfig::default());

    app.stages.create_stage(&admin, new_stage("First Visit", None)).await.unwrap();
    app.stages.create_stage(&admin, new_stage("Follow-up", None)).await.unwrap();
    app.stages.create_stage(&admin, new_stage("Welcome", Some(0))).await.unwrap();

    let stages = app.stages.list_stages(&admin, Some(Pathway::Newcomer)).await.unwrap();
    assert_eq!(
        orders(&stages),
        vec![
            ("Welcome".to_string(), 0),
            ("First Visit".to_string(), 1),
            ("Follow-up".to_string(), 2),
        ]
    );

    let reordered = app
        .stages
        .reorder_stages(
            &admin,
            Pathway::Newcomer,
            vec![StageOrder {
                stage_id: stages[2].id,
                new_order: 0,
            }],
        )
        .await
        .unwrap();
    assert_eq!(reordered[0].id, stages[2].id);
    let dense: Vec<i32> = reordered.iter().map(|s| s.order).collect();
    assert_eq!(dense, vec![0, 1, 2]);
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn dropping_a_unit_of_work_rolls_back() {
    let (store, tenant, _admin) = setup().await;

    let mut uow = store.begin().await.unwrap();
    uow.adjust_member_count(tenant.id, 5).await.unwrap();
    drop(uow);

    let mut uow = store.begin().await.unwrap();
    let stored = uow.get_tenant(tenant.id).await.unwrap().unwrap();
    assert_eq!(stored.member_count, 0);

    let err = uow.adjust_member_count(Uuid::new_v4(), 1).await.unwrap_err();
    assert_eq!(err.code(), "TENANT_NOT_FOUND");
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn member_emails_are_unique_per_tenant() {
    let (store, tenant, admin) = setup().await;
    let app = Shepherd::new(Arc::new(store.clone()), EngineConfig::default());
    app.stages.create_stage(&admin, new_stage("First Visit", None)).await.unwrap();

    app.members
        .create_member(&admin, new_member("Ada", Some("ada@example.com")))
        .await
        .unwrap();
    let err = app
        .members
        .create_member(&admin, new_member("Imposter", Some("ADA@example.com")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_EMAIL");

    let mut uow = store.begin().await.unwrap();
    let emails = uow.list_member_emails(tenant.id).await.unwrap();
    assert!(emails.contains("ada@example.com"));
    assert_eq!(uow.get_tenant(tenant.id).await.unwrap().unwrap().member_count, 1);
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn progression_writes_history_and_counts() {
    let (store, tenant, admin) = setup().await;
    let app = Shepherd::new(Arc::new(store.clone()), EngineConfig::default());
    let first = app.stages.create_stage(&admin, new_stage("First Visit", None)).await.unwrap();
    let next = app.stages.create_stage(&admin, new_stage("Follow-up", None)).await.unwrap();

    let created = app
        .members
        .create_member(&admin, new_member("Grace", None))
        .await
        .unwrap();
    assert_eq!(created.member.current_stage_id, first.id);

    let moved = app
        .progression
        .advance_stage(
            &admin,
            created.member.id,
            AdvanceRequest {
                stage_id: next.id,
                reason: None,
                expected_version: Some(0),
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.member.version, 1);

    let stale = app
        .progression
        .advance_stage(
            &admin,
            created.member.id,
            AdvanceRequest {
                stage_id: first.id,
                reason: None,
                expected_version: Some(0),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(stale.code(), "CONFLICT");

    let history = app.members.history(&admin, created.member.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].from_stage_id, None);
    assert_eq!(history[1].to_stage_id, next.id);

    let err = app.stages.delete_stage(&admin, next.id).await.unwrap_err();
    assert_eq!(err.code(), "STAGE_HAS_MEMBERS");

    app.members.delete_member(&admin, created.member.id).await.unwrap();
    let mut uow = store.begin().await.unwrap();
    assert_eq!(uow.get_tenant(tenant.id).await.unwrap().unwrap().member_count, 0);
    assert!(uow.list_history(tenant.id, created.member.id).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn statement_timeout_can_be_raised() {
    let (store, _tenant, _admin) = setup().await;
    let mut uow = store.begin().await.unwrap();
    uow.extend_timeout(std::time::Duration::from_secs(120)).await.unwrap();
    let timeout: String = sqlx::query_scalar("SHOW statement_timeout")
        .fetch_one(store.pool())
        .await
        .unwrap();
    // SET LOCAL is scoped to the unit of work, not the pool.
    assert_ne!(timeout, "2min");
    uow.commit().await.unwrap();
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn racing_writes_map_constraints_to_domain_errors() {
    let (store, tenant, admin) = setup().await;
    let app = Shepherd::new(Arc::new(store.clone()), EngineConfig::default());
    let first = app.stages.create_stage(&admin, new_stage("First Visit", None)).await.unwrap();
    app.members
        .create_member(&admin, new_member("Grace", None))
        .await
        .unwrap();

    // Write straight through a unit of work, as a racing transaction that
    // passed the registry's checks would.
    let mut uow = store.begin().await.unwrap();
    let twin = Stage {
        id: Uuid::new_v4(),
        order: 1,
        ..first.clone()
    };
    let err = uow.insert_stage(&twin).await.unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_NAME");
    drop(uow);

    let mut uow = store.begin().await.unwrap();
    let err = uow.delete_stage(tenant.id, first.id).await.unwrap_err();
    assert_eq!(err.code(), "STAGE_HAS_MEMBERS");
}
