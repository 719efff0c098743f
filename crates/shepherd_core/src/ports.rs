//! Storage port traits.
//! Implemented by shepherd_postgres and by the in-memory store; core logic
//! depends only on these traits.
//!
//! Every method is tenant-scoped: an id belonging to another tenant behaves
//! exactly like a missing id.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ShepherdError;
use crate::types::*;

pub type Result<T> = std::result::Result<T, ShepherdError>;

/// Opens units of work. One unit of work is one database transaction.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

#[derive(Debug, Clone, Default)]
pub struct MemberFilter {
    pub pathway: Option<Pathway>,
    pub stage_id: Option<Uuid>,
    pub status: Option<MemberStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub member_id: Option<Uuid>,
    pub completed: Option<bool>,
}

/// Transaction-scoped reads and writes.
///
/// Nothing is visible to other units of work until `commit`. Dropping a unit
/// of work without committing discards every write made through it.
#[async_trait]
pub trait UnitOfWork: Send {
    // ── Tenants ────────────────────────────────────────────────

    async fn get_tenant(&mut self, tenant_id: Uuid) -> Result<Option<Tenant>>;

    /// The only write path for `Tenant::member_count`.
    async fn adjust_member_count(&mut self, tenant_id: Uuid, delta: i64) -> Result<()>;

    // ── Stages ─────────────────────────────────────────────────

    /// Serialise order mutations on one (tenant, pathway) for the rest of
    /// this unit of work.
    async fn lock_pathway(&mut self, tenant_id: Uuid, pathway: Pathway) -> Result<()>;

    /// Stages ordered by (pathway, order).
    async fn list_stages(&mut self, tenant_id: Uuid, pathway: Option<Pathway>)
        -> Result<Vec<Stage>>;

    async fn get_stage(&mut self, tenant_id: Uuid, stage_id: Uuid) -> Result<Option<Stage>>;

    async fn find_stage_by_order(
        &mut self,
        tenant_id: Uuid,
        pathway: Pathway,
        order: i32,
    ) -> Result<Option<Stage>>;

    async fn insert_stage(&mut self, stage: &Stage) -> Result<()>;

    async fn update_stage(&mut self, stage: &Stage) -> Result<()>;

    /// Add `delta` to the order of every stage in the pathway whose order is
    /// within `from..=to` (`to = None` means unbounded). Returns rows touched.
    async fn shift_stage_orders(
        &mut self,
        tenant_id: Uuid,
        pathway: Pathway,
        from: i32,
        to: Option<i32>,
        delta: i32,
    ) -> Result<u64>;

    /// Deletes the stage and its automation rules.
    async fn delete_stage(&mut self, tenant_id: Uuid, stage_id: Uuid) -> Result<()>;

    async fn count_members_in_stage(&mut self, tenant_id: Uuid, stage_id: Uuid) -> Result<i64>;

    // ── Automation rules ───────────────────────────────────────

    async fn list_rules(&mut self, tenant_id: Uuid, stage_id: Uuid)
        -> Result<Vec<AutomationRule>>;

    async fn get_rule(&mut self, tenant_id: Uuid, rule_id: Uuid)
        -> Result<Option<AutomationRule>>;

    async fn insert_rule(&mut self, rule: &AutomationRule) -> Result<()>;

    async fn update_rule(&mut self, rule: &AutomationRule) -> Result<()>;

    async fn delete_rule(&mut self, tenant_id: Uuid, rule_id: Uuid) -> Result<()>;

    // ── Members ────────────────────────────────────────────────

    /// Loads and locks the member row for the rest of this unit of work.
    async fn get_member(&mut self, tenant_id: Uuid, member_id: Uuid) -> Result<Option<Member>>;

    async fn list_members(&mut self, tenant_id: Uuid, filter: &MemberFilter)
        -> Result<Vec<Member>>;

    /// Every non-null member email of the tenant, lowercased.
    async fn list_member_emails(&mut self, tenant_id: Uuid) -> Result<HashSet<String>>;

    async fn insert_members(&mut self, members: &[Member]) -> Result<()>;

    async fn update_member(&mut self, member: &Member) -> Result<()>;

    /// Cascades to the member's history, notes and tasks.
    async fn delete_member(&mut self, tenant_id: Uuid, member_id: Uuid) -> Result<()>;

    // ── History and notes ──────────────────────────────────────

    async fn insert_history(&mut self, entries: &[StageHistory]) -> Result<()>;

    /// Oldest first.
    async fn list_history(&mut self, tenant_id: Uuid, member_id: Uuid)
        -> Result<Vec<StageHistory>>;

    async fn insert_notes(&mut self, notes: &[Note]) -> Result<()>;

    /// Oldest first.
    async fn list_notes(&mut self, tenant_id: Uuid, member_id: Uuid) -> Result<Vec<Note>>;

    // ── Tasks ──────────────────────────────────────────────────

    /// Loads and locks the task row for the rest of this unit of work.
    async fn get_task(&mut self, tenant_id: Uuid, task_id: Uuid) -> Result<Option<Task>>;

    async fn list_tasks(&mut self, tenant_id: Uuid, filter: &TaskFilter) -> Result<Vec<Task>>;

    async fn insert_tasks(&mut self, tasks: &[Task]) -> Result<()>;

    async fn update_task(&mut self, task: &Task) -> Result<()>;

    // ── Lifecycle ──────────────────────────────────────────────

    /// Raise the statement timeout for the remainder of this unit of work.
    async fn extend_timeout(&mut self, timeout: Duration) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
