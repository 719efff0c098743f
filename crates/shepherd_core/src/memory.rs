//! In-memory store.
//!
//! Backs the unit tests, the HTTP tests and database-less local runs. A unit
//! of work holds the store-wide lock for its whole lifetime and writes to a
//! private copy of the state, which replaces the shared state on commit.
//! Units of work are therefore fully serialised.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::ShepherdError;
use crate::ports::{MemberFilter, Result, Store, TaskFilter, UnitOfWork};
use crate::types::*;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tenants: HashMap<Uuid, Tenant>,
    stages: HashMap<Uuid, Stage>,
    rules: HashMap<Uuid, AutomationRule>,
    members: HashMap<Uuid, Member>,
    history: Vec<StageHistory>,
    notes: Vec<Note>,
    tasks: HashMap<Uuid, Task>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tenants are provisioned by the identity sync, outside this system.
    pub async fn insert_tenant(&self, tenant: Tenant) {
        self.state.lock().await.tenants.insert(tenant.id, tenant);
    }

    pub async fn tenant(&self, tenant_id: Uuid) -> Option<Tenant> {
        self.state.lock().await.tenants.get(&tenant_id).cloned()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl MemoryUnitOfWork {
    fn stage_mut(&mut self, tenant_id: Uuid, stage_id: Uuid) -> Result<&mut Stage> {
        self.working
            .stages
            .get_mut(&stage_id)
            .filter(|s| s.tenant_id == tenant_id)
            .ok_or(ShepherdError::StageNotFound(stage_id))
    }

    fn email_taken(&self, tenant_id: Uuid, email: &str, except: Option<Uuid>) -> bool {
        let email = email.to_lowercase();
        self.working.members.values().any(|m| {
            m.tenant_id == tenant_id
                && Some(m.id) != except
                && m.email.as_deref().map(str::to_lowercase).as_deref() == Some(email.as_str())
        })
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    // ── Tenants ────────────────────────────────────────────────

    async fn get_tenant(&mut self, tenant_id: Uuid) -> Result<Option<Tenant>> {
        Ok(self.working.tenants.get(&tenant_id).cloned())
    }

    async fn adjust_member_count(&mut self, tenant_id: Uuid, delta: i64) -> Result<()> {
        let tenant = self
            .working
            .tenants
            .get_mut(&tenant_id)
            .ok_or(ShepherdError::TenantNotFound(tenant_id))?;
        tenant.member_count = (tenant.member_count + delta).max(0);
        Ok(())
    }

    // ── Stages ─────────────────────────────────────────────────

    async fn lock_pathway(&mut self, _tenant_id: Uuid, _pathway: Pathway) -> Result<()> {
        // The store-wide guard already serialises everything.
        Ok(())
    }

    async fn list_stages(
        &mut self,
        tenant_id: Uuid,
        pathway: Option<Pathway>,
    ) -> Result<Vec<Stage>> {
        let mut stages: Vec<Stage> = self
            .working
            .stages
            .values()
            .filter(|s| s.tenant_id == tenant_id && pathway.map_or(true, |p| s.pathway == p))
            .cloned()
            .collect();
        stages.sort_by(|a, b| {
            (a.pathway, a.order, a.created_at).cmp(&(b.pathway, b.order, b.created_at))
        });
        Ok(stages)
    }

    async fn get_stage(&mut self, tenant_id: Uuid, stage_id: Uuid) -> Result<Option<Stage>> {
        Ok(self
            .working
            .stages
            .get(&stage_id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_stage_by_order(
        &mut self,
        tenant_id: Uuid,
        pathway: Pathway,
        order: i32,
    ) -> Result<Option<Stage>> {
        Ok(self
            .working
            .stages
            .values()
            .find(|s| s.tenant_id == tenant_id && s.pathway == pathway && s.order == order)
            .cloned())
    }

    async fn insert_stage(&mut self, stage: &Stage) -> Result<()> {
        self.working.stages.insert(stage.id, stage.clone());
        Ok(())
    }

    async fn update_stage(&mut self, stage: &Stage) -> Result<()> {
        let existing = self.stage_mut(stage.tenant_id, stage.id)?;
        *existing = stage.clone();
        Ok(())
    }

    async fn shift_stage_orders(
        &mut self,
        tenant_id: Uuid,
        pathway: Pathway,
        from: i32,
        to: Option<i32>,
        delta: i32,
    ) -> Result<u64> {
        let mut touched = 0;
        for stage in self.working.stages.values_mut() {
            if stage.tenant_id == tenant_id
                && stage.pathway == pathway
                && stage.order >= from
                && to.map_or(true, |to| stage.order <= to)
            {
                stage.order += delta;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn delete_stage(&mut self, tenant_id: Uuid, stage_id: Uuid) -> Result<()> {
        self.stage_mut(tenant_id, stage_id)?;
        self.working.stages.remove(&stage_id);
        self.working.rules.retain(|_, r| r.stage_id != stage_id);
        Ok(())
    }

    async fn count_members_in_stage(&mut self, tenant_id: Uuid, stage_id: Uuid) -> Result<i64> {
        Ok(self
            .working
            .members
            .values()
            .filter(|m| m.tenant_id == tenant_id && m.current_stage_id == stage_id)
            .count() as i64)
    }

    // ── Automation rules ───────────────────────────────────────

    async fn list_rules(
        &mut self,
        tenant_id: Uuid,
        stage_id: Uuid,
    ) -> Result<Vec<AutomationRule>> {
        let mut rules: Vec<AutomationRule> = self
            .working
            .rules
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.stage_id == stage_id)
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }

    async fn get_rule(
        &mut self,
        tenant_id: Uuid,
        rule_id: Uuid,
    ) -> Result<Option<AutomationRule>> {
        Ok(self
            .working
            .rules
            .get(&rule_id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn insert_rule(&mut self, rule: &AutomationRule) -> Result<()> {
        self.working.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn update_rule(&mut self, rule: &AutomationRule) -> Result<()> {
        match self.working.rules.get_mut(&rule.id) {
            Some(existing) if existing.tenant_id == rule.tenant_id => {
                *existing = rule.clone();
                Ok(())
            }
            _ => Err(ShepherdError::RuleNotFound(rule.id)),
        }
    }

    async fn delete_rule(&mut self, tenant_id: Uuid, rule_id: Uuid) -> Result<()> {
        match self.working.rules.get(&rule_id) {
            Some(r) if r.tenant_id == tenant_id => {
                self.working.rules.remove(&rule_id);
                Ok(())
            }
            _ => Err(ShepherdError::RuleNotFound(rule_id)),
        }
    }

    // ── Members ────────────────────────────────────────────────

    async fn get_member(&mut self, tenant_id: Uuid, member_id: Uuid) -> Result<Option<Member>> {
        Ok(self
            .working
            .members
            .get(&member_id)
            .filter(|m| m.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_members(
        &mut self,
        tenant_id: Uuid,
        filter: &MemberFilter,
    ) -> Result<Vec<Member>> {
        let mut members: Vec<Member> = self
            .working
            .members
            .values()
            .filter(|m| {
                m.tenant_id == tenant_id
                    && filter.pathway.map_or(true, |p| m.pathway == p)
                    && filter.stage_id.map_or(true, |s| m.current_stage_id == s)
                    && filter.status.map_or(true, |s| m.status == s)
            })
            .cloned()
            .collect();
        members.sort_by(|a, b| {
            (&a.last_name, &a.first_name, a.created_at).cmp(&(
                &b.last_name,
                &b.first_name,
                b.created_at,
            ))
        });
        Ok(members)
    }

    async fn list_member_emails(&mut self, tenant_id: Uuid) -> Result<HashSet<String>> {
        Ok(self
            .working
            .members
            .values()
            .filter(|m| m.tenant_id == tenant_id)
            .filter_map(|m| m.email.as_deref().map(str::to_lowercase))
            .collect())
    }

    async fn insert_members(&mut self, members: &[Member]) -> Result<()> {
        for member in members {
            if let Some(email) = member.email.as_deref() {
                if self.email_taken(member.tenant_id, email, None) {
                    return Err(ShepherdError::DuplicateEmail(email.to_string()));
                }
            }
            self.working.members.insert(member.id, member.clone());
        }
        Ok(())
    }

    async fn update_member(&mut self, member: &Member) -> Result<()> {
        if let Some(email) = member.email.as_deref() {
            if self.email_taken(member.tenant_id, email, Some(member.id)) {
                return Err(ShepherdError::DuplicateEmail(email.to_string()));
            }
        }
        match self.working.members.get_mut(&member.id) {
            Some(existing) if existing.tenant_id == member.tenant_id => {
                *existing = member.clone();
                Ok(())
            }
            _ => Err(ShepherdError::MemberNotFound(member.id)),
        }
    }

    async fn delete_member(&mut self, tenant_id: Uuid, member_id: Uuid) -> Result<()> {
        match self.working.members.get(&member_id) {
            Some(m) if m.tenant_id == tenant_id => {}
            _ => return Err(ShepherdError::MemberNotFound(member_id)),
        }
        self.working.members.remove(&member_id);
        self.working.history.retain(|h| h.member_id != member_id);
        self.working.notes.retain(|n| n.member_id != member_id);
        self.working.tasks.retain(|_, t| t.member_id != member_id);
        Ok(())
    }

    // ── History and notes ──────────────────────────────────────

    async fn insert_history(&mut self, entries: &[StageHistory]) -> Result<()> {
        self.working.history.extend_from_slice(entries);
        Ok(())
    }

    async fn list_history(
        &mut self,
        tenant_id: Uuid,
        member_id: Uuid,
    ) -> Result<Vec<StageHistory>> {
        Ok(self
            .working
            .history
            .iter()
            .filter(|h| h.tenant_id == tenant_id && h.member_id == member_id)
            .cloned()
            .collect())
    }

    async fn insert_notes(&mut self, notes: &[Note]) -> Result<()> {
        self.working.notes.extend_from_slice(notes);
        Ok(())
    }

    async fn list_notes(&mut self, tenant_id: Uuid, member_id: Uuid) -> Result<Vec<Note>> {
        Ok(self
            .working
            .notes
            .iter()
            .filter(|n| n.tenant_id == tenant_id && n.member_id == member_id)
            .cloned()
            .collect())
    }

    // ── Tasks ──────────────────────────────────────────────────

    async fn get_task(&mut self, tenant_id: Uuid, task_id: Uuid) -> Result<Option<Task>> {
        Ok(self
            .working
            .tasks
            .get(&task_id)
            .filter(|t| t.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_tasks(&mut self, tenant_id: Uuid, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .working
            .tasks
            .values()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && filter.member_id.map_or(true, |m| t.member_id == m)
                    && filter.completed.map_or(true, |c| t.completed == c)
            })
            .cloned()
            .collect();
        // Due date ascending, undated last.
        tasks.sort_by(|a, b| {
            (a.due_date.is_none(), a.due_date, a.created_at).cmp(&(
                b.due_date.is_none(),
                b.due_date,
                b.created_at,
            ))
        });
        Ok(tasks)
    }

    async fn insert_tasks(&mut self, tasks: &[Task]) -> Result<()> {
        for task in tasks {
            self.working.tasks.insert(task.id, task.clone());
        }
        Ok(())
    }

    async fn update_task(&mut self, task: &Task) -> Result<()> {
        match self.working.tasks.get_mut(&task.id) {
            Some(existing) if existing.tenant_id == task.tenant_id => {
                *existing = task.clone();
                Ok(())
            }
            _ => Err(ShepherdError::TaskNotFound(task.id)),
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────

    async fn extend_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
