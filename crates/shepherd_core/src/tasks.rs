//! Tasks and the Task Completion Trigger.
//!
//! Completing a task is the reverse path into the progression engine: when
//! the member's current stage has an active task-completion policy whose
//! keyword matches the task description, the member moves to the next stage
//! (or is integrated if there is none) in the same unit of work that stamps
//! the task.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::automation::KeywordMatch;
use crate::error::ShepherdError;
use crate::ports::{Result, Store, TaskFilter};
use crate::principal::{Permission, Principal};
use crate::progression::{apply_transition, integrate_member};
use crate::types::{Member, MemberStatus, Priority, Task};

pub const TASK_COMPLETED_REASON: &str = "Auto-advanced: Task completed";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub member_id: Uuid,
    pub description: String,
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: Priority,
    pub assigned_to_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub task: Task,
    /// The member moved to the next stage.
    pub advanced: bool,
    /// The member was on the last stage and is now integrated.
    pub integrated: bool,
    /// Present whenever `advanced` or `integrated` is set.
    pub member: Option<Member>,
    pub tasks_created: Vec<Task>,
}

pub struct TaskService {
    store: Arc<dyn Store>,
    keyword_match: KeywordMatch,
}

impl TaskService {
    pub fn new(store: Arc<dyn Store>, keyword_match: KeywordMatch) -> Self {
        Self {
            store,
            keyword_match,
        }
    }

    pub async fn list_tasks(&self, principal: &Principal, filter: TaskFilter) -> Result<Vec<Task>> {
        principal.require(Permission::TaskView)?;
        let mut uow = self.store.begin().await?;
        let tasks = uow.list_tasks(principal.tenant_id, &filter).await?;
        uow.commit().await?;
        Ok(tasks)
    }

    pub async fn get_task(&self, principal: &Principal, task_id: Uuid) -> Result<Task> {
        principal.require(Permission::TaskView)?;
        let mut uow = self.store.begin().await?;
        let task = uow
            .get_task(principal.tenant_id, task_id)
            .await?
            .ok_or(ShepherdError::TaskNotFound(task_id))?;
        uow.commit().await?;
        Ok(task)
    }

    /// Manually created task. Goes to the member's assignee unless another
    /// assignee is given, then to the caller.
    pub async fn create_task(&self, principal: &Principal, new: NewTask) -> Result<Task> {
        principal.require(Permission::TaskCreate)?;
        let description = new.description.trim();
        if description.is_empty() {
            return Err(ShepherdError::InvalidInput("description must not be empty".into()));
        }

        let mut uow = self.store.begin().await?;
        let member = uow
            .get_member(principal.tenant_id, new.member_id)
            .await?
            .ok_or(ShepherdError::MemberNotFound(new.member_id))?;

        let task = Task {
            id: Uuid::new_v4(),
            tenant_id: principal.tenant_id,
            member_id: member.id,
            description: description.to_string(),
            due_date: new.due_date,
            priority: new.priority,
            assigned_to_id: new
                .assigned_to_id
                .or(member.assigned_to_id)
                .or(Some(principal.user_id)),
            completed: false,
            completed_at: None,
            created_by_rule: false,
            rule_id: None,
            created_by: principal.user_id,
            created_at: Utc::now(),
        };
        uow.insert_tasks(std::slice::from_ref(&task)).await?;
        uow.commit().await?;
        Ok(task)
    }

    /// Mark a task completed, exactly once, and run the auto-advance check.
    pub async fn complete_task(
        &self,
        principal: &Principal,
        task_id: Uuid,
    ) -> Result<CompletionOutcome> {
        principal.require(Permission::TaskUpdate)?;
        let tenant_id = principal.tenant_id;

        let mut uow = self.store.begin().await?;
        let mut task = uow
            .get_task(tenant_id, task_id)
            .await?
            .ok_or(ShepherdError::TaskNotFound(task_id))?;
        if task.completed {
            return Err(ShepherdError::TaskAlreadyCompleted(task_id));
        }
        let mut member = uow
            .get_member(tenant_id, task.member_id)
            .await?
            .ok_or(ShepherdError::MemberNotFound(task.member_id))?;
        let stage = uow
            .get_stage(tenant_id, member.current_stage_id)
            .await?
            .ok_or(ShepherdError::StageNotFound(member.current_stage_id))?;

        let now = Utc::now();
        task.completed = true;
        task.completed_at = Some(now);
        uow.update_task(&task).await?;

        let mut outcome = CompletionOutcome {
            task,
            advanced: false,
            integrated: false,
            member: None,
            tasks_created: Vec::new(),
        };

        let triggered = member.status == MemberStatus::Active
            && stage
                .task_completion_keyword()
                .is_some_and(|k| self.keyword_match.matches(k, &outcome.task.description));

        if triggered {
            let next = uow
                .find_stage_by_order(tenant_id, stage.pathway, stage.order + 1)
                .await?;
            match next {
                Some(next) => {
                    outcome.tasks_created = apply_transition(
                        uow.as_mut(),
                        &mut member,
                        &stage,
                        &next,
                        principal.user_id,
                        TASK_COMPLETED_REASON,
                        now,
                    )
                    .await?;
                    outcome.advanced = true;
                    info!(
                        tenant_id = %tenant_id,
                        member_id = %member.id,
                        to = %next.name,
                        "member auto-advanced on task completion"
                    );
                }
                None => {
                    integrate_member(uow.as_mut(), &mut member, &stage, now).await?;
                    outcome.integrated = true;
                    info!(
                        tenant_id = %tenant_id,
                        member_id = %member.id,
                        "member integrated on task completion"
                    );
                }
            }
            outcome.member = Some(member);
        } else {
            debug!(task_id = %task_id, stage = %stage.name, "no auto-advance");
        }

        uow.commit().await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::principal::Role;
    use crate::test_support::{admin, place_member, seed_pathway, set_keyword};
    use crate::types::Stage;

    async fn task_for(service: &TaskService, principal: &Principal, member: &Member, description: &str) -> Task {
        service
            .create_task(
                principal,
                NewTask {
                    member_id: member.id,
                    description: description.into(),
                    due_date: None,
                    priority: Priority::Medium,
                    assigned_to_id: None,
                },
            )
            .await
            .unwrap()
    }

    async fn setup(keyword_stage: usize) -> (Arc<InMemoryStore>, Principal, Vec<Stage>, Member) {
        let store = Arc::new(InMemoryStore::new());
        let (tenant, stages) =
            seed_pathway(&store, &["First Visit", "Follow-up", "Connect Group"]).await;
        set_keyword(&store, &stages[keyword_stage], "welcome call").await;
        let member = place_member(&store, &stages[keyword_stage], "Ada", "Lovelace").await;
        (store, admin(&tenant), stages, member)
    }

    #[tokio::test]
    async fn keyword_task_advances_to_next_stage() {
        let (store, actor, stages, member) = setup(0).await;
        let service = TaskService::new(store.clone(), KeywordMatch::Substring);
        let task = task_for(&service, &actor, &member, "Make welcome call to introduce yourself").await;

        let outcome = service.complete_task(&actor, task.id).await.unwrap();
        assert!(outcome.advanced);
        assert!(!outcome.integrated);
        assert_eq!(outcome.member.unwrap().current_stage_id, stages[1].id);

        let mut uow = store.begin().await.unwrap();
        let history = uow.list_history(actor.tenant_id, member.id).await.unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.reason, TASK_COMPLETED_REASON);
        assert_eq!(last.from_stage_id, Some(stages[0].id));
    }

    #[tokio::test]
    async fn unrelated_task_does_not_advance() {
        let (store, actor, stages, member) = setup(0).await;
        let service = TaskService::new(store.clone(), KeywordMatch::Substring);
        let task = task_for(&service, &actor, &member, "Unrelated task").await;

        let outcome = service.complete_task(&actor, task.id).await.unwrap();
        assert!(!outcome.advanced);
        assert!(outcome.task.completed);
        assert!(outcome.member.is_none());

        let mut uow = store.begin().await.unwrap();
        let stored = uow.get_member(actor.tenant_id, member.id).await.unwrap().unwrap();
        assert_eq!(stored.current_stage_id, stages[0].id);
    }

    #[tokio::test]
    async fn completing_twice_is_rejected_and_keeps_timestamp() {
        let (store, actor, _, member) = setup(0).await;
        let service = TaskService::new(store.clone(), KeywordMatch::Substring);
        let task = task_for(&service, &actor, &member, "Unrelated task").await;

        let first = service.complete_task(&actor, task.id).await.unwrap();
        let err = service.complete_task(&actor, task.id).await.unwrap_err();
        assert_eq!(err.code(), "TASK_ALREADY_COMPLETED");

        let stored = service.get_task(&actor, task.id).await.unwrap();
        assert_eq!(stored.completed_at, first.task.completed_at);
    }

    #[tokio::test]
    async fn last_stage_integrates_without_history() {
        let (store, actor, _, member) = setup(2).await;
        let service = TaskService::new(store.clone(), KeywordMatch::Substring);
        let task = task_for(&service, &actor, &member, "Welcome call follow-through").await;

        let mut uow = store.begin().await.unwrap();
        let history_before = uow.list_history(actor.tenant_id, member.id).await.unwrap().len();
        drop(uow);

        let outcome = service.complete_task(&actor, task.id).await.unwrap();
        assert!(outcome.integrated);
        assert!(!outcome.advanced);
        assert_eq!(outcome.member.unwrap().status, MemberStatus::Integrated);

        let mut uow = store.begin().await.unwrap();
        let history = uow.list_history(actor.tenant_id, member.id).await.unwrap();
        assert_eq!(history.len(), history_before);
        let notes = uow.list_notes(actor.tenant_id, member.id).await.unwrap();
        assert!(notes.iter().any(|n| n.content.contains("integrated")));
    }

    #[tokio::test]
    async fn integrated_members_do_not_re_trigger() {
        let (store, actor, _, member) = setup(2).await;
        let service = TaskService::new(store.clone(), KeywordMatch::Substring);
        let first = task_for(&service, &actor, &member, "welcome call").await;
        let second = task_for(&service, &actor, &member, "second welcome call").await;

        assert!(service.complete_task(&actor, first.id).await.unwrap().integrated);
        let again = service.complete_task(&actor, second.id).await.unwrap();
        assert!(!again.integrated);
        assert!(again.member.is_none());
    }

    #[tokio::test]
    async fn word_mode_ignores_embedded_keywords() {
        let store = Arc::new(InMemoryStore::new());
        let (tenant, stages) = seed_pathway(&store, &["A", "B"]).await;
        set_keyword(&store, &stages[0], "call").await;
        let member = place_member(&store, &stages[0], "Ada", "Lovelace").await;
        let actor = admin(&tenant);
        let service = TaskService::new(store.clone(), KeywordMatch::Word);

        let recall = task_for(&service, &actor, &member, "Recall attendance").await;
        assert!(!service.complete_task(&actor, recall.id).await.unwrap().advanced);
        let call = task_for(&service, &actor, &member, "Call Ada").await;
        assert!(service.complete_task(&actor, call.id).await.unwrap().advanced);
    }

    #[tokio::test]
    async fn auto_advance_fires_destination_rules() {
        let (store, actor, stages, member) = setup(0).await;
        crate::test_support::add_rule(&store, &stages[1], "Invite to group", 7, true).await;
        let service = TaskService::new(store.clone(), KeywordMatch::Substring);
        let task = task_for(&service, &actor, &member, "welcome call").await;

        let outcome = service.complete_task(&actor, task.id).await.unwrap();
        assert_eq!(outcome.tasks_created.len(), 1);
        assert_eq!(outcome.tasks_created[0].description, "Invite to group");
    }

    #[tokio::test]
    async fn manual_task_assignment_falls_back_to_caller() {
        let (store, actor, _, member) = setup(0).await;
        let service = TaskService::new(store.clone(), KeywordMatch::Substring);
        let task = task_for(&service, &actor, &member, "Drop off a Bible").await;
        assert_eq!(task.assigned_to_id, Some(actor.user_id));
        assert!(!task.created_by_rule);
    }

    #[tokio::test]
    async fn tasks_are_tenant_scoped() {
        let (store, actor, _, member) = setup(0).await;
        let service = TaskService::new(store.clone(), KeywordMatch::Substring);
        let task = task_for(&service, &actor, &member, "Drop off a Bible").await;

        let outsider = Principal::in_process(Uuid::new_v4(), Uuid::new_v4(), Role::Admin);
        let err = service.complete_task(&outsider, task.id).await.unwrap_err();
        assert_eq!(err.code(), "TASK_NOT_FOUND");
        assert!(service
            .list_tasks(&outsider, TaskFilter::default())
            .await
            .unwrap()
            .is_empty());
    }
}
