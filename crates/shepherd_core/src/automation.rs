//! Automation Rule Set
//!
//! Declarative "on stage entry, create task" bindings, plus the keyword
//! matcher used by the task-completion auto-advance policy.
//!
//! Rules only ever fire from `progression::enter_stage`; nothing here
//! creates tasks on its own.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tracing::debug;
use uuid::Uuid;

use crate::error::ShepherdError;
use crate::ports::{Result, Store, UnitOfWork};
use crate::principal::{Permission, Principal};
use crate::types::{AutomationRule, Member, Note, Priority, Stage, Task};

// ── Keyword matching ──────────────────────────────────────────

/// Strictness of the task-completion keyword match.
///
/// `Substring` is deliberately loose: the keyword "call" matches both
/// "welcome call" and "missed call". `Word` only matches whole words.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum KeywordMatch {
    #[default]
    Substring,
    Word,
}

impl KeywordMatch {
    /// Case-insensitive match of `keyword` inside `description`.
    pub fn matches(&self, keyword: &str, description: &str) -> bool {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return false;
        }
        let haystack = description.to_lowercase();
        match self {
            KeywordMatch::Substring => haystack.contains(&keyword),
            KeywordMatch::Word => haystack.match_indices(&keyword).any(|(start, _)| {
                let end = start + keyword.len();
                let before = haystack[..start].chars().next_back();
                let after = haystack[end..].chars().next();
                !before.is_some_and(char::is_alphanumeric)
                    && !after.is_some_and(char::is_alphanumeric)
            }),
        }
    }
}

// ── Rule evaluation ───────────────────────────────────────────

/// Enabled rules only, highest priority first. Ties keep creation order.
pub fn enabled_rules(rules: Vec<AutomationRule>) -> Vec<AutomationRule> {
    let mut enabled: Vec<AutomationRule> = rules.into_iter().filter(|r| r.enabled).collect();
    enabled.sort_by(|a, b| b.priority.cmp(&a.priority));
    enabled
}

pub(crate) async fn find_enabled_rules_for_stage(
    uow: &mut dyn UnitOfWork,
    tenant_id: Uuid,
    stage_id: Uuid,
) -> Result<Vec<AutomationRule>> {
    let rules = uow.list_rules(tenant_id, stage_id).await?;
    Ok(enabled_rules(rules))
}

/// The tasks (and their announcing system notes) that `rules` produce for a
/// member entering `stage`. Tasks go to the member's assignee, or to the
/// acting user when the member is unassigned.
pub fn plan_rule_tasks(
    rules: &[AutomationRule],
    member: &Member,
    stage: &Stage,
    actor_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(Vec<Task>, Vec<Note>)> {
    let assignee = member.assigned_to_id.unwrap_or(actor_id);
    let mut tasks = Vec::with_capacity(rules.len());
    let mut notes = Vec::with_capacity(rules.len());

    for rule in rules {
        let due = due_date(now, rule.days_due).ok_or_else(|| {
            ShepherdError::InvalidInput(format!(
                "rule {} has an out-of-range daysDue ({})",
                rule.id, rule.days_due
            ))
        })?;
        debug!(
            rule_id = %rule.id,
            stage = %stage.name,
            member_id = %member.id,
            "automation rule fired"
        );
        tasks.push(Task {
            id: Uuid::new_v4(),
            tenant_id: member.tenant_id,
            member_id: member.id,
            description: rule.task_description.clone(),
            due_date: Some(due),
            priority: rule.priority,
            assigned_to_id: Some(assignee),
            completed: false,
            completed_at: None,
            created_by_rule: true,
            rule_id: Some(rule.id),
            created_by: actor_id,
            created_at: now,
        });
        notes.push(Note::system(
            member,
            format!(
                "Task auto-created on entering \"{}\": {} (due {})",
                stage.name,
                rule.task_description,
                due.format("%Y-%m-%d")
            ),
            now,
        ));
    }
    Ok((tasks, notes))
}

fn due_date(now: DateTime<Utc>, days_due: i32) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(i64::from(days_due.max(0))).and_then(|d| now.checked_add_signed(d))
}

// ── Rule management ───────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
    pub task_description: String,
    #[serde(default)]
    pub days_due: i32,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePatch {
    pub task_description: Option<String>,
    pub days_due: Option<i32>,
    pub priority: Option<Priority>,
    pub enabled: Option<bool>,
}

/// Roughly a century; anything longer is a typo.
pub const MAX_DAYS_DUE: i32 = 36_500;

fn validate_rule_fields(description: &str, days_due: i32) -> Result<()> {
    if description.trim().is_empty() {
        return Err(ShepherdError::InvalidInput(
            "taskDescription must not be empty".into(),
        ));
    }
    if days_due < 0 {
        return Err(ShepherdError::InvalidInput(
            "daysDue must be zero or more".into(),
        ));
    }
    if days_due > MAX_DAYS_DUE {
        return Err(ShepherdError::InvalidInput(format!(
            "daysDue must be at most {MAX_DAYS_DUE}"
        )));
    }
    Ok(())
}

pub struct AutomationRules {
    store: Arc<dyn Store>,
}

impl AutomationRules {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list_rules(
        &self,
        principal: &Principal,
        stage_id: Uuid,
    ) -> Result<Vec<AutomationRule>> {
        principal.require(Permission::StageView)?;
        let tenant_id = principal.tenant_id;
        let mut uow = self.store.begin().await?;
        uow.get_stage(tenant_id, stage_id)
            .await?
            .ok_or(ShepherdError::StageNotFound(stage_id))?;
        let rules = uow.list_rules(tenant_id, stage_id).await?;
        uow.commit().await?;
        Ok(rules)
    }

    pub async fn create_rule(
        &self,
        principal: &Principal,
        stage_id: Uuid,
        new: NewRule,
    ) -> Result<AutomationRule> {
        principal.require(Permission::RuleManage)?;
        let tenant_id = principal.tenant_id;
        validate_rule_fields(&new.task_description, new.days_due)?;

        let mut uow = self.store.begin().await?;
        uow.get_stage(tenant_id, stage_id)
            .await?
            .ok_or(ShepherdError::StageNotFound(stage_id))?;

        let rule = AutomationRule {
            id: Uuid::new_v4(),
            tenant_id,
            stage_id,
            task_description: new.task_description.trim().to_string(),
            days_due: new.days_due,
            priority: new.priority,
            enabled: new.enabled,
            created_at: Utc::now(),
        };
        uow.insert_rule(&rule).await?;
        uow.commit().await?;
        Ok(rule)
    }

    pub async fn update_rule(
        &self,
        principal: &Principal,
        rule_id: Uuid,
        patch: RulePatch,
    ) -> Result<AutomationRule> {
        principal.require(Permission::RuleManage)?;
        let tenant_id = principal.tenant_id;
        let mut uow = self.store.begin().await?;
        let mut rule = uow
            .get_rule(tenant_id, rule_id)
            .await?
            .ok_or(ShepherdError::RuleNotFound(rule_id))?;

        if let Some(description) = patch.task_description {
            rule.task_description = description.trim().to_string();
        }
        if let Some(days_due) = patch.days_due {
            rule.days_due = days_due;
        }
        if let Some(priority) = patch.priority {
            rule.priority = priority;
        }
        if let Some(enabled) = patch.enabled {
            rule.enabled = enabled;
        }
        validate_rule_fields(&rule.task_description, rule.days_due)?;

        uow.update_rule(&rule).await?;
        uow.commit().await?;
        Ok(rule)
    }

    pub async fn delete_rule(&self, principal: &Principal, rule_id: Uuid) -> Result<()> {
        principal.require(Permission::RuleManage)?;
        let mut uow = self.store.begin().await?;
        uow.delete_rule(principal.tenant_id, rule_id).await?;
        uow.commit().await
    }
}
