//! Core domain types for Shepherd.
//! These are pure value types: no sqlx, no DB dependencies.
//!
//! Enums round-trip through their SCREAMING_SNAKE_CASE names both on the
//! wire (serde) and in storage (strum `AsRefStr` / `EnumString`).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

// ── Enums ─────────────────────────────────────────────────────

/// A discipleship track. Partitions stages and members into independent
/// ordered lists.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Pathway {
    Newcomer,
    NewBeliever,
}

/// What causes a stage to push its members onward automatically.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoAdvanceType {
    #[default]
    None,
    TaskCompleted,
    TimeInStage,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
    #[default]
    Active,
    /// Terminal: the member walked off the end of their pathway.
    Integrated,
    Inactive,
}

/// Task priority. Ordered so that `Urgent > High > Medium > Low`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MaritalStatus {
    Single,
    Married,
    Divorced,
    Widowed,
}

// ── Entities ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    /// Denormalised; only ever mutated through `UnitOfWork::adjust_member_count`.
    pub member_count: i64,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            member_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// One ordered step within a tenant's pathway.
/// Invariant: `order` is unique within (tenant_id, pathway) at rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub pathway: Pathway,
    pub name: String,
    pub order: i32,
    pub auto_advance_enabled: bool,
    pub auto_advance_type: AutoAdvanceType,
    pub auto_advance_value: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Stage {
    /// The keyword a completed task must contain to push members onward,
    /// if this stage has an active task-completion policy.
    pub fn task_completion_keyword(&self) -> Option<&str> {
        if !self.auto_advance_enabled || self.auto_advance_type != AutoAdvanceType::TaskCompleted {
            return None;
        }
        self.auto_advance_value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// The raw duration string of an active time-in-stage policy.
    pub fn time_in_stage_value(&self) -> Option<&str> {
        if !self.auto_advance_enabled || self.auto_advance_type != AutoAdvanceType::TimeInStage {
            return None;
        }
        self.auto_advance_value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<Gender>,
    pub marital_status: Option<MaritalStatus>,
    pub date_of_birth: Option<NaiveDate>,
    pub address: Option<String>,
    pub pathway: Pathway,
    /// Always references a stage of the same tenant and pathway.
    pub current_stage_id: Uuid,
    pub status: MemberStatus,
    pub assigned_to_id: Option<Uuid>,
    pub last_stage_change_date: DateTime<Utc>,
    /// Bumped on every progression; used for optimistic concurrency.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Member {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Immutable audit row, one per progression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageHistory {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub member_id: Uuid,
    /// `None` for the initial placement.
    pub from_stage_id: Option<Uuid>,
    pub to_stage_id: Uuid,
    pub changed_by: Uuid,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// "When a member enters `stage_id`, create a task."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub stage_id: Uuid,
    pub task_description: String,
    pub days_due: i32,
    pub priority: Priority,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub member_id: Uuid,
    pub description: String,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub assigned_to_id: Option<Uuid>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by_rule: bool,
    pub rule_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Append-only log entry on a member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub member_id: Uuid,
    pub content: String,
    pub is_system: bool,
    pub author_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Note {
    pub fn system(member: &Member, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: member.tenant_id,
            member_id: member.id,
            content: content.into(),
            is_system: true,
            author_id: None,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn stage(kind: AutoAdvanceType, enabled: bool, value: Option<&str>) -> Stage {
        let now = Utc::now();
        Stage {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            pathway: Pathway::Newcomer,
            name: "Follow-up".into(),
            order: 1,
            auto_advance_enabled: enabled,
            auto_advance_type: kind,
            auto_advance_value: value.map(String::from),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn enums_round_trip_storage_names() {
        assert_eq!(Pathway::NewBeliever.as_ref(), "NEW_BELIEVER");
        assert_eq!(Pathway::from_str("NEWCOMER").unwrap(), Pathway::Newcomer);
        assert_eq!(
            AutoAdvanceType::from_str("TASK_COMPLETED").unwrap(),
            AutoAdvanceType::TaskCompleted
        );
        assert!(MemberStatus::from_str("GONE").is_err());
    }

    #[test]
    fn enums_serialize_screaming_snake() {
        let json = serde_json::to_string(&AutoAdvanceType::TimeInStage).unwrap();
        assert_eq!(json, "\"TIME_IN_STAGE\"");
    }

    #[test]
    fn priority_orders_urgent_highest() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn keyword_requires_enabled_task_policy() {
        let s = stage(AutoAdvanceType::TaskCompleted, true, Some(" welcome call "));
        assert_eq!(s.task_completion_keyword(), Some("welcome call"));

        let disabled = stage(AutoAdvanceType::TaskCompleted, false, Some("welcome call"));
        assert_eq!(disabled.task_completion_keyword(), None);

        let timed = stage(AutoAdvanceType::TimeInStage, true, Some("7d"));
        assert_eq!(timed.task_completion_keyword(), None);
        assert_eq!(timed.time_in_stage_value(), Some("7d"));

        let blank = stage(AutoAdvanceType::TaskCompleted, true, Some("   "));
        assert_eq!(blank.task_completion_keyword(), None);
    }
}
