//! sqlx row shapes and their conversion into core domain types.
//!
//! Enum columns are TEXT; a value that no longer parses is reported as a
//! conversion error rather than silently defaulted.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use shepherd_core::types::*;

pub(crate) const TENANT_COLUMNS: &str = "id, name, member_count, created_at";

pub(crate) const STAGE_COLUMNS: &str = r#"id, tenant_id, pathway, name, "order",
    auto_advance_enabled, auto_advance_type, auto_advance_value, created_at, updated_at"#;

pub(crate) const RULE_COLUMNS: &str =
    "id, tenant_id, stage_id, task_description, days_due, priority, enabled, created_at";

pub(crate) const MEMBER_COLUMNS: &str = "id, tenant_id, first_name, last_name, email, phone,
    gender, marital_status, date_of_birth, address, pathway, current_stage_id, status,
    assigned_to_id, last_stage_change_date, version, created_at, updated_at";

pub(crate) const HISTORY_COLUMNS: &str =
    "id, tenant_id, member_id, from_stage_id, to_stage_id, changed_by, reason, created_at";

pub(crate) const NOTE_COLUMNS: &str =
    "id, tenant_id, member_id, content, is_system, author_id, created_at";

pub(crate) const TASK_COLUMNS: &str = "id, tenant_id, member_id, description, due_date,
    priority, assigned_to_id, completed, completed_at, created_by_rule, rule_id, created_by,
    created_at";

fn parse<T: FromStr>(column: &str, value: &str) -> Result<T, String> {
    T::from_str(value).map_err(|_| format!("unrecognised {column} value '{value}'"))
}

fn parse_opt<T: FromStr>(column: &str, value: Option<String>) -> Result<Option<T>, String> {
    value.as_deref().map(|v| parse(column, v)).transpose()
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TenantRow {
    pub id: Uuid,
    pub name: String,
    pub member_count: i64,
    pub created_at: DateTime<Utc>,
}

impl From<TenantRow> for Tenant {
    fn from(r: TenantRow) -> Self {
        Tenant {
            id: r.id,
            name: r.name,
            member_count: r.member_count,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StageRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub pathway: String,
    pub name: String,
    pub order: i32,
    pub auto_advance_enabled: bool,
    pub auto_advance_type: String,
    pub auto_advance_value: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<StageRow> for Stage {
    type Error = String;

    fn try_from(r: StageRow) -> Result<Self, Self::Error> {
        Ok(Stage {
            id: r.id,
            tenant_id: r.tenant_id,
            pathway: parse("pathway", &r.pathway)?,
            name: r.name,
            order: r.order,
            auto_advance_enabled: r.auto_advance_enabled,
            auto_advance_type: parse("auto_advance_type", &r.auto_advance_type)?,
            auto_advance_value: r.auto_advance_value,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RuleRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub stage_id: Uuid,
    pub task_description: String,
    pub days_due: i32,
    pub priority: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<RuleRow> for AutomationRule {
    type Error = String;

    fn try_from(r: RuleRow) -> Result<Self, Self::Error> {
        Ok(AutomationRule {
            id: r.id,
            tenant_id: r.tenant_id,
            stage_id: r.stage_id,
            task_description: r.task_description,
            days_due: r.days_due,
            priority: parse("priority", &r.priority)?,
            enabled: r.enabled,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MemberRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub marital_status: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub address: Option<String>,
    pub pathway: String,
    pub current_stage_id: Uuid,
    pub status: String,
    pub assigned_to_id: Option<Uuid>,
    pub last_stage_change_date: DateTime<Utc>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<MemberRow> for Member {
    type Error = String;

    fn try_from(r: MemberRow) -> Result<Self, Self::Error> {
        Ok(Member {
            id: r.id,
            tenant_id: r.tenant_id,
            first_name: r.first_name,
            last_name: r.last_name,
            email: r.email,
            phone: r.phone,
            gender: parse_opt("gender", r.gender)?,
            marital_status: parse_opt("marital_status", r.marital_status)?,
            date_of_birth: r.date_of_birth,
            address: r.address,
            pathway: parse("pathway", &r.pathway)?,
            current_stage_id: r.current_stage_id,
            status: parse("status", &r.status)?,
            assigned_to_id: r.assigned_to_id,
            last_stage_change_date: r.last_stage_change_date,
            version: r.version,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct HistoryRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub member_id: Uuid,
    pub from_stage_id: Option<Uuid>,
    pub to_stage_id: Uuid,
    pub changed_by: Uuid,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl From<HistoryRow> for StageHistory {
    fn from(r: HistoryRow) -> Self {
        StageHistory {
            id: r.id,
            tenant_id: r.tenant_id,
            member_id: r.member_id,
            from_stage_id: r.from_stage_id,
            to_stage_id: r.to_stage_id,
            changed_by: r.changed_by,
            reason: r.reason,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct NoteRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub member_id: Uuid,
    pub content: String,
    pub is_system: bool,
    pub author_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<NoteRow> for Note {
    fn from(r: NoteRow) -> Self {
        Note {
            id: r.id,
            tenant_id: r.tenant_id,
            member_id: r.member_id,
            content: r.content,
            is_system: r.is_system,
            author_id: r.author_id,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TaskRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub member_id: Uuid,
    pub description: String,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: String,
    pub assigned_to_id: Option<Uuid>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by_rule: bool,
    pub rule_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = String;

    fn try_from(r: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: r.id,
            tenant_id: r.tenant_id,
            member_id: r.member_id,
            description: r.description,
            due_date: r.due_date,
            priority: parse("priority", &r.priority)?,
            assigned_to_id: r.assigned_to_id,
            completed: r.completed,
            completed_at: r.completed_at,
            created_by_rule: r.created_by_rule,
            rule_id: r.rule_id,
            created_by: r.created_by,
            created_at: r.created_at,
        })
    }
}
