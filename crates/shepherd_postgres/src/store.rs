//! `PgStore` and its unit of work.
//!
//! One `PgUnitOfWork` is one `sqlx::Transaction`. Dropping it without
//! `commit` rolls the transaction back.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use shepherd_core::error::ShepherdError;
use shepherd_core::ports::{MemberFilter, Result, Store, TaskFilter, UnitOfWork};
use shepherd_core::types::*;

use crate::rows::*;

/// Rows per multi-row INSERT; keeps every statement well under the 65535
/// bind-parameter limit.
const BULK_CHUNK: usize = 1000;

const MEMBERS_EMAIL_UNIQUE: &str = "members_email_unique";
const STAGES_NAME_UNIQUE: &str = "stages_name_unique";
const MEMBERS_CURRENT_STAGE_FK: &str = "members_current_stage_fk";

fn internal(e: sqlx::Error) -> ShepherdError {
    ShepherdError::Internal(anyhow!(e))
}

fn decode<R, T>(row: R) -> Result<T>
where
    T: TryFrom<R, Error = String>,
{
    T::try_from(row).map_err(|e| ShepherdError::Internal(anyhow!(e)))
}

fn violates(e: &sqlx::Error, constraint: &str) -> bool {
    match e {
        sqlx::Error::Database(db) => db.constraint() == Some(constraint),
        _ => false,
    }
}

/// A concurrent writer got the name first, after the registry's own check.
fn stage_write_error(e: sqlx::Error, stage: &Stage) -> ShepherdError {
    if violates(&e, STAGES_NAME_UNIQUE) {
        ShepherdError::DuplicateName {
            pathway: stage.pathway,
            name: stage.name.clone(),
        }
    } else {
        internal(e)
    }
}

// ── PgStore ───────────────────────────────────────────────────

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Tenants are provisioned outside the engine; this is the seeding hook.
    pub async fn insert_tenant(&self, tenant: &Tenant) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenants (id, name, member_count, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(tenant.member_count)
        .bind(tenant.created_at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.map_err(internal)?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    // ── Tenants ────────────────────────────────────────────────

    async fn get_tenant(&mut self, tenant_id: Uuid) -> Result<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1"
        ))
        .bind(tenant_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(internal)?;
        Ok(row.map(Tenant::from))
    }

    async fn adjust_member_count(&mut self, tenant_id: Uuid, delta: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET member_count = GREATEST(member_count + $2, 0)
            WHERE id = $1
            "#,
        )
        .bind(tenant_id)
        .bind(delta)
        .execute(&mut *self.tx)
        .await
        .map_err(internal)?;
        if result.rows_affected() == 0 {
            return Err(ShepherdError::TenantNotFound(tenant_id));
        }
        Ok(())
    }

    // ── Stages ─────────────────────────────────────────────────

    async fn lock_pathway(&mut self, tenant_id: Uuid, pathway: Pathway) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("{tenant_id}:{pathway}"))
            .execute(&mut *self.tx)
            .await
            .map_err(internal)?;
        Ok(())
    }

    async fn list_stages(
        &mut self,
        tenant_id: Uuid,
        pathway: Option<Pathway>,
    ) -> Result<Vec<Stage>> {
        let rows = sqlx::query_as::<_, StageRow>(&format!(
            r#"
            SELECT {STAGE_COLUMNS}
            FROM stages
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR pathway = $2)
            ORDER BY pathway, "order", created_at
            "#
        ))
        .bind(tenant_id)
        .bind(pathway.map(|p| p.to_string()))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(internal)?;
        rows.into_iter().map(decode).collect()
    }

    async fn get_stage(&mut self, tenant_id: Uuid, stage_id: Uuid) -> Result<Option<Stage>> {
        let row = sqlx::query_as::<_, StageRow>(&format!(
            "SELECT {STAGE_COLUMNS} FROM stages WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(stage_id)
        .bind(tenant_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(internal)?;
        row.map(decode).transpose()
    }

    async fn find_stage_by_order(
        &mut self,
        tenant_id: Uuid,
        pathway: Pathway,
        order: i32,
    ) -> Result<Option<Stage>> {
        let row = sqlx::query_as::<_, StageRow>(&format!(
            r#"
            SELECT {STAGE_COLUMNS}
            FROM stages
            WHERE tenant_id = $1 AND pathway = $2 AND "order" = $3
            "#
        ))
        .bind(tenant_id)
        .bind(pathway.as_ref())
        .bind(order)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(internal)?;
        row.map(decode).transpose()
    }

    async fn insert_stage(&mut self, stage: &Stage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stages (id, tenant_id, pathway, name, "order", auto_advance_enabled,
                                auto_advance_type, auto_advance_value, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(stage.id)
        .bind(stage.tenant_id)
        .bind(stage.pathway.as_ref())
        .bind(&stage.name)
        .bind(stage.order)
        .bind(stage.auto_advance_enabled)
        .bind(stage.auto_advance_type.as_ref())
        .bind(&stage.auto_advance_value)
        .bind(stage.created_at)
        .bind(stage.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| stage_write_error(e, stage))?;
        Ok(())
    }

    async fn update_stage(&mut self, stage: &Stage) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE stages
            SET name = $3, "order" = $4, auto_advance_enabled = $5,
                auto_advance_type = $6, auto_advance_value = $7, updated_at = $8
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(stage.id)
        .bind(stage.tenant_id)
        .bind(&stage.name)
        .bind(stage.order)
        .bind(stage.auto_advance_enabled)
        .bind(stage.auto_advance_type.as_ref())
        .bind(&stage.auto_advance_value)
        .bind(stage.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| stage_write_error(e, stage))?;
        if result.rows_affected() == 0 {
            return Err(ShepherdError::StageNotFound(stage.id));
        }
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
        let result = sqlx::query(
            r#"
            UPDATE stages
            SET "order" = "order" + $4, updated_at = now()
            WHERE tenant_id = $1
              AND pathway = $2
              AND "order" >= $3
              AND ($5::int IS NULL OR "order" <= $5)
            "#,
        )
        .bind(tenant_id)
        .bind(pathway.as_ref())
        .bind(from)
        .bind(delta)
        .bind(to)
        .execute(&mut *self.tx)
        .await
        .map_err(internal)?;
        Ok(result.rows_affected())
    }

    async fn delete_stage(&mut self, tenant_id: Uuid, stage_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM stages WHERE id = $1 AND tenant_id = $2")
            .bind(stage_id)
            .bind(tenant_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                // The failed statement aborts the transaction, so the exact
                // count can't be read back; at least one member remains.
                if violates(&e, MEMBERS_CURRENT_STAGE_FK) {
                    ShepherdError::StageHasMembers {
                        stage_id,
                        member_count: 1,
                    }
                } else {
                    internal(e)
                }
            })?;
        if result.rows_affected() == 0 {
            return Err(ShepherdError::StageNotFound(stage_id));
        }
        Ok(())
    }

    async fn count_members_in_stage(&mut self, tenant_id: Uuid, stage_id: Uuid) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM members WHERE tenant_id = $1 AND current_stage_id = $2",
        )
        .bind(tenant_id)
        .bind(stage_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(internal)
    }

    // ── Automation rules ───────────────────────────────────────

    async fn list_rules(
        &mut self,
        tenant_id: Uuid,
        stage_id: Uuid,
    ) -> Result<Vec<AutomationRule>> {
        let rows = sqlx::query_as::<_, RuleRow>(&format!(
            r#"
            SELECT {RULE_COLUMNS}
            FROM automation_rules
            WHERE tenant_id = $1 AND stage_id = $2
            ORDER BY created_at
            "#
        ))
        .bind(tenant_id)
        .bind(stage_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(internal)?;
        rows.into_iter().map(decode).collect()
    }

    async fn get_rule(
        &mut self,
        tenant_id: Uuid,
        rule_id: Uuid,
    ) -> Result<Option<AutomationRule>> {
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {RULE_COLUMNS} FROM automation_rules WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(rule_id)
        .bind(tenant_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(internal)?;
        row.map(decode).transpose()
    }

    async fn insert_rule(&mut self, rule: &AutomationRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO automation_rules (id, tenant_id, stage_id, task_description,
                                          days_due, priority, enabled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(rule.id)
        .bind(rule.tenant_id)
        .bind(rule.stage_id)
        .bind(&rule.task_description)
        .bind(rule.days_due)
        .bind(rule.priority.as_ref())
        .bind(rule.enabled)
        .bind(rule.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn update_rule(&mut self, rule: &AutomationRule) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE automation_rules
            SET task_description = $3, days_due = $4, priority = $5, enabled = $6
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(rule.id)
        .bind(rule.tenant_id)
        .bind(&rule.task_description)
        .bind(rule.days_due)
        .bind(rule.priority.as_ref())
        .bind(rule.enabled)
        .execute(&mut *self.tx)
        .await
        .map_err(internal)?;
        if result.rows_affected() == 0 {
            return Err(ShepherdError::RuleNotFound(rule.id));
        }
        Ok(())
    }

    async fn delete_rule(&mut self, tenant_id: Uuid, rule_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM automation_rules WHERE id = $1 AND tenant_id = $2")
            .bind(rule_id)
            .bind(tenant_id)
            .execute(&mut *self.tx)
            .await
            .map_err(internal)?;
        if result.rows_affected() == 0 {
            return Err(ShepherdError::RuleNotFound(rule_id));
        }
        Ok(())
    }

    // ── Members ────────────────────────────────────────────────

    async fn get_member(&mut self, tenant_id: Uuid, member_id: Uuid) -> Result<Option<Member>> {
        let row = sqlx::query_as::<_, MemberRow>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE id = $1 AND tenant_id = $2 FOR UPDATE"
        ))
        .bind(member_id)
        .bind(tenant_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(internal)?;
        row.map(decode).transpose()
    }

    async fn list_members(
        &mut self,
        tenant_id: Uuid,
        filter: &MemberFilter,
    ) -> Result<Vec<Member>> {
        let rows = sqlx::query_as::<_, MemberRow>(&format!(
            r#"
            SELECT {MEMBER_COLUMNS}
            FROM members
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR pathway = $2)
              AND ($3::uuid IS NULL OR current_stage_id = $3)
              AND ($4::text IS NULL OR status = $4)
            ORDER BY last_name, first_name, created_at
            "#
        ))
        .bind(tenant_id)
        .bind(filter.pathway.map(|p| p.to_string()))
        .bind(filter.stage_id)
        .bind(filter.status.map(|s| s.to_string()))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(internal)?;
        rows.into_iter().map(decode).collect()
    }

    async fn list_member_emails(&mut self, tenant_id: Uuid) -> Result<HashSet<String>> {
        let emails = sqlx::query_scalar::<_, String>(
            "SELECT lower(email) FROM members WHERE tenant_id = $1 AND email IS NOT NULL",
        )
        .bind(tenant_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(internal)?;
        Ok(emails.into_iter().collect())
    }

    async fn insert_members(&mut self, members: &[Member]) -> Result<()> {
        for chunk in members.chunks(BULK_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO members ({MEMBER_COLUMNS}) "
            ));
            qb.push_values(chunk, |mut b, m| {
                b.push_bind(m.id)
                    .push_bind(m.tenant_id)
                    .push_bind(m.first_name.clone())
                    .push_bind(m.last_name.clone())
                    .push_bind(m.email.clone())
                    .push_bind(m.phone.clone())
                    .push_bind(m.gender.map(|g| g.to_string()))
                    .push_bind(m.marital_status.map(|s| s.to_string()))
                    .push_bind(m.date_of_birth)
                    .push_bind(m.address.clone())
                    .push_bind(m.pathway.to_string())
                    .push_bind(m.current_stage_id)
                    .push_bind(m.status.to_string())
                    .push_bind(m.assigned_to_id)
                    .push_bind(m.last_stage_change_date)
                    .push_bind(m.version)
                    .push_bind(m.created_at)
                    .push_bind(m.updated_at);
            });
            qb.build()
                .execute(&mut *self.tx)
                .await
                .map_err(|e| {
                    if violates(&e, MEMBERS_EMAIL_UNIQUE) {
                        match chunk {
                            [single] => ShepherdError::DuplicateEmail(
                                single.email.clone().unwrap_or_default(),
                            ),
                            _ => ShepherdError::Conflict(
                                "a member email in this batch is already in use".into(),
                            ),
                        }
                    } else {
                        internal(e)
                    }
                })?;
        }
        Ok(())
    }

    async fn update_member(&mut self, member: &Member) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE members
            SET first_name = $3, last_name = $4, email = $5, phone = $6, gender = $7,
                marital_status = $8, date_of_birth = $9, address = $10,
                current_stage_id = $11, status = $12, assigned_to_id = $13,
                last_stage_change_date = $14, version = $15, updated_at = $16
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(member.id)
        .bind(member.tenant_id)
        .bind(&member.first_name)
        .bind(&member.last_name)
        .bind(&member.email)
        .bind(&member.phone)
        .bind(member.gender.map(|g| g.to_string()))
        .bind(member.marital_status.map(|s| s.to_string()))
        .bind(member.date_of_birth)
        .bind(&member.address)
        .bind(member.current_stage_id)
        .bind(member.status.as_ref())
        .bind(member.assigned_to_id)
        .bind(member.last_stage_change_date)
        .bind(member.version)
        .bind(member.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if violates(&e, MEMBERS_EMAIL_UNIQUE) {
                ShepherdError::DuplicateEmail(member.email.clone().unwrap_or_default())
            } else {
                internal(e)
            }
        })?;
        if result.rows_affected() == 0 {
            return Err(ShepherdError::MemberNotFound(member.id));
        }
        Ok(())
    }

    async fn delete_member(&mut self, tenant_id: Uuid, member_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM members WHERE id = $1 AND tenant_id = $2")
            .bind(member_id)
            .bind(tenant_id)
            .execute(&mut *self.tx)
            .await
            .map_err(internal)?;
        if result.rows_affected() == 0 {
            return Err(ShepherdError::MemberNotFound(member_id));
        }
        Ok(())
    }

    // ── History and notes ──────────────────────────────────────

    async fn insert_history(&mut self, entries: &[StageHistory]) -> Result<()> {
        for chunk in entries.chunks(BULK_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO stage_history ({HISTORY_COLUMNS}) "
            ));
            qb.push_values(chunk, |mut b, h| {
                b.push_bind(h.id)
                    .push_bind(h.tenant_id)
                    .push_bind(h.member_id)
                    .push_bind(h.from_stage_id)
                    .push_bind(h.to_stage_id)
                    .push_bind(h.changed_by)
                    .push_bind(h.reason.clone())
                    .push_bind(h.created_at);
            });
            qb.build()
                .execute(&mut *self.tx)
                .await
                .map_err(internal)?;
        }
        Ok(())
    }

    async fn list_history(
        &mut self,
        tenant_id: Uuid,
        member_id: Uuid,
    ) -> Result<Vec<StageHistory>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            r#"
            SELECT {HISTORY_COLUMNS}
            FROM stage_history
            WHERE tenant_id = $1 AND member_id = $2
            ORDER BY created_at
            "#
        ))
        .bind(tenant_id)
        .bind(member_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(internal)?;
        Ok(rows.into_iter().map(StageHistory::from).collect())
    }

    async fn insert_notes(&mut self, notes: &[Note]) -> Result<()> {
        for chunk in notes.chunks(BULK_CHUNK) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO notes ({NOTE_COLUMNS}) "));
            qb.push_values(chunk, |mut b, n| {
                b.push_bind(n.id)
                    .push_bind(n.tenant_id)
                    .push_bind(n.member_id)
                    .push_bind(n.content.clone())
                    .push_bind(n.is_system)
                    .push_bind(n.author_id)
                    .push_bind(n.created_at);
            });
            qb.build()
                .execute(&mut *self.tx)
                .await
                .map_err(internal)?;
        }
        Ok(())
    }

    async fn list_notes(&mut self, tenant_id: Uuid, member_id: Uuid) -> Result<Vec<Note>> {
        let rows = sqlx::query_as::<_, NoteRow>(&format!(
            r#"
            SELECT {NOTE_COLUMNS}
            FROM notes
            WHERE tenant_id = $1 AND member_id = $2
            ORDER BY created_at
            "#
        ))
        .bind(tenant_id)
        .bind(member_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(internal)?;
        Ok(rows.into_iter().map(Note::from).collect())
    }

    // ── Tasks ──────────────────────────────────────────────────

    async fn get_task(&mut self, tenant_id: Uuid, task_id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND tenant_id = $2 FOR UPDATE"
        ))
        .bind(task_id)
        .bind(tenant_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(internal)?;
        row.map(decode).transpose()
    }

    async fn list_tasks(&mut self, tenant_id: Uuid, filter: &TaskFilter) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR member_id = $2)
              AND ($3::bool IS NULL OR completed = $3)
            ORDER BY due_date ASC NULLS LAST, created_at
            "#
        ))
        .bind(tenant_id)
        .bind(filter.member_id)
        .bind(filter.completed)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(internal)?;
        rows.into_iter().map(decode).collect()
    }

    async fn insert_tasks(&mut self, tasks: &[Task]) -> Result<()> {
        for chunk in tasks.chunks(BULK_CHUNK) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO tasks ({TASK_COLUMNS}) "));
            qb.push_values(chunk, |mut b, t| {
                b.push_bind(t.id)
                    .push_bind(t.tenant_id)
                    .push_bind(t.member_id)
                    .push_bind(t.description.clone())
                    .push_bind(t.due_date)
                    .push_bind(t.priority.to_string())
                    .push_bind(t.assigned_to_id)
                    .push_bind(t.completed)
                    .push_bind(t.completed_at)
                    .push_bind(t.created_by_rule)
                    .push_bind(t.rule_id)
                    .push_bind(t.created_by)
                    .push_bind(t.created_at);
            });
            qb.build()
                .execute(&mut *self.tx)
                .await
                .map_err(internal)?;
        }
        Ok(())
    }

    async fn update_task(&mut self, task: &Task) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET description = $3, due_date = $4, priority = $5, assigned_to_id = $6,
                completed = $7, completed_at = $8
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(task.id)
        .bind(task.tenant_id)
        .bind(&task.description)
        .bind(task.due_date)
        .bind(task.priority.as_ref())
        .bind(task.assigned_to_id)
        .bind(task.completed)
        .bind(task.completed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(internal)?;
        if result.rows_affected() == 0 {
            return Err(ShepherdError::TaskNotFound(task.id));
        }
        Ok(())
    }

    // ── Lifecycle ──────────────────────────────────────────────

    async fn extend_timeout(&mut self, timeout: Duration) -> Result<()> {
        // SET does not accept bind parameters.
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            timeout.as_millis()
        ))
        .execute(&mut *self.tx)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(internal)
    }
}
