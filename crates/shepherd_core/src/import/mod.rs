//! Bulk Import Pipeline
//!
//! Validates and dedups a batch of prospective members, then inserts the
//! valid subset in one unit of work. Row-level problems are reported, never
//! raised; only structural problems (bad target stage, empty or oversized
//! batch) fail the call.

pub mod parse;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::ShepherdError;
use crate::ports::{Result, Store};
use crate::principal::{Permission, Principal};
use crate::stages::resolve_target_stage;
use crate::types::{Gender, MaritalStatus, Member, MemberStatus, Note, Pathway, StageHistory};

use parse::{is_valid_email, parse_date, parse_gender, parse_marital_status};

pub const BULK_IMPORT_REASON: &str = "Bulk import";

/// One raw row as uploaded. Every field is free text.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportRow {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub marital_status: Option<String>,
    pub date_of_birth: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub pathway: Pathway,
    #[serde(rename = "currentStageId", alias = "stageId", default)]
    pub stage_id: Option<Uuid>,
    #[serde(rename = "members")]
    pub rows: Vec<ImportRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    /// 1-based position in the uploaded batch.
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRow {
    pub row: usize,
    pub email: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub created: usize,
    pub skipped: usize,
    pub errors: Vec<RowError>,
    pub skipped_rows: Vec<SkippedRow>,
}

/// A row that passed validation, with its fields normalised.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRow {
    pub row: usize,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<Gender>,
    pub marital_status: Option<MaritalStatus>,
    pub date_of_birth: Option<NaiveDate>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default)]
pub struct Validated {
    pub valid: Vec<ValidRow>,
    pub skipped: Vec<SkippedRow>,
    pub errors: Vec<RowError>,
}

fn text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn row_error(row: usize, field: &str, message: &str) -> RowError {
    RowError {
        row,
        field: Some(field.to_string()),
        message: message.to_string(),
    }
}

/// Validate every row independently against the tenant's existing emails
/// (lowercased) and against earlier rows of the same batch.
pub fn validate_rows(rows: &[ImportRow], existing: &HashSet<String>) -> Validated {
    let mut out = Validated::default();
    let mut seen: HashSet<String> = HashSet::new();

    for (index, raw) in rows.iter().enumerate() {
        let row = index + 1;
        let Some(first_name) = text(&raw.first_name) else {
            out.errors.push(row_error(row, "firstName", "First name is required"));
            continue;
        };
        let Some(last_name) = text(&raw.last_name) else {
            out.errors.push(row_error(row, "lastName", "Last name is required"));
            continue;
        };
        let email = text(&raw.email).map(|e| e.to_lowercase());
        if let Some(email) = email.as_deref() {
            if !is_valid_email(email) {
                out.errors.push(row_error(row, "email", "Invalid email format"));
                continue;
            }
            if existing.contains(email) {
                out.skipped.push(SkippedRow {
                    row,
                    email: email.to_string(),
                    reason: "Email already exists".into(),
                });
                continue;
            }
            if !seen.insert(email.to_string()) {
                out.skipped.push(SkippedRow {
                    row,
                    email: email.to_string(),
                    reason: "Duplicate email in batch".into(),
                });
                continue;
            }
        }

        out.valid.push(ValidRow {
            row,
            first_name,
            last_name,
            email,
            phone: text(&raw.phone),
            gender: raw.gender.as_deref().and_then(parse_gender),
            marital_status: raw.marital_status.as_deref().and_then(parse_marital_status),
            date_of_birth: raw.date_of_birth.as_deref().and_then(parse_date),
            address: text(&raw.address),
            notes: text(&raw.notes),
        });
    }
    out
}

pub struct BulkImport {
    store: Arc<dyn Store>,
    max_rows: usize,
    timeout: Duration,
}

impl BulkImport {
    pub fn new(store: Arc<dyn Store>, config: &EngineConfig) -> Self {
        Self {
            store,
            max_rows: config.import_max_rows,
            timeout: config.import_timeout,
        }
    }

    pub async fn import_members(
        &self,
        principal: &Principal,
        request: ImportRequest,
    ) -> Result<ImportReport> {
        principal.require(Permission::MemberCreate)?;
        let tenant_id = principal.tenant_id;
        if request.rows.is_empty() {
            return Err(ShepherdError::InvalidInput("no members supplied".into()));
        }
        if request.rows.len() > self.max_rows {
            return Err(ShepherdError::InvalidInput(format!(
                "{} rows exceeds the limit of {}",
                request.rows.len(),
                self.max_rows
            )));
        }

        let mut uow = self.store.begin().await?;
        uow.extend_timeout(self.timeout).await?;
        let stage =
            resolve_target_stage(uow.as_mut(), tenant_id, request.pathway, request.stage_id)
                .await?;
        let existing = uow.list_member_emails(tenant_id).await?;
        let validated = validate_rows(&request.rows, &existing);

        let now = Utc::now();
        let mut members = Vec::with_capacity(validated.valid.len());
        let mut history = Vec::with_capacity(validated.valid.len());
        let mut notes = Vec::with_capacity(validated.valid.len());
        for row in validated.valid {
            let member = Member {
                id: Uuid::new_v4(),
                tenant_id,
                first_name: row.first_name,
                last_name: row.last_name,
                email: row.email,
                phone: row.phone,
                gender: row.gender,
                marital_status: row.marital_status,
                date_of_birth: row.date_of_birth,
                address: row.address,
                pathway: request.pathway,
                current_stage_id: stage.id,
                status: MemberStatus::Active,
                assigned_to_id: Some(principal.user_id),
                last_stage_change_date: now,
                version: 0,
                created_at: now,
                updated_at: now,
            };
            history.push(StageHistory {
                id: Uuid::new_v4(),
                tenant_id,
                member_id: member.id,
                from_stage_id: None,
                to_stage_id: stage.id,
                changed_by: principal.user_id,
                reason: BULK_IMPORT_REASON.to_string(),
                created_at: now,
            });
            notes.push(Note::system(
                &member,
                format!("Imported into \"{}\" by bulk import", stage.name),
                now,
            ));
            if let Some(content) = row.notes {
                notes.push(Note {
                    id: Uuid::new_v4(),
                    tenant_id,
                    member_id: member.id,
                    content,
                    is_system: false,
                    author_id: Some(principal.user_id),
                    created_at: now,
                });
            }
            members.push(member);
        }

        let created = members.len();
        if created > 0 {
            uow.insert_members(&members).await?;
            uow.insert_history(&history).await?;
            uow.insert_notes(&notes).await?;
            uow.adjust_member_count(tenant_id, created as i64).await?;
        }
        uow.commit().await?;

        info!(
            tenant_id = %tenant_id,
            stage = %stage.name,
            created,
            skipped = validated.skipped.len(),
            errors = validated.errors.len(),
            "bulk import finished"
        );
        Ok(ImportReport {
            created,
            skipped: validated.skipped.len(),
            errors: validated.errors,
            skipped_rows: validated.skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::ports::MemberFilter;
    use crate::principal::Role;
    use crate::test_support::{add_rule, admin, seed_pathway};

    fn row(first: &str, last: &str, email: Option<&str>) -> ImportRow {
        ImportRow {
            first_name: Some(first.into()),
            last_name: Some(last.into()),
            email: email.map(String::from),
            ..Default::default()
        }
    }

    fn request(rows: Vec<ImportRow>) -> ImportRequest {
        ImportRequest {
            pathway: Pathway::Newcomer,
            stage_id: None,
            rows,
        }
    }

    #[test]
    fn validation_reports_errors_and_skips() {
        let existing: HashSet<String> = ["taken@example.com".to_string()].into();
        let rows = vec![
            row("Ada", "Lovelace", Some("ada@example.com")),
            row("", "Nobody", None),
            row("Grace", "", None),
            row("Bad", "Email", Some("nope")),
            row("Old", "Friend", Some("TAKEN@example.com")),
            row("Ada", "Again", Some("Ada@Example.com")),
            row("No", "Email", None),
        ];
        let v = validate_rows(&rows, &existing);

        assert_eq!(v.valid.iter().map(|r| r.row).collect::<Vec<_>>(), vec![1, 7]);
        assert_eq!(
            v.errors
                .iter()
                .map(|e| (e.row, e.field.clone().unwrap()))
                .collect::<Vec<_>>(),
            vec![
                (2, "firstName".to_string()),
                (3, "lastName".to_string()),
                (4, "email".to_string())
            ]
        );
        assert_eq!(v.skipped.len(), 2);
        assert_eq!(v.skipped[0].reason, "Email already exists");
        assert_eq!(v.skipped[1].row, 6);
        assert_eq!(v.skipped[1].reason, "Duplicate email in batch");
    }

    #[test]
    fn invalid_rows_do_not_reserve_their_email() {
        let rows = vec![
            row("", "Lovelace", Some("ada@example.com")),
            row("Ada", "Lovelace", Some("ada@example.com")),
        ];
        let v = validate_rows(&rows, &HashSet::new());
        assert_eq!(v.valid.len(), 1);
        assert_eq!(v.valid[0].row, 2);
        assert!(v.skipped.is_empty());
    }

    #[test]
    fn optional_fields_are_normalised() {
        let mut r = row("Ada", "Lovelace", None);
        r.gender = Some("F".into());
        r.marital_status = Some("single".into());
        r.date_of_birth = Some("10/12/1815".into());
        r.phone = Some("   ".into());
        let v = validate_rows(&[r], &HashSet::new());
        let valid = &v.valid[0];
        assert_eq!(valid.gender, Some(Gender::Female));
        assert_eq!(valid.marital_status, Some(MaritalStatus::Single));
        assert_eq!(valid.date_of_birth, NaiveDate::from_ymd_opt(1815, 12, 10));
        assert_eq!(valid.phone, None);
    }

    #[test]
    fn request_accepts_wire_field_names() {
        let stage = Uuid::new_v4();
        let req: ImportRequest = serde_json::from_value(serde_json::json!({
            "pathway": "NEWCOMER",
            "currentStageId": stage,
            "members": [{ "firstName": "Ada", "lastName": "Lovelace" }]
        }))
        .unwrap();
        assert_eq!(req.stage_id, Some(stage));
        assert_eq!(req.rows.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_emails_in_a_batch_create_one_member() {
        let store = Arc::new(InMemoryStore::new());
        let (tenant, stages) = seed_pathway(&store, &["First Visit", "Follow-up"]).await;
        add_rule(&store, &stages[0], "Send welcome email", 1, true).await;
        let import = BulkImport::new(store.clone(), &EngineConfig::default());
        let actor = admin(&tenant);

        let report = import
            .import_members(
                &actor,
                request(vec![
                    row("Ada", "Lovelace", Some("ada@example.com")),
                    row("Ada", "Byron", Some("ADA@example.com")),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.errors.is_empty());
        assert_eq!(store.tenant(tenant.id).await.unwrap().member_count, 1);

        let mut uow = store.begin().await.unwrap();
        let members = uow.list_members(tenant.id, &MemberFilter::default()).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].current_stage_id, stages[0].id);
        assert_eq!(members[0].assigned_to_id, Some(actor.user_id));
        let history = uow.list_history(tenant.id, members[0].id).await.unwrap();
        assert_eq!(history[0].reason, BULK_IMPORT_REASON);
        // Import does not fire rules.
        assert!(uow.list_tasks(tenant.id, &Default::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reimport_skips_existing_members() {
        let store = Arc::new(InMemoryStore::new());
        let (tenant, _) = seed_pathway(&store, &["First Visit"]).await;
        let import = BulkImport::new(store.clone(), &EngineConfig::default());
        let actor = admin(&tenant);
        let batch = || request(vec![row("Ada", "Lovelace", Some("ada@example.com"))]);

        assert_eq!(import.import_members(&actor, batch()).await.unwrap().created, 1);
        let again = import.import_members(&actor, batch()).await.unwrap();
        assert_eq!(again.created, 0);
        assert_eq!(again.skipped, 1);
        assert_eq!(store.tenant(tenant.id).await.unwrap().member_count, 1);
    }

    #[tokio::test]
    async fn structural_problems_fail_the_whole_batch() {
        let store = Arc::new(InMemoryStore::new());
        let (tenant, stages) = seed_pathway(&store, &["First Visit"]).await;
        let config = EngineConfig {
            import_max_rows: 2,
            ..Default::default()
        };
        let import = BulkImport::new(store.clone(), &config);
        let actor = admin(&tenant);

        let err = import.import_members(&actor, request(vec![])).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");

        let rows = vec![row("A", "A", None), row("B", "B", None), row("C", "C", None)];
        let err = import.import_members(&actor, request(rows)).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");

        let mut believer = request(vec![row("A", "A", None)]);
        believer.pathway = Pathway::NewBeliever;
        let err = import.import_members(&actor, believer).await.unwrap_err();
        assert_eq!(err.code(), "NO_STAGES_CONFIGURED");

        let mut wrong = request(vec![row("A", "A", None)]);
        wrong.pathway = Pathway::NewBeliever;
        wrong.stage_id = Some(stages[0].id);
        let err = import.import_members(&actor, wrong).await.unwrap_err();
        assert_eq!(err.code(), "STAGE_NOT_FOUND");
        assert_eq!(store.tenant(tenant.id).await.unwrap().member_count, 0);
    }

    #[tokio::test]
    async fn volunteers_cannot_import() {
        let store = Arc::new(InMemoryStore::new());
        let (tenant, _) = seed_pathway(&store, &["First Visit"]).await;
        let volunteer = Principal::in_process(Uuid::new_v4(), tenant.id, Role::Volunteer);
        let err = BulkImport::new(store, &EngineConfig::default())
            .import_members(&volunteer, request(vec![row("A", "A", None)]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }
}
