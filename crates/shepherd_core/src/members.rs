//! Member lifecycle outside of stage moves: creation with initial placement,
//! lookup, status changes, notes and deletion.
//!
//! `adjust_member_count` is only ever called from here and from the bulk
//! import, always in the same unit of work as the insert or delete it counts.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::ShepherdError;
use crate::import::parse::is_valid_email;
use crate::ports::{MemberFilter, Result, Store};
use crate::principal::{Permission, Principal};
use crate::progression::{check_version, enter_stage, AdvanceOutcome};
use crate::stages::resolve_target_stage;
use crate::types::{
    Gender, MaritalStatus, Member, MemberStatus, Note, Pathway, StageHistory,
};

pub const INITIAL_PLACEMENT_REASON: &str = "Initial placement";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMember {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<Gender>,
    pub marital_status: Option<MaritalStatus>,
    pub date_of_birth: Option<NaiveDate>,
    pub address: Option<String>,
    pub pathway: Pathway,
    #[serde(alias = "stageId")]
    pub current_stage_id: Option<Uuid>,
    pub assigned_to_id: Option<Uuid>,
    /// Free-text note stored alongside the placement note.
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: MemberStatus,
    pub expected_version: Option<i64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub struct MemberService {
    store: Arc<dyn Store>,
}

impl MemberService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a member on its initial stage. The placement goes through the
    /// same stage-entry path as an advance, so the initial stage's rules fire.
    pub async fn create_member(&self, principal: &Principal, new: NewMember) -> Result<AdvanceOutcome> {
        principal.require(Permission::MemberCreate)?;
        let tenant_id = principal.tenant_id;

        let first_name = new.first_name.trim().to_string();
        let last_name = new.last_name.trim().to_string();
        if first_name.is_empty() || last_name.is_empty() {
            return Err(ShepherdError::InvalidInput(
                "firstName and lastName are required".into(),
            ));
        }
        let email = non_blank(new.email).map(|e| e.to_lowercase());
        if let Some(email) = email.as_deref() {
            if !is_valid_email(email) {
                return Err(ShepherdError::InvalidInput(format!("invalid email '{email}'")));
            }
        }

        let mut uow = self.store.begin().await?;
        let stage =
            resolve_target_stage(uow.as_mut(), tenant_id, new.pathway, new.current_stage_id).await?;
        if let Some(email) = email.as_deref() {
            if uow.list_member_emails(tenant_id).await?.contains(email) {
                return Err(ShepherdError::DuplicateEmail(email.to_string()));
            }
        }

        let now = Utc::now();
        let member = Member {
            id: Uuid::new_v4(),
            tenant_id,
            first_name,
            last_name,
            email,
            phone: non_blank(new.phone),
            gender: new.gender,
            marital_status: new.marital_status,
            date_of_birth: new.date_of_birth,
            address: non_blank(new.address),
            pathway: new.pathway,
            current_stage_id: stage.id,
            status: MemberStatus::Active,
            assigned_to_id: new.assigned_to_id,
            last_stage_change_date: now,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        uow.insert_members(std::slice::from_ref(&member)).await?;
        let tasks_created = enter_stage(
            uow.as_mut(),
            &member,
            None,
            &stage,
            principal.user_id,
            INITIAL_PLACEMENT_REASON,
            now,
        )
        .await?;
        if let Some(text) = non_blank(new.notes) {
            let note = Note {
                id: Uuid::new_v4(),
                tenant_id,
                member_id: member.id,
                content: text,
                is_system: false,
                author_id: Some(principal.user_id),
                created_at: now,
            };
            uow.insert_notes(std::slice::from_ref(&note)).await?;
        }
        uow.adjust_member_count(tenant_id, 1).await?;
        uow.commit().await?;

        info!(
            tenant_id = %tenant_id,
            member_id = %member.id,
            stage = %stage.name,
            "member created"
        );
        Ok(AdvanceOutcome {
            member,
            tasks_created,
        })
    }

    pub async fn get_member(&self, principal: &Principal, member_id: Uuid) -> Result<Member> {
        principal.require(Permission::MemberView)?;
        let mut uow = self.store.begin().await?;
        let member = uow
            .get_member(principal.tenant_id, member_id)
            .await?
            .ok_or(ShepherdError::MemberNotFound(member_id))?;
        uow.commit().await?;
        Ok(member)
    }

    pub async fn list_members(&self, principal: &Principal, filter: MemberFilter) -> Result<Vec<Member>> {
        principal.require(Permission::MemberView)?;
        let mut uow = self.store.begin().await?;
        let members = uow.list_members(principal.tenant_id, &filter).await?;
        uow.commit().await?;
        Ok(members)
    }

    /// Delete a member with its history, notes and tasks.
    pub async fn delete_member(&self, principal: &Principal, member_id: Uuid) -> Result<()> {
        principal.require(Permission::MemberDelete)?;
        let tenant_id = principal.tenant_id;
        let mut uow = self.store.begin().await?;
        uow.delete_member(tenant_id, member_id).await?;
        uow.adjust_member_count(tenant_id, -1).await?;
        uow.commit().await?;
        info!(tenant_id = %tenant_id, member_id = %member_id, "member deleted");
        Ok(())
    }

    pub async fn update_status(
        &self,
        principal: &Principal,
        member_id: Uuid,
        change: StatusChange,
    ) -> Result<Member> {
        principal.require(Permission::MemberUpdate)?;
        let mut uow = self.store.begin().await?;
        let mut member = uow
            .get_member(principal.tenant_id, member_id)
            .await?
            .ok_or(ShepherdError::MemberNotFound(member_id))?;
        check_version(&member, change.expected_version)?;
        if member.status == change.status {
            uow.commit().await?;
            return Ok(member);
        }

        let now = Utc::now();
        let note = Note::system(
            &member,
            format!("Status changed from {} to {}", member.status, change.status),
            now,
        );
        member.status = change.status;
        member.version += 1;
        member.updated_at = now;
        uow.update_member(&member).await?;
        uow.insert_notes(std::slice::from_ref(&note)).await?;
        uow.commit().await?;
        Ok(member)
    }

    pub async fn history(&self, principal: &Principal, member_id: Uuid) -> Result<Vec<StageHistory>> {
        principal.require(Permission::MemberView)?;
        let mut uow = self.store.begin().await?;
        uow.get_member(principal.tenant_id, member_id)
            .await?
            .ok_or(ShepherdError::MemberNotFound(member_id))?;
        let history = uow.list_history(principal.tenant_id, member_id).await?;
        uow.commit().await?;
        Ok(history)
    }

    pub async fn notes(&self, principal: &Principal, member_id: Uuid) -> Result<Vec<Note>> {
        principal.require(Permission::MemberView)?;
        let mut uow = self.store.begin().await?;
        uow.get_member(principal.tenant_id, member_id)
            .await?
            .ok_or(ShepherdError::MemberNotFound(member_id))?;
        let notes = uow.list_notes(principal.tenant_id, member_id).await?;
        uow.commit().await?;
        Ok(notes)
    }

    pub async fn add_note(&self, principal: &Principal, member_id: Uuid, content: &str) -> Result<Note> {
        principal.require(Permission::MemberUpdate)?;
        let content = content.trim();
        if content.is_empty() {
            return Err(ShepherdError::InvalidInput("note content must not be empty".into()));
        }
        let mut uow = self.store.begin().await?;
        let member = uow
            .get_member(principal.tenant_id, member_id)
            .await?
            .ok_or(ShepherdError::MemberNotFound(member_id))?;
        let note = Note {
            id: Uuid::new_v4(),
            tenant_id: member.tenant_id,
            member_id: member.id,
            content: content.to_string(),
            is_system: false,
            author_id: Some(principal.user_id),
            created_at: Utc::now(),
        };
        uow.insert_notes(std::slice::from_ref(&note)).await?;
        uow.commit().await?;
        Ok(note)
    }
}
