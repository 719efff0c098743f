use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::types::Pathway;

/// Every failure the core can report. The machine `code()` is the durable
/// contract with callers; the HTTP status is secondary.
#[derive(Debug, Error)]
pub enum ShepherdError {
    #[error("stage not found: {0}")]
    StageNotFound(Uuid),

    #[error("member not found: {0}")]
    MemberNotFound(Uuid),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("automation rule not found: {0}")]
    RuleNotFound(Uuid),

    #[error("tenant not found: {0}")]
    TenantNotFound(Uuid),

    #[error("a stage named '{name}' already exists in the {pathway} pathway")]
    DuplicateName { pathway: Pathway, name: String },

    #[error("a member with email '{0}' already exists")]
    DuplicateEmail(String),

    #[error("stage {stage_id} still has {member_count} member(s) assigned")]
    StageHasMembers { stage_id: Uuid, member_count: i64 },

    #[error("no stages configured for the {0} pathway")]
    NoStagesConfigured(Pathway),

    #[error("task {0} is already completed")]
    TaskAlreadyCompleted(Uuid),

    #[error("invalid reorder: {0}")]
    InvalidReorder(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ShepherdError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::StageNotFound(_) => "STAGE_NOT_FOUND",
            Self::MemberNotFound(_) => "MEMBER_NOT_FOUND",
            Self::TaskNotFound(_) => "TASK_NOT_FOUND",
            Self::RuleNotFound(_) => "RULE_NOT_FOUND",
            Self::TenantNotFound(_) => "TENANT_NOT_FOUND",
            Self::DuplicateName { .. } => "DUPLICATE_NAME",
            Self::DuplicateEmail(_) => "DUPLICATE_EMAIL",
            Self::StageHasMembers { .. } => "STAGE_HAS_MEMBERS",
            Self::NoStagesConfigured(_) => "NO_STAGES_CONFIGURED",
            Self::TaskAlreadyCompleted(_) => "TASK_ALREADY_COMPLETED",
            Self::InvalidReorder(_) => "INVALID_REORDER",
            Self::Conflict(_) => "CONFLICT",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::StageNotFound(_)
            | Self::MemberNotFound(_)
            | Self::TaskNotFound(_)
            | Self::RuleNotFound(_)
            | Self::TenantNotFound(_) => 404,
            Self::DuplicateName { .. } | Self::DuplicateEmail(_) | Self::Conflict(_) => 409,
            Self::StageHasMembers { .. }
            | Self::NoStagesConfigured(_)
            | Self::TaskAlreadyCompleted(_)
            | Self::InvalidReorder(_)
            | Self::InvalidInput(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::Internal(_) => 500,
        }
    }

    /// Structured context for the error envelope, where there is any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::StageNotFound(id) => Some(json!({ "stageId": id })),
            Self::MemberNotFound(id) => Some(json!({ "memberId": id })),
            Self::TaskNotFound(id) | Self::TaskAlreadyCompleted(id) => {
                Some(json!({ "taskId": id }))
            }
            Self::RuleNotFound(id) => Some(json!({ "ruleId": id })),
            Self::DuplicateName { pathway, name } => {
                Some(json!({ "pathway": pathway, "name": name }))
            }
            Self::StageHasMembers {
                stage_id,
                member_count,
            } => Some(json!({ "stageId": stage_id, "memberCount": member_count })),
            Self::NoStagesConfigured(pathway) => Some(json!({ "pathway": pathway })),
            _ => None,
        }
    }

    /// True for failures that are the caller's fault rather than ours.
    pub fn is_client_error(&self) -> bool {
        self.http_status() < 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_family_maps_to_404() {
        let id = Uuid::new_v4();
        assert_eq!(ShepherdError::StageNotFound(id).http_status(), 404);
        assert_eq!(ShepherdError::MemberNotFound(id).http_status(), 404);
        assert_eq!(ShepherdError::TaskNotFound(id).http_status(), 404);
    }

    #[test]
    fn codes_are_stable() {
        let id = Uuid::new_v4();
        assert_eq!(ShepherdError::StageNotFound(id).code(), "STAGE_NOT_FOUND");
        assert_eq!(
            ShepherdError::TaskAlreadyCompleted(id).code(),
            "TASK_ALREADY_COMPLETED"
        );
        assert_eq!(
            ShepherdError::NoStagesConfigured(Pathway::Newcomer).code(),
            "NO_STAGES_CONFIGURED"
        );
        assert_eq!(ShepherdError::Conflict("v".into()).code(), "CONFLICT");
    }

    #[test]
    fn invariant_violations_are_client_errors() {
        let err = ShepherdError::StageHasMembers {
            stage_id: Uuid::new_v4(),
            member_count: 3,
        };
        assert_eq!(err.http_status(), 400);
        assert!(err.is_client_error());
        assert_eq!(err.details().unwrap()["memberCount"], 3);

        let dup = ShepherdError::DuplicateName {
            pathway: Pathway::Newcomer,
            name: "Follow-up".into(),
        };
        assert_eq!(dup.http_status(), 409);
        assert_eq!(dup.details().unwrap()["pathway"], "NEWCOMER");
    }

    #[test]
    fn internal_is_500_and_has_no_details() {
        let err = ShepherdError::Internal(anyhow::anyhow!("pool closed"));
        assert_eq!(err.http_status(), 500);
        assert!(!err.is_client_error());
        assert!(err.details().is_none());
        assert_eq!(err.to_string(), "internal: pool closed");
    }
}
