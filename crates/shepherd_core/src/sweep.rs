//! Time-in-stage auto-advance.
//!
//! There is no background scheduler. An explicit sweep finds ACTIVE members
//! who have sat in a `TIME_IN_STAGE` stage for longer than its duration and
//! moves each one on in its own unit of work, so one failure never rolls
//! back another member's advance.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ShepherdError;
use crate::ports::{MemberFilter, Result, Store};
use crate::principal::{Permission, Principal};
use crate::progression::{apply_transition, integrate_member};
use crate::types::MemberStatus;

pub const TIME_IN_STAGE_REASON: &str = "Auto-advanced: Time in stage";

/// Parse a time-in-stage value: a bare number of days, or a number with a
/// `d`, `w` or `h` suffix (`"14"`, `"14d"`, `"2w"`, `"36h"`).
pub fn parse_stage_duration(raw: &str) -> Result<Duration> {
    let value = raw.trim().to_lowercase();
    let invalid = || {
        ShepherdError::InvalidInput(format!(
            "'{raw}' is not a stage duration (expected e.g. 14, 14d, 2w, 36h)"
        ))
    };

    let (digits, unit) = match value.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&value[..i], &value[i..]),
        _ => (value.as_str(), ""),
    };
    let amount: i64 = digits.trim().parse().map_err(|_| invalid())?;
    if amount <= 0 {
        return Err(invalid());
    }
    let duration = match unit {
        "" | "d" => Duration::try_days(amount),
        "w" => Duration::try_weeks(amount),
        "h" => Duration::try_hours(amount),
        _ => None,
    };
    duration.ok_or_else(invalid)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepError {
    pub member_id: Uuid,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub advanced: usize,
    pub integrated: usize,
    pub errors: Vec<SweepError>,
}

enum Step {
    Advanced,
    Integrated,
    /// No longer eligible once re-read under lock.
    Skipped,
}

pub struct TimeInStageSweep {
    store: Arc<dyn Store>,
}

impl TimeInStageSweep {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn advance_stale_members(&self, principal: &Principal) -> Result<SweepReport> {
        self.advance_stale_members_at(principal, Utc::now()).await
    }

    pub async fn advance_stale_members_at(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<SweepReport> {
        principal.require(Permission::StageUpdate)?;
        let tenant_id = principal.tenant_id;

        let mut uow = self.store.begin().await?;
        let stages = uow.list_stages(tenant_id, None).await?;
        let filter = MemberFilter {
            status: Some(MemberStatus::Active),
            ..Default::default()
        };
        let members = uow.list_members(tenant_id, &filter).await?;
        uow.commit().await?;

        let mut policies: HashMap<Uuid, Duration> = HashMap::new();
        for stage in &stages {
            if let Some(value) = stage.time_in_stage_value() {
                match parse_stage_duration(value) {
                    Ok(d) => {
                        policies.insert(stage.id, d);
                    }
                    Err(e) => warn!(stage_id = %stage.id, error = %e, "ignoring stage policy"),
                }
            }
        }

        let mut report = SweepReport::default();
        if policies.is_empty() {
            return Ok(report);
        }

        for member in members {
            let due = policies
                .get(&member.current_stage_id)
                .is_some_and(|d| now - member.last_stage_change_date >= *d);
            if !due {
                continue;
            }
            match self.advance_one(principal, member.id, &policies, now).await {
                Ok(Step::Advanced) => report.advanced += 1,
                Ok(Step::Integrated) => report.integrated += 1,
                Ok(Step::Skipped) => {}
                Err(e) => {
                    warn!(member_id = %member.id, error = %e, "time-in-stage advance failed");
                    report.errors.push(SweepError {
                        member_id: member.id,
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            tenant_id = %tenant_id,
            advanced = report.advanced,
            integrated = report.integrated,
            errors = report.errors.len(),
            "time-in-stage sweep finished"
        );
        Ok(report)
    }

    async fn advance_one(
        &self,
        principal: &Principal,
        member_id: Uuid,
        policies: &HashMap<Uuid, Duration>,
        now: DateTime<Utc>,
    ) -> Result<Step> {
        let tenant_id = principal.tenant_id;
        let mut uow = self.store.begin().await?;
        let Some(mut member) = uow.get_member(tenant_id, member_id).await? else {
            return Ok(Step::Skipped);
        };
        let still_due = member.status == MemberStatus::Active
            && policies
                .get(&member.current_stage_id)
                .is_some_and(|d| now - member.last_stage_change_date >= *d);
        if !still_due {
            return Ok(Step::Skipped);
        }

        let stage = uow
            .get_stage(tenant_id, member.current_stage_id)
            .await?
            .ok_or(ShepherdError::StageNotFound(member.current_stage_id))?;
        let next = uow
            .find_stage_by_order(tenant_id, stage.pathway, stage.order + 1)
            .await?;

        let step = match next {
            Some(next) => {
                apply_transition(
                    uow.as_mut(),
                    &mut member,
                    &stage,
                    &next,
                    principal.user_id,
                    TIME_IN_STAGE_REASON,
                    now,
                )
                .await?;
                Step::Advanced
            }
            None => {
                integrate_member(uow.as_mut(), &mut member, &stage, now).await?;
                Step::Integrated
            }
        };
        uow.commit().await?;
        Ok(step)
    }
}
