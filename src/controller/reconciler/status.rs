//! # Status
//!
//! Computes the `Synced` condition for a pass. A new status is only returned
//! when something a reader would notice changed, so repeated identical
//! failures do not produce a status write per retry.

use crate::constants::SYNCED_CONDITION_TYPE;
use crate::controller::error::BundleError;
use crate::controller::reconciler::reconcile::SyncOutcome;
use crate::controller::reconciler::target::TargetAction;
use crate::crd::{BundleStatus, Condition};
use chrono::{DateTime, SecondsFormat, Utc};

/// Reason on the `Synced` condition after a successful pass
pub const SYNCED_REASON: &str = "Synced";

/// Build the `Synced` condition for a pass result
#[must_use]
pub fn synced_condition(
    generation: Option<i64>,
    result: &Result<SyncOutcome, BundleError>,
) -> Condition {
    let (status, reason, message) = match result {
        Ok(outcome) => ("True", SYNCED_REASON, success_message(outcome)),
        Err(e) => ("False", e.reason(), e.to_string()),
    };
    Condition {
        r#type: SYNCED_CONDITION_TYPE.to_string(),
        status: status.to_string(),
        last_transition_time: None,
        reason: Some(reason.to_string()),
        message: Some(message),
        observed_generation: generation,
    }
}

fn success_message(outcome: &SyncOutcome) -> String {
    let report = &outcome.report;
    let synced = report
        .outcomes
        .iter()
        .filter(|o| !matches!(o.action, TargetAction::Deleted | TargetAction::NotOwned))
        .count();
    let mut message = format!(
        "Successfully synced {} certificate(s) to {synced} target(s)",
        outcome.resolved.certificate_count
    );
    let not_owned = report.count(TargetAction::NotOwned);
    if not_owned > 0 {
        message.push_str(&format!(
            "; skipped {not_owned} target(s) not owned by this Bundle"
        ));
    }
    message
}

/// Status to write after a pass, or `None` when the current one still holds
///
/// `lastTransitionTime` only moves when the condition's status flips. On
/// failure the previously recorded default package version is kept.
#[must_use]
pub fn next_status(
    current: Option<&BundleStatus>,
    generation: Option<i64>,
    result: &Result<SyncOutcome, BundleError>,
    now: DateTime<Utc>,
) -> Option<BundleStatus> {
    let mut condition = synced_condition(generation, result);
    let previous = current.and_then(|s| s.condition(SYNCED_CONDITION_TYPE));

    let default_ca_package_version = match result {
        Ok(outcome) => outcome.resolved.default_package.clone(),
        Err(_) => current.and_then(|s| s.default_ca_package_version.clone()),
    };

    let unchanged = previous.is_some_and(|p| {
        p.status == condition.status
            && p.reason == condition.reason
            && p.message == condition.message
            && p.observed_generation == condition.observed_generation
    }) && current.and_then(|s| s.default_ca_package_version.as_ref())
        == default_ca_package_version.as_ref();
    if unchanged {
        return None;
    }

    condition.last_transition_time = match previous {
        Some(p) if p.status == condition.status && p.last_transition_time.is_some() => {
            p.last_transition_time.clone()
        }
        _ => Some(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
    };

    let mut conditions: Vec<Condition> = current
        .map(|s| {
            s.conditions
                .iter()
                .filter(|c| c.r#type != SYNCED_CONDITION_TYPE)
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    conditions.push(condition);

    Some(BundleStatus {
        conditions,
        default_ca_package_version,
    })
}
