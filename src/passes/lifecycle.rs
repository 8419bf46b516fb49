//! Pass lifecycle state machine.
//!
//! ```text
//!   pending ──approve──▶ created ──check-in──▶ checked-in ◀──▶ checked-out
//!      │
//!      └──decline──▶ declined
//! ```
//!
//! Every transition is a pure function of the current pass and `now`. It
//! either yields the `PassPatch` to apply or a `BlockReason`; nothing is
//! mutated when a transition is blocked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{Pass, PassPatch, PassStatus, Visit};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BlockReason {
    Pending,
    Declined,
    Expired,
    LimitOrSingleUse,
    /// Approve/decline on a pass that has already left `pending`.
    AlreadyDecided,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::Pending => "pending",
            BlockReason::Declined => "declined",
            BlockReason::Expired => "expired",
            BlockReason::LimitOrSingleUse => "limit-or-single-use",
            BlockReason::AlreadyDecided => "already-decided",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            BlockReason::Pending => "Pass is awaiting reception approval",
            BlockReason::Declined => "Pass was declined",
            BlockReason::Expired => "Pass has expired",
            BlockReason::LimitOrSingleUse => "Entry limit reached or single-use pass already used",
            BlockReason::AlreadyDecided => "Pass has already been approved or declined",
        }
    }
}

pub type Transition = Result<PassPatch, BlockReason>;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Outcome {
    Applied { pass: Pass },
    Blocked { reason: BlockReason, pass: Pass },
}

impl Outcome {
    pub fn from_transition(pass: &Pass, transition: Transition) -> Self {
        match transition {
            Ok(patch) => Outcome::Applied {
                pass: patch.applied(pass),
            },
            Err(reason) => Outcome::Blocked {
                reason,
                pass: pass.clone(),
            },
        }
    }

    pub fn pass(&self) -> &Pass {
        match self {
            Outcome::Applied { pass } | Outcome::Blocked { pass, .. } => pass,
        }
    }

    pub fn into_pass(self) -> Pass {
        match self {
            Outcome::Applied { pass } | Outcome::Blocked { pass, .. } => pass,
        }
    }

    pub fn blocked_reason(&self) -> Option<BlockReason> {
        match self {
            Outcome::Applied { .. } => None,
            Outcome::Blocked { reason, .. } => Some(*reason),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked_reason().is_some()
    }
}

/// Policy chosen by reception when approving a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovePolicy {
    pub allow_reentry: bool,
    pub max_entries: u32,
    pub valid_until: Option<DateTime<Utc>>,
}

impl Default for ApprovePolicy {
    fn default() -> Self {
        Self {
            allow_reentry: false,
            max_entries: 1,
            valid_until: None,
        }
    }
}

pub fn approve(
    pass: &Pass,
    policy: &ApprovePolicy,
    approver: Option<&str>,
    now: DateTime<Utc>,
) -> Transition {
    if pass.status != PassStatus::Pending {
        return Err(BlockReason::AlreadyDecided);
    }

    Ok(PassPatch {
        status: Some(PassStatus::Created),
        allow_reentry: Some(policy.allow_reentry),
        max_entries: Some(policy.max_entries.max(1)),
        valid_until: Some(policy.valid_until),
        approved_at: Some(Some(now)),
        approved_by: Some(approver.map(str::to_string)),
        ..PassPatch::default()
    })
}

pub fn decline(
    pass: &Pass,
    reason: Option<&str>,
    decliner: Option<&str>,
    now: DateTime<Utc>,
) -> Transition {
    if pass.status != PassStatus::Pending {
        return Err(BlockReason::AlreadyDecided);
    }

    Ok(PassPatch {
        status: Some(PassStatus::Declined),
        declined_at: Some(Some(now)),
        declined_by: Some(decliner.map(str::to_string)),
        decline_reason: Some(
            reason
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
        ),
        ..PassPatch::default()
    })
}

/// Whether a pass that is currently outside may start a new visit.
pub fn can_check_in(pass: &Pass, now: DateTime<Utc>) -> bool {
    match pass.status {
        PassStatus::Pending | PassStatus::Declined => false,
        _ if !pass.allow_reentry => pass.status == PassStatus::Created,
        _ => !pass.is_expired(now) && pass.completed_visits() < pass.max_entries as usize,
    }
}

/// Check in when outside, check out when inside.
pub fn toggle_check(pass: &Pass, now: DateTime<Utc>) -> Transition {
    match pass.status {
        PassStatus::Pending => return Err(BlockReason::Pending),
        PassStatus::Declined => return Err(BlockReason::Declined),
        _ => {}
    }

    if pass.is_inside() {
        return Ok(check_out(pass, now));
    }

    if !can_check_in(pass, now) {
        return Err(if pass.is_expired(now) {
            BlockReason::Expired
        } else {
            BlockReason::LimitOrSingleUse
        });
    }

    let mut visits = pass.visits.clone();
    visits.push(Visit::open(now));
    Ok(PassPatch {
        status: Some(PassStatus::CheckedIn),
        visits: Some(visits),
        check_in_at: Some(Some(now)),
        check_out_at: Some(None),
        ..PassPatch::default()
    })
}

fn check_out(pass: &Pass, now: DateTime<Utc>) -> PassPatch {
    let mut visits = pass.visits.clone();
    if let Some(open) = visits.last_mut().filter(|v| v.is_open()) {
        open.checked_out = Some(now);
    }
    PassPatch {
        status: Some(PassStatus::CheckedOut),
        visits: Some(visits),
        check_out_at: Some(Some(now)),
        ..PassPatch::default()
    }
}
