//! Bounded repair policy for authentication failures.
//!
//! This module provides the per-call [`RepairBudget`] and the status
//! classification the executor uses to decide what a response means.
//!
//! # Overview
//!
//! A response is a success when its status is in `[200, 400)`. Failures are
//! classified into a [`FailureType`]:
//! - [`FailureType::NeedsAuth`] - 401, handed to the credential for repair
//! - [`FailureType::Permanent`] - every other failing status, surfaced as-is
//!
//! For auth failures the credential proposes repair candidates in order of
//! preference; [`RepairBudget::decide`] picks the first one whose bound is not
//! yet exhausted. Bounds are per logical call:
//!
//! | Repair | Bound |
//! |--------|-------|
//! | ticket reissue | [`MAX_REISSUES`] |
//! | clock correction | [`MAX_CLOCK_CORRECTIONS`] |
//! | token refresh | [`MAX_REFRESHES`] |
//! | anonymous retry | [`MAX_ANONYMOUS_RETRIES`] |
//!
//! # Example
//!
//! ```
//! use zetkin_client::credential::RepairAction;
//! use zetkin_client::executor::{RepairBudget, RepairDecision};
//!
//! let mut budget = RepairBudget::default();
//! let candidates = [RepairAction::Refresh, RepairAction::DropAuthorization];
//!
//! match budget.decide(&candidates) {
//!     RepairDecision::Repair { action, attempt } => {
//!         budget.record(&action);
//!         println!("repairing with {action:?} (attempt {attempt})");
//!     }
//!     RepairDecision::DoNotRepair { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::fmt;

use tracing::{debug, instrument};

use crate::credential::RepairAction;

/// Maximum ticket reissues per call.
pub const MAX_REISSUES: u32 = 1;

/// Maximum clock corrections per call.
pub const MAX_CLOCK_CORRECTIONS: u32 = 3;

/// Maximum token refreshes per call.
pub const MAX_REFRESHES: u32 = 1;

/// Maximum retries without authorization per call.
pub const MAX_ANONYMOUS_RETRIES: u32 = 1;

/// Classification of a failing response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// 401 Unauthorized. May be repaired by the credential.
    NeedsAuth,
    /// Any other failing status. Never retried.
    Permanent,
}

/// Category a repair is counted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairKind {
    Reissue,
    ClockCorrection,
    Refresh,
    Anonymous,
}

impl RepairKind {
    /// The per-call bound for this category.
    #[must_use]
    pub fn max_attempts(self) -> u32 {
        match self {
            Self::Reissue => MAX_REISSUES,
            Self::ClockCorrection => MAX_CLOCK_CORRECTIONS,
            Self::Refresh => MAX_REFRESHES,
            Self::Anonymous => MAX_ANONYMOUS_RETRIES,
        }
    }
}

impl From<&RepairAction> for RepairKind {
    fn from(action: &RepairAction) -> Self {
        match action {
            RepairAction::Reissue => Self::Reissue,
            RepairAction::CorrectClock { .. } => Self::ClockCorrection,
            RepairAction::Refresh => Self::Refresh,
            RepairAction::DropAuthorization => Self::Anonymous,
        }
    }
}

impl fmt::Display for RepairKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reissue => "reissue",
            Self::ClockCorrection => "clock correction",
            Self::Refresh => "refresh",
            Self::Anonymous => "anonymous retry",
        };
        f.write_str(name)
    }
}

/// Decision on whether to repair a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairDecision {
    /// Perform `action` and resend.
    Repair {
        action: RepairAction,
        /// Which attempt of this repair category this will be (1-indexed).
        attempt: u32,
    },

    /// Surface the failure.
    DoNotRepair {
        /// Human-readable reason why no repair is attempted.
        reason: String,
    },
}

/// Repairs already performed during one logical call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairBudget {
    reissues: u32,
    clock_corrections: u32,
    refreshes: u32,
    anonymous_retries: u32,
}

impl RepairBudget {
    /// Number of repairs of `kind` performed so far.
    #[must_use]
    pub fn used(&self, kind: RepairKind) -> u32 {
        match kind {
            RepairKind::Reissue => self.reissues,
            RepairKind::ClockCorrection => self.clock_corrections,
            RepairKind::Refresh => self.refreshes,
            RepairKind::Anonymous => self.anonymous_retries,
        }
    }

    #[must_use]
    pub fn allows(&self, kind: RepairKind) -> bool {
        self.used(kind) < kind.max_attempts()
    }

    /// Counts one repair of the action's category.
    pub fn record(&mut self, action: &RepairAction) {
        let counter = match RepairKind::from(action) {
            RepairKind::Reissue => &mut self.reissues,
            RepairKind::ClockCorrection => &mut self.clock_corrections,
            RepairKind::Refresh => &mut self.refreshes,
            RepairKind::Anonymous => &mut self.anonymous_retries,
        };
        *counter = counter.saturating_add(1);
    }

    /// Picks the first candidate whose category still has budget.
    #[instrument(skip(self))]
    pub fn decide(&self, candidates: &[RepairAction]) -> RepairDecision {
        if candidates.is_empty() {
            return RepairDecision::DoNotRepair {
                reason: "failure is not repairable with the current credential".to_string(),
            };
        }

        if let Some(action) = candidates
            .iter()
            .find(|action| self.allows(RepairKind::from(*action)))
        {
            let kind = RepairKind::from(action);
            let attempt = self.used(kind) + 1;
            debug!(%kind, attempt, max = kind.max_attempts(), "will repair");
            return RepairDecision::Repair {
                action: action.clone(),
                attempt,
            };
        }

        let exhausted: Vec<String> = candidates
            .iter()
            .map(|action| {
                let kind = RepairKind::from(action);
                format!("{kind} ({})", kind.max_attempts())
            })
            .collect();
        debug!(exhausted = %exhausted.join(", "), "repair budget exhausted");
        RepairDecision::DoNotRepair {
            reason: format!("max attempts exhausted: {}", exhausted.join(", ")),
        }
    }
}

/// Returns true for statuses in `[200, 400)`.
#[must_use]
pub fn is_success(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Classifies a failing status.
#[must_use]
pub fn classify_status(status: u16) -> FailureType {
    if status == 401 {
        FailureType::NeedsAuth
    } else {
        FailureType::Permanent
    }
}
