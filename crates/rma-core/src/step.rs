//! Workflow steps
//!
//! A case moves through four fixed milestones. Everything that depends on
//! their order lives in [`STEP_TABLE`]:
//! - Identifier and display name
//! - Prerequisite step
//! - SLA threshold for the step to be reached
//!
//! The transition engine and the breach detector both read this table, so
//! they cannot disagree about ordering or thresholds.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One workflow milestone
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    /// Product arrived at the repair centre
    Received,
    /// Fault diagnosis started
    Investigating,
    /// Repair under way (parts ordered)
    InProgress,
    /// Product shipped back to the customer
    Dispatched,
}

/// Static description of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSpec {
    /// The step itself
    pub step: Step,
    /// Wire identifier
    pub id: &'static str,
    /// Older long-form identifier, still accepted on input
    pub alias: &'static str,
    /// Human-readable name used in messages and reports
    pub display_name: &'static str,
    /// Step that must be complete first
    pub prerequisite: Option<Step>,
    /// Days allowed between the baseline and this step
    pub sla_days: u32,
    /// Short description of the SLA window for reports
    pub sla_window: &'static str,
}

/// Ordered step table, indexed by [`Step::index`]
pub const STEP_TABLE: [StepSpec; 4] = [
    StepSpec {
        step: Step::Received,
        id: "received",
        alias: "productReceived",
        display_name: "Product Received",
        prerequisite: None,
        sla_days: 2,
        sla_window: "RMA Created → Product Received",
    },
    StepSpec {
        step: Step::Investigating,
        id: "investigating",
        alias: "investigationUnderway",
        display_name: "Investigation Underway",
        prerequisite: Some(Step::Received),
        sla_days: 4,
        sla_window: "Product Received → Investigation",
    },
    StepSpec {
        step: Step::InProgress,
        id: "inProgress",
        alias: "inProgress",
        display_name: "In Progress",
        prerequisite: Some(Step::Investigating),
        sla_days: 5,
        sla_window: "Investigation → In Progress",
    },
    StepSpec {
        step: Step::Dispatched,
        id: "dispatched",
        alias: "dispatched",
        display_name: "Dispatched",
        prerequisite: Some(Step::InProgress),
        sla_days: 6,
        sla_window: "In Progress → Dispatched",
    },
];

impl Step {
    /// All steps in workflow order
    pub const ALL: [Step; 4] = [
        Step::Received,
        Step::Investigating,
        Step::InProgress,
        Step::Dispatched,
    ];

    /// Position in the workflow (0-based)
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Step::Received => 0,
            Step::Investigating => 1,
            Step::InProgress => 2,
            Step::Dispatched => 3,
        }
    }

    /// Table entry for this step
    #[inline]
    #[must_use]
    pub fn spec(self) -> &'static StepSpec {
        &STEP_TABLE[self.index()]
    }

    /// Wire identifier
    #[inline]
    #[must_use]
    pub fn id(self) -> &'static str {
        self.spec().id
    }

    /// Human-readable name
    #[inline]
    #[must_use]
    pub fn display_name(self) -> &'static str {
        self.spec().display_name
    }

    /// Step that must be complete before this one
    #[inline]
    #[must_use]
    pub fn prerequisite(self) -> Option<Step> {
        self.spec().prerequisite
    }

    /// SLA threshold in days
    #[inline]
    #[must_use]
    pub fn sla_days(self) -> u32 {
        self.spec().sla_days
    }

    /// Whether this is the final step
    #[inline]
    #[must_use]
    pub fn is_last(self) -> bool {
        matches!(self, Step::Dispatched)
    }

    /// Look up a step by display name (case-insensitive)
    #[must_use]
    pub fn from_display_name(name: &str) -> Option<Step> {
        let name = name.trim();
        STEP_TABLE
            .iter()
            .find(|spec| spec.display_name.eq_ignore_ascii_case(name))
            .map(|spec| spec.step)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Step {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STEP_TABLE
            .iter()
            .find(|spec| spec.id == s || spec.alias == s)
            .map(|spec| spec.step)
            .ok_or_else(|| ValidationError::UnknownStep(s.to_string()))
    }
}
