//! Case model
//!
//! Defines the case document and the only way to mutate it:
//! - [`Case`] with its step states, alert history and descriptive fields
//! - [`CasePatch`], a list of typed operations applied by [`Case::apply`]
//!
//! Stores never edit a case directly; they call [`Case::apply`] on a copy
//! and keep the copy only if it succeeds, so the step ordering and
//! set-once rules hold for every backend.

use crate::alert_log::AlertLog;
use crate::error::{InvariantViolation, ValidationError};
use crate::step::Step;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Unique case identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub Ulid);

impl CaseId {
    /// Generate new case ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for CaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CaseId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s.trim())
            .map(Self)
            .map_err(|_| ValidationError::InvalidCaseId(s.to_string()))
    }
}

/// Store revision, bumped on every successful patch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    /// Following revision
    #[inline]
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Editable descriptive fields
///
/// The engine treats their values as opaque text. A handful feed the
/// notification payloads and the breach report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaseField {
    Name,
    CompanyName,
    Email,
    ContactPhone,
    Address,
    Suburb,
    State,
    PostCode,
    ModelName,
    SerialNumber,
    FaultDescription,
    CustomerReference,
    ContentsOfPackage,
    Weight,
    Width,
    Height,
    Length,
    RequireLabel,
    TrackingNumber,
    RepairDescription,
    UpdateOnProduct,
    AssignedTo,
    RepairStatus,
    SparePartsUpdate,
    SparePartOrdered,
    SparePartReceived,
    CompleteDateOfReturn,
    ReceivedDate,
    StartedServiceDate,
}

impl CaseField {
    /// The full allow-list
    pub const ALL: [CaseField; 29] = [
        CaseField::Name,
        CaseField::CompanyName,
        CaseField::Email,
        CaseField::ContactPhone,
        CaseField::Address,
        CaseField::Suburb,
        CaseField::State,
        CaseField::PostCode,
        CaseField::ModelName,
        CaseField::SerialNumber,
        CaseField::FaultDescription,
        CaseField::CustomerReference,
        CaseField::ContentsOfPackage,
        CaseField::Weight,
        CaseField::Width,
        CaseField::Height,
        CaseField::Length,
        CaseField::RequireLabel,
        CaseField::TrackingNumber,
        CaseField::RepairDescription,
        CaseField::UpdateOnProduct,
        CaseField::AssignedTo,
        CaseField::RepairStatus,
        CaseField::SparePartsUpdate,
        CaseField::SparePartOrdered,
        CaseField::SparePartReceived,
        CaseField::CompleteDateOfReturn,
        CaseField::ReceivedDate,
        CaseField::StartedServiceDate,
    ];

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CaseField::Name => "name",
            CaseField::CompanyName => "companyName",
            CaseField::Email => "email",
            CaseField::ContactPhone => "contactPhone",
            CaseField::Address => "address",
            CaseField::Suburb => "suburb",
            CaseField::State => "state",
            CaseField::PostCode => "postCode",
            CaseField::ModelName => "modelName",
            CaseField::SerialNumber => "serialNumber",
            CaseField::FaultDescription => "faultDescription",
            CaseField::CustomerReference => "customerReference",
            CaseField::ContentsOfPackage => "contentsOfPackage",
            CaseField::Weight => "weight",
            CaseField::Width => "width",
            CaseField::Height => "height",
            CaseField::Length => "length",
            CaseField::RequireLabel => "requireLabel",
            CaseField::TrackingNumber => "trackingNumber",
            CaseField::RepairDescription => "repairDescription",
            CaseField::UpdateOnProduct => "updateOnProduct",
            CaseField::AssignedTo => "assignedTo",
            CaseField::RepairStatus => "repairStatus",
            CaseField::SparePartsUpdate => "sparePartsUpdate",
            CaseField::SparePartOrdered => "sparePartOrdered",
            CaseField::SparePartReceived => "sparePartReceived",
            CaseField::CompleteDateOfReturn => "completeDateOfReturn",
            CaseField::ReceivedDate => "receivedDate",
            CaseField::StartedServiceDate => "startedServiceDate",
        }
    }
}

impl fmt::Display for CaseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaseField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CaseField::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownField(s.to_string()))
    }
}

/// Parse `(name, value)` pairs against the allow-list
///
/// Fails on the first unknown name without returning partial results.
pub fn parse_fields<I, K, V>(fields: I) -> Result<Vec<(CaseField, String)>, ValidationError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    fields
        .into_iter()
        .map(|(k, v)| Ok((k.as_ref().parse::<CaseField>()?, v.into())))
        .collect()
}

/// Per-step progress
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    /// Step flag
    pub done: bool,
    /// Set once, after the step notification went out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set while one caller owns sending the step notification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
}

/// One recorded SLA breach alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreachAlert {
    /// Step that was overdue
    pub step: Step,
    /// Day the alert was raised
    pub on: NaiveDate,
}

/// One RMA case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    /// Case identifier
    pub id: CaseId,
    /// Human reference (`RMA-YYYYMMDD-NNNN`)
    pub rma_number: String,
    /// Creation time, never changes
    pub created_at: DateTime<Utc>,
    /// Time of the last mutation
    pub updated_at: DateTime<Utc>,
    /// Step states indexed by [`Step::index`]
    pub steps: [StepState; 4],
    /// Breach alerts, oldest first; persisted as the textual log
    #[serde(rename = "notificationLog", default)]
    pub alerts: AlertLog,
    /// Descriptive fields
    #[serde(default)]
    pub details: BTreeMap<CaseField, String>,
    /// Hidden from active views
    #[serde(default)]
    pub archived: bool,
    /// Store revision
    #[serde(default)]
    pub revision: Revision,
}

impl Case {
    /// Create a case in step-0 state
    #[must_use]
    pub fn new(
        id: CaseId,
        rma_number: impl Into<String>,
        created_at: DateTime<Utc>,
        details: BTreeMap<CaseField, String>,
    ) -> Self {
        Self {
            id,
            rma_number: rma_number.into(),
            created_at,
            updated_at: created_at,
            steps: Default::default(),
            alerts: AlertLog::new(),
            details,
            archived: false,
            revision: Revision::default(),
        }
    }

    /// State of one step
    #[inline]
    #[must_use]
    pub fn step(&self, step: Step) -> &StepState {
        &self.steps[step.index()]
    }

    /// Step flag
    #[inline]
    #[must_use]
    pub fn is_done(&self, step: Step) -> bool {
        self.step(step).done
    }

    /// Step completion timestamp
    #[inline]
    #[must_use]
    pub fn completed_at(&self, step: Step) -> Option<DateTime<Utc>> {
        self.step(step).completed_at
    }

    /// First step whose flag is still false
    ///
    /// `None` once the case is dispatched.
    #[must_use]
    pub fn pending_step(&self) -> Option<Step> {
        if self.is_done(Step::Dispatched) {
            return None;
        }
        Step::ALL.into_iter().find(|s| !self.is_done(*s))
    }

    /// Field value, empty when unset
    #[inline]
    #[must_use]
    pub fn field(&self, field: CaseField) -> &str {
        self.details.get(&field).map_or("", String::as_str)
    }

    /// Most recent alert date for `step`
    #[must_use]
    pub fn last_alert(&self, step: Step) -> Option<NaiveDate> {
        self.alerts.last_alert(step)
    }

    /// Human-readable alert history
    #[must_use]
    pub fn notification_log(&self) -> &str {
        self.alerts.as_text()
    }

    /// Apply a patch in place
    ///
    /// All operations are checked before anything changes; a rejected
    /// patch leaves the case untouched. Every accepted patch refreshes
    /// `updated_at` and bumps the revision.
    ///
    /// # Errors
    /// - `InvariantViolation::OutOfOrder` if a step is marked done before
    ///   its prerequisite
    /// - `InvariantViolation::CompletedNotDone` if a completion is recorded
    ///   for a step that is not done
    pub fn apply(&mut self, patch: &CasePatch) -> Result<(), InvariantViolation> {
        let mut next = self.clone();
        for op in &patch.ops {
            next.apply_op(op)?;
        }
        next.updated_at = patch.at;
        next.revision = self.revision.next();
        *self = next;
        Ok(())
    }

    fn apply_op(&mut self, op: &PatchOp) -> Result<(), InvariantViolation> {
        match *op {
            PatchOp::MarkDone(step) => {
                if let Some(prerequisite) = step.prerequisite() {
                    if !self.is_done(prerequisite) {
                        return Err(InvariantViolation::OutOfOrder { step, prerequisite });
                    }
                }
                self.steps[step.index()].done = true;
            }
            PatchOp::Claim { step, at } => {
                let state = &mut self.steps[step.index()];
                if state.completed_at.is_none() {
                    state.claimed_at = Some(at);
                }
            }
            PatchOp::ReleaseClaim(step) => {
                self.steps[step.index()].claimed_at = None;
            }
            PatchOp::Complete { step, at } => {
                let state = &mut self.steps[step.index()];
                if !state.done {
                    return Err(InvariantViolation::CompletedNotDone(step));
                }
                state.completed_at.get_or_insert(at);
                state.claimed_at = None;
            }
            PatchOp::AppendAlert(alert) => self.alerts.push(alert),
            PatchOp::SetField(field, ref value) => {
                self.details.insert(field, value.clone());
            }
            PatchOp::SetArchived(archived) => self.archived = archived,
        }
        Ok(())
    }
}

/// Single patch operation
///
/// Operations only add state: nothing here clears a flag or removes an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOp {
    /// Set the step flag
    MarkDone(Step),
    /// Take ownership of the step notification
    Claim { step: Step, at: DateTime<Utc> },
    /// Give up ownership of the step notification
    ReleaseClaim(Step),
    /// Record the completion timestamp (first time only) and drop the claim
    Complete { step: Step, at: DateTime<Utc> },
    /// Append to the alert history
    AppendAlert(BreachAlert),
    /// Set a descriptive field
    SetField(CaseField, String),
    /// Set the archival flag
    SetArchived(bool),
}

/// Ordered list of operations stamped with the mutation time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasePatch {
    /// Becomes the case's `updated_at`
    pub at: DateTime<Utc>,
    /// Operations in application order
    pub ops: Vec<PatchOp>,
}

impl CasePatch {
    /// Empty patch; applying it only refreshes `updated_at`
    #[inline]
    #[must_use]
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at, ops: Vec::new() }
    }

    /// Set the step flag
    #[must_use]
    pub fn mark_done(mut self, step: Step) -> Self {
        self.ops.push(PatchOp::MarkDone(step));
        self
    }

    /// Claim the step notification
    #[must_use]
    pub fn claim(mut self, step: Step, at: DateTime<Utc>) -> Self {
        self.ops.push(PatchOp::Claim { step, at });
        self
    }

    /// Release the step notification claim
    #[must_use]
    pub fn release_claim(mut self, step: Step) -> Self {
        self.ops.push(PatchOp::ReleaseClaim(step));
        self
    }

    /// Record step completion
    #[must_use]
    pub fn complete(mut self, step: Step, at: DateTime<Utc>) -> Self {
        self.ops.push(PatchOp::Complete { step, at });
        self
    }

    /// Append a breach alert
    #[must_use]
    pub fn append_alert(mut self, alert: BreachAlert) -> Self {
        self.ops.push(PatchOp::AppendAlert(alert));
        self
    }

    /// Set a descriptive field
    #[must_use]
    pub fn set_field(mut self, field: CaseField, value: impl Into<String>) -> Self {
        self.ops.push(PatchOp::SetField(field, value.into()));
        self
    }

    /// Set the archival flag
    #[must_use]
    pub fn set_archived(mut self, archived: bool) -> Self {
        self.ops.push(PatchOp::SetArchived(archived));
        self
    }
}

/// Fields for a new case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCase {
    /// Human reference number
    pub rma_number: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Descriptive fields
    pub details: BTreeMap<CaseField, String>,
}

impl NewCase {
    /// Materialize into a step-0 case
    #[must_use]
    pub fn into_case(self, id: CaseId) -> Case {
        Case::new(id, self.rma_number, self.created_at, self.details)
    }
}
