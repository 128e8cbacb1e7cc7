//! Step Transition Engine
//!
//! Applies one step completion to one case:
//! - Enforces step ordering through the prerequisite table
//! - Sends the step notification at most once
//! - Records the completion timestamp only after a successful send
//!
//! # Exactly-once notification
//!
//! A caller claims the step with a write conditional on the revision it
//! read. Only the winner sends. A successful send records the completion
//! timestamp (which also clears the claim); a failed send releases the
//! claim so a later call retries. Callers that find a live claim back off
//! with [`TransitionOutcome::NotificationInFlight`]. A claim older than the
//! lease is treated as abandoned.

use crate::case::{parse_fields, Case, CaseField, CaseId, CasePatch};
use crate::clock::Clock;
use crate::error::{RmaError, StoreError};
use crate::notify::{step_payload, Message, MessageKind, Notifier};
use crate::step::Step;
use crate::store::RecordStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Seconds after which an unfinished claim may be taken over
    pub claim_lease_secs: u64,
    /// Conditional-write attempts before giving up with `Conflict`
    pub max_attempts: u32,
}

impl TransitionConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With claim lease
    #[inline]
    #[must_use]
    pub fn with_claim_lease_secs(mut self, secs: u64) -> Self {
        self.claim_lease_secs = secs;
        self
    }

    /// With attempt limit
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    fn claim_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.claim_lease_secs).unwrap_or(i64::MAX))
    }
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            claim_lease_secs: 300,
            max_attempts: 3,
        }
    }
}

/// What happened to the step notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// Notification sent and completion recorded
    Notified,
    /// Completion was already recorded; nothing sent
    AlreadyNotified,
    /// Send failed; flag set, completion left open for retry
    NotificationFailed,
    /// Another caller is sending right now; nothing sent
    NotificationInFlight,
}

/// Result of a successful `complete_step`
#[derive(Debug, Clone)]
pub struct StepCompletion {
    /// Case after the transition
    pub case: Case,
    /// Step that was completed
    pub step: Step,
    /// Notification outcome
    pub outcome: TransitionOutcome,
}

/// Step transition engine
#[derive(Clone)]
pub struct StepTransitionEngine {
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: TransitionConfig,
}

impl StepTransitionEngine {
    /// Create new engine
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            config: TransitionConfig::default(),
        }
    }

    /// With configuration
    #[must_use]
    pub fn with_config(mut self, config: TransitionConfig) -> Self {
        self.config = config;
        self
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &TransitionConfig {
        &self.config
    }

    /// Complete a step given its wire name
    ///
    /// # Errors
    /// - `RmaError::Validation` if `step_name` is not a known step
    /// - see [`Self::complete`]
    pub async fn complete_step(
        &self,
        case_id: CaseId,
        step_name: &str,
    ) -> Result<StepCompletion, RmaError> {
        let step: Step = step_name.parse()?;
        self.complete(case_id, step).await
    }

    /// Complete a step
    ///
    /// Notifier failures never fail the call; they show up as
    /// [`TransitionOutcome::NotificationFailed`].
    ///
    /// # Errors
    /// - `RmaError::NotFound` if the case does not exist
    /// - `RmaError::PrerequisiteViolation` if the previous step is not done
    /// - `RmaError::Conflict` if every conditional write lost a race
    /// - `RmaError::Dependency` if the store fails
    pub async fn complete(&self, case_id: CaseId, step: Step) -> Result<StepCompletion, RmaError> {
        for attempt in 1..=self.config.max_attempts {
            let case = self.store.get(case_id).await?;
            check_prerequisite(&case, step)?;

            let now = self.clock.now();
            let state = case.step(step);

            if state.completed_at.is_some() {
                debug!(case_id = %case_id, step = %step, "Notification already sent, refreshing case");
                let case = self
                    .store
                    .update(case_id, CasePatch::new(now).mark_done(step), None)
                    .await?;
                return Ok(StepCompletion {
                    case,
                    step,
                    outcome: TransitionOutcome::AlreadyNotified,
                });
            }

            if let Some(claimed_at) = state.claimed_at {
                if now - claimed_at < self.config.claim_lease() {
                    info!(case_id = %case_id, step = %step, "Notification in flight elsewhere");
                    return Ok(StepCompletion {
                        case,
                        step,
                        outcome: TransitionOutcome::NotificationInFlight,
                    });
                }
                warn!(case_id = %case_id, step = %step, %claimed_at, "Taking over stale claim");
            }

            let claim = CasePatch::new(now).mark_done(step).claim(step, now);
            match self.store.update(case_id, claim, Some(case.revision)).await {
                Ok(claimed) => return self.notify_and_settle(claimed, step).await,
                Err(StoreError::Conflict { .. }) => {
                    debug!(case_id = %case_id, step = %step, attempt, "Lost claim race, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RmaError::Conflict {
            case_id,
            attempts: self.config.max_attempts,
        })
    }

    /// Send the step notification for a claimed step and record the result
    async fn notify_and_settle(&self, case: Case, step: Step) -> Result<StepCompletion, RmaError> {
        let email = case.field(CaseField::Email).to_string();
        let message = Message::new(email.clone(), MessageKind::Step(step), step_payload(&case));

        info!(case_id = %case.id, step = %step, to = %email, "Sending step notification");
        match self.notifier.send(message).await {
            Ok(()) => {
                let now = self.clock.now();
                let case = self
                    .store
                    .update(case.id, CasePatch::new(now).complete(step, now), None)
                    .await?;
                info!(case_id = %case.id, step = %step, "Step notification sent");
                Ok(StepCompletion {
                    case,
                    step,
                    outcome: TransitionOutcome::Notified,
                })
            }
            Err(e) => {
                warn!(case_id = %case.id, step = %step, error = %e, "Step notification failed, will retry on next transition");
                let now = self.clock.now();
                let case = self
                    .store
                    .update(case.id, CasePatch::new(now).release_claim(step), None)
                    .await?;
                Ok(StepCompletion {
                    case,
                    step,
                    outcome: TransitionOutcome::NotificationFailed,
                })
            }
        }
    }

    /// Update descriptive fields
    ///
    /// Never touches step flags and never notifies.
    ///
    /// # Errors
    /// - `RmaError::Validation` if any field is not on the allow-list;
    ///   nothing is written in that case
    /// - `RmaError::NotFound` if the case does not exist
    pub async fn update_fields<I, K, V>(&self, case_id: CaseId, fields: I) -> Result<Case, RmaError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let fields = parse_fields(fields)?;
        let patch = fields
            .into_iter()
            .fold(CasePatch::new(self.clock.now()), |patch, (field, value)| {
                patch.set_field(field, value)
            });
        let case = self.store.update(case_id, patch, None).await?;
        debug!(case_id = %case_id, revision = %case.revision, "Case fields updated");
        Ok(case)
    }
}

impl std::fmt::Debug for StepTransitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepTransitionEngine")
            .field("store", &self.store)
            .field("clock", &self.clock)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Fail if the step's prerequisite is not done
///
/// # Errors
/// `RmaError::PrerequisiteViolation` naming both steps
pub fn check_prerequisite(case: &Case, step: Step) -> Result<(), RmaError> {
    match step.prerequisite() {
        Some(prerequisite) if !case.is_done(prerequisite) => {
            Err(RmaError::prerequisite_violation(step, prerequisite))
        }
        _ => Ok(()),
    }
}
