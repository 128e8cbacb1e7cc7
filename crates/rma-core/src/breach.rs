//! SLA Breach Detector
//!
//! Scans every active case, finds the ones whose pending step has been
//! waiting longer than its SLA, records an alert on each and sends staff a
//! single digest with a CSV attachment.
//!
//! # Re-alerting
//!
//! A case is alerted again for the same step only once the time since the
//! last alert (counted from midnight UTC of the alert day) reaches the SLA
//! again. Alerts are written before the digest goes out, so a failed digest
//! does not cause a duplicate alert on the next run.

use crate::case::{BreachAlert, Case, CaseField, CasePatch};
use crate::clock::{age_days, format_date, start_of_day, Clock};
use crate::error::RmaError;
use crate::notify::{keys, Attachment, Message, MessageKind, Notifier, Payload};
use crate::step::Step;
use crate::store::RecordStore;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// CSV column titles
pub const CSV_HEADERS: [&str; 8] = [
    "RMA Number",
    "Customer",
    "Email",
    "Model",
    "Serial",
    "Fault",
    "Baseline Date",
    "Missing Step",
];

/// Why a case is overdue
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    /// Step still waiting
    pub step: Step,
    /// Start of the SLA window
    pub baseline: DateTime<Utc>,
    /// Fractional days since the baseline
    pub age_days: f64,
}

/// Decide whether `case` is overdue at `now`
///
/// Returns `None` for dispatched cases, for cases whose
/// baseline is missing, and for cases inside their SLA or alerted too
/// recently.
#[must_use]
pub fn assess(case: &Case, now: DateTime<Utc>) -> Option<Assessment> {
    let step = case.pending_step()?;
    let baseline = match step.prerequisite() {
        None => case.created_at,
        Some(prerequisite) => case.completed_at(prerequisite)?,
    };

    let threshold = f64::from(step.sla_days());
    let age = age_days(baseline, now);
    if age < threshold {
        return None;
    }
    if let Some(last) = case.last_alert(step) {
        if age_days(start_of_day(last), now) < threshold {
            return None;
        }
    }

    Some(Assessment {
        step,
        baseline,
        age_days: age,
    })
}

/// One report row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreachRow {
    /// RMA reference
    pub case_number: String,
    /// Customer name
    pub contact_name: String,
    /// Customer email
    pub contact_email: String,
    /// Product model
    pub model_name: String,
    /// Product serial
    pub serial_number: String,
    /// Reported fault
    pub fault_text: String,
    /// Baseline as `YYYY-MM-DD`
    pub baseline_date: String,
    /// Display name of the pending step
    pub missing_step_name: String,
    /// Whole days since the baseline
    pub age_days: u64,
}

impl BreachRow {
    /// Build a row from an assessed case
    #[must_use]
    pub fn new(case: &Case, assessment: &Assessment) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let age_days = assessment.age_days.floor().max(0.0) as u64;
        Self {
            case_number: case.rma_number.clone(),
            contact_name: case.field(CaseField::Name).to_string(),
            contact_email: case.field(CaseField::Email).to_string(),
            model_name: case.field(CaseField::ModelName).to_string(),
            serial_number: case.field(CaseField::SerialNumber).to_string(),
            fault_text: case.field(CaseField::FaultDescription).to_string(),
            baseline_date: format_date(assessment.baseline.date_naive()),
            missing_step_name: assessment.step.display_name().to_string(),
            age_days,
        }
    }

    fn columns(&self) -> [&str; 8] {
        [
            self.case_number.as_str(),
            self.contact_name.as_str(),
            self.contact_email.as_str(),
            self.model_name.as_str(),
            self.serial_number.as_str(),
            self.fault_text.as_str(),
            self.baseline_date.as_str(),
            self.missing_step_name.as_str(),
        ]
    }
}

/// Digest contents for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreachReport {
    /// Day of the run
    pub generated_on: NaiveDate,
    /// Overdue cases
    pub rows: Vec<BreachRow>,
}

impl BreachReport {
    /// Create empty report
    #[inline]
    #[must_use]
    pub fn new(generated_on: NaiveDate) -> Self {
        Self {
            generated_on,
            rows: Vec::new(),
        }
    }

    /// Number of rows
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there is anything to report
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Attachment file name
    #[must_use]
    pub fn attachment_name(&self) -> String {
        format!("RMA_Overdue_{}.csv", format_date(self.generated_on))
    }

    /// Table as CSV with a header line
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        push_csv_line(&mut out, &CSV_HEADERS);
        for row in &self.rows {
            push_csv_line(&mut out, &row.columns());
        }
        out
    }

    /// Plain-text table for the digest body
    #[must_use]
    pub fn summary_text(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            let _ = writeln!(
                out,
                "  - {} | {} | {} | {} | {} | {} days since {}",
                row.case_number,
                row.contact_name,
                row.model_name,
                row.serial_number,
                row.missing_step_name,
                row.age_days,
                row.baseline_date
            );
        }
        out
    }

    /// Digest message for `to`
    #[must_use]
    pub fn to_message(&self, to: impl Into<String>) -> Message {
        let mut payload = Payload::new();
        payload.insert(keys::ITEM_COUNT.to_string(), self.len().to_string());
        payload.insert(keys::REPORT_DATE.to_string(), format_date(self.generated_on));
        payload.insert(keys::SUMMARY.to_string(), self.summary_text());
        Message::new(to, MessageKind::OverdueDigest, payload)
            .with_attachment(Attachment::csv(self.attachment_name(), self.to_csv()))
    }
}

fn push_csv_line(out: &mut String, columns: &[&str]) {
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if column.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&column.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(column);
        }
    }
    out.push('\n');
}

/// Digest delivery result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "error")]
pub enum DigestStatus {
    /// Nothing overdue, nothing sent
    NotNeeded,
    /// Digest delivered
    Sent,
    /// Digest failed; alerts stay recorded
    Failed(String),
}

/// Outcome of one detector run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    /// Cases examined
    pub scanned: usize,
    /// Cases skipped because their alert could not be written
    pub skipped: usize,
    /// Report for this run
    pub report: BreachReport,
    /// Digest delivery
    pub digest: DigestStatus,
}

/// SLA breach detector
#[derive(Clone)]
pub struct BreachDetector {
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    staff_address: String,
}

impl BreachDetector {
    /// Create new detector
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        staff_address: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            staff_address: staff_address.into(),
        }
    }

    /// Run one scan
    ///
    /// # Errors
    /// `RmaError::Dependency` if the cases cannot be read. Per-case write
    /// failures and digest failures are reported in the summary instead.
    pub async fn run(&self) -> Result<ScanSummary, RmaError> {
        let now = self.clock.now();
        let today = now.date_naive();
        info!(date = %today, "Checking for overdue RMA cases");

        let cases = self.store.query_all().await?;
        let scanned = cases.len();
        let mut skipped = 0;
        let mut report = BreachReport::new(today);

        for case in cases {
            let Some(assessment) = assess(&case, now) else {
                continue;
            };
            let alert = BreachAlert {
                step: assessment.step,
                on: today,
            };
            let patch = CasePatch::new(now).append_alert(alert);
            match self.store.update(case.id, patch, None).await {
                Ok(updated) => {
                    info!(
                        case_id = %case.id,
                        rma_number = %case.rma_number,
                        step = %assessment.step,
                        age_days = assessment.age_days,
                        "SLA breach detected"
                    );
                    report.rows.push(BreachRow::new(&updated, &assessment));
                }
                Err(e) => {
                    skipped += 1;
                    warn!(case_id = %case.id, error = %e, "Failed to record breach alert, skipping case");
                }
            }
        }

        let digest = if report.is_empty() {
            debug!("No overdue cases");
            DigestStatus::NotNeeded
        } else {
            match self.notifier.send(report.to_message(self.staff_address.clone())).await {
                Ok(()) => {
                    info!(items = report.len(), to = %self.staff_address, "Overdue digest sent");
                    DigestStatus::Sent
                }
                Err(e) => {
                    warn!(items = report.len(), error = %e, "Failed to send overdue digest");
                    DigestStatus::Failed(e.to_string())
                }
            }
        };

        Ok(ScanSummary {
            scanned,
            skipped,
            report,
            digest,
        })
    }
}

impl std::fmt::Debug for BreachDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreachDetector")
            .field("store", &self.store)
            .field("clock", &self.clock)
            .field("staff_address", &self.staff_address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::CaseId;
    use crate::clock::ManualClock;
    use crate::error::NotifyError;
    use crate::notify::MockNotifier;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn case_created(created: DateTime<Utc>) -> Case {
        let mut details = BTreeMap::new();
        details.insert(CaseField::Name, "Ada".to_string());
        details.insert(CaseField::Email, "ada@example.com".to_string());
        details.insert(CaseField::FaultDescription, "No power, \"dead\"".to_string());
        Case::new(CaseId::new(), "RMA-20240301-1234", created, details)
    }

    #[test]
    fn assess_uses_creation_for_first_step() {
        let case = case_created(at(1, 12));
        assert!(assess(&case, at(3, 11)).is_none());
        let hit = assess(&case, at(3, 12)).unwrap();
        assert_eq!(hit.step, Step::Received);
        assert_eq!(hit.baseline, at(1, 12));
    }

    #[test]
    fn assess_uses_previous_completion() {
        let mut case = case_created(at(1, 0));
        case.steps[0].done = true;
        case.steps[0].completed_at = Some(at(2, 0));
        assert!(assess(&case, at(5, 23)).is_none());
        let hit = assess(&case, at(6, 0)).unwrap();
        assert_eq!(hit.step, Step::Investigating);
        assert_eq!(hit.baseline, at(2, 0));
    }

    #[test]
    fn assess_skips_missing_baseline() {
        let mut case = case_created(at(1, 0));
        case.steps[0].done = true;
        assert!(assess(&case, at(20, 0)).is_none());
    }

    #[test]
    fn assess_skips_recent_alert() {
        let mut case = case_created(at(1, 0));
        case.alerts.push(BreachAlert {
            step: Step::Received,
            on: at(4, 0).date_naive(),
        });
        assert!(assess(&case, at(5, 23)).is_none());
        assert!(assess(&case, at(6, 0)).is_some());
    }

    #[test]
    fn assess_ignores_alerts_for_other_steps() {
        let mut case = case_created(at(1, 0));
        case.alerts.push(BreachAlert {
            step: Step::Dispatched,
            on: at(4, 0).date_naive(),
        });
        assert!(assess(&case, at(4, 12)).is_some());
    }

    #[test]
    fn csv_quotes_special_characters() {
        let case = case_created(at(1, 0));
        let assessment = assess(&case, at(4, 0)).unwrap();
        let mut report = BreachReport::new(at(4, 0).date_naive());
        report.rows.push(BreachRow::new(&case, &assessment));

        let csv = report.to_csv();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("RMA Number,Customer,Email,Model,Serial,Fault,Baseline Date,Missing Step")
        );
        assert_eq!(
            lines.next(),
            Some("RMA-20240301-1234,Ada,ada@example.com,,,\"No power, \"\"dead\"\"\",2024-03-01,Product Received")
        );
        assert_eq!(report.attachment_name(), "RMA_Overdue_2024-03-04.csv");
        assert_eq!(report.rows[0].age_days, 3);
    }

    #[tokio::test]
    async fn digest_failure_keeps_alerts() {
        let clock = ManualClock::new(at(4, 8));
        let store = Arc::new(MemoryStore::new());
        let case = case_created(at(1, 0));
        store.insert(case.clone());

        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .withf(|m| m.kind == MessageKind::OverdueDigest && m.to == "staff@example.com")
            .times(1)
            .returning(|_| Err(NotifyError::Delivery("smtp down".into())));

        let detector = BreachDetector::new(
            store.clone(),
            Arc::new(notifier),
            Arc::new(clock.clone()),
            "staff@example.com",
        );
        let summary = detector.run().await.unwrap();
        assert_eq!(summary.report.len(), 1);
        assert!(matches!(summary.digest, DigestStatus::Failed(_)));

        let stored = store.get(case.id).await.unwrap();
        assert_eq!(stored.notification_log(), "Overdue Product Received on 2024-03-04");
        assert_eq!(stored.updated_at, at(4, 8));

        clock.advance(Duration::hours(1));
        let mut quiet = MockNotifier::new();
        quiet.expect_send().never();
        let rerun = BreachDetector::new(store.clone(), Arc::new(quiet), Arc::new(clock), "staff@example.com")
            .run()
            .await
            .unwrap();
        assert_eq!(rerun.digest, DigestStatus::NotNeeded);
    }
}
