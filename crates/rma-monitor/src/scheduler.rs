//! Daily SLA scan scheduler
//!
//! Runs the breach detector once a day at a fixed local time and on demand
//! through a [`TriggerHandle`]. Scan failures are logged and the loop keeps
//! going; only the shutdown future stops it.

use crate::error::MonitorError;
use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone};
use rma_core::{BreachDetector, RmaError, ScanSummary};
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

type Reply = oneshot::Sender<Result<ScanSummary, RmaError>>;

/// Fixed daily fire time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl DailySchedule {
    /// Create schedule firing at `at`
    #[inline]
    #[must_use]
    pub fn new(at: NaiveTime) -> Self {
        Self { at }
    }

    /// Parse `HH:MM`
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M").ok().map(Self::new)
    }

    /// Fire time
    #[inline]
    #[must_use]
    pub fn at(&self) -> NaiveTime {
        self.at
    }

    /// First fire time strictly after `now`
    ///
    /// A fire time that falls in a daylight-saving gap moves to the first
    /// valid instant after it.
    #[must_use]
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let tz = now.timezone();
        let mut day = now.date_naive();
        loop {
            let mut local = day.and_time(self.at);
            for _ in 0..4 {
                if let Some(candidate) = tz.from_local_datetime(&local).earliest() {
                    if candidate > *now {
                        return candidate;
                    }
                    break;
                }
                local += Duration::minutes(30);
            }
            day = day.succ_opt().unwrap_or(day);
        }
    }
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self::new(NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN))
    }
}

/// Requests a scan from a running scheduler
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<Reply>,
}

impl TriggerHandle {
    /// Run a scan now and wait for its result
    ///
    /// # Errors
    /// - `MonitorError::SchedulerStopped` if the scheduler is gone
    /// - `MonitorError::Rma` if the scan itself fails
    pub async fn run_now(&self) -> Result<ScanSummary, MonitorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(reply)
            .await
            .map_err(|_| MonitorError::SchedulerStopped)?;
        let result = rx.await.map_err(|_| MonitorError::SchedulerStopped)?;
        Ok(result?)
    }
}

/// Daily scheduler for the breach detector
#[derive(Debug)]
pub struct SlaScheduler {
    detector: BreachDetector,
    schedule: DailySchedule,
    run_on_start: bool,
    triggers: mpsc::Receiver<Reply>,
}

impl SlaScheduler {
    /// Create scheduler and its trigger handle
    #[must_use]
    pub fn new(detector: BreachDetector, schedule: DailySchedule) -> (Self, TriggerHandle) {
        let (tx, triggers) = mpsc::channel(8);
        let scheduler = Self {
            detector,
            schedule,
            run_on_start: false,
            triggers,
        };
        (scheduler, TriggerHandle { tx })
    }

    /// Scan once as soon as `run` starts
    #[must_use]
    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Run until `shutdown` resolves
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(at = %self.schedule.at(), run_on_start = self.run_on_start, "Starting SLA scheduler");
        tokio::pin!(shutdown);

        if self.run_on_start {
            self.scan("startup").await;
        }

        loop {
            let now = Local::now();
            let next = self.schedule.next_after(&now);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next = %next, "Next scheduled SLA scan");

            tokio::select! {
                () = tokio::time::sleep(wait) => {
                    self.scan("schedule").await;
                }
                Some(reply) = self.triggers.recv() => {
                    info!(trigger = "manual", "SLA scan requested");
                    let result = self.detector.run().await;
                    log_result("manual", &result);
                    let _ = reply.send(result);
                }
                () = &mut shutdown => {
                    info!("SLA scheduler stopping");
                    return;
                }
            }
        }
    }

    async fn scan(&self, trigger: &str) {
        info!(trigger, "SLA scan firing");
        let result = self.detector.run().await;
        log_result(trigger, &result);
    }
}

fn log_result(trigger: &str, result: &Result<ScanSummary, RmaError>) {
    match result {
        Ok(summary) => info!(
            trigger,
            scanned = summary.scanned,
            overdue = summary.report.len(),
            skipped = summary.skipped,
            digest = ?summary.digest,
            "SLA scan finished"
        ),
        Err(e) => error!(trigger, error = %e, "SLA scan failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn test_parse() {
        assert_eq!(
            DailySchedule::parse("08:00").unwrap().at(),
            NaiveTime::from_hms_opt(8, 0, 0).unwrap()
        );
        assert!(DailySchedule::parse("8am").is_none());
        assert!(DailySchedule::parse("24:00").is_none());
    }

    #[test]
    fn test_next_after_same_day_and_rollover() {
        let schedule = DailySchedule::default();
        let early = Utc.with_ymd_and_hms(2024, 3, 1, 7, 59, 0).unwrap();
        assert_eq!(
            schedule.next_after(&early),
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
        );

        let exact = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(&exact),
            Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_after_respects_offset() {
        let tz = FixedOffset::east_opt(10 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 12, 31, 22, 0, 0).unwrap();
        let next = DailySchedule::default().next_after(&now);
        assert_eq!(next, tz.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap());
    }
}
