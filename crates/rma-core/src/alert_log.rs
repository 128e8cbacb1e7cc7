//! Breach alert log
//!
//! Alerts are kept as structured `(step, date)` records. The textual form
//! `Overdue <Step> on <YYYY-MM-DD>`, entries joined by `; `, is what staff
//! read and what gets persisted, so this module renders it and parses it
//! back.
//!
//! [`AlertLog`] keeps the persisted text verbatim and only ever appends to
//! it. Entries written by hand, or in another casing, survive every
//! load/store cycle unchanged.

use crate::case::BreachAlert;
use crate::clock::{format_date, parse_date};
use crate::step::Step;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::Deref;

/// Separator between log entries
pub const ENTRY_SEPARATOR: &str = "; ";

static ENTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Overdue\s+([A-Za-z][A-Za-z ]*?)\s+on\s+(\d{4}-\d{2}-\d{2})")
        .expect("static regex")
});

/// Render one entry
#[must_use]
pub fn render_entry(alert: &BreachAlert) -> String {
    format!(
        "Overdue {} on {}",
        alert.step.display_name(),
        format_date(alert.on)
    )
}

/// Render the whole history
#[must_use]
pub fn render(alerts: &[BreachAlert]) -> String {
    alerts
        .iter()
        .map(render_entry)
        .collect::<Vec<_>>()
        .join(ENTRY_SEPARATOR)
}

/// Recover alerts from a textual log
///
/// Entries with an unknown step name or an invalid date are not returned.
/// [`AlertLog`] still keeps them in its text.
#[must_use]
pub fn parse(text: &str) -> Vec<BreachAlert> {
    ENTRY_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let step = Step::from_display_name(&caps[1])?;
            let on = parse_date(&caps[2])?;
            Some(BreachAlert { step, on })
        })
        .collect()
}

/// Most recent alert date for `step`
#[must_use]
pub fn last_alert(alerts: &[BreachAlert], step: Step) -> Option<NaiveDate> {
    alerts
        .iter()
        .filter(|a| a.step == step)
        .map(|a| a.on)
        .max()
}

/// Append-only alert history
///
/// `text` is the persisted log and is never rewritten; `alerts` is what
/// could be recovered from it plus everything appended since.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertLog {
    text: String,
    alerts: Vec<BreachAlert>,
}

impl AlertLog {
    /// Empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an existing textual log
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let alerts = parse(&text);
        Self { text, alerts }
    }

    /// Record an alert, extending the text
    pub fn push(&mut self, alert: BreachAlert) {
        if !self.text.is_empty() {
            self.text.push_str(ENTRY_SEPARATOR);
        }
        self.text.push_str(&render_entry(&alert));
        self.alerts.push(alert);
    }

    /// Full log as stored
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> &str {
        &self.text
    }

    /// Most recent alert date for `step`
    #[must_use]
    pub fn last_alert(&self, step: Step) -> Option<NaiveDate> {
        last_alert(&self.alerts, step)
    }
}

impl Deref for AlertLog {
    type Target = [BreachAlert];

    fn deref(&self) -> &[BreachAlert] {
        &self.alerts
    }
}

impl FromIterator<BreachAlert> for AlertLog {
    fn from_iter<I: IntoIterator<Item = BreachAlert>>(iter: I) -> Self {
        let mut log = Self::new();
        for alert in iter {
            log.push(alert);
        }
        log
    }
}

impl Serialize for AlertLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for AlertLog {
    /// `null` reads as an empty log
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        Ok(text.map(Self::from_text).unwrap_or_default())
    }
}
