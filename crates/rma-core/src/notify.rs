//! Notification abstraction
//!
//! The engine decides *whether* to notify; a [`Notifier`] decides *how*.
//! Messages carry a kind that selects the template, a flat payload and
//! optional attachments.

use crate::case::{Case, CaseField};
use crate::error::NotifyError;
use crate::step::Step;
use crate::template;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

/// Payload keys shared by the engine and the templates
pub mod keys {
    pub const SENDER: &str = "sender";
    pub const SERIAL_NUMBER: &str = "serial_number";
    pub const MODEL_NAME: &str = "model_name";
    pub const FAULT_DESCRIPTION: &str = "fault_description";
    pub const TRACKING_NUMBER: &str = "tracking_number";
    pub const REPAIR_DESCRIPTION: &str = "repair_description";
    pub const PRODUCT_UPDATE: &str = "product_update";
    pub const RMA_NUMBER: &str = "rma_number";
    pub const CUSTOMER_EMAIL: &str = "customer_email";
    pub const CONTACT_PHONE: &str = "contact_phone";
    pub const ADDRESS: &str = "address";
    pub const ITEM_COUNT: &str = "item_count";
    pub const REPORT_DATE: &str = "report_date";
    pub const SUMMARY: &str = "summary";
}

/// Flat named-field payload
pub type Payload = BTreeMap<String, String>;

/// Message kind, selects the template
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Customer update for a completed step
    Step(Step),
    /// Customer confirmation of a new case
    Submitted,
    /// Staff notice of a new case
    AdminNewCase,
    /// Staff digest of SLA breaches
    OverdueDigest,
    /// Anything else; rendered with the generic template
    Other(String),
}

impl MessageKind {
    /// Wire identifier
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            MessageKind::Step(step) => step.id(),
            MessageKind::Submitted => "rmaSubmitted",
            MessageKind::AdminNewCase => "adminNotification",
            MessageKind::OverdueDigest => "overdueDigest",
            MessageKind::Other(id) => id,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// File attached to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name shown to the recipient
    pub filename: String,
    /// MIME type
    pub content_type: String,
    /// File body
    pub content: String,
}

impl Attachment {
    /// CSV attachment
    #[must_use]
    pub fn csv(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content_type: "text/csv".to_string(),
            content: content.into(),
        }
    }
}

/// Outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Recipient address
    pub to: String,
    /// Template selector
    pub kind: MessageKind,
    /// Template fields
    pub payload: Payload,
    /// Attachments
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Create message without attachments
    #[must_use]
    pub fn new(to: impl Into<String>, kind: MessageKind, payload: Payload) -> Self {
        Self {
            to: to.into(),
            kind,
            payload,
            attachments: Vec::new(),
        }
    }

    /// With attachment
    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Payload value, empty when absent
    #[must_use]
    pub fn field(&self, key: &str) -> &str {
        self.payload.get(key).map_or("", String::as_str)
    }

    /// Subject and body for this message
    #[must_use]
    pub fn render(&self) -> template::Rendered {
        template::render(&self.kind, &self.payload)
    }
}

/// Message sender
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message
    async fn send(&self, message: Message) -> Result<(), NotifyError>;
}

/// Payload for a customer step update
#[must_use]
pub fn step_payload(case: &Case) -> Payload {
    let mut payload = case_payload(case);
    for (key, field) in [
        (keys::TRACKING_NUMBER, CaseField::TrackingNumber),
        (keys::REPAIR_DESCRIPTION, CaseField::RepairDescription),
        (keys::PRODUCT_UPDATE, CaseField::UpdateOnProduct),
    ] {
        payload.insert(key.to_string(), case.field(field).to_string());
    }
    payload
}

/// Payload fields common to every case message
#[must_use]
pub fn case_payload(case: &Case) -> Payload {
    let mut payload = Payload::new();
    for (key, field) in [
        (keys::SENDER, CaseField::Name),
        (keys::SERIAL_NUMBER, CaseField::SerialNumber),
        (keys::MODEL_NAME, CaseField::ModelName),
        (keys::FAULT_DESCRIPTION, CaseField::FaultDescription),
    ] {
        payload.insert(key.to_string(), case.field(field).to_string());
    }
    payload.insert(keys::RMA_NUMBER.to_string(), case.rma_number.clone());
    payload
}

/// Development notifier that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, message: Message) -> Result<(), NotifyError> {
        let rendered = message.render();
        tracing::info!(
            to = %message.to,
            kind = %message.kind,
            attachments = message.attachments.len(),
            "[DEV] mock send: {}",
            rendered.subject
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::CaseId;
    use chrono::Utc;

    fn case() -> Case {
        let mut details = BTreeMap::new();
        details.insert(CaseField::Name, "Ada".to_string());
        details.insert(CaseField::SerialNumber, "SN-42".to_string());
        details.insert(CaseField::TrackingNumber, "TRK-1".to_string());
        Case::new(CaseId::new(), "RMA-20240101-1234", Utc::now(), details)
    }

    #[test]
    fn kind_ids() {
        assert_eq!(MessageKind::Step(Step::InProgress).id(), "inProgress");
        assert_eq!(MessageKind::Submitted.id(), "rmaSubmitted");
        assert_eq!(MessageKind::Other("roleUpdated".into()).to_string(), "roleUpdated");
    }

    #[test]
    fn step_payload_includes_extras() {
        let payload = step_payload(&case());
        assert_eq!(payload[keys::SENDER], "Ada");
        assert_eq!(payload[keys::SERIAL_NUMBER], "SN-42");
        assert_eq!(payload[keys::TRACKING_NUMBER], "TRK-1");
        assert_eq!(payload[keys::REPAIR_DESCRIPTION], "");
    }

    #[tokio::test]
    async fn tracing_notifier_accepts_everything() {
        let message = Message::new("x@example.com", MessageKind::Other("mystery".into()), Payload::new());
        assert!(TracingNotifier.send(message).await.is_ok());
    }
}
