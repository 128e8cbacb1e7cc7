//! Outbox notifier
//!
//! Development delivery: each message becomes a JSON file in the outbox
//! directory, with attachments written alongside it.

use async_trait::async_trait;
use chrono::Utc;
use rma_core::{Message, Notifier, NotifyError, Payload};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// One delivered message as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub to: String,
    pub kind: String,
    pub subject: String,
    pub body: String,
    pub payload: Payload,
    /// File names of attachments written next to the entry
    pub attachments: Vec<String>,
}

/// Notifier writing messages to a directory
#[derive(Debug)]
pub struct OutboxNotifier {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl OutboxNotifier {
    /// Create notifier for `dir`; the directory is created on first send
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Outbox directory
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read back every entry, oldest first
    ///
    /// # Errors
    /// I/O or decode failure on the outbox directory
    pub async fn entries(&self) -> std::io::Result<Vec<OutboxEntry>> {
        let mut names = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".msg.json") {
                names.push(name);
            }
        }
        names.sort();

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let bytes = tokio::fs::read(self.dir.join(&name)).await?;
            entries.push(serde_json::from_slice(&bytes).map_err(std::io::Error::other)?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn send(&self, message: Message) -> Result<(), NotifyError> {
        if message.to.trim().is_empty() {
            return Err(NotifyError::InvalidRecipient(message.to));
        }
        let delivery = |e: std::io::Error| NotifyError::Delivery(e.to_string());

        tokio::fs::create_dir_all(&self.dir).await.map_err(delivery)?;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stem = format!(
            "{}-{seq:04}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            message.kind
        );

        let mut attachments = Vec::with_capacity(message.attachments.len());
        for attachment in &message.attachments {
            let name = format!("{stem}-{}", attachment.filename);
            tokio::fs::write(self.dir.join(&name), &attachment.content)
                .await
                .map_err(delivery)?;
            attachments.push(name);
        }

        let rendered = message.render();
        let entry = OutboxEntry {
            to: message.to,
            kind: message.kind.id().to_string(),
            subject: rendered.subject,
            body: rendered.body,
            payload: message.payload,
            attachments,
        };
        let json = serde_json::to_vec_pretty(&entry)
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        let path = self.dir.join(format!("{stem}.msg.json"));
        tokio::fs::write(&path, json).await.map_err(delivery)?;

        info!(to = %entry.to, kind = %entry.kind, path = %path.display(), "Message written to outbox");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rma_core::{Attachment, MessageKind, Step};

    #[tokio::test]
    async fn test_writes_entry_and_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = OutboxNotifier::new(dir.path().join("outbox"));
        let mut payload = Payload::new();
        payload.insert("serial_number".into(), "SN-5".into());

        outbox
            .send(
                Message::new("ada@example.com", MessageKind::Step(Step::Received), payload)
                    .with_attachment(Attachment::csv("report.csv", "a,b\n")),
            )
            .await
            .unwrap();

        let entries = outbox.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, "received");
        assert_eq!(
            entries[0].subject,
            "Confirmation of Product Receipt – Serial Number SN-5"
        );
        let csv = std::fs::read_to_string(outbox.dir().join(&entries[0].attachments[0])).unwrap();
        assert_eq!(csv, "a,b\n");
    }

    #[tokio::test]
    async fn test_blank_recipient_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = OutboxNotifier::new(dir.path());
        let err = outbox
            .send(Message::new(" ", MessageKind::Submitted, Payload::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::InvalidRecipient(_)));
        assert!(outbox.entries().await.unwrap().is_empty());
    }
}
