//! Case intake and listing
//!
//! New cases start in step-0 state with a generated `RMA-YYYYMMDD-NNNN`
//! reference. The customer gets a submission confirmation and staff get a
//! new-case notice; neither send can fail intake.

use crate::case::{parse_fields, Case, CaseField, CaseId, CasePatch, NewCase};
use crate::clock::Clock;
use crate::error::{RmaError, ValidationError};
use crate::notify::{case_payload, keys, Message, MessageKind, Notifier, Payload};
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{info, warn};

/// Generate a case reference for `at`
#[must_use]
pub fn generate_rma_number(at: DateTime<Utc>) -> String {
    let suffix: u16 = rand::rng().random_range(1000..10000);
    format!("RMA-{}-{suffix}", at.format("%Y%m%d"))
}

/// Listing filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseQuery {
    /// Case-insensitive substring of serial, email, name or reference
    pub search: Option<String>,
    /// Include archived cases
    pub include_archived: bool,
}

impl CaseQuery {
    /// Match everything active
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With search term
    #[must_use]
    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// Include archived cases
    #[inline]
    #[must_use]
    pub fn with_archived(mut self) -> Self {
        self.include_archived = true;
        self
    }

    /// Check one case against the filter
    #[must_use]
    pub fn matches(&self, case: &Case) -> bool {
        if case.archived && !self.include_archived {
            return false;
        }
        let term = match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => term.to_lowercase(),
            _ => return true,
        };
        [
            case.field(CaseField::SerialNumber),
            case.field(CaseField::Email),
            case.field(CaseField::Name),
            case.rma_number.as_str(),
        ]
        .iter()
        .any(|value| value.to_lowercase().contains(&term))
    }
}

/// Case intake service
#[derive(Clone)]
pub struct CaseIntake {
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    staff_address: String,
}

impl CaseIntake {
    /// Create new intake service
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

    /// Staff address receiving new-case notices
    #[inline]
    #[must_use]
    pub fn staff_address(&self) -> &str {
        &self.staff_address
    }

    /// Open a new case
    ///
    /// # Errors
    /// - `RmaError::Validation` for a field outside the allow-list or a
    ///   missing email
    /// - `RmaError::Dependency` if the store fails
    pub async fn open_case<I, K, V>(&self, fields: I) -> Result<Case, RmaError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let details: std::collections::BTreeMap<CaseField, String> =
            parse_fields(fields)?.into_iter().collect();
        if details.get(&CaseField::Email).map_or(true, |e| e.trim().is_empty()) {
            return Err(ValidationError::MissingField(CaseField::Email.as_str()).into());
        }

        let now = self.clock.now();
        let case = self
            .store
            .create(NewCase {
                rma_number: generate_rma_number(now),
                created_at: now,
                details,
            })
            .await?;
        info!(case_id = %case.id, rma_number = %case.rma_number, "RMA case opened");

        let confirmation = Message::new(
            case.field(CaseField::Email),
            MessageKind::Submitted,
            case_payload(&case),
        );
        if let Err(e) = self.notifier.send(confirmation).await {
            warn!(case_id = %case.id, error = %e, "Failed to send submission confirmation");
        }

        let notice = Message::new(
            self.staff_address.clone(),
            MessageKind::AdminNewCase,
            admin_payload(&case),
        );
        if let Err(e) = self.notifier.send(notice).await {
            warn!(case_id = %case.id, error = %e, "Failed to send staff notification");
        }

        Ok(case)
    }

    /// List cases, newest first
    ///
    /// # Errors
    /// `RmaError::Dependency` if the store fails
    pub async fn list_cases(&self, query: &CaseQuery) -> Result<Vec<Case>, RmaError> {
        let mut cases: Vec<Case> = self
            .store
            .query_all()
            .await?
            .into_iter()
            .filter(|case| query.matches(case))
            .collect();
        cases.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(cases)
    }

    /// Fetch one case
    ///
    /// # Errors
    /// `RmaError::NotFound` if the case does not exist
    pub async fn get_case(&self, id: CaseId) -> Result<Case, RmaError> {
        Ok(self.store.get(id).await?)
    }

    /// Set or clear the archival flag
    ///
    /// # Errors
    /// `RmaError::NotFound` if the case does not exist
    pub async fn set_archived(&self, id: CaseId, archived: bool) -> Result<Case, RmaError> {
        let patch = CasePatch::new(self.clock.now()).set_archived(archived);
        let case = self.store.update(id, patch, None).await?;
        info!(case_id = %id, archived, "Archival flag updated");
        Ok(case)
    }
}

impl std::fmt::Debug for CaseIntake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseIntake")
            .field("store", &self.store)
            .field("staff_address", &self.staff_address)
            .finish_non_exhaustive()
    }
}

/// Payload for the staff new-case notice
#[must_use]
pub fn admin_payload(case: &Case) -> Payload {
    let mut payload = case_payload(case);
    payload.insert(
        keys::CUSTOMER_EMAIL.to_string(),
        case.field(CaseField::Email).to_string(),
    );
    payload.insert(
        keys::CONTACT_PHONE.to_string(),
        case.field(CaseField::ContactPhone).to_string(),
    );
    payload.insert(
        keys::ADDRESS.to_string(),
        format!(
            "{}, {}, {} {}",
            case.field(CaseField::Address),
            case.field(CaseField::Suburb),
            case.field(CaseField::State),
            case.field(CaseField::PostCode)
        ),
    );
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::NotifyError;
    use crate::notify::MockNotifier;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn intake(notifier: MockNotifier) -> (CaseIntake, Arc<MemoryStore>, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 20, 9, 30, 0).unwrap());
        let store = Arc::new(MemoryStore::new());
        let intake = CaseIntake::new(
            store.clone(),
            Arc::new(notifier),
            Arc::new(clock.clone()),
            "staff@example.com",
        );
        (intake, store, clock)
    }

    #[test]
    fn rma_number_format() {
        let at = Utc.with_ymd_and_hms(2024, 5, 20, 23, 59, 0).unwrap();
        let number = generate_rma_number(at);
        assert!(number.starts_with("RMA-20240520-"));
        let suffix: u32 = number["RMA-20240520-".len()..].parse().unwrap();
        assert!((1000..10000).contains(&suffix));
    }

    #[tokio::test]
    async fn open_case_notifies_customer_and_staff() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .withf(|m| m.kind == MessageKind::Submitted && m.to == "ada@example.com")
            .times(1)
            .returning(|_| Ok(()));
        notifier
            .expect_send()
            .withf(|m| {
                m.kind == MessageKind::AdminNewCase
                    && m.to == "staff@example.com"
                    && m.field(keys::ADDRESS) == "1 Main St, Carlton, VIC 3053"
                    && m.field(keys::CONTACT_PHONE) == "0400 000 000"
            })
            .times(1)
            .returning(|_| Ok(()));
        let (intake, store, _clock) = intake(notifier);

        let case = intake
            .open_case([
                ("email", "ada@example.com"),
                ("name", "Ada"),
                ("contactPhone", "0400 000 000"),
                ("address", "1 Main St"),
                ("suburb", "Carlton"),
                ("state", "VIC"),
                ("postCode", "3053"),
            ])
            .await
            .unwrap();

        assert!(case.rma_number.starts_with("RMA-20240520-"));
        assert_eq!(case.pending_step(), Some(crate::step::Step::Received));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn open_case_requires_email() {
        let mut notifier = MockNotifier::new();
        notifier.expect_send().never();
        let (intake, store, _clock) = intake(notifier);

        let err = intake.open_case([("name", "Ada")]).await.unwrap_err();
        assert!(matches!(
            err,
            RmaError::Validation(ValidationError::MissingField("email"))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn open_case_survives_notifier_failure() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .times(2)
            .returning(|_| Err(NotifyError::Delivery("offline".into())));
        let (intake, store, _clock) = intake(notifier);

        let case = intake.open_case([("email", "ada@example.com")]).await.unwrap();
        assert_eq!(store.get(case.id).await.unwrap(), case);
    }

    #[tokio::test]
    async fn list_filters_and_orders_newest_first() {
        let mut notifier = MockNotifier::new();
        notifier.expect_send().returning(|_| Ok(()));
        let (intake, _store, clock) = intake(notifier);

        let older = intake
            .open_case([("email", "ada@example.com"), ("serialNumber", "SN-100")])
            .await
            .unwrap();
        clock.advance(chrono::Duration::hours(1));
        let newer = intake
            .open_case([("email", "bob@example.com"), ("name", "Bob Builder")])
            .await
            .unwrap();

        let all = intake.list_cases(&CaseQuery::new()).await.unwrap();
        assert_eq!(
            all.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![newer.id, older.id]
        );

        let hits = intake.list_cases(&CaseQuery::new().search("sn-1")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, older.id);

        let hits = intake.list_cases(&CaseQuery::new().search("BUILDER")).await.unwrap();
        assert_eq!(hits[0].id, newer.id);

        intake.set_archived(newer.id, true).await.unwrap();
        let active = intake.list_cases(&CaseQuery::new()).await.unwrap();
        assert_eq!(active.len(), 1);
        let everything = intake.list_cases(&CaseQuery::new().with_archived()).await.unwrap();
        assert_eq!(everything.len(), 2);
    }
}
