//! Testing utilities for the RMA workspace
//!
//! Shared fakes, fixtures, and a harness wiring the services together.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use rma_core::{
    BreachDetector, Case, CaseField, CaseId, CaseIntake, CasePatch, ManualClock, MemoryStore,
    Message, MessageKind, NewCase, Notifier, NotifyError, RecordStore, Revision, Step,
    StepTransitionEngine, StoreError,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub const STAFF_ADDRESS: &str = "staff@example.com";
pub const CUSTOMER_ADDRESS: &str = "ada@example.com";

/// Fixed start instant for tests: 2024-03-01 09:00 UTC
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

/// Notifier that records every message and fails on demand
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Message>>,
    attempts: Mutex<usize>,
    fail_next: Mutex<usize>,
    fail_kinds: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` sends
    pub fn fail_next(&self, n: usize) {
        *self.fail_next.lock() = n;
    }

    /// Fail every send of `kind` until cleared
    pub fn fail_kind(&self, kind: &MessageKind) {
        self.fail_kinds.lock().insert(kind.id().to_string());
    }

    pub fn clear_failures(&self) {
        *self.fail_next.lock() = 0;
        self.fail_kinds.lock().clear();
    }

    /// Successfully delivered messages
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub fn sent_of(&self, kind: &MessageKind) -> Vec<Message> {
        self.sent().into_iter().filter(|m| &m.kind == kind).collect()
    }

    /// Send calls, successful or not
    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: Message) -> Result<(), NotifyError> {
        *self.attempts.lock() += 1;
        {
            let mut fail_next = self.fail_next.lock();
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(NotifyError::Delivery("injected failure".into()));
            }
        }
        if self.fail_kinds.lock().contains(message.kind.id()) {
            return Err(NotifyError::Delivery(format!("injected failure for {}", message.kind)));
        }
        self.sent.lock().push(message);
        Ok(())
    }
}

/// Store wrapper that injects failures
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_query: Mutex<bool>,
    fail_updates: Mutex<HashSet<CaseId>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn insert(&self, case: Case) {
        self.inner.insert(case);
    }

    pub fn fail_query_all(&self, fail: bool) {
        *self.fail_query.lock() = fail;
    }

    pub fn fail_updates_for(&self, id: CaseId) {
        self.fail_updates.lock().insert(id);
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn get(&self, id: CaseId) -> Result<Case, StoreError> {
        self.inner.get(id).await
    }

    async fn query_all(&self) -> Result<Vec<Case>, StoreError> {
        if *self.fail_query.lock() {
            return Err(StoreError::Unavailable("injected query failure".into()));
        }
        self.inner.query_all().await
    }

    async fn create(&self, new: NewCase) -> Result<Case, StoreError> {
        self.inner.create(new).await
    }

    async fn update(
        &self,
        id: CaseId,
        patch: CasePatch,
        expected: Option<Revision>,
    ) -> Result<Case, StoreError> {
        if self.fail_updates.lock().contains(&id) {
            return Err(StoreError::Unavailable(format!("injected update failure for {id}")));
        }
        self.inner.update(id, patch, expected).await
    }
}

/// Customer details for a test case
pub fn details(serial: &str) -> BTreeMap<CaseField, String> {
    let mut details = BTreeMap::new();
    details.insert(CaseField::Name, "Ada Lovelace".to_string());
    details.insert(CaseField::Email, CUSTOMER_ADDRESS.to_string());
    details.insert(CaseField::ModelName, "Analytical Engine".to_string());
    details.insert(CaseField::SerialNumber, serial.to_string());
    details.insert(CaseField::FaultDescription, "Gear train jams".to_string());
    details
}

/// Case created at `created_at` with every step still open
pub fn case_created_at(created_at: DateTime<Utc>, serial: &str) -> Case {
    Case::new(CaseId::new(), format!("RMA-{}-1000", created_at.format("%Y%m%d")), created_at, details(serial))
}

/// Case whose first `completed` steps were done and notified one day apart
pub fn case_with_steps(created_at: DateTime<Utc>, completed: usize) -> Case {
    let mut case = case_created_at(created_at, "SN-STEPS");
    for (i, step) in Step::ALL.into_iter().take(completed).enumerate() {
        let state = &mut case.steps[step.index()];
        state.done = true;
        state.completed_at = Some(created_at + Duration::days(i as i64 + 1));
    }
    case
}

/// Services sharing one clock, store and notifier
pub struct Harness {
    pub clock: ManualClock,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: StepTransitionEngine,
    pub detector: BreachDetector,
    pub intake: CaseIntake,
}

impl Harness {
    pub fn new() -> Self {
        Self::starting_at(epoch())
    }

    pub fn starting_at(now: DateTime<Utc>) -> Self {
        let clock = ManualClock::new(now);
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = StepTransitionEngine::new(store.clone(), notifier.clone(), Arc::new(clock.clone()));
        let detector = BreachDetector::new(
            store.clone(),
            notifier.clone(),
            Arc::new(clock.clone()),
            STAFF_ADDRESS,
        );
        let intake = CaseIntake::new(
            store.clone(),
            notifier.clone(),
            Arc::new(clock.clone()),
            STAFF_ADDRESS,
        );
        Self {
            clock,
            store,
            notifier,
            engine,
            detector,
            intake,
        }
    }

    /// Insert a fresh case created `days_ago` days before now
    pub fn seed_case(&self, days_ago: i64) -> Case {
        let created = rma_core::Clock::now(&self.clock) - Duration::days(days_ago);
        let case = case_created_at(created, "SN-SEED");
        self.store.insert(case.clone());
        case
    }

    pub fn advance_days(&self, days: i64) {
        self.clock.advance(Duration::days(days));
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
