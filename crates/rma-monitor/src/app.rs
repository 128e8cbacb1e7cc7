//! Service wiring
//!
//! Builds the engine, intake and detector over one store, notifier and
//! clock from a [`MonitorConfig`].

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::file_store::JsonFileStore;
use crate::outbox::OutboxNotifier;
use crate::scheduler::{SlaScheduler, TriggerHandle};
use rma_core::{
    BreachDetector, CaseIntake, Clock, Notifier, RecordStore, StepTransitionEngine, SystemClock,
};
use std::sync::Arc;

/// Wired monitor services
#[derive(Debug, Clone)]
pub struct Monitor {
    config: MonitorConfig,
    engine: StepTransitionEngine,
    intake: CaseIntake,
    detector: BreachDetector,
}

impl Monitor {
    /// Open the case file and outbox named in `config`
    ///
    /// # Errors
    /// `MonitorError::Store` if the case file cannot be loaded
    pub async fn open(config: MonitorConfig) -> Result<Self, MonitorError> {
        let store = Arc::new(JsonFileStore::open(&config.data_file).await?);
        let notifier = Arc::new(OutboxNotifier::new(&config.outbox_dir));
        Ok(Self::from_parts(config, store, notifier, Arc::new(SystemClock)))
    }

    /// Wire services over explicit dependencies
    #[must_use]
    pub fn from_parts(
        config: MonitorConfig,
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let engine = StepTransitionEngine::new(store.clone(), notifier.clone(), clock.clone())
            .with_config(config.transition());
        let intake = CaseIntake::new(
            store.clone(),
            notifier.clone(),
            clock.clone(),
            config.staff_email.clone(),
        );
        let detector = BreachDetector::new(store, notifier, clock, config.staff_email.clone());
        Self {
            config,
            engine,
            intake,
            detector,
        }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Step transition engine
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &StepTransitionEngine {
        &self.engine
    }

    /// Case intake
    #[inline]
    #[must_use]
    pub fn intake(&self) -> &CaseIntake {
        &self.intake
    }

    /// Breach detector
    #[inline]
    #[must_use]
    pub fn detector(&self) -> &BreachDetector {
        &self.detector
    }

    /// Daily scheduler for this monitor's detector
    ///
    /// # Errors
    /// `MonitorError::Config` if the configured time is invalid
    pub fn scheduler(&self) -> Result<(SlaScheduler, TriggerHandle), MonitorError> {
        let (scheduler, trigger) = SlaScheduler::new(self.detector.clone(), self.config.schedule()?);
        Ok((scheduler.with_run_on_start(self.config.run_on_start), trigger))
    }
}
