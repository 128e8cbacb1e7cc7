//! RMA Core - return merchandise authorization lifecycle
//!
//! Tracks product returns through four ordered steps and:
//! - Sends exactly one customer notification per completed step
//! - Enforces step ordering through a single step table
//! - Detects cases stuck past their per-step SLA and reports them to staff
//! - Opens new cases and lists existing ones
//!
//! # Example
//!
//! ```rust,ignore
//! use rma_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let notifier = Arc::new(TracingNotifier);
//! let clock = Arc::new(SystemClock);
//!
//! let intake = CaseIntake::new(store.clone(), notifier.clone(), clock.clone(), "staff@example.com");
//! let case = intake.open_case([("email", "ada@example.com")]).await?;
//!
//! let engine = StepTransitionEngine::new(store.clone(), notifier.clone(), clock.clone());
//! let done = engine.complete_step(case.id, "received").await?;
//! println!("{:?}", done.outcome);
//!
//! let detector = BreachDetector::new(store, notifier, clock, "staff@example.com");
//! let summary = detector.run().await?;
//! println!("{} overdue", summary.report.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod alert_log;
pub mod breach;
pub mod case;
pub mod clock;
pub mod error;
pub mod intake;
pub mod notify;
pub mod step;
pub mod store;
pub mod template;
pub mod transition;

// Re-exports for convenience
pub use breach::{assess, Assessment, BreachDetector, BreachReport, BreachRow, DigestStatus, ScanSummary};
pub use case::{
    parse_fields, BreachAlert, Case, CaseField, CaseId, CasePatch, NewCase, PatchOp, Revision,
    StepState,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    DependencyError, InvariantViolation, NotifyError, RmaError, StoreError, ValidationError,
};
pub use intake::{generate_rma_number, CaseIntake, CaseQuery};
pub use notify::{Attachment, Message, MessageKind, Notifier, Payload, TracingNotifier};
pub use step::{Step, StepSpec, STEP_TABLE};
pub use store::{MemoryStore, RecordStore};
pub use transition::{StepCompletion, StepTransitionEngine, TransitionConfig, TransitionOutcome};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with RMA Core
    pub use crate::{
        BreachDetector, Case, CaseId, CaseIntake, CaseQuery, Clock, MemoryStore, Notifier,
        RecordStore, RmaError, Step, StepTransitionEngine, SystemClock, TracingNotifier,
        TransitionOutcome,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
