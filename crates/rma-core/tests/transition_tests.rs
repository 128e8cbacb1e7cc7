use rma_core::{
    Clock, MessageKind, RecordStore, RmaError, Step, StepTransitionEngine, TransitionConfig,
    TransitionOutcome,
};
use rma_test_utils::{case_created_at, epoch, FaultyStore, Harness, RecordingNotifier, CUSTOMER_ADDRESS};
use std::sync::Arc;

#[tokio::test]
async fn test_received_sets_flag_timestamp_and_notifies_once() {
    let h = Harness::new();
    let case = h.seed_case(1);

    let result = h.engine.complete_step(case.id, "received").await.unwrap();
    assert_eq!(result.outcome, TransitionOutcome::Notified);
    assert!(result.case.is_done(Step::Received));
    assert_eq!(result.case.completed_at(Step::Received), Some(h.clock.now()));

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, CUSTOMER_ADDRESS);
    assert_eq!(sent[0].kind, MessageKind::Step(Step::Received));
    assert_eq!(sent[0].kind.id(), "received");
}

#[tokio::test]
async fn test_in_progress_before_investigation_is_rejected() {
    let h = Harness::new();
    let case = h.seed_case(1);
    h.engine.complete_step(case.id, "received").await.unwrap();

    let err = h.engine.complete_step(case.id, "inProgress").await.unwrap_err();
    match err {
        RmaError::PrerequisiteViolation { step, prerequisite } => {
            assert_eq!(step, "In Progress");
            assert_eq!(prerequisite, "Investigation Underway");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        err_message(h.engine.complete_step(case.id, "inProgress").await),
        "Hold on — you can't send \"In Progress Email\" until \"Investigation Underway Email\" is sent."
    );

    let stored = h.store.get(case.id).await.unwrap();
    assert!(!stored.is_done(Step::InProgress));
    assert!(!stored.is_done(Step::Investigating));
    assert_eq!(h.notifier.sent().len(), 1);
}

fn err_message<T: std::fmt::Debug>(result: Result<T, RmaError>) -> String {
    result.unwrap_err().to_string()
}

#[tokio::test]
async fn test_repeat_completion_writes_timestamp_once() {
    let h = Harness::new();
    let case = h.seed_case(1);

    let first = h.engine.complete(case.id, Step::Received).await.unwrap();
    h.clock.advance(chrono::Duration::hours(2));
    let second = h.engine.complete(case.id, Step::Received).await.unwrap();

    assert_eq!(second.outcome, TransitionOutcome::AlreadyNotified);
    assert_eq!(
        second.case.completed_at(Step::Received),
        first.case.completed_at(Step::Received)
    );
    assert_eq!(second.case.updated_at, h.clock.now());
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_aliases_accepted() {
    let h = Harness::new();
    let case = h.seed_case(1);

    h.engine.complete_step(case.id, "productReceived").await.unwrap();
    let result = h
        .engine
        .complete_step(case.id, "investigationUnderway")
        .await
        .unwrap();
    assert_eq!(result.step, Step::Investigating);
    assert_eq!(result.outcome, TransitionOutcome::Notified);
}

#[tokio::test]
async fn test_full_lifecycle_in_order() {
    let h = Harness::new();
    let case = h.seed_case(0);
    h.engine
        .update_fields(case.id, [("trackingNumber", "TRK-77"), ("repairDescription", "Replaced gear")])
        .await
        .unwrap();

    for step in Step::ALL {
        h.clock.advance(chrono::Duration::days(1));
        let result = h.engine.complete(case.id, step).await.unwrap();
        assert_eq!(result.outcome, TransitionOutcome::Notified, "{step}");
    }

    let sent = h.notifier.sent_of(&MessageKind::Step(Step::Dispatched));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].field("tracking_number"), "TRK-77");
    assert_eq!(sent[0].field("repair_description"), "Replaced gear");

    let stored = h.store.get(case.id).await.unwrap();
    assert_eq!(stored.pending_step(), None);
}

#[tokio::test]
async fn test_notifier_failure_then_retry() {
    let h = Harness::new();
    let case = h.seed_case(1);
    h.notifier.fail_next(1);

    let failed = h.engine.complete(case.id, Step::Received).await.unwrap();
    assert_eq!(failed.outcome, TransitionOutcome::NotificationFailed);
    assert!(failed.case.is_done(Step::Received));
    assert_eq!(failed.case.completed_at(Step::Received), None);

    let retried = h.engine.complete(case.id, Step::Received).await.unwrap();
    assert_eq!(retried.outcome, TransitionOutcome::Notified);
    assert_eq!(h.notifier.attempts(), 2);
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_store_failure_aborts_transition() {
    let store = Arc::new(FaultyStore::new());
    let case = case_created_at(epoch(), "SN-1");
    store.insert(case.clone());
    store.fail_updates_for(case.id);
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = StepTransitionEngine::new(
        store.clone(),
        notifier.clone(),
        Arc::new(rma_core::ManualClock::new(epoch())),
    );

    let err = engine.complete(case.id, Step::Received).await.unwrap_err();
    assert!(matches!(err, RmaError::Dependency(_)));
    assert!(err.is_retryable());
    assert_eq!(notifier.attempts(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completions_notify_once() {
    let h = Harness::new();
    let case = h.seed_case(1);
    let engine = h
        .engine
        .clone()
        .with_config(TransitionConfig::new().with_max_attempts(8));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.complete(case.id, Step::Received).await })
        })
        .collect();

    let mut notified = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(result) if result.outcome == TransitionOutcome::Notified => notified += 1,
            Ok(_) | Err(RmaError::Conflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(notified, 1);
    assert_eq!(h.notifier.sent_of(&MessageKind::Step(Step::Received)).len(), 1);
    let stored = h.store.get(case.id).await.unwrap();
    assert!(stored.completed_at(Step::Received).is_some());
}

#[tokio::test]
async fn test_update_fields_never_touches_steps() {
    let h = Harness::new();
    let case = h.seed_case(1);

    let err = h
        .engine
        .update_fields(case.id, [("productReceived", "true")])
        .await
        .unwrap_err();
    assert!(err.is_user_error());

    let updated = h
        .engine
        .update_fields(case.id, [("assignedTo", "Grace"), ("repairStatus", "Awaiting parts")])
        .await
        .unwrap();
    assert_eq!(updated.steps, case.steps);
    assert!(h.notifier.sent().is_empty());
}
