//! Readiness initializer state machine against a scripted map server.

use std::sync::Arc;
use std::time::Duration;

use layer_api::{ReadinessConfig, ReadinessInitializer, ReadinessState};
use layer_common::PublishError;
use test_utils::{Call, FakePublisher};

fn fast_config(max_attempts: u32) -> ReadinessConfig {
    ReadinessConfig {
        initial_delay: Duration::from_millis(1),
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        max_attempts,
    }
}

fn initializer(publisher: &Arc<FakePublisher>, max_attempts: u32) -> Arc<ReadinessInitializer> {
    ReadinessInitializer::new(publisher.clone(), fast_config(max_attempts))
}

#[tokio::test]
async fn test_ready_after_transient_failures() {
    let publisher = Arc::new(FakePublisher::new());
    publisher.script_workspace([
        Err(PublishError::unreachable("connection refused")),
        Err(PublishError::unreachable("connection refused")),
        Err(PublishError::unreachable("503 Service Unavailable")),
        Ok(()),
    ]);
    let readiness = initializer(&publisher, 6);

    assert_eq!(readiness.state(), ReadinessState::NotStarted);
    assert!(readiness.start());
    let state = readiness.wait_terminal().await;

    assert_eq!(state, ReadinessState::Ready);
    assert_eq!(publisher.create_workspace_calls(), 4);
    assert_eq!(
        publisher.calls()[0],
        Call::CreateWorkspace("escap_climate".to_string())
    );
}

#[tokio::test]
async fn test_rejection_fails_immediately() {
    let publisher = Arc::new(FakePublisher::new());
    publisher.script_workspace([Err(PublishError::rejected("401 Unauthorized"))]);
    let readiness = initializer(&publisher, 6);

    readiness.start();
    let state = readiness.wait_terminal().await;

    match state {
        ReadinessState::Failed { reason } => assert!(reason.contains("401")),
        other => panic!("unexpected state: {:?}", other),
    }
    assert_eq!(publisher.create_workspace_calls(), 1);
}

#[tokio::test]
async fn test_rejection_after_transient_failures() {
    let publisher = Arc::new(FakePublisher::new());
    publisher.script_workspace([
        Err(PublishError::unreachable("connection refused")),
        Err(PublishError::unreachable("connection refused")),
        Err(PublishError::rejected("403 Forbidden")),
    ]);
    let readiness = initializer(&publisher, 6);

    readiness.start();
    let state = readiness.wait_terminal().await;

    match state {
        ReadinessState::Failed { reason } => assert!(reason.contains("403")),
        other => panic!("unexpected state: {:?}", other),
    }
    assert_eq!(publisher.create_workspace_calls(), 3);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let publisher = Arc::new(FakePublisher::new());
    publisher.script_workspace((0..10).map(|_| Err(PublishError::unreachable("timed out"))));
    let readiness = initializer(&publisher, 3);

    readiness.start();
    let state = readiness.wait_terminal().await;

    assert!(matches!(state, ReadinessState::Failed { .. }));
    assert_eq!(publisher.create_workspace_calls(), 3);
}

#[tokio::test]
async fn test_retry_only_from_failed() {
    let publisher = Arc::new(FakePublisher::new());
    publisher.script_workspace([Err(PublishError::rejected("bad workspace name"))]);
    let readiness = initializer(&publisher, 3);

    assert!(!readiness.retry());
    readiness.start();
    assert!(!readiness.start());
    assert!(matches!(
        readiness.wait_terminal().await,
        ReadinessState::Failed { .. }
    ));

    assert!(readiness.retry());
    let mut rx = readiness.subscribe();
    let state = rx.wait_for(|s| s.is_ready()).await.unwrap().clone();
    assert_eq!(state, ReadinessState::Ready);
    assert_eq!(publisher.create_workspace_calls(), 2);

    assert!(!readiness.retry());
}

#[tokio::test]
async fn test_attempts_are_observable() {
    let publisher = Arc::new(FakePublisher::new());
    publisher.script_workspace([Err(PublishError::unreachable("down")), Ok(())]);
    let readiness = initializer(&publisher, 6);
    let mut rx = readiness.subscribe();

    readiness.start();
    let seen = rx
        .wait_for(|s| {
            matches!(s, ReadinessState::Initializing { attempt } if *attempt >= 1)
                || s.is_terminal()
        })
        .await
        .unwrap()
        .clone();
    assert!(matches!(
        seen,
        ReadinessState::Initializing { .. } | ReadinessState::Ready
    ));
    assert_eq!(readiness.wait_terminal().await, ReadinessState::Ready);
}

#[tokio::test]
async fn test_shutdown_cancels_pending_attempts() {
    let publisher = Arc::new(FakePublisher::new());
    let readiness = ReadinessInitializer::new(
        publisher.clone(),
        ReadinessConfig {
            initial_delay: Duration::from_secs(60),
            ..fast_config(3)
        },
    );

    readiness.start();
    tokio::time::timeout(Duration::from_secs(5), readiness.shutdown())
        .await
        .unwrap();

    assert!(matches!(readiness.state(), ReadinessState::Failed { .. }));
    assert_eq!(publisher.create_workspace_calls(), 0);
    assert!(!readiness.retry());
}
