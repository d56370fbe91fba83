// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::registry::{Subscriber, SubscriberRegistry};
use crate::subscription::SubscriptionSpec;
use crate::test_support::{wait_until, Behavior, FakeUpstream};

const WAIT: Duration = Duration::from_secs(5);

fn fast_policy() -> BackoffPolicy {
    BackoffPolicy {
        base: Duration::from_millis(10),
        cap: Duration::from_millis(40),
        max_attempts: 5,
        cooldown: Duration::from_secs(60),
    }
}

fn slow_policy() -> BackoffPolicy {
    BackoffPolicy { base: Duration::from_secs(30), cap: Duration::from_secs(30), ..fast_policy() }
}

fn link_config(url: &str) -> LinkConfig {
    LinkConfig {
        url: url.to_owned(),
        subscription: SubscriptionSpec::new("k", vec![], vec![]),
        subscribe_grace: Duration::from_secs(1),
        connect_timeout: Duration::from_millis(300),
        binary_as_text: true,
    }
}

fn spawn(url: &str, policy: BackoffPolicy) -> (SupervisorHandle, Arc<Broadcaster>) {
    spawn_with(link_config(url), policy)
}

fn spawn_with(config: LinkConfig, policy: BackoffPolicy) -> (SupervisorHandle, Arc<Broadcaster>) {
    let broadcaster = Arc::new(Broadcaster::new(Arc::new(SubscriberRegistry::new())));
    let handle =
        SupervisorHandle::spawn(config, policy, Arc::clone(&broadcaster), &CancellationToken::new());
    (handle, broadcaster)
}

async fn wait_for_state(
    rx: &mut watch::Receiver<LinkStatus>,
    state: LinkState,
) -> anyhow::Result<LinkStatus> {
    let status = tokio::time::timeout(WAIT, rx.wait_for(|s| s.state == state))
        .await
        .map_err(|_| anyhow::anyhow!("link never reached {state}"))??;
    Ok(status.clone())
}

#[tokio::test]
async fn stays_idle_until_triggered() -> anyhow::Result<()> {
    let upstream = FakeUpstream::spawn([]).await?;
    let (handle, _) = spawn(&upstream.url(), fast_policy());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(upstream.accepted(), 0);
    assert_eq!(handle.status().state, LinkState::Idle);
    assert!(!handle.is_live());
    Ok(())
}

#[tokio::test]
async fn repeated_triggers_issue_one_connect() -> anyhow::Result<()> {
    let mut upstream = FakeUpstream::spawn([]).await?;
    let (handle, _) = spawn(&upstream.url(), fast_policy());
    let handle = Arc::new(handle);

    let triggers: Vec<_> = (0..10)
        .map(|_| {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.ensure_connected() })
        })
        .collect();
    for t in triggers {
        t.await?;
    }

    let mut status = handle.subscribe_status();
    wait_for_state(&mut status, LinkState::Live).await?;
    upstream.next_subscription(WAIT).await?;

    // Triggers after the link has started are no-ops.
    assert!(!handle.ensure_connected());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(upstream.accepted(), 1);
    assert_eq!(upstream.max_open(), 1);
    Ok(())
}

#[tokio::test]
async fn live_link_feeds_broadcaster() -> anyhow::Result<()> {
    let mut upstream = FakeUpstream::spawn([]).await?;
    let (handle, broadcaster) = spawn(&upstream.url(), fast_policy());
    let (sub, mut rx) = Subscriber::channel(8);
    broadcaster.registry().add(sub);

    handle.ensure_connected();
    upstream.next_subscription(WAIT).await?;
    upstream.push_text("hello");

    let payload = tokio::time::timeout(WAIT, rx.recv()).await?;
    assert_eq!(payload, Some(crate::broadcast::Payload::Text(Arc::from("hello"))));
    assert_eq!(broadcaster.relayed(), 1);
    Ok(())
}

#[tokio::test]
async fn reconnects_after_upstream_close_with_counter_reset() -> anyhow::Result<()> {
    let mut upstream = FakeUpstream::spawn([]).await?;
    let (handle, _) = spawn(&upstream.url(), fast_policy());
    let mut status = handle.subscribe_status();

    handle.ensure_connected();
    upstream.next_subscription(WAIT).await?;
    wait_for_state(&mut status, LinkState::Live).await?;

    upstream.close_sessions(1001);
    let closed = wait_for_state(&mut status, LinkState::Closed).await?;
    assert_eq!(closed.attempts, 1);
    assert!(closed.last_error.as_deref().is_some_and(|e| e.contains("1001")));

    upstream.next_subscription(WAIT).await?;
    let live = wait_for_state(&mut status, LinkState::Live).await?;
    assert_eq!(live.attempts, 0);
    assert_eq!(upstream.accepted(), 2);
    Ok(())
}

#[tokio::test]
async fn failed_attempts_back_off_then_recover() -> anyhow::Result<()> {
    let mut upstream =
        FakeUpstream::spawn([Behavior::Reject, Behavior::Reject, Behavior::Reject]).await?;
    let (handle, _) = spawn(&upstream.url(), fast_policy());
    let mut status = handle.subscribe_status();

    handle.ensure_connected();
    upstream.next_subscription(WAIT).await?;
    let live = wait_for_state(&mut status, LinkState::Live).await?;

    assert_eq!(upstream.accepted(), 4);
    assert_eq!(live.attempts, 0);
    assert!(live.last_error.as_deref().is_some_and(|e| e.starts_with("CONNECT_FAILED")));
    Ok(())
}

#[tokio::test]
async fn sixth_consecutive_failure_enters_cooldown() -> anyhow::Result<()> {
    let upstream = FakeUpstream::spawn([Behavior::Reject; 6]).await?;
    let (handle, _) = spawn(&upstream.url(), fast_policy());
    let mut status = handle.subscribe_status();

    handle.ensure_connected();
    let suspended = wait_for_state(&mut status, LinkState::Suspended).await?;
    assert_eq!(suspended.attempts, 0);
    assert_eq!(upstream.accepted(), 6);

    // No short retry while cooling down.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(upstream.accepted(), 6);
    assert_eq!(handle.status().state, LinkState::Suspended);
    Ok(())
}

#[tokio::test]
async fn sessions_that_go_live_never_reach_the_ceiling() -> anyhow::Result<()> {
    let mut upstream = FakeUpstream::spawn([Behavior::CloseAfterSubscribe(1011); 7]).await?;
    let (handle, _) = spawn(&upstream.url(), fast_policy());

    handle.ensure_connected();
    for _ in 0..8 {
        upstream.next_subscription(WAIT).await?;
    }

    // Each session subscribed successfully, so every failure restarted at delay(0).
    let status = handle.status();
    assert_ne!(status.state, LinkState::Suspended);
    assert!(status.attempts <= 1, "attempts = {}", status.attempts);
    Ok(())
}

#[tokio::test]
async fn resumes_after_cooldown() -> anyhow::Result<()> {
    let mut upstream = FakeUpstream::spawn([Behavior::Reject; 3]).await?;
    let policy =
        BackoffPolicy { max_attempts: 2, cooldown: Duration::from_millis(150), ..fast_policy() };
    let (handle, _) = spawn(&upstream.url(), policy);
    let mut status = handle.subscribe_status();

    handle.ensure_connected();
    wait_for_state(&mut status, LinkState::Suspended).await?;
    assert_eq!(upstream.accepted(), 3);

    upstream.next_subscription(WAIT).await?;
    wait_for_state(&mut status, LinkState::Live).await?;
    assert_eq!(upstream.accepted(), 4);
    Ok(())
}

#[tokio::test]
async fn unsent_subscription_schedules_first_backoff() -> anyhow::Result<()> {
    let upstream = FakeUpstream::spawn([Behavior::Mute]).await?;
    let config = LinkConfig {
        // Larger than the loopback socket buffers, so the write stalls while the peer is not reading.
        subscription: SubscriptionSpec::new("k", vec![], vec!["x".repeat(32 << 20)]),
        subscribe_grace: Duration::from_millis(200),
        ..link_config(&upstream.url())
    };
    let (handle, _) = spawn_with(config, slow_policy());
    let mut status = handle.subscribe_status();

    handle.ensure_connected();
    let closed = wait_for_state(&mut status, LinkState::Closed).await?;

    assert_eq!(closed.attempts, 1);
    assert!(
        closed.last_error.as_deref().is_some_and(|e| e.starts_with("SUBSCRIBE_TIMEOUT")),
        "last_error = {:?}",
        closed.last_error
    );
    assert_eq!(upstream.accepted(), 1);
    tokio::time::timeout(WAIT, handle.shutdown()).await?;
    Ok(())
}

#[tokio::test]
async fn trigger_during_backoff_skips_the_wait() -> anyhow::Result<()> {
    let mut upstream = FakeUpstream::spawn([Behavior::Reject]).await?;
    let (handle, _) = spawn(&upstream.url(), slow_policy());
    let mut status = handle.subscribe_status();

    handle.ensure_connected();
    let closed = wait_for_state(&mut status, LinkState::Closed).await?;
    assert_eq!(closed.attempts, 1);

    assert!(handle.ensure_connected());
    upstream.next_subscription(WAIT).await?;
    wait_for_state(&mut status, LinkState::Live).await?;
    assert_eq!(upstream.accepted(), 2);
    Ok(())
}

#[tokio::test]
async fn trigger_during_cooldown_connects_once() -> anyhow::Result<()> {
    let mut upstream = FakeUpstream::spawn([Behavior::Reject; 6]).await?;
    let (handle, _) = spawn(&upstream.url(), fast_policy());
    let mut status = handle.subscribe_status();

    handle.ensure_connected();
    wait_for_state(&mut status, LinkState::Suspended).await?;
    assert_eq!(upstream.accepted(), 6);

    // The upstream is healthy again; a new subscriber must not wait out the cooldown.
    assert!(handle.ensure_connected());
    for _ in 0..4 {
        handle.ensure_connected();
    }
    upstream.next_subscription(WAIT).await?;
    let live = wait_for_state(&mut status, LinkState::Live).await?;
    assert_eq!(live.attempts, 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(upstream.accepted(), 7);
    assert_eq!(upstream.max_open(), 1);
    Ok(())
}

#[tokio::test]
async fn shutdown_cancels_pending_retry() -> anyhow::Result<()> {
    let upstream = FakeUpstream::spawn([Behavior::Reject]).await?;
    let (handle, _) = spawn(&upstream.url(), slow_policy());
    let mut status = handle.subscribe_status();

    handle.ensure_connected();
    wait_for_state(&mut status, LinkState::Closed).await?;

    tokio::time::timeout(WAIT, handle.shutdown()).await?;
    assert_eq!(upstream.accepted(), 1);
    assert!(!handle.ensure_connected());
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_live_session() -> anyhow::Result<()> {
    let mut upstream = FakeUpstream::spawn([]).await?;
    let (handle, _) = spawn(&upstream.url(), fast_policy());

    handle.ensure_connected();
    upstream.next_subscription(WAIT).await?;
    wait_until(WAIT, || handle.is_live()).await?;

    tokio::time::timeout(WAIT, handle.shutdown()).await?;
    assert_eq!(handle.status().state, LinkState::Closed);
    wait_until(WAIT, || upstream.open() == 0).await?;
    assert_eq!(upstream.accepted(), 1);
    Ok(())
}

#[tokio::test]
async fn shutdown_before_trigger_is_clean() -> anyhow::Result<()> {
    let upstream = FakeUpstream::spawn([]).await?;
    let (handle, _) = spawn(&upstream.url(), fast_policy());

    tokio::time::timeout(WAIT, handle.shutdown()).await?;
    // Second call finds no task to join.
    tokio::time::timeout(WAIT, handle.shutdown()).await?;
    assert_eq!(upstream.accepted(), 0);
    Ok(())
}
