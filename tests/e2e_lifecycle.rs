//! E2E tests for the connection lifecycle
//!
//! Exercises the single-connection-attempt lock, the post-disconnect
//! cool-down, failure routing, and watchdog reclaim of a handshake that
//! never completes, all against the in-memory badge simulator.

use badgelink::config::LinkConfig;
use badgelink::link::{ConnectionLock, DeviceLink, LinkEvent, LinkState};
use badgelink::sim::{SimBehavior, SimTransport};
use badgelink::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Short timers so the tests run in well under a second each
fn fast_config() -> LinkConfig {
    LinkConfig {
        cooldown_ms: 100,
        lock_retry_ms: 100,
        watchdog_ms: 300,
    }
}

fn make_link(
    sim: &Arc<SimTransport>,
    lock: &ConnectionLock,
    address: &str,
) -> (DeviceLink, mpsc::UnboundedReceiver<LinkEvent>) {
    DeviceLink::new(
        address,
        Arc::clone(sim) as Arc<dyn Transport>,
        lock.clone(),
        fast_config(),
    )
}

#[tokio::test]
async fn test_lock_blocks_second_device_until_watchdog_reclaims() {
    let sim = Arc::new(SimTransport::new());
    sim.add_badge_with(
        "stuck",
        2.8,
        SimBehavior {
            hang_on_connect: true,
            ..SimBehavior::default()
        },
    );
    sim.add_badge("healthy", 2.8);

    let lock = ConnectionLock::new();
    let (stuck, mut stuck_events) = make_link(&sim, &lock, "stuck");
    let (healthy, mut healthy_events) = make_link(&sim, &lock, "healthy");

    stuck.open_dialogue();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stuck.state(), LinkState::Connecting);
    assert!(lock.is_held_by("stuck"));

    // the second device is refused the slot and keeps retrying
    healthy.open_dialogue();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(healthy.state(), LinkState::Disconnected);

    // watchdog expiry reclaims the stuck handshake and frees the slot
    let disconnected = tokio::time::timeout(Duration::from_secs(2), stuck_events.recv())
        .await
        .expect("watchdog should reclaim the stuck session");
    assert_eq!(disconnected, Some(LinkEvent::Disconnected));
    assert_eq!(stuck.state(), LinkState::Disconnected);
    assert_eq!(lock.holder(), None);

    // the queued retry now wins the slot and completes the handshake
    let ready = tokio::time::timeout(Duration::from_secs(2), healthy_events.recv())
        .await
        .expect("second device should connect after the reclaim");
    assert_eq!(ready, Some(LinkEvent::Ready));
    assert!(healthy.is_open());
}

#[tokio::test]
async fn test_cooldown_rejects_immediate_reopen() {
    let sim = Arc::new(SimTransport::new());
    sim.add_badge("aa", 2.8);
    let lock = ConnectionLock::new();
    let (link, mut events) = make_link(&sim, &lock, "aa");

    link.open_dialogue();
    assert_eq!(events.recv().await, Some(LinkEvent::Ready));
    link.close().await;
    assert_eq!(events.recv().await, Some(LinkEvent::Disconnected));

    // inside the cool-down: dropped outright, no lock taken
    link.open_dialogue();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(link.state(), LinkState::Disconnected);
    assert_eq!(lock.holder(), None);

    // after the cool-down the same call goes through
    tokio::time::sleep(Duration::from_millis(100)).await;
    link.open_dialogue();
    assert_eq!(events.recv().await, Some(LinkEvent::Ready));
}

#[tokio::test]
async fn test_discover_failure_routes_to_events_and_releases_lock() {
    let sim = Arc::new(SimTransport::new());
    sim.add_badge_with(
        "aa",
        2.8,
        SimBehavior {
            fail_discover: true,
            ..SimBehavior::default()
        },
    );
    let lock = ConnectionLock::new();
    let (link, mut events) = make_link(&sim, &lock, "aa");

    link.open_dialogue();
    match events.recv().await {
        Some(LinkEvent::Failure(message)) => assert!(message.contains("no services")),
        other => panic!("expected failure event, got {:?}", other),
    }
    assert_eq!(events.recv().await, Some(LinkEvent::Disconnected));
    assert_eq!(link.state(), LinkState::Disconnected);
    assert_eq!(lock.holder(), None);
}

#[tokio::test]
async fn test_close_defers_while_connecting() {
    let sim = Arc::new(SimTransport::new());
    sim.add_badge_with(
        "aa",
        2.8,
        SimBehavior {
            hang_on_connect: true,
            ..SimBehavior::default()
        },
    );
    let lock = ConnectionLock::new();
    let (link, mut events) = make_link(&sim, &lock, "aa");

    link.open_dialogue();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(link.state(), LinkState::Connecting);

    // close never interrupts an in-flight handshake; it rearms the watchdog
    link.close().await;
    assert_eq!(link.state(), LinkState::Connecting);

    // the watchdog eventually reclaims it anyway
    let disconnected = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("watchdog should fire");
    assert_eq!(disconnected, Some(LinkEvent::Disconnected));
}

#[tokio::test]
async fn test_dead_session_write_skips_second_close() {
    let sim = Arc::new(SimTransport::new());
    sim.add_badge("aa", 2.8);
    let lock = ConnectionLock::new();
    let (link, mut events) = make_link(&sim, &lock, "aa");

    link.open_dialogue();
    assert_eq!(events.recv().await, Some(LinkEvent::Ready));

    // flip the badge into dead-session mode after the handshake
    sim.set_behavior(
        "aa",
        SimBehavior {
            fail_write: true,
            ..SimBehavior::default()
        },
    );

    assert!(link.send(b"s").await.is_err());
    match events.recv().await {
        Some(LinkEvent::Failure(message)) => {
            assert!(message.contains("needs reconnect or close"))
        }
        other => panic!("expected failure event, got {:?}", other),
    }
    assert_eq!(events.recv().await, Some(LinkEvent::Disconnected));
    assert_eq!(link.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_watchdog_rearms_on_traffic() {
    let sim = Arc::new(SimTransport::new());
    sim.add_badge("aa", 2.8);
    let lock = ConnectionLock::new();
    let (link, mut events) = make_link(&sim, &lock, "aa");

    link.open_dialogue();
    assert_eq!(events.recv().await, Some(LinkEvent::Ready));

    // keep sending at half the watchdog period; the session must outlive
    // several watchdog timeouts
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        link.send(&[b'x']).await.expect("session should stay open");
        // drain the simulator's replies
        while events.try_recv().is_ok() {}
    }
    assert!(link.is_open());

    // once traffic stops, the watchdog closes the session
    let disconnected = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Some(LinkEvent::Disconnected) => break true,
                Some(_) => continue,
                None => break false,
            }
        }
    })
    .await
    .expect("watchdog should close the idle session");
    assert!(disconnected);
    assert_eq!(link.state(), LinkState::Disconnected);
}
