mod common;

use std::sync::Arc;

use chrono::Duration;
use lessonsync::clock::ManualClock;
use lessonsync::config::ServerConfig;
use lessonsync::models::{LessonUpdate, StatusKind, UserActivity};
use lessonsync::sync::{ClientEvent, ClientId, ServerEvent, SyncHub};
use tokio::sync::mpsc::UnboundedReceiver;

use common::{manual_clock, start_time};

fn hub(clock: Arc<ManualClock>) -> SyncHub {
    SyncHub::new(ServerConfig::default(), clock)
}

fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn join(hub: &SyncHub, user: &str) -> (ClientId, UnboundedReceiver<ServerEvent>) {
    let (id, mut rx) = hub.connect();
    hub.handle(id, ClientEvent::Authenticate(user.to_string()));
    drain(&mut rx);
    (id, rx)
}

fn update(lesson: &str, user: &str) -> LessonUpdate {
    LessonUpdate::new(lesson, user, StatusKind::Favorite, true, start_time() - Duration::days(3))
}

#[test]
fn test_authenticate_replays_last_twenty_and_announces() {
    let clock = manual_clock();
    let hub = hub(clock);
    let (a, _rx_a) = join(&hub, "alice");
    let (_b, mut rx_b) = join(&hub, "bob");

    for i in 0..30 {
        hub.handle(a, ClientEvent::LessonUpdate(update(&format!("l{}", i), "alice")));
    }
    drain(&mut rx_b);

    let (c, mut rx_c) = hub.connect();
    hub.handle(c, ClientEvent::Authenticate("carol".to_string()));

    let events = drain(&mut rx_c);
    assert_eq!(events.len(), 1);
    let ServerEvent::RecentUpdates(replay) = &events[0] else {
        panic!("expected recent-updates, got {:?}", events[0]);
    };
    assert_eq!(replay.len(), 20);
    assert_eq!(replay[0].lesson_id, "l10");
    assert_eq!(replay[19].lesson_id, "l29");

    let joined = drain(&mut rx_b);
    assert!(matches!(&joined[..], [ServerEvent::UserJoined(p)] if p.user_id == "carol"));
}

#[test]
fn test_ring_buffer_keeps_most_recent_hundred() {
    let hub = hub(manual_clock());
    let (a, _rx) = join(&hub, "alice");

    for i in 0..150 {
        hub.handle(a, ClientEvent::LessonUpdate(update(&format!("l{}", i), "alice")));
    }

    let recent = hub.recent_updates();
    assert_eq!(recent.len(), 100);
    assert_eq!(recent[0].lesson_id, "l50");
    assert_eq!(recent[99].lesson_id, "l149");
    assert_eq!(hub.stats().recent_updates, 100);
}

#[test]
fn test_update_is_stamped_and_not_echoed() {
    let clock = manual_clock();
    let hub = hub(clock.clone());
    let (a, mut rx_a) = join(&hub, "alice");
    let (_b, mut rx_b) = join(&hub, "alice");
    let (_c, mut rx_c) = join(&hub, "bob");
    drain(&mut rx_a);
    drain(&mut rx_b);

    clock.advance(Duration::seconds(5));
    hub.handle(a, ClientEvent::LessonUpdate(update("l1", "alice")));

    assert!(drain(&mut rx_a).is_empty());
    for rx in [&mut rx_b, &mut rx_c] {
        let events = drain(rx);
        let [ServerEvent::LessonUpdated(got)] = &events[..] else {
            panic!("expected one lesson-updated, got {:?}", events);
        };
        assert_eq!(got.lesson_id, "l1");
        assert_eq!(got.timestamp, start_time() + Duration::seconds(5));
    }
}

#[test]
fn test_identity_mismatch_errors_only_to_sender() {
    let hub = hub(manual_clock());
    let (a, mut rx_a) = join(&hub, "alice");
    let (_b, mut rx_b) = join(&hub, "bob");
    drain(&mut rx_a);

    hub.handle(a, ClientEvent::LessonUpdate(update("l1", "bob")));
    hub.handle(
        a,
        ClientEvent::UserActivity(UserActivity {
            user_id: "bob".to_string(),
            action: "viewed".to_string(),
            lesson_id: None,
            timestamp: start_time(),
        }),
    );

    let events = drain(&mut rx_a);
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], ServerEvent::Error(e) if e.message == "Invalid user ID in update"));
    assert!(matches!(&events[1], ServerEvent::Error(e) if e.message == "Invalid user ID in activity"));
    assert!(drain(&mut rx_b).is_empty());
    assert!(hub.recent_updates().is_empty());
}

#[test]
fn test_unauthenticated_events_are_ignored() {
    let hub = hub(manual_clock());
    let (anon, mut rx_anon) = hub.connect();
    let (_b, mut rx_b) = join(&hub, "bob");

    hub.handle(anon, ClientEvent::LessonUpdate(update("l1", "anon")));

    assert!(drain(&mut rx_anon).is_empty());
    assert!(drain(&mut rx_b).is_empty());
    assert!(hub.recent_updates().is_empty());
    assert!(hub.connected_users().iter().all(|u| u.user_id != "anon"));
}

#[test]
fn test_activity_is_broadcast_to_others() {
    let hub = hub(manual_clock());
    let (a, mut rx_a) = join(&hub, "alice");
    let (_b, mut rx_b) = join(&hub, "bob");
    drain(&mut rx_a);

    hub.handle(
        a,
        ClientEvent::UserActivity(UserActivity {
            user_id: "alice".to_string(),
            action: "opened-lesson".to_string(),
            lesson_id: Some("l1".to_string()),
            timestamp: start_time() - Duration::hours(1),
        }),
    );

    assert!(drain(&mut rx_a).is_empty());
    let events = drain(&mut rx_b);
    assert!(matches!(&events[..], [ServerEvent::UserActivity(act)] if act.timestamp == start_time()));
}

#[test]
fn test_disconnect_announces_user_left() {
    let hub = hub(manual_clock());
    let (a, _rx_a) = join(&hub, "alice");
    let (_b, mut rx_b) = join(&hub, "bob");

    hub.disconnect(a);

    let events = drain(&mut rx_b);
    assert!(matches!(&events[..], [ServerEvent::UserLeft(p)] if p.user_id == "alice"));
    assert_eq!(hub.stats().connected_users, 1);
}

#[test]
fn test_sweep_drops_idle_clients_and_old_updates() {
    let clock = manual_clock();
    let hub = hub(clock.clone());
    let (a, _rx_a) = join(&hub, "alice");
    let (_b, mut rx_b) = join(&hub, "bob");
    hub.handle(a, ClientEvent::LessonUpdate(update("l1", "alice")));
    drain(&mut rx_b);

    clock.advance(Duration::minutes(4));
    hub.handle(a, ClientEvent::Heartbeat);
    clock.advance(Duration::minutes(2));

    let report = hub.sweep();
    assert_eq!(report.dropped_clients, 1);
    assert_eq!(report.pruned_updates, 0);
    let users = hub.connected_users();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].user_id, "alice");
    // the swept session's outbox is closed
    assert!(matches!(
        rx_b.try_recv(),
        Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
    ));

    clock.advance(Duration::hours(24));
    let report = hub.sweep();
    assert_eq!(report.pruned_updates, 1);
    assert!(hub.recent_updates().is_empty());
}

#[test]
fn test_system_message_reaches_everyone() {
    let hub = hub(manual_clock());
    let (_a, mut rx_a) = join(&hub, "alice");
    let (_anon, mut rx_anon) = hub.connect();

    hub.broadcast_system("maintenance at 10:00", Some(serde_json::json!({ "minutes": 5 })));

    for rx in [&mut rx_a, &mut rx_anon] {
        let events = drain(rx);
        assert!(matches!(&events[..], [ServerEvent::SystemMessage(m)] if m.message == "maintenance at 10:00"));
    }
}

#[test]
fn test_stats_uptime_and_counts() {
    let clock = manual_clock();
    let hub = hub(clock.clone());
    join(&hub, "alice");
    hub.connect();

    clock.advance(Duration::seconds(90));
    let stats = hub.stats();
    assert_eq!(stats.connected_users, 1);
    assert_eq!(stats.connections, 2);
    assert_eq!(stats.uptime_secs, 90);
}
