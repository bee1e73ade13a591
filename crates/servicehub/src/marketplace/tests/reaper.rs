use super::common::*;
use std::sync::Arc;
use std::time::Duration;

use crate::config::NotificationConfig;
use crate::marketplace::domain::Actor;
use crate::marketplace::reaper::ExpiryReaper;

#[test]
fn sweep_removes_only_expired_rows() {
    let harness = harness();
    harness.open_booking();
    harness
        .marketplace
        .announce(&Actor::admin(ADMIN), "Maintenance", "Tonight", None)
        .expect("announced");
    let reaper = harness.marketplace.reaper();

    assert_eq!(reaper.sweep().expect("sweep"), 0);

    harness.clock.advance(chrono::Duration::days(31));
    assert_eq!(reaper.sweep().expect("sweep"), 1);
    assert_eq!(reaper.sweep().expect("sweep"), 0);

    assert_eq!(harness.notifications.len().expect("store readable"), 1);
    assert_eq!(harness.inbox(CUSTOMER).len(), 1);
}

#[test]
fn concurrent_sweeps_delete_each_row_once() {
    let harness = harness();
    for headline in ["One", "Two", "Three"] {
        harness
            .marketplace
            .announce(&Actor::admin(ADMIN), headline, "Body", None)
            .expect("announced");
    }
    harness.clock.advance(chrono::Duration::days(31));
    let reaper = harness.marketplace.reaper();

    let removed: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reaper = Arc::clone(&reaper);
                scope.spawn(move || reaper.sweep().expect("sweep"))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("sweep thread panicked"))
            .sum()
    });

    assert_eq!(removed, 3);
    assert!(harness.notifications.is_empty().expect("store readable"));
}

#[tokio::test]
async fn spawned_reaper_runs_until_shut_down() {
    let harness = harness_with(NotificationConfig {
        reaper_interval: Duration::from_millis(10),
        ..notification_config()
    });
    harness
        .marketplace
        .announce(&Actor::admin(ADMIN), "Maintenance", "Tonight", None)
        .expect("announced");
    harness.clock.advance(chrono::Duration::days(31));

    let reaper: Arc<ExpiryReaper> = harness.marketplace.reaper();
    let handle = reaper.spawn();

    tokio::time::timeout(Duration::from_secs(2), async {
        while !harness.notifications.is_empty().expect("store readable") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("reaper removed the expired row");

    tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
        .await
        .expect("reaper stops promptly");
}
