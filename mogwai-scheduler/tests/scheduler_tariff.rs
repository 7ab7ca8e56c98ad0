//! End-to-end scheduling against real tariffs
//!
//! Drives a scheduler with the programmable collaborators through tariff
//! transitions, including a DST boundary, and checks the alarm chain and
//! the emitted deltas along the way.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use mogwai_scheduler::testing::{DummyClock, DummyConnectionMonitor, DummyPeerManager};
use mogwai_scheduler::{
    ConnectionDetails, EntryId, Metered, ScheduleEntry, Scheduler, SchedulerOptions,
};
use mogwai_tariff::{Period, RepeatType, Tariff, TariffBuilder, TariffLoader, CAPACITY_UNLIMITED};
use parking_lot::Mutex;

struct Harness {
    scheduler: Scheduler,
    clock: Arc<DummyClock>,
    connections: Arc<DummyConnectionMonitor>,
    peers: Arc<DummyPeerManager>,
}

async fn harness(start: DateTime<Tz>) -> Harness {
    let clock = Arc::new(DummyClock::new(start));
    let connections = Arc::new(DummyConnectionMonitor::new());
    let peers = Arc::new(DummyPeerManager::new());
    let scheduler = Scheduler::new(
        clock.clone(),
        connections.clone(),
        peers.clone(),
        SchedulerOptions::default(),
    )
    .await
    .unwrap();
    Harness {
        scheduler,
        clock,
        connections,
        peers,
    }
}

fn unmetered_with_tariff(tariff: Tariff) -> ConnectionDetails {
    ConnectionDetails {
        metered: Metered::No,
        allow_downloads: true,
        allow_downloads_when_metered: false,
        tariff: Some(tariff),
    }
}

/// Downloads forbidden 01:30–05:30 London time, nightly.
fn london_overnight_freeze() -> Tariff {
    let tz: Tz = "Europe/London".parse().unwrap();
    let mut builder = TariffBuilder::new();
    builder.set_name("overnight-freeze").add_period(
        Period::new(
            tz.with_ymd_and_hms(2018, 3, 1, 1, 30, 0).unwrap(),
            tz.with_ymd_and_hms(2018, 3, 1, 5, 30, 0).unwrap(),
            RepeatType::Day,
            1,
            0,
        )
        .unwrap(),
    );
    builder.build().unwrap()
}

#[tokio::test]
async fn entry_rides_tariff_transitions() {
    let tz: Tz = "Europe/London".parse().unwrap();
    let hx = harness(tz.with_ymd_and_hms(2018, 3, 20, 0, 0, 0).unwrap()).await;
    hx.connections
        .add_connection("dsl0", unmetered_with_tariff(london_overnight_freeze()));
    hx.peers
        .set_credentials("org.example.app", "/usr/bin/some-app");

    let log: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let log_clone = Arc::clone(&log);
    hx.scheduler.connect_active_entries_changed(move |change| {
        log_clone
            .lock()
            .push((change.added.len(), change.removed.len()));
    });

    let id = EntryId::new("nightly-sync").unwrap();
    hx.scheduler
        .update_entries(
            vec![ScheduleEntry::new(id.clone(), "org.example.app")],
            &[],
        )
        .unwrap();

    // Midnight: outside the freeze, so the entry runs, and the scheduler
    // is armed for the freeze opening at 01:30.
    assert!(hx.scheduler.is_entry_active(&id));
    assert_eq!(
        hx.clock.next_alarm(),
        Some(Utc.with_ymd_and_hms(2018, 3, 20, 1, 30, 0).unwrap())
    );

    // Into the freeze: the entry is demoted, next wakeup at 05:30.
    hx.clock
        .set_now(tz.with_ymd_and_hms(2018, 3, 20, 1, 30, 0).unwrap());
    assert!(!hx.scheduler.is_entry_active(&id));
    assert_eq!(
        hx.clock.next_alarm(),
        Some(Utc.with_ymd_and_hms(2018, 3, 20, 5, 30, 0).unwrap())
    );

    // Out the other side: the entry runs again.
    hx.clock
        .set_now(tz.with_ymd_and_hms(2018, 3, 20, 5, 30, 0).unwrap());
    assert!(hx.scheduler.is_entry_active(&id));

    assert_eq!(*log.lock(), vec![(1, 0), (0, 1), (1, 0)]);
}

#[tokio::test]
async fn dst_hole_skips_a_freeze_night() {
    // London springs forward 2018-03-25 at 01:00; the 01:30 freeze window
    // does not exist that night, so the entry keeps running straight
    // through to the next night's window.
    let tz: Tz = "Europe/London".parse().unwrap();
    let hx = harness(tz.with_ymd_and_hms(2018, 3, 25, 0, 0, 0).unwrap()).await;
    hx.connections
        .add_connection("dsl0", unmetered_with_tariff(london_overnight_freeze()));

    let id = EntryId::new("nightly-sync").unwrap();
    hx.scheduler
        .update_entries(
            vec![ScheduleEntry::new(id.clone(), "org.example.app")],
            &[],
        )
        .unwrap();
    assert!(hx.scheduler.is_entry_active(&id));

    // The next transition is the 26th's window (01:30 BST == 00:30 UTC),
    // not anything on the transition night.
    assert_eq!(
        hx.clock.next_alarm(),
        Some(Utc.with_ymd_and_hms(2018, 3, 26, 0, 30, 0).unwrap())
    );

    hx.clock
        .set_now(tz.with_ymd_and_hms(2018, 3, 26, 1, 30, 0).unwrap());
    assert!(!hx.scheduler.is_entry_active(&id));
}

#[tokio::test]
async fn second_connection_with_stricter_tariff_vetoes() {
    let hx = harness(Tz::UTC.with_ymd_and_hms(2018, 6, 1, 12, 0, 0).unwrap()).await;

    // First connection: unlimited all day.
    let mut builder = TariffBuilder::new();
    builder.set_name("flat-rate").add_period(
        Period::new(
            Tz::UTC.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
            Tz::UTC.with_ymd_and_hms(2018, 1, 2, 0, 0, 0).unwrap(),
            RepeatType::Day,
            1,
            CAPACITY_UNLIMITED,
        )
        .unwrap(),
    );
    hx.connections
        .add_connection("eth0", unmetered_with_tariff(builder.build().unwrap()));

    let id = EntryId::new("big-download").unwrap();
    hx.scheduler
        .update_entries(
            vec![ScheduleEntry::new(id.clone(), "org.example.app")],
            &[],
        )
        .unwrap();
    assert!(hx.scheduler.is_entry_active(&id));

    // Second connection under a daytime freeze: every connection must be
    // safe, so the entry is demoted while both are up.
    let mut builder = TariffBuilder::new();
    builder.set_name("daytime-freeze").add_period(
        Period::new(
            Tz::UTC.with_ymd_and_hms(2018, 1, 1, 8, 0, 0).unwrap(),
            Tz::UTC.with_ymd_and_hms(2018, 1, 1, 18, 0, 0).unwrap(),
            RepeatType::Day,
            1,
            0,
        )
        .unwrap(),
    );
    hx.connections
        .add_connection("wwan0", unmetered_with_tariff(builder.build().unwrap()));
    assert!(!hx.scheduler.is_entry_active(&id));

    hx.connections.remove_connection("wwan0");
    assert!(hx.scheduler.is_entry_active(&id));
}

#[tokio::test]
async fn tariff_survives_serialization_into_scheduler() {
    // The loader output drives scheduling identically to the built form.
    let tariff = london_overnight_freeze();
    let bytes = tariff.to_bytes().unwrap();
    let loaded = TariffLoader::new().load_from_bytes(&bytes).unwrap();

    let tz: Tz = "Europe/London".parse().unwrap();
    let hx = harness(tz.with_ymd_and_hms(2018, 3, 20, 2, 0, 0).unwrap()).await;
    hx.connections
        .add_connection("dsl0", unmetered_with_tariff(loaded));

    let id = EntryId::new("nightly-sync").unwrap();
    hx.scheduler
        .update_entries(
            vec![ScheduleEntry::new(id.clone(), "org.example.app")],
            &[],
        )
        .unwrap();

    // 02:00 is inside the freeze window.
    assert!(!hx.scheduler.is_entry_active(&id));
    hx.clock
        .set_now(tz.with_ymd_and_hms(2018, 3, 20, 5, 30, 0).unwrap());
    assert!(hx.scheduler.is_entry_active(&id));
}
