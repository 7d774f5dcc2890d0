//! A run killed mid-partition by an outside timeout must leave state that the
//! next run completes without duplicates.

mod common;

use std::time::Duration;

use bar_scraper::{
    PartitionKey, PartitionStatus, ProgressStore, RunCoordinator, RunParams, SqliteStore, StopReason,
};

use crate::common::*;

fn four_by_five() -> Vec<Person> {
    ["Aa", "Ab", "Ac", "Ad"]
        .iter()
        .flat_map(|p| people_with_prefix(p, 5))
        .collect()
}

fn seeds() -> [&'static str; 4] {
    ["Aa", "Ab", "Ac", "Ad"]
}

#[tokio::test(start_paused = true)]
async fn interrupted_run_resumes_without_duplicates() {
    let store = SqliteStore::open_in_memory().unwrap();

    // First run: the 8th detail fetch never returns and the scheduler kills us.
    let mut hanging = SyntheticSite::new("synthetic", four_by_five(), 100);
    hanging.hang_after_details = Some(7);
    let notifier = CapturingNotifier::default();
    let first = RunCoordinator::new(&hanging, &store, &store, prefixes(&seeds(), 1), 100)
        .with_notifier(Box::new(notifier.clone()));
    let killed = tokio::time::timeout(Duration::from_secs(60), first.run(&RunParams::default())).await;
    assert!(killed.is_err());
    assert_eq!(notifier.count(), 0);

    assert_eq!(store.total_contacts().unwrap(), 7);
    let mut counts = store.status_counts("synthetic").unwrap();
    counts.sort_by_key(|(s, _)| s.as_str());
    assert_eq!(
        counts,
        vec![
            (PartitionStatus::Done, 1),
            (PartitionStatus::InProgress, 1),
            (PartitionStatus::Pending, 2),
        ]
    );

    // Second run against the same data.
    let healthy = SyntheticSite::new("synthetic", four_by_five(), 100);
    let second = RunCoordinator::new(&healthy, &store, &store, prefixes(&seeds(), 1), 100)
        .run(&RunParams::default())
        .await;

    assert_eq!(second.stop_reason, Some(StopReason::Exhausted));
    assert!(second.crawl_complete, "errors: {:?}", second.errors);
    // Ab restarts from page 1; its two stored contacts are recognised.
    assert_eq!(second.partitions_processed, 3);
    assert_eq!(second.contacts_deduped, 2);
    assert_eq!(second.contacts_inserted, 13);
    assert_eq!(healthy.detail_calls(), 13);
    assert_eq!(store.total_contacts().unwrap(), 20);

    let ab = store
        .load("synthetic", &PartitionKey::seed("prefix", "Ab"))
        .unwrap()
        .unwrap();
    assert_eq!(ab.status, PartitionStatus::Done);
    assert!(store.load_pending("synthetic").unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn interrupted_subdivision_is_redone() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut people = people_with_prefix("Aa", 2);
    people.extend(people_spread("Ab", 52));

    // Cap of 50: Ab subdivides into 26 children of 2. Hang after Aa and the
    // first child's two contacts.
    let mut hanging = SyntheticSite::new("synthetic", people.clone(), 50);
    hanging.hang_after_details = Some(4);
    let first = RunCoordinator::new(&hanging, &store, &store, prefixes(&["Aa", "Ab"], 2), 50);
    assert!(
        tokio::time::timeout(Duration::from_secs(60), first.run(&RunParams::default()))
            .await
            .is_err()
    );

    let ab = store
        .load("synthetic", &PartitionKey::seed("prefix", "Ab"))
        .unwrap()
        .unwrap();
    assert!(ab.is_superseded());

    let healthy = SyntheticSite::new("synthetic", people, 50);
    let second = RunCoordinator::new(&healthy, &store, &store, prefixes(&["Aa", "Ab"], 2), 50)
        .run(&RunParams::default())
        .await;

    assert!(second.crawl_complete, "errors: {:?}", second.errors);
    assert_eq!(store.total_contacts().unwrap(), 54);
    assert_eq!(second.contacts_inserted, 50);
    // The interrupted child Abb and the 24 after it.
    assert_eq!(second.partitions_processed, 25);
}

#[tokio::test(start_paused = true)]
async fn killed_budgeted_run_does_not_block_the_next_process() {
    let store = SqliteStore::open_in_memory().unwrap();

    let mut hanging = SyntheticSite::new("synthetic", four_by_five(), 100);
    hanging.hang_after_details = Some(7);
    let first = RunCoordinator::new(&hanging, &store, &store, prefixes(&seeds(), 1), 100)
        .with_owner("pid-100")
        .with_lock_grace(Duration::ZERO);
    let budgeted = RunParams {
        max_runtime: Some(Duration::from_micros(1)),
        ..RunParams::default()
    };
    assert!(
        tokio::time::timeout(Duration::from_secs(60), first.run(&budgeted))
            .await
            .is_err()
    );

    // The killed run never released its lock, but its hold has run out.
    let healthy = SyntheticSite::new("synthetic", four_by_five(), 100);
    let second = RunCoordinator::new(&healthy, &store, &store, prefixes(&seeds(), 1), 100)
        .with_owner("pid-200")
        .run(&RunParams::default())
        .await;

    assert_eq!(second.stop_reason, Some(StopReason::Exhausted));
    assert!(second.crawl_complete, "errors: {:?}", second.errors);
    assert_eq!(second.contacts_inserted, 13);
    assert_eq!(store.total_contacts().unwrap(), 20);
}

#[tokio::test(start_paused = true)]
async fn killed_unbudgeted_run_keeps_lock() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut hanging = SyntheticSite::new("synthetic", four_by_five(), 100);
    hanging.hang_after_details = Some(0);
    let first = RunCoordinator::new(&hanging, &store, &store, prefixes(&seeds(), 1), 100)
        .with_owner("pid-300");
    assert!(
        tokio::time::timeout(Duration::from_secs(60), first.run(&RunParams::default()))
            .await
            .is_err()
    );

    let healthy = SyntheticSite::new("synthetic", four_by_five(), 100);
    let second = RunCoordinator::new(&healthy, &store, &store, prefixes(&seeds(), 1), 100)
        .with_owner("pid-400")
        .run(&RunParams::default())
        .await;
    assert_eq!(second.stop_reason, Some(StopReason::Locked));
    assert_eq!(healthy.detail_calls(), 0);
}
