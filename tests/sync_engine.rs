mod common;

use common::{batch, eventually, remote, FakeFetcher, InstrumentedRepo};
use podcast_sync::cache::{TtlCache, TtlCacheConfig};
use podcast_sync::sync::{ReconcilePolicy, SyncConfig, SyncEngine};
use podcast_sync::types::{Episode, PlayState, RemoteEpisode};
use podcast_sync::Error;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    engine: SyncEngine,
    repo: Arc<InstrumentedRepo>,
    fetcher: Arc<FakeFetcher>,
}

fn harness(repo: InstrumentedRepo, fetcher: FakeFetcher, config: SyncConfig) -> Harness {
    let repo = Arc::new(repo);
    let fetcher = Arc::new(fetcher);
    let cache: Arc<TtlCache<Episode>> = Arc::new(TtlCache::new(TtlCacheConfig::default()));
    let engine = SyncEngine::new(fetcher.clone(), repo.clone(), cache, config);
    Harness {
        engine,
        repo,
        fetcher,
    }
}

fn simple() -> Harness {
    harness(InstrumentedRepo::new(), FakeFetcher::new(), SyncConfig::default())
}

fn partial(err: Error) -> podcast_sync::PartialSyncError {
    match err {
        Error::PartialSync(p) => p,
        other => panic!("expected partial sync, got {other:?}"),
    }
}

#[tokio::test]
async fn test_three_record_batch_creates_and_updates_keeping_play_state() {
    let h = simple();
    h.engine
        .reconcile_batch(vec![remote("a", "old a")], 1)
        .await
        .unwrap();
    let a = h.engine.get_by_guid("a").await.unwrap();
    h.engine
        .update_play_state(
            a.id,
            PlayState {
                played: true,
                position_secs: 120,
            },
        )
        .await
        .unwrap();

    let n = h
        .engine
        .reconcile_batch(
            vec![remote("a", "new a"), remote("b", "b"), remote("c", "c")],
            1,
        )
        .await
        .unwrap();
    assert_eq!(n, 3);

    let a2 = h.engine.get_by_guid("a").await.unwrap();
    assert_eq!(a2.id, a.id);
    assert_eq!(a2.title, "new a");
    assert!(a2.played);
    assert_eq!(a2.play_position_secs, 120);
    assert_eq!(a2.created_at, a.created_at);

    let page = h.engine.list_by_podcast(1, 1, 10).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(h.repo.inner.len(), 3);
}

#[tokio::test]
async fn test_reconciling_the_same_batch_twice_is_idempotent() {
    let h = simple();
    let records = batch(&["a", "b", "c"]);
    h.engine.reconcile_batch(records.clone(), 4).await.unwrap();
    let first = h.repo.inner.snapshot();
    h.engine.reconcile_batch(records, 4).await.unwrap();
    let second = h.repo.inner.snapshot();

    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 3);
    for (x, y) in first.iter().zip(second.iter()) {
        assert_eq!((x.id, &x.guid, &x.title), (y.id, &y.guid, &y.title));
    }
}

#[tokio::test]
async fn test_duplicate_guids_in_one_batch_last_wins() {
    let h = simple();
    let n = h
        .engine
        .reconcile_batch(vec![remote("a", "first"), remote("a", "second")], 1)
        .await
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(h.engine.get_by_guid("a").await.unwrap().title, "second");
}

#[tokio::test]
async fn test_concurrency_never_exceeds_configured_bound() {
    let h = harness(
        InstrumentedRepo::new().with_delay(Duration::from_millis(15)),
        FakeFetcher::new(),
        SyncConfig::default().with_max_concurrency(3),
    );
    let guids: Vec<String> = (0..12).map(|i| format!("g{i}")).collect();
    let refs: Vec<&str> = guids.iter().map(String::as_str).collect();

    let n = h.engine.reconcile_batch(batch(&refs), 1).await.unwrap();
    assert_eq!(n, 12);
    assert!(h.repo.max_in_flight() <= 3, "saw {}", h.repo.max_in_flight());
    assert!(h.repo.max_in_flight() >= 2, "units did not overlap");
}

#[tokio::test]
async fn test_partial_failure_reports_counts_and_keeps_successes() {
    let h = harness(
        InstrumentedRepo::new().failing_on("bad"),
        FakeFetcher::new(),
        SyncConfig::default(),
    );
    let err = h
        .engine
        .reconcile_batch(batch(&["a", "bad", "c"]), 1)
        .await
        .unwrap_err();
    let report = partial(err);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert!(matches!(report.errors[0], Error::Runtime { .. }));
    let stored: Vec<String> = h.repo.inner.snapshot().into_iter().map(|e| e.guid).collect();
    assert!(stored.contains(&"a".to_string()));
    assert!(stored.contains(&"c".to_string()));
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn test_panicking_unit_is_counted_and_releases_its_permit() {
    let h = harness(
        InstrumentedRepo::new().panicking_on("boom"),
        FakeFetcher::new(),
        SyncConfig::default().with_max_concurrency(1),
    );
    let err = h
        .engine
        .reconcile_batch(batch(&["a", "boom", "c"]), 1)
        .await
        .unwrap_err();
    let report = partial(err);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    let details = report.errors[0]
        .context()
        .and_then(|c| c.details.clone())
        .unwrap_or_default();
    assert!(details.contains("storage exploded"), "{details}");

    // The only permit must be free again.
    let n = tokio::time::timeout(
        Duration::from_secs(2),
        h.engine.reconcile_batch(batch(&["d"]), 1),
    )
    .await
    .expect("permit leaked")
    .unwrap();
    assert_eq!(n, 1);
}

#[tokio::test]
async fn test_record_without_guid_is_a_validation_failure() {
    let h = simple();
    let err = h
        .engine
        .reconcile_batch(vec![RemoteEpisode::new("", 1), remote("a", "a")], 1)
        .await
        .unwrap_err();
    let report = partial(err);
    assert_eq!(report.succeeded, 1);
    assert!(matches!(report.errors[0], Error::Validation { .. }));
}

#[tokio::test]
async fn test_racing_creates_of_one_guid_converge_on_one_row() {
    let h = harness(
        InstrumentedRepo::new().with_delay(Duration::from_millis(20)),
        FakeFetcher::new(),
        SyncConfig::default(),
    );
    let other = h.engine.clone();
    let (x, y) = tokio::join!(
        h.engine.reconcile_batch(vec![remote("a", "x")], 1),
        other.reconcile_batch(vec![remote("a", "y")], 1),
    );
    assert_eq!(x.unwrap(), 1);
    assert_eq!(y.unwrap(), 1);
    assert_eq!(h.repo.inner.len(), 1);
}

#[tokio::test]
async fn test_play_state_written_during_a_sync_survives_it() {
    let h = harness(
        InstrumentedRepo::new().with_delay(Duration::from_millis(50)),
        FakeFetcher::new(),
        SyncConfig::default(),
    );
    h.engine
        .reconcile_batch(vec![remote("a", "t1")], 1)
        .await
        .unwrap();
    let a = h.engine.get_by_guid("a").await.unwrap();

    let syncing = h.engine.clone();
    let sync = tokio::spawn(async move { syncing.reconcile_batch(vec![remote("a", "t2")], 1).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.engine
        .update_play_state(
            a.id,
            PlayState {
                played: true,
                position_secs: 99,
            },
        )
        .await
        .unwrap();
    assert_eq!(sync.await.unwrap().unwrap(), 1);

    let stored = h
        .repo
        .inner
        .snapshot()
        .into_iter()
        .find(|e| e.guid == "a")
        .unwrap();
    assert_eq!(stored.title, "t2");
    assert!(stored.played);
    assert_eq!(stored.play_position_secs, 99);
}

#[tokio::test]
async fn test_entity_reads_are_cached_until_a_write() {
    let h = simple();
    h.engine.reconcile_batch(batch(&["a"]), 1).await.unwrap();

    let reads = h.repo.reads();
    let a = h.engine.get_by_guid("a").await.unwrap();
    h.engine.get_by_guid("a").await.unwrap();
    h.engine.get_by_id(a.id).await.unwrap();
    h.engine.get_by_id(a.id).await.unwrap();
    assert_eq!(h.repo.reads(), reads + 2);

    h.engine
        .reconcile_batch(vec![remote("a", "renamed")], 1)
        .await
        .unwrap();
    assert_eq!(h.engine.get_by_guid("a").await.unwrap().title, "renamed");
    assert_eq!(h.engine.get_by_id(a.id).await.unwrap().title, "renamed");
}

#[tokio::test]
async fn test_not_found_is_never_cached() {
    let h = simple();
    let reads = h.repo.reads();
    assert!(h.engine.get_by_guid("zz").await.unwrap_err().is_not_found());
    assert!(h.engine.get_by_guid("zz").await.unwrap_err().is_not_found());
    assert_eq!(h.repo.reads(), reads + 2);

    h.engine.reconcile_batch(batch(&["zz"]), 1).await.unwrap();
    assert_eq!(h.engine.get_by_guid("zz").await.unwrap().guid, "zz");
}

#[tokio::test]
async fn test_list_caches_are_invalidated_by_batches() {
    let h = simple();
    h.engine.reconcile_batch(batch(&["a", "b"]), 1).await.unwrap();

    assert_eq!(h.engine.list_by_podcast(1, 1, 10).await.unwrap().total, 2);
    assert_eq!(h.engine.list_recent(10).await.unwrap().len(), 2);
    let reads = h.repo.reads();
    h.engine.list_by_podcast(1, 1, 10).await.unwrap();
    h.engine.list_recent(10).await.unwrap();
    assert_eq!(h.repo.reads(), reads);

    h.engine.reconcile_batch(batch(&["c"]), 1).await.unwrap();
    assert_eq!(h.engine.list_by_podcast(1, 1, 10).await.unwrap().total, 3);
    assert_eq!(h.engine.list_recent(10).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_moving_an_episode_invalidates_the_old_podcast_listing() {
    let h = simple();
    h.engine.reconcile_batch(batch(&["a"]), 1).await.unwrap();
    assert_eq!(h.engine.list_by_podcast(1, 1, 10).await.unwrap().total, 1);

    h.engine.reconcile_batch(batch(&["a"]), 2).await.unwrap();
    assert_eq!(h.engine.list_by_podcast(1, 1, 10).await.unwrap().total, 0);
    assert_eq!(h.engine.list_by_podcast(2, 1, 10).await.unwrap().total, 1);
}

#[tokio::test]
async fn test_read_inputs_are_validated() {
    let h = simple();
    assert!(matches!(
        h.engine.get_by_guid(" ").await,
        Err(Error::Validation { .. })
    ));
    assert!(matches!(h.engine.get_by_id(0).await, Err(Error::Validation { .. })));
    assert!(matches!(
        h.engine.list_by_podcast(1, 0, 10).await,
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        h.engine.list_by_podcast(1, 1, 0).await,
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        h.engine.list_by_podcast(1, 1, 1000).await,
        Err(Error::Validation { .. })
    ));
    assert!(matches!(h.engine.list_recent(0).await, Err(Error::Validation { .. })));
    assert_eq!(h.repo.reads(), 0);
}

#[tokio::test]
async fn test_remote_wins_policy_resets_play_state() {
    let h = harness(
        InstrumentedRepo::new(),
        FakeFetcher::new(),
        SyncConfig::default().with_policy(ReconcilePolicy::remote_wins()),
    );
    h.engine.reconcile_batch(batch(&["a"]), 1).await.unwrap();
    let a = h.engine.get_by_guid("a").await.unwrap();
    h.engine
        .update_play_state(
            a.id,
            PlayState {
                played: true,
                position_secs: 30,
            },
        )
        .await
        .unwrap();
    h.engine.reconcile_batch(batch(&["a"]), 1).await.unwrap();
    let a = h.engine.get_by_guid("a").await.unwrap();
    assert!(!a.played);
    assert_eq!(a.play_position_secs, 0);
}

#[tokio::test]
async fn test_delete_invalidates_entity_and_lists() {
    let h = simple();
    h.engine.reconcile_batch(batch(&["a", "b"]), 1).await.unwrap();
    let a = h.engine.get_by_guid("a").await.unwrap();
    assert_eq!(h.engine.list_by_podcast(1, 1, 10).await.unwrap().total, 2);

    h.engine.delete(a.id).await.unwrap();
    assert!(h.engine.get_by_id(a.id).await.unwrap_err().is_not_found());
    assert!(h.engine.get_by_guid("a").await.unwrap_err().is_not_found());
    assert_eq!(h.engine.list_by_podcast(1, 1, 10).await.unwrap().total, 1);
    assert!(h.engine.delete(a.id).await.unwrap_err().is_not_found());
    assert!(h
        .engine
        .update_play_state(a.id, PlayState::default())
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_fetch_and_sync_returns_before_reconciliation() {
    let h = harness(
        InstrumentedRepo::new().with_delay(Duration::from_millis(50)),
        FakeFetcher::new().with_page(900, batch(&["a", "b", "c"])),
        SyncConfig::default(),
    );
    let fetched = h.engine.fetch_and_sync(900, 1, 10).await.unwrap();
    assert_eq!(fetched.len(), 3);
    assert_eq!(h.repo.inner.len(), 0);

    let repo = h.repo.clone();
    assert!(eventually(Duration::from_secs(2), || repo.inner.len() == 3).await);
    let engine = h.engine.clone();
    assert!(eventually(Duration::from_secs(1), || engine.background_in_flight() == 0).await);
}

#[tokio::test]
async fn test_fetch_and_reconcile_blocks_and_reports() {
    let h = harness(
        InstrumentedRepo::new().failing_on("b"),
        FakeFetcher::new().with_page(900, batch(&["a", "b"])),
        SyncConfig::default(),
    );
    let report = partial(h.engine.fetch_and_reconcile(900, 1, 10).await.unwrap_err());
    assert_eq!((report.succeeded, report.failed), (1, 1));
}

#[tokio::test]
async fn test_fetch_limit_is_validated_before_remote_call() {
    let h = simple();
    assert!(matches!(
        h.engine.fetch_and_sync(1, 1, 0).await,
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        h.engine.fetch_and_sync(1, 1, 1_000_000).await,
        Err(Error::Validation { .. })
    ));
    assert_eq!(h.fetcher.calls(), 0);
}

#[tokio::test]
async fn test_remote_failure_is_returned_and_nothing_is_scheduled() {
    let h = harness(
        InstrumentedRepo::new(),
        FakeFetcher::new().failing(503),
        SyncConfig::default(),
    );
    let err = h.engine.fetch_and_sync(1, 1, 10).await.unwrap_err();
    assert!(matches!(err, Error::Remote { status: Some(503), .. }));
    assert!(err.is_retryable());
    assert_eq!(h.engine.background_in_flight(), 0);
}

#[tokio::test]
async fn test_background_sync_is_abandoned_after_its_timeout() {
    let h = harness(
        InstrumentedRepo::new().with_delay(Duration::from_millis(200)),
        FakeFetcher::new().with_page(900, batch(&["a"])),
        SyncConfig::default().with_background_timeout(Duration::from_millis(30)),
    );
    h.engine.fetch_and_sync(900, 1, 10).await.unwrap();
    let engine = h.engine.clone();
    assert!(eventually(Duration::from_secs(2), || engine.background_in_flight() == 0).await);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(h.repo.inner.len(), 0);
}

#[tokio::test]
async fn test_shutdown_waits_for_quick_syncs() {
    let h = harness(
        InstrumentedRepo::new().with_delay(Duration::from_millis(10)),
        FakeFetcher::new().with_page(900, batch(&["a", "b"])),
        SyncConfig::default(),
    );
    h.engine.fetch_and_sync(900, 1, 10).await.unwrap();
    assert!(h.engine.shutdown(Duration::from_secs(2)).await);
    assert_eq!(h.repo.inner.len(), 2);
}

#[tokio::test]
async fn test_shutdown_cancels_syncs_past_grace() {
    let h = harness(
        InstrumentedRepo::new().with_delay(Duration::from_millis(300)),
        FakeFetcher::new().with_page(900, batch(&["a", "b"])),
        SyncConfig::default(),
    );
    h.engine.fetch_and_sync(900, 1, 10).await.unwrap();
    assert!(!h.engine.shutdown(Duration::from_millis(20)).await);
    assert_eq!(h.engine.background_in_flight(), 0);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.repo.inner.len(), 0);
}

#[tokio::test]
async fn test_no_background_sync_after_shutdown() {
    let h = harness(
        InstrumentedRepo::new(),
        FakeFetcher::new().with_page(900, batch(&["a"])),
        SyncConfig::default(),
    );
    assert!(h.engine.shutdown(Duration::from_millis(10)).await);
    let fetched = h.engine.fetch_and_sync(900, 1, 10).await.unwrap();
    assert_eq!(fetched.len(), 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.repo.inner.len(), 0);
    assert_eq!(h.engine.background_in_flight(), 0);
}
