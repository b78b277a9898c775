// tests/retriever_assets.rs

mod common;
use crate::common::{age_file, days, init_tracing, with_timeout};

use std::error::Error;
use std::fs;
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::time::SystemTime;

use serde_json::json;
use taskfeed::engine::{ManagerOptions, ResultDispatcher, TaskEvent, TaskManager};
use taskfeed::retriever::{
    AssetOrigin, AssetScope, CacheLocations, DataRetriever, Query, RetrieverEvent, download_asset,
};
use taskfeed::scheduler::{TaskBody, TaskOptions};
use taskfeed::types::StopMode;
use taskfeed_test_utils::builders::payload;
use taskfeed_test_utils::fake_remote::FakeRemoteSource;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

const THUMB: &str = "https://cdn.example.com/thumbs/sh010.jpg?sig=abc";

fn locations(dir: &TempDir) -> CacheLocations {
    CacheLocations::new(dir.path().join("site"), dir.path().join("project"))
}

fn single_worker() -> (TaskManager, ResultDispatcher) {
    TaskManager::start(ManagerOptions {
        workers: 1,
        start_processing: true,
    })
}

fn paused_single_worker() -> (TaskManager, ResultDispatcher) {
    TaskManager::start(ManagerOptions {
        workers: 1,
        start_processing: false,
    })
}

/// Feed dispatcher events to the retriever until it reports something.
async fn next_event(dispatcher: &mut ResultDispatcher, retriever: &mut DataRetriever) -> RetrieverEvent {
    with_timeout(async {
        loop {
            let event = dispatcher.recv().await.expect("dispatcher closed early");
            if let Some(translated) = retriever.handle_event(&event) {
                return translated;
            }
        }
    })
    .await
}

#[tokio::test]
async fn query_results_come_back_as_records() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let records = vec![
        payload(json!({ "id": 1, "code": "sh010" })),
        payload(json!({ "id": 2, "code": "sh020" })),
    ];
    let source = Arc::new(FakeRemoteSource::new().with_query_result("find_shots", records.clone()));

    let (manager, mut dispatcher) = single_worker();
    let mut retriever = DataRetriever::new(manager.clone(), source.clone(), locations(&dir));

    let request = retriever.execute_query(Query::new("find_shots", json!({ "project": 7 })))?;
    let event = next_event(&mut dispatcher, &mut retriever).await;

    assert_eq!(event, RetrieverEvent::QueryCompleted { request, records });
    assert_eq!(source.query_count(), 1);
    assert_eq!(retriever.outstanding(), 0);

    manager.shut_down(StopMode::Drain).await;
    Ok(())
}

#[tokio::test]
async fn failed_query_reports_the_error() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let source = Arc::new(FakeRemoteSource::new());

    let (manager, mut dispatcher) = single_worker();
    let mut retriever = DataRetriever::new(manager.clone(), source, locations(&dir));

    let request = retriever.execute_query(Query::new("unknown_method", json!(null)))?;
    match next_event(&mut dispatcher, &mut retriever).await {
        RetrieverEvent::Failed { request: failed, message } => {
            assert_eq!(failed, request);
            assert!(message.contains("unknown_method"), "message: {message}");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    manager.shut_down(StopMode::Drain).await;
    Ok(())
}

#[tokio::test]
async fn missing_asset_is_downloaded_into_the_cache() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let locs = locations(&dir);
    let source = Arc::new(FakeRemoteSource::new().with_asset(THUMB, b"jpeg bytes"));

    let (manager, mut dispatcher) = single_worker();
    let mut retriever = DataRetriever::new(manager.clone(), source.clone(), locs.clone());

    let request = retriever.request_asset(THUMB, AssetScope::Project)?;
    let event = next_event(&mut dispatcher, &mut retriever).await;

    let expected_path = locs.asset_path(THUMB, AssetScope::Project);
    assert_eq!(
        event,
        RetrieverEvent::AssetReady {
            request,
            url: THUMB.to_string(),
            path: expected_path.clone(),
            origin: AssetOrigin::Download,
        }
    );
    assert_eq!(fs::read(&expected_path)?, b"jpeg bytes");
    assert!(expected_path.extension().is_some_and(|ext| ext == "jpg"));
    assert_eq!(source.fetch_count(), 1);
    assert_eq!(retriever.outstanding(), 0);

    manager.shut_down(StopMode::Drain).await;
    Ok(())
}

#[tokio::test]
async fn cached_asset_is_reused_and_refreshed() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let locs = locations(&dir);
    let source = Arc::new(FakeRemoteSource::new().with_asset(THUMB, b"fresh"));

    // Re-signed URLs map to the same local file.
    let cached = locs.asset_path("https://cdn.example.com/thumbs/sh010.jpg?sig=old", AssetScope::Site);
    fs::create_dir_all(cached.parent().ok_or("asset path has no parent")?)?;
    fs::write(&cached, b"old")?;
    age_file(&cached, days(10));

    let (manager, mut dispatcher) = single_worker();
    let mut retriever = DataRetriever::new(manager.clone(), source.clone(), locs);

    let request = retriever.request_asset(THUMB, AssetScope::Project)?;
    let event = next_event(&mut dispatcher, &mut retriever).await;

    assert_eq!(
        event,
        RetrieverEvent::AssetReady {
            request,
            url: THUMB.to_string(),
            path: cached.clone(),
            origin: AssetOrigin::Cache,
        }
    );

    let age = SystemTime::now().duration_since(fs::metadata(&cached)?.modified()?)?;
    assert!(age < days(1), "mtime was not refreshed");

    manager.shut_down(StopMode::Drain).await;
    while let Some(event) = dispatcher.recv().await {
        assert_eq!(retriever.handle_event(&event), None);
    }
    assert_eq!(source.fetch_count(), 0);
    assert_eq!(fs::read(&cached)?, b"old");
    Ok(())
}

#[tokio::test]
async fn failed_download_without_cache_reports_failure() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let source = Arc::new(FakeRemoteSource::new());
    source.fail_fetches(true);

    let (manager, mut dispatcher) = single_worker();
    let mut retriever = DataRetriever::new(manager.clone(), source, locations(&dir));

    let request = retriever.request_asset(THUMB, AssetScope::Site)?;
    match next_event(&mut dispatcher, &mut retriever).await {
        RetrieverEvent::Failed { request: failed, message } => {
            assert_eq!(failed, request);
            assert!(message.contains("downloading"), "message: {message}");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(retriever.outstanding(), 0);

    manager.shut_down(StopMode::Drain).await;
    Ok(())
}

#[test]
fn download_falls_back_to_a_cached_copy() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let locs = locations(&dir);
    let source = FakeRemoteSource::new();
    source.fail_fetches(true);

    let site_copy = locs.asset_path(THUMB, AssetScope::Site);
    fs::create_dir_all(site_copy.parent().ok_or("asset path has no parent")?)?;
    fs::write(&site_copy, b"site copy")?;

    let path = download_asset(&source, &locs, THUMB, AssetScope::Project)?;
    assert_eq!(path, site_copy);
    assert_eq!(source.fetch_count(), 1);

    fs::remove_file(&site_copy)?;
    assert!(download_asset(&source, &locs, THUMB, AssetScope::Project).is_err());
    Ok(())
}

#[tokio::test]
async fn clear_drops_queued_requests() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let source = Arc::new(
        FakeRemoteSource::new()
            .with_asset(THUMB, b"bytes")
            .with_query_result("find_shots", Vec::new()),
    );

    let (manager, mut dispatcher) = paused_single_worker();
    let mut retriever = DataRetriever::new(manager.clone(), source.clone(), locations(&dir));

    retriever.request_asset(THUMB, AssetScope::Project)?;
    retriever.execute_query(Query::new("find_shots", json!({})))?;
    assert_eq!(retriever.outstanding(), 3);

    retriever.clear();
    assert_eq!(retriever.outstanding(), 0);

    manager.start_processing();
    let request = retriever.execute_query(Query::new("find_shots", json!({})))?;
    let event = next_event(&mut dispatcher, &mut retriever).await;

    assert_eq!(
        event,
        RetrieverEvent::QueryCompleted {
            request,
            records: Vec::new(),
        }
    );
    assert_eq!(source.fetch_count(), 0);
    assert_eq!(source.query_count(), 1);

    manager.shut_down(StopMode::Drain).await;
    Ok(())
}

#[tokio::test]
async fn stopped_asset_request_never_runs() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let source = Arc::new(
        FakeRemoteSource::new()
            .with_asset(THUMB, b"bytes")
            .with_query_result("find_shots", Vec::new()),
    );

    let (manager, mut dispatcher) = paused_single_worker();
    let mut retriever = DataRetriever::new(manager.clone(), source.clone(), locations(&dir));

    let request = retriever.request_asset(THUMB, AssetScope::Project)?;
    retriever.stop_work(request);
    assert_eq!(retriever.outstanding(), 0);

    manager.start_processing();
    let query = retriever.execute_query(Query::new("find_shots", json!({})))?;
    assert_eq!(
        next_event(&mut dispatcher, &mut retriever).await,
        RetrieverEvent::QueryCompleted {
            request: query,
            records: Vec::new(),
        }
    );
    assert_eq!(source.fetch_count(), 0);

    manager.shut_down(StopMode::Drain).await;
    Ok(())
}

#[tokio::test]
async fn stopping_after_an_empty_check_cancels_the_download() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let source = Arc::new(
        FakeRemoteSource::new()
            .with_asset(THUMB, b"bytes")
            .with_query_result("find_shots", Vec::new()),
    );

    let (manager, mut dispatcher) = paused_single_worker();
    let mut retriever = DataRetriever::new(manager.clone(), source.clone(), locations(&dir));

    let request = retriever.request_asset(THUMB, AssetScope::Project)?;

    // Occupies the only worker between the check and the download.
    let (release, gate) = std_mpsc::channel::<()>();
    let blocker = TaskBody::run(move || {
        let _ = gate.recv();
        Ok(json!("blocker"))
    });
    manager.add_task(blocker, TaskOptions::new().priority(40))?;

    manager.start_processing();
    with_timeout(async {
        loop {
            let event = dispatcher.recv().await.expect("dispatcher closed early");
            let is_check = matches!(event, TaskEvent::Completed { id, .. } if id == request);
            assert_eq!(retriever.handle_event(&event), None);
            if is_check {
                break;
            }
        }
    })
    .await;
    assert_eq!(retriever.outstanding(), 2);

    retriever.stop_work(request);
    assert_eq!(retriever.outstanding(), 0);
    release.send(())?;

    let query = retriever.execute_query(Query::new("find_shots", json!({})))?;
    assert_eq!(
        next_event(&mut dispatcher, &mut retriever).await,
        RetrieverEvent::QueryCompleted {
            request: query,
            records: Vec::new(),
        }
    );
    assert_eq!(source.fetch_count(), 0);

    manager.shut_down(StopMode::Drain).await;
    while let Some(event) = dispatcher.recv().await {
        assert_eq!(retriever.handle_event(&event), None);
    }
    Ok(())
}

#[tokio::test]
async fn requests_cancelled_elsewhere_are_pruned() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let source = Arc::new(
        FakeRemoteSource::new()
            .with_asset(THUMB, b"bytes")
            .with_query_result("find_shots", Vec::new()),
    );

    let (manager, _dispatcher) = paused_single_worker();
    let mut retriever = DataRetriever::new(manager.clone(), source, locations(&dir));

    retriever.request_asset(THUMB, AssetScope::Project)?;
    retriever.execute_query(Query::new("find_shots", json!({})))?;

    manager.cancel(retriever.group());
    assert_eq!(retriever.outstanding(), 3);
    assert_eq!(retriever.prune(), 3);
    assert_eq!(retriever.outstanding(), 0);
    assert_eq!(retriever.prune(), 0);

    manager.shut_down(StopMode::Hard).await;
    Ok(())
}

#[tokio::test]
async fn group_finished_prunes_stale_requests() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let source = Arc::new(FakeRemoteSource::new().with_query_result("find_shots", Vec::new()));

    let (manager, mut dispatcher) = paused_single_worker();
    let mut retriever = DataRetriever::new(manager.clone(), source, locations(&dir));

    let stale = retriever.execute_query(Query::new("find_shots", json!({})))?;
    let live = retriever.execute_query(Query::new("find_shots", json!({})))?;
    manager.cancel_task(stale);

    manager.start_processing();
    assert_eq!(
        next_event(&mut dispatcher, &mut retriever).await,
        RetrieverEvent::QueryCompleted {
            request: live,
            records: Vec::new(),
        }
    );
    assert_eq!(retriever.outstanding(), 1);

    let event = with_timeout(dispatcher.recv()).await;
    assert_eq!(
        event,
        Some(TaskEvent::GroupFinished {
            group: retriever.group(),
        })
    );
    assert_eq!(retriever.handle_event(&event.ok_or("dispatcher closed early")?), None);
    assert_eq!(retriever.outstanding(), 0);

    manager.shut_down(StopMode::Drain).await;
    Ok(())
}
