//! Harvest Loop: scheduling, exclusion, settings refresh and cancellation.

mod support;

use harvester::{
    CancellationToken, ClientError, HarvestError, Harvester, NegotiationState, ParserRegistry,
};
use harvester_protocol::MonitoredPath;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use support::{cycler_spec, write_file, Call, MockAuthority, Script, Workspace, CYCLER_CSV};

fn harvester(ws: &Workspace, mock: &Arc<MockAuthority>) -> Harvester {
    Harvester::new(ws.config(), mock.clone(), ParserRegistry::with_defaults()).unwrap()
}

fn populate(ws: &Workspace, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| write_file(ws.data.path(), &format!("run/cell_{:02}.csv", i), CYCLER_CSV))
        .collect()
}

#[tokio::test]
async fn test_cycle_negotiates_matching_files() {
    let ws = Workspace::new();
    let csv = populate(&ws, 2);
    write_file(ws.data.path(), "run/notes.txt", "not a table");
    write_file(ws.data.path(), "run/.partial.csv", CYCLER_CSV);

    let mut settings = ws.settings();
    settings.monitored_paths = vec![ws.monitored("1").with_regex(r"\.csv$")];
    let mock = Arc::new(MockAuthority::new(Script {
        settings,
        ..Default::default()
    }));
    let harvester = harvester(&ws, &mock);

    let report = harvester.run_cycle(&CancellationToken::new()).await;

    assert!(report.settings_refreshed);
    assert_eq!(report.files_seen, 2);
    assert_eq!(report.count(NegotiationState::Skipped), 2);
    assert_eq!(report.failures(), 0);
    assert_eq!(mock.size_reports(), 2);
    assert!(ws.config().settings_cache_path().is_file());

    let tracked = harvester.tracked(&csv[0]).await.unwrap();
    assert_eq!(tracked.last_state, Some(NegotiationState::Skipped));
    assert_eq!(tracked.negotiations, 1);
}

#[tokio::test]
async fn test_lock_held_for_every_registry_call() {
    let ws = Workspace::new();
    populate(&ws, 3);
    let mock = Arc::new(MockAuthority::new(Script {
        settings: ws.settings(),
        mapping: Some(cycler_spec()),
        ..Default::default()
    }));
    let harvester = harvester(&ws, &mock);
    mock.probe_locks(harvester.locks().clone());

    let report = harvester.run_cycle(&CancellationToken::new()).await;

    assert_eq!(report.count(NegotiationState::CleanedUp), 3);
    assert!(mock.count(|c| matches!(c, Call::Upload { .. })) > 0);
    assert!(mock.unlocked_calls().is_empty(), "{:?}", mock.unlocked_calls());
    assert_eq!(harvester.locks().held_count(), 0);
}

#[tokio::test]
async fn test_concurrent_cycles_never_double_negotiate() {
    let ws = Workspace::new();
    let files = populate(&ws, 4);
    let mock = Arc::new(MockAuthority::new(Script {
        settings: ws.settings(),
        delay: Duration::from_millis(100),
        ..Default::default()
    }));
    let harvester = harvester(&ws, &mock);
    mock.probe_locks(harvester.locks().clone());

    let cancel = CancellationToken::new();
    let (first, second) = tokio::join!(harvester.run_cycle(&cancel), harvester.run_cycle(&cancel));

    assert_eq!(mock.max_active_per_path(), 1);
    assert!(mock.unlocked_calls().is_empty());
    assert_eq!(
        first.negotiated() + first.busy + second.negotiated() + second.busy,
        2 * files.len()
    );
    assert_eq!(mock.size_reports(), first.negotiated() + second.negotiated());
}

#[tokio::test]
async fn test_harvest_now_subset() {
    let ws = Workspace::new();
    let files = populate(&ws, 3);
    let mock = Arc::new(MockAuthority::new(Script {
        settings: ws.settings(),
        ..Default::default()
    }));
    let harvester = harvester(&ws, &mock);
    let cancel = CancellationToken::new();

    let report = harvester
        .harvest_now(&[files[1].clone()], &cancel)
        .await
        .unwrap();
    assert_eq!(report.files_seen, 1);
    assert_eq!(mock.calls().iter().filter(|c| matches!(c, Call::Size(p) if p.ends_with("cell_01.csv"))).count(), 1);
    assert_eq!(mock.size_reports(), 1);

    let outside = std::env::temp_dir().join("not-monitored").join("x.csv");
    let err = harvester.harvest_now(&[outside], &cancel).await.unwrap_err();
    assert!(matches!(err, HarvestError::PathNotMonitored(_)));
    assert_eq!(mock.size_reports(), 1);

    let all = harvester.harvest_now(&[], &cancel).await.unwrap();
    assert_eq!(all.files_seen, 3);
}

#[tokio::test]
async fn test_harvest_now_subset_entries_share_path_budget() {
    let ws = Workspace::new();
    let files = populate(&ws, 3);
    let mock = Arc::new(MockAuthority::new(Script {
        settings: ws.settings(),
        delay: Duration::from_millis(100),
        ..Default::default()
    }));
    let mut config = ws.config();
    config.max_workers = 4;
    config.per_path_concurrency = 1;
    let harvester = Harvester::new(config, mock.clone(), ParserRegistry::with_defaults()).unwrap();

    let report = harvester
        .harvest_now(&files, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.files_seen, 3);
    assert_eq!(report.count(NegotiationState::Skipped), 3);
    assert_eq!(mock.max_active_total(), 1);
}

#[tokio::test]
async fn test_refresh_failure_falls_back_to_cached_paths() {
    let ws = Workspace::new();
    populate(&ws, 1);
    let mock = Arc::new(MockAuthority::new(Script {
        settings: ws.settings(),
        ..Default::default()
    }));
    harvester(&ws, &mock)
        .run_cycle(&CancellationToken::new())
        .await;

    // Fresh process, registry unreachable.
    let offline = Arc::new(MockAuthority::new(Script {
        fetch_error: Some(ClientError::Transient("connection refused".into())),
        ..Default::default()
    }));
    let harvester = harvester(&ws, &offline);
    assert_eq!(harvester.settings().await.monitored_paths().len(), 1);

    let report = harvester.run_cycle(&CancellationToken::new()).await;
    assert!(!report.settings_refreshed);
    assert!(!report.is_halted());
    assert_eq!(report.count(NegotiationState::Skipped), 1);
}

#[tokio::test]
async fn test_unauthorized_refresh_halts_cycle() {
    let ws = Workspace::new();
    populate(&ws, 2);
    let mock = Arc::new(MockAuthority::new(Script {
        settings: ws.settings(),
        fetch_error: Some(ClientError::from_status(401, "invalid token")),
        ..Default::default()
    }));
    let harvester = harvester(&ws, &mock);

    let report = harvester.run_cycle(&CancellationToken::new()).await;

    assert!(matches!(report.halted, Some(HarvestError::Authorization(_))));
    assert_eq!(mock.size_reports(), 0);
}

#[tokio::test]
async fn test_unauthorized_negotiation_stops_scheduling() {
    let ws = Workspace::new();
    populate(&ws, 5);
    let mock = Arc::new(MockAuthority::new(Script {
        settings: ws.settings(),
        size_error: Some(ClientError::from_status(403, "revoked")),
        ..Default::default()
    }));
    let mut config = ws.config();
    config.max_workers = 1;
    config.per_path_concurrency = 1;
    let harvester = Harvester::new(config, mock.clone(), ParserRegistry::with_defaults()).unwrap();

    let report = harvester.run_cycle(&CancellationToken::new()).await;

    assert!(report.is_halted());
    assert!(mock.size_reports() < 5);
    assert_eq!(harvester.locks().held_count(), 0);
}

#[tokio::test]
async fn test_scan_errors_reported_and_cycle_continues() {
    let ws = Workspace::new();
    populate(&ws, 1);
    let mut settings = ws.settings();
    let missing = ws.data.path().join("gone");
    settings
        .monitored_paths
        .insert(0, MonitoredPath::new("9", missing.to_string_lossy()));
    let mock = Arc::new(MockAuthority::new(Script {
        settings,
        ..Default::default()
    }));
    let harvester = harvester(&ws, &mock);

    let report = harvester.run_cycle(&CancellationToken::new()).await;

    assert_eq!(report.scan_errors, 1);
    assert_eq!(mock.count(|c| matches!(c, Call::Error(..))), 1);
    assert_eq!(report.count(NegotiationState::Skipped), 1);
}

#[tokio::test]
async fn test_deleted_files_forgotten() {
    let ws = Workspace::new();
    let files = populate(&ws, 2);
    let mock = Arc::new(MockAuthority::new(Script {
        settings: ws.settings(),
        ..Default::default()
    }));
    let harvester = harvester(&ws, &mock);
    let cancel = CancellationToken::new();

    harvester.run_cycle(&cancel).await;
    assert!(harvester.tracked(&files[1]).await.is_some());

    std::fs::remove_file(&files[1]).unwrap();
    harvester.run_cycle(&cancel).await;
    assert!(harvester.tracked(&files[1]).await.is_none());
    assert_eq!(harvester.tracked(&files[0]).await.unwrap().negotiations, 2);
}

#[tokio::test]
async fn test_cancelled_cycle_starts_no_negotiations() {
    let ws = Workspace::new();
    populate(&ws, 3);
    let mock = Arc::new(MockAuthority::new(Script {
        settings: ws.settings(),
        ..Default::default()
    }));
    let harvester = harvester(&ws, &mock);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = harvester.run_cycle(&cancel).await;

    assert!(report.cancelled);
    assert_eq!(mock.size_reports(), 0);
}

#[tokio::test]
async fn test_run_forever_stops_on_cancel() {
    let ws = Workspace::new();
    populate(&ws, 1);
    let mock = Arc::new(MockAuthority::new(Script {
        settings: ws.settings(),
        ..Default::default()
    }));
    let harvester = harvester(&ws, &mock);
    let cancel = CancellationToken::new();

    let stopper = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        }
    };
    tokio::time::timeout(
        Duration::from_secs(10),
        async { tokio::join!(harvester.run_forever(cancel.clone()), stopper) },
    )
    .await
    .unwrap();

    assert!(mock.size_reports() >= 1);
}
