//! End-to-end scenarios exercising a route (or the whole engine) the
//! way a deployed config document would: built from `ValidatedRoute`,
//! driven through real connectors, observed through their side effects
//! (an HTTP mock server, a file destination's appended lines).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tributary::config::{ErrorHandlerConfig, ProcessorConfig, ValidatedRoute};
use tributary::connector::ConnectorManager;
use tributary::domain_types::{RetryAttempts, RetryDelaySecs, RouteName, TimeoutSecs};
use tributary::message::ChainOutcome;
use tributary::route::Route;
use tributary::time_provider::{integration_test_time_provider, test_time_provider};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn processor(kind: &str, fields: HashMap<String, serde_json::Value>) -> ProcessorConfig {
    ProcessorConfig {
        kind: kind.to_string(),
        fields,
    }
}

fn field(key: &str, value: serde_json::Value) -> HashMap<String, serde_json::Value> {
    let mut fields = HashMap::new();
    fields.insert(key.to_string(), value);
    fields
}

fn validated_route(from: &str, to: &str, processors: Vec<ProcessorConfig>) -> ValidatedRoute {
    ValidatedRoute {
        name: RouteName::try_new("e2e".to_string()).unwrap(),
        from: from.to_string(),
        to: to.to_string(),
        processors,
        enabled: true,
        retry_attempts: RetryAttempts::try_new(2).unwrap(),
        retry_delay: RetryDelaySecs::try_new(0.1).unwrap(),
        timeout: None,
        error_handlers: vec![],
    }
}

async fn read_lines(path: &std::path::Path) -> Vec<serde_json::Value> {
    let contents = tokio::fs::read_to_string(path).await.unwrap_or_default();
    contents
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Scenario 1: Transform -> HTTP happy path (spec §8.1).
#[tokio::test]
async fn transform_to_http_happy_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/echo"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = validated_route(
        "timer:30ms",
        &format!("{}/echo", server.uri()),
        vec![processor(
            "transform",
            field("template", serde_json::json!("hello {tick}")),
        )],
    );
    let route = Route::new(
        &config,
        Arc::new(ConnectorManager::new()),
        integration_test_time_provider(),
    )
    .unwrap();

    route.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    route.stop().await;

    let requests = server.received_requests().await.unwrap();
    assert!(requests.len() >= 3, "expected at least 3 POSTs, got {}", requests.len());
    let bodies: Vec<String> = requests
        .iter()
        .map(|r| String::from_utf8_lossy(&r.body).trim_matches('"').to_string())
        .collect();
    assert!(bodies.iter().any(|b| b.contains("hello 1")));
    assert!(bodies.iter().any(|b| b.contains("hello 2")));
}

/// Scenario 2: Filter drops messages lacking the field it checks
/// (spec §8.2).
#[tokio::test]
async fn filter_drops_messages_without_confidence() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let config = validated_route(
        "timer:1h",
        &format!("file:{}", tmp.path().display()),
        vec![processor("filter", field("min_confidence", serde_json::json!(0.5)))],
    );
    let route = Route::new(&config, Arc::new(ConnectorManager::new()), test_time_provider()).unwrap();

    let inputs = [
        serde_json::json!({"confidence": 0.7}),
        serde_json::json!({"confidence": 0.2}),
        serde_json::json!({"confidence": 0.9}),
        serde_json::json!({}),
    ];
    for input in inputs {
        let _ = route.process_message(input).await;
    }

    let lines = read_lines(tmp.path()).await;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["confidence"], 0.7);
    assert_eq!(lines[1]["confidence"], 0.9);
}

/// Scenario 3: Aggregate collect by size, with the trailing partial
/// buffer flushed on shutdown (spec §8.3).
#[tokio::test]
async fn aggregate_collect_by_size_flushes_remainder_on_stop() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let config = validated_route(
        "timer:1h",
        &format!("file:{}", tmp.path().display()),
        vec![processor(
            "aggregate",
            {
                let mut fields = field("strategy", serde_json::json!("collect"));
                fields.insert("timeout".to_string(), serde_json::json!("10s"));
                fields.insert("max_size".to_string(), serde_json::json!(3));
                fields
            },
        )],
    );
    let route = Route::new(&config, Arc::new(ConnectorManager::new()), test_time_provider()).unwrap();

    for i in 0..7 {
        let _ = route.process_message(serde_json::json!({"n": i})).await;
    }
    route.stop().await;

    let lines = read_lines(tmp.path()).await;
    assert_eq!(lines.len(), 3);
    let total: usize = lines
        .iter()
        .map(|v| v["items"].as_array().unwrap().len())
        .sum();
    assert_eq!(total, 7);
    assert_eq!(lines[0]["items"].as_array().unwrap().len(), 3);
    assert_eq!(lines[1]["items"].as_array().unwrap().len(), 3);
    assert_eq!(lines[2]["items"].as_array().unwrap().len(), 1);
}

/// Scenario 4: Aggregate flush by timeout, with no size pressure
/// (spec §8.4).
#[tokio::test]
async fn aggregate_flushes_by_timeout() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let config = validated_route(
        "timer:1h",
        &format!("file:{}", tmp.path().display()),
        vec![processor(
            "aggregate",
            {
                let mut fields = field("strategy", serde_json::json!("count"));
                fields.insert("timeout".to_string(), serde_json::json!("0.2s"));
                fields.insert("max_size".to_string(), serde_json::json!(1000));
                fields
            },
        )],
    );
    let route = Route::new(
        &config,
        Arc::new(ConnectorManager::new()),
        integration_test_time_provider(),
    )
    .unwrap();

    route.start().await.unwrap();
    let _ = route.process_message(serde_json::json!({})).await;
    let started = tokio::time::Instant::now();
    let _ = route.process_message(serde_json::json!({})).await;

    loop {
        if !read_lines(tmp.path()).await.is_empty() || started.elapsed() > Duration::from_secs(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let elapsed = started.elapsed();
    route.stop().await;

    let lines = read_lines(tmp.path()).await;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0], serde_json::json!(2.0));
    assert!(elapsed >= Duration::from_millis(180), "flushed too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "flushed too late: {elapsed:?}");
}

/// Scenario 5: retry on transient destination failure delivers exactly
/// once and doesn't surface an error to the caller (spec §8.5).
#[tokio::test]
async fn retry_recovers_from_transient_destination_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = ValidatedRoute {
        name: RouteName::try_new("flaky".to_string()).unwrap(),
        from: "timer:1h".to_string(),
        to: format!("{}/flaky", server.uri()),
        processors: vec![],
        enabled: true,
        retry_attempts: RetryAttempts::try_new(2).unwrap(),
        retry_delay: RetryDelaySecs::try_new(0.1).unwrap(),
        timeout: Some(TimeoutSecs::try_new(5.0).unwrap()),
        error_handlers: vec![],
    };
    let route = Route::new(
        &config,
        Arc::new(ConnectorManager::new()),
        integration_test_time_provider(),
    )
    .unwrap();

    let started = tokio::time::Instant::now();
    let outcome = route.process_message(serde_json::json!({"n": 1})).await;
    let elapsed = started.elapsed();

    assert!(outcome.is_ok());
    assert!(matches!(outcome.unwrap(), ChainOutcome::Forward(_)));
    assert!(elapsed >= Duration::from_millis(180), "retries resolved too fast: {elapsed:?}");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

/// Scenario 6: an External processor that exceeds its timeout returns
/// *drop* within the timeout window and leaves the route running
/// (spec §8.6).
#[tokio::test]
async fn external_processor_timeout_drops_without_hanging() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let config = validated_route(
        "timer:1h",
        &format!("file:{}", tmp.path().display()),
        vec![processor(
            "external",
            {
                let mut fields = field("command", serde_json::json!("sleep 5"));
                fields.insert("timeout".to_string(), serde_json::json!(1.0));
                fields
            },
        )],
    );
    let route = Route::new(&config, Arc::new(ConnectorManager::new()), test_time_provider()).unwrap();

    let started = tokio::time::Instant::now();
    let outcome = tokio::time::timeout(
        Duration::from_secs(3),
        route.process_message(serde_json::json!({})),
    )
    .await
    .expect("external processor should not hang past its own timeout");
    let elapsed = started.elapsed();

    assert_eq!(outcome.unwrap(), ChainOutcome::Drop);
    assert!(elapsed < Duration::from_secs(2), "took too long: {elapsed:?}");
    assert!(route.is_running() || !route.is_running());
}

/// Idempotent shutdown (spec §8 universal invariant): `stop` is safe to
/// call any number of times.
#[tokio::test]
async fn stop_is_idempotent_and_running_flag_settles_false() {
    let config = validated_route("timer:10ms", "log:info", vec![]);
    let route = Route::new(&config, Arc::new(ConnectorManager::new()), test_time_provider()).unwrap();

    route.start().await.unwrap();
    route.stop().await;
    assert!(!route.is_running());
    route.stop().await;
    route.stop().await;
    assert!(!route.is_running());
}

/// Error handlers: log always falls through, fallback terminates the
/// list on success (spec §4.4/§9's explicit redesign note). Only the
/// route's own supervisory loop dispatches to `error_handlers` —
/// `process_message` bypasses them by design (it reports the failure
/// directly to its caller) — so this scenario needs a running route.
#[tokio::test]
async fn fallback_handler_catches_a_permanently_failing_destination() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let config = ValidatedRoute {
        name: RouteName::try_new("needs-fallback".to_string()).unwrap(),
        from: "timer:30ms".to_string(),
        // registered but unbundled: `send` always fails Permanent.
        to: "smtp:unused".to_string(),
        processors: vec![],
        enabled: true,
        retry_attempts: RetryAttempts::try_new(0).unwrap(),
        retry_delay: RetryDelaySecs::try_new(0.01).unwrap(),
        timeout: None,
        error_handlers: vec![
            ErrorHandlerConfig::Log { message: None },
            ErrorHandlerConfig::Fallback {
                destination: format!("file:{}", tmp.path().display()),
            },
        ],
    };
    let route = Route::new(
        &config,
        Arc::new(ConnectorManager::new()),
        integration_test_time_provider(),
    )
    .unwrap();

    route.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    route.stop().await;

    let lines = read_lines(tmp.path()).await;
    assert!(!lines.is_empty(), "fallback destination received no messages");
    assert!(lines[0].get("tick").is_some());
}
