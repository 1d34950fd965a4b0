use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures::future::BoxFuture;
use futures::FutureExt;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use tower::ServiceExt;

use mssql_exporter::connection::{Connector, Session};
use mssql_exporter::encoding::text::CONTENT_TYPE;
use mssql_exporter::error::{ConnectionError, QueryError};
use mssql_exporter::exporter::{Exporter, Exposition};
use mssql_exporter::row;
use mssql_exporter::row::Row;
use mssql_exporter::server::{router, ERROR_HEADER};

#[derive(Debug, Clone)]
enum Reply {
    Rows(Vec<Row>),
    Fail(&'static str),
    Panic,
}

/// Query text to reply. Queries without a scripted reply return no rows.
type Script = Arc<Mutex<HashMap<String, Reply>>>;

#[derive(Debug)]
struct ScriptedSession {
    script: Script,
}

impl Session for ScriptedSession {
    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, Result<Vec<Row>, QueryError>> {
        let reply = self.script.lock().get(query).cloned();
        async move {
            match reply {
                Some(Reply::Rows(rows)) => Ok(rows),
                Some(Reply::Fail(message)) => Err(QueryError::Failed(message.to_string())),
                Some(Reply::Panic) => todo!("not yet implemented for SSVariant"),
                None => Ok(vec![]),
            }
        }
        .boxed()
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), QueryError>> {
        async { Ok(()) }.boxed()
    }
}

#[derive(Debug)]
struct ScriptedConnector {
    script: Script,
    reachable: Arc<AtomicBool>,
}

impl Connector for ScriptedConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Session>, ConnectionError>> {
        async move {
            if !self.reachable.load(Ordering::SeqCst) {
                return Err(ConnectionError::Failed(
                    "Failed to connect to 10.0.0.1:1433 - connect ECONNREFUSED".to_string(),
                ));
            }
            let session: Box<dyn Session> = Box::new(ScriptedSession {
                script: self.script.clone(),
            });
            Ok(session)
        }
        .boxed()
    }

    fn target(&self) -> String {
        "monitor@10.0.0.1:1433".to_string()
    }
}

struct Fixture {
    exporter: Arc<Exporter>,
    script: Script,
    reachable: Arc<AtomicBool>,
}

impl Fixture {
    fn new() -> Self {
        let script = Script::default();
        let reachable = Arc::new(AtomicBool::new(true));
        let connector = ScriptedConnector {
            script: script.clone(),
            reachable: reachable.clone(),
        };
        let exporter = Exporter::new(Box::new(connector)).unwrap();
        Self {
            exporter: Arc::new(exporter),
            script,
            reachable,
        }
    }

    fn reply(&self, collector: &str, reply: Reply) {
        let query = self
            .exporter
            .collectors()
            .get(collector)
            .unwrap_or_else(|| panic!("no collector {collector}"))
            .query()
            .to_string();
        self.script.lock().insert(query, reply);
    }

    /// Rows shaped like those of a healthy instance with one user database.
    fn healthy(&self) {
        self.reply("mssql_up", Reply::Rows(vec![row![1]]));
        self.reply(
            "mssql_instance_local_time",
            Reply::Rows(vec![row![1_760_000_000]]),
        );
        self.reply(
            "mssql_os_sys_memory",
            Reply::Rows(vec![row![16_776_740, 9_211_044, 19_398_180, 11_512_316]]),
        );
        self.reply(
            "mssql_connections",
            Reply::Rows(vec![row!["master", 4], row!["sales", 17]]),
        );
        self.reply(
            "mssql_database_state",
            Reply::Rows(vec![row!["master", 0], row!["sales", 0]]),
        );
        self.reply(
            "mssql_log_growths",
            Reply::Rows(vec![row!["master", 0], row!["sales", 3]]),
        );
    }

    async fn get(&self, uri: &str) -> axum::response::Response {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        router(self.exporter.clone()).oneshot(request).await.unwrap()
    }
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Value of the first sample line starting with `prefix`.
fn sample(body: &str, prefix: &str) -> Option<f64> {
    body.lines()
        .filter(|line| !line.starts_with('#'))
        .find(|line| line.starts_with(prefix))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}

fn metric_names(body: &str) -> Vec<&str> {
    body.lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split(['{', ' ']).next())
        .collect()
}

#[tokio::test]
async fn healthy_instance() {
    let fixture = Fixture::new();
    fixture.healthy();

    let response = fixture.get("/metrics").await;
    assert_eq!(StatusCode::OK, response.status());
    assert_eq!(CONTENT_TYPE, response.headers()[header::CONTENT_TYPE]);
    assert!(response.headers().get(ERROR_HEADER).is_none());

    let body = body_string(response).await;
    assert_eq!(Some(1.0), sample(&body, "mssql_up "));
    assert!(sample(&body, "mssql_instance_local_time ").unwrap() > 0.0);
    assert!(sample(&body, "mssql_total_physical_memory_kb ").unwrap() > 0.0);
}

#[tokio::test]
async fn user_database_samples() {
    let fixture = Fixture::new();
    fixture.healthy();

    let body = body_string(fixture.get("/metrics").await).await;
    assert!(body.contains("mssql_database_state{database=\"sales\"} 0\n"));
    assert!(body.contains("mssql_connections{database=\"sales\",state=\"current\"} 17\n"));
    assert!(body.contains("mssql_log_growths{database=\"sales\"} 3\n"));
}

#[tokio::test]
async fn unreachable_instance_serves_liveness_only() {
    let fixture = Fixture::new();
    fixture.healthy();

    // A successful scrape first, so that other instruments hold samples.
    let body = body_string(fixture.get("/metrics").await).await;
    assert_eq!(Some(1.0), sample(&body, "mssql_up "));

    fixture.reachable.store(false, Ordering::SeqCst);
    let response = fixture.get("/metrics").await;
    assert_eq!(StatusCode::OK, response.status());
    let error = response.headers()[ERROR_HEADER].to_str().unwrap().to_string();
    assert!(error.contains("ECONNREFUSED"), "{error}");

    let body = body_string(response).await;
    assert_eq!(vec!["mssql_up"], metric_names(&body));
    assert_eq!(Some(0.0), sample(&body, "mssql_up "));
}

#[tokio::test]
async fn failed_query_keeps_previous_samples() {
    let fixture = Fixture::new();
    fixture.healthy();
    fixture.get("/metrics").await;

    fixture.reply("mssql_database_state", Reply::Fail("Lock request time out period exceeded."));
    fixture.reply("mssql_log_growths", Reply::Rows(vec![row!["master", 0], row!["sales", 4]]));

    let response = fixture.get("/metrics").await;
    assert_eq!(StatusCode::OK, response.status());
    assert!(response.headers().get(ERROR_HEADER).is_none());
    let body = body_string(response).await;
    assert!(body.contains("mssql_database_state{database=\"sales\"} 0\n"));
    assert!(body.contains("mssql_log_growths{database=\"sales\"} 4\n"));
}

#[tokio::test]
async fn failing_collectors_are_isolated() {
    let fixture = Fixture::new();
    fixture.healthy();
    fixture.reply("mssql_product_version", Reply::Fail("Invalid object name."));
    // Mapping failure: the database name is missing.
    fixture.reply("mssql_connections", Reply::Rows(vec![row![17]]));

    let body = body_string(fixture.get("/metrics").await).await;
    assert_eq!(Some(1.0), sample(&body, "mssql_up "));
    assert!(body.contains("mssql_database_state{database=\"sales\"} 0\n"));
    assert!(body.contains("mssql_log_growths{database=\"sales\"} 3\n"));
    assert!(!body.contains("mssql_connections{"));
}

#[tokio::test]
async fn driver_panic_does_not_abort_scrape() {
    let fixture = Fixture::new();
    fixture.healthy();
    fixture.reply("mssql_product_version", Reply::Panic);

    let response = fixture.get("/metrics").await;
    assert_eq!(StatusCode::OK, response.status());
    assert!(response.headers().get(ERROR_HEADER).is_none());

    let body = body_string(response).await;
    assert_eq!(Some(1.0), sample(&body, "mssql_up "));
    assert_eq!(Some(0.0), sample(&body, "mssql_product_version "));
    assert!(sample(&body, "mssql_instance_local_time ").unwrap() > 0.0);
    assert!(body.contains("mssql_log_growths{database=\"sales\"} 3\n"));
}

#[tokio::test]
async fn zero_rows_leave_samples_untouched() {
    let fixture = Fixture::new();
    fixture.healthy();
    fixture.get("/metrics").await;

    fixture.reply("mssql_database_state", Reply::Rows(vec![]));
    let body = body_string(fixture.get("/metrics").await).await;
    assert!(body.contains("mssql_database_state{database=\"master\"} 0\n"));
    assert!(body.contains("mssql_database_state{database=\"sales\"} 0\n"));
}

#[tokio::test]
async fn repeated_labels_are_overwritten() {
    let fixture = Fixture::new();
    fixture.healthy();
    fixture.reply(
        "mssql_log_growths",
        Reply::Rows(vec![row!["sales", 3], row!["sales", 5]]),
    );

    let body = body_string(fixture.get("/metrics").await).await;
    let lines: Vec<_> = body
        .lines()
        .filter(|line| line.starts_with("mssql_log_growths{database=\"sales\"}"))
        .collect();
    assert_eq!(vec!["mssql_log_growths{database=\"sales\"} 5"], lines);
}

#[tokio::test]
async fn serialization_is_idempotent() {
    let fixture = Fixture::new();
    fixture.healthy();
    fixture.exporter.scrape().await.unwrap();

    let mut first = String::new();
    let mut second = String::new();
    mssql_exporter::encoding::text::encode(&mut first, fixture.exporter.registry()).unwrap();
    mssql_exporter::encoding::text::encode(&mut second, fixture.exporter.registry()).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn scrape_reports_degraded_exposition() {
    let fixture = Fixture::new();
    fixture.reachable.store(false, Ordering::SeqCst);

    match fixture.exporter.scrape().await.unwrap() {
        Exposition::Degraded { body, error } => {
            assert_eq!("# HELP mssql_up UP Status\n# TYPE mssql_up gauge\nmssql_up 0\n", body);
            assert!(!error.is_empty());
        }
        other => panic!("expected a degraded exposition, got {other:?}"),
    }
}

#[tokio::test]
async fn root_redirects_to_metrics() {
    let fixture = Fixture::new();
    let response = fixture.get("/").await;
    assert!(response.status().is_redirection());
    assert_eq!("/metrics", response.headers()[header::LOCATION]);
}

#[tokio::test]
async fn version() {
    let fixture = Fixture::new();
    let response = fixture.get("/version").await;
    assert_eq!(StatusCode::OK, response.status());

    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!("mssql-exporter", body["name"]);
    assert_eq!(env!("CARGO_PKG_VERSION"), body["version"]);
}
