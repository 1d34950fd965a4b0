//! One pass of every collector over a database session.
//!
//! Collectors run strictly one after another. A failing collector is logged
//! and skipped, its instruments keep whatever samples they held before, and
//! the pass continues with the next collector.
//!
//! A query that times out or panics leaves the session unusable. The session
//! is dropped and the next collector runs on a fresh one. If no fresh session
//! can be opened, the remaining collectors are skipped.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{debug, error, trace, warn};

use crate::collector::CollectorRegistry;
use crate::connection::{ConnectionManager, Session};
use crate::error::QueryError;
use crate::row::Row;

/// What happened to one collector during a scrape.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectorStatus {
    /// The mapping ran over this many rows.
    Updated {
        /// Rows returned by the query.
        rows: usize,
    },
    /// The query returned no rows, the mapping was skipped.
    Empty,
    /// The query failed, timed out or panicked.
    QueryFailed(String),
    /// The mapping rejected the rows.
    MappingFailed(String),
    /// The query was not run because no usable session was left.
    Skipped(String),
}

impl CollectorStatus {
    /// Whether this status is a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CollectorStatus::QueryFailed(_)
                | CollectorStatus::MappingFailed(_)
                | CollectorStatus::Skipped(_)
        )
    }
}

/// Per-collector report.
#[derive(Debug, Clone)]
pub struct CollectorReport {
    /// Collector name.
    pub collector: String,
    /// Outcome.
    pub status: CollectorStatus,
    /// Time spent on query and mapping.
    pub elapsed: Duration,
}

/// Result of a scrape pass. A pass always completes, individual collectors
/// may have failed.
#[derive(Debug, Clone, Default)]
pub struct ScrapeOutcome {
    reports: Vec<CollectorReport>,
    reconnects: usize,
}

impl ScrapeOutcome {
    /// One report per collector, in execution order.
    pub fn reports(&self) -> &[CollectorReport] {
        &self.reports
    }

    /// Reports of failed collectors.
    pub fn failures(&self) -> impl Iterator<Item = &CollectorReport> {
        self.reports.iter().filter(|r| r.status.is_failure())
    }

    /// Whether no collector failed.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Sessions opened during the pass to replace a broken one.
    pub fn reconnects(&self) -> usize {
        self.reconnects
    }
}

/// Run every collector in registration order, starting on `session`.
///
/// The session in use at the end of the pass is released through
/// `connections`.
pub async fn run(
    session: Box<dyn Session>,
    connections: &ConnectionManager,
    collectors: &CollectorRegistry,
) -> ScrapeOutcome {
    let mut outcome = ScrapeOutcome::default();
    let mut session = Some(session);
    let mut lost: Option<String> = None;

    for (name, collector) in collectors.iter() {
        let start = Instant::now();

        if session.is_none() && lost.is_none() {
            match connections.acquire().await {
                Ok(fresh) => {
                    outcome.reconnects += 1;
                    session = Some(fresh);
                }
                Err(e) => lost = Some(e.to_string()),
            }
        }

        let result = match session.as_mut() {
            Some(current) => {
                debug!(collector = name, "executing query");
                Ok(execute(current.as_mut(), collector.query()).await)
            }
            None => Err(lost.clone().unwrap_or_default()),
        };

        let status = match result {
            Err(reason) => {
                error!(collector = name, error = %reason, "skipped, no session");
                CollectorStatus::Skipped(reason)
            }
            Ok(Err(e)) => {
                error!(collector = name, error = %e, "query failed");
                if e.breaks_session() {
                    warn!(collector = name, "discarding session");
                    session = None;
                }
                CollectorStatus::QueryFailed(e.to_string())
            }
            Ok(Ok(rows)) if rows.is_empty() => {
                trace!(collector = name, "no rows");
                CollectorStatus::Empty
            }
            Ok(Ok(rows)) => match collector.collect(&rows) {
                Ok(()) => {
                    trace!(collector = name, rows = rows.len(), "collected");
                    CollectorStatus::Updated { rows: rows.len() }
                }
                Err(e) => {
                    error!(collector = name, error = %e, "failed to map rows");
                    CollectorStatus::MappingFailed(e.to_string())
                }
            },
        };

        let elapsed = start.elapsed();
        debug!(collector = name, elapsed_ms = elapsed.as_millis() as u64, "done");
        outcome.reports.push(CollectorReport {
            collector: name.to_string(),
            status,
            elapsed,
        });
    }

    if let Some(session) = session {
        connections.release(session).await;
    }
    outcome
}

/// Run one query, turning a driver panic into a [`QueryError`].
async fn execute(
    session: &mut dyn Session,
    query: &str,
) -> Result<Vec<Row>, QueryError> {
    AssertUnwindSafe(session.execute(query))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(QueryError::Panicked(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Collector;
    use crate::connection::Connector;
    use crate::error::{ConnectionError, MappingError};
    use crate::metrics::family::Family;
    use crate::registry::Registry;
    use crate::row::{self, Row};
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    enum Reply {
        Rows(Vec<Row>),
        Fail(&'static str),
        Timeout,
        Panic,
    }

    #[derive(Debug, Default)]
    struct Script {
        replies: HashMap<String, Reply>,
        /// `(session number, query)` in execution order.
        executed: Vec<(usize, String)>,
        opened: usize,
        closed: usize,
        refuse: bool,
    }

    #[derive(Debug)]
    struct Scripted {
        id: usize,
        script: Arc<Mutex<Script>>,
    }

    impl Session for Scripted {
        fn execute<'a>(
            &'a mut self,
            query: &'a str,
        ) -> BoxFuture<'a, Result<Vec<Row>, QueryError>> {
            let reply = {
                let mut script = self.script.lock();
                script.executed.push((self.id, query.to_string()));
                script.replies.get(query).cloned()
            };
            async move {
                match reply {
                    Some(Reply::Rows(rows)) => Ok(rows),
                    Some(Reply::Fail(e)) => Err(QueryError::Failed(e.to_string())),
                    Some(Reply::Timeout) => Err(QueryError::Timeout(Duration::from_secs(15))),
                    Some(Reply::Panic) => todo!("not yet implemented for SSVariant"),
                    None => Ok(vec![]),
                }
            }
            .boxed()
        }

        fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), QueryError>> {
            self.script.lock().closed += 1;
            async { Ok(()) }.boxed()
        }
    }

    #[derive(Debug, Clone, Default)]
    struct ScriptedConnector {
        script: Arc<Mutex<Script>>,
    }

    impl ScriptedConnector {
        fn reply(&self, query: &str, reply: Reply) {
            self.script.lock().replies.insert(query.to_string(), reply);
        }

        fn open(&self) -> Result<Box<dyn Session>, ConnectionError> {
            let mut script = self.script.lock();
            if script.refuse {
                return Err(ConnectionError::Failed("Login failed".to_string()));
            }
            script.opened += 1;
            Ok(Box::new(Scripted {
                id: script.opened,
                script: self.script.clone(),
            }))
        }

        fn executed(&self) -> Vec<(usize, String)> {
            self.script.lock().executed.clone()
        }
    }

    impl Connector for ScriptedConnector {
        fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Session>, ConnectionError>> {
            let session = self.open();
            async move { session }.boxed()
        }
    }

    #[derive(Debug)]
    struct Single {
        name: &'static str,
        query: &'static str,
        family: Family,
    }

    impl Collector for Single {
        fn name(&self) -> &str {
            self.name
        }

        fn query(&self) -> &str {
            self.query
        }

        fn instruments(&self) -> Vec<&Family> {
            vec![&self.family]
        }

        fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
            let value = row::first(rows)?.value(0)?;
            self.family.set(&[], value)?;
            Ok(())
        }
    }

    fn setup(
        names: &[&'static str],
    ) -> (Registry, CollectorRegistry, ScriptedConnector, ConnectionManager) {
        let mut registry = Registry::default();
        let mut collectors = CollectorRegistry::default();
        for &name in names {
            let family = registry.register(name, "help", &[]).unwrap();
            collectors
                .register(Box::new(Single {
                    name,
                    query: name,
                    family,
                }))
                .unwrap();
        }
        let connector = ScriptedConnector::default();
        let manager = ConnectionManager::new(Box::new(connector.clone()));
        (registry, collectors, connector, manager)
    }

    async fn scrape(
        connector: &ScriptedConnector,
        manager: &ConnectionManager,
        collectors: &CollectorRegistry,
    ) -> ScrapeOutcome {
        let session = connector.open().unwrap();
        run(session, manager, collectors).await
    }

    fn statuses(outcome: &ScrapeOutcome) -> Vec<CollectorStatus> {
        outcome.reports().iter().map(|r| r.status.clone()).collect()
    }

    #[tokio::test]
    async fn runs_in_order_and_isolates_failures() {
        let (registry, collectors, connector, manager) = setup(&["a", "b", "c", "d"]);
        connector.reply("a", Reply::Rows(vec![crate::row![1]]));
        connector.reply("b", Reply::Fail("Invalid object name"));
        connector.reply("c", Reply::Rows(vec![crate::row!["not a number"]]));
        connector.reply("d", Reply::Rows(vec![crate::row![4]]));

        let outcome = scrape(&connector, &manager, &collectors).await;

        let queries: Vec<_> = connector.executed().into_iter().map(|(_, q)| q).collect();
        assert_eq!(vec!["a", "b", "c", "d"], queries);
        let statuses = statuses(&outcome);
        assert_eq!(CollectorStatus::Updated { rows: 1 }, statuses[0]);
        assert_eq!(
            CollectorStatus::QueryFailed("Invalid object name".to_string()),
            statuses[1]
        );
        assert!(matches!(statuses[2], CollectorStatus::MappingFailed(_)));
        assert_eq!(CollectorStatus::Updated { rows: 1 }, statuses[3]);

        assert_eq!(2, outcome.failures().count());
        assert!(!outcome.is_clean());
        assert_eq!(0, outcome.reconnects());
        assert_eq!(Some(1.0), registry.get("a").unwrap().get(&[]));
        assert_eq!(Some(4.0), registry.get("d").unwrap().get(&[]));
    }

    #[tokio::test]
    async fn server_errors_keep_the_session() {
        let (_registry, collectors, connector, manager) = setup(&["a", "b"]);
        connector.reply("a", Reply::Fail("Invalid object name"));
        connector.reply("b", Reply::Rows(vec![crate::row![2]]));

        scrape(&connector, &manager, &collectors).await;

        assert_eq!(vec![(1, "a".to_string()), (1, "b".to_string())], connector.executed());
        assert_eq!(1, connector.script.lock().opened);
        assert_eq!(1, connector.script.lock().closed);
    }

    #[tokio::test]
    async fn empty_result_skips_mapping() {
        let (registry, collectors, connector, manager) = setup(&["a"]);
        registry.get("a").unwrap().set(&[], 9.0).unwrap();

        let outcome = scrape(&connector, &manager, &collectors).await;

        assert_eq!(CollectorStatus::Empty, outcome.reports()[0].status);
        assert!(outcome.is_clean());
        assert_eq!(Some(9.0), registry.get("a").unwrap().get(&[]));
    }

    #[tokio::test]
    async fn failed_query_keeps_stale_samples() {
        let (registry, collectors, connector, manager) = setup(&["a"]);
        connector.reply("a", Reply::Rows(vec![crate::row![5]]));
        scrape(&connector, &manager, &collectors).await;

        connector.reply("a", Reply::Fail("Lock request time out period exceeded."));
        let outcome = scrape(&connector, &manager, &collectors).await;

        assert!(!outcome.is_clean());
        assert_eq!(Some(5.0), registry.get("a").unwrap().get(&[]));
    }

    #[tokio::test]
    async fn driver_panic_fails_only_its_collector() {
        let (registry, collectors, connector, manager) = setup(&["a", "b", "c"]);
        connector.reply("a", Reply::Rows(vec![crate::row![1]]));
        connector.reply("b", Reply::Panic);
        connector.reply("c", Reply::Rows(vec![crate::row![3]]));

        let outcome = scrape(&connector, &manager, &collectors).await;

        match &statuses(&outcome)[1] {
            CollectorStatus::QueryFailed(message) => {
                assert!(message.contains("SSVariant"), "{message}")
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(CollectorStatus::Updated { rows: 1 }, statuses(&outcome)[2]);
        assert_eq!(Some(1.0), registry.get("a").unwrap().get(&[]));
        assert_eq!(Some(3.0), registry.get("c").unwrap().get(&[]));
    }

    #[tokio::test]
    async fn broken_session_is_replaced() {
        let (registry, collectors, connector, manager) = setup(&["a", "b", "c"]);
        connector.reply("a", Reply::Timeout);
        connector.reply("b", Reply::Panic);
        connector.reply("c", Reply::Rows(vec![crate::row![3]]));

        let outcome = scrape(&connector, &manager, &collectors).await;

        assert_eq!(
            vec![
                (1, "a".to_string()),
                (2, "b".to_string()),
                (3, "c".to_string())
            ],
            connector.executed()
        );
        assert_eq!(2, outcome.reconnects());
        // Broken sessions are dropped, only the last one is closed.
        assert_eq!(1, connector.script.lock().closed);
        assert_eq!(Some(3.0), registry.get("c").unwrap().get(&[]));
    }

    #[tokio::test]
    async fn remaining_collectors_are_skipped_without_a_session() {
        let (registry, collectors, connector, manager) = setup(&["a", "b", "c"]);
        registry.get("c").unwrap().set(&[], 7.0).unwrap();
        connector.reply("a", Reply::Timeout);
        let session = connector.open().unwrap();
        connector.script.lock().refuse = true;

        let outcome = run(session, &manager, &collectors).await;

        assert_eq!(vec![(1, "a".to_string())], connector.executed());
        let statuses = statuses(&outcome);
        assert!(matches!(statuses[0], CollectorStatus::QueryFailed(_)));
        assert_eq!(CollectorStatus::Skipped("Login failed".to_string()), statuses[1]);
        assert_eq!(CollectorStatus::Skipped("Login failed".to_string()), statuses[2]);
        assert_eq!(3, outcome.failures().count());
        assert_eq!(0, outcome.reconnects());
        assert_eq!(Some(7.0), registry.get("c").unwrap().get(&[]));
    }

    #[test]
    fn panic_messages() {
        assert_eq!("boom", panic_message(&"boom"));
        assert_eq!("boom", panic_message(&"boom".to_string()));
        assert_eq!("unknown panic", panic_message(&42));
    }
}
