//! Scripted backend doubles for tests.
//!
//! The handler decides the reply per statement; the connector records every
//! dialed connection and executed statement so tests can assert routing,
//! ordering, and release behavior.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use tessera_common::error::{BackendError, ProxyError, ProxyResult};
use tessera_mysql::{ColumnType, Field, QueryResult, SERVER_STATUS_AUTOCOMMIT};

use crate::conn::{BackendConn, Connector};

pub type Handler = Arc<dyn Fn(&str, &str) -> ProxyResult<QueryResult> + Send + Sync>;

fn default_handler() -> Handler {
    Arc::new(|_endpoint, _sql| Ok(QueryResult::ok(1, 0, SERVER_STATUS_AUTOCOMMIT)))
}

pub struct MockConn {
    endpoint: String,
    handler: Handler,
    log: Arc<Mutex<Vec<(String, String)>>>,
    killed: Arc<AtomicBool>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MockConn {
    async fn run(&mut self, sql: &str) -> ProxyResult<QueryResult> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(ProxyError::Backend(BackendError::LostConnection {
                endpoint: self.endpoint.clone(),
            }));
        }
        let delay = *self.delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        self.log.lock().push((self.endpoint.clone(), sql.to_string()));
        (self.handler)(&self.endpoint, sql)
    }
}

#[async_trait]
impl BackendConn for MockConn {
    async fn execute(&mut self, sql: &str) -> ProxyResult<QueryResult> {
        self.run(sql).await
    }

    async fn ping(&mut self) -> ProxyResult<()> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(ProxyError::Backend(BackendError::LostConnection {
                endpoint: self.endpoint.clone(),
            }));
        }
        Ok(())
    }

    async fn use_db(&mut self, db: &str) -> ProxyResult<()> {
        self.run(&format!("USE {db}")).await.map(|_| ())
    }

    async fn set_autocommit(&mut self, on: bool) -> ProxyResult<()> {
        self.run(&format!("SET autocommit={}", u8::from(on)))
            .await
            .map(|_| ())
    }

    async fn begin(&mut self) -> ProxyResult<()> {
        self.run("BEGIN").await.map(|_| ())
    }

    async fn commit(&mut self) -> ProxyResult<()> {
        self.run("COMMIT").await.map(|_| ())
    }

    async fn rollback(&mut self) -> ProxyResult<()> {
        self.run("ROLLBACK").await.map(|_| ())
    }

    async fn field_list(&mut self, table: &str, wildcard: &str) -> ProxyResult<Vec<Field>> {
        self.run(&format!("FIELD LIST {table} {wildcard}")).await?;
        Ok(vec![Field::new("id", ColumnType::LongLong)])
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_closed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

/// Connector handing out scripted connections.
pub struct MockConnector {
    handler: RwLock<Handler>,
    log: Arc<Mutex<Vec<(String, String)>>>,
    fail_connect: AtomicBool,
    connects: AtomicUsize,
    generations: Mutex<Vec<Arc<AtomicBool>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self {
            handler: RwLock::new(default_handler()),
            log: Arc::new(Mutex::new(Vec::new())),
            fail_connect: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            generations: Mutex::new(Vec::new()),
            delay: Arc::new(Mutex::new(None)),
        }
    }
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the reply per `(endpoint, sql)`.
    pub fn set_handler(
        &self,
        handler: impl Fn(&str, &str) -> ProxyResult<QueryResult> + Send + Sync + 'static,
    ) {
        *self.handler.write() = Arc::new(handler);
    }

    /// Delay every statement; lets tests observe in-flight cancellation.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Kill every connection dialed so far.
    pub fn kill_all(&self) {
        for flag in self.generations.lock().iter() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Every executed `(endpoint, sql)`, in arrival order.
    pub fn executed(&self) -> Vec<(String, String)> {
        self.log.lock().clone()
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.log.lock().iter().map(|(_, s)| s.clone()).collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &str) -> ProxyResult<Box<dyn BackendConn>> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ProxyError::Backend(BackendError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: "connection refused".into(),
            }));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let killed = Arc::new(AtomicBool::new(false));
        self.generations.lock().push(killed.clone());
        Ok(Box::new(MockConn {
            endpoint: endpoint.to_string(),
            handler: self.handler.read().clone(),
            log: self.log.clone(),
            killed,
            delay: self.delay.clone(),
        }))
    }
}
