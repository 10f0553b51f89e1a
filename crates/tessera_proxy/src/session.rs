//! Per-client session state and the control-statement handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tessera_backend::PooledConnect;
use tessera_common::config::ProxyConfig;
use tessera_common::error::{ExecError, ProxyError, ProxyResult, RouteError};
use tessera_common::metrics::{self, MetricsSink};
use tessera_common::shutdown::ShutdownSignal;
use tessera_mysql::{
    QueryResult, SERVER_MORE_RESULTS_EXISTS, SERVER_STATUS_AUTOCOMMIT, SERVER_STATUS_IN_TRANS,
};

use crate::namespace::NamespaceView;
use crate::prepare::Stmt;

/// Session variable values the SET surface stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum VarValue {
    Str(String),
    Int(i64),
}

/// One client session. Commands run strictly one at a time; the wire layer
/// must not pipeline into the same executor.
pub struct SessionExecutor {
    pub(crate) namespace: Arc<NamespaceView>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) shutdown: ShutdownSignal,
    pub(crate) config: ProxyConfig,

    pub(crate) user: String,
    pub(crate) db: String,
    pub(crate) charset: String,
    pub(crate) collation_id: u16,
    pub(crate) status: u16,
    pub(crate) session_vars: HashMap<String, VarValue>,
    pub(crate) general_log: bool,

    pub(crate) tx_conns: HashMap<String, PooledConnect>,
    pub(crate) poisoned: bool,

    pub(crate) stmts: HashMap<u32, Stmt>,
    pub(crate) next_stmt_id: u32,
    pub(crate) last_insert_id: u64,

    pub(crate) refused_after_shutdown: bool,
    pub(crate) streaming: Arc<AtomicBool>,
}

impl SessionExecutor {
    pub fn new(
        namespace: Arc<NamespaceView>,
        user: impl Into<String>,
        metrics: Arc<dyn MetricsSink>,
        shutdown: ShutdownSignal,
        config: ProxyConfig,
    ) -> Self {
        let charset = namespace.config.default_charset.clone();
        let collation_id = namespace.config.default_collation_id;
        Self {
            namespace,
            metrics,
            shutdown,
            config,
            user: user.into(),
            db: String::new(),
            charset,
            collation_id,
            status: SERVER_STATUS_AUTOCOMMIT,
            session_vars: HashMap::new(),
            general_log: false,
            tx_conns: HashMap::new(),
            poisoned: false,
            stmts: HashMap::new(),
            next_stmt_id: 1,
            last_insert_id: 0,
            refused_after_shutdown: false,
            streaming: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn current_db(&self) -> &str {
        &self.db
    }

    pub fn charset(&self) -> (&str, u16) {
        (&self.charset, self.collation_id)
    }

    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    /// Stored session variable (`sql_mode`, `time_zone`, …), rendered as
    /// text. The wire layer answers `SELECT @@var`-style probes from this.
    pub fn session_variable(&self, name: &str) -> Option<String> {
        self.session_vars.get(&name.to_lowercase()).map(|v| match v {
            VarValue::Str(s) => s.clone(),
            VarValue::Int(i) => i.to_string(),
        })
    }

    /// Either an explicit BEGIN or autocommit disabled: both pin backend
    /// connections until COMMIT/ROLLBACK.
    pub fn in_transaction(&self) -> bool {
        self.status & SERVER_STATUS_IN_TRANS != 0
            || self.status & SERVER_STATUS_AUTOCOMMIT == 0
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Refuse commands once the listener is draining; the refusal counter
    /// moves exactly once per session.
    pub(crate) fn check_shutdown(&mut self) -> ProxyResult<()> {
        if !self.shutdown.is_shutdown() {
            return Ok(());
        }
        if !self.refused_after_shutdown {
            self.refused_after_shutdown = true;
            self.metrics.incr_counter(metrics::SHUTDOWN_REFUSED, 1);
        }
        Err(ProxyError::ServerShutdown)
    }

    pub async fn handle_ping(&mut self) -> ProxyResult<QueryResult> {
        self.check_shutdown()?;
        Ok(QueryResult::ok(0, 0, self.status))
    }

    /// `COM_INIT_DB` / `USE db`.
    pub async fn handle_init_db(&mut self, db: &str) -> ProxyResult<QueryResult> {
        self.check_shutdown()?;
        let db = db.trim().trim_matches('`');
        if db.is_empty() {
            return Err(RouteError::UnknownDb(String::new()).into());
        }
        if !self.namespace.is_allowed_db(db) {
            return Err(RouteError::NotAllowedDb(db.to_string()).into());
        }
        self.db = db.to_string();
        Ok(self.ok_result(0, 0))
    }

    pub(crate) fn ok_result(&self, affected: u64, last_insert_id: u64) -> QueryResult {
        QueryResult::ok(affected, last_insert_id, self.status)
    }

    /// Overlay the session's status bits on a backend result before it goes
    /// to the wire (the session, not any one shard, owns transaction and
    /// autocommit state).
    pub(crate) fn own_result_status(&self, mut result: QueryResult) -> QueryResult {
        result.status = self.status | (result.status & SERVER_MORE_RESULTS_EXISTS);
        result
    }

    pub(crate) fn poison(&mut self) {
        if self.in_transaction() {
            self.poisoned = true;
        }
    }

    // ── transaction control ─────────────────────────────────────────────

    pub(crate) async fn handle_begin(&mut self) -> ProxyResult<QueryResult> {
        if self.in_transaction() {
            // implicit commit, MySQL semantics
            self.finish_tx(false).await?;
        }
        self.status |= SERVER_STATUS_IN_TRANS;
        self.poisoned = false;
        debug_assert!(self.tx_conns.is_empty());
        Ok(self.ok_result(0, 0))
    }

    pub(crate) async fn handle_commit(&mut self) -> ProxyResult<QueryResult> {
        self.finish_tx(false).await
    }

    pub(crate) async fn handle_rollback(&mut self) -> ProxyResult<QueryResult> {
        self.finish_tx(true).await
    }

    /// Send COMMIT/ROLLBACK to every pinned connection and release them all,
    /// success or not. Partial outcomes surface as `TxPartial`; the proxy
    /// attempts no recovery.
    pub(crate) async fn finish_tx(&mut self, rollback: bool) -> ProxyResult<QueryResult> {
        let conns = std::mem::take(&mut self.tx_conns);
        let mut failed: Vec<String> = Vec::new();

        for (slice, mut pc) in conns {
            let outcome = if rollback {
                pc.conn().rollback().await
            } else {
                pc.conn().commit().await
            };
            match outcome {
                Ok(()) => {
                    // restore autocommit before the conn goes back to the pool
                    if pc.conn().set_autocommit(true).await.is_ok() {
                        pc.recycle();
                    } else {
                        pc.discard();
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        slice = %slice,
                        rollback,
                        error = %err,
                        "transaction finish failed on slice"
                    );
                    failed.push(slice);
                    pc.discard();
                }
            }
        }

        self.status &= !SERVER_STATUS_IN_TRANS;
        self.poisoned = false;

        if failed.is_empty() {
            Ok(self.ok_result(0, 0))
        } else {
            failed.sort();
            self.metrics.incr_counter(metrics::TX_PARTIAL, 1);
            Err(ExecError::TxPartial { slices: failed }.into())
        }
    }

    /// Pinned connection for a slice, acquiring and pinning on first use.
    pub(crate) async fn tx_conn(&mut self, slice_name: &str) -> ProxyResult<&mut PooledConnect> {
        if !self.tx_conns.contains_key(slice_name) {
            let slice = self.namespace.slices.slice(slice_name)?;
            let mut pc = slice.acquire_write().await?;
            pc.conn().set_autocommit(false).await?;
            self.tx_conns.insert(slice_name.to_string(), pc);
        }
        Ok(self
            .tx_conns
            .get_mut(slice_name)
            .expect("just inserted"))
    }

    /// Session close: roll back any in-flight transaction and release every
    /// pinned connection.
    pub async fn close(&mut self) {
        if !self.tx_conns.is_empty() {
            if let Err(err) = self.finish_tx(true).await {
                tracing::warn!(error = %err, "rollback on session close failed");
            }
        }
        self.stmts.clear();
    }

    /// The default physical database behind the session's current logical db.
    pub(crate) fn default_phy_db(&self) -> ProxyResult<String> {
        if self.db.is_empty() {
            return Err(RouteError::UnknownDb(String::new()).into());
        }
        self.namespace
            .default_phy_db(&self.db)
            .map(str::to_string)
            .ok_or_else(|| RouteError::UnknownDb(self.db.clone()).into())
    }
}
