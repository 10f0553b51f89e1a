//! The query entry path: panic barrier, blacklist, fast path vs. plan path.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use sqlparser::ast::Statement;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

use tessera_common::error::{ExecError, ProxyError, ProxyResult};
use tessera_common::metrics;
use tessera_mysql::fingerprint::fingerprint;
use tessera_mysql::{Field, QueryResult, Value};
use tessera_plan::{build_plan, preview, PlanContext, StmtType};

use crate::prepare::{bind_params, calc_params, Stmt};
use crate::session::SessionExecutor;

impl SessionExecutor {
    /// `COM_QUERY`.
    pub async fn handle_query(&mut self, sql: &str) -> ProxyResult<QueryResult> {
        self.check_shutdown()?;
        if self.is_streaming() {
            return Err(ExecError::CmdUnsupported.into());
        }
        self.metrics.incr_counter(metrics::QUERIES_TOTAL, 1);
        let started = Instant::now();

        let trimmed = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        let owned = trimmed.to_string();

        // panic barrier: an uncaught failure inside the pipeline must reach
        // the wire as a clean internal error, never tear the process down
        let outcome = match AssertUnwindSafe(self.handle_query_inner(&owned))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(&payload);
                tracing::error!(sql = %owned, panic = %message, "query handler panicked");
                self.metrics.incr_counter(metrics::QUERIES_PANICKED, 1);
                Err(ProxyError::Internal(format!("query handler panicked: {message}")))
            }
        };

        self.metrics.record_timing(
            metrics::QUERY_LATENCY_US,
            started.elapsed().as_micros() as u64,
        );
        outcome
    }

    async fn handle_query_inner(&mut self, sql: &str) -> ProxyResult<QueryResult> {
        if self.general_log {
            tracing::debug!(session_db = %self.db, sql = %sql, "general log");
        }

        let canonical = fingerprint(sql);
        if self.namespace.is_blacklisted(&canonical) {
            tracing::warn!(fingerprint = %canonical, "statement matches blacklist");
            self.metrics.incr_counter(metrics::QUERIES_BLACKLISTED, 1);
            return Err(ExecError::Blacklisted.into());
        }

        let stmt_type = preview(sql);

        if self.namespace.is_read_only_user(&self.user) && stmt_type.is_write() {
            return Err(ExecError::ReadOnlyUser.into());
        }

        if self.poisoned && stmt_type != StmtType::Rollback {
            return Err(ExecError::TxPoisoned.into());
        }

        if stmt_type.can_handle_without_plan() {
            return self.handle_without_plan(stmt_type, sql).await;
        }

        let stmt = self.parse_one(sql, stmt_type)?;
        let plan = {
            let default_phy_db = self.default_phy_db()?;
            let ctx = PlanContext {
                router: &self.namespace.router,
                sequences: &self.namespace.sequences,
                current_db: &self.db,
                default_phy_db: &default_phy_db,
                default_slice: &self.namespace.config.default_slice,
                max_merge_limit: self.config.max_merge_limit,
            };
            build_plan(&stmt, sql, &ctx).await?
        };
        self.execute_plan(&plan).await
    }

    pub(crate) fn parse_one(&self, sql: &str, stmt_type: StmtType) -> ProxyResult<Statement> {
        let mut stmts = Parser::parse_sql(&MySqlDialect {}, sql).map_err(|err| {
            if stmt_type == StmtType::Unknown {
                ProxyError::Exec(ExecError::CmdUnsupported)
            } else {
                ProxyError::Parse(err.to_string())
            }
        })?;
        if stmts.len() != 1 {
            return Err(ProxyError::Parse(format!(
                "expected one statement, got {}",
                stmts.len()
            )));
        }
        Ok(stmts.remove(0))
    }

    async fn handle_without_plan(
        &mut self,
        stmt_type: StmtType,
        sql: &str,
    ) -> ProxyResult<QueryResult> {
        match stmt_type {
            StmtType::Set => self.handle_set(sql).await,
            StmtType::Use => {
                let db = sql
                    .trim()
                    .get(3..)
                    .map(str::trim)
                    .unwrap_or_default()
                    .trim_matches('`');
                self.handle_init_db(db).await
            }
            StmtType::Begin => self.handle_begin().await,
            StmtType::Commit => self.handle_commit().await,
            StmtType::Rollback => self.handle_rollback().await,
            StmtType::Show => self.handle_show(sql).await,
            other => Err(ProxyError::Internal(format!(
                "statement type {other:?} has no fast path"
            ))),
        }
    }

    // ── prepared statements ─────────────────────────────────────────────

    /// `COM_STMT_PREPARE`.
    pub async fn handle_stmt_prepare(&mut self, sql: &str) -> ProxyResult<Stmt> {
        self.check_shutdown()?;
        let sql = sql.trim().trim_end_matches(';');
        let (param_count, offsets) = calc_params(sql)?;

        let id = self.next_stmt_id;
        self.next_stmt_id = self.next_stmt_id.wrapping_add(1).max(1);

        let stmt = Stmt {
            id,
            sql: sql.to_string(),
            param_count,
            offsets,
            column_count: 0,
        };
        self.stmts.insert(id, stmt.clone());
        tracing::debug!(namespace = %self.namespace.name(), id, params = param_count, "prepared statement");
        Ok(stmt)
    }

    /// `COM_STMT_EXECUTE`: splice the parameters and run as a fresh query.
    pub async fn handle_stmt_execute(
        &mut self,
        id: u32,
        params: &[Value],
    ) -> ProxyResult<QueryResult> {
        self.check_shutdown()?;
        let (sql, offsets) = match self.stmts.get(&id) {
            Some(stmt) => (stmt.sql.clone(), stmt.offsets.clone()),
            None => return Err(ExecError::UnknownStmtId(id).into()),
        };
        let concrete = bind_params(&sql, &offsets, params)?;
        self.handle_query(&concrete).await
    }

    /// `COM_STMT_CLOSE`; idempotent.
    pub fn handle_stmt_close(&mut self, id: u32) {
        self.stmts.remove(&id);
    }

    // ── field list ──────────────────────────────────────────────────────

    /// `COM_FIELD_LIST`.
    pub async fn handle_field_list(
        &mut self,
        table: &str,
        wildcard: &str,
    ) -> ProxyResult<Vec<Field>> {
        self.check_shutdown()?;
        let default_phy_db = self.default_phy_db()?;

        let rule_match = self.namespace.router.rule(&self.db, table);
        let (slice_name, phy_table) = match rule_match.as_sharded() {
            Some(rule) => {
                // any shard serves the schema; take the first
                let targets = rule.full_shard_set(&default_phy_db)?;
                let first = targets.first().ok_or_else(|| {
                    ProxyError::Internal(format!("rule for {table} has no shards"))
                })?;
                (first.slice.clone(), first.table.clone())
            }
            None => (
                self.namespace.config.default_slice.clone(),
                table.to_string(),
            ),
        };

        let slice = self.namespace.slices.slice(&slice_name)?;
        let mut pc = if self.can_read_from_replica() {
            slice.acquire_read().await?
        } else {
            slice.acquire_write().await?
        };
        let outcome = async {
            pc.conn().use_db(&default_phy_db).await?;
            pc.conn().field_list(&phy_table, wildcard).await
        }
        .await;
        match outcome {
            Ok(fields) => {
                pc.recycle();
                Ok(fields)
            }
            Err(err) => {
                pc.set_reset_hint();
                pc.discard();
                Err(err)
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".into()
    }
}
