//! Plan execution: parallel scatter for reads outside transactions, strict
//! serial order on pinned connections inside them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;

use tessera_backend::Slice;
use tessera_common::error::{ErrorKind, ExecError, ProxyError, ProxyResult};
use tessera_common::metrics;
use tessera_mysql::QueryResult;
use tessera_plan::{Plan, PlanKind};

use crate::merge::merge_results;
use crate::session::SessionExecutor;

impl SessionExecutor {
    /// Drive a plan to a single merged result.
    pub(crate) async fn execute_plan(&mut self, plan: &Plan) -> ProxyResult<QueryResult> {
        if plan.items.is_empty() {
            // the statement matched no shard at all
            return Ok(self.ok_result(0, 0));
        }

        let mut merged = if self.in_transaction() {
            self.execute_serial(plan).await?
        } else {
            self.execute_parallel(plan).await?
        };

        if let Some(id) = plan.generated_id {
            merged.last_insert_id = id;
        }
        if merged.last_insert_id != 0 {
            self.last_insert_id = merged.last_insert_id;
        }
        Ok(self.own_result_status(merged))
    }

    // ── transactional path ──────────────────────────────────────────────

    /// Inside a transaction, items run serially in the plan's shard order on
    /// pinned connections. Any failure poisons the transaction.
    async fn execute_serial(&mut self, plan: &Plan) -> ProxyResult<QueryResult> {
        if plan.kind == PlanKind::Write && plan.slices().len() > 1 {
            self.poison();
            return Err(ExecError::TxCrossShard.into());
        }

        let mut results = Vec::with_capacity(plan.items.len());
        for item in &plan.items {
            let db = item.db.clone();
            let sql = item.sql.clone();
            let conn = match self.tx_conn(&item.slice).await {
                Ok(conn) => conn,
                Err(err) => {
                    self.poison();
                    return Err(err);
                }
            };
            let outcome = async {
                if !db.is_empty() {
                    conn.conn().use_db(&db).await?;
                }
                conn.conn().execute(&sql).await
            }
            .await;
            match outcome {
                Ok(r) => results.push(r),
                Err(err) => {
                    self.poison();
                    return Err(err);
                }
            }
        }
        merge_results(&plan.recipe, results)
    }

    // ── parallel path ───────────────────────────────────────────────────

    /// One sub-task per work item; the first failure cancels the siblings
    /// and the highest-severity error wins.
    async fn execute_parallel(&mut self, plan: &Plan) -> ProxyResult<QueryResult> {
        let from_replica = plan.kind == PlanKind::Read && self.can_read_from_replica();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut tasks: JoinSet<(usize, ProxyResult<QueryResult>)> = JoinSet::new();

        for (idx, item) in plan.items.iter().enumerate() {
            let slice = self.namespace.slices.slice(&item.slice)?;
            let sql = item.sql.clone();
            let db = item.db.clone();
            let cancel = cancel_rx.clone();
            let sink = self.metrics.clone();
            tasks.spawn(async move {
                let result = run_item(slice, db, sql, from_replica, cancel, sink).await;
                (idx, result)
            });
        }
        drop(cancel_rx);

        let deadline = self.config.query_timeout_ms;
        let sink = self.metrics.clone();
        let gather = gather_results(&mut tasks, &cancel_tx, plan.items.len(), sink);
        let outcome = if deadline > 0 {
            match tokio::time::timeout(Duration::from_millis(deadline), gather).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let _ = cancel_tx.send(true);
                    tasks.shutdown().await;
                    return Err(ProxyError::DeadlineExceeded);
                }
            }
        } else {
            gather.await
        };

        match outcome {
            Ok(results) => merge_results(&plan.recipe, results),
            Err(err) => Err(err),
        }
    }

    /// Reads may leave the master when the user is rw-split and the
    /// statement takes no locks.
    pub(crate) fn can_read_from_replica(&self) -> bool {
        self.namespace.is_rw_split_user(&self.user)
    }
}

async fn gather_results(
    tasks: &mut JoinSet<(usize, ProxyResult<QueryResult>)>,
    cancel_tx: &watch::Sender<bool>,
    n: usize,
    sink: Arc<dyn tessera_common::metrics::MetricsSink>,
) -> ProxyResult<Vec<QueryResult>> {
    let mut slots: Vec<Option<QueryResult>> = Vec::new();
    slots.resize_with(n, || None);
    let mut errors: Vec<ProxyError> = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, Ok(result))) => slots[idx] = Some(result),
            Ok((_, Err(err))) => {
                if errors.is_empty() {
                    let _ = cancel_tx.send(true);
                }
                errors.push(err);
            }
            Err(join_err) => {
                if errors.is_empty() {
                    let _ = cancel_tx.send(true);
                }
                if join_err.is_panic() {
                    sink.incr_counter(metrics::QUERIES_PANICKED, 1);
                }
                tracing::error!(error = %join_err, "dispatch sub-task failed");
                errors.push(ProxyError::Internal(format!(
                    "dispatch task failed: {join_err}"
                )));
            }
        }
    }

    if !errors.is_empty() {
        // first error observed wins its severity class
        let worst = errors
            .iter()
            .enumerate()
            .max_by_key(|(i, e)| (e.severity(), std::cmp::Reverse(*i)))
            .map(|(i, _)| i)
            .unwrap_or(0);
        return Err(errors.swap_remove(worst));
    }

    Ok(slots.into_iter().map(|s| s.expect("no error, so filled")).collect())
}

/// Run one work item: acquire, point at the physical db, execute, recycle.
/// Dispatch-class failures on the read path retry once against another
/// replica; cancellation conservatively destroys the connection.
async fn run_item(
    slice: Arc<Slice>,
    db: String,
    sql: String,
    from_replica: bool,
    mut cancel: watch::Receiver<bool>,
    sink: Arc<dyn tessera_common::metrics::MetricsSink>,
) -> ProxyResult<QueryResult> {
    if *cancel.borrow() {
        return Err(ProxyError::Canceled);
    }

    let attempts = async {
        match attempt(&slice, &db, &sql, from_replica).await {
            Ok(result) => Ok(result),
            Err(err) if from_replica && err.kind() == ErrorKind::Dispatch => {
                tracing::debug!(error = %err, "read dispatch failed, retrying another replica");
                sink.incr_counter(metrics::DISPATCH_RETRIES, 1);
                attempt(&slice, &db, &sql, from_replica).await
            }
            Err(err) => Err(err),
        }
    };

    tokio::select! {
        result = attempts => result,
        _ = cancel.changed() => {
            // dropping the attempt future releases (destroys) any conn it held
            Err(ProxyError::Canceled)
        }
    }
}

async fn attempt(
    slice: &Arc<Slice>,
    db: &str,
    sql: &str,
    from_replica: bool,
) -> ProxyResult<QueryResult> {
    let mut pc = if from_replica {
        slice.acquire_read().await?
    } else {
        slice.acquire_write().await?
    };
    if !db.is_empty() {
        if let Err(err) = pc.conn().use_db(db).await {
            pc.set_reset_hint();
            pc.discard();
            return Err(err);
        }
    }
    match pc.conn().execute(sql).await {
        Ok(result) => {
            pc.recycle();
            Ok(result)
        }
        Err(err) => {
            pc.set_reset_hint();
            pc.discard();
            Err(err)
        }
    }
}
