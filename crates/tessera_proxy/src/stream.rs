//! Streaming reads: rows reach the client shard by shard instead of after
//! the full cross-shard buffer fills.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use tessera_common::error::{ExecError, ProxyResult};
use tessera_mysql::{Field, Row};
use tessera_plan::{build_plan, MergeRecipe, PlanContext, WorkItem};

use crate::session::SessionExecutor;

/// Clears the session's streaming latch when the stream is dropped.
struct StreamGuard(Arc<AtomicBool>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A live streaming result. While it exists, the owning session only accepts
/// fetch/close/ping.
pub struct RowStream {
    pub fields: Vec<Field>,
    /// Suggested wire flush cadence; the protocol layer flushes at least
    /// this often so early rows are visible before the stream drains.
    pub flush_delay: Duration,
    rx: mpsc::Receiver<ProxyResult<Row>>,
    _guard: StreamGuard,
}

impl RowStream {
    /// Next row; `None` when the stream is exhausted.
    pub async fn fetch_next(&mut self) -> Option<ProxyResult<Row>> {
        self.rx.recv().await
    }
}

impl SessionExecutor {
    /// Execute a read with shard-at-a-time row delivery. Only plans whose
    /// merge is order-insensitive can stream; others run buffered upstream.
    pub async fn handle_stream_query(&mut self, sql: &str) -> ProxyResult<RowStream> {
        self.check_shutdown()?;
        if self.is_streaming() {
            return Err(ExecError::CmdUnsupported.into());
        }
        if self.in_transaction() {
            return Err(ExecError::CmdUnsupported.into());
        }

        let stmt_type = tessera_plan::preview(sql);
        if !stmt_type.is_read() {
            return Err(ExecError::CmdUnsupported.into());
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

        if !matches!(
            plan.recipe,
            MergeRecipe::Passthrough
                | MergeRecipe::Concat {
                    limit: None,
                    distinct: false,
                    visible: None,
                }
        ) {
            return Err(ExecError::CmdUnsupported.into());
        }
        if plan.items.is_empty() {
            // empty stream with no fields
            let (_, rx) = mpsc::channel(1);
            self.streaming.store(true, Ordering::SeqCst);
            return Ok(RowStream {
                fields: vec![],
                flush_delay: Duration::from_millis(self.config.flush_delay_ms),
                rx,
                _guard: StreamGuard(self.streaming.clone()),
            });
        }

        let from_replica = self.can_read_from_replica();
        let mut items = plan.items.into_iter();
        let first_item = items.next().expect("checked non-empty");

        // the first shard runs inline so the field set is known up front
        let first = self.stream_fetch(&first_item, from_replica).await?;
        let fields = first.fields.clone();

        let flush_delay = Duration::from_millis(self.config.flush_delay_ms);
        let (tx, rx) = mpsc::channel::<ProxyResult<Row>>(64);
        let remaining: Vec<WorkItem> = items.collect();
        let slices = self.namespace.slices_for_items(&remaining)?;

        self.streaming.store(true, Ordering::SeqCst);
        let guard = StreamGuard(self.streaming.clone());

        tokio::spawn(async move {
            for row in first.rows {
                if tx.send(Ok(row)).await.is_err() {
                    return; // client went away
                }
            }
            for (item, slice) in remaining.into_iter().zip(slices) {
                if !flush_delay.is_zero() {
                    tokio::time::sleep(flush_delay).await;
                }
                let result = fetch_on_slice(slice, &item.db, &item.sql, from_replica).await;
                match result {
                    Ok(shard_result) => {
                        for row in shard_result.rows {
                            if tx.send(Ok(row)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
            }
        });

        Ok(RowStream {
            fields,
            flush_delay,
            rx,
            _guard: guard,
        })
    }

    async fn stream_fetch(
        &self,
        item: &WorkItem,
        from_replica: bool,
    ) -> ProxyResult<tessera_mysql::QueryResult> {
        let slice = self.namespace.slices.slice(&item.slice)?;
        fetch_on_slice(slice, &item.db, &item.sql, from_replica).await
    }
}

impl crate::namespace::NamespaceView {
    fn slices_for_items(
        &self,
        items: &[WorkItem],
    ) -> ProxyResult<Vec<Arc<tessera_backend::Slice>>> {
        items.iter().map(|i| self.slices.slice(&i.slice)).collect()
    }
}

async fn fetch_on_slice(
    slice: Arc<tessera_backend::Slice>,
    db: &str,
    sql: &str,
    from_replica: bool,
) -> ProxyResult<tessera_mysql::QueryResult> {
    let mut pc = if from_replica {
        slice.acquire_read().await?
    } else {
        slice.acquire_write().await?
    };
    let outcome = async {
        if !db.is_empty() {
            pc.conn().use_db(db).await?;
        }
        pc.conn().execute(sql).await
    }
    .await;
    match outcome {
        Ok(result) => {
            pc.recycle();
            Ok(result)
        }
        Err(err) => {
            pc.set_reset_hint();
            pc.discard();
            // a failure after rows already went out is a lost connection
            Err(err)
        }
    }
}
