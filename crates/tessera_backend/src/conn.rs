//! The backend connection seam and the pooled-connection guard.

use async_trait::async_trait;
use tessera_common::error::ProxyResult;
use tessera_mysql::{Field, QueryResult};

/// One connection to a physical MySQL server. The wire driver lives behind
/// this trait; tests plug in scripted doubles.
#[async_trait]
pub trait BackendConn: Send {
    async fn execute(&mut self, sql: &str) -> ProxyResult<QueryResult>;
    async fn ping(&mut self) -> ProxyResult<()>;
    /// Default database for subsequent statements.
    async fn use_db(&mut self, db: &str) -> ProxyResult<()>;
    async fn set_autocommit(&mut self, on: bool) -> ProxyResult<()>;
    async fn begin(&mut self) -> ProxyResult<()>;
    async fn commit(&mut self) -> ProxyResult<()>;
    async fn rollback(&mut self) -> ProxyResult<()>;
    async fn field_list(&mut self, table: &str, wildcard: &str) -> ProxyResult<Vec<Field>>;
    fn endpoint(&self) -> &str;
    fn is_closed(&self) -> bool;
}

/// Dials new backend connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> ProxyResult<Box<dyn BackendConn>>;
}

/// A checked-out connection.
///
/// The holding task owns it until it either `recycle()`s it back to the pool
/// or the guard drops. A plain drop (cancellation, error unwind, reset hint)
/// destroys the connection: a conn whose result state is ambiguous must not
/// be reused.
pub struct PooledConnect {
    pub(crate) conn: Option<Box<dyn BackendConn>>,
    pub(crate) pool: std::sync::Arc<crate::pool::ConnectionPool>,
    pub(crate) _permit: Option<tokio::sync::OwnedSemaphorePermit>,
    pub(crate) reset_hint: bool,
}

impl std::fmt::Debug for PooledConnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnect")
            .field("reset_hint", &self.reset_hint)
            .finish()
    }
}

impl PooledConnect {
    pub fn conn(&mut self) -> &mut dyn BackendConn {
        self.conn
            .as_mut()
            .expect("connection already surrendered")
            .as_mut()
    }

    pub fn endpoint(&self) -> String {
        self.conn
            .as_ref()
            .map(|c| c.endpoint().to_string())
            .unwrap_or_default()
    }

    /// Mark the connection as mid-result/ambiguous; it will be dropped
    /// instead of recycled.
    pub fn set_reset_hint(&mut self) {
        self.reset_hint = true;
    }

    /// Return the connection to its pool for reuse.
    pub fn recycle(mut self) {
        if self.reset_hint {
            tracing::debug!(endpoint = %self.endpoint(), "dropping connection with reset hint");
            return; // Drop impl destroys it
        }
        if let Some(conn) = self.conn.take() {
            if !conn.is_closed() {
                self.pool.put_idle(conn);
            }
        }
        self.pool.note_return();
        // permit drops here, freeing the slot
    }

    /// Destroy the connection outright.
    pub fn discard(self) {
        // Drop impl does the work
    }
}

impl Drop for PooledConnect {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            self.pool.note_return();
        }
    }
}
