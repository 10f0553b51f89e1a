//! SHOW handling: a few answered locally, the rest forwarded to the default
//! slice so clients keep working.

use tessera_common::error::ProxyResult;
use tessera_mysql::{ColumnType, Field, QueryResult, Value};

use crate::session::SessionExecutor;

impl SessionExecutor {
    pub(crate) async fn handle_show(&mut self, sql: &str) -> ProxyResult<QueryResult> {
        let lowered = sql.to_lowercase();
        let compact: String = lowered.split_whitespace().collect::<Vec<_>>().join(" ");

        if compact.starts_with("show databases") {
            let rows = self
                .namespace
                .config
                .allowed_dbs
                .iter()
                .map(|db| vec![Value::from_str(db)])
                .collect();
            let result =
                QueryResult::result_set(vec![Field::new("Database", ColumnType::VarChar)], rows);
            return Ok(self.own_result_status(result));
        }

        // the general_log switch is proxy-local state
        if compact.starts_with("show variables") && compact.contains("general_log") {
            let value = if self.general_log { "ON" } else { "OFF" };
            let result = QueryResult::result_set(
                vec![
                    Field::new("Variable_name", ColumnType::VarChar),
                    Field::new("Value", ColumnType::VarChar),
                ],
                vec![vec![Value::from_str("general_log"), Value::from_str(value)]],
            );
            return Ok(self.own_result_status(result));
        }

        self.forward_to_default_slice(sql).await
    }

    /// Run a statement verbatim on the default slice.
    pub(crate) async fn forward_to_default_slice(&mut self, sql: &str) -> ProxyResult<QueryResult> {
        let slice_name = self.namespace.config.default_slice.clone();
        let slice = self.namespace.slices.slice(&slice_name)?;
        let mut pc = if self.can_read_from_replica() {
            slice.acquire_read().await?
        } else {
            slice.acquire_write().await?
        };

        let phy_db = if self.db.is_empty() {
            None
        } else {
            self.namespace.default_phy_db(&self.db).map(str::to_string)
        };

        let outcome = async {
            if let Some(db) = &phy_db {
                pc.conn().use_db(db).await?;
            }
            pc.conn().execute(sql).await
        }
        .await;

        match outcome {
            Ok(result) => {
                pc.recycle();
                Ok(self.own_result_status(result))
            }
            Err(err) => {
                pc.set_reset_hint();
                pc.discard();
                Err(err)
            }
        }
    }
}
