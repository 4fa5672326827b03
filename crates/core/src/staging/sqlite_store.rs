//! SQLite-backed staging store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::{
    BatchFilter, CandidateLink, ProcessingStatus, ProductImage, ScrapeSession, StagedLine,
    StagingBatch, StagingDatabase, StagingError, StagingPurchaseOrder, StagingPurchaseOrderItem,
    StagingSaleItem, StagingStore,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const BATCH_COLUMNS: &str = "id, kind, processor_name, supplier_id, created_at, started_at, completed_at, content_hash, status, error_message, raw_payload";

const SESSION_COLUMNS: &str = "id, batch_id, supplier_id, cookie_file_id, state, status, error_message, orders_seen, orders_failed, started_at, completed_at";

const ORDER_COLUMNS: &str = "id, batch_id, supplier_reference, order_date, total_cents, currency, raw_data, status, error_message, promoted_order_id, created_at, updated_at";

const LINE_COLUMNS: &str =
    "id, order_id, sku, description, quantity, unit_price_cents, candidate_product_id, candidate_status";

const IMAGE_COLUMNS: &str =
    "id, product_id, image_url, embedding, embedding_model, error_message, updated_at";

fn db_err(e: rusqlite::Error) -> StagingError {
    StagingError::Database(e.to_string())
}

fn json_err(e: serde_json::Error) -> StagingError {
    StagingError::Database(e.to_string())
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn get_parsed<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_err(idx, e))
}

fn get_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn get_opt_timestamp(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

fn opt_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

/// Open a connection configured for concurrent sessions.
fn open_connection(path: &Path, in_memory: bool) -> Result<Connection, StagingError> {
    let conn = Connection::open(path).map_err(db_err)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(db_err)?;
    if !in_memory {
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
    }
    Ok(conn)
}

fn initialize_schema(conn: &Connection) -> Result<(), StagingError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS staging_batches (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            processor_name TEXT NOT NULL,
            supplier_id TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            content_hash TEXT,
            status TEXT NOT NULL,
            error_message TEXT,
            raw_payload TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_batches_status ON staging_batches(status);
        CREATE INDEX IF NOT EXISTS idx_batches_content_hash ON staging_batches(content_hash);

        CREATE TABLE IF NOT EXISTS scrape_sessions (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES staging_batches(id) ON DELETE CASCADE,
            supplier_id TEXT NOT NULL,
            cookie_file_id TEXT NOT NULL,
            state TEXT NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT,
            orders_seen INTEGER NOT NULL DEFAULT 0,
            orders_failed INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_batch ON scrape_sessions(batch_id);

        CREATE TABLE IF NOT EXISTS staging_purchase_orders (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES staging_batches(id) ON DELETE CASCADE,
            supplier_reference TEXT NOT NULL,
            order_date TEXT,
            total_cents INTEGER,
            currency TEXT,
            raw_data TEXT,
            status TEXT NOT NULL,
            error_message TEXT,
            promoted_order_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_orders_batch ON staging_purchase_orders(batch_id);

        CREATE TABLE IF NOT EXISTS staging_purchase_order_items (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES staging_purchase_orders(id) ON DELETE CASCADE,
            sku TEXT,
            description TEXT NOT NULL,
            quantity REAL NOT NULL,
            unit_price_cents INTEGER,
            candidate_product_id TEXT,
            candidate_status TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_purchase_items_order ON staging_purchase_order_items(order_id);

        CREATE TABLE IF NOT EXISTS staging_sale_items (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES staging_purchase_orders(id) ON DELETE CASCADE,
            sku TEXT,
            description TEXT NOT NULL,
            quantity REAL NOT NULL,
            unit_price_cents INTEGER,
            candidate_product_id TEXT,
            candidate_status TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sale_items_order ON staging_sale_items(order_id);

        CREATE TABLE IF NOT EXISTS product_images (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL,
            image_url TEXT NOT NULL,
            embedding TEXT,
            embedding_model TEXT,
            error_message TEXT,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .map_err(db_err)
}

/// SQLite-backed staging store bound to a single connection.
pub struct SqliteStagingStore {
    conn: Mutex<Connection>,
}

impl SqliteStagingStore {
    /// Open a store on a database file, creating tables if needed.
    pub fn new(path: &Path) -> Result<Self, StagingError> {
        let conn = open_connection(path, false)?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a private in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StagingError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(db_err)?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StagingError> {
        self.conn
            .lock()
            .map_err(|_| StagingError::Database("connection lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &BatchFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(kind) = filter.kind {
            conditions.push("kind = ?");
            params.push(Box::new(kind.as_str()));
        }

        if let Some(ref processor_name) = filter.processor_name {
            conditions.push("processor_name = ?");
            params.push(Box::new(processor_name.clone()));
        }

        if let Some(ref supplier_id) = filter.supplier_id {
            conditions.push("supplier_id = ?");
            params.push(Box::new(supplier_id.clone()));
        }

        if let Some(ref content_hash) = filter.content_hash {
            conditions.push("content_hash = ?");
            params.push(Box::new(content_hash.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_batch(row: &Row) -> rusqlite::Result<StagingBatch> {
        Ok(StagingBatch {
            id: row.get(0)?,
            kind: get_parsed(row, 1)?,
            processor_name: row.get(2)?,
            supplier_id: row.get(3)?,
            created_at: get_timestamp(row, 4)?,
            started_at: get_opt_timestamp(row, 5)?,
            completed_at: get_opt_timestamp(row, 6)?,
            content_hash: row.get(7)?,
            status: get_parsed(row, 8)?,
            error_message: row.get(9)?,
            raw_payload: row.get(10)?,
        })
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<ScrapeSession> {
        Ok(ScrapeSession {
            id: row.get(0)?,
            batch_id: row.get(1)?,
            supplier_id: row.get(2)?,
            cookie_file_id: row.get(3)?,
            state: get_parsed(row, 4)?,
            status: get_parsed(row, 5)?,
            error_message: row.get(6)?,
            orders_seen: row.get(7)?,
            orders_failed: row.get(8)?,
            started_at: get_timestamp(row, 9)?,
            completed_at: get_opt_timestamp(row, 10)?,
        })
    }

    fn row_to_order(row: &Row) -> rusqlite::Result<StagingPurchaseOrder> {
        let order_date: Option<String> = row.get(3)?;
        let order_date = order_date
            .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").map_err(|e| conversion_err(3, e)))
            .transpose()?;
        let raw_data: Option<String> = row.get(6)?;
        let raw_data = raw_data
            .map(|json| serde_json::from_str(&json).map_err(|e| conversion_err(6, e)))
            .transpose()?;

        Ok(StagingPurchaseOrder {
            id: row.get(0)?,
            batch_id: row.get(1)?,
            supplier_reference: row.get(2)?,
            order_date,
            total_cents: row.get(4)?,
            currency: row.get(5)?,
            raw_data,
            status: get_parsed(row, 7)?,
            error_message: row.get(8)?,
            promoted_order_id: row.get(9)?,
            created_at: get_timestamp(row, 10)?,
            updated_at: get_timestamp(row, 11)?,
        })
    }

    fn row_to_line(row: &Row) -> rusqlite::Result<(String, String, StagedLine, CandidateLink)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            StagedLine {
                sku: row.get(2)?,
                description: row.get(3)?,
                quantity: row.get(4)?,
                unit_price_cents: row.get(5)?,
            },
            CandidateLink {
                candidate_product_id: row.get(6)?,
                candidate_status: get_parsed(row, 7)?,
            },
        ))
    }

    fn row_to_image(row: &Row) -> rusqlite::Result<ProductImage> {
        let embedding: Option<String> = row.get(3)?;
        let embedding = embedding
            .map(|json| serde_json::from_str(&json).map_err(|e| conversion_err(3, e)))
            .transpose()?;

        Ok(ProductImage {
            id: row.get(0)?,
            product_id: row.get(1)?,
            image_url: row.get(2)?,
            embedding,
            embedding_model: row.get(4)?,
            error_message: row.get(5)?,
            updated_at: get_timestamp(row, 6)?,
        })
    }

    fn live_batch_by_hash(
        conn: &Connection,
        content_hash: &str,
    ) -> Result<Option<StagingBatch>, StagingError> {
        let sql = format!(
            "SELECT {} FROM staging_batches WHERE content_hash = ? AND status != ? ORDER BY created_at ASC, rowid ASC LIMIT 1",
            BATCH_COLUMNS
        );
        conn.query_row(
            &sql,
            params![content_hash, ProcessingStatus::Failed.as_str()],
            Self::row_to_batch,
        )
        .optional()
        .map_err(db_err)
    }

    fn write_batch(conn: &Connection, batch: &StagingBatch, upsert: bool) -> Result<(), StagingError> {
        let conflict = if upsert {
            " ON CONFLICT(id) DO UPDATE SET started_at = excluded.started_at, completed_at = excluded.completed_at, content_hash = excluded.content_hash, status = excluded.status, error_message = excluded.error_message, raw_payload = excluded.raw_payload"
        } else {
            ""
        };
        let sql = format!(
            "INSERT INTO staging_batches ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?){}",
            BATCH_COLUMNS, conflict
        );
        conn.execute(
            &sql,
            params![
                batch.id,
                batch.kind.as_str(),
                batch.processor_name,
                batch.supplier_id,
                batch.created_at.to_rfc3339(),
                opt_ts(batch.started_at),
                opt_ts(batch.completed_at),
                batch.content_hash,
                batch.status.as_str(),
                batch.error_message,
                batch.raw_payload,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn write_session(conn: &Connection, session: &ScrapeSession) -> Result<(), StagingError> {
        let sql = format!(
            "INSERT INTO scrape_sessions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT(id) DO UPDATE SET state = excluded.state, status = excluded.status, error_message = excluded.error_message, orders_seen = excluded.orders_seen, orders_failed = excluded.orders_failed, completed_at = excluded.completed_at",
            SESSION_COLUMNS
        );
        conn.execute(
            &sql,
            params![
                session.id,
                session.batch_id,
                session.supplier_id,
                session.cookie_file_id,
                session.state.as_str(),
                session.status.as_str(),
                session.error_message,
                session.orders_seen,
                session.orders_failed,
                session.started_at.to_rfc3339(),
                opt_ts(session.completed_at),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn insert_line(
        &self,
        table: &str,
        id: &str,
        order_id: &str,
        line: &StagedLine,
        candidate: &CandidateLink,
    ) -> Result<(), StagingError> {
        let conn = self.conn()?;
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            table, LINE_COLUMNS
        );
        conn.execute(
            &sql,
            params![
                id,
                order_id,
                line.sku,
                line.description,
                line.quantity,
                line.unit_price_cents,
                candidate.candidate_product_id,
                candidate.candidate_status.as_str(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn save_line(
        &self,
        table: &str,
        id: &str,
        line: &StagedLine,
        candidate: &CandidateLink,
    ) -> Result<(), StagingError> {
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE {} SET sku = ?, description = ?, quantity = ?, unit_price_cents = ?, candidate_product_id = ?, candidate_status = ? WHERE id = ?",
            table
        );
        let updated = conn
            .execute(
                &sql,
                params![
                    line.sku,
                    line.description,
                    line.quantity,
                    line.unit_price_cents,
                    candidate.candidate_product_id,
                    candidate.candidate_status.as_str(),
                    id,
                ],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(StagingError::NotFound {
                entity: "item",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn get_line(
        &self,
        table: &str,
        id: &str,
    ) -> Result<Option<(String, String, StagedLine, CandidateLink)>, StagingError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM {} WHERE id = ?", LINE_COLUMNS, table);
        conn.query_row(&sql, params![id], Self::row_to_line)
            .optional()
            .map_err(db_err)
    }

    fn list_lines(
        &self,
        table: &str,
        order_id: &str,
    ) -> Result<Vec<(String, String, StagedLine, CandidateLink)>, StagingError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE order_id = ? ORDER BY rowid ASC",
            LINE_COLUMNS, table
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![order_id], Self::row_to_line)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}

impl StagingStore for SqliteStagingStore {
    fn insert_batch(&self, batch: &StagingBatch) -> Result<(), StagingError> {
        let conn = self.conn()?;
        Self::write_batch(&conn, batch, false)
    }

    fn get_batch(&self, id: &str) -> Result<Option<StagingBatch>, StagingError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM staging_batches WHERE id = ?", BATCH_COLUMNS);
        conn.query_row(&sql, params![id], Self::row_to_batch)
            .optional()
            .map_err(db_err)
    }

    fn list_batches(&self, filter: &BatchFilter) -> Result<Vec<StagingBatch>, StagingError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM staging_batches {} ORDER BY created_at ASC, rowid ASC LIMIT ? OFFSET ?",
            BATCH_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_batch)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn count_batches(&self, filter: &BatchFilter) -> Result<i64, StagingError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM staging_batches {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_err)
    }

    fn find_batch_by_hash(&self, content_hash: &str) -> Result<Option<StagingBatch>, StagingError> {
        let conn = self.conn()?;
        Self::live_batch_by_hash(&conn, content_hash)
    }

    fn insert_batch_unless_duplicate(
        &self,
        batch: &StagingBatch,
    ) -> Result<Option<StagingBatch>, StagingError> {
        let mut conn = self.conn()?;
        // Write lock before the lookup; no other session can insert in between.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        if let Some(hash) = batch.content_hash.as_deref() {
            if let Some(existing) = Self::live_batch_by_hash(&tx, hash)? {
                return Ok(Some(existing));
            }
        }
        Self::write_batch(&tx, batch, false)?;
        tx.commit().map_err(db_err)?;
        Ok(None)
    }

    fn save_batch(&self, batch: &StagingBatch) -> Result<(), StagingError> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE staging_batches SET supplier_id = ?, started_at = ?, completed_at = ?, content_hash = ?, status = ?, error_message = ?, raw_payload = ? WHERE id = ?",
                params![
                    batch.supplier_id,
                    opt_ts(batch.started_at),
                    opt_ts(batch.completed_at),
                    batch.content_hash,
                    batch.status.as_str(),
                    batch.error_message,
                    batch.raw_payload,
                    batch.id,
                ],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(StagingError::NotFound {
                entity: "batch",
                id: batch.id.clone(),
            });
        }
        Ok(())
    }

    fn delete_batch(&self, id: &str) -> Result<bool, StagingError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute("DELETE FROM staging_batches WHERE id = ?", params![id])
            .map_err(db_err)?;
        Ok(deleted > 0)
    }

    fn begin_scrape(
        &self,
        batch: &StagingBatch,
        session: &ScrapeSession,
    ) -> Result<(), StagingError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        Self::write_batch(&tx, batch, true)?;
        Self::write_session(&tx, session)?;
        tx.commit().map_err(db_err)
    }

    fn save_session(&self, session: &ScrapeSession) -> Result<(), StagingError> {
        let conn = self.conn()?;
        Self::write_session(&conn, session)
    }

    fn get_session(&self, id: &str) -> Result<Option<ScrapeSession>, StagingError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM scrape_sessions WHERE id = ?", SESSION_COLUMNS);
        conn.query_row(&sql, params![id], Self::row_to_session)
            .optional()
            .map_err(db_err)
    }

    fn list_sessions(&self, batch_id: &str) -> Result<Vec<ScrapeSession>, StagingError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM scrape_sessions WHERE batch_id = ? ORDER BY rowid ASC",
            SESSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![batch_id], Self::row_to_session)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn insert_order(&self, order: &StagingPurchaseOrder) -> Result<(), StagingError> {
        let raw_data = order
            .raw_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;

        let conn = self.conn()?;
        let sql = format!(
            "INSERT INTO staging_purchase_orders ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ORDER_COLUMNS
        );
        conn.execute(
            &sql,
            params![
                order.id,
                order.batch_id,
                order.supplier_reference,
                order.order_date.map(|d| d.format("%Y-%m-%d").to_string()),
                order.total_cents,
                order.currency,
                raw_data,
                order.status.as_str(),
                order.error_message,
                order.promoted_order_id,
                order.created_at.to_rfc3339(),
                order.updated_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get_order(&self, id: &str) -> Result<Option<StagingPurchaseOrder>, StagingError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM staging_purchase_orders WHERE id = ?",
            ORDER_COLUMNS
        );
        conn.query_row(&sql, params![id], Self::row_to_order)
            .optional()
            .map_err(db_err)
    }

    fn list_orders(&self, batch_id: &str) -> Result<Vec<StagingPurchaseOrder>, StagingError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM staging_purchase_orders WHERE batch_id = ? ORDER BY rowid ASC",
            ORDER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![batch_id], Self::row_to_order)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn save_order(&self, order: &StagingPurchaseOrder) -> Result<(), StagingError> {
        let raw_data = order
            .raw_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;

        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE staging_purchase_orders SET supplier_reference = ?, order_date = ?, total_cents = ?, currency = ?, raw_data = ?, status = ?, error_message = ?, promoted_order_id = ?, updated_at = ? WHERE id = ?",
                params![
                    order.supplier_reference,
                    order.order_date.map(|d| d.format("%Y-%m-%d").to_string()),
                    order.total_cents,
                    order.currency,
                    raw_data,
                    order.status.as_str(),
                    order.error_message,
                    order.promoted_order_id,
                    order.updated_at.to_rfc3339(),
                    order.id,
                ],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(StagingError::NotFound {
                entity: "order",
                id: order.id.clone(),
            });
        }
        Ok(())
    }

    fn insert_purchase_item(&self, item: &StagingPurchaseOrderItem) -> Result<(), StagingError> {
        self.insert_line(
            "staging_purchase_order_items",
            &item.id,
            &item.order_id,
            &item.line,
            &item.candidate,
        )
    }

    fn get_purchase_item(&self, id: &str) -> Result<Option<StagingPurchaseOrderItem>, StagingError> {
        Ok(self
            .get_line("staging_purchase_order_items", id)?
            .map(|(id, order_id, line, candidate)| StagingPurchaseOrderItem {
                id,
                order_id,
                line,
                candidate,
            }))
    }

    fn list_purchase_items(
        &self,
        order_id: &str,
    ) -> Result<Vec<StagingPurchaseOrderItem>, StagingError> {
        Ok(self
            .list_lines("staging_purchase_order_items", order_id)?
            .into_iter()
            .map(|(id, order_id, line, candidate)| StagingPurchaseOrderItem {
                id,
                order_id,
                line,
                candidate,
            })
            .collect())
    }

    fn save_purchase_item(&self, item: &StagingPurchaseOrderItem) -> Result<(), StagingError> {
        self.save_line(
            "staging_purchase_order_items",
            &item.id,
            &item.line,
            &item.candidate,
        )
    }

    fn insert_sale_item(&self, item: &StagingSaleItem) -> Result<(), StagingError> {
        self.insert_line(
            "staging_sale_items",
            &item.id,
            &item.order_id,
            &item.line,
            &item.candidate,
        )
    }

    fn get_sale_item(&self, id: &str) -> Result<Option<StagingSaleItem>, StagingError> {
        Ok(self
            .get_line("staging_sale_items", id)?
            .map(|(id, order_id, line, candidate)| StagingSaleItem {
                id,
                order_id,
                line,
                candidate,
            }))
    }

    fn list_sale_items(&self, order_id: &str) -> Result<Vec<StagingSaleItem>, StagingError> {
        Ok(self
            .list_lines("staging_sale_items", order_id)?
            .into_iter()
            .map(|(id, order_id, line, candidate)| StagingSaleItem {
                id,
                order_id,
                line,
                candidate,
            })
            .collect())
    }

    fn save_sale_item(&self, item: &StagingSaleItem) -> Result<(), StagingError> {
        self.save_line("staging_sale_items", &item.id, &item.line, &item.candidate)
    }

    fn insert_image(&self, image: &ProductImage) -> Result<(), StagingError> {
        let embedding = image
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;

        let conn = self.conn()?;
        let sql = format!(
            "INSERT INTO product_images ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
            IMAGE_COLUMNS
        );
        conn.execute(
            &sql,
            params![
                image.id,
                image.product_id,
                image.image_url,
                embedding,
                image.embedding_model,
                image.error_message,
                image.updated_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get_image(&self, id: &str) -> Result<Option<ProductImage>, StagingError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM product_images WHERE id = ?", IMAGE_COLUMNS);
        conn.query_row(&sql, params![id], Self::row_to_image)
            .optional()
            .map_err(db_err)
    }

    fn list_images_missing_embedding(
        &self,
        limit: i64,
    ) -> Result<Vec<ProductImage>, StagingError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM product_images WHERE embedding IS NULL AND error_message IS NULL ORDER BY rowid ASC LIMIT ?",
            IMAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit], Self::row_to_image)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn save_image(&self, image: &ProductImage) -> Result<(), StagingError> {
        let embedding = image
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;

        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE product_images SET image_url = ?, embedding = ?, embedding_model = ?, error_message = ?, updated_at = ? WHERE id = ?",
                params![
                    image.image_url,
                    embedding,
                    image.embedding_model,
                    image.error_message,
                    image.updated_at.to_rfc3339(),
                    image.id,
                ],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(StagingError::NotFound {
                entity: "image",
                id: image.id.clone(),
            });
        }
        Ok(())
    }
}

/// SQLite staging database that hands out one connection per session.
pub struct SqliteStagingDatabase {
    location: PathBuf,
    in_memory: bool,
    /// Keeps a shared in-memory database alive between sessions.
    _anchor: Option<Mutex<Connection>>,
}

impl SqliteStagingDatabase {
    /// Use a database file, creating the schema if needed.
    pub fn new(path: &Path) -> Result<Self, StagingError> {
        let conn = open_connection(path, false)?;
        initialize_schema(&conn)?;
        Ok(Self {
            location: path.to_path_buf(),
            in_memory: false,
            _anchor: None,
        })
    }

    /// Use a uniquely named, shared-cache in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self, StagingError> {
        let location = PathBuf::from(format!(
            "file:stockyard-{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4()
        ));
        let anchor = open_connection(&location, true)?;
        initialize_schema(&anchor)?;
        Ok(Self {
            location,
            in_memory: true,
            _anchor: Some(Mutex::new(anchor)),
        })
    }
}

impl StagingDatabase for SqliteStagingDatabase {
    fn open_session(&self) -> Result<Arc<dyn StagingStore>, StagingError> {
        let conn = open_connection(&self.location, self.in_memory)?;
        Ok(Arc::new(SqliteStagingStore::from_connection(conn)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::{BatchKind, CandidateStatus, ProcessingStatus, ScrapeState};
    use tempfile::TempDir;

    fn store() -> SqliteStagingStore {
        SqliteStagingStore::in_memory().unwrap()
    }

    fn started_batch(store: &SqliteStagingStore) -> StagingBatch {
        let mut batch = StagingBatch::new(BatchKind::WebScrape, "scrape:acme").with_supplier("acme");
        store.insert_batch(&batch).unwrap();
        batch.start(Utc::now()).unwrap();
        store.save_batch(&batch).unwrap();
        batch
    }

    #[test]
    fn test_insert_and_get_batch() {
        let store = store();
        let batch = StagingBatch::new(BatchKind::BlobUpload, "blob")
            .with_supplier("acme")
            .with_content_hash("abc")
            .with_payload("https://blobs/1.json");
        store.insert_batch(&batch).unwrap();

        let loaded = store.get_batch(&batch.id).unwrap().unwrap();
        assert_eq!(loaded.id, batch.id);
        assert_eq!(loaded.kind, BatchKind::BlobUpload);
        assert_eq!(loaded.status, ProcessingStatus::Pending);
        assert_eq!(loaded.content_hash.as_deref(), Some("abc"));
        assert_eq!(loaded.raw_payload.as_deref(), Some("https://blobs/1.json"));
        assert!(store.get_batch("missing").unwrap().is_none());
    }

    #[test]
    fn test_list_batches_by_status_and_kind() {
        let store = store();
        let pending = StagingBatch::new(BatchKind::WebScrape, "scrape:acme").with_supplier("acme");
        store.insert_batch(&pending).unwrap();
        started_batch(&store);
        let blob = StagingBatch::new(BatchKind::BlobUpload, "blob");
        store.insert_batch(&blob).unwrap();

        let filter = BatchFilter::new()
            .with_status(ProcessingStatus::Pending)
            .with_kind(BatchKind::WebScrape);
        let found = store.list_batches(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, pending.id);

        let all_pending = BatchFilter::new().with_status(ProcessingStatus::Pending);
        assert_eq!(store.count_batches(&all_pending).unwrap(), 2);
        assert_eq!(store.list_batches(&all_pending.with_limit(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_find_batch_by_hash() {
        let store = store();
        let batch = StagingBatch::new(BatchKind::WebScrape, "scrape:acme").with_content_hash("h1");
        store.insert_batch(&batch).unwrap();

        assert_eq!(store.find_batch_by_hash("h1").unwrap().unwrap().id, batch.id);
        assert!(store.find_batch_by_hash("h2").unwrap().is_none());
    }

    #[test]
    fn test_failed_batch_does_not_hold_its_hash() {
        let store = store();
        let mut failed = StagingBatch::new(BatchKind::WebScrape, "scrape:acme").with_content_hash("h1");
        store.insert_batch(&failed).unwrap();
        failed.fail("site down", Utc::now()).unwrap();
        store.save_batch(&failed).unwrap();

        assert!(store.find_batch_by_hash("h1").unwrap().is_none());

        let retry = StagingBatch::new(BatchKind::WebScrape, "scrape:acme").with_content_hash("h1");
        store.insert_batch(&retry).unwrap();
        assert_eq!(store.find_batch_by_hash("h1").unwrap().unwrap().id, retry.id);
    }

    #[test]
    fn test_insert_unless_duplicate() {
        let store = store();
        let first = StagingBatch::new(BatchKind::WebScrape, "scrape:acme").with_content_hash("h1");
        assert!(store.insert_batch_unless_duplicate(&first).unwrap().is_none());

        let second = StagingBatch::new(BatchKind::WebScrape, "scrape:acme").with_content_hash("h1");
        let existing = store.insert_batch_unless_duplicate(&second).unwrap().unwrap();
        assert_eq!(existing.id, first.id);
        assert!(store.get_batch(&second.id).unwrap().is_none());

        let unhashed = StagingBatch::new(BatchKind::BlobUpload, "blob");
        assert!(store.insert_batch_unless_duplicate(&unhashed).unwrap().is_none());
        assert!(store.get_batch(&unhashed.id).unwrap().is_some());
    }

    #[test]
    fn test_concurrent_sessions_insert_one_batch_per_hash() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(SqliteStagingDatabase::new(&dir.path().join("staging.db")).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    let session = db.open_session().unwrap();
                    let batch = StagingBatch::new(BatchKind::WebScrape, "scrape:acme")
                        .with_content_hash("same-snapshot");
                    session.insert_batch_unless_duplicate(&batch).unwrap().is_none()
                })
            })
            .collect();
        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|inserted| *inserted)
            .count();

        assert_eq!(inserted, 1);
        let session = db.open_session().unwrap();
        let filter = BatchFilter::new().with_content_hash("same-snapshot");
        assert_eq!(session.count_batches(&filter).unwrap(), 1);
    }

    #[test]
    fn test_save_missing_batch_is_not_found() {
        let store = store();
        let batch = StagingBatch::new(BatchKind::WebScrape, "scrape:acme");
        let err = store.save_batch(&batch).unwrap_err();
        assert!(matches!(err, StagingError::NotFound { entity: "batch", .. }));
    }

    #[test]
    fn test_begin_scrape_inserts_new_batch_and_session() {
        let store = store();
        let now = Utc::now();
        let mut batch = StagingBatch::new(BatchKind::WebScrape, "scrape:acme");
        batch.start(now).unwrap();
        let session = ScrapeSession::started(&batch.id, "acme", "cookie-1", now);

        store.begin_scrape(&batch, &session).unwrap();

        let loaded = store.get_batch(&batch.id).unwrap().unwrap();
        assert_eq!(loaded.status, ProcessingStatus::Started);
        let sessions = store.list_sessions(&batch.id).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state, ScrapeState::Created);
    }

    #[test]
    fn test_begin_scrape_updates_existing_batch() {
        let store = store();
        let now = Utc::now();
        let mut batch = StagingBatch::new(BatchKind::WebScrape, "scrape:acme");
        store.insert_batch(&batch).unwrap();

        batch.start(now).unwrap();
        let session = ScrapeSession::started(&batch.id, "acme", "cookie-1", now);
        store.begin_scrape(&batch, &session).unwrap();

        let loaded = store.get_batch(&batch.id).unwrap().unwrap();
        assert_eq!(loaded.status, ProcessingStatus::Started);
        assert!(loaded.started_at.is_some());
    }

    #[test]
    fn test_order_round_trip_keeps_creation_order() {
        let store = store();
        let batch = started_batch(&store);

        let mut first = StagingPurchaseOrder::new(&batch.id, "PO-1");
        first.start(Utc::now()).unwrap();
        store.insert_order(&first).unwrap();
        let second = StagingPurchaseOrder::new(&batch.id, "PO-2");
        store.insert_order(&second).unwrap();

        first.order_date = NaiveDate::from_ymd_opt(2024, 3, 1);
        first.total_cents = Some(12_550);
        first.raw_data = Some(serde_json::json!({"ref": "PO-1"}));
        first.complete(Utc::now()).unwrap();
        store.save_order(&first).unwrap();

        let orders = store.list_orders(&batch.id).unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].supplier_reference, "PO-1");
        assert_eq!(orders[0].status, ProcessingStatus::Completed);
        assert_eq!(orders[0].order_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(orders[0].raw_data, Some(serde_json::json!({"ref": "PO-1"})));
        assert_eq!(orders[1].supplier_reference, "PO-2");
    }

    #[test]
    fn test_items_round_trip_and_candidate_save() {
        let store = store();
        let batch = started_batch(&store);
        let order = StagingPurchaseOrder::new(&batch.id, "PO-1");
        store.insert_order(&order).unwrap();

        let line = StagedLine {
            sku: Some("SKU-1".to_string()),
            description: "Widget".to_string(),
            quantity: 2.0,
            unit_price_cents: Some(499),
        };
        let mut item = StagingPurchaseOrderItem::new(&order.id, line.clone());
        store.insert_purchase_item(&item).unwrap();
        let sale = StagingSaleItem::new(&order.id, line);
        store.insert_sale_item(&sale).unwrap();

        item.link_candidate("product-1").unwrap();
        store.save_purchase_item(&item).unwrap();

        let loaded = store.get_purchase_item(&item.id).unwrap().unwrap();
        assert_eq!(loaded.candidate.candidate_status, CandidateStatus::Linked);
        assert_eq!(loaded.line.unit_price_cents, Some(499));
        assert_eq!(store.list_sale_items(&order.id).unwrap().len(), 1);
        assert_eq!(
            store.get_sale_item(&sale.id).unwrap().unwrap().candidate.candidate_status,
            CandidateStatus::Pending
        );
    }

    #[test]
    fn test_delete_batch_cascades() {
        let store = store();
        let batch = started_batch(&store);
        let order = StagingPurchaseOrder::new(&batch.id, "PO-1");
        store.insert_order(&order).unwrap();
        let item = StagingPurchaseOrderItem::new(&order.id, StagedLine::default());
        store.insert_purchase_item(&item).unwrap();
        let session = ScrapeSession::started(&batch.id, "acme", "cookie-1", Utc::now());
        store.save_session(&session).unwrap();

        assert!(store.delete_batch(&batch.id).unwrap());

        assert!(store.get_order(&order.id).unwrap().is_none());
        assert!(store.get_purchase_item(&item.id).unwrap().is_none());
        assert!(store.get_session(&session.id).unwrap().is_none());
        assert!(!store.delete_batch(&batch.id).unwrap());
    }

    #[test]
    fn test_images_missing_embedding() {
        let store = store();
        let mut done = ProductImage::new("p-1", "https://img/1.jpg");
        done.set_embedding(vec![0.1, 0.2], "clip");
        store.insert_image(&done).unwrap();
        let mut failed = ProductImage::new("p-2", "https://img/2.jpg");
        failed.record_failure("404");
        store.insert_image(&failed).unwrap();
        let pending = ProductImage::new("p-3", "https://img/3.jpg");
        store.insert_image(&pending).unwrap();

        let missing = store.list_images_missing_embedding(10).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, pending.id);

        let loaded = store.get_image(&done.id).unwrap().unwrap();
        assert_eq!(loaded.embedding, Some(vec![0.1, 0.2]));
    }

    #[test]
    fn test_file_database_sessions_share_data() {
        let temp_dir = TempDir::new().unwrap();
        let db = SqliteStagingDatabase::new(&temp_dir.path().join("staging.db")).unwrap();

        let writer = db.open_session().unwrap();
        let batch = StagingBatch::new(BatchKind::BlobUpload, "blob");
        writer.insert_batch(&batch).unwrap();

        let reader = db.open_session().unwrap();
        assert!(reader.get_batch(&batch.id).unwrap().is_some());
    }

    #[test]
    fn test_memory_database_sessions_share_data() {
        let db = SqliteStagingDatabase::in_memory().unwrap();

        let writer = db.open_session().unwrap();
        let batch = StagingBatch::new(BatchKind::BlobUpload, "blob");
        writer.insert_batch(&batch).unwrap();
        drop(writer);

        let reader = db.open_session().unwrap();
        assert!(reader.get_batch(&batch.id).unwrap().is_some());

        let other = SqliteStagingDatabase::in_memory().unwrap();
        assert!(other.open_session().unwrap().get_batch(&batch.id).unwrap().is_none());
    }
}
