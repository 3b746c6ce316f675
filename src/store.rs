//! On-disk temporal event store
//!
//! Every processed event is appended to a SQLite table so results and the
//! audit log can be compiled after the queue drains, and so long runs can be
//! inspected offline. Writes are buffered; a failing store degrades to a
//! warning and never stops the simulation.

use crate::error::{ScheduleError, ScheduleResult};
use crate::events::{SimulationEvent, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Default number of buffered events before a flush
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Where the temporal store lives
#[derive(Debug, Clone, Default)]
pub enum StoreConfig {
    /// Private in-memory database, discarded with the engine
    #[default]
    InMemory,
    /// File-backed database at the given path
    File(PathBuf),
}

/// One event row read back from the store
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub timestamp: NaiveDateTime,
    pub event_type: String,
    pub task_id: Option<String>,
    pub data: serde_json::Value,
}

/// Query filters for [`TemporalStore::query`]
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub range: Option<(NaiveDateTime, NaiveDateTime)>,
    pub event_type: Option<String>,
    pub task_id: Option<String>,
}

struct BufferedRow {
    timestamp: String,
    event_type: String,
    task_id: Option<String>,
    data_json: String,
}

/// Buffered SQLite store of processed simulation events
pub struct TemporalStore {
    config: StoreConfig,
    conn: Option<Connection>,
    buffer: Vec<BufferedRow>,
    buffer_size: usize,
}

impl TemporalStore {
    /// Open (or create) the store; a connection failure is logged and the
    /// store keeps buffering in memory
    pub fn open(config: StoreConfig) -> Self {
        let conn = match Self::connect(&config) {
            Ok(conn) => Some(conn),
            Err(err) => {
                error!(%err, "could not open temporal event store");
                None
            }
        };
        Self {
            config,
            conn,
            buffer: Vec::new(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Store with a custom flush threshold
    pub fn with_buffer_size(config: StoreConfig, buffer_size: usize) -> Self {
        let mut store = Self::open(config);
        store.buffer_size = buffer_size.max(1);
        store
    }

    fn connect(config: &StoreConfig) -> ScheduleResult<Connection> {
        let conn = match config {
            StoreConfig::InMemory => Connection::open_in_memory(),
            StoreConfig::File(path) => Connection::open(path),
        }
        .map_err(|e| ScheduleError::Storage(format!("failed to open database: {}", e)))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS eventos_simulacion (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                tipo_evento TEXT NOT NULL,
                tarea_id TEXT,
                datos_json TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| ScheduleError::Storage(format!("failed to create event table: {}", e)))?;
        Ok(conn)
    }

    /// Append one event; flushes when the buffer fills. Never fails the
    /// caller: storage trouble is logged and the buffer retained.
    pub fn record(&mut self, event: &SimulationEvent) {
        self.buffer.push(BufferedRow {
            timestamp: event.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            event_type: event.kind().tag().to_string(),
            task_id: event.payload.task_id().map(str::to_string),
            data_json: event.payload.data_json().to_string(),
        });
        if self.buffer.len() >= self.buffer_size {
            self.flush();
        }
    }

    /// Write buffered rows out; on failure the buffer is kept for retry
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        if let Err(err) = self.try_flush() {
            warn!(%err, buffered = self.buffer.len(), "event flush failed, retaining buffer");
        }
    }

    fn try_flush(&mut self) -> ScheduleResult<()> {
        if self.conn.is_none() {
            // One reconnection attempt for file-backed stores; an in-memory
            // database would come back empty, so the buffer just waits.
            if matches!(self.config, StoreConfig::File(_)) {
                self.conn = Some(Self::connect(&self.config)?);
            } else {
                return Err(ScheduleError::Storage(
                    "no connection to in-memory store".to_string(),
                ));
            }
        }
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| ScheduleError::Storage("store connection unavailable".to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| ScheduleError::Storage(format!("transaction error: {}", e)))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO eventos_simulacion (timestamp, tipo_evento, tarea_id, datos_json)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(|e| ScheduleError::Storage(format!("prepare error: {}", e)))?;
            for row in &self.buffer {
                stmt.execute(params![
                    row.timestamp,
                    row.event_type,
                    row.task_id,
                    row.data_json
                ])
                .map_err(|e| ScheduleError::Storage(format!("insert error: {}", e)))?;
            }
        }
        tx.commit()
            .map_err(|e| ScheduleError::Storage(format!("commit error: {}", e)))?;
        info!(rows = self.buffer.len(), "flushed events to temporal store");
        self.buffer.clear();
        Ok(())
    }

    /// Read events back, oldest first, honoring the given filters
    pub fn query(&mut self, filter: &EventFilter) -> ScheduleResult<Vec<StoredEvent>> {
        self.flush();
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| ScheduleError::Storage("store connection unavailable".to_string()))?;

        let mut sql =
            String::from("SELECT timestamp, tipo_evento, tarea_id, datos_json FROM eventos_simulacion");
        let mut conditions: Vec<String> = Vec::new();
        let mut params_vec: Vec<String> = Vec::new();
        if let Some((start, end)) = &filter.range {
            conditions.push("timestamp >= ? AND timestamp <= ?".to_string());
            params_vec.push(start.format(TIMESTAMP_FORMAT).to_string());
            params_vec.push(end.format(TIMESTAMP_FORMAT).to_string());
        }
        if let Some(event_type) = &filter.event_type {
            conditions.push("tipo_evento = ?".to_string());
            params_vec.push(event_type.clone());
        }
        if let Some(task_id) = &filter.task_id {
            conditions.push("tarea_id = ?".to_string());
            params_vec.push(task_id.clone());
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp ASC, id ASC");

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| ScheduleError::Storage(format!("query prepare error: {}", e)))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params_vec.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| ScheduleError::Storage(format!("query error: {}", e)))?;

        let mut events = Vec::new();
        for row in rows {
            let (timestamp, event_type, task_id, data_json) =
                row.map_err(|e| ScheduleError::Storage(format!("row error: {}", e)))?;
            let timestamp = NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT)
                .map_err(|e| ScheduleError::Storage(format!("bad stored timestamp: {}", e)))?;
            let data = serde_json::from_str(&data_json)
                .map_err(|e| ScheduleError::Storage(format!("bad stored payload: {}", e)))?;
            events.push(StoredEvent {
                timestamp,
                event_type,
                task_id,
                data,
            });
        }
        Ok(events)
    }

    /// Flush and drop the connection
    pub fn close(&mut self) {
        self.flush();
        if !self.buffer.is_empty() {
            error!(
                buffered = self.buffer.len(),
                "closing temporal store with unflushed events"
            );
        }
        self.conn = None;
    }
}

impl Drop for TemporalStore {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventPayload, EventQueue};
    use chrono::NaiveDate;

    fn ts(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 9)
            .unwrap()
            .and_hms_opt(8, minute, 0)
            .unwrap()
    }

    fn start_event(queue: &mut EventQueue, task: &str, minute: u32) -> SimulationEvent {
        queue.push(
            ts(minute),
            EventPayload::StartUnit {
                task_id: task.to_string(),
                unit: 1,
                instance_id: "i".to_string(),
                activated_by_cycle: false,
                unlocked_by: None,
                started_by_date: false,
                migrated_workers: vec![],
            },
        );
        queue.pop().unwrap()
    }

    #[test]
    fn test_record_and_query_round_trip() {
        let mut queue = EventQueue::new();
        let mut store = TemporalStore::with_buffer_size(StoreConfig::InMemory, 2);
        store.record(&start_event(&mut queue, "a", 0));
        store.record(&start_event(&mut queue, "b", 1));

        let all = store.query(&EventFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].event_type, "INICIO_UNIDAD");
        assert_eq!(all[0].task_id.as_deref(), Some("a"));
        assert_eq!(all[0].data["unit"], 1);
    }

    #[test]
    fn test_query_filters_by_task_and_range() {
        let mut queue = EventQueue::new();
        let mut store = TemporalStore::open(StoreConfig::InMemory);
        for minute in 0..5 {
            store.record(&start_event(&mut queue, "a", minute));
        }
        store.record(&start_event(&mut queue, "b", 5));

        let filtered = store
            .query(&EventFilter {
                range: Some((ts(1), ts(3))),
                event_type: Some("INICIO_UNIDAD".to_string()),
                task_id: Some("a".to_string()),
            })
            .unwrap();
        assert_eq!(filtered.len(), 3);
        assert!(filtered.iter().all(|e| e.task_id.as_deref() == Some("a")));
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let mut queue = EventQueue::new();
        {
            let mut store = TemporalStore::open(StoreConfig::File(path.clone()));
            store.record(&start_event(&mut queue, "a", 0));
            store.close();
        }
        let mut reopened = TemporalStore::open(StoreConfig::File(path));
        let rows = reopened.query(&EventFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
