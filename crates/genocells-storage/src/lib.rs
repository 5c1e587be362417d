//! Persistence for genocells: grid snapshots and a DuckDB-backed tick history.

use duckdb::{Connection, Transaction, params};
use genocells_core::{GenocellsConfig, PersistenceBatch, WorldPersistence};
use std::{
    sync::{Arc, Mutex, mpsc},
    thread,
};
use thiserror::Error;
use tracing::{debug, warn};

pub mod snapshot;

pub use snapshot::{Snapshot, SnapshotError, load_from_file, save_to_file};

const DEFAULT_TICK_BUFFER: usize = 32;
const DEFAULT_EVENT_BUFFER: usize = 256;
const DEFAULT_METRIC_BUFFER: usize = 256;

/// Storage error wrapper.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[error("config encoding error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("storage worker error: {0}")]
    Worker(String),
}

/// Summary row written to the `ticks` table.
#[derive(Debug, Clone)]
struct TickRow {
    tick: i64,
    alive: i64,
    corpses: i64,
    births: i64,
    deaths: i64,
    kills: i64,
    total_energy: f64,
    average_energy: f64,
    photosynthesizers: i64,
    meat_eaters: i64,
    scavengers: i64,
}

/// Metric row written to the `metrics` table.
#[derive(Debug, Clone)]
struct MetricRow {
    tick: i64,
    name: String,
    value: f64,
}

/// Event row persisted for analytics.
#[derive(Debug, Clone)]
struct EventRow {
    tick: i64,
    kind: String,
    count: i64,
}

/// Latest metric reading fetched for analytics displays.
#[derive(Debug, Clone)]
pub struct MetricReading {
    pub tick: i64,
    pub name: String,
    pub value: f64,
}

/// Population census for one recorded tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationSample {
    pub tick: i64,
    pub alive: i64,
    pub corpses: i64,
    pub births: i64,
    pub deaths: i64,
    pub average_energy: f64,
}

#[derive(Default)]
struct StorageBuffer {
    ticks: Vec<TickRow>,
    metrics: Vec<MetricRow>,
    events: Vec<EventRow>,
}

impl StorageBuffer {
    fn is_empty(&self) -> bool {
        self.ticks.is_empty() && self.metrics.is_empty() && self.events.is_empty()
    }

    fn clear(&mut self) {
        self.ticks.clear();
        self.metrics.clear();
        self.events.clear();
    }
}

/// DuckDB-backed persistence sink with buffered writes.
pub struct Storage {
    conn: Connection,
    buffer: StorageBuffer,
    tick_flush_threshold: usize,
    event_flush_threshold: usize,
    metric_flush_threshold: usize,
}

impl Storage {
    /// Open or create a DuckDB database at the provided path with default buffering thresholds.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::with_thresholds(
            path,
            DEFAULT_TICK_BUFFER,
            DEFAULT_EVENT_BUFFER,
            DEFAULT_METRIC_BUFFER,
        )
    }

    /// Override flush thresholds for ticks, events, and metrics respectively.
    pub fn with_thresholds(
        path: &str,
        tick: usize,
        event: usize,
        metric: usize,
    ) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let mut storage = Self {
            conn,
            buffer: StorageBuffer::default(),
            tick_flush_threshold: tick.max(1),
            event_flush_threshold: event.max(1),
            metric_flush_threshold: metric.max(1),
        };
        storage.initialize_schema()?;
        debug!(path, "opened tick history database");
        Ok(storage)
    }

    fn initialize_schema(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "create table if not exists ticks (
                tick bigint primary key,
                alive bigint,
                corpses bigint,
                births bigint,
                deaths bigint,
                kills bigint,
                total_energy double,
                average_energy double,
                photosynthesizers bigint,
                meat_eaters bigint,
                scavengers bigint
            );
            create table if not exists metrics (
                tick bigint,
                name text,
                value double,
                primary key (tick, name)
            );
            create table if not exists events (
                tick bigint,
                kind text,
                count bigint,
                primary key (tick, kind)
            );
            create table if not exists run_config (
                id integer primary key,
                config text
            );",
        )?;
        Ok(())
    }

    fn enqueue(&mut self, payload: &PersistenceBatch) -> Result<(), StorageError> {
        let summary = &payload.summary;
        let tick = summary.tick.0 as i64;

        self.buffer.ticks.push(TickRow {
            tick,
            alive: summary.alive as i64,
            corpses: summary.corpses as i64,
            births: summary.births as i64,
            deaths: summary.deaths as i64,
            kills: summary.kills as i64,
            total_energy: f64::from(summary.total_energy),
            average_energy: f64::from(summary.average_energy),
            photosynthesizers: summary.photosynthesizers as i64,
            meat_eaters: summary.meat_eaters as i64,
            scavengers: summary.scavengers as i64,
        });

        for metric in &payload.metrics {
            self.buffer.metrics.push(MetricRow {
                tick,
                name: metric.name.to_string(),
                value: metric.value,
            });
        }

        for event in &payload.events {
            self.buffer.events.push(EventRow {
                tick,
                kind: event.kind.label().to_string(),
                count: event.count as i64,
            });
        }

        self.maybe_flush()
    }

    /// Persist a simulation payload, buffering until thresholds are met.
    pub fn persist(&mut self, payload: &PersistenceBatch) -> Result<(), StorageError> {
        self.enqueue(payload)
    }

    fn maybe_flush(&mut self) -> Result<(), StorageError> {
        if self.buffer.ticks.len() >= self.tick_flush_threshold
            || self.buffer.metrics.len() >= self.metric_flush_threshold
            || self.buffer.events.len() >= self.event_flush_threshold
        {
            self.flush()?;
        }
        Ok(())
    }

    fn insert_ticks(tx: &Transaction<'_>, rows: &[TickRow]) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(
            "insert or replace into ticks (
                tick, alive, corpses, births, deaths, kills,
                total_energy, average_energy, photosynthesizers, meat_eaters, scavengers
            ) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.tick,
                row.alive,
                row.corpses,
                row.births,
                row.deaths,
                row.kills,
                row.total_energy,
                row.average_energy,
                row.photosynthesizers,
                row.meat_eaters,
                row.scavengers,
            ])?;
        }
        Ok(())
    }

    fn insert_metrics(tx: &Transaction<'_>, rows: &[MetricRow]) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt =
            tx.prepare("insert or replace into metrics (tick, name, value) values (?, ?, ?)")?;
        for row in rows {
            stmt.execute(params![row.tick, row.name, row.value])?;
        }
        Ok(())
    }

    fn insert_events(tx: &Transaction<'_>, rows: &[EventRow]) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt =
            tx.prepare("insert or replace into events (tick, kind, count) values (?, ?, ?)")?;
        for row in rows {
            stmt.execute(params![row.tick, row.kind, row.count])?;
        }
        Ok(())
    }

    /// Force flush buffered records to disk.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        Self::insert_ticks(&tx, &self.buffer.ticks)?;
        Self::insert_metrics(&tx, &self.buffer.metrics)?;
        Self::insert_events(&tx, &self.buffer.events)?;
        tx.commit()?;
        debug!(ticks = self.buffer.ticks.len(), "flushed tick history");
        self.buffer.clear();
        Ok(())
    }

    /// Store the run configuration alongside the history.
    pub fn record_config(&mut self, config: &GenocellsConfig) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(config)?;
        self.conn.execute(
            "insert or replace into run_config (id, config) values (0, ?)",
            params![encoded],
        )?;
        Ok(())
    }

    /// Configuration previously stored with [`Storage::record_config`].
    pub fn stored_config(&mut self) -> Result<Option<GenocellsConfig>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("select config from run_config where id = 0")?;
        let mut rows = stmt.query([])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let encoded: String = row.get(0)?;
        Ok(Some(serde_json::from_str(&encoded)?))
    }

    /// Fetch the latest recorded metrics (ordered by name) up to `limit`.
    pub fn latest_metrics(&mut self, limit: usize) -> Result<Vec<MetricReading>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.flush()?;
        let mut stmt = self.conn.prepare("select max(tick) from metrics")?;
        let mut rows = stmt.query([])?;
        let latest_tick = match rows.next()? {
            Some(row) => row.get::<_, Option<i64>>(0)?,
            None => None,
        };
        drop(rows);

        let Some(tick) = latest_tick else {
            return Ok(Vec::new());
        };

        let mut metrics_stmt = self.conn.prepare(
            "select name, value
             from metrics
             where tick = ?
             order by name asc
             limit ?",
        )?;
        let mut metrics_rows = metrics_stmt.query(params![tick, limit as i64])?;
        let mut readings = Vec::new();
        while let Some(row) = metrics_rows.next()? {
            readings.push(MetricReading {
                tick,
                name: row.get(0)?,
                value: row.get(1)?,
            });
        }
        Ok(readings)
    }

    /// The most recent `limit` population samples, oldest first.
    pub fn population_history(
        &mut self,
        limit: usize,
    ) -> Result<Vec<PopulationSample>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.flush()?;
        let mut stmt = self.conn.prepare(
            "select tick, alive, corpses, births, deaths, average_energy
             from (select * from ticks order by tick desc limit ?)
             order by tick asc",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut samples = Vec::with_capacity(limit.min(1024));
        while let Some(row) = rows.next()? {
            samples.push(PopulationSample {
                tick: row.get(0)?,
                alive: row.get(1)?,
                corpses: row.get(2)?,
                births: row.get(3)?,
                deaths: row.get(4)?,
                average_energy: row.get(5)?,
            });
        }
        Ok(samples)
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(error = %err, "failed to flush persistence buffer on drop");
        }
    }
}

impl WorldPersistence for Storage {
    fn on_tick(&mut self, payload: &PersistenceBatch) {
        if let Err(err) = self.persist(payload) {
            warn!(
                tick = payload.summary.tick.0,
                error = %err,
                "failed to enqueue persistence data"
            );
        }
    }

    fn flush(&mut self) {
        if let Err(err) = Storage::flush(self) {
            warn!(error = %err, "failed to flush tick history");
        }
    }
}

#[derive(Debug)]
enum StorageCommand {
    Persist(PersistenceBatch),
    Flush,
    Shutdown,
}

/// Persistence sink that hands batches to a background writer thread.
pub struct StoragePipeline {
    tx: mpsc::Sender<StorageCommand>,
    storage: Arc<Mutex<Storage>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StoragePipeline {
    /// Create an asynchronous pipeline using default buffering thresholds.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        Self::from_storage(Storage::open(path)?)
    }

    /// Create an asynchronous pipeline with explicit thresholds.
    pub fn with_thresholds(
        path: &str,
        tick: usize,
        event: usize,
        metric: usize,
    ) -> Result<Self, StorageError> {
        Self::from_storage(Storage::with_thresholds(path, tick, event, metric)?)
    }

    /// Move an opened storage onto a writer thread.
    pub fn from_storage(storage: Storage) -> Result<Self, StorageError> {
        let shared = Arc::new(Mutex::new(storage));
        let (tx, rx) = mpsc::channel::<StorageCommand>();
        let worker_storage = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("genocells-storage-worker".into())
            .spawn(move || {
                while let Ok(command) = rx.recv() {
                    let mut storage = match worker_storage.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => {
                            warn!("storage mutex poisoned; recovering");
                            poisoned.into_inner()
                        }
                    };
                    match command {
                        StorageCommand::Persist(batch) => {
                            if let Err(err) = storage.persist(&batch) {
                                warn!(
                                    tick = batch.summary.tick.0,
                                    error = %err,
                                    "failed to persist tick asynchronously"
                                );
                            }
                        }
                        StorageCommand::Flush => {
                            if let Err(err) = storage.flush() {
                                warn!(error = %err, "failed to flush storage");
                            }
                        }
                        StorageCommand::Shutdown => {
                            if let Err(err) = storage.flush() {
                                warn!(error = %err, "failed to flush storage on shutdown");
                            }
                            break;
                        }
                    }
                }
            })
            .map_err(|err| {
                StorageError::Worker(format!("failed to spawn storage worker thread: {err}"))
            })?;

        Ok(Self {
            tx,
            storage: shared,
            handle: Some(handle),
        })
    }

    /// Exposes shared access to the underlying storage for analytics queries.
    #[must_use]
    pub fn storage(&self) -> Arc<Mutex<Storage>> {
        Arc::clone(&self.storage)
    }

    /// Request a flush of buffered records on the writer thread.
    pub fn request_flush(&self) {
        if self.tx.send(StorageCommand::Flush).is_err() {
            warn!("storage worker channel closed; flush request dropped");
        }
    }
}

impl WorldPersistence for StoragePipeline {
    fn on_tick(&mut self, payload: &PersistenceBatch) {
        if self
            .tx
            .send(StorageCommand::Persist(payload.clone()))
            .is_err()
        {
            warn!(
                tick = payload.summary.tick.0,
                "storage worker channel closed; tick dropped"
            );
        }
    }

    fn flush(&mut self) {
        self.request_flush();
    }
}

impl Drop for StoragePipeline {
    fn drop(&mut self) {
        let _ = self.tx.send(StorageCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && let Err(err) = handle.join()
        {
            warn!(?err, "storage worker thread panicked");
        }
    }
}
