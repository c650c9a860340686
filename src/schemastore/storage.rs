//! Durable log of DDL events plus watermark metadata.
//!
//! A single append-only file of framed records: `magic | kind | length |
//! crc32c | payload`, little-endian. DDL payloads are serialized events;
//! META payloads carry the watermarks. The latest META wins on recovery,
//! and a frame cut short by a crash is truncated away.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::core::{
    DatabaseId, DatabaseInfoMap, DdlEvent, DdlJob, DdlJobType, RenameTablesArgs, SchemaVersion,
    TableId, Ts,
};

use super::table_info::VersionedTableInfoStore;

const LOG_FILE_NAME: &str = "schema.wal";
const FRAME_MAGIC: u32 = 0x4453_4C31; // "DSL1"
const FRAME_HEADER_LEN: usize = 13;

const KIND_DDL: u8 = 1;
const KIND_META: u8 = 2;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },
    #[error("frame magic mismatch: got {got:#x}")]
    FrameMagicMismatch { got: u32 },
    #[error("frame length invalid: {reason}")]
    FrameLengthInvalid { reason: String },
    #[error("frame crc32c mismatch: expected {expected:#x}, got {got:#x}")]
    FrameCrcMismatch { expected: u32, got: u32 },
    #[error("record exceeds max bytes {max_bytes} (got {got_bytes})")]
    RecordTooLarge { max_bytes: usize, got_bytes: usize },
    #[error("unknown record kind {got}")]
    UnknownRecordKind { got: u8 },
    #[error("record codec failed: {source}")]
    Codec {
        #[from]
        source: serde_json::Error,
    },
    #[error("persistent write stalled for {elapsed_ms}ms (budget {budget_ms}ms)")]
    WriteStall { elapsed_ms: u64, budget_ms: u64 },
}

impl StorageError {
    fn io(path: impl Into<Option<PathBuf>>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Durable watermark record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub resolved_ts: Ts,
    pub finished_ddl_ts: Ts,
    pub schema_version: SchemaVersion,
    pub gc_ts: Ts,
}

/// State recovered from the log on open.
#[derive(Debug)]
pub struct Recovered {
    pub storage: PersistentStorage,
    pub meta: StoreMeta,
    pub database_map: DatabaseInfoMap,
    /// Events past the resolved frontier: they re-enter the unsorted cache.
    pub unapplied: Vec<DdlEvent>,
}

#[derive(Debug)]
struct Inner {
    file: File,
    meta: StoreMeta,
}

/// Append-only DDL log with watermark metadata and a GC floor.
#[derive(Debug)]
pub struct PersistentStorage {
    path: PathBuf,
    config: StorageConfig,
    inner: Mutex<Inner>,
}

impl PersistentStorage {
    /// Open (or create) the log under `dir` and recover its state.
    pub fn open(dir: &Path, config: StorageConfig) -> StorageResult<Recovered> {
        fs::create_dir_all(dir).map_err(|e| StorageError::io(dir.to_path_buf(), e))?;
        let path = dir.join(LOG_FILE_NAME);

        let mut events = Vec::new();
        let mut meta = StoreMeta::default();
        let mut valid_len = 0u64;
        let mut torn = false;
        if path.exists() {
            let file = File::open(&path).map_err(|e| StorageError::io(path.clone(), e))?;
            let mut scan = FrameScan::new(BufReader::new(file), config.max_record_bytes);
            while let Some((kind, payload)) = scan.read_next()? {
                match kind {
                    KIND_DDL => events.push(serde_json::from_slice::<DdlEvent>(&payload)?),
                    KIND_META => meta = serde_json::from_slice::<StoreMeta>(&payload)?,
                    other => return Err(StorageError::UnknownRecordKind { got: other }),
                }
            }
            valid_len = scan.offset;
            torn = scan.torn;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StorageError::io(path.clone(), e))?;
        if torn {
            warn!(path = %path.display(), valid_len, "truncating torn log tail");
            file.set_len(valid_len)
                .map_err(|e| StorageError::io(path.clone(), e))?;
        }
        let mut file = file;
        file.seek(SeekFrom::End(0))
            .map_err(|e| StorageError::io(path.clone(), e))?;

        events.sort_by_key(|e| (e.job.finished_ts(), e.job.version));
        let mut database_map = DatabaseInfoMap::new();
        for event in &events {
            if event.job.finished_ts() <= meta.finished_ddl_ts {
                apply_job_to_catalog(&mut database_map, &event.job);
            }
        }
        let unapplied = events
            .iter()
            .filter(|e| e.commit_ts > meta.resolved_ts)
            .cloned()
            .collect();

        debug!(
            path = %path.display(),
            events = events.len(),
            resolved_ts = %meta.resolved_ts,
            finished_ddl_ts = %meta.finished_ddl_ts,
            "opened schema log"
        );
        Ok(Recovered {
            storage: PersistentStorage {
                path,
                config,
                inner: Mutex::new(Inner { file, meta }),
            },
            meta,
            database_map,
            unapplied,
        })
    }

    /// Append a DDL event. Durable ordering against META is provided by the
    /// fsync in `update_store_meta`.
    pub fn write_ddl_event(&self, event: &DdlEvent) -> StorageResult<()> {
        let payload = serde_json::to_vec(event)?;
        self.append_frame(KIND_DDL, &payload, false)
    }

    /// Durably advance the watermarks. The fsync here is the fence that
    /// orders the META record after every previously appended DDL frame.
    pub fn update_store_meta(
        &self,
        resolved_ts: Ts,
        finished_ddl_ts: Ts,
        schema_version: SchemaVersion,
    ) -> StorageResult<()> {
        let meta = {
            let inner = self.lock();
            StoreMeta {
                resolved_ts,
                finished_ddl_ts,
                schema_version,
                gc_ts: inner.meta.gc_ts,
            }
        };
        let payload = serde_json::to_vec(&meta)?;
        self.append_frame(KIND_META, &payload, true)?;
        self.lock().meta = meta;
        Ok(())
    }

    pub fn meta(&self) -> StoreMeta {
        self.lock().meta
    }

    pub fn gc_ts(&self) -> Ts {
        self.lock().meta.gc_ts
    }

    pub fn flush(&self) -> StorageResult<()> {
        let inner = self.lock();
        inner
            .file
            .sync_data()
            .map_err(|e| StorageError::io(self.path.clone(), e))
    }

    /// Replay logged DDLs for the store's table into `store`.
    ///
    /// Applies the latest version at or below `start_ts` (the base schema a
    /// dispatcher starting there reads), then everything in
    /// `(start_ts, end_ts]`.
    pub fn build_versioned_table_info_store(
        &self,
        store: &VersionedTableInfoStore,
        start_ts: Ts,
        end_ts: Ts,
        resolve_schema_name: &dyn Fn(DatabaseId) -> Option<String>,
    ) -> StorageResult<()> {
        let table_id = store.table_id();
        let mut events: Vec<DdlEvent> = self
            .scan_events()?
            .into_iter()
            .filter(|e| involves_table(&e.job, table_id) && e.job.finished_ts() <= end_ts)
            .collect();
        events.sort_by_key(|e| (e.job.finished_ts(), e.job.version));

        let split = events.partition_point(|e| e.job.finished_ts() <= start_ts);
        let apply_from = split.saturating_sub(1);
        for event in &mut events[apply_from..] {
            if let Some(name) = resolve_schema_name(event.job.schema_id) {
                event.job.schema_name = name;
            }
            apply_job_to_store(store, table_id, &event.job);
        }
        Ok(())
    }

    /// Ordered DDL events for `table` with `after < finished_ts <= upto`.
    pub fn read_table_ddl_events(
        &self,
        table_id: TableId,
        after: Ts,
        upto: Ts,
    ) -> StorageResult<Vec<DdlEvent>> {
        let mut events: Vec<DdlEvent> = self
            .scan_events()?
            .into_iter()
            .filter(|e| {
                involves_table(&e.job, table_id)
                    && e.job.finished_ts() > after
                    && e.job.finished_ts() <= upto
            })
            .collect();
        events.sort_by_key(|e| (e.job.finished_ts(), e.job.version));
        Ok(events)
    }

    /// Rewrite the log, dropping DDL entries with `finished_ts < gc_ts`.
    /// Irreversible; the floor only moves forward.
    pub fn gc(&self, gc_ts: Ts) -> StorageResult<()> {
        let mut inner = self.lock();
        if gc_ts <= inner.meta.gc_ts {
            return Ok(());
        }

        let events = scan_path(&self.path, self.config.max_record_bytes)?;
        let mut meta = inner.meta;
        meta.gc_ts = gc_ts;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| StorageError::io(dir.to_path_buf(), e))?;
        {
            let mut file = tmp.as_file();
            let mut kept = 0usize;
            for event in &events {
                if event.job.finished_ts() < gc_ts {
                    continue;
                }
                let payload = serde_json::to_vec(event)?;
                let frame = encode_frame(KIND_DDL, &payload, self.config.max_record_bytes)?;
                file.write_all(&frame)
                    .map_err(|e| StorageError::io(self.path.clone(), e))?;
                kept += 1;
            }
            let payload = serde_json::to_vec(&meta)?;
            let frame = encode_frame(KIND_META, &payload, self.config.max_record_bytes)?;
            file.write_all(&frame)
                .map_err(|e| StorageError::io(self.path.clone(), e))?;
            file.sync_data()
                .map_err(|e| StorageError::io(self.path.clone(), e))?;
            debug!(gc_ts = %gc_ts, kept, dropped = events.len() - kept, "rewrote schema log");
        }
        tmp.persist(&self.path)
            .map_err(|e| StorageError::io(self.path.clone(), e.error))?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| StorageError::io(self.path.clone(), e))?;
        file.seek(SeekFrom::End(0))
            .map_err(|e| StorageError::io(self.path.clone(), e))?;
        inner.file = file;
        inner.meta = meta;
        Ok(())
    }

    fn scan_events(&self) -> StorageResult<Vec<DdlEvent>> {
        let _guard = self.lock();
        scan_path(&self.path, self.config.max_record_bytes)
    }

    fn append_frame(&self, kind: u8, payload: &[u8], fsync: bool) -> StorageResult<()> {
        let frame = encode_frame(kind, payload, self.config.max_record_bytes)?;
        let start = Instant::now();
        let mut inner = self.lock();
        let base_len = inner
            .file
            .metadata()
            .map_err(|e| StorageError::io(self.path.clone(), e))?
            .len();

        let mut attempt = 0u32;
        loop {
            match write_once(&mut inner.file, &frame, fsync) {
                Ok(()) => break,
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.config.write_retry_attempts.max(1) {
                        return Err(StorageError::io(self.path.clone(), err));
                    }
                    // Roll back any partial append before retrying.
                    let _ = inner.file.set_len(base_len);
                    let _ = inner.file.seek(SeekFrom::End(0));
                    let backoff = Duration::from_millis(
                        self.config.write_retry_backoff_ms << (attempt - 1),
                    );
                    warn!(attempt, ?backoff, "schema log write failed: {err}");
                    std::thread::sleep(backoff);
                }
            }
        }

        let elapsed = start.elapsed();
        let budget = Duration::from_millis(self.config.write_timeout_ms);
        if elapsed > budget {
            return Err(StorageError::WriteStall {
                elapsed_ms: elapsed.as_millis() as u64,
                budget_ms: self.config.write_timeout_ms,
            });
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn write_once(file: &mut File, frame: &[u8], fsync: bool) -> std::io::Result<()> {
    file.write_all(frame)?;
    if fsync {
        file.sync_data()?;
    }
    Ok(())
}

fn scan_path(path: &Path, max_record_bytes: usize) -> StorageResult<Vec<DdlEvent>> {
    let file = File::open(path).map_err(|e| StorageError::io(path.to_path_buf(), e))?;
    let mut scan = FrameScan::new(BufReader::new(file), max_record_bytes);
    let mut events = Vec::new();
    while let Some((kind, payload)) = scan.read_next()? {
        if kind == KIND_DDL {
            events.push(serde_json::from_slice::<DdlEvent>(&payload)?);
        }
    }
    Ok(events)
}

/// True when a job affects `table_id`, including a rename listing it.
fn involves_table(job: &DdlJob, table_id: TableId) -> bool {
    if job.table_id == table_id {
        return true;
    }
    if job.job_type == DdlJobType::RenameTables {
        return RenameTablesArgs::decode(&job.args)
            .map(|args| args.old_table_ids.contains(&table_id))
            .unwrap_or(false);
    }
    false
}

fn apply_job_to_store(store: &VersionedTableInfoStore, table_id: TableId, job: &DdlJob) {
    if job.job_type == DdlJobType::RenameTables {
        if let Ok(args) = RenameTablesArgs::decode(&job.args)
            && let Some(idx) = args.old_table_ids.iter().position(|&t| t == table_id)
        {
            store.apply_rename(
                &args.new_table_names[idx],
                job.finished_ts(),
                job.binlog.schema_version,
            );
        }
        return;
    }
    store.apply_ddl(job);
}

/// Replay one job's effect on the database map.
///
/// Lenient: recovery replays an already-validated history, so
/// inconsistencies are logged rather than surfaced.
pub(crate) fn apply_job_to_catalog(map: &mut DatabaseInfoMap, job: &DdlJob) {
    use crate::core::DatabaseInfo;
    match job.job_type {
        DdlJobType::CreateSchema => {
            if map.contains_key(&job.schema_id) {
                warn!(database = %job.schema_id, "create for existing database in replay");
                return;
            }
            map.insert(
                job.schema_id,
                DatabaseInfo::created(job.schema_name.clone(), job.finished_ts()),
            );
        }
        DdlJobType::DropSchema => {
            match map.get_mut(&job.schema_id) {
                Some(info) => info.delete_version = job.finished_ts(),
                None => warn!(database = %job.schema_id, "drop for unknown database in replay"),
            }
        }
        DdlJobType::RenameTables => {
            if let Ok(args) = RenameTablesArgs::decode(&job.args) {
                for idx in 0..args.old_table_ids.len() {
                    let table = args.old_table_ids[idx];
                    if let Some(old_db) = map.get_mut(&args.old_schema_ids[idx]) {
                        old_db.tables.remove(&table);
                    }
                    if let Some(new_db) = map.get_mut(&args.new_schema_ids[idx]) {
                        new_db.tables.insert(table);
                    }
                }
            }
        }
        kind if kind.creates_table() => {
            if let Some(info) = map.get_mut(&job.schema_id) {
                info.tables.insert(job.table_id);
            }
        }
        _ => {}
    }
}

fn encode_frame(kind: u8, payload: &[u8], max_record_bytes: usize) -> StorageResult<Vec<u8>> {
    if payload.len() > max_record_bytes {
        return Err(StorageError::RecordTooLarge {
            max_bytes: max_record_bytes,
            got_bytes: payload.len(),
        });
    }
    let length = u32::try_from(payload.len()).map_err(|_| StorageError::FrameLengthInvalid {
        reason: "frame length exceeds u32".to_string(),
    })?;
    let crc = crc32c(payload);

    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
    buf.push(kind);
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

struct FrameScan<R> {
    reader: R,
    max_record_bytes: usize,
    /// Bytes consumed by fully decoded frames.
    offset: u64,
    /// True when trailing bytes did not form a complete frame.
    torn: bool,
}

impl<R: Read> FrameScan<R> {
    fn new(reader: R, max_record_bytes: usize) -> Self {
        Self {
            reader,
            max_record_bytes,
            offset: 0,
            torn: false,
        }
    }

    fn read_next(&mut self) -> StorageResult<Option<(u8, Vec<u8>)>> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let mut read = 0usize;
        while read < header.len() {
            let n = self
                .reader
                .read(&mut header[read..])
                .map_err(|e| StorageError::io(None, e))?;
            if n == 0 {
                if read > 0 {
                    self.torn = true;
                }
                return Ok(None);
            }
            read += n;
        }

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != FRAME_MAGIC {
            return Err(StorageError::FrameMagicMismatch { got: magic });
        }
        let kind = header[4];
        let length = u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;
        if length == 0 {
            return Err(StorageError::FrameLengthInvalid {
                reason: "frame length cannot be zero".to_string(),
            });
        }
        if length > self.max_record_bytes {
            return Err(StorageError::RecordTooLarge {
                max_bytes: self.max_record_bytes,
                got_bytes: length,
            });
        }
        let expected_crc = u32::from_le_bytes([header[9], header[10], header[11], header[12]]);

        let mut payload = vec![0u8; length];
        let mut read_body = 0usize;
        while read_body < length {
            let n = self
                .reader
                .read(&mut payload[read_body..])
                .map_err(|e| StorageError::io(None, e))?;
            if n == 0 {
                self.torn = true;
                return Ok(None);
            }
            read_body += n;
        }

        let actual_crc = crc32c(&payload);
        if actual_crc != expected_crc {
            return Err(StorageError::FrameCrcMismatch {
                expected: expected_crc,
                got: actual_crc,
            });
        }

        self.offset += (FRAME_HEADER_LEN + length) as u64;
        Ok(Some((kind, payload)))
    }
}
