// LogThreads - app/reader.rs
//
// Chunked reader: parses a large source incrementally in fixed-size byte
// windows.
//
// Architecture:
//   - `ChunkedReader` is an explicit state machine. `step()` does at most one
//     chunk of work and returns, so the caller decides how to schedule it
//     (the processing queue interleaves several readers; `run()` drives one
//     reader to completion on the current thread).
//   - `ReaderControl` holds shared atomic flags so pause/resume/abort can be
//     requested from any thread. Requests take effect at the next step.
//   - Lines are split on '\n'. A line cut by a window boundary is carried
//     over as raw bytes and emitted with the chunk in which it completes.
//
// Failure: an I/O error or a complete line that is not valid UTF-8 fails the
// whole source. An aborted reader fires no further callbacks.

use crate::core::filter::EntrySearch;
use crate::core::model::LogEntry;
use crate::core::parser;
use crate::util::constants;
use crate::util::error::ReadError;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// Byte sources
// =============================================================================

/// Random-access byte input with a known size.
pub trait ByteSource: Send {
    /// Display name used in events and logs.
    fn name(&self) -> &str;

    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Read bytes `[start, end)`. May return fewer bytes if the source
    /// shrank.
    fn read_slice(&mut self, start: u64, end: u64) -> io::Result<Vec<u8>>;
}

/// A file on disk, read with seek + read.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    file: File,
    size: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, ReadError> {
        let open_err = |source| ReadError::Open {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(open_err)?;
        let size = file.metadata().map_err(open_err)?.len();

        Ok(Self {
            path: path.to_path_buf(),
            name: path.display().to_string(),
            file,
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_slice(&mut self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(start))?;
        let mut buf = Vec::with_capacity(end.saturating_sub(start) as usize);
        (&mut self.file)
            .take(end.saturating_sub(start))
            .read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// In-memory bytes, for tests and already-loaded content.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

impl ByteSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_slice(&mut self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let len = self.data.len();
        let start = (start as usize).min(len);
        let end = (end as usize).min(len);
        Ok(self.data[start..end].to_vec())
    }
}

// =============================================================================
// Shared handles
// =============================================================================

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Read window in bytes.
    pub chunk_size: usize,
    /// Retained-chunk budget in bytes (estimated, not measured).
    pub max_memory_usage: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: constants::DEFAULT_CHUNK_SIZE,
            max_memory_usage: constants::DEFAULT_MAX_MEMORY_USAGE,
        }
    }
}

/// Pause/resume/abort flags shared with whoever drives the reader.
#[derive(Debug, Clone, Default)]
pub struct ReaderControl {
    paused: Arc<AtomicBool>,
    aborted: Arc<AtomicBool>,
}

impl ReaderControl {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.aborted.store(false, Ordering::SeqCst);
    }
}

/// Monotonic entry id source. Clones share the counter.
#[derive(Debug, Clone, Default)]
pub struct EntryIdAllocator(Arc<AtomicU64>);

impl EntryIdAllocator {
    pub fn starting_at(first: u64) -> Self {
        Self(Arc::new(AtomicU64::new(first)))
    }

    pub fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

// =============================================================================
// Reader records
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    Reading,
    Paused,
    Completed,
    Failed,
    Aborted,
}

impl ReaderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReaderState::Completed | ReaderState::Failed | ReaderState::Aborted
        )
    }
}

/// Entries parsed from one window, plus where the window sat in the source.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// `<source name>#<index>`.
    pub id: String,
    pub index: usize,
    /// Byte offset of the window.
    pub offset: u64,
    /// Window length in bytes.
    pub size: u64,
    pub entries: Vec<LogEntry>,
    pub is_last_chunk: bool,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadProgress {
    pub progress_percent: f64,
    pub processed_bytes: u64,
    pub total_bytes: u64,
    pub current_chunk_index: usize,
    /// Linear extrapolation from elapsed time. `None` until some progress
    /// has been made.
    pub estimated_time_remaining: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadSummary {
    pub source: String,
    pub total_chunks: usize,
    pub total_size: u64,
    pub processing_time: Duration,
    /// Zero for an empty source.
    pub average_chunk_size: u64,
    pub total_entries: usize,
}

/// One page of retained entries.
#[derive(Debug, Clone)]
pub struct EntriesPage {
    pub entries: Vec<LogEntry>,
    pub page: usize,
    pub page_size: usize,
    pub total_entries: usize,
    pub total_pages: usize,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

/// Receives reader callbacks. Every method defaults to doing nothing.
pub trait ReadObserver {
    fn on_chunk(&mut self, _chunk: &ChunkRecord) {}
    fn on_progress(&mut self, _progress: &ReadProgress) {}
    fn on_complete(&mut self, _summary: &ReadSummary) {}
    fn on_error(&mut self, _error: &ReadError) {}
}

impl ReadObserver for () {}

// =============================================================================
// ChunkedReader
// =============================================================================

pub struct ChunkedReader<S: ByteSource> {
    source: S,
    config: ReaderConfig,
    control: ReaderControl,
    ids: EntryIdAllocator,
    state: ReaderState,

    /// Next byte to read.
    offset: u64,
    /// Bytes of an incomplete trailing line, and where they start.
    carry: Vec<u8>,
    carry_offset: u64,

    chunk_index: usize,
    chunks: Vec<ChunkRecord>,
    total_entries: usize,
    started_at: Option<Instant>,
    error: Option<String>,
}

impl<S: ByteSource> ChunkedReader<S> {
    pub fn new(source: S, config: ReaderConfig) -> Self {
        Self::with_id_allocator(source, config, EntryIdAllocator::default())
    }

    /// Reader drawing entry ids from a shared allocator.
    pub fn with_id_allocator(source: S, config: ReaderConfig, ids: EntryIdAllocator) -> Self {
        Self {
            source,
            config,
            control: ReaderControl::default(),
            ids,
            state: ReaderState::Idle,
            offset: 0,
            carry: Vec::new(),
            carry_offset: 0,
            chunk_index: 0,
            chunks: Vec::new(),
            total_entries: 0,
            started_at: None,
            error: None,
        }
    }

    /// Handle for pausing, resuming or aborting from elsewhere.
    pub fn control(&self) -> ReaderControl {
        self.control.clone()
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn total_bytes(&self) -> u64 {
        self.source.size()
    }

    pub fn processed_bytes(&self) -> u64 {
        self.offset
    }

    /// Message of the failure, once the reader is `Failed`.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Chunks still held in memory, oldest first.
    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.chunks
    }

    /// Begin (or restart) reading from offset 0.
    pub fn start(&mut self) -> Result<(), ReadError> {
        if matches!(self.state, ReaderState::Reading | ReaderState::Paused) {
            return Err(ReadError::AlreadyReading);
        }

        self.control.clear();
        self.offset = 0;
        self.carry.clear();
        self.carry_offset = 0;
        self.chunk_index = 0;
        self.chunks.clear();
        self.total_entries = 0;
        self.error = None;
        self.started_at = Some(Instant::now());
        self.state = ReaderState::Reading;

        tracing::info!(
            source = self.source.name(),
            size = self.source.size(),
            chunk_size = self.config.chunk_size,
            "Reading started"
        );
        Ok(())
    }

    /// Advance by at most one chunk and report the resulting state.
    ///
    /// Callback order for a chunk: `on_chunk`, `on_progress`, then
    /// `on_complete` when it was the last one.
    pub fn step(&mut self, observer: &mut dyn ReadObserver) -> ReaderState {
        if !matches!(self.state, ReaderState::Reading | ReaderState::Paused) {
            return self.state;
        }
        if self.control.is_aborted() {
            return self.finish_aborted();
        }
        if self.control.is_paused() {
            if self.state == ReaderState::Reading {
                tracing::debug!(
                    source = self.source.name(),
                    offset = self.offset,
                    "Reading paused"
                );
            }
            self.state = ReaderState::Paused;
            return self.state;
        }
        if self.state == ReaderState::Paused {
            tracing::debug!(source = self.source.name(), offset = self.offset, "Reading resumed");
            self.state = ReaderState::Reading;
        }

        let total = self.source.size();
        if self.offset >= total {
            // Empty source: nothing to read, complete straight away.
            self.complete(observer);
            return self.state;
        }

        let chunk = match self.read_chunk(total) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(source = self.source.name(), error = %e, "Reading failed");
                self.error = Some(e.to_string());
                self.state = ReaderState::Failed;
                observer.on_error(&e);
                return self.state;
            }
        };

        if self.control.is_aborted() {
            return self.finish_aborted();
        }

        observer.on_chunk(&chunk);
        let is_last = chunk.is_last_chunk;
        self.offset = chunk.offset + chunk.size;
        self.total_entries += chunk.entries.len();
        self.chunk_index += 1;
        self.chunks.push(chunk);
        self.evict_old_chunks();

        observer.on_progress(&self.progress());

        if is_last {
            self.complete(observer);
        }
        self.state
    }

    /// Drive `step()` until the reader stops, sleeping while paused and
    /// yielding the thread after each chunk.
    pub fn run(&mut self, observer: &mut dyn ReadObserver) -> ReaderState {
        loop {
            match self.step(observer) {
                ReaderState::Reading => std::thread::yield_now(),
                ReaderState::Paused => std::thread::sleep(Duration::from_millis(
                    constants::PAUSE_POLL_INTERVAL_MS,
                )),
                other => return other,
            }
        }
    }

    /// Current progress snapshot.
    pub fn progress(&self) -> ReadProgress {
        let total = self.source.size();
        let fraction = if total == 0 {
            1.0
        } else {
            self.offset as f64 / total as f64
        };

        let estimated_time_remaining = match self.started_at {
            Some(started) if fraction > 0.0 && self.chunk_index > 0 => {
                let elapsed = started.elapsed().as_secs_f64();
                Some(Duration::from_secs_f64(
                    (elapsed / fraction - elapsed).max(0.0),
                ))
            }
            _ => None,
        };

        ReadProgress {
            progress_percent: fraction * 100.0,
            processed_bytes: self.offset,
            total_bytes: total,
            current_chunk_index: self.chunk_index.saturating_sub(1),
            estimated_time_remaining,
        }
    }

    /// Retained entries in byte order.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.chunks.iter().flat_map(|c| c.entries.iter())
    }

    pub fn all_entries(&self) -> Vec<LogEntry> {
        self.entries().cloned().collect()
    }

    /// A page of retained entries. Evicted chunks are not included.
    pub fn entries_page(&self, page: usize, page_size: usize) -> EntriesPage {
        let page_size = page_size.max(1);
        let total_entries = self.entries().count();
        let start = page.saturating_mul(page_size);
        let end = start.saturating_add(page_size);

        EntriesPage {
            entries: self.entries().skip(start).take(page_size).cloned().collect(),
            page,
            page_size,
            total_entries,
            total_pages: total_entries.div_ceil(page_size),
            has_next_page: end < total_entries,
            has_previous_page: page > 0,
        }
    }

    /// Retained entries matching a field search.
    pub fn search_entries(&self, search: &EntrySearch) -> Vec<LogEntry> {
        let matches = search.matcher();
        self.entries().filter(|entry| matches(entry)).cloned().collect()
    }

    fn read_chunk(&mut self, total: u64) -> Result<ChunkRecord, ReadError> {
        let start = self.offset;
        let end = start
            .saturating_add(self.config.chunk_size.max(1) as u64)
            .min(total);

        let bytes = self
            .source
            .read_slice(start, end)
            .map_err(|source| ReadError::Io {
                offset: start,
                source,
            })?;
        // A source that shrank underneath us ends here.
        let end = start + bytes.len() as u64;
        let is_last_chunk = end >= total || bytes.is_empty();

        let buf_offset = if self.carry.is_empty() {
            start
        } else {
            self.carry_offset
        };
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(&bytes);

        let complete_len = if is_last_chunk {
            buf.len()
        } else {
            buf.iter().rposition(|&b| b == b'\n').map_or(0, |p| p + 1)
        };
        self.carry = buf[complete_len..].to_vec();
        self.carry_offset = buf_offset + complete_len as u64;

        let entries = self.parse_lines(&buf[..complete_len], buf_offset)?;

        tracing::debug!(
            source = self.source.name(),
            chunk = self.chunk_index,
            offset = start,
            size = end - start,
            entries = entries.len(),
            carried = self.carry.len(),
            "Chunk processed"
        );

        Ok(ChunkRecord {
            id: format!("{}#{}", self.source.name(), self.chunk_index),
            index: self.chunk_index,
            offset: start,
            size: end - start,
            entries,
            is_last_chunk,
            processed_at: Utc::now(),
        })
    }

    fn parse_lines(&self, bytes: &[u8], base_offset: u64) -> Result<Vec<LogEntry>, ReadError> {
        let mut entries = Vec::new();
        let mut line_offset = base_offset;

        for raw in bytes.split(|&b| b == b'\n') {
            let offset = line_offset;
            line_offset += raw.len() as u64 + 1;

            let text = std::str::from_utf8(raw)
                .map_err(|source| ReadError::InvalidEncoding { offset, source })?;
            let Some(line) = parser::normalise_line(text) else {
                continue;
            };
            if let Some(mut entry) = parser::parse_line(line, offset, 0) {
                entry.id = self.ids.next_id();
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Keep the newest chunks once the estimated footprint exceeds budget.
    fn evict_old_chunks(&mut self) {
        let retained: usize = self.chunks.iter().map(|c| c.entries.len()).sum();
        let estimate = retained as u64 * constants::ESTIMATED_BYTES_PER_ENTRY;
        let floor = constants::RETAINED_CHUNKS_FLOOR;

        if estimate > self.config.max_memory_usage && self.chunks.len() > floor {
            let evict = self.chunks.len() - floor;
            self.chunks.drain(..evict);
            tracing::debug!(
                source = self.source.name(),
                evicted = evict,
                estimate,
                "Evicted old chunks"
            );
        }
    }

    fn complete(&mut self, observer: &mut dyn ReadObserver) {
        self.state = ReaderState::Completed;
        let total_size = self.source.size();
        let summary = ReadSummary {
            source: self.source.name().to_string(),
            total_chunks: self.chunk_index,
            total_size,
            processing_time: self.started_at.map(|t| t.elapsed()).unwrap_or_default(),
            average_chunk_size: if self.chunk_index == 0 {
                0
            } else {
                total_size / self.chunk_index as u64
            },
            total_entries: self.total_entries,
        };

        tracing::info!(
            source = %summary.source,
            chunks = summary.total_chunks,
            entries = summary.total_entries,
            elapsed_ms = summary.processing_time.as_millis() as u64,
            "Reading completed"
        );
        observer.on_complete(&summary);
    }

    fn finish_aborted(&mut self) -> ReaderState {
        tracing::info!(source = self.source.name(), offset = self.offset, "Reading aborted");
        self.state = ReaderState::Aborted;
        self.state
    }
}
