// LogThreads - app/queue.rs
//
// Multi-file processing with a bounded number of active readers.
//
// Architecture:
//   - `ProcessingQueue` is cooperative and single-threaded. Each `step()`
//     fills free slots from the pending list, then advances every active
//     reader by one chunk, round robin. Progress across files interleaves;
//     within one file chunks stay in byte order.
//   - `QueueManager` runs a queue on a background thread and delivers
//     `QueueEvent`s over an mpsc channel. An `Arc<AtomicBool>` cancel flag
//     lets the caller stop it cooperatively.
//
// A failing file never affects its siblings. Retrying a failed file puts it
// back at the end of the pending list; it is read again from offset 0.

use crate::app::reader::{
    ChunkRecord, ChunkedReader, EntryIdAllocator, FileSource, ReadObserver, ReadProgress,
    ReadSummary, ReaderConfig, ReaderState,
};
use crate::core::model::LogEntry;
use crate::util::constants;
use crate::util::error::ReadError;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

/// Index of a file in the queue, stable for the queue's lifetime.
pub type JobId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Aborted,
}

/// Final state of one queued file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOutcome {
    pub job: JobId,
    pub path: PathBuf,
    pub status: JobStatus,
    /// Number of times the file was started.
    pub attempts: u32,
    /// Entries parsed during the latest attempt.
    pub entries: usize,
    pub error: Option<String>,
}

/// Everything the queue reports, in the order it happens.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    FileQueued {
        job: JobId,
        path: PathBuf,
    },
    FileStarted {
        job: JobId,
        path: PathBuf,
        size: u64,
        attempt: u32,
    },
    Chunk {
        job: JobId,
        chunk_index: usize,
        entries: Vec<LogEntry>,
        is_last_chunk: bool,
    },
    Progress {
        job: JobId,
        progress: ReadProgress,
    },
    FileCompleted {
        job: JobId,
        summary: ReadSummary,
    },
    FileFailed {
        job: JobId,
        path: PathBuf,
        message: String,
    },
    FileAborted {
        job: JobId,
        path: PathBuf,
    },
    /// Sent once each time the queue drains.
    AllCompleted {
        outcomes: Vec<FileOutcome>,
    },
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub reader: ReaderConfig,
    /// Maximum number of files read at the same time.
    pub concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            reader: ReaderConfig::default(),
            concurrency: constants::DEFAULT_CONCURRENCY,
        }
    }
}

#[derive(Debug)]
struct Job {
    path: PathBuf,
    status: JobStatus,
    attempts: u32,
    entries: usize,
    error: Option<String>,
}

pub struct ProcessingQueue {
    config: QueueConfig,
    ids: EntryIdAllocator,
    jobs: Vec<Job>,
    pending: VecDeque<JobId>,
    active: Vec<(JobId, ChunkedReader<FileSource>)>,
    /// Events raised outside `step()`, delivered on the next step.
    notices: Vec<QueueEvent>,
    drained_reported: bool,
}

impl ProcessingQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_id_allocator(config, EntryIdAllocator::default())
    }

    /// Queue whose readers draw entry ids from `ids`.
    pub fn with_id_allocator(config: QueueConfig, ids: EntryIdAllocator) -> Self {
        Self {
            config,
            ids,
            jobs: Vec::new(),
            pending: VecDeque::new(),
            active: Vec::new(),
            notices: Vec::new(),
            drained_reported: false,
        }
    }

    /// Add a file to the end of the pending list.
    pub fn enqueue(&mut self, path: PathBuf) -> JobId {
        let job = self.jobs.len();
        tracing::debug!(job, file = %path.display(), "File queued");
        self.notices.push(QueueEvent::FileQueued {
            job,
            path: path.clone(),
        });
        self.jobs.push(Job {
            path,
            status: JobStatus::Pending,
            attempts: 0,
            entries: 0,
            error: None,
        });
        self.pending.push_back(job);
        self.drained_reported = false;
        job
    }

    /// Re-queue a failed or aborted file. Returns false for any other job.
    pub fn retry(&mut self, job: JobId) -> bool {
        let Some(entry) = self.jobs.get_mut(job) else {
            return false;
        };
        if !matches!(entry.status, JobStatus::Failed | JobStatus::Aborted) {
            return false;
        }

        tracing::info!(job, file = %entry.path.display(), "Retrying file");
        entry.status = JobStatus::Pending;
        entry.error = None;
        entry.entries = 0;
        self.notices.push(QueueEvent::FileQueued {
            job,
            path: entry.path.clone(),
        });
        self.pending.push_back(job);
        self.drained_reported = false;
        true
    }

    /// Abort every active reader and drop every pending file.
    ///
    /// Active readers stop at their next step.
    pub fn abort_all(&mut self) {
        for job in self.pending.drain(..) {
            self.jobs[job].status = JobStatus::Aborted;
        }
        for (_, reader) in &self.active {
            reader.control().abort();
        }
        tracing::info!(active = self.active.len(), "Queue aborted");
    }

    pub fn status(&self, job: JobId) -> Option<JobStatus> {
        self.jobs.get(job).map(|j| j.status)
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    pub fn outcomes(&self) -> Vec<FileOutcome> {
        self.jobs
            .iter()
            .enumerate()
            .map(|(job, j)| FileOutcome {
                job,
                path: j.path.clone(),
                status: j.status,
                attempts: j.attempts,
                entries: j.entries,
                error: j.error.clone(),
            })
            .collect()
    }

    /// Do one round of work. Returns false once the queue has drained and
    /// `AllCompleted` has been delivered.
    pub fn step<F>(&mut self, sink: &mut F) -> bool
    where
        F: FnMut(QueueEvent),
    {
        for notice in self.notices.drain(..) {
            sink(notice);
        }

        self.fill_slots(sink);

        let mut i = 0;
        while i < self.active.len() {
            let (job, reader) = &mut self.active[i];
            let job = *job;

            let mut observer = JobObserver {
                job,
                path: &self.jobs[job].path,
                sink: &mut *sink,
                entries: 0,
            };
            let state = reader.step(&mut observer);
            let produced = observer.entries;

            let entry = &mut self.jobs[job];
            entry.entries += produced;

            if state.is_terminal() {
                entry.status = match state {
                    ReaderState::Completed => JobStatus::Completed,
                    ReaderState::Failed => JobStatus::Failed,
                    _ => JobStatus::Aborted,
                };
                entry.error = reader.error().map(str::to_string);
                if state == ReaderState::Aborted {
                    sink(QueueEvent::FileAborted {
                        job,
                        path: entry.path.clone(),
                    });
                }
                tracing::debug!(job, status = ?entry.status, "File finished");
                self.active.remove(i);
            } else {
                i += 1;
            }
        }

        // Free slots are refilled on the next step.
        if self.is_idle() {
            if !self.drained_reported {
                self.drained_reported = true;
                let outcomes = self.outcomes();
                tracing::info!(files = outcomes.len(), "All files processed");
                sink(QueueEvent::AllCompleted { outcomes });
            }
            return false;
        }
        true
    }

    /// Step until drained, yielding the thread between rounds.
    pub fn run<F>(&mut self, mut sink: F) -> Vec<FileOutcome>
    where
        F: FnMut(QueueEvent),
    {
        while self.step(&mut sink) {
            std::thread::yield_now();
        }
        self.outcomes()
    }

    fn fill_slots<F>(&mut self, sink: &mut F)
    where
        F: FnMut(QueueEvent),
    {
        let limit = self.config.concurrency.max(1);

        while self.active.len() < limit {
            let Some(job) = self.pending.pop_front() else {
                break;
            };
            let entry = &mut self.jobs[job];
            entry.attempts += 1;

            let opened = FileSource::open(&entry.path).and_then(|source| {
                let mut reader = ChunkedReader::with_id_allocator(
                    source,
                    self.config.reader.clone(),
                    self.ids.clone(),
                );
                reader.start().map(|_| reader)
            });

            match opened {
                Ok(reader) => {
                    entry.status = JobStatus::Active;
                    tracing::debug!(
                        job,
                        file = %entry.path.display(),
                        attempt = entry.attempts,
                        "File started"
                    );
                    sink(QueueEvent::FileStarted {
                        job,
                        path: entry.path.clone(),
                        size: reader.total_bytes(),
                        attempt: entry.attempts,
                    });
                    self.active.push((job, reader));
                }
                Err(e) => {
                    tracing::warn!(
                        job,
                        file = %entry.path.display(),
                        error = %e,
                        "Cannot start file"
                    );
                    entry.status = JobStatus::Failed;
                    entry.error = Some(e.to_string());
                    sink(QueueEvent::FileFailed {
                        job,
                        path: entry.path.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

/// Forwards one reader's callbacks as queue events.
struct JobObserver<'a, F: FnMut(QueueEvent)> {
    job: JobId,
    path: &'a PathBuf,
    sink: &'a mut F,
    entries: usize,
}

impl<F: FnMut(QueueEvent)> ReadObserver for JobObserver<'_, F> {
    fn on_chunk(&mut self, chunk: &ChunkRecord) {
        self.entries += chunk.entries.len();
        (self.sink)(QueueEvent::Chunk {
            job: self.job,
            chunk_index: chunk.index,
            entries: chunk.entries.clone(),
            is_last_chunk: chunk.is_last_chunk,
        });
    }

    fn on_progress(&mut self, progress: &ReadProgress) {
        (self.sink)(QueueEvent::Progress {
            job: self.job,
            progress: progress.clone(),
        });
    }

    fn on_complete(&mut self, summary: &ReadSummary) {
        (self.sink)(QueueEvent::FileCompleted {
            job: self.job,
            summary: summary.clone(),
        });
    }

    fn on_error(&mut self, error: &ReadError) {
        (self.sink)(QueueEvent::FileFailed {
            job: self.job,
            path: self.path.clone(),
            message: error.to_string(),
        });
    }
}

// =============================================================================
// QueueManager
// =============================================================================

/// Runs a processing queue on a background thread.
pub struct QueueManager {
    /// Channel receiver for polling queue events.
    pub event_rx: Option<mpsc::Receiver<QueueEvent>>,

    /// Cancel flag shared with the background thread.
    cancel_flag: Option<Arc<AtomicBool>>,

    handle: Option<JoinHandle<()>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self {
            event_rx: None,
            cancel_flag: None,
            handle: None,
        }
    }

    /// Process `paths` on a background thread.
    ///
    /// If a run is already in progress it is cancelled first.
    pub fn start(&mut self, paths: Vec<PathBuf>, config: QueueConfig, ids: EntryIdAllocator) {
        self.cancel();

        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));

        self.event_rx = Some(rx);
        self.cancel_flag = Some(Arc::clone(&cancel));

        let file_count = paths.len();
        self.handle = Some(std::thread::spawn(move || {
            run_queue(paths, config, ids, tx, cancel);
        }));

        tracing::info!(files = file_count, "Processing started");
    }

    /// Request cancellation. The background thread aborts all files, sends
    /// the final `AllCompleted` and exits.
    pub fn cancel(&mut self) {
        if let Some(flag) = &self.cancel_flag {
            flag.store(true, Ordering::SeqCst);
        }
        self.cancel_flag = None;
    }

    /// Poll for events without blocking. Returns all pending events.
    pub fn poll_events(&self) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        if let Some(ref rx) = self.event_rx {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        events
    }

    /// True while the background thread is alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

fn run_queue(
    paths: Vec<PathBuf>,
    config: QueueConfig,
    ids: EntryIdAllocator,
    tx: mpsc::Sender<QueueEvent>,
    cancel: Arc<AtomicBool>,
) {
    let mut queue = ProcessingQueue::with_id_allocator(config, ids);
    for path in paths {
        queue.enqueue(path);
    }

    let mut aborted = false;
    let mut sink = |event: QueueEvent| {
        if tx.send(event).is_err() {
            // Receiver dropped; nobody is listening any more.
            cancel.store(true, Ordering::SeqCst);
        }
    };

    while queue.step(&mut sink) {
        if !aborted && cancel.load(Ordering::SeqCst) {
            queue.abort_all();
            aborted = true;
        }
        std::thread::yield_now();
    }
}
