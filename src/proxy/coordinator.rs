//! Worker pool that drives one validation per proxy
//!
//! The coordinator owns the run state: the counters and the output sink
//! live together behind one mutex. The lock is taken only to bump a counter
//! or append a line, never across a network call.

use crate::proxy::models::{CheckEvent, Progress, ProxyAddress, RunSummary};
use crate::proxy::probe::{HttpProber, ProbeConfig, Prober};
use crate::proxy::validator::Validator;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool needs at least one worker")]
    NoWorkers,
}

/// Append-only line sink for passing proxies
pub struct OutputSink {
    writer: Box<dyn Write + Send>,
    path: Option<PathBuf>,
}

impl OutputSink {
    /// Create (or truncate) the file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file: File = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            writer: Box::new(BufWriter::new(file)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Wrap an arbitrary writer
    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Box::new(writer),
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write one complete line and flush it
    pub fn append_line(&mut self, line: &str) -> io::Result<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        self.writer.write_all(buf.as_bytes())?;
        self.writer.flush()
    }

    fn close(mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunState {
    pub checked_count: usize,
    pub good_count: usize,
    pub total: usize,
}

impl RunState {
    fn progress(&self) -> Progress {
        Progress {
            checked: self.checked_count,
            total: self.total,
            good: self.good_count,
        }
    }
}

struct Shared {
    counters: RunState,
    sink: Option<OutputSink>,
}

/// The single exclusion domain guarding counters and the output sink
pub struct SharedState {
    inner: Mutex<Shared>,
}

impl SharedState {
    pub fn new(total: usize, sink: OutputSink) -> Self {
        Self {
            inner: Mutex::new(Shared {
                counters: RunState {
                    total,
                    ..Default::default()
                },
                sink: Some(sink),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // Counters stay consistent even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one proxy that went through network probing, appending it to
    /// the sink first when it passed.
    ///
    /// The write and both counters move under one acquisition, so no
    /// observer ever sees a pass before its check. The good counter only
    /// moves if the line was written. Returns the progress after the update
    /// and whether the line was written.
    pub fn record_result(
        &self,
        address: &ProxyAddress,
        passed: bool,
    ) -> (Progress, io::Result<bool>) {
        let mut shared = self.lock();
        let written = if passed {
            match shared.sink.as_mut() {
                Some(sink) => sink.append_line(&address.to_string()).map(|()| true),
                None => Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "output sink closed",
                )),
            }
        } else {
            Ok(false)
        };

        if matches!(written, Ok(true)) {
            shared.counters.good_count += 1;
        }
        shared.counters.checked_count += 1;
        (shared.counters.progress(), written)
    }

    pub fn snapshot(&self) -> RunState {
        self.lock().counters
    }

    pub fn progress(&self) -> Progress {
        self.lock().counters.progress()
    }

    /// Flush and drop the sink, returning its path and the final counters
    fn close(&self) -> (RunState, Option<PathBuf>) {
        let mut shared = self.lock();
        let path = match shared.sink.take() {
            Some(sink) => {
                let path = sink.path().map(Path::to_path_buf);
                if let Err(e) = sink.close() {
                    error!(error = %e, "failed to flush output sink");
                }
                path
            }
            None => None,
        };
        (shared.counters, path)
    }
}

/// Fixed-size worker pool over a list of raw proxy lines
pub struct Coordinator<P: Prober + 'static = HttpProber> {
    prober: Arc<P>,
    config: Arc<ProbeConfig>,
    workers: usize,
}

impl Coordinator<HttpProber> {
    /// Create a coordinator using the real network probes
    pub fn new(config: ProbeConfig, workers: usize) -> Result<Self, PoolError> {
        Self::with_prober(HttpProber::new(), config, workers)
    }
}

impl<P: Prober + 'static> Coordinator<P> {
    pub fn with_prober(prober: P, config: ProbeConfig, workers: usize) -> Result<Self, PoolError> {
        if workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        Ok(Self {
            prober: Arc::new(prober),
            config: Arc::new(config),
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start the run in the background.
    ///
    /// Returns a stream of completion events and a handle resolving to the
    /// final summary once every worker has drained the queue. Dropping the
    /// receiver does not stop the run.
    pub fn dispatch_stream(
        &self,
        proxies: Vec<String>,
        sink: OutputSink,
    ) -> (mpsc::UnboundedReceiver<CheckEvent>, JoinHandle<RunSummary>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let total = proxies.len();
        let state = Arc::new(SharedState::new(total, sink));
        let validator = Arc::new(Validator::new(
            Arc::clone(&self.prober),
            Arc::clone(&self.config),
            Arc::clone(&state),
        ));
        let queue = Arc::new(Mutex::new(VecDeque::from(proxies)));
        let workers = self.workers;

        let handle = tokio::spawn(async move {
            let start = Instant::now();
            info!(total, workers, "starting validation run");

            let mut pool = JoinSet::new();
            for id in 0..workers {
                pool.spawn(worker(
                    id,
                    Arc::clone(&queue),
                    Arc::clone(&validator),
                    tx.clone(),
                ));
            }
            drop(tx);

            while let Some(joined) = pool.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "worker task failed");
                }
            }

            let (counters, export_path) = state.close();
            let summary = RunSummary {
                elapsed: start.elapsed(),
                checked: counters.checked_count,
                good: counters.good_count,
                total: counters.total,
                export_path,
            };
            info!(
                checked = summary.checked,
                good = summary.good,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "validation run drained"
            );
            summary
        });

        (rx, handle)
    }

    /// Run every proxy through validation and wait for the pool to drain
    pub async fn dispatch(
        &self,
        proxies: Vec<String>,
        sink: OutputSink,
    ) -> crate::Result<RunSummary> {
        let (rx, handle) = self.dispatch_stream(proxies, sink);
        drop(rx);
        Ok(handle.await?)
    }
}

async fn worker<P: Prober + 'static>(
    id: usize,
    queue: Arc<Mutex<VecDeque<String>>>,
    validator: Arc<Validator<P>>,
    events: mpsc::UnboundedSender<CheckEvent>,
) {
    loop {
        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some(raw) = next else {
            break;
        };

        let event = validator.validate(&raw).await;
        // Nobody listening is fine; the run carries on.
        let _ = events.send(event);
    }
    debug!(worker = id, "worker drained");
}
