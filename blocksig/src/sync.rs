//! This module provides the orchestration of a signature run.
//!
//! A run is made of one source thread, `N` worker threads and one sink thread, all communicating through two
//! arrays of `N` [`Slot`]s:
//!
//! ```text
//!     source -> source slot[i] -> worker[i] -> result slot[i] -> sink,   i = k mod N
//! ```
//!
//! Since both the source and the sink walk the slots in the same `0..N` cycle, the sink emits results in the
//! order the source read blocks, whatever the order workers complete them in.
//!
//! # Termination
//! Termination is slot-local: the source closes every source slot after its last block, and each worker
//! closes its result slot once its source slot is closed and drained. A [`Slot::get()`] therefore only blocks
//! while its slot is empty, not closed and the run not force-stopped.
//!
//! # Cancellation
//! Any stage failing enters the failed state through [`Run::fail()`], which raises the shared [`ForceStop`]
//! token and wakes every slot, so that no thread remains blocked forever.

use std::io::{self, Read, Write};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use bytes::Bytes;

use crate::digest::Digester;
use crate::pool::Pool;
use crate::slot::{ForceStop, Slot};
use crate::{BlockSource, Error, Failure, ResultSink, Stage};

/// Global progress of a run.
///
/// Counters only ever increase. They are used to report the state of a run and to check its consistency once
/// completed, never to hand data off.
#[derive(Debug, Default)]
pub struct Progress {
    /// Blocks put into source slots.
    produced: AtomicU64,
    /// Blocks taken from source slots.
    consumed: AtomicU64,
    /// Digests taken from result slots.
    emitted: AtomicU64,
    /// Set once, when the source has handed its last block off.
    data_is_over: AtomicBool,
}

impl Progress {
    #[inline]
    pub fn produced(&self) {
        self.produced.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn consumed(&self) {
        self.consumed.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn emitted(&self) {
        self.emitted.fetch_add(1, Ordering::SeqCst);
    }

    /// Signal end-of-data, returning `true` the first time only.
    #[inline]
    pub fn finish_production(&self) -> bool {
        !self.data_is_over.swap(true, Ordering::SeqCst)
    }

    #[inline]
    pub fn is_data_over(&self) -> bool {
        self.data_is_over.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn produced_count(&self) -> u64 {
        self.produced.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn consumed_count(&self) -> u64 {
        self.consumed.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn emitted_count(&self) -> u64 {
        self.emitted.load(Ordering::SeqCst)
    }
}

/// Observable state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    /// The source is still reading blocks.
    Running,
    /// The source is done, consumers are still catching up.
    Draining,
    /// Every produced block has been consumed by both workers and sink.
    Drained,
    /// A stage failed and the run has been stopped by force.
    Failed,
}

/// Shared state of a single run, dropped once every thread has been joined.
#[derive(Debug)]
pub(crate) struct Run {
    pub(crate) source_slots: Vec<Slot<Bytes>>,
    pub(crate) result_slots: Vec<Slot<Bytes>>,
    pub(crate) stop: ForceStop,
    pub(crate) progress: Progress,
    failure: Mutex<Option<Failure>>,
}

impl Run {
    pub(crate) fn new(workers: NonZeroUsize) -> Self {
        let stop = ForceStop::new();

        Self {
            source_slots: Slot::array(workers.get(), &stop),
            result_slots: Slot::array(workers.get(), &stop),
            stop,
            progress: Progress::default(),
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> RunState {
        if self.stop.is_raised() {
            return RunState::Failed;
        }

        if !self.progress.is_data_over() {
            return RunState::Running;
        }

        let produced = self.progress.produced_count();

        if produced == self.progress.consumed_count() && produced == self.progress.emitted_count() {
            RunState::Drained
        } else {
            RunState::Draining
        }
    }

    /// Enter the failed state: record the first failure, raise the stop token and wake every slot.
    pub(crate) fn fail(&self, stage: Stage, error: Error) {
        {
            let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);

            if failure.is_none() {
                tracing::warn!("Stopping run by force, {stage} failed: {error}");
                *failure = Some(Failure::new(stage, error));
            } else {
                tracing::debug!("Ignoring subsequent failure of {stage}: {error}");
            }
        }

        self.stop.raise();

        for slot in self.source_slots.iter().chain(&self.result_slots) {
            slot.wake_all();
        }
    }

    /// Run a stage body, funnelling both its error and a panic into [`Run::fail()`].
    pub(crate) fn guard<T>(&self, stage: Stage, body: impl FnOnce() -> Result<T, Error>) -> Option<T> {
        let _guard = PanicGuard { run: self, stage };

        match body() {
            Ok(value) => Some(value),
            Err(err) => {
                self.fail(stage, err);
                None
            }
        }
    }

    fn take_failure(&self) -> Option<Failure> {
        self.failure.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Fails the run when dropped while its thread is panicking.
struct PanicGuard<'a> {
    run: &'a Run,
    stage: Stage,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.run.fail(self.stage, Error::Unknown(String::from("stage panicked")));
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Number of blocks, hence of digests emitted.
    pub blocks: u64,
    /// Number of bytes read from the source.
    pub bytes: u64,
}

/// Orchestrator of signature runs.
///
/// # Example
/// ```
/// # use std::io::Cursor;
/// # use blocksig::{BlockSource, ResultSink, Sha256Digester, Synchronizer};
/// let source = BlockSource::new(Cursor::new(b"0123456789"), 10, 4.try_into().unwrap()).unwrap();
///
/// let mut output = vec![];
/// let synchronizer = Synchronizer::new(2.try_into().unwrap(), Sha256Digester);
/// let summary = synchronizer.run(source, ResultSink::new(&mut output)).unwrap();
///
/// assert_eq!(summary.blocks, 3);
/// assert!(String::from_utf8(output).unwrap().starts_with("1 - "));
/// ```
#[derive(Debug)]
pub struct Synchronizer<D> {
    workers: NonZeroUsize,
    digester: D,
}

impl<D: Digester> Synchronizer<D> {
    /// Create a new `Synchronizer` running `workers` digesting workers in parallel.
    pub fn new(workers: NonZeroUsize, digester: D) -> Self {
        Self { workers, digester }
    }

    #[inline]
    pub fn workers(&self) -> NonZeroUsize {
        self.workers
    }

    /// Digest every block of `source` in parallel and write results in order to `sink`.
    ///
    /// All threads are joined before returning, whether the run succeeded or not.
    /// Results already written when a failure happens are left as-is.
    pub fn run<R, W>(&self, mut source: BlockSource<R>, mut sink: ResultSink<W>) -> Result<Summary, Failure>
    where
        R: Read + Send,
        W: Write + Send,
    {
        let run = Run::new(self.workers);
        let run = &run;
        let digester = &self.digester;

        let name = source.name().to_owned();
        let bytes = source.len();
        let expected = source.block_count();

        tracing::debug!("Starting run over `{name}` with {} workers...", self.workers);

        let records = thread::scope(|scope| {
            let source = spawn(scope, "source", move || {
                run.guard(Stage::Source, || source.produce(&run.source_slots, &run.stop, &run.progress));
            });

            let pool = Pool::start(scope, run, digester);

            let sink = spawn(scope, "sink", move || {
                run.guard(Stage::Sink, || sink.drain(&run.result_slots, &run.stop, &run.progress))
            });

            let (source, pool, sink) = match (source, pool, sink) {
                (Ok(source), Ok(pool), Ok(sink)) => (source, pool, sink),
                (source, pool, sink) => {
                    let err = [source.err(), pool.err(), sink.err()].into_iter().flatten().next();
                    let reason = err.map_or_else(String::new, |err| err.to_string());

                    run.fail(Stage::Synchronizer, Error::Unknown(format!("can not start thread: {reason}")));
                    return None;
                }
            };

            // panics have already been reported by the stage guards
            let _ = source.join();
            let records = sink.join().ok().flatten();
            pool.join();

            records
        });

        tracing::debug!("Run over `{name}` ended in state {:?}.", run.state());

        if let Some(failure) = run.take_failure() {
            return Err(failure);
        }

        let progress = &run.progress;
        let counts = [
            progress.produced_count(),
            progress.consumed_count(),
            progress.emitted_count(),
            records.unwrap_or_default(),
        ];

        if counts.iter().any(|&count| count != expected) {
            return Err(Failure::new(
                Stage::Synchronizer,
                Error::Unknown(format!(
                    "inconsistent block counts, expected {expected} (produced, consumed, emitted, written): {counts:?}"
                )),
            ));
        }

        tracing::info!("Computed {expected} block signatures over {bytes} bytes of `{name}`.");

        Ok(Summary { blocks: expected, bytes })
    }
}

/// Spawn a named thread in `scope`.
fn spawn<'scope, 'env, T: Send + 'scope>(
    scope: &'scope thread::Scope<'scope, 'env>,
    name: &str,
    body: impl FnOnce() -> T + Send + 'scope,
) -> io::Result<thread::ScopedJoinHandle<'scope, T>> {
    thread::Builder::new().name(name.to_owned()).spawn_scoped(scope, body)
}
