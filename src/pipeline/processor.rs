//! Threaded processor
//!
//! A [`Processor`] owns one processing thread and one [`Worker`]. Producers
//! call [`Processor::submit`] from their own thread; admission only takes the
//! state lock and never waits for the worker. Results are published on the
//! [`SignalBus`] and pulled by subscribers on their own threads.
//!
//! # Admission
//!
//! - idle: the item is handed to the processing thread and the processor
//!   becomes busy.
//! - busy, skip-if-running: the item goes into a single-slot mailbox,
//!   replacing whatever was waiting. Memory stays O(1).
//! - busy, queue-all: the item is appended to a FIFO. Nothing is dropped and
//!   memory grows with the backlog; throttle the producer if that matters.
//!
//! On completion the thread takes the next pending item or goes idle.
//! Results come out in dispatch order. Superseded items produce no result.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use color_eyre::eyre::{eyre, Report};
use color_eyre::Result;
use crossbeam::utils::CachePadded;
use tracing::{debug, error, info, instrument, warn};

use super::bus::{SignalBus, Subscription};
use super::mailbox::{PendingQueue, Pushed};
use super::worker::Worker;
use crate::capture::convert::{array_to_frame, frame_to_array};
use crate::capture::frame::{ArrayView, Frame, WorkResult};
use crate::error::PipelineError;
use crate::{ProcessorConfig, ProcessorStats};

/// Unit of work submitted by a producer
#[derive(Debug, Clone)]
pub enum WorkItem {
    Frame(Frame),
    Array(ArrayView),
}

impl WorkItem {
    pub fn sequence(&self) -> u64 {
        match self {
            WorkItem::Frame(frame) => frame.sequence(),
            WorkItem::Array(array) => array.sequence(),
        }
    }

    /// Invalid frames and zero-size arrays bypass the worker.
    pub fn is_empty(&self) -> bool {
        match self {
            WorkItem::Frame(frame) => !frame.is_valid(),
            WorkItem::Array(array) => array.is_empty(),
        }
    }
}

impl From<Frame> for WorkItem {
    fn from(frame: Frame) -> Self {
        WorkItem::Frame(frame)
    }
}

impl From<ArrayView> for WorkItem {
    fn from(array: ArrayView) -> Self {
        WorkItem::Array(array)
    }
}

/// What [`Processor::submit`] did with an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Handed straight to the idle processing thread
    Dispatched,
    /// Waiting behind the in-flight item
    Queued,
    /// Took the mailbox slot of an older pending item, which was dropped
    Replaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    Busy,
}

/// Failure of the worker on one item
#[derive(Debug, Clone, thiserror::Error)]
#[error("worker failed on item {sequence}: {report:#}")]
pub struct ProcessingError {
    pub sequence: u64,
    pub panicked: bool,
    pub report: Arc<Report>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Stopped,
    Running,
    Stopping,
    /// The processing thread died outside of `stop()`
    Terminated,
}

struct State {
    lifecycle: Lifecycle,
    busy: bool,
    /// Item admitted while idle, not yet claimed by the thread
    handoff: Option<WorkItem>,
    pending: PendingQueue<WorkItem>,
    /// Parked worker while the thread is not running
    worker: Option<Box<dyn Worker>>,
    /// Replacement requested while running, installed before the next item
    next_worker: Option<Box<dyn Worker>>,
}

#[derive(Default)]
struct Stats {
    submitted: AtomicU64,
    dispatched: AtomicU64,
    skipped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    process_us: AtomicU64,
}

struct Shared {
    name: String,
    state: Mutex<State>,
    wake: Condvar,
    stats: CachePadded<Stats>,
    bus: SignalBus,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_skipped(&self, n: usize) {
        if n > 0 {
            self.stats.skipped.fetch_add(n as u64, Ordering::Relaxed);
            metrics::counter!("framepipe_items_skipped", "processor" => self.name.clone())
                .increment(n as u64);
        }
    }

    /// Run one item through the worker and publish the outcome.
    fn process(&self, worker: &mut dyn Worker, item: WorkItem) {
        let sequence = item.sequence();
        let started = Instant::now();
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        let caught = panic::catch_unwind(AssertUnwindSafe(|| run_item(&mut *worker, item)));
        let outcome = match caught {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(report)) => Err((report, false)),
            Err(payload) => Err((
                eyre!("worker '{}' panicked: {}", worker.name(), panic_message(&*payload)),
                true,
            )),
        };

        let elapsed = started.elapsed();
        self.stats
            .process_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        metrics::histogram!("framepipe_process_time_us", "processor" => self.name.clone())
            .record(elapsed.as_micros() as f64);

        match outcome {
            Ok(result) => {
                metrics::histogram!("framepipe_frame_latency_ms", "processor" => self.name.clone())
                    .record(result.latency().as_secs_f64() * 1000.0);
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                self.bus.results.emit(result);
            }
            Err((report, panicked)) => {
                error!(
                    processor = %self.name,
                    sequence,
                    panicked,
                    "Processing failed: {:#}",
                    report
                );
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("framepipe_items_failed", "processor" => self.name.clone())
                    .increment(1);
                self.bus.errors.emit(ProcessingError {
                    sequence,
                    panicked,
                    report: Arc::new(report),
                });
            }
        }
    }
}

fn run_item(worker: &mut dyn Worker, item: WorkItem) -> Result<WorkResult> {
    if item.is_empty() {
        let (array, frame) = match item {
            WorkItem::Frame(frame) => frame_to_array(frame)?,
            WorkItem::Array(array) => {
                let frame = array.source.clone();
                (array, frame)
            }
        };
        return Ok(WorkResult { array, frame });
    }

    match item {
        WorkItem::Frame(frame) => worker.process_frame(frame),
        WorkItem::Array(array) => {
            let array = worker.process_array(array)?;
            let frame = array_to_frame(&array, &array.source)?;
            Ok(WorkResult { array, frame })
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Marks the processor terminated if the thread unwinds past the loop and
/// reports the item it was working on
struct ExitGuard<'a> {
    shared: &'a Shared,
    in_flight: Option<u64>,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }

        let mut state = self.shared.lock_state();
        state.lifecycle = Lifecycle::Terminated;
        state.busy = false;
        state.handoff = None;
        let dropped = state.pending.clear();
        drop(state);
        self.shared.add_skipped(dropped);
        error!(processor = %self.shared.name, "Processing thread terminated");

        if let Some(sequence) = self.in_flight {
            self.shared.stats.failed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("framepipe_items_failed", "processor" => self.shared.name.clone())
                .increment(1);
            self.shared.bus.errors.emit(ProcessingError {
                sequence,
                panicked: true,
                report: Arc::new(eyre!(
                    "processing thread of '{}' terminated on item {}",
                    self.shared.name,
                    sequence
                )),
            });
        }
    }
}

fn pin_to_core(core: usize) {
    let found = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == core));
    match found {
        Some(id) if core_affinity::set_for_current(id) => {
            debug!("Processing thread pinned to core {}", core)
        }
        _ => warn!("Could not pin processing thread to core {}", core),
    }
}

/// Processing thread body
fn run(shared: Arc<Shared>) {
    let mut guard = ExitGuard {
        shared: &shared,
        in_flight: None,
    };

    let Some(mut worker) = shared.lock_state().worker.take() else {
        // start() checked for a worker; nothing to do without one
        error!(processor = %shared.name, "Processing thread started without a worker");
        return;
    };
    debug!(processor = %shared.name, worker = worker.name(), "Processing thread started");

    loop {
        let item = {
            let mut state = shared.lock_state();
            loop {
                if let Some(next) = state.next_worker.take() {
                    info!(processor = %shared.name, worker = next.name(), "Worker replaced");
                    worker = next;
                }
                if let Some(item) = state.handoff.take() {
                    break item;
                }
                if state.lifecycle != Lifecycle::Running {
                    state.worker = Some(worker);
                    debug!(processor = %shared.name, "Processing thread exiting");
                    return;
                }
                state = shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        guard.in_flight = Some(item.sequence());
        shared.process(&mut *worker, item);
        guard.in_flight = None;

        let mut state = shared.lock_state();
        if state.lifecycle == Lifecycle::Running {
            match state.pending.pop() {
                Some(next) => state.handoff = Some(next),
                None => state.busy = false,
            }
        } else {
            let dropped = state.pending.clear();
            state.busy = false;
            drop(state);
            shared.add_skipped(dropped);
        }
    }
}

/// Runs a [`Worker`] on a dedicated thread against a stream of items
///
/// ```no_run
/// use framepipe::pipeline::{Passthrough, Processor};
/// # fn frames() -> Vec<framepipe::Frame> { Vec::new() }
///
/// let processor = Processor::new("preview", Passthrough);
/// let results = processor.subscribe_results();
/// processor.start()?;
/// for frame in frames() {
///     processor.submit_frame(frame)?;
/// }
/// while let Some(result) = results.try_recv() {
///     println!("frame {} processed", result.sequence());
/// }
/// processor.stop()?;
/// # Ok::<(), framepipe::PipelineError>(())
/// ```
pub struct Processor {
    shared: Arc<Shared>,
    config: ProcessorConfig,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Processor {
    pub fn new(name: impl Into<String>, worker: impl Worker) -> Self {
        Self::with_config(name, worker, &ProcessorConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        worker: impl Worker,
        config: &ProcessorConfig,
    ) -> Self {
        let state = State {
            lifecycle: Lifecycle::Stopped,
            busy: false,
            handoff: None,
            pending: PendingQueue::new(config.skip_if_running),
            worker: Some(Box::new(worker)),
            next_worker: None,
        };

        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(state),
                wake: Condvar::new(),
                stats: CachePadded::new(Stats::default()),
                bus: SignalBus::new(config.result_capacity),
            }),
            config: config.clone(),
            thread: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Spawn the processing thread.
    #[instrument(skip(self), fields(processor = %self.shared.name))]
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut state = self.shared.lock_state();
            match state.lifecycle {
                Lifecycle::Stopped => {}
                Lifecycle::Running | Lifecycle::Stopping => {
                    return Err(PipelineError::AlreadyRunning(self.shared.name.clone()))
                }
                Lifecycle::Terminated => {
                    return Err(PipelineError::ThreadTerminated(self.shared.name.clone()))
                }
            }
            if let Some(next) = state.next_worker.take() {
                state.worker = Some(next);
            }
            if state.worker.is_none() {
                return Err(PipelineError::NoWorker(self.shared.name.clone()));
            }
            state.lifecycle = Lifecycle::Running;
            state.busy = false;
        }

        let shared = Arc::clone(&self.shared);
        let pin_core = self.config.pin_core;
        let spawned = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || {
                if let Some(core) = pin_core {
                    pin_to_core(core);
                }
                run(shared)
            });

        match spawned {
            Ok(handle) => {
                *thread = Some(handle);
                info!("Processor started");
                Ok(())
            }
            Err(e) => {
                self.shared.lock_state().lifecycle = Lifecycle::Stopped;
                Err(PipelineError::Spawn(e))
            }
        }
    }

    /// Finish the in-flight item, discard pending ones and join the thread.
    ///
    /// Returns `NotRunning` if there is no thread to stop and
    /// `ThreadTerminated` if the thread had died; the processor is stopped
    /// afterwards in both cases.
    #[instrument(skip(self), fields(processor = %self.shared.name))]
    pub fn stop(&self) -> Result<(), PipelineError> {
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(handle) = thread.take() else {
            return Err(PipelineError::NotRunning(self.shared.name.clone()));
        };

        {
            let mut state = self.shared.lock_state();
            if state.lifecycle == Lifecycle::Running {
                state.lifecycle = Lifecycle::Stopping;
            }
            self.shared.wake.notify_all();
        }

        let joined = handle.join();

        let mut state = self.shared.lock_state();
        let terminated = joined.is_err() || state.lifecycle == Lifecycle::Terminated;
        state.lifecycle = Lifecycle::Stopped;
        state.busy = false;
        let mut dropped = state.pending.clear();
        dropped += usize::from(state.handoff.take().is_some());
        drop(state);
        self.shared.add_skipped(dropped);

        if terminated {
            warn!("Processor stopped after its thread terminated");
            Err(PipelineError::ThreadTerminated(self.shared.name.clone()))
        } else {
            info!("Processor stopped");
            Ok(())
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock_state().lifecycle == Lifecycle::Running
    }

    pub fn state(&self) -> ProcessorState {
        if self.shared.lock_state().busy {
            ProcessorState::Busy
        } else {
            ProcessorState::Idle
        }
    }

    /// Admit `item` according to the skip policy. Never waits for the worker.
    pub fn submit(&self, item: impl Into<WorkItem>) -> Result<Admission, PipelineError> {
        let item = item.into();
        let passthrough = self
            .shared
            .bus
            .passthrough
            .has_subscribers()
            .then(|| item.clone());

        let mut state = self.shared.lock_state();
        match state.lifecycle {
            Lifecycle::Running => {}
            Lifecycle::Terminated => {
                return Err(PipelineError::ThreadTerminated(self.shared.name.clone()))
            }
            Lifecycle::Stopped | Lifecycle::Stopping => {
                return Err(PipelineError::NotRunning(self.shared.name.clone()))
            }
        }

        let sequence = item.sequence();
        let admission = if !state.busy {
            state.busy = true;
            state.handoff = Some(item);
            self.shared.wake.notify_one();
            Admission::Dispatched
        } else {
            match state.pending.push(item) {
                Pushed::Queued => Admission::Queued,
                Pushed::Replaced(old) => {
                    debug!(
                        processor = %self.shared.name,
                        skipped = old.sequence(),
                        sequence,
                        "Busy, pending item replaced"
                    );
                    Admission::Replaced
                }
            }
        };
        drop(state);

        self.shared.stats.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("framepipe_items_submitted", "processor" => self.shared.name.clone())
            .increment(1);
        if admission == Admission::Replaced {
            self.shared.add_skipped(1);
        }
        if let Some(item) = passthrough {
            self.shared.bus.passthrough.emit(item);
        }

        Ok(admission)
    }

    pub fn submit_frame(&self, frame: Frame) -> Result<Admission, PipelineError> {
        self.submit(WorkItem::Frame(frame))
    }

    pub fn submit_array(&self, array: ArrayView) -> Result<Admission, PipelineError> {
        self.submit(WorkItem::Array(array))
    }

    /// Processed array/frame pairs, in dispatch order
    pub fn subscribe_results(&self) -> Subscription<WorkResult> {
        self.shared.bus.results.subscribe()
    }

    /// Every admitted input, as submitted
    pub fn subscribe_passthrough(&self) -> Subscription<WorkItem> {
        self.shared.bus.passthrough.subscribe()
    }

    pub fn subscribe_errors(&self) -> Subscription<ProcessingError> {
        self.shared.bus.errors.subscribe()
    }

    /// Replace the worker. While running the swap happens before the next
    /// item is processed; the in-flight item finishes on the old worker.
    pub fn set_worker(&self, worker: impl Worker) {
        let worker: Box<dyn Worker> = Box::new(worker);
        let mut state = self.shared.lock_state();
        match state.lifecycle {
            Lifecycle::Running | Lifecycle::Stopping => state.next_worker = Some(worker),
            Lifecycle::Stopped | Lifecycle::Terminated => {
                state.next_worker = None;
                state.worker = Some(worker);
            }
        }
    }

    pub fn skip_if_running(&self) -> bool {
        self.shared.lock_state().pending.is_latest()
    }

    /// Change the admission policy. Switching to skip-if-running while items
    /// are queued keeps only the newest one.
    pub fn set_skip_if_running(&self, skip_if_running: bool) {
        let dropped = self
            .shared
            .lock_state()
            .pending
            .set_skip_if_running(skip_if_running);
        if !dropped.is_empty() {
            debug!(processor = %self.shared.name, dropped = dropped.len(), "Backlog collapsed");
        }
        self.shared.add_skipped(dropped.len());
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock_state().pending.len()
    }

    pub fn stats(&self) -> ProcessorStats {
        let stats = &self.shared.stats;
        let dispatched = stats.dispatched.load(Ordering::Relaxed);
        let process_us = stats.process_us.load(Ordering::Relaxed);

        ProcessorStats {
            submitted: stats.submitted.load(Ordering::Relaxed),
            dispatched,
            skipped: stats.skipped.load(Ordering::Relaxed),
            delivered: stats.delivered.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            dropped_deliveries: self.shared.bus.dropped_deliveries(),
            avg_process_us: process_us.checked_div(dispatched).unwrap_or(0),
        }
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        let running = self
            .thread
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if running {
            warn!(processor = %self.shared.name, "Processor dropped while running, stopping");
            let _ = self.stop();
        }
    }
}
