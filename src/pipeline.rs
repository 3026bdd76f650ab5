//! Reconciliation pipeline: dispatch CAR scans to a worker pool, drain their
//! matches into one transaction, commit all or nothing.
//!
//! Three one-directional channels carry every piece of shared state: the job
//! queue (aggregator to workers, closed once all jobs are enqueued), the
//! result stream (workers to aggregator, closed by the closer thread once
//! every worker has exited), and the best-effort completion stream feeding
//! progress output. Workers never see the transaction; the store handle stays
//! on this thread.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, bounded};
use tracing::{info, warn};

use crate::error::CarlinkError;
use crate::index::CidIndex;
use crate::source::CarSourceLike;
use crate::store::StoreLike;
use crate::worker::{Job, WorkerEvent, run_worker};

/// Results are processed as they arrive; a little slack keeps workers from
/// stalling on short aggregator pauses.
const RESULT_BUFFER: usize = 5;

#[derive(Debug, PartialEq)]
pub struct ReconcileOutcome {
    /// Unmatched file ranges loaded for this run.
    pub file_ranges: usize,
    /// Unmatched CAR files scanned (or found missing) this run.
    pub cars: usize,
    /// Association rows written.
    pub associations: usize,
}

/// Runs one full reconciliation inside a single transaction. On any failure
/// the transaction is rolled back and the error returned; no partial state
/// survives.
pub fn reconcile<S: StoreLike>(
    store: &mut S,
    source: Arc<dyn CarSourceLike>,
    workers: Option<usize>,
) -> Result<ReconcileOutcome, CarlinkError> {
    store.begin()?;
    match run_pipeline(store, source, workers) {
        Ok(outcome) => {
            info!("committing transaction");
            store.commit()?;
            Ok(outcome)
        }
        Err(err) => {
            if let Err(rollback_err) = store.rollback() {
                warn!("rollback failed: {}", rollback_err);
            }
            Err(err)
        }
    }
}

fn run_pipeline<S: StoreLike>(
    store: &mut S,
    source: Arc<dyn CarSourceLike>,
    workers: Option<usize>,
) -> Result<ReconcileOutcome, CarlinkError> {
    info!("selecting file ranges");
    let ranges = store.load_unmatched_file_ranges()?;
    let index = Arc::new(CidIndex::build(&ranges)?);
    info!("selecting cars");
    let cars = store.load_unmatched_cars()?;
    let total_jobs = cars.len();
    info!(
        "loaded {} unmatched file ranges, {} unmatched cars",
        index.len(),
        total_jobs
    );

    // Every assignment is queued up front so workers only ever block on an
    // empty queue, never on a slow feeder.
    let (job_tx, job_rx) = bounded(total_jobs.max(1));
    for car in &cars {
        let job = Job {
            car_id: car.id,
            storage_path: car.storage_path.clone(),
        };
        job_tx
            .send(job)
            .map_err(|_| CarlinkError::Other("job queue disconnected".to_string()))?;
    }
    drop(job_tx);

    let (result_tx, result_rx) = bounded(RESULT_BUFFER);
    let (done_tx, done_rx) = bounded(total_jobs.max(1));

    // No value in more workers than jobs.
    let worker_count = workers
        .unwrap_or_else(default_worker_count)
        .max(1)
        .min(total_jobs);
    let mut handles = Vec::with_capacity(worker_count);
    for id in 0..worker_count {
        let jobs = job_rx.clone();
        let results = result_tx.clone();
        let done = done_tx.clone();
        let index = Arc::clone(&index);
        let source = Arc::clone(&source);
        let handle = thread::Builder::new()
            .name(format!("carlink-worker-{}", id))
            .spawn(move || run_worker(id, jobs, results, done, index, source))?;
        handles.push(handle);
    }
    drop(job_rx);
    drop(done_tx);

    // Wait-for-all barrier: the closer owns every handle plus the original
    // result sender, so the stream disconnects exactly when the last worker
    // has exited. Draining below needs no result count in advance. A worker
    // that dies without reporting would otherwise end the stream cleanly and
    // let a partial scan commit, so a panic is surfaced as a failure here.
    let closer = thread::spawn(move || {
        for (id, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                let err = CarlinkError::Other(format!("worker {} panicked", id));
                let _ = result_tx.send(WorkerEvent::Failed(err));
            }
        }
        drop(result_tx);
    });

    let mut progress = Progress::new(total_jobs);
    let mut associations = 0usize;
    for event in result_rx.iter() {
        match event {
            WorkerEvent::Match { file_range_id, car_id } => {
                store.insert_association(file_range_id, car_id)?;
                associations += 1;
                if progress.poll(&done_rx) {
                    info!("car progress: {}/{}", progress.completed(), progress.total());
                }
            }
            WorkerEvent::Failed(err) => {
                // Abandon the drain; in-flight workers notice the dropped
                // receiver and wind down on their own.
                return Err(err);
            }
        }
    }
    let _ = closer.join();

    Ok(ReconcileOutcome {
        file_ranges: ranges.len(),
        cars: total_jobs,
        associations,
    })
}

fn default_worker_count() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Best-effort count of completed assignments. Polling never blocks: it
/// drains whatever completion signals are pending and reports whether any
/// arrived, decoupling progress cadence from match cadence.
struct Progress {
    completed: usize,
    total: usize,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self { completed: 0, total }
    }

    fn poll(&mut self, done: &Receiver<()>) -> bool {
        let mut advanced = false;
        while done.try_recv().is_ok() {
            self.completed += 1;
            advanced = true;
        }
        advanced
    }

    fn completed(&self) -> usize {
        self.completed
    }

    fn total(&self) -> usize {
        self.total
    }
}
