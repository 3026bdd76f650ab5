//! Worker loop: pull CAR assignments, scan them, emit matches.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::error::CarlinkError;
use crate::index::CidIndex;
use crate::source::CarSourceLike;

/// One archive assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub car_id: i64,
    pub storage_path: String,
}

/// What workers report back on the result stream.
#[derive(Debug)]
pub enum WorkerEvent {
    Match { file_range_id: i64, car_id: i64 },
    Failed(CarlinkError),
}

enum ScanOutcome {
    Clean,
    /// The aggregator dropped the result stream; nothing left to report to.
    ReceiverGone,
}

/// Pulls jobs until the queue disconnects. Each assignment signals completion
/// exactly once, whether it scanned cleanly, was missing on disk, or failed.
/// A scan failure is reported on the result stream and ends this worker; the
/// run is doomed at that point, so further scanning is wasted I/O.
pub fn run_worker(
    id: usize,
    jobs: Receiver<Job>,
    results: Sender<WorkerEvent>,
    done: Sender<()>,
    index: Arc<CidIndex>,
    source: Arc<dyn CarSourceLike>,
) {
    while let Ok(job) = jobs.recv() {
        match scan_assignment(id, &job, &index, source.as_ref(), &results) {
            Ok(ScanOutcome::Clean) => {
                let _ = done.try_send(());
            }
            Ok(ScanOutcome::ReceiverGone) => {
                let _ = done.try_send(());
                break;
            }
            Err(err) => {
                let _ = results.send(WorkerEvent::Failed(err));
                let _ = done.try_send(());
                break;
            }
        }
    }
    debug!("worker {}: exiting", id);
}

fn scan_assignment(
    id: usize,
    job: &Job,
    index: &CidIndex,
    source: &dyn CarSourceLike,
    results: &Sender<WorkerEvent>,
) -> Result<ScanOutcome, CarlinkError> {
    let Some(blocks) = source.open(&job.storage_path)? else {
        // Inventory and disk drift independently; an absent file is not fatal.
        warn!("worker {}: can't find {}", id, job.storage_path);
        return Ok(ScanOutcome::Clean);
    };
    debug!("worker {}: processing {}", id, job.storage_path);

    // A block repeated inside one CAR must not produce duplicate rows.
    let mut matched: FxHashSet<i64> = FxHashSet::default();
    for block in blocks {
        let block = block?;
        let Some(file_range_id) = index.lookup(&block.cid.to_string()) else {
            continue;
        };
        if !matched.insert(file_range_id) {
            continue;
        }
        let event = WorkerEvent::Match {
            file_range_id,
            car_id: job.car_id,
        };
        if results.send(event).is_err() {
            return Ok(ScanOutcome::ReceiverGone);
        }
    }
    debug!("worker {}: finished {}", id, job.storage_path);
    Ok(ScanOutcome::Clean)
}
