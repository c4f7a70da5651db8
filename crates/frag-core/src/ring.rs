//! Fixed worker ring with ordered claim/emit hand-off
//!
//! `W` OS threads sit in a cycle. Each slot owns two batons, delivered over
//! capacity-1 channels by its predecessor:
//!
//! ```text
//!   claim baton:  slot 0 → slot 1 → … → slot W-1 → slot 0 → …
//!   emit baton:   slot 0 → slot 1 → … → slot W-1 → slot 0 → …
//! ```
//!
//! A worker calls [`RingJob::claim`] only while holding its claim baton and
//! passes the baton on as soon as the claim is made. It then runs
//! [`RingJob::process`] without holding anything, and finally waits for its
//! emit baton before calling [`RingJob::emit`]. Claims therefore happen in
//! ring order, emits happen in the same order, and only `process` overlaps.
//!
//! A worker whose claim comes back empty forwards the claim baton and exits.
//! Every later worker sees the same exhausted cursor, so the ring drains in
//! one rotation. Batons are plain channels: a worker that disappears drops
//! its senders and its successor observes the disconnect instead of waiting
//! forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, trace};

use crate::config::RuntimeConfig;
use crate::error::{FragError, FragResult};

/// A unit-of-work stream processed by a [`Ring`].
///
/// `claim` and `emit` are serialized by the ring and see units in the same
/// order; `process` runs concurrently on up to `W` units.
pub trait RingJob: Sync {
    type Unit: Send;
    type Output: Send;

    /// Reserve the next unit, or `None` once the stream is exhausted.
    fn claim(&self) -> FragResult<Option<Self::Unit>>;

    /// The expensive, unordered part.
    fn process(&self, unit: Self::Unit) -> FragResult<Self::Output>;

    /// Publish a result. Called in claim order.
    fn emit(&self, output: Self::Output) -> FragResult<()>;
}

/// A fixed-size ring of workers. Cheap to construct; threads only exist for
/// the duration of [`Ring::run`].
#[derive(Debug, Clone, Copy)]
pub struct Ring {
    workers: usize,
}

/// Shared failure state: the first error wins, later claims see exhaustion.
#[derive(Default)]
struct RingState {
    aborted: AtomicBool,
    error: Mutex<Option<FragError>>,
}

impl RingState {
    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn fail(&self, err: FragError) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            debug!(error = %err, "ring aborting");
            *slot = Some(err);
        }
        self.aborted.store(true, Ordering::Release);
    }

    fn into_result(self) -> FragResult<()> {
        match self.error.into_inner().unwrap_or_else(PoisonError::into_inner) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct Slot {
    index: usize,
    claim: Receiver<()>,
    emit: Receiver<()>,
    next_claim: Sender<()>,
    next_emit: Sender<()>,
}

impl Slot {
    fn work<J: RingJob>(self, job: &J, state: &RingState) {
        let mut turns = 0u64;
        loop {
            if self.claim.recv().is_err() {
                break;
            }
            let claimed = if state.is_aborted() {
                Ok(None)
            } else {
                job.claim()
            };
            // The successor may be gone already; it no longer needs the baton.
            let _ = self.next_claim.send(());

            let unit = match claimed {
                Ok(Some(unit)) => unit,
                Ok(None) => break,
                Err(err) => {
                    state.fail(err);
                    break;
                }
            };

            let output = job.process(unit);

            if self.emit.recv().is_err() {
                break;
            }
            match output {
                Ok(output) if !state.is_aborted() => {
                    if let Err(err) = job.emit(output) {
                        state.fail(err);
                    }
                }
                Ok(_) => {}
                Err(err) => state.fail(err),
            }
            let _ = self.next_emit.send(());
            turns += 1;
        }
        trace!(slot = self.index, turns, "ring worker done");
    }
}

impl Ring {
    pub fn new(workers: usize) -> Self {
        Ring {
            workers: workers.max(1),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.worker_count())
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `job` to exhaustion. Blocks until every worker has exited and
    /// returns the first error any of them hit.
    pub fn run<J: RingJob>(&self, job: &J) -> FragResult<()> {
        let n = self.workers;
        let (mut claim_tx, claim_rx): (Vec<Sender<()>>, Vec<Receiver<()>>) =
            (0..n).map(|_| bounded(1)).unzip();
        let (mut emit_tx, emit_rx): (Vec<Sender<()>>, Vec<Receiver<()>>) =
            (0..n).map(|_| bounded(1)).unzip();

        // Slot 0 starts out holding both batons.
        claim_tx[0]
            .send(())
            .map_err(|_| anyhow::anyhow!("priming claim baton"))?;
        emit_tx[0]
            .send(())
            .map_err(|_| anyhow::anyhow!("priming emit baton"))?;

        // Slot i sends to slot i+1: hand every slot its successor's senders so
        // that no sender outlives the worker owning it.
        claim_tx.rotate_left(1);
        emit_tx.rotate_left(1);

        let slots = claim_rx
            .into_iter()
            .zip(emit_rx)
            .zip(claim_tx.into_iter().zip(emit_tx))
            .enumerate()
            .map(|(index, ((claim, emit), (next_claim, next_emit)))| Slot {
                index,
                claim,
                emit,
                next_claim,
                next_emit,
            });

        let state = RingState::default();
        debug!(workers = n, "ring starting");

        thread::scope(|scope| {
            for slot in slots {
                let state = &state;
                let spawned = thread::Builder::new()
                    .name(format!("frag-ring-{}", slot.index))
                    .spawn_scoped(scope, move || slot.work(job, state));
                if let Err(err) = spawned {
                    // The unspawned slot was dropped, which disconnects its
                    // neighbours and drains whatever did start.
                    state.fail(FragError::Io(err));
                    break;
                }
            }
        });

        state.into_result()
    }
}
