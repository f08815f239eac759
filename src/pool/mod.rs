//! Fixed-size pool of probing workers.
//!
//! Every worker pulls the next [`Candidate`] from the shared handoff
//! receiver, probes it to completion, and only then asks for another, so at
//! most `workers` probes are in flight. Workers stop once the producer has
//! closed the channel and it is drained; [`WorkerPool::run`] returns after
//! the last one has finished.
//!
//! Output order follows completion order, not input order.
mod output;

pub use output::Output;

use std::io::Write;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, error};
use tokio::io::AsyncBufRead;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::candidate::{handoff, Candidate, CandidateStream};
use crate::prober::Probe;

/// Counts gathered over one [`WorkerPool::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub probed: usize,
    pub reachable: usize,
}

#[derive(Debug, Default)]
struct Counters {
    probed: AtomicUsize,
    reachable: AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: NonZeroUsize,
}

impl WorkerPool {
    pub const fn new(workers: NonZeroUsize) -> Self {
        Self { workers }
    }

    pub const fn workers(&self) -> usize {
        self.workers.get()
    }

    /// Spawns the workers, then waits for all of them to drain `candidates`.
    ///
    /// Every host for which `prober` answers `true` is written to `output`
    /// as a single line.
    pub async fn run<P, W>(
        &self,
        candidates: mpsc::Receiver<Candidate>,
        prober: Arc<P>,
        output: Arc<Output<W>>,
    ) -> Summary
    where
        P: Probe + ?Sized + 'static,
        W: Write + Send + 'static,
    {
        let candidates = Arc::new(Mutex::new(candidates));
        let counters = Arc::new(Counters::default());

        let mut set = JoinSet::new();
        for id in 0..self.workers.get() {
            set.spawn(worker(
                id,
                Arc::clone(&candidates),
                Arc::clone(&prober),
                Arc::clone(&output),
                Arc::clone(&counters),
            ));
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!("Worker stopped unexpectedly: {e}");
            }
        }

        Summary {
            probed: counters.probed.load(Ordering::Relaxed),
            reachable: counters.reachable.load(Ordering::Relaxed),
        }
    }

    /// Connects `stream` to the pool through a fresh handoff and runs both
    /// until the source is exhausted and every probe has finished.
    pub async fn run_stream<R, P, W>(
        &self,
        stream: CandidateStream<R>,
        prober: Arc<P>,
        output: Arc<Output<W>>,
    ) -> Summary
    where
        R: AsyncBufRead + Unpin + Send,
        P: Probe + ?Sized + 'static,
        W: Write + Send + 'static,
    {
        let (tx, rx) = handoff();
        let (sent, summary) = tokio::join!(stream.feed(tx), self.run(rx, prober, output));
        debug!("{sent} candidates handed off, {} probed", summary.probed);
        summary
    }
}

async fn worker<P, W>(
    id: usize,
    candidates: Arc<Mutex<mpsc::Receiver<Candidate>>>,
    prober: Arc<P>,
    output: Arc<Output<W>>,
    counters: Arc<Counters>,
) where
    P: Probe + ?Sized,
    W: Write + Send,
{
    loop {
        // The lock is released before probing so other workers can take
        // the next candidate meanwhile.
        let next = candidates.lock().await.recv().await;
        let Some(candidate) = next else {
            break;
        };

        counters.probed.fetch_add(1, Ordering::Relaxed);
        if prober.probe(candidate.as_str()).await {
            counters.reachable.fetch_add(1, Ordering::Relaxed);
            output.emit(candidate.as_str());
        }
    }
    debug!("Worker {id} done");
}
