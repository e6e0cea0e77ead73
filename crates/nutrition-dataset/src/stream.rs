//! Prefetching sample stream.
//!
//! A worker thread decodes batches in parallel (rayon) and hands them over
//! through a bounded channel: the consumer only waits when no batch is
//! ready and the worker waits while `prefetch` batches are queued.
//! Training streams shuffle through a fixed-size buffer first; evaluation
//! streams keep split order end to end.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use nutrition_core::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::indexer::IndexedSplit;
use crate::sample::{Sample, SamplePipeline};

/// Cooperative stop flag shared between a run and its streams.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub batch_size: usize,
    /// Shuffle buffer size; `None` keeps split order
    pub shuffle_buffer: Option<usize>,
    /// Batches decoded ahead of the consumer
    pub prefetch: usize,
    pub seed: u64,
    /// Mixed into shuffling and augmentation so every epoch differs
    pub epoch: usize,
}

impl StreamConfig {
    pub fn training(batch_size: usize, shuffle_buffer: usize, prefetch: usize, seed: u64) -> Self {
        Self {
            batch_size,
            shuffle_buffer: Some(shuffle_buffer),
            prefetch,
            seed,
            epoch: 0,
        }
    }

    pub fn evaluation(batch_size: usize, prefetch: usize) -> Self {
        Self {
            batch_size,
            shuffle_buffer: None,
            prefetch,
            seed: 0,
            epoch: 0,
        }
    }

    pub fn with_epoch(mut self, epoch: usize) -> Self {
        self.epoch = epoch;
        self
    }
}

/// Emission order of a shuffle buffer of size `buffer` over `0..len`.
///
/// The buffer is filled with the first `buffer` indices; each step emits a
/// uniformly chosen buffered index and refills from the input.
pub fn buffered_shuffle<R: Rng>(len: usize, buffer: usize, rng: &mut R) -> Vec<usize> {
    let buffer = buffer.max(1);
    let mut order = Vec::with_capacity(len);
    let mut pending: Vec<usize> = (0..len.min(buffer)).collect();
    let mut next = pending.len();

    while !pending.is_empty() {
        let pick = rng.gen_range(0..pending.len());
        order.push(pending.swap_remove(pick));
        if next < len {
            pending.push(next);
            next += 1;
        }
    }
    order
}

/// Per-sample RNG, independent of the thread that decodes the sample.
fn sample_rng(seed: u64, epoch: usize, index: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
    rng.set_stream(index as u64);
    rng
}

/// Iterator over decoded batches produced by a background worker.
pub struct SampleStream {
    receiver: Option<Receiver<Result<Vec<Sample>>>>,
    worker: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    num_batches: usize,
}

impl SampleStream {
    pub fn spawn(
        pipeline: Arc<SamplePipeline>,
        split: Arc<IndexedSplit>,
        config: StreamConfig,
        stop: StopSignal,
    ) -> Self {
        let batch_size = config.batch_size.max(1);
        let num_batches = split.len().div_ceil(batch_size);
        let (sender, receiver) = mpsc::sync_channel(config.prefetch.max(1));
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = {
            let cancel = Arc::clone(&cancel);
            thread::spawn(move || {
                produce(&pipeline, &split, &config, batch_size, &stop, &cancel, sender)
            })
        };

        Self {
            receiver: Some(receiver),
            worker: Some(worker),
            cancel,
            num_batches,
        }
    }

    /// Number of batches a full pass yields
    pub fn num_batches(&self) -> usize {
        self.num_batches
    }
}

fn produce(
    pipeline: &SamplePipeline,
    split: &IndexedSplit,
    config: &StreamConfig,
    batch_size: usize,
    stop: &StopSignal,
    cancel: &AtomicBool,
    sender: SyncSender<Result<Vec<Sample>>>,
) {
    let order = match config.shuffle_buffer {
        Some(buffer) => {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed ^ ((config.epoch as u64) << 32));
            buffered_shuffle(split.len(), buffer, &mut rng)
        }
        None => (0..split.len()).collect(),
    };

    for (batch_no, chunk) in order.chunks(batch_size).enumerate() {
        if stop.is_stopped() || cancel.load(Ordering::SeqCst) {
            debug!("Sample stream stopped before batch {batch_no}");
            return;
        }

        let batch: Result<Vec<Sample>> = chunk
            .par_iter()
            .map(|&i| {
                let mut rng = sample_rng(config.seed, config.epoch, i);
                pipeline.load_sample(&split.paths[i], &split.labels[i], &mut rng)
            })
            .collect();

        let failed = batch.is_err();
        if sender.send(batch).is_err() {
            // Consumer dropped the stream
            return;
        }
        if failed {
            warn!("Sample stream aborted at batch {batch_no}");
            return;
        }
    }
}

impl Iterator for SampleStream {
    type Item = Result<Vec<Sample>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.as_ref()?.recv().ok()
    }
}

impl Drop for SampleStream {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        // Unblocks a worker waiting on a full channel
        self.receiver.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Sample stream worker panicked");
            }
        }
    }
}
