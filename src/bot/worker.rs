use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use super::ProcessError;
use crate::UserId;
use crate::audio::codec::Codec;
use crate::audio::{AudioBuffer, EffectParameters, effects};

/// One render request taken from a confirmed session.
pub struct Job {
    pub ticket: u64,
    pub user_id: UserId,
    pub source: AudioBuffer,
    pub params: EffectParameters,
}

/// Encoded output of a successful render.
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub duration_ms: u64,
}

/// A finished job, successful or not, on its way back to the dispatcher.
pub struct Completion {
    pub ticket: u64,
    pub user_id: UserId,
    pub result: Result<Rendered, ProcessError>,
}

/// Bounded rayon pool for renders. Results come back over a channel so the
/// dispatcher never blocks on a job.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("render-{i}"))
            .build()?;
        let (tx, rx) = mpsc::channel();
        Ok(Self { pool, tx, rx })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue a job. Returns immediately.
    pub fn submit<C: Codec + 'static>(&self, job: Job, codec: Arc<C>) {
        let tx = self.tx.clone();
        log::info!("Queued render {} for user {}", job.ticket, job.user_id);
        self.pool.spawn(move || {
            let result = render(&job.source, &job.params, codec.as_ref());
            let completion = Completion {
                ticket: job.ticket,
                user_id: job.user_id,
                result,
            };
            if tx.send(completion).is_err() {
                log::debug!("Dispatcher gone, dropping render {}", job.ticket);
            }
        });
    }

    /// Next finished job, if one is waiting.
    pub fn try_next(&self) -> Option<Completion> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next finished job.
    pub fn next_timeout(&self, timeout: Duration) -> Option<Completion> {
        match self.rx.recv_timeout(timeout) {
            Ok(c) => Some(c),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Effects chain plus encode. Runs on a worker thread.
pub fn render<C: Codec + ?Sized>(
    source: &AudioBuffer,
    params: &EffectParameters,
    codec: &C,
) -> Result<Rendered, ProcessError> {
    let started = std::time::Instant::now();
    let output = effects::process(source, params)?;
    let bytes = codec.encode(&output)?;
    log::debug!(
        "Rendered {} ms -> {} ms ({} bytes) in {:?}",
        source.duration_ms(),
        output.duration_ms(),
        bytes.len(),
        started.elapsed()
    );
    Ok(Rendered {
        bytes,
        duration_ms: output.duration_ms(),
    })
}
