//! Reassembly on a background thread with bounded buffering and fallback.
//!
//! The owner and the worker only exchange messages, in FIFO order on both
//! sides. Until the worker reports ready, chunks are staged locally up to
//! `buffer_cap` bytes. Overflowing the cap, a worker error, a panic or a
//! disconnect all trigger the same one-time fallback:
//!
//! 1. Drain every reply that already arrived.
//! 2. Drop the worker.
//! 3. Seed an in-process reassembler with the last residual bytes the worker
//!    reported, stamped with the worker's last arrival time so the idle-gap
//!    rule still applies, then replay every chunk it never acknowledged, in
//!    order.
//!
//! From then on the channel is reassembled in-process for good. No chunk is
//! parsed twice and none is skipped.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use homebus_frame::{Frame, FrameReassembler, RxFraming};
use serde::{Deserialize, Serialize};

/// Default cap on bytes staged before the worker is ready.
pub const DEFAULT_BUFFER_CAP: usize = 64 * 1024;

/// Background reassembly settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Bytes staged locally while the worker starts up.
    pub buffer_cap: usize,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            buffer_cap: DEFAULT_BUFFER_CAP,
        }
    }
}

/// Builds the worker's reassembler on the worker thread.
pub type WorkerFactory = Box<dyn FnOnce() -> Result<FrameReassembler, String> + Send>;

enum Request {
    Chunk {
        seq: u64,
        bytes: Vec<u8>,
        at: Instant,
    },
    State(Option<serde_json::Value>),
}

enum Reply {
    Ready,
    Frames {
        seq: u64,
        frames: Vec<Frame>,
        residual: Vec<u8>,
        last_byte_at: Option<Instant>,
    },
    Failed(String),
}

struct Chunk {
    seq: u64,
    bytes: Vec<u8>,
    at: Instant,
}

struct Worker {
    requests: Sender<Request>,
    replies: Receiver<Reply>,
    ready: bool,
    next_seq: u64,
    staged: VecDeque<Chunk>,
    staged_bytes: usize,
    unacked: VecDeque<Chunk>,
    residual: Vec<u8>,
    residual_at: Option<Instant>,
}

enum Mode {
    Worker(Worker),
    InProcess(FrameReassembler),
}

/// A [`FrameReassembler`] running on its own thread, with in-process fallback.
pub struct OffloadedReassembler {
    framing: RxFraming,
    buffer_cap: usize,
    state: Option<serde_json::Value>,
    mode: Mode,
}

impl OffloadedReassembler {
    /// Start a worker thread reassembling with `framing`.
    pub fn spawn(name: &str, framing: RxFraming, config: &OffloadConfig) -> Self {
        let worker_framing = framing.clone();
        Self::with_factory(
            name,
            framing,
            config,
            Box::new(move || Ok(FrameReassembler::new(worker_framing))),
        )
    }

    /// Start a worker whose reassembler comes from `factory`.
    ///
    /// The worker reports ready once `factory` returns. An `Err` or a panic
    /// sends the channel straight to in-process fallback.
    pub fn with_factory(
        name: &str,
        framing: RxFraming,
        config: &OffloadConfig,
        factory: WorkerFactory,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();

        let spawned = thread::Builder::new()
            .name(format!("homebus-rx-{name}"))
            .spawn(move || run_worker(factory, request_rx, reply_tx));

        let mode = match spawned {
            Ok(_) => Mode::Worker(Worker {
                requests: request_tx,
                replies: reply_rx,
                ready: false,
                next_seq: 0,
                staged: VecDeque::new(),
                staged_bytes: 0,
                unacked: VecDeque::new(),
                residual: Vec::new(),
                residual_at: None,
            }),
            Err(err) => {
                tracing::warn!(channel = name, error = %err, "rx worker did not start, reassembling in-process");
                Mode::InProcess(FrameReassembler::new(framing.clone()))
            }
        };

        Self {
            framing,
            buffer_cap: config.buffer_cap,
            state: None,
            mode,
        }
    }

    /// Hand a chunk over and collect every frame available so far.
    pub fn feed_at(&mut self, chunk: &[u8], now: Instant) -> Vec<Frame> {
        let mut frames = self.poll();

        let failure = match &mut self.mode {
            Mode::InProcess(reassembler) => {
                frames.extend(reassembler.feed_at(chunk, now));
                return frames;
            }
            Mode::Worker(worker) => {
                let seq = worker.next_seq;
                worker.next_seq += 1;
                let chunk = Chunk {
                    seq,
                    bytes: chunk.to_vec(),
                    at: now,
                };

                if worker.ready {
                    worker.send(chunk).err()
                } else if worker.staged_bytes + chunk.bytes.len() > self.buffer_cap {
                    let staged = worker.staged_bytes + chunk.bytes.len();
                    worker.staged.push_back(chunk);
                    Some(format!(
                        "staged {staged} bytes before worker ready, cap is {}",
                        self.buffer_cap
                    ))
                } else {
                    worker.staged_bytes += chunk.bytes.len();
                    worker.staged.push_back(chunk);
                    None
                }
            }
        };

        if let Some(reason) = failure {
            frames.extend(self.fall_back(&reason));
        }
        frames
    }

    /// Collect frames the worker produced since the last call.
    pub fn poll(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        let failure = match &mut self.mode {
            Mode::InProcess(_) => None,
            Mode::Worker(worker) => loop {
                match worker.replies.try_recv() {
                    Ok(reply) => {
                        if let Err(reason) = worker.handle(reply, self.state.as_ref(), &mut frames) {
                            break Some(reason);
                        }
                    }
                    Err(TryRecvError::Empty) => break None,
                    Err(TryRecvError::Disconnected) => break Some("worker disconnected".to_string()),
                }
            },
        };

        if let Some(reason) = failure {
            frames.extend(self.fall_back(&reason));
        }
        frames
    }

    /// Wait up to `timeout` for the worker to process everything handed over.
    pub fn flush(&mut self, timeout: Duration) -> Vec<Frame> {
        let deadline = Instant::now() + timeout;
        let mut frames = Vec::new();

        let failure = match &mut self.mode {
            Mode::InProcess(_) => None,
            Mode::Worker(worker) => loop {
                if worker.is_drained() {
                    break None;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                match worker.replies.recv_timeout(remaining) {
                    Ok(reply) => {
                        if let Err(reason) = worker.handle(reply, self.state.as_ref(), &mut frames) {
                            break Some(reason);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        tracing::debug!(
                            pending = worker.unacked.len() + worker.staged.len(),
                            "flush timed out"
                        );
                        break None;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        break Some("worker disconnected".to_string())
                    }
                }
            },
        };

        if let Some(reason) = failure {
            frames.extend(self.fall_back(&reason));
        }
        frames
    }

    /// Install the state snapshot for script checksums.
    pub fn set_state(&mut self, state: Option<serde_json::Value>) {
        self.state = state.clone();
        match &mut self.mode {
            Mode::InProcess(reassembler) => reassembler.set_state(state),
            // Not ready yet: the snapshot goes out ahead of the staged chunks.
            Mode::Worker(worker) if !worker.ready => {}
            Mode::Worker(worker) => {
                // A dead worker is noticed by the next feed or poll, and the
                // fallback reassembler starts from `self.state`.
                if worker.requests.send(Request::State(state)).is_err() {
                    tracing::trace!("state snapshot not delivered to rx worker");
                }
            }
        }
    }

    /// Whether the channel has permanently moved to in-process reassembly.
    pub fn is_fallback(&self) -> bool {
        matches!(self.mode, Mode::InProcess(_))
    }

    /// Whether the worker has reported ready.
    pub fn is_ready(&self) -> bool {
        matches!(&self.mode, Mode::Worker(worker) if worker.ready)
    }

    fn fall_back(&mut self, reason: &str) -> Vec<Frame> {
        let Mode::Worker(worker) = &mut self.mode else {
            return Vec::new();
        };

        let mut frames = Vec::new();
        // Replies already queued cover chunks that must not be replayed.
        while let Ok(reply) = worker.replies.try_recv() {
            if let Reply::Frames {
                seq,
                frames: ready,
                residual,
                last_byte_at,
            } = reply
            {
                worker.ack(seq, residual, last_byte_at);
                frames.extend(ready);
            }
        }

        let replay: Vec<Chunk> = worker.unacked.drain(..).chain(worker.staged.drain(..)).collect();
        tracing::warn!(
            reason,
            residual = worker.residual.len(),
            replayed = replay.len(),
            "rx worker abandoned, reassembling in-process"
        );

        let mut reassembler = FrameReassembler::new(self.framing.clone());
        reassembler.set_state(self.state.clone());
        match worker.residual_at {
            Some(at) => reassembler.seed_at(&worker.residual, at),
            None => reassembler.seed(&worker.residual),
        }
        for chunk in &replay {
            frames.extend(reassembler.feed_at(&chunk.bytes, chunk.at));
        }

        self.mode = Mode::InProcess(reassembler);
        frames
    }
}

impl Worker {
    fn send(&mut self, chunk: Chunk) -> Result<(), String> {
        let request = Request::Chunk {
            seq: chunk.seq,
            bytes: chunk.bytes.clone(),
            at: chunk.at,
        };
        self.unacked.push_back(chunk);
        self.requests
            .send(request)
            .map_err(|_| "worker disconnected".to_string())
    }

    fn handle(
        &mut self,
        reply: Reply,
        state: Option<&serde_json::Value>,
        frames: &mut Vec<Frame>,
    ) -> Result<(), String> {
        match reply {
            Reply::Ready => {
                self.ready = true;
                if state.is_some() {
                    self.requests
                        .send(Request::State(state.cloned()))
                        .map_err(|_| "worker disconnected".to_string())?;
                }
                self.staged_bytes = 0;
                while let Some(chunk) = self.staged.pop_front() {
                    self.send(chunk)?;
                }
                tracing::debug!("rx worker ready");
                Ok(())
            }
            Reply::Frames {
                seq,
                frames: ready,
                residual,
                last_byte_at,
            } => {
                self.ack(seq, residual, last_byte_at);
                frames.extend(ready);
                Ok(())
            }
            Reply::Failed(reason) => Err(reason),
        }
    }

    fn ack(&mut self, seq: u64, residual: Vec<u8>, last_byte_at: Option<Instant>) {
        while self.unacked.front().is_some_and(|chunk| chunk.seq <= seq) {
            self.unacked.pop_front();
        }
        self.residual = residual;
        self.residual_at = last_byte_at;
    }

    fn is_drained(&self) -> bool {
        self.ready && self.staged.is_empty() && self.unacked.is_empty()
    }
}

fn run_worker(factory: WorkerFactory, requests: Receiver<Request>, replies: Sender<Reply>) {
    let mut reassembler = match factory() {
        Ok(reassembler) => reassembler,
        Err(reason) => {
            let _ = replies.send(Reply::Failed(reason));
            return;
        }
    };
    if replies.send(Reply::Ready).is_err() {
        return;
    }

    while let Ok(request) = requests.recv() {
        match request {
            Request::Chunk { seq, bytes, at } => {
                let frames = reassembler.feed_at(&bytes, at);
                let residual = reassembler.pending().to_vec();
                if replies
                    .send(Reply::Frames {
                        seq,
                        frames,
                        residual,
                        last_byte_at: reassembler.last_byte_at(),
                    })
                    .is_err()
                {
                    return;
                }
            }
            Request::State(state) => reassembler.set_state(state),
        }
    }
}

impl std::fmt::Debug for OffloadedReassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffloadedReassembler")
            .field("buffer_cap", &self.buffer_cap)
            .field("ready", &self.is_ready())
            .field("fallback", &self.is_fallback())
            .finish()
    }
}
