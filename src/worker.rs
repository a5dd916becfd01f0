//! Background worker running diff requests off the caller's thread.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::core::{CancelToken, DiffEngine, DiffHunk, DiffOutcome, DiffRequest};

#[derive(Debug, Clone)]
struct DiffLoadRequest {
    id: u64,
    request: DiffRequest,
}

/// Messages streamed back from the worker.
#[derive(Debug)]
pub enum DiffLoadResponse {
    /// One hunk, sent as soon as it is parsed or read from cache.
    Hunk {
        /// Request id from [`DiffWorker::submit`].
        id: u64,
        /// Position of the hunk.
        index: usize,
        /// The hunk.
        hunk: DiffHunk,
    },
    /// The request finished. `outcome.hunks` is empty; the hunks were
    /// already delivered as [`DiffLoadResponse::Hunk`] messages.
    Finished {
        /// Request id.
        id: u64,
        /// Preflight data and flags.
        outcome: DiffOutcome,
    },
    /// The request failed.
    Error {
        /// Request id.
        id: u64,
        /// Error text, including upstream diagnostics.
        message: String,
    },
}

impl DiffLoadResponse {
    /// Request id this message belongs to.
    pub fn id(&self) -> u64 {
        match self {
            Self::Hunk { id, .. } | Self::Finished { id, .. } | Self::Error { id, .. } => *id,
        }
    }
}

/// Newest submitted id and the request this worker is running.
#[derive(Debug, Default)]
struct Current {
    latest: u64,
    running: Option<(u64, CancelToken)>,
}

/// Handle to a diff worker thread.
pub struct DiffWorker {
    request_tx: Option<Sender<DiffLoadRequest>>,
    response_rx: Receiver<DiffLoadResponse>,
    engine: Arc<DiffEngine>,
    current: Arc<Mutex<Current>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DiffWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffWorker")
            .field("request_tx", &self.request_tx)
            .field("response_rx", &self.response_rx)
            .field("handle", &self.handle.as_ref().map(|_| "..."))
            .finish()
    }
}

/// Start a worker thread serving requests against `engine`.
pub fn spawn_diff_worker(engine: Arc<DiffEngine>) -> DiffWorker {
    let (request_tx, request_rx) = mpsc::channel::<DiffLoadRequest>();
    let (response_tx, response_rx) = mpsc::channel::<DiffLoadResponse>();

    let current = Arc::new(Mutex::new(Current::default()));
    let worker_engine = engine.clone();
    let worker_current = current.clone();
    let handle = thread::spawn(move || {
        worker_loop(&worker_engine, &worker_current, request_rx, response_tx)
    });

    DiffWorker {
        request_tx: Some(request_tx),
        response_rx,
        engine,
        current,
        handle: Some(handle),
    }
}

impl DiffWorker {
    /// Queue a request and return its id.
    ///
    /// A newer request supersedes older ones from this worker: its
    /// in-flight request is cancelled and queued ones are skipped. Requests
    /// other clients run on the same engine are left alone.
    pub fn submit(&self, request: DiffRequest) -> u64 {
        let id = {
            let mut current = self.current.lock();
            current.latest += 1;
            if let Some((_, token)) = &current.running {
                token.cancel();
            }
            current.latest
        };
        if let Some(tx) = &self.request_tx {
            let _ = tx.send(DiffLoadRequest { id, request });
        }
        id
    }

    /// Receiver for streamed responses.
    pub fn responses(&self) -> &Receiver<DiffLoadResponse> {
        &self.response_rx
    }

    /// The engine the worker drives.
    pub fn engine(&self) -> &Arc<DiffEngine> {
        &self.engine
    }
}

impl Drop for DiffWorker {
    fn drop(&mut self) {
        if let Some((_, token)) = &self.current.lock().running {
            token.cancel();
        }
        // Closing the request channel ends worker_loop.
        self.request_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    engine: &DiffEngine,
    current: &Mutex<Current>,
    request_rx: Receiver<DiffLoadRequest>,
    response_tx: Sender<DiffLoadResponse>,
) {
    while let Ok(mut req) = request_rx.recv() {
        // Drain queued requests so we always work on the latest selection.
        while let Ok(next) = request_rx.try_recv() {
            req = next;
        }

        let id = req.id;
        let token = CancelToken::new();
        {
            let mut current = current.lock();
            if current.latest > id {
                // A newer request is already on its way.
                continue;
            }
            current.running = Some((id, token.clone()));
        }

        let result = engine.request_with_token(&req.request, token, |index, hunk| {
            let _ = response_tx.send(DiffLoadResponse::Hunk {
                id,
                index,
                hunk: hunk.clone(),
            });
        });

        current.lock().running = None;

        let response = match result {
            Ok(mut outcome) => {
                outcome.hunks.clear();
                DiffLoadResponse::Finished { id, outcome }
            }
            Err(e) => DiffLoadResponse::Error {
                id,
                message: e.to_string(),
            },
        };
        if response_tx.send(response).is_err() {
            break;
        }
    }
}
