//! In-process transport
//!
//! A [`LoopbackProxy`] serves one worker's [`TileStore`] on a dedicated
//! thread. Requests and responses cross the channel bincode-encoded, so
//! everything a socket transport would have to serialize is exercised.

use super::proxy::{
    CreateRequest, GetRequest, Request, Response, TileResponse, UpdateRequest, WorkerProxy,
};
use super::{Completer, TileFuture};
use crate::tile::{TileId, TileStore, WorkerId};
use crate::{Error, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct Envelope {
    frame: Vec<u8>,
    reply: Reply,
}

enum Reply {
    Get(Completer<TileResponse>),
    Update(Completer<()>),
    Create(Completer<TileId>),
}

/// Proxy to a worker living in the same process
pub struct LoopbackProxy {
    worker: WorkerId,
    tx: Option<mpsc::UnboundedSender<Envelope>>,
    server: Option<JoinHandle<()>>,
}

impl LoopbackProxy {
    /// Start serving `store` on a new thread
    pub fn spawn(store: Arc<TileStore>) -> Result<Self> {
        let worker = store.worker();
        let (tx, rx) = mpsc::unbounded_channel();
        let server = thread::Builder::new()
            .name(format!("tile-server-{}", worker))
            .spawn(move || serve_loop(store, rx))?;
        debug!(worker, "loopback server started");
        Ok(LoopbackProxy {
            worker,
            tx: Some(tx),
            server: Some(server),
        })
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    fn send<T>(&self, req: Request, wrap: fn(Completer<T>) -> Reply) -> TileFuture<T> {
        let frame = match bincode::serialize(&req) {
            Ok(frame) => frame,
            Err(err) => return TileFuture::failed(err.into()),
        };
        let (completer, fut) = TileFuture::pending();
        let envelope = Envelope {
            frame,
            reply: wrap(completer),
        };
        let sent = self.tx.as_ref().map(|tx| tx.send(envelope));
        match sent {
            Some(Ok(())) => fut,
            // The envelope, and with it the completer, is dropped here, so
            // the future resolves with an Rpc error.
            _ => {
                warn!(worker = self.worker, "loopback server is gone");
                fut
            }
        }
    }
}

impl WorkerProxy for LoopbackProxy {
    fn get(&self, req: GetRequest) -> TileFuture<TileResponse> {
        self.send(Request::Get(req), Reply::Get)
    }

    fn update(&self, req: UpdateRequest) -> TileFuture<()> {
        self.send(Request::Update(req), Reply::Update)
    }

    fn create(&self, req: CreateRequest) -> TileFuture<TileId> {
        self.send(Request::Create(req), Reply::Create)
    }
}

impl Drop for LoopbackProxy {
    fn drop(&mut self) {
        // Closing the channel ends the serve loop.
        self.tx.take();
        if let Some(server) = self.server.take() {
            if server.join().is_err() {
                warn!(worker = self.worker, "loopback server panicked");
            }
        }
        debug!(worker = self.worker, "loopback server stopped");
    }
}

fn serve_loop(store: Arc<TileStore>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(Envelope { frame, reply }) = rx.blocking_recv() {
        let response = match bincode::deserialize::<Request>(&frame) {
            Ok(req) => store.serve(req),
            Err(err) => {
                warn!(worker = store.worker(), %err, "undecodable request");
                reply.fail(err.into());
                continue;
            }
        };
        let decoded = bincode::serialize(&response)
            .and_then(|bytes| bincode::deserialize::<Response>(&bytes))
            .map_err(Error::from);
        match decoded {
            Ok(response) => reply.complete(response),
            Err(err) => reply.fail(err),
        }
    }
}

impl Reply {
    fn complete(self, response: Response) {
        match (self, response) {
            (reply, Response::Failed(err)) => reply.fail(err.into()),
            (Reply::Get(c), Response::Tile(tile)) => c.complete(Ok(tile)),
            (Reply::Update(c), Response::Ack) => c.complete(Ok(())),
            (Reply::Create(c), Response::Created(id)) => c.complete(Ok(id)),
            (reply, other) => reply.fail(Error::Rpc(format!("mismatched response {:?}", other))),
        }
    }

    fn fail(self, err: Error) {
        match self {
            Reply::Get(c) => c.complete(Err(err)),
            Reply::Update(c) => c.complete(Err(err)),
            Reply::Create(c) => c.complete(Err(err)),
        }
    }
}
