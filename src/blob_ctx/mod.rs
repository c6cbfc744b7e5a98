//! Distributed blob context
//!
//! [`BlobContext`] is the entry point for tile operations across a
//! cluster. Each call compares the tile's owner with the context's own
//! worker id: owned tiles are served in-process from the local
//! [`TileStore`] and come back already resolved, everything else goes
//! to the owner's [`WorkerProxy`].
//!
//! Sub-extents are always tile-local.

mod future;
mod loopback;
mod proxy;

pub use future::{Completer, TileFuture};
pub use loopback::LoopbackProxy;
pub use proxy::{
    CreateRequest, GetRequest, RemoteError, Request, Response, TileResponse, UpdateRequest,
    WorkerProxy,
};

use crate::buffer::Buffer;
use crate::extent::Extent;
use crate::tile::{Reducer, Tile, TileId, TileStore, WorkerId};
use crate::Error;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Worker id of the master process
pub const MASTER_ID: WorkerId = -1;

/// Proxies to every worker, keyed by worker id
pub type WorkerMap = HashMap<WorkerId, Arc<dyn WorkerProxy>>;

/// Which side of the cluster a context runs on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Owns the worker map; tears the proxies down when dropped
    Master,
    /// Attached to a worker map and tile store created elsewhere
    Worker,
}

/// Routes tile requests to their owners
pub struct BlobContext {
    self_id: WorkerId,
    role: Role,
    store: Option<Arc<TileStore>>,
    workers: Arc<WorkerMap>,
}

impl BlobContext {
    /// A master context owning `workers`
    pub fn master(workers: WorkerMap) -> Self {
        info!(workers = workers.len(), "master context up");
        BlobContext {
            self_id: MASTER_ID,
            role: Role::Master,
            store: None,
            workers: Arc::new(workers),
        }
    }

    /// A worker context serving `store` and reaching peers through `workers`
    pub fn worker(self_id: WorkerId, store: Arc<TileStore>, workers: Arc<WorkerMap>) -> Self {
        debug!(self_id, "worker context attached");
        BlobContext {
            self_id,
            role: Role::Worker,
            store: Some(store),
            workers,
        }
    }

    pub fn self_id(&self) -> WorkerId {
        self.self_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    pub fn store(&self) -> Option<&Arc<TileStore>> {
        self.store.as_ref()
    }

    /// Sorted ids of the workers this context can reach
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.workers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Read `sub_extent` of a tile (`None` for all of it)
    pub fn get(&self, tile_id: TileId, sub_extent: Option<&Extent>) -> TileFuture<TileResponse> {
        self.get_request(GetRequest {
            tile_id,
            sub_extent: sub_extent.cloned(),
            flatten: false,
        })
    }

    /// Like [`BlobContext::get`], with the data as one flat buffer
    pub fn get_flatten(
        &self,
        tile_id: TileId,
        sub_extent: Option<&Extent>,
    ) -> TileFuture<TileResponse> {
        self.get_request(GetRequest {
            tile_id,
            sub_extent: sub_extent.cloned(),
            flatten: true,
        })
    }

    /// Combine `payload` into `sub_extent` of a tile
    pub fn update(
        &self,
        tile_id: TileId,
        sub_extent: Option<&Extent>,
        payload: Buffer,
        reducer: Reducer,
    ) -> TileFuture<()> {
        let req = UpdateRequest {
            tile_id,
            sub_extent: sub_extent.cloned(),
            payload,
            reducer_name: reducer.name().to_string(),
        };
        if tile_id.worker == self.self_id {
            debug!(%tile_id, %reducer, "local update");
            return match self.local_store() {
                Ok(store) => TileFuture::ready(store.serve_update(&req)),
                Err(err) => TileFuture::failed(err),
            };
        }
        match self.proxy(tile_id.worker) {
            Ok(proxy) => {
                debug!(%tile_id, %reducer, "remote update");
                proxy.update(req)
            }
            Err(err) => TileFuture::failed(err),
        }
    }

    /// Materialize `tile` on the worker named by `hint`
    ///
    /// The owner picks the definitive id, which the future resolves to.
    pub fn create(&self, hint: TileId, tile: Tile) -> TileFuture<TileId> {
        if hint.worker == self.self_id {
            debug!(%hint, "local create");
            return match self.local_store() {
                Ok(store) => TileFuture::ready(store.create(hint, tile)),
                Err(err) => TileFuture::failed(err),
            };
        }
        match self.proxy(hint.worker) {
            Ok(proxy) => {
                debug!(%hint, "remote create");
                proxy.create(CreateRequest { hint, tile })
            }
            Err(err) => TileFuture::failed(err),
        }
    }

    fn get_request(&self, req: GetRequest) -> TileFuture<TileResponse> {
        let tile_id = req.tile_id;
        if tile_id.worker == self.self_id {
            debug!(%tile_id, flatten = req.flatten, "local get");
            return match self.local_store() {
                Ok(store) => TileFuture::ready(store.serve_get(&req)),
                Err(err) => TileFuture::failed(err),
            };
        }
        match self.proxy(tile_id.worker) {
            Ok(proxy) => {
                debug!(%tile_id, flatten = req.flatten, "remote get");
                proxy.get(req)
            }
            Err(err) => TileFuture::failed(err),
        }
    }

    fn local_store(&self) -> crate::Result<&Arc<TileStore>> {
        self.store.as_ref().ok_or_else(|| {
            Error::contract(format!("context {} has no local tile store", self.self_id))
        })
    }

    fn proxy(&self, worker: WorkerId) -> crate::Result<&Arc<dyn WorkerProxy>> {
        self.workers
            .get(&worker)
            .ok_or_else(|| Error::contract(format!("no proxy for worker {}", worker)))
    }
}

impl Drop for BlobContext {
    fn drop(&mut self) {
        if self.role == Role::Master {
            info!(workers = self.workers.len(), "master context down, dropping proxies");
        }
    }
}
