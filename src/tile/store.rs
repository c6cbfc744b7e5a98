//! Per-worker tile table
//!
//! Holds every tile a worker owns and executes `get`, `update` and
//! `create` against them. Updates to one tile are serialized by that
//! tile's lock; different tiles proceed independently.
//!
//! A store built with a [`MemoryRegistry`] keeps tile memory in shared
//! sources, so reads of contiguous regions alias the tile instead of
//! copying it. An update never writes through an alias: the tile is
//! copied, updated and shared again, leaving earlier readers a snapshot.

use super::{Reducer, Tile, TileId, WorkerId};
use crate::buffer::{Buffer, MemoryRegistry};
use crate::extent::Extent;
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The tiles owned by one worker
pub struct TileStore {
    worker: WorkerId,
    tiles: RwLock<HashMap<i64, Arc<Mutex<Tile>>>>,
    next_id: Mutex<i64>,
    registry: Option<Arc<MemoryRegistry>>,
}

impl TileStore {
    pub fn new(worker: WorkerId) -> Self {
        TileStore {
            worker,
            tiles: RwLock::new(HashMap::new()),
            next_id: Mutex::new(0),
            registry: None,
        }
    }

    /// A store whose tiles live in shared sources tracked by `registry`
    pub fn with_registry(worker: WorkerId, registry: Arc<MemoryRegistry>) -> Self {
        TileStore {
            registry: Some(registry),
            ..TileStore::new(worker)
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn shares_memory(&self) -> bool {
        self.registry.is_some()
    }

    /// Store a tile and return its definitive id
    ///
    /// A hint with a free local id keeps it; otherwise the next free id
    /// is assigned.
    pub fn create(&self, hint: TileId, mut tile: Tile) -> Result<TileId> {
        if hint.worker != self.worker {
            return Err(Error::contract(format!(
                "{} sent to worker {}",
                hint, self.worker
            )));
        }
        if let Some(registry) = &self.registry {
            tile.share(registry);
        }

        let mut tiles = self.tiles.write();
        let mut next_id = self.next_id.lock();
        let id = if !hint.is_hint() && !tiles.contains_key(&hint.id) {
            hint.id
        } else {
            // Wraps past i64::MAX; the table is never full.
            while tiles.contains_key(&*next_id) {
                *next_id = (*next_id).checked_add(1).unwrap_or(0);
            }
            *next_id
        };
        *next_id = (*next_id).max(id.saturating_add(1));
        tiles.insert(id, Arc::new(Mutex::new(tile)));

        let tile_id = TileId::new(self.worker, id);
        debug!(%tile_id, "created tile");
        Ok(tile_id)
    }

    /// Read `sub` (tile-local; `None` for the whole tile)
    pub fn get(&self, id: TileId, sub: Option<&Extent>) -> Result<Tile> {
        let slot = self.slot(id)?;
        let tile = slot.lock();
        match sub {
            Some(sub) => tile.get(sub),
            None => Ok(tile.clone()),
        }
    }

    /// Combine `payload` into `sub` (tile-local; `None` for the whole tile)
    pub fn update(
        &self,
        id: TileId,
        sub: Option<&Extent>,
        payload: &Buffer,
        reducer: Reducer,
    ) -> Result<()> {
        let slot = self.slot(id)?;
        let mut tile = slot.lock();
        let whole;
        let sub = match sub {
            Some(sub) => sub,
            None => {
                whole = tile.local_extent();
                &whole
            }
        };
        tile.apply(sub, payload, reducer)?;
        if let Some(registry) = &self.registry {
            tile.share(registry);
        }
        debug!(tile_id = %id, %reducer, "applied update");
        Ok(())
    }

    /// Drop a tile, returning it if it existed
    pub fn destroy(&self, id: TileId) -> Option<Tile> {
        if id.worker != self.worker {
            return None;
        }
        let slot = self.tiles.write().remove(&id.id)?;
        let tile = slot.lock().clone();
        Some(tile)
    }

    pub fn contains(&self, id: TileId) -> bool {
        id.worker == self.worker && self.tiles.read().contains_key(&id.id)
    }

    pub fn len(&self) -> usize {
        self.tiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: TileId) -> Result<Arc<Mutex<Tile>>> {
        if id.worker != self.worker {
            return Err(Error::TileNotFound(id));
        }
        self.tiles
            .read()
            .get(&id.id)
            .cloned()
            .ok_or(Error::TileNotFound(id))
    }
}
