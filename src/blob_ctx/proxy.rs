//! Worker proxy interface and request envelopes

use super::TileFuture;
use crate::buffer::Buffer;
use crate::extent::Extent;
use crate::tile::{Reducer, Tile, TileId, TileStore};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Client side of a connection to one worker
///
/// Every call returns immediately; the future resolves once the worker
/// has answered.
pub trait WorkerProxy: Send + Sync {
    fn get(&self, req: GetRequest) -> TileFuture<TileResponse>;

    fn update(&self, req: UpdateRequest) -> TileFuture<()>;

    fn create(&self, req: CreateRequest) -> TileFuture<TileId>;
}

/// Read a region of a tile
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetRequest {
    pub tile_id: TileId,
    /// Tile-local region; `None` reads the whole tile
    pub sub_extent: Option<Extent>,
    /// Return the data as one flat buffer
    pub flatten: bool,
}

/// Combine a payload into a region of a tile
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub tile_id: TileId,
    pub sub_extent: Option<Extent>,
    pub payload: Buffer,
    pub reducer_name: String,
}

/// Materialize a tile at its owner
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateRequest {
    pub hint: TileId,
    pub tile: Tile,
}

/// Data read from a tile, with the extent it covers in the global array
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileResponse {
    pub extent: Extent,
    pub data: Buffer,
}

/// Any request a worker serves
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request {
    Get(GetRequest),
    Update(UpdateRequest),
    Create(CreateRequest),
}

/// A worker's answer to a [`Request`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Response {
    Tile(TileResponse),
    Ack,
    Created(TileId),
    Failed(RemoteError),
}

/// An error raised on the serving side, carried back to the caller
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RemoteError {
    ContractViolation(String),
    Unsupported(String),
    TileNotFound(TileId),
    Other(String),
}

impl From<&Error> for RemoteError {
    fn from(err: &Error) -> Self {
        match err {
            Error::ContractViolation(msg) => RemoteError::ContractViolation(msg.clone()),
            Error::Unsupported(msg) => RemoteError::Unsupported(msg.clone()),
            Error::TileNotFound(id) => RemoteError::TileNotFound(*id),
            other => RemoteError::Other(other.to_string()),
        }
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::ContractViolation(msg) => Error::ContractViolation(msg),
            RemoteError::Unsupported(msg) => Error::Unsupported(msg),
            RemoteError::TileNotFound(id) => Error::TileNotFound(id),
            RemoteError::Other(msg) => Error::Rpc(msg),
        }
    }
}

impl TileStore {
    /// Execute a get against this store
    pub fn serve_get(&self, req: &GetRequest) -> Result<TileResponse> {
        let tile = self.get(req.tile_id, req.sub_extent.as_ref())?;
        let extent = tile.extent().clone();
        let data = if req.flatten {
            tile.buffer().flatten()
        } else {
            tile.into_buffer()
        };
        Ok(TileResponse { extent, data })
    }

    /// Execute an update against this store
    pub fn serve_update(&self, req: &UpdateRequest) -> Result<()> {
        let reducer = Reducer::from_name(&req.reducer_name)?;
        self.update(req.tile_id, req.sub_extent.as_ref(), &req.payload, reducer)
    }

    /// Execute any request, folding errors into the response
    pub fn serve(&self, req: Request) -> Response {
        let result = match req {
            Request::Get(req) => self.serve_get(&req).map(Response::Tile),
            Request::Update(req) => self.serve_update(&req).map(|_| Response::Ack),
            Request::Create(req) => self.create(req.hint, req.tile).map(Response::Created),
        };
        result.unwrap_or_else(|err| Response::Failed(RemoteError::from(&err)))
    }
}
