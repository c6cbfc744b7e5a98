//! # tilecore
//!
//! Storage core for distributed N-dimensional arrays split into tiles.
//!
//! tilecore provides the pieces a distributed array runtime builds on:
//! rectangular region arithmetic, typed buffers with explicit memory
//! ownership, and a context that routes tile reads and writes to the
//! worker that owns them.
//!
//! ## Core Concepts
//!
//! - **Extents**: N-d regions of an array, with intersection, slicing and
//!   coordinate translation
//! - **Buffers**: Typed row-major data that is exclusively owned, borrowed
//!   from a host array, or shared through a reference-counted registry
//! - **Tiles**: An extent plus the buffer holding its data, stored by the
//!   worker that owns it
//! - **Blob context**: Local-or-remote dispatch of `get`, `update` and
//!   `create`, answered through futures
//!
//! ## Example
//!
//! ```ignore
//! use tilecore::{BlobContext, Extent, Tile, TileId, ElementType};
//!
//! let ctx = BlobContext::worker(0, store, peers);
//! let tile = Tile::zeros(Extent::from_shape(&[4, 4]), ElementType::Float64);
//! let id = ctx.create(TileId::for_worker(0), tile).wait()?;
//! let corner = ctx.get(id, Some(&Extent::create(&[0, 0], &[2, 2], None)?)).wait()?;
//! ```

pub mod blob_ctx;
pub mod buffer;
pub mod config;
pub mod extent;
pub mod tile;

mod error;

pub use blob_ctx::{BlobContext, LoopbackProxy, TileFuture, TileResponse, WorkerMap, WorkerProxy};
pub use buffer::{Buffer, ElementType, MemoryRegistry, Ownership};
pub use config::Config;
pub use error::{Error, Result};
pub use extent::{Extent, SliceItem};
pub use tile::{Reducer, Tile, TileId, TileStore, WorkerId};
