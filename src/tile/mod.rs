//! Tiles: materialized regions of a distributed array
//!
//! A [`Tile`] pairs the [`Extent`] it covers in the global array with a
//! [`Buffer`] holding the data. Tiles live in a worker's [`TileStore`] and
//! are addressed from anywhere in the cluster by [`TileId`].

mod reducer;
mod store;

pub use reducer::Reducer;
pub use store::TileStore;

use crate::buffer::{runs, shape_i64, Buffer, ElementType, MemoryRegistry};
use crate::extent::Extent;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of a worker process
pub type WorkerId = i32;

/// Globally unique tile identifier: owning worker plus a worker-local id
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    pub worker: WorkerId,
    pub id: i64,
}

impl TileId {
    pub fn new(worker: WorkerId, id: i64) -> Self {
        TileId { worker, id }
    }

    /// A creation hint that only names the target worker
    pub fn for_worker(worker: WorkerId) -> Self {
        TileId { worker, id: -1 }
    }

    /// Whether this id still needs the owner to assign a local id
    pub fn is_hint(&self) -> bool {
        self.id < 0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T({}:{})", self.worker, self.id)
    }
}

/// A region of an array together with its data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TileParts")]
pub struct Tile {
    extent: Extent,
    buffer: Buffer,
}

/// Unchecked wire form of a [`Tile`]
#[derive(Deserialize)]
struct TileParts {
    extent: Extent,
    buffer: Buffer,
}

impl TryFrom<TileParts> for Tile {
    type Error = Error;

    fn try_from(parts: TileParts) -> Result<Self> {
        Tile::new(parts.extent, parts.buffer)
    }
}

impl Tile {
    /// The buffer's dimensions must equal the extent's shape.
    pub fn new(extent: Extent, buffer: Buffer) -> Result<Self> {
        if shape_i64(buffer.dimensions()) != extent.shape() {
            return Err(Error::contract(format!(
                "buffer dimensions {:?} do not match {}",
                buffer.dimensions(),
                extent
            )));
        }
        Ok(Tile { extent, buffer })
    }

    /// A zero-filled tile covering `extent`
    pub fn zeros(extent: Extent, dtype: ElementType) -> Self {
        let dims: Vec<usize> = extent.shape().iter().map(|&s| s as usize).collect();
        let buffer = Buffer::zeros(&dims, dtype);
        Tile { extent, buffer }
    }

    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn into_buffer(self) -> Buffer {
        self.buffer
    }

    pub fn dtype(&self) -> ElementType {
        self.buffer.dtype()
    }

    /// The whole tile in tile-local coordinates
    pub fn local_extent(&self) -> Extent {
        Extent::from_shape(self.extent.shape())
    }

    /// The sub-region `sub` (tile-local coordinates)
    ///
    /// The returned tile's extent is expressed in the global array. Shared
    /// tiles hand out aliases where the region is contiguous; anything
    /// else is copied.
    pub fn get(&self, sub: &Extent) -> Result<Tile> {
        let buffer = self.buffer.view(sub)?;
        let ul: Vec<i64> = self.extent.ul().iter().zip(sub.ul()).map(|(a, b)| a + b).collect();
        let lr: Vec<i64> = self.extent.ul().iter().zip(sub.lr()).map(|(a, b)| a + b).collect();
        let extent = Extent::create(&ul, &lr, self.extent.array_shape())?;
        Ok(Tile { extent, buffer })
    }

    /// Move exclusive tile memory into a source of `registry`
    pub fn share(&mut self, registry: &Arc<MemoryRegistry>) {
        let placeholder = Buffer::empty_marker(self.dtype());
        let buffer = std::mem::replace(&mut self.buffer, placeholder);
        self.buffer = buffer.into_shared(registry);
    }

    /// Combine `payload` into the sub-region `sub` (tile-local
    /// coordinates) using `reducer`
    pub fn apply(&mut self, sub: &Extent, payload: &Buffer, reducer: Reducer) -> Result<()> {
        self.buffer.check_region(sub)?;
        if payload.dtype() != self.dtype() {
            return Err(Error::contract(format!(
                "payload holds {}, tile holds {}",
                payload.dtype(),
                self.dtype()
            )));
        }
        if payload.len() as i64 != sub.size() {
            return Err(Error::contract(format!(
                "payload of {} elements for region of {}",
                payload.len(),
                sub.size()
            )));
        }

        let size = self.dtype().size();
        let dtype = self.dtype();
        let region_runs = runs(self.buffer.dimensions(), sub);
        let src = payload.as_bytes();
        let dst = self.buffer.make_mut();
        for run in region_runs {
            let to = run.outer * size;
            let from = run.inner * size;
            let n = run.len * size;
            reducer.combine(dtype, &mut dst[to..to + n], &src[from..from + n])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile_3x4() -> Tile {
        let extent = Extent::create(&[2, 0], &[5, 4], Some(&[10, 4])).unwrap();
        let values: Vec<i32> = (0..12).collect();
        Tile::new(extent, Buffer::from_elements(&[3, 4], &values).unwrap()).unwrap()
    }

    fn local(ul: &[i64], lr: &[i64]) -> Extent {
        Extent::create(ul, lr, None).unwrap()
    }

    #[test]
    fn test_new_checks_shape() {
        let extent = Extent::from_shape(&[2, 2]);
        assert!(Tile::new(extent, Buffer::zeros(&[4], ElementType::Int32)).is_err());
    }

    #[test]
    fn test_get_translates_to_global() {
        let tile = tile_3x4();
        let sub = tile.get(&local(&[1, 1], &[3, 3])).unwrap();
        assert_eq!(sub.extent().ul(), &[3, 1]);
        assert_eq!(sub.extent().lr(), &[5, 3]);
        assert_eq!(sub.extent().array_shape(), Some(&[10, 4][..]));
        assert_eq!(sub.buffer().to_vec::<i32>().unwrap(), vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_apply_replace_and_sum() {
        let mut tile = tile_3x4();
        let payload = Buffer::from_elements(&[2, 2], &[100i32, 100, 100, 100]).unwrap();

        tile.apply(&local(&[0, 0], &[2, 2]), &payload, Reducer::Replace)
            .unwrap();
        tile.apply(&local(&[1, 1], &[3, 3]), &payload, Reducer::Sum)
            .unwrap();

        assert_eq!(
            tile.buffer().to_vec::<i32>().unwrap(),
            vec![100, 100, 2, 3, 100, 200, 106, 7, 8, 109, 110, 11]
        );
    }

    #[test]
    fn test_apply_rejects_mismatches() {
        let mut tile = tile_3x4();
        let wrong_type = Buffer::zeros(&[2, 2], ElementType::Float32);
        assert!(tile
            .apply(&local(&[0, 0], &[2, 2]), &wrong_type, Reducer::Sum)
            .is_err());

        let wrong_size = Buffer::zeros(&[3], ElementType::Int32);
        assert!(tile
            .apply(&local(&[0, 0], &[2, 2]), &wrong_size, Reducer::Sum)
            .is_err());

        let payload = Buffer::zeros(&[2, 2], ElementType::Int32);
        assert!(tile
            .apply(&local(&[2, 3], &[4, 5]), &payload, Reducer::Sum)
            .is_err());
    }

    #[test]
    fn test_deserialize_checks_shape() {
        #[derive(Serialize)]
        struct Raw {
            extent: Extent,
            buffer: Buffer,
        }

        let bytes = bincode::serialize(&tile_3x4()).unwrap();
        let back: Tile = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, tile_3x4());

        let mismatched = Raw {
            extent: Extent::from_shape(&[2, 2]),
            buffer: Buffer::zeros(&[4], ElementType::Int32),
        };
        let bytes = bincode::serialize(&mismatched).unwrap();
        assert!(bincode::deserialize::<Tile>(&bytes).is_err());
    }

    #[test]
    fn test_get_rejects_region_past_tile() {
        let tile = tile_3x4();
        assert!(matches!(
            tile.get(&local(&[2, 0], &[4, 4])),
            Err(Error::ContractViolation(_))
        ));
        assert!(matches!(
            tile.get(&local(&[0, 0], &[4, 5])),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn test_tile_id_display_and_hint() {
        assert_eq!(TileId::new(2, 7).to_string(), "T(2:7)");
        assert!(TileId::for_worker(3).is_hint());
        assert!(!TileId::new(3, 0).is_hint());
    }
}
