//! Contains all world chunk structures around registering chunk anchors, data contained in a chunk, and how chunks are loaded.

use nalgebra::Point3;

/// The number of cells along each axis of a chunk.
pub const SIZE: usize = 16;
/// The number of cells in a chunk.
pub const VOLUME: usize = SIZE * SIZE * SIZE;

/// Converts a cell offset within a chunk to its index in a [`PalettedVolume`](palette::PalettedVolume).
/// Cells are ordered x-first, then z, then y, so each y-layer is a contiguous range.
pub fn index_of(offset: Point3<usize>) -> usize {
	debug_assert!(offset.x < SIZE && offset.y < SIZE && offset.z < SIZE);
	offset.x + offset.z * SIZE + offset.y * SIZE * SIZE
}

/// The inverse of [`index_of`].
pub fn offset_of(index: usize) -> Point3<usize> {
	Point3::new(index % SIZE, index / (SIZE * SIZE), (index / SIZE) % SIZE)
}

pub mod palette;

mod anchor;
pub use anchor::*;

mod cache;
pub use cache::*;

mod chunk;
pub use chunk::*;

mod level;
pub use level::*;

/// Structures & Functions used to populate chunks on worker threads.
pub mod thread;
