//! Compact per-chunk storage of cell ids.
//!
//! A [`PalettedVolume`] stores the [`GlobalId`](crate::block::GlobalId) of every cell in a chunk,
//! starting with no storage at all, moving to a small linear palette of indices,
//! and finally storing raw ids once too many distinct values are present.
//! The packed bits live in a [`CompressedArray`] whose buffers are recycled through a [`BufferPool`].

mod compressed;
pub use compressed::*;

mod pool;
pub use pool::*;

mod volume;
pub use volume::*;

use crate::block::IdMap;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("value is not registered in the id map")]
	UnregisteredValue,
}

/// The shared collaborators every [`PalettedVolume`] is built from.
pub struct Context<V> {
	pub pool: Arc<BufferPool>,
	pub ids: Arc<dyn IdMap<V>>,
}

impl<V> Context<V> {
	pub fn new(pool: Arc<BufferPool>, ids: Arc<dyn IdMap<V>>) -> Self {
		Self { pool, ids }
	}
}

impl<V> Clone for Context<V> {
	fn clone(&self) -> Self {
		Self {
			pool: self.pool.clone(),
			ids: self.ids.clone(),
		}
	}
}
