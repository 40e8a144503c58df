use crate::world::chunk::{palette::PalettedVolume, Level};
use nalgebra::Point3;

/// A 16x16x16 chunk in the world.
pub struct Chunk<V> {
	coordinate: Point3<i64>,
	volume: PalettedVolume<V>,
	/// The level of the most demanding anchor which references this chunk.
	/// Not saved to storage.
	level: Level,
	/// True if the chunk came from a generator instead of storage.
	freshly_generated: bool,
	/// True if the chunk has been changed since it was last saved.
	dirty: bool,
}

impl<V> Chunk<V> {
	pub(crate) fn generated(coordinate: Point3<i64>, volume: PalettedVolume<V>) -> Self {
		Self {
			coordinate,
			volume,
			level: Level::Passive,
			freshly_generated: true,
			dirty: true,
		}
	}

	pub(crate) fn loaded(coordinate: Point3<i64>, volume: PalettedVolume<V>) -> Self {
		Self {
			coordinate,
			volume,
			level: Level::Passive,
			freshly_generated: false,
			dirty: false,
		}
	}

	pub fn coordinate(&self) -> &Point3<i64> {
		&self.coordinate
	}

	pub fn volume(&self) -> &PalettedVolume<V> {
		&self.volume
	}

	/// Mutable access to the cells, marking the chunk as needing to be saved.
	pub fn volume_mut(&mut self) -> &mut PalettedVolume<V> {
		self.dirty = true;
		&mut self.volume
	}

	pub fn level(&self) -> Level {
		self.level
	}

	pub(crate) fn set_level(&mut self, level: Level) {
		self.level = level;
	}

	pub fn is_freshly_generated(&self) -> bool {
		self.freshly_generated
	}

	pub fn is_dirty(&self) -> bool {
		self.dirty
	}

	pub(crate) fn mark_saved(&mut self) {
		self.dirty = false;
	}
}

impl<V> std::fmt::Display for Chunk<V> {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"Chunk(<{}, {}, {}> = {})",
			self.coordinate[0], self.coordinate[1], self.coordinate[2], self.level
		)
	}
}

impl<V> std::fmt::Debug for Chunk<V> {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("Chunk")
			.field("coordinate", &self.coordinate)
			.field("level", &self.level)
			.field("volume", &self.volume)
			.field("freshly_generated", &self.freshly_generated)
			.field("dirty", &self.dirty)
			.finish()
	}
}
