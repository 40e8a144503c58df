use super::{level_for, max_value, BufferPool, CompressedArray, Context, Error};
use crate::{
	block::{GlobalId, IdMap, DEFAULT_ID},
	world::chunk::VOLUME,
};
use std::{ops::Range, sync::Arc};

/// The most distinct ids a linear palette can hold before the volume stores raw ids.
pub const LINEAR_CAPACITY: usize = 16;
/// The level cells are packed at while a linear palette is in use (4 bits per cell).
pub const LINEAR_LEVEL: usize = 3;

/// How the ids of a [`PalettedVolume`] are currently stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
	/// Every cell is [`DEFAULT_ID`] and no buffer is held.
	Empty,
	/// Cells are indices into a palette of at most [`LINEAR_CAPACITY`] ids.
	Linear,
	/// Cells are raw global ids.
	Direct,
}

/// The cell ids of a single chunk.
///
/// Volumes begin [`Empty`](Tier::Empty), move to a [`Linear`](Tier::Linear) palette on the first
/// non-default write, and to [`Direct`](Tier::Direct) storage once more than [`LINEAR_CAPACITY`]
/// distinct ids have been written. Writes never move a volume back down a tier,
/// only [`clear`](Self::clear) and [`copy_from_ids`](Self::copy_from_ids) can.
///
/// Dropping a volume returns its buffer and palette to the [`BufferPool`].
pub struct PalettedVolume<V> {
	ids: Arc<dyn IdMap<V>>,
	cells: CompressedArray,
	linear: Option<Vec<GlobalId>>,
}

impl<V> PalettedVolume<V> {
	pub fn new(context: &Context<V>) -> Self {
		Self {
			ids: context.ids.clone(),
			cells: CompressedArray::new(&context.pool),
			linear: None,
		}
	}

	pub fn ids(&self) -> &Arc<dyn IdMap<V>> {
		&self.ids
	}

	pub fn pool(&self) -> &Arc<BufferPool> {
		self.cells.pool()
	}

	pub fn tier(&self) -> Tier {
		match (&self.linear, self.cells.level()) {
			(Some(_), _) => Tier::Linear,
			(None, 0) => Tier::Empty,
			(None, _) => Tier::Direct,
		}
	}

	/// The bit-width level of the underlying [`CompressedArray`].
	pub fn level(&self) -> usize {
		self.cells.level()
	}

	/// The linear palette, if the volume is in the [`Linear`](Tier::Linear) tier.
	pub fn palette(&self) -> Option<&[GlobalId]> {
		self.linear.as_deref()
	}

	pub fn is_empty(&self) -> bool {
		self.tier() == Tier::Empty
	}

	pub fn get_id(&self, index: usize) -> GlobalId {
		let slot = self.cells.get(index);
		match &self.linear {
			Some(palette) => palette[slot as usize],
			None => slot,
		}
	}

	pub fn get(&self, index: usize) -> V {
		self.ids.value_for(self.get_id(index))
	}

	pub fn default_value(&self) -> V {
		self.ids.value_for(DEFAULT_ID)
	}

	pub fn set_id(&mut self, index: usize, id: GlobalId) {
		if let Some(slot) = self.prepare_slot(id) {
			self.cells.set(index, slot);
		}
	}

	pub fn set(&mut self, index: usize, value: &V) -> Result<(), Error> {
		let id = self.id_of(value)?;
		self.set_id(index, id);
		Ok(())
	}

	/// Writes `id` into every cell in `range`.
	pub fn fill_id(&mut self, range: Range<usize>, id: GlobalId) {
		if range.is_empty() {
			return;
		}
		if let Some(slot) = self.prepare_slot(id) {
			self.cells.fill(range, slot);
		}
	}

	pub fn fill(&mut self, range: Range<usize>, value: &V) -> Result<(), Error> {
		let id = self.id_of(value)?;
		self.fill_id(range, id);
		Ok(())
	}

	fn id_of(&self, value: &V) -> Result<GlobalId, Error> {
		self.ids.id_for(value).ok_or(Error::UnregisteredValue)
	}

	/// Promotes storage as needed so `id` can be written,
	/// returning the slot value which represents it.
	/// Returns None if there is nothing to write (the default id into an empty volume).
	fn prepare_slot(&mut self, id: GlobalId) -> Option<u32> {
		if let Some(palette) = self.linear.as_mut() {
			if let Some(index) = palette.iter().position(|entry| *entry == id) {
				return Some(index as u32);
			}
			if palette.len() < LINEAR_CAPACITY {
				palette.push(id);
				return Some((palette.len() - 1) as u32);
			}
			self.make_direct(id);
			return Some(id);
		}

		if self.cells.level() == 0 {
			if id == DEFAULT_ID {
				return None;
			}
			let palette = self.make_linear();
			palette.push(id);
			return Some(1);
		}

		if id > max_value(self.cells.level()) {
			self.cells.expand_to_level(level_for(id));
		}
		Some(id)
	}

	fn make_linear(&mut self) -> &mut Vec<GlobalId> {
		self.discard_palette();
		self.cells.reset_to_level(LINEAR_LEVEL);
		let mut palette = self.cells.pool().get_palette();
		palette.push(DEFAULT_ID);
		self.linear.insert(palette)
	}

	/// Rewrites every cell as its raw id, sized for the current id-space (and `id`).
	#[profiling::function]
	fn make_direct(&mut self, id: GlobalId) {
		let palette = match self.linear.take() {
			Some(palette) => palette,
			None => return,
		};
		let id_space = self.ids.count().saturating_sub(1) as GlobalId;
		let level = level_for(id_space.max(id)).max(LINEAR_LEVEL + 1);
		self.cells.expand_to_level(level);
		for index in 0..VOLUME {
			let slot = self.cells.get(index);
			self.cells.set(index, palette[slot as usize]);
		}
		self.cells.pool().release_palette(palette);
	}

	fn discard_palette(&mut self) {
		if let Some(palette) = self.linear.take() {
			self.cells.pool().release_palette(palette);
		}
	}

	/// Replaces every cell with `ids`, choosing the smallest tier which can hold them.
	#[profiling::function]
	pub fn copy_from_ids(&mut self, ids: &[GlobalId]) {
		assert_eq!(ids.len(), VOLUME);
		self.clear();

		let mut distinct = self.cells.pool().get_palette();
		distinct.push(DEFAULT_ID);
		let mut highest = DEFAULT_ID;
		for &id in ids.iter() {
			highest = highest.max(id);
			if distinct.len() <= LINEAR_CAPACITY && !distinct.contains(&id) {
				distinct.push(id);
			}
		}

		if highest == DEFAULT_ID {
			self.cells.pool().release_palette(distinct);
		} else if distinct.len() <= LINEAR_CAPACITY {
			self.cells.reset_to_level(LINEAR_LEVEL);
			for (index, id) in ids.iter().enumerate() {
				if let Some(slot) = distinct.iter().position(|entry| entry == id) {
					self.cells.set(index, slot as u32);
				}
			}
			self.linear = Some(distinct);
		} else {
			self.cells.pool().release_palette(distinct);
			self.cells.reset_to_level(level_for(highest));
			self.cells.copy_from(ids);
		}
	}

	/// Writes the id of every cell into `ids`, which must hold [`VOLUME`] entries.
	pub fn copy_to_ids(&self, ids: &mut [GlobalId]) {
		self.cells.copy_to(ids);
		if let Some(palette) = &self.linear {
			for id in ids.iter_mut() {
				*id = palette[*id as usize];
			}
		}
	}

	/// Resets every cell to the default id, returning all storage to the pool.
	pub fn clear(&mut self) {
		self.discard_palette();
		self.cells.release();
	}

	/// The sorted set of ids present in the volume.
	pub fn distinct_ids(&self) -> Vec<GlobalId> {
		match &self.linear {
			Some(palette) => {
				let mut used = [false; LINEAR_CAPACITY];
				for index in 0..VOLUME {
					used[self.cells.get(index) as usize] = true;
				}
				let mut ids = palette
					.iter()
					.zip(used.iter())
					.filter_map(|(id, used)| used.then(|| *id))
					.collect::<Vec<_>>();
				ids.sort_unstable();
				ids
			}
			None if self.cells.level() == 0 => vec![DEFAULT_ID],
			None => {
				let mut ids = vec![DEFAULT_ID; VOLUME];
				self.cells.copy_to(&mut ids);
				ids.sort_unstable();
				ids.dedup();
				ids
			}
		}
	}
}

impl<V> Clone for PalettedVolume<V> {
	fn clone(&self) -> Self {
		let linear = self.linear.as_ref().map(|palette| {
			let mut copy = self.cells.pool().get_palette();
			copy.extend_from_slice(palette);
			copy
		});
		Self {
			ids: self.ids.clone(),
			cells: self.cells.clone(),
			linear,
		}
	}
}

impl<V> Drop for PalettedVolume<V> {
	fn drop(&mut self) {
		self.discard_palette();
	}
}

impl<V> std::fmt::Debug for PalettedVolume<V> {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"PalettedVolume(tier={:?}, level={}, palette={:?})",
			self.tier(),
			self.level(),
			self.linear
		)
	}
}
