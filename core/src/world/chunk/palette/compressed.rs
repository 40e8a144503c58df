use super::BufferPool;
use crate::world::chunk::VOLUME;
use std::{ops::Range, sync::Arc};

/// The unit of storage backing a [`CompressedArray`].
pub type Word = u64;
/// A pooled buffer of packed slots.
pub type Words = Box<[Word]>;

/// The highest level a [`CompressedArray`] can be expanded to.
pub const MAX_LEVEL: usize = 6;

const WORD_BITS: usize = Word::BITS as usize;
const LEVEL_BITS: [usize; MAX_LEVEL + 1] = [0, 1, 2, 4, 8, 16, 32];
const LEVEL_MAX_VALUES: [u32; MAX_LEVEL + 1] = [0, 1, 3, 15, 255, 65535, i32::MAX as u32 - 1];

type Getter = fn(&[Word], usize) -> u32;
type Setter = fn(&mut [Word], usize, u32);

const GETTERS: [Getter; MAX_LEVEL + 1] = [
	get_zero,
	get_packed::<1>,
	get_packed::<2>,
	get_packed::<4>,
	get_packed::<8>,
	get_packed::<16>,
	get_packed::<32>,
];
const SETTERS: [Setter; MAX_LEVEL + 1] = [
	set_zero,
	set_packed::<1>,
	set_packed::<2>,
	set_packed::<4>,
	set_packed::<8>,
	set_packed::<16>,
	set_packed::<32>,
];

/// The number of bits each slot occupies at `level`.
pub const fn bits_for(level: usize) -> usize {
	LEVEL_BITS[level]
}

/// The largest value (inclusive) a slot can hold at `level`.
pub const fn max_value(level: usize) -> u32 {
	LEVEL_MAX_VALUES[level]
}

/// The number of words a buffer at `level` is made of.
pub const fn words_for(level: usize) -> usize {
	VOLUME * bits_for(level) / WORD_BITS
}

/// The smallest non-zero level which can store `value`.
pub fn level_for(value: u32) -> usize {
	(1..=MAX_LEVEL)
		.find(|&level| value <= max_value(level))
		.unwrap_or(MAX_LEVEL)
}

fn get_zero(_words: &[Word], _index: usize) -> u32 {
	0
}

fn set_zero(_words: &mut [Word], _index: usize, value: u32) {
	debug_assert_eq!(value, 0, "level 0 can only hold zero");
}

const fn mask<const BITS: usize>() -> Word {
	((1u128 << BITS) - 1) as Word
}

fn get_packed<const BITS: usize>(words: &[Word], index: usize) -> u32 {
	let per_word = WORD_BITS / BITS;
	let shift = (index % per_word) * BITS;
	((words[index / per_word] >> shift) & mask::<BITS>()) as u32
}

fn set_packed<const BITS: usize>(words: &mut [Word], index: usize, value: u32) {
	let per_word = WORD_BITS / BITS;
	let shift = (index % per_word) * BITS;
	let word = &mut words[index / per_word];
	*word = (*word & !(mask::<BITS>() << shift)) | ((value as Word & mask::<BITS>()) << shift);
}

/// A fixed array of [`VOLUME`] small unsigned integers packed at one of 7 bit-width levels.
///
/// Level 0 means every slot is zero and no buffer is held.
/// Buffers come from, and are returned to, the shared [`BufferPool`];
/// dropping the array releases its buffer.
///
/// Values written must not exceed [`max_value`] of the current level,
/// otherwise neighboring slots in the same word are corrupted.
pub struct CompressedArray {
	pool: Arc<BufferPool>,
	level: usize,
	words: Option<Words>,
}

impl CompressedArray {
	pub fn new(pool: &Arc<BufferPool>) -> Self {
		Self {
			pool: pool.clone(),
			level: 0,
			words: None,
		}
	}

	pub fn pool(&self) -> &Arc<BufferPool> {
		&self.pool
	}

	pub fn level(&self) -> usize {
		self.level
	}

	/// The raw packed words at the current level (empty at level 0).
	pub fn words(&self) -> &[Word] {
		self.words.as_deref().unwrap_or(&[])
	}

	pub fn get(&self, index: usize) -> u32 {
		GETTERS[self.level](self.words(), index)
	}

	pub fn set(&mut self, index: usize, value: u32) {
		debug_assert!(
			value <= max_value(self.level),
			"value {} exceeds level {}",
			value,
			self.level
		);
		match self.words.as_deref_mut() {
			Some(words) => SETTERS[self.level](words, index, value),
			None => set_zero(&mut [], index, value),
		}
	}

	/// Writes `value` into every slot in `range`.
	pub fn fill(&mut self, range: Range<usize>, value: u32) {
		debug_assert!(value <= max_value(self.level));
		if let Some(words) = self.words.as_deref_mut() {
			let set = SETTERS[self.level];
			for index in range {
				set(words, index, value);
			}
		}
	}

	/// Re-encodes every slot at the (strictly higher) `level`,
	/// returning the previous buffer to the pool.
	#[profiling::function]
	pub fn expand_to_level(&mut self, level: usize) {
		assert!(
			level > self.level && level <= MAX_LEVEL,
			"cannot expand from level {} to {}",
			self.level,
			level
		);
		let mut words = self.pool.get(level);
		if self.level > 0 {
			let get = GETTERS[self.level];
			let set = SETTERS[level];
			let old = self.words();
			for index in 0..VOLUME {
				set(&mut words[..], index, get(old, index));
			}
		}
		if let Some(old) = self.words.replace(words) {
			self.pool.release(self.level, old);
		}
		self.level = level;
	}

	/// Discards all values and holds a zeroed buffer at `level` (no buffer at level 0).
	pub fn reset_to_level(&mut self, level: usize) {
		assert!(level <= MAX_LEVEL);
		self.release();
		if level > 0 {
			self.words = Some(self.pool.get(level));
			self.level = level;
		}
	}

	/// Replaces the contents with raw packed `words` at `level`,
	/// as previously read through [`words`](Self::words).
	pub fn copy_words_from(&mut self, level: usize, words: &[Word]) {
		assert_eq!(words.len(), words_for(level));
		self.reset_to_level(level);
		if let Some(own) = self.words.as_deref_mut() {
			own.copy_from_slice(words);
		}
	}

	/// Copies every slot into `values`, which must hold [`VOLUME`] entries.
	/// Slots are unpacked one at a time; use [`words`](Self::words) for the packed form.
	pub fn copy_to(&self, values: &mut [u32]) {
		assert_eq!(values.len(), VOLUME);
		let get = GETTERS[self.level];
		let words = self.words();
		for (index, value) in values.iter_mut().enumerate() {
			*value = get(words, index);
		}
	}

	/// Overwrites every slot from `values` at the current level, packing one slot at a time.
	/// Use [`copy_words_from`](Self::copy_words_from) to transfer packed words directly.
	pub fn copy_from(&mut self, values: &[u32]) {
		assert_eq!(values.len(), VOLUME);
		for (index, value) in values.iter().enumerate() {
			self.set(index, *value);
		}
	}

	/// Returns the buffer to the pool and resets to level 0.
	pub fn release(&mut self) {
		if let Some(words) = self.words.take() {
			self.pool.release(self.level, words);
		}
		self.level = 0;
	}
}

impl Clone for CompressedArray {
	fn clone(&self) -> Self {
		let mut copy = Self::new(&self.pool);
		copy.copy_words_from(self.level, self.words());
		copy
	}
}

impl Drop for CompressedArray {
	fn drop(&mut self) {
		self.release();
	}
}

impl std::fmt::Debug for CompressedArray {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"CompressedArray(level={}, bits={}, words={})",
			self.level,
			bits_for(self.level),
			self.words().len()
		)
	}
}

#[cfg(test)]
mod compressed_array {
	use super::*;
	use crate::world::PoolSettings;

	fn pool() -> Arc<BufferPool> {
		Arc::new(BufferPool::new(&PoolSettings::default()))
	}

	#[test]
	fn level_table() {
		assert_eq!(words_for(1), 64);
		assert_eq!(words_for(3), 256);
		assert_eq!(words_for(6), 2048);
		assert_eq!(level_for(0), 1);
		assert_eq!(level_for(1), 1);
		assert_eq!(level_for(2), 2);
		assert_eq!(level_for(15), 3);
		assert_eq!(level_for(16), 4);
		assert_eq!(level_for(65535), 5);
		assert_eq!(level_for(65536), 6);
	}

	#[test]
	fn empty_holds_no_buffer() {
		let array = CompressedArray::new(&pool());
		assert_eq!(array.level(), 0);
		assert!(array.words().is_empty());
		assert_eq!(array.get(4095), 0);
	}

	#[test]
	fn set_get_every_level() {
		let pool = pool();
		for level in 1..=MAX_LEVEL {
			let mut array = CompressedArray::new(&pool);
			array.expand_to_level(level);
			let max = max_value(level);
			for index in 0..VOLUME {
				array.set(index, (index as u32 * 7919) % (max.min(100_000) + 1));
			}
			for index in 0..VOLUME {
				assert_eq!(array.get(index), (index as u32 * 7919) % (max.min(100_000) + 1));
			}
		}
	}

	#[test]
	fn neighbors_are_untouched() {
		let mut array = CompressedArray::new(&pool());
		array.expand_to_level(2);
		array.set(10, 3);
		array.set(11, 1);
		array.set(10, 2);
		assert_eq!(array.get(9), 0);
		assert_eq!(array.get(10), 2);
		assert_eq!(array.get(11), 1);
	}

	#[test]
	fn expand_preserves_values() {
		let pool = pool();
		let mut array = CompressedArray::new(&pool);
		array.expand_to_level(1);
		for index in (0..VOLUME).step_by(3) {
			array.set(index, 1);
		}
		for level in 2..=MAX_LEVEL {
			array.expand_to_level(level);
			assert_eq!(array.level(), level);
			for index in 0..VOLUME {
				let expected = if index % 3 == 0 { 1 } else { 0 };
				assert_eq!(array.get(index), expected);
			}
		}
		array.set(0, max_value(MAX_LEVEL));
		assert_eq!(array.get(0), max_value(MAX_LEVEL));
		assert_eq!(array.get(1), 0);
		// every intermediate buffer went back to the pool
		for level in 1..MAX_LEVEL {
			assert_eq!(pool.available(level), 1);
		}
	}

	#[test]
	#[should_panic]
	fn expand_must_grow() {
		let mut array = CompressedArray::new(&pool());
		array.expand_to_level(3);
		array.expand_to_level(2);
	}

	#[test]
	fn fill_range() {
		let mut array = CompressedArray::new(&pool());
		array.expand_to_level(4);
		array.fill(256..512, 200);
		assert_eq!(array.get(255), 0);
		assert_eq!(array.get(256), 200);
		assert_eq!(array.get(511), 200);
		assert_eq!(array.get(512), 0);
	}

	#[test]
	fn copy_to_from() {
		let pool = pool();
		let mut array = CompressedArray::new(&pool);
		array.expand_to_level(3);
		let values = (0..VOLUME).map(|i| (i % 16) as u32).collect::<Vec<_>>();
		array.copy_from(&values);
		let mut out = vec![0; VOLUME];
		array.copy_to(&mut out);
		assert_eq!(out, values);
	}

	#[test]
	fn raw_words_transfer() {
		let pool = pool();
		let mut source = CompressedArray::new(&pool);
		source.expand_to_level(4);
		source.set(0, 255);
		source.set(4095, 17);

		let mut target = CompressedArray::new(&pool);
		target.expand_to_level(2);
		target.set(1, 3);
		target.copy_words_from(source.level(), source.words());
		assert_eq!(target.level(), 4);
		assert_eq!(target.words(), source.words());
		assert_eq!(target.get(0), 255);
		assert_eq!(target.get(1), 0);
		assert_eq!(target.get(4095), 17);
		// the level 2 buffer went back to the pool
		assert_eq!(pool.available(2), 1);

		target.copy_words_from(0, &[]);
		assert_eq!(target.level(), 0);
		assert_eq!(pool.available(4), 1);
	}

	#[test]
	fn clone_is_independent() {
		let pool = pool();
		let mut array = CompressedArray::new(&pool);
		array.expand_to_level(3);
		array.set(5, 9);
		let mut copy = array.clone();
		copy.set(5, 1);
		assert_eq!(array.get(5), 9);
		assert_eq!(copy.get(5), 1);
		assert_eq!(copy.level(), 3);
	}

	#[test]
	fn release_returns_buffer() {
		let pool = pool();
		let mut array = CompressedArray::new(&pool);
		array.expand_to_level(5);
		array.release();
		assert_eq!(array.level(), 0);
		assert_eq!(pool.available(5), 1);
		drop(array);
		assert_eq!(pool.available(5), 1);

		let mut array = CompressedArray::new(&pool);
		array.reset_to_level(5);
		// recycled buffers come back zeroed
		assert_eq!(array.get(0), 0);
		assert_eq!(pool.available(5), 0);
		drop(array);
		assert_eq!(pool.available(5), 1);
	}
}
