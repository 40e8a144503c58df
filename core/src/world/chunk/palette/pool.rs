use super::{compressed::words_for, Words, MAX_LEVEL};
use crate::{block::GlobalId, world::PoolSettings};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The number of entries a linear palette list is allocated with.
const PALETTE_LIST_CAPACITY: usize = 16;

struct FreeList<T> {
	items: Vec<T>,
	capacity: usize,
}

impl<T> FreeList<T> {
	fn new(capacity: usize) -> Self {
		Self {
			items: Vec::with_capacity(capacity),
			capacity,
		}
	}

	fn pop(&mut self) -> Option<T> {
		self.items.pop()
	}

	/// Keeps `item` for reuse if there is room, otherwise drops it.
	fn push(&mut self, item: T) {
		if self.items.len() < self.capacity {
			self.items.push(item);
		}
	}

	fn resize(&mut self, capacity: usize) {
		self.capacity = capacity;
		self.items.truncate(capacity);
	}
}

/// Recycles the word buffers behind [`CompressedArray`](super::CompressedArray)s
/// and the lists behind linear palettes.
///
/// Each level (1 through [`MAX_LEVEL`]) has its own free-list with an independent capacity.
/// Getting from an empty free-list allocates a fresh buffer (it never blocks or fails),
/// and releasing into a full free-list drops the buffer.
///
/// Shared by the control thread and every provider worker.
pub struct BufferPool {
	levels: [Mutex<FreeList<Words>>; MAX_LEVEL],
	palettes: Mutex<FreeList<Vec<GlobalId>>>,
	allocated: AtomicUsize,
}

impl BufferPool {
	pub fn new(settings: &PoolSettings) -> Self {
		Self {
			levels: std::array::from_fn(|_| Mutex::new(FreeList::new(settings.buffers_per_level))),
			palettes: Mutex::new(FreeList::new(settings.palettes)),
			allocated: AtomicUsize::new(0),
		}
	}

	fn free_list(&self, level: usize) -> &Mutex<FreeList<Words>> {
		assert!(
			level >= 1 && level <= MAX_LEVEL,
			"no buffers exist for level {}",
			level
		);
		&self.levels[level - 1]
	}

	/// Returns a zeroed buffer sized for `level`.
	pub fn get(&self, level: usize) -> Words {
		let recycled = self.free_list(level).lock().pop();
		match recycled {
			Some(mut words) => {
				words.fill(0);
				words
			}
			None => {
				self.allocated.fetch_add(1, Ordering::Relaxed);
				vec![0; words_for(level)].into_boxed_slice()
			}
		}
	}

	/// Hands a buffer obtained from [`get`](Self::get) with the same `level` back to the pool.
	pub fn release(&self, level: usize, words: Words) {
		debug_assert_eq!(words.len(), words_for(level));
		self.free_list(level).lock().push(words);
	}

	/// Changes how many idle buffers are kept for `level`, dropping any excess.
	pub fn resize(&self, level: usize, capacity: usize) {
		self.free_list(level).lock().resize(capacity);
	}

	/// Returns an empty list for a linear palette.
	pub fn get_palette(&self) -> Vec<GlobalId> {
		let recycled = self.palettes.lock().pop();
		recycled.unwrap_or_else(|| Vec::with_capacity(PALETTE_LIST_CAPACITY))
	}

	pub fn release_palette(&self, mut palette: Vec<GlobalId>) {
		palette.clear();
		self.palettes.lock().push(palette);
	}

	pub fn resize_palettes(&self, capacity: usize) {
		self.palettes.lock().resize(capacity);
	}

	/// The number of idle buffers kept for `level`.
	pub fn available(&self, level: usize) -> usize {
		self.free_list(level).lock().items.len()
	}

	pub fn available_palettes(&self) -> usize {
		self.palettes.lock().items.len()
	}

	/// The number of word buffers which have been freshly allocated over the pool's lifetime.
	pub fn allocated(&self) -> usize {
		self.allocated.load(Ordering::Relaxed)
	}
}

impl Default for BufferPool {
	fn default() -> Self {
		Self::new(&PoolSettings::default())
	}
}

impl std::fmt::Debug for BufferPool {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let available = (1..=MAX_LEVEL)
			.map(|level| self.available(level))
			.collect::<Vec<_>>();
		write!(
			f,
			"BufferPool(available={:?}, palettes={}, allocated={})",
			available,
			self.available_palettes(),
			self.allocated()
		)
	}
}
