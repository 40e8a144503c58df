use crate::world::{
	chunk::{
		palette::Context,
		thread::{self, Completed, Provider},
		Anchor, AnchorId, Area, Chunk, Level,
	},
	database::Storage,
	generator::Generator,
	Settings,
};
use nalgebra::Point3;
use std::{
	collections::{BTreeMap, HashMap, HashSet, VecDeque},
	sync::{Arc, Weak},
	time::{Duration, Instant},
};

/// The log category for the chunk map.
static LOG: &'static str = "chunk-cache";

/// How many anchors demand a chunk, split by the level they demand it at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Counts {
	pub active: usize,
	pub load: usize,
}

impl Counts {
	fn increment(&mut self, level: Level) {
		match level {
			Level::Active => self.active += 1,
			Level::Passive => self.load += 1,
		}
	}

	fn decrement(&mut self, level: Level) {
		let count = match level {
			Level::Active => &mut self.active,
			Level::Passive => &mut self.load,
		};
		debug_assert!(*count > 0, "released a {} chunk which was never referenced", level);
		*count = count.saturating_sub(1);
	}

	pub fn is_alive(&self) -> bool {
		self.active + self.load > 0
	}

	pub fn is_active(&self) -> bool {
		self.active > 0
	}

	/// The most demanding level any anchor references the chunk at.
	pub fn level(&self) -> Option<Level> {
		if self.active > 0 {
			Some(Level::Active)
		} else if self.load > 0 {
			Some(Level::Passive)
		} else {
			None
		}
	}
}

/// Where a tracked chunk is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkState {
	/// Waiting for the provider to load or generate the chunk.
	Requested,
	/// The chunk is resident and can be read.
	Populated,
	/// The provider could not produce the chunk. See [`ChunkMap::retry_failed`].
	Failed,
}

enum Entry<V> {
	Requested(Counts),
	Populated(Counts, Chunk<V>),
	Failed(Counts, Arc<thread::Error>),
}

impl<V> Entry<V> {
	fn counts(&self) -> Counts {
		match self {
			Self::Requested(counts) | Self::Populated(counts, _) | Self::Failed(counts, _) => *counts,
		}
	}

	fn state(&self) -> ChunkState {
		match self {
			Self::Requested(_) => ChunkState::Requested,
			Self::Populated(_, _) => ChunkState::Populated,
			Self::Failed(_, _) => ChunkState::Failed,
		}
	}

	/// Creates the replacement entry in the same state with different counts.
	fn with_counts(self, counts: Counts) -> Self {
		match self {
			Self::Requested(_) => Self::Requested(counts),
			Self::Populated(_, mut chunk) => {
				if let Some(level) = counts.level() {
					chunk.set_level(level);
				}
				Self::Populated(counts, chunk)
			}
			Self::Failed(_, error) => Self::Failed(counts, error),
		}
	}
}

/// A registered anchor and the area it demanded as of the last update.
struct Binding {
	anchor: Weak<Anchor>,
	area: Area,
}

/// The set of chunks which are resident in memory, driven by the [`Anchor`]s registered with it.
///
/// Every chunk in the area of an anchor is tracked, starting as [`Requested`](ChunkState::Requested)
/// until the [`Provider`] hands back its contents. Chunks which no anchor references are unloaded
/// (saved to storage if they changed) during [`update`](Self::update),
/// once they have gone unreferenced for the configured unload delay.
///
/// Owned by a single thread; only the provider's workers run elsewhere.
pub struct ChunkMap<V> {
	provider: Provider<V>,
	entries: HashMap<Point3<i64>, Entry<V>>,

	anchors: BTreeMap<AnchorId, Binding>,
	next_anchor_id: u64,
	/// Anchors which have been removed, but whose chunks are not released until the next update.
	pending_removals: Vec<AnchorId>,

	/// Coordinates waiting for room in `in_flight` before being sent to the provider.
	pending_requests: VecDeque<Point3<i64>>,
	/// Coordinates which have been sent to the provider and have not come back.
	in_flight: HashSet<Point3<i64>>,
	max_in_flight: usize,

	/// The amount of time a chunk can go unreferenced before being unloaded.
	unload_delay: Duration,
	/// Chunks which no anchor references, paired with the time they became unreferenced.
	unreferenced: HashMap<Point3<i64>, Instant>,

	/// Marked as true if/when every provider worker has ended.
	disconnected_from_results: bool,
}

impl<V> ChunkMap<V>
where
	V: 'static,
{
	pub fn new(
		settings: &Settings,
		context: Context<V>,
		storage: Arc<dyn Storage<V>>,
		generator: Arc<dyn Generator<V>>,
	) -> Result<Self, thread::Error> {
		let provider = Provider::new(settings, context, storage, generator)?;
		Ok(Self::with_provider(settings, provider))
	}
}

impl<V> ChunkMap<V> {
	pub fn with_provider(settings: &Settings, provider: Provider<V>) -> Self {
		Self {
			provider,
			entries: HashMap::new(),
			anchors: BTreeMap::new(),
			next_anchor_id: 0,
			pending_removals: Vec::new(),
			pending_requests: VecDeque::new(),
			in_flight: HashSet::new(),
			max_in_flight: settings.max_in_flight.max(1),
			unload_delay: settings.unload_delay(),
			unreferenced: HashMap::new(),
			disconnected_from_results: false,
		}
	}

	pub fn provider(&self) -> &Provider<V> {
		&self.provider
	}

	pub fn context(&self) -> &Context<V> {
		self.provider.context()
	}

	/// Registers `anchor`, immediately tracking (and requesting) every chunk in its current area.
	///
	/// The map only holds a weak reference; dropping the anchor has the same effect as
	/// [`removing`](Self::remove_anchor) it.
	pub fn add_anchor(&mut self, anchor: &Arc<Anchor>) -> AnchorId {
		let id = AnchorId(self.next_anchor_id);
		self.next_anchor_id += 1;

		let area = anchor.current();
		log::debug!(target: LOG, "Adding {} at {}", id, area);
		for (coordinate, level) in area.coordinate_levels() {
			self.reference(coordinate, level);
		}
		self.anchors.insert(
			id,
			Binding {
				anchor: Arc::downgrade(anchor),
				area,
			},
		);

		self.dispatch_requests();
		id
	}

	/// Marks an anchor for removal. Its chunks are released on the next [`update`](Self::update).
	/// Returns false if the anchor was never registered or was already removed.
	pub fn remove_anchor(&mut self, id: AnchorId) -> bool {
		if !self.anchors.contains_key(&id) || self.pending_removals.contains(&id) {
			return false;
		}
		self.pending_removals.push(id);
		true
	}

	/// Follows the movement of every anchor, receives chunks from the provider,
	/// and unloads any chunks which have not been referenced for long enough.
	///
	/// Never blocks on the provider.
	#[profiling::function]
	pub fn update(&mut self) {
		self.update_anchors();
		self.process_removals();
		self.receive_results();
		self.dispatch_requests();
		self.unload_expired_chunks();
	}

	/// Blocks until every requested chunk has come back from the provider.
	#[profiling::function]
	pub fn flush(&mut self) -> Result<(), thread::Error> {
		self.dispatch_requests();
		while !self.in_flight.is_empty() {
			let completed = self.provider.recv()?;
			self.receive(completed);
			self.dispatch_requests();
		}
		Ok(())
	}

	#[profiling::function]
	fn update_anchors(&mut self) {
		let mut moved = Vec::new();
		for (id, binding) in self.anchors.iter() {
			match binding.anchor.upgrade() {
				// if there are no strong references, the anchor has been dropped
				None => {
					if !self.pending_removals.contains(id) {
						log::debug!(target: LOG, "{} was dropped", id);
						self.pending_removals.push(*id);
					}
				}
				// anchors pending removal are released at the area they were last applied at
				Some(_) if self.pending_removals.contains(id) => {}
				Some(anchor) => {
					let current = anchor.current();
					if current != binding.area {
						moved.push((*id, binding.area, current));
					}
				}
			}
		}

		for (id, previous, current) in moved {
			self.move_area(&previous, &current);
			if let Some(binding) = self.anchors.get_mut(&id) {
				binding.area = current;
			}
		}
	}

	/// Applies the difference between two areas of the same anchor.
	/// All new demand is added before any stale demand is released.
	fn move_area(&mut self, previous: &Area, current: &Area) {
		for (coordinate, level) in current.coordinate_levels() {
			let previous_level = previous.level_of(&coordinate);
			if previous_level == Some(level) {
				continue;
			}
			self.reference(coordinate, level);
			if let Some(previous_level) = previous_level {
				self.release(coordinate, previous_level);
			}
		}
		for (coordinate, level) in previous.coordinate_levels() {
			if current.level_of(&coordinate).is_none() {
				self.release(coordinate, level);
			}
		}
	}

	#[profiling::function]
	fn process_removals(&mut self) {
		let removals = self.pending_removals.drain(..).collect::<Vec<_>>();
		for id in removals {
			if let Some(binding) = self.anchors.remove(&id) {
				log::debug!(target: LOG, "Removing {} at {}", id, binding.area);
				for (coordinate, level) in binding.area.coordinate_levels() {
					self.release(coordinate, level);
				}
			}
		}
	}

	fn reference(&mut self, coordinate: Point3<i64>, level: Level) {
		self.unreferenced.remove(&coordinate);
		match self.entries.remove(&coordinate) {
			Some(entry) => {
				let mut counts = entry.counts();
				let revived = !counts.is_alive();
				counts.increment(level);
				let entry = entry.with_counts(counts);
				// requests are skipped while unreferenced, so revived requests need to be queued again
				if revived && entry.state() == ChunkState::Requested {
					self.queue_request(coordinate);
				}
				self.entries.insert(coordinate, entry);
			}
			None => {
				let mut counts = Counts::default();
				counts.increment(level);
				self.entries.insert(coordinate, Entry::Requested(counts));
				self.queue_request(coordinate);
			}
		}
	}

	fn release(&mut self, coordinate: Point3<i64>, level: Level) {
		if let Some(entry) = self.entries.remove(&coordinate) {
			let mut counts = entry.counts();
			counts.decrement(level);
			if !counts.is_alive() {
				self.unreferenced.entry(coordinate).or_insert_with(Instant::now);
			}
			self.entries.insert(coordinate, entry.with_counts(counts));
		}
	}

	fn queue_request(&mut self, coordinate: Point3<i64>) {
		if !self.in_flight.contains(&coordinate) {
			self.pending_requests.push_back(coordinate);
		}
	}

	/// Sends queued requests to the provider until the in-flight limit is reached.
	fn dispatch_requests(&mut self) {
		while self.in_flight.len() < self.max_in_flight {
			let coordinate = match self.pending_requests.pop_front() {
				Some(coordinate) => coordinate,
				None => break,
			};
			let still_wanted = match self.entries.get(&coordinate) {
				Some(Entry::Requested(counts)) => counts.is_alive(),
				_ => false,
			};
			if !still_wanted || self.in_flight.contains(&coordinate) {
				continue;
			}
			match self.provider.request(coordinate) {
				Ok(()) => {
					self.in_flight.insert(coordinate);
				}
				Err(error) => {
					log::warn!(
						target: LOG,
						"Failed to request chunk <{}, {}, {}>: {}",
						coordinate.x,
						coordinate.y,
						coordinate.z,
						error
					);
					if let Some(entry) = self.entries.remove(&coordinate) {
						self.entries
							.insert(coordinate, Entry::Failed(entry.counts(), Arc::new(error)));
					}
				}
			}
		}
	}

	#[profiling::function]
	fn receive_results(&mut self) {
		let mut has_emptied_results = false;
		while !self.disconnected_from_results && !has_emptied_results {
			match self.provider.try_recv() {
				Ok(Some(completed)) => self.receive(completed),
				Ok(None) => has_emptied_results = true,
				Err(_) => {
					log::debug!(target: LOG, "Disconnected from chunk provider results");
					self.disconnected_from_results = true;
				}
			}
		}
	}

	/// Stores the outcome of a request, if the chunk is still waiting for it.
	pub(crate) fn receive(&mut self, completed: Completed<V>) {
		let Completed {
			coordinate,
			outcome,
		} = completed;
		self.in_flight.remove(&coordinate);

		match self.entries.remove(&coordinate) {
			Some(Entry::Requested(counts)) => {
				let entry = match outcome {
					Ok(mut chunk) => {
						if let Some(level) = counts.level() {
							chunk.set_level(level);
						}
						Entry::Populated(counts, chunk)
					}
					Err(error) => {
						log::warn!(target: LOG, "{}", error);
						Entry::Failed(counts, Arc::new(error))
					}
				};
				self.entries.insert(coordinate, entry);
			}
			Some(entry) => {
				log::trace!(
					target: LOG,
					"Discarding result for <{}, {}, {}>, which is already {:?}",
					coordinate.x,
					coordinate.y,
					coordinate.z,
					entry.state()
				);
				self.entries.insert(coordinate, entry);
			}
			None => {
				log::trace!(
					target: LOG,
					"Discarding result for <{}, {}, {}>, which is no longer tracked",
					coordinate.x,
					coordinate.y,
					coordinate.z
				);
			}
		}
	}

	#[profiling::function]
	fn unload_expired_chunks(&mut self) {
		if self.unreferenced.is_empty() {
			return;
		}

		let now = Instant::now();
		let entries = &self.entries;
		let unload_delay = self.unload_delay;
		let mut chunks_for_unloading = Vec::new();
		self.unreferenced.retain(|coordinate, since| {
			let is_alive = entries
				.get(coordinate)
				.map(|entry| entry.counts().is_alive())
				.unwrap_or(false);
			// If the chunk has been referenced again, it is no longer pending unload.
			if is_alive || !entries.contains_key(coordinate) {
				return false;
			}
			if now.duration_since(*since) >= unload_delay {
				chunks_for_unloading.push(*coordinate);
				return false;
			}
			true
		});

		if chunks_for_unloading.is_empty() {
			return;
		}
		log::debug!(
			target: LOG,
			"Unloading {} chunks",
			chunks_for_unloading.len()
		);
		for coordinate in chunks_for_unloading {
			if let Some(Entry::Populated(_, chunk)) = self.entries.remove(&coordinate) {
				if chunk.is_dirty() {
					if let Err(error) = self.provider.storage().save(&coordinate, chunk.volume()) {
						log::warn!(
							target: LOG,
							"Failed to save chunk <{}, {}, {}>: {:?}",
							coordinate.x,
							coordinate.y,
							coordinate.z,
							error
						);
					}
				}
			}
		}
	}

	/// Requests every [`Failed`](ChunkState::Failed) chunk which is still referenced again.
	/// Returns the number of chunks requested.
	pub fn retry_failed(&mut self) -> usize {
		let failed = self
			.entries
			.iter()
			.filter_map(|(coordinate, entry)| match entry {
				Entry::Failed(counts, _) if counts.is_alive() => Some(*coordinate),
				_ => None,
			})
			.collect::<Vec<_>>();
		for coordinate in failed.iter() {
			if let Some(entry) = self.entries.remove(coordinate) {
				self.entries
					.insert(*coordinate, Entry::Requested(entry.counts()));
				self.queue_request(*coordinate);
			}
		}
		self.dispatch_requests();
		failed.len()
	}

	/// Saves every resident chunk which has changed since it was last saved.
	/// Returns the number of chunks saved.
	#[profiling::function]
	pub fn save_dirty(&mut self) -> usize {
		let storage = self.provider.storage().clone();
		let mut saved = 0;
		for (coordinate, entry) in self.entries.iter_mut() {
			if let Entry::Populated(_, chunk) = entry {
				if !chunk.is_dirty() {
					continue;
				}
				match storage.save(coordinate, chunk.volume()) {
					Ok(()) => {
						chunk.mark_saved();
						saved += 1;
					}
					Err(error) => {
						log::warn!(
							target: LOG,
							"Failed to save chunk <{}, {}, {}>: {:?}",
							coordinate.x,
							coordinate.y,
							coordinate.z,
							error
						);
					}
				}
			}
		}
		saved
	}

	pub fn try_get(&self, coordinate: &Point3<i64>) -> Option<&Chunk<V>> {
		profiling::scope!(
			"find-chunk",
			&format!("<{}, {}, {}>", coordinate.x, coordinate.y, coordinate.z)
		);
		match self.entries.get(coordinate) {
			Some(Entry::Populated(_, chunk)) => Some(chunk),
			_ => None,
		}
	}

	/// Mutable access to a resident chunk.
	/// Writing to its volume marks it to be saved when unloaded.
	pub fn try_get_mut(&mut self, coordinate: &Point3<i64>) -> Option<&mut Chunk<V>> {
		match self.entries.get_mut(coordinate) {
			Some(Entry::Populated(_, chunk)) => Some(chunk),
			_ => None,
		}
	}

	pub fn state(&self, coordinate: &Point3<i64>) -> Option<ChunkState> {
		self.entries.get(coordinate).map(Entry::state)
	}

	pub fn counts(&self, coordinate: &Point3<i64>) -> Option<Counts> {
		self.entries.get(coordinate).map(Entry::counts)
	}

	pub fn is_alive(&self, coordinate: &Point3<i64>) -> bool {
		self.counts(coordinate)
			.map(|counts| counts.is_alive())
			.unwrap_or(false)
	}

	pub fn is_active(&self, coordinate: &Point3<i64>) -> bool {
		self.counts(coordinate)
			.map(|counts| counts.is_active())
			.unwrap_or(false)
	}

	/// The number of tracked chunks, in any state.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn positions(&self) -> impl Iterator<Item = &Point3<i64>> + '_ {
		self.entries.keys()
	}

	/// Every resident chunk.
	pub fn chunks(&self) -> impl Iterator<Item = &Chunk<V>> + '_ {
		self.entries.values().filter_map(|entry| match entry {
			Entry::Populated(_, chunk) => Some(chunk),
			_ => None,
		})
	}

	/// Every chunk the provider could not produce, and why.
	pub fn failed(&self) -> Vec<(Point3<i64>, Arc<thread::Error>)> {
		self.entries
			.iter()
			.filter_map(|(coordinate, entry)| match entry {
				Entry::Failed(_, error) => Some((*coordinate, error.clone())),
				_ => None,
			})
			.collect()
	}

	/// The number of requests the provider is working on.
	pub fn in_flight(&self) -> usize {
		self.in_flight.len()
	}

	/// The number of requests waiting to be sent to the provider.
	pub fn pending(&self) -> usize {
		self.pending_requests.len()
	}

	/// The number of registered anchors, including those removed since the last update.
	pub fn anchor_count(&self) -> usize {
		self.anchors.len()
	}
}

#[cfg(test)]
mod chunk_map {
	use super::*;
	use crate::{
		block::{IdMap, Lookup},
		world::{
			chunk::palette::{BufferPool, PalettedVolume},
			database::{MemoryStorage, NoStorage},
			generator::Flat,
			PoolSettings,
		},
	};
	use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
	use std::sync::atomic::{AtomicUsize, Ordering};

	fn context() -> Context<u32> {
		let lookup = Lookup::new(0u32);
		lookup.extend(1..8);
		let ids: Arc<dyn IdMap<u32>> = Arc::new(lookup);
		Context::new(Arc::new(BufferPool::new(&PoolSettings::default())), ids)
	}

	fn settings(worker_count: usize) -> Settings {
		Settings {
			worker_count,
			max_in_flight: 10_000,
			..Default::default()
		}
	}

	fn flat() -> Arc<dyn Generator<u32>> {
		let mut generator = Flat::default();
		generator.insert((0, 0), 1);
		Arc::new(generator)
	}

	fn map_with(settings: &Settings, storage: Arc<dyn Storage<u32>>) -> ChunkMap<u32> {
		ChunkMap::new(settings, context(), storage, flat()).unwrap()
	}

	/// A map whose requests are only ever fulfilled by the test itself.
	fn manual_map() -> ChunkMap<u32> {
		map_with(&settings(0), Arc::new(NoStorage))
	}

	fn complete(map: &mut ChunkMap<u32>, coordinate: Point3<i64>) {
		let volume = PalettedVolume::new(map.context());
		map.receive(Completed {
			coordinate,
			outcome: Ok(Chunk::generated(coordinate, volume)),
		});
	}

	fn expected_counts(areas: &[Area]) -> HashMap<Point3<i64>, Counts> {
		let mut expected = HashMap::<Point3<i64>, Counts>::new();
		for area in areas {
			for (coordinate, level) in area.coordinate_levels() {
				expected.entry(coordinate).or_default().increment(level);
			}
		}
		expected
	}

	fn assert_tracks(map: &ChunkMap<u32>, areas: &[Area]) {
		let expected = expected_counts(areas);
		assert_eq!(map.len(), expected.len());
		for (coordinate, counts) in expected {
			assert_eq!(map.counts(&coordinate), Some(counts), "{:?}", coordinate);
		}
	}

	#[test]
	fn anchor_demand_is_immediate() {
		let mut map = manual_map();
		let anchor = Anchor::new(Point3::new(0, 0, 0), 1);
		map.add_anchor(&anchor);
		assert_eq!(map.anchor_count(), 1);
		assert_eq!(map.len(), 5usize.pow(3));
		assert_eq!(map.state(&Point3::new(0, 0, 0)), Some(ChunkState::Requested));
		assert_eq!(
			map.counts(&Point3::new(1, 1, 1)),
			Some(Counts { active: 1, load: 0 })
		);
		assert_eq!(
			map.counts(&Point3::new(2, -2, 0)),
			Some(Counts { active: 0, load: 1 })
		);
		assert!(map.is_active(&Point3::new(0, 0, 0)));
		assert!(!map.is_active(&Point3::new(2, 0, 0)));
		assert!(map.is_alive(&Point3::new(2, 0, 0)));
		assert!(!map.is_alive(&Point3::new(3, 0, 0)));
		assert!(map.try_get(&Point3::new(0, 0, 0)).is_none());
		assert_eq!(map.in_flight(), 5usize.pow(3));
	}

	#[test]
	fn populates_with_workers() {
		let mut map = map_with(&settings(2), Arc::new(NoStorage));
		let anchor = Anchor::new(Point3::new(0, 0, 0), 0);
		map.add_anchor(&anchor);
		map.flush().unwrap();
		map.update();
		assert_eq!(map.in_flight(), 0);
		assert_eq!(map.chunks().count(), 27);
		assert!(map.positions().all(|p| map.state(p) == Some(ChunkState::Populated)));

		let origin = map.try_get(&Point3::new(0, 0, 0)).unwrap();
		assert_eq!(origin.level(), Level::Active);
		assert!(origin.is_freshly_generated());
		assert_eq!(origin.volume().get_id(0), 1);
		let neighbor = map.try_get(&Point3::new(0, 1, 0)).unwrap();
		assert_eq!(neighbor.level(), Level::Passive);
		assert!(neighbor.volume().is_empty());
	}

	#[test]
	fn counts_follow_anchors() {
		let mut rng = StdRng::seed_from_u64(7);
		let mut map = manual_map();
		let mut anchors: Vec<(AnchorId, Arc<Anchor>)> = Vec::new();

		for _ in 0..200 {
			match rng.gen_range(0..10) {
				0..=2 => {
					let origin = Point3::new(
						rng.gen_range(-4..=4),
						rng.gen_range(-2..=2),
						rng.gen_range(-4..=4),
					);
					let anchor = Anchor::new(origin, rng.gen_range(0..=2));
					let id = map.add_anchor(&anchor);
					anchors.push((id, anchor));
				}
				3..=6 if !anchors.is_empty() => {
					let (_, anchor) = &anchors[rng.gen_range(0..anchors.len())];
					let area = anchor.current();
					let step = Point3::new(
						rng.gen_range(-1..=1),
						rng.gen_range(-1..=1),
						rng.gen_range(-1..=1),
					);
					anchor.move_to(area.origin + step.coords);
					if rng.gen_bool(0.2) {
						anchor.set_radius(rng.gen_range(0..=2));
					}
				}
				7 if !anchors.is_empty() => {
					let (id, _) = anchors.remove(rng.gen_range(0..anchors.len()));
					assert!(map.remove_anchor(id));
					assert!(!map.remove_anchor(id));
				}
				8 if !anchors.is_empty() => {
					// dropping the last strong reference unregisters the anchor
					anchors.remove(rng.gen_range(0..anchors.len()));
				}
				_ => {}
			}

			// let some requests come back, in whatever order
			let mut requests = map.provider().take_requests();
			requests.shuffle(&mut rng);
			for coordinate in requests.into_iter().take(20) {
				complete(&mut map, coordinate);
			}

			map.update();
			assert_eq!(map.anchor_count(), anchors.len());
			let areas = anchors
				.iter()
				.map(|(_, anchor)| anchor.current())
				.collect::<Vec<_>>();
			assert_tracks(&map, &areas);
		}
	}

	#[test]
	fn completion_order_is_irrelevant() {
		let anchor = Anchor::new(Point3::new(0, 0, 0), 1);
		let mut in_order = manual_map();
		let mut shuffled = manual_map();
		in_order.add_anchor(&anchor);
		shuffled.add_anchor(&anchor);

		let requests = in_order.provider().take_requests();
		let mut shuffled_requests = shuffled.provider().take_requests();
		shuffled_requests.shuffle(&mut StdRng::seed_from_u64(99));

		// move before anything comes back, so some results are stale
		anchor.move_to(Point3::new(2, 0, 0));
		in_order.update();
		shuffled.update();

		for coordinate in requests {
			complete(&mut in_order, coordinate);
		}
		for coordinate in shuffled_requests {
			complete(&mut shuffled, coordinate);
		}
		in_order.update();
		shuffled.update();

		assert_eq!(in_order.len(), shuffled.len());
		for coordinate in in_order.positions() {
			assert_eq!(in_order.state(coordinate), shuffled.state(coordinate));
			assert_eq!(in_order.counts(coordinate), shuffled.counts(coordinate));
			assert_eq!(
				in_order.try_get(coordinate).map(|chunk| chunk.level()),
				shuffled.try_get(coordinate).map(|chunk| chunk.level()),
			);
		}
	}

	#[test]
	fn moving_changes_only_the_edges() {
		let mut map = manual_map();
		let anchor = Anchor::new(Point3::new(0, 0, 0), 2);
		map.add_anchor(&anchor);
		let before = map
			.positions()
			.map(|coordinate| (*coordinate, map.counts(coordinate).unwrap()))
			.collect::<HashMap<_, _>>();
		assert_eq!(before.len(), 343);

		anchor.move_to(Point3::new(1, 0, 0));
		map.update();
		assert_eq!(map.len(), 343);

		for (coordinate, counts) in before.iter() {
			if coordinate.x == -3 {
				assert_eq!(map.state(coordinate), None);
			} else {
				let after = map.counts(coordinate).unwrap();
				assert_eq!(after.active + after.load, counts.active + counts.load);
			}
		}
		for y in -3..=3 {
			for z in -3..=3 {
				let entering = Point3::new(4, y, z);
				assert_eq!(map.state(&entering), Some(ChunkState::Requested));
				assert_eq!(map.counts(&entering), Some(Counts { active: 0, load: 1 }));
			}
		}
		// the old passive shell at x = 3 is now active
		assert!(map.is_active(&Point3::new(3, 0, 0)));
		assert!(!map.is_active(&Point3::new(-2, 0, 0)));
	}

	#[test]
	fn stale_results_are_discarded() {
		let mut map = manual_map();
		let pool = map.context().pool.clone();
		let anchor = Anchor::new(Point3::new(0, 0, 0), 0);
		map.add_anchor(&anchor);
		let requests = map.provider().take_requests();

		anchor.move_to(Point3::new(100, 0, 0));
		map.update();
		assert_eq!(map.len(), 27);
		assert_eq!(map.state(&Point3::new(0, 0, 0)), None);

		let available = pool.available(3);
		for coordinate in requests {
			let mut volume = PalettedVolume::new(map.context());
			volume.set_id(0, 2);
			map.receive(Completed {
				coordinate,
				outcome: Ok(Chunk::generated(coordinate, volume)),
			});
		}
		assert_eq!(map.len(), 27);
		assert_eq!(map.chunks().count(), 0);
		// the discarded volumes returned their buffers
		assert!(pool.available(3) > available);
	}

	#[test]
	fn duplicate_results_are_discarded() {
		let mut map = manual_map();
		let anchor = Anchor::new(Point3::new(0, 0, 0), 0);
		map.add_anchor(&anchor);
		let origin = Point3::new(0, 0, 0);
		complete(&mut map, origin);
		let mut volume = PalettedVolume::new(map.context());
		volume.set_id(0, 3);
		map.receive(Completed {
			coordinate: origin,
			outcome: Ok(Chunk::generated(origin, volume)),
		});
		assert_eq!(map.try_get(&origin).unwrap().volume().get_id(0), 0);
	}

	#[test]
	fn in_flight_is_bounded() {
		let mut map = map_with(
			&Settings {
				worker_count: 0,
				max_in_flight: 4,
				..Default::default()
			},
			Arc::new(NoStorage),
		);
		let anchor = Anchor::new(Point3::new(0, 0, 0), 0);
		map.add_anchor(&anchor);
		assert_eq!(map.in_flight(), 4);
		assert_eq!(map.pending(), 23);

		let requests = map.provider().take_requests();
		assert_eq!(requests.len(), 4);
		complete(&mut map, requests[0]);
		map.update();
		assert_eq!(map.in_flight(), 4);
		assert_eq!(map.pending(), 22);
	}

	#[test]
	fn removal_is_deferred() {
		let mut map = manual_map();
		let anchor = Anchor::new(Point3::new(0, 0, 0), 0);
		let id = map.add_anchor(&anchor);
		assert!(map.remove_anchor(id));
		assert_eq!(map.len(), 27);
		map.update();
		assert_eq!(map.len(), 0);
		assert_eq!(map.anchor_count(), 0);
		assert!(!map.remove_anchor(id));
	}

	#[test]
	fn removed_anchor_ignores_later_moves() {
		let mut map = map_with(
			&Settings {
				worker_count: 0,
				unload_delay_ms: 60_000,
				..Default::default()
			},
			Arc::new(NoStorage),
		);
		let anchor = Anchor::new(Point3::new(0, 0, 0), 0);
		let id = map.add_anchor(&anchor);
		assert!(map.remove_anchor(id));
		anchor.move_to(Point3::new(100, 0, 0));
		map.update();

		// only the area which was applied is tracked, waiting out the unload delay
		assert_eq!(map.len(), 27);
		assert!(map.positions().all(|coordinate| !map.is_alive(coordinate)));
		assert_eq!(map.state(&Point3::new(100, 0, 0)), None);
		assert_eq!(map.anchor_count(), 0);
	}

	#[test]
	fn dropped_anchor_is_released() {
		let mut map = manual_map();
		let anchor = Anchor::new(Point3::new(0, 0, 0), 1);
		map.add_anchor(&anchor);
		drop(anchor);
		map.update();
		assert!(map.is_empty());
		assert_eq!(map.anchor_count(), 0);
	}

	struct FailOnce {
		coordinate: Point3<i64>,
		remaining: AtomicUsize,
	}

	impl Generator<u32> for FailOnce {
		fn generate(
			&self,
			coordinate: &Point3<i64>,
			_: &mut PalettedVolume<u32>,
		) -> anyhow::Result<()> {
			if *coordinate == self.coordinate
				&& self
					.remaining
					.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
					.is_ok()
			{
				anyhow::bail!("bad terrain");
			}
			Ok(())
		}
	}

	#[test]
	fn failures_can_be_retried() {
		let origin = Point3::new(0, 0, 0);
		let generator = Arc::new(FailOnce {
			coordinate: origin,
			remaining: AtomicUsize::new(1),
		});
		let mut map = ChunkMap::new(&settings(1), context(), Arc::new(NoStorage), generator).unwrap();
		let anchor = Anchor::new(origin, 0);
		map.add_anchor(&anchor);
		map.flush().unwrap();

		assert_eq!(map.state(&origin), Some(ChunkState::Failed));
		let failed = map.failed();
		assert_eq!(failed.len(), 1);
		assert!(matches!(*failed[0].1, thread::Error::Generation { .. }));

		assert_eq!(map.retry_failed(), 1);
		assert_eq!(map.state(&origin), Some(ChunkState::Requested));
		map.flush().unwrap();
		assert_eq!(map.state(&origin), Some(ChunkState::Populated));
		assert!(map.failed().is_empty());
	}

	struct PanicAtOrigin;

	impl Generator<u32> for PanicAtOrigin {
		fn generate(
			&self,
			coordinate: &Point3<i64>,
			_: &mut PalettedVolume<u32>,
		) -> anyhow::Result<()> {
			assert_ne!(*coordinate, Point3::new(0, 0, 0), "origin is cursed");
			Ok(())
		}
	}

	#[test]
	fn panics_mark_chunks_failed() {
		let mut map =
			ChunkMap::new(&settings(2), context(), Arc::new(NoStorage), Arc::new(PanicAtOrigin))
				.unwrap();
		let anchor = Anchor::new(Point3::new(0, 0, 0), 0);
		map.add_anchor(&anchor);
		map.flush().unwrap();
		assert_eq!(map.state(&Point3::new(0, 0, 0)), Some(ChunkState::Failed));
		assert!(matches!(
			*map.failed()[0].1,
			thread::Error::Panicked { .. }
		));
		assert_eq!(map.chunks().count(), 26);
	}

	#[test]
	fn unloading_saves_dirty_chunks() {
		let storage = Arc::new(MemoryStorage::new());
		let mut map = map_with(&settings(1), storage.clone());
		let origin = Point3::new(0, 0, 0);
		let anchor = Anchor::new(origin, 0);
		let id = map.add_anchor(&anchor);
		map.flush().unwrap();

		map.try_get_mut(&origin).unwrap().volume_mut().set_id(5, 3);
		map.remove_anchor(id);
		map.update();
		assert!(map.is_empty());
		// generated chunks have never been saved, so all of them are written
		assert_eq!(storage.len(), 27);

		map.add_anchor(&anchor);
		map.flush().unwrap();
		let chunk = map.try_get(&origin).unwrap();
		assert!(!chunk.is_freshly_generated());
		assert!(!chunk.is_dirty());
		assert_eq!(chunk.volume().get_id(5), 3);
		assert_eq!(chunk.volume().get_id(0), 1);
	}

	#[test]
	fn save_dirty_marks_saved() {
		let storage = Arc::new(MemoryStorage::new());
		let mut map = map_with(&settings(1), storage.clone());
		let anchor = Anchor::new(Point3::new(0, 0, 0), 0);
		map.add_anchor(&anchor);
		map.flush().unwrap();
		assert_eq!(map.save_dirty(), 27);
		assert_eq!(map.save_dirty(), 0);
		assert!(map.chunks().all(|chunk| !chunk.is_dirty()));
		assert_eq!(storage.len(), 27);
	}

	#[test]
	fn unload_delay_keeps_chunks() {
		let mut map = map_with(
			&Settings {
				worker_count: 1,
				unload_delay_ms: 60_000,
				..Default::default()
			},
			Arc::new(NoStorage),
		);
		let origin = Point3::new(0, 0, 0);
		let anchor = Anchor::new(origin, 0);
		let id = map.add_anchor(&anchor);
		map.flush().unwrap();
		map.remove_anchor(id);
		map.update();

		// unreferenced, but not yet unloaded
		assert_eq!(map.len(), 27);
		assert!(!map.is_alive(&origin));
		assert_eq!(map.state(&origin), Some(ChunkState::Populated));

		map.add_anchor(&anchor);
		assert_eq!(map.in_flight(), 0);
		assert!(map.is_active(&origin));
		map.update();
		assert_eq!(map.len(), 27);
	}

	#[test]
	fn flush_without_workers_fails() {
		let mut map = manual_map();
		let anchor = Anchor::new(Point3::new(0, 0, 0), 0);
		map.add_anchor(&anchor);
		assert!(matches!(map.flush(), Err(thread::Error::Stopped)));
	}
}
