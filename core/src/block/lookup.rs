use parking_lot::RwLock;
use std::{collections::HashMap, hash::Hash};

/// A dense, world-wide identifier for a distinct cell value.
///
/// Identifiers are handed out in insertion order and are stable for the lifetime of the process.
/// Id `0` is always the default (empty) value.
pub type GlobalId = u32;

/// The id of the default value every [`IdMap`] is seeded with.
pub const DEFAULT_ID: GlobalId = 0;

/// A mapping of cell value to unsized-integer (and back),
/// used to store cell values compactly in chunk volumes.
///
/// Implementations must be append-only and safe to read from many threads at once.
pub trait IdMap<V>: Send + Sync {
	/// Returns the id of `value`, if the value has been registered.
	fn id_for(&self, value: &V) -> Option<GlobalId>;

	/// Returns the value registered for `id`.
	///
	/// Ids which were never handed out by this map are a contract violation.
	fn value_for(&self, id: GlobalId) -> V;

	/// The size of the id-space (one greater than the largest id handed out).
	fn count(&self) -> usize;
}

/// An append-only [`IdMap`] which interns values as they are pushed.
pub struct Lookup<V> {
	inner: RwLock<Inner<V>>,
}

struct Inner<V> {
	ordered_values: Vec<V>,
	value_ids: HashMap<V, GlobalId>,
}

impl<V> Lookup<V>
where
	V: Eq + Hash + Clone,
{
	/// Creates a lookup whose only entry is `default` at [`DEFAULT_ID`].
	pub fn new(default: V) -> Self {
		let lookup = Self {
			inner: RwLock::new(Inner {
				ordered_values: Vec::new(),
				value_ids: HashMap::new(),
			}),
		};
		lookup.push(default);
		lookup
	}

	/// Registers `value`, returning its id.
	/// Values which are already registered keep their existing id.
	pub fn push(&self, value: V) -> GlobalId {
		if let Some(id) = self.inner.read().value_ids.get(&value) {
			return *id;
		}
		let mut inner = self.inner.write();
		// another writer may have registered the value between the two locks
		if let Some(id) = inner.value_ids.get(&value) {
			return *id;
		}
		let id = inner.ordered_values.len() as GlobalId;
		inner.value_ids.insert(value.clone(), id);
		inner.ordered_values.push(value);
		id
	}

	pub fn extend<I>(&self, values: I)
	where
		I: IntoIterator<Item = V>,
	{
		for value in values {
			self.push(value);
		}
	}
}

impl<V> IdMap<V> for Lookup<V>
where
	V: Eq + Hash + Clone + Send + Sync,
{
	fn id_for(&self, value: &V) -> Option<GlobalId> {
		self.inner.read().value_ids.get(value).cloned()
	}

	fn value_for(&self, id: GlobalId) -> V {
		self.inner.read().ordered_values[id as usize].clone()
	}

	fn count(&self) -> usize {
		self.inner.read().ordered_values.len()
	}
}
