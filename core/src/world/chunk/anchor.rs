use crate::world::chunk::Level;
use nalgebra::{Point3, Vector3};
use parking_lot::RwLock;
use std::sync::Arc;

/// The region of chunks an [`Anchor`] demands at a moment in time.
///
/// Every chunk within `radius` (by chebyshev distance) of the `origin` is [`Active`](Level::Active),
/// and the shell one chunk beyond that is [`Passive`](Level::Passive).
///
/// A radius of `0` means that:
/// - 1 chunk is active
/// - the 26 chunks (3^3 - 1^3) surrounding it are passive
/// In total, 27 chunks are demanded with a radius of 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Area {
	pub origin: Point3<i64>,
	pub radius: usize,
}

impl std::fmt::Display for Area {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"Area(<{}, {}, {}> radius={})",
			self.origin[0], self.origin[1], self.origin[2], self.radius
		)
	}
}

impl Area {
	pub fn new(origin: Point3<i64>, radius: usize) -> Self {
		Self { origin, radius }
	}

	/// The number of chunks this area demands.
	pub fn demand_count(&self) -> usize {
		(2 * self.radius + 3).pow(3)
	}

	pub fn coordinate_levels(&self) -> Vec<(Point3<i64>, Level)> {
		let mut points = Vec::with_capacity(self.demand_count());
		for ring in 0..=self.radius {
			self.visit_ring(ring, |point| points.push((point, Level::Active)));
		}
		self.visit_ring(self.radius + 1, |point| points.push((point, Level::Passive)));
		points
	}

	/// The level this area demands `coordinate` at, if at all.
	pub fn level_of(&self, coordinate: &Point3<i64>) -> Option<Level> {
		let distance = chebyshev_distance(&self.origin, coordinate);
		if distance <= self.radius {
			Some(Level::Active)
		} else if distance == self.radius + 1 {
			Some(Level::Passive)
		} else {
			None
		}
	}

	/// Visits every coordinate in the cube shell exactly `distance` chunks away from the origin.
	pub fn visit_ring<F>(&self, distance: usize, mut callback: F)
	where
		F: FnMut(Point3<i64>),
	{
		let extent = distance as i64;
		for x in -extent..=extent {
			for y in -extent..=extent {
				if x.abs() == extent || y.abs() == extent {
					// on a side face, every z along the column is in the shell
					for z in -extent..=extent {
						callback(self.origin + Vector3::new(x, y, z));
					}
				} else {
					// interior columns only touch the shell at their two caps
					callback(self.origin + Vector3::new(x, y, -extent));
					callback(self.origin + Vector3::new(x, y, extent));
				}
			}
		}
	}
}

/// The number of chunks between `a` and `b` along the axis they differ the most.
pub fn chebyshev_distance(a: &Point3<i64>, b: &Point3<i64>) -> usize {
	let offset = b - a;
	offset.x.abs().max(offset.y.abs()).max(offset.z.abs()) as usize
}

/// Identifies an anchor registered with a [`ChunkMap`](super::ChunkMap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AnchorId(pub(crate) u64);

impl std::fmt::Display for AnchorId {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "Anchor#{}", self.0)
	}
}

/// Something in the world (a player, a spawn point) which keeps the chunks around it loaded.
///
/// The owner keeps the returned `Arc` and moves the anchor as it travels.
/// A [`ChunkMap`](super::ChunkMap) only holds a weak reference;
/// once every strong reference is dropped, the anchor's chunks are released on the next update.
pub struct Anchor {
	current: RwLock<Area>,
}

impl Anchor {
	pub fn new(origin: Point3<i64>, radius: usize) -> Arc<Self> {
		Arc::new(Self {
			current: RwLock::new(Area::new(origin, radius)),
		})
	}

	/// A snapshot of the area the anchor currently demands.
	pub fn current(&self) -> Area {
		*self.current.read()
	}

	pub fn move_to(&self, origin: Point3<i64>) {
		self.current.write().origin = origin;
	}

	pub fn set_radius(&self, radius: usize) {
		self.current.write().radius = radius;
	}
}

impl std::fmt::Display for Anchor {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "Anchor({})", self.current())
	}
}
