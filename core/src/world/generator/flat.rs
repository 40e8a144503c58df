use crate::world::{
	chunk::{palette::PalettedVolume, SIZE},
	generator::Generator,
};
use anyhow::Result;
use nalgebra::Point3;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeMap;

const LAYER_CELLS: usize = SIZE * SIZE;

struct Scatter<V> {
	value: V,
	/// Out of 100, the chance any cell above the bottom layer is replaced.
	percent: usize,
	seed: u64,
}

/// Generates a world of horizontal layers, each a single value.
pub struct Flat<V> {
	layers: BTreeMap</*chunk-y*/ i64, BTreeMap</*cell-y*/ usize, V>>,
	scatter: Option<Scatter<V>>,
}

impl<V> Default for Flat<V> {
	fn default() -> Self {
		Self {
			layers: BTreeMap::new(),
			scatter: None,
		}
	}
}

impl<V> Flat<V>
where
	V: Clone,
{
	pub fn classic(bedrock: V, stone: V, dirt: V, grass: V) -> Self {
		let mut cfg = Self::default();

		cfg.insert((0, 0), bedrock);

		cfg.insert((0, 1), stone.clone());
		cfg.insert((0, 2), stone.clone());
		cfg.insert((0, 3), stone);

		cfg.insert((0, 4), dirt.clone());
		cfg.insert((0, 5), dirt);

		cfg.insert((0, 6), grass);

		cfg
	}

	/// Sets the value of every cell at `layer.1` in chunks whose y-coordinate is `layer.0`.
	pub fn insert(&mut self, layer: (i64, usize), value: V) {
		assert!(layer.1 < SIZE, "cell layer {} is outside of a chunk", layer.1);
		self.layers.entry(layer.0).or_default().insert(layer.1, value);
	}

	/// Randomly replaces `percent` of the cells in each layer (other than the bottom of a chunk) with `value`.
	/// The same seed always scatters the same cells.
	pub fn with_scatter(mut self, value: V, percent: usize, seed: u64) -> Self {
		self.scatter = Some(Scatter {
			value,
			percent,
			seed,
		});
		self
	}

	fn chunk_seed(seed: u64, coordinate: &Point3<i64>) -> u64 {
		seed ^ (coordinate.x as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
			^ (coordinate.y as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
			^ (coordinate.z as u64).wrapping_mul(0x1656_67B1_9E37_79F9)
	}
}

impl<V> Generator<V> for Flat<V>
where
	V: Clone + Send + Sync,
{
	fn generate(&self, coordinate: &Point3<i64>, volume: &mut PalettedVolume<V>) -> Result<()> {
		let layers = match self.layers.get(&coordinate.y) {
			Some(layers) => layers,
			None => return Ok(()),
		};

		for (&y, value) in layers.iter() {
			volume.fill(y * LAYER_CELLS..(y + 1) * LAYER_CELLS, value)?;
		}

		if let Some(scatter) = &self.scatter {
			let mut rng = StdRng::seed_from_u64(Self::chunk_seed(scatter.seed, coordinate));
			for &y in layers.keys().filter(|y| **y > 0) {
				for index in y * LAYER_CELLS..(y + 1) * LAYER_CELLS {
					if rng.gen_range(0..100) < scatter.percent {
						volume.set(index, &scatter.value)?;
					}
				}
			}
		}

		Ok(())
	}
}
