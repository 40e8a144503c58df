use crate::world::chunk::palette::PalettedVolume;
use nalgebra::Point3;

mod flat;
pub use flat::*;

/// Fills newly created chunks which have never been saved.
///
/// Generators are shared by every provider worker, so `generate` is called concurrently.
pub trait Generator<V>: Send + Sync {
	/// Writes the cells of the chunk at `coordinate` into the (empty) `volume`.
	fn generate(&self, coordinate: &Point3<i64>, volume: &mut PalettedVolume<V>) -> anyhow::Result<()>;
}
