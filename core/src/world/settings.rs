use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
	path::{Path, PathBuf},
	time::Duration,
};

/// Capacities of the free-lists in a [`BufferPool`](crate::world::chunk::palette::BufferPool).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
	/// How many idle buffers are kept for each bit-width level.
	#[serde(default = "PoolSettings::default_buffers_per_level")]
	pub buffers_per_level: usize,
	/// How many idle linear palette lists are kept.
	#[serde(default = "PoolSettings::default_palettes")]
	pub palettes: usize,
}

impl PoolSettings {
	fn default_buffers_per_level() -> usize {
		64
	}

	fn default_palettes() -> usize {
		256
	}
}

impl Default for PoolSettings {
	fn default() -> Self {
		Self {
			buffers_per_level: Self::default_buffers_per_level(),
			palettes: Self::default_palettes(),
		}
	}
}

/// Configuration for chunk residency, saved alongside a world at `<world root>/settings.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Settings {
	/// The number of threads loading & generating chunks.
	#[serde(default = "Settings::default_worker_count")]
	pub worker_count: usize,
	/// The most chunk requests which can be outstanding with the workers at once.
	#[serde(default = "Settings::default_max_in_flight")]
	pub max_in_flight: usize,
	/// How long a chunk must go unreferenced before it is unloaded.
	#[serde(default)]
	pub unload_delay_ms: u64,
	#[serde(default)]
	pub pool: PoolSettings,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			worker_count: Self::default_worker_count(),
			max_in_flight: Self::default_max_in_flight(),
			unload_delay_ms: 0,
			pool: PoolSettings::default(),
		}
	}
}

impl Settings {
	fn default_worker_count() -> usize {
		std::thread::available_parallelism()
			.map(|count| count.get())
			.unwrap_or(1)
	}

	fn default_max_in_flight() -> usize {
		64
	}

	pub fn unload_delay(&self) -> Duration {
		Duration::from_millis(self.unload_delay_ms)
	}

	fn create_path(mut world_root_dir: PathBuf) -> PathBuf {
		world_root_dir.push("settings.json");
		world_root_dir
	}

	/// Loads the settings for the world at `world_root_dir`,
	/// writing the file back so any missing fields are filled in with their defaults.
	pub fn load(world_root_dir: &Path) -> Result<Self> {
		// Ensure the world directory exists
		if !world_root_dir.exists() {
			std::fs::create_dir_all(&world_root_dir)
				.with_context(|| format!("creating world directory {}", world_root_dir.display()))?;
		}

		// Load settings from disk, if it exists
		let settings_path = Self::create_path(world_root_dir.to_owned());
		let mut settings = Self::default();
		if settings_path.exists() {
			let raw = std::fs::read_to_string(&settings_path)
				.with_context(|| format!("reading {}", settings_path.display()))?;
			settings = serde_json::from_str(&raw)
				.with_context(|| format!("parsing {}", settings_path.display()))?;
		}

		// Auto-save loaded settings to file
		settings.save(world_root_dir)?;

		Ok(settings)
	}

	pub fn save(&self, world_root_dir: &Path) -> Result<()> {
		let settings_path = Self::create_path(world_root_dir.to_owned());
		let json = serde_json::to_string_pretty(&self)?;
		std::fs::write(&settings_path, json)
			.with_context(|| format!("writing {}", settings_path.display()))?;
		Ok(())
	}
}
