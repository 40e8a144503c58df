use crate::{
	block::GlobalId,
	world::chunk::{
		palette::{Context, PalettedVolume},
		VOLUME,
	},
};
use anyhow::{Context as _, Result};
use nalgebra::Point3;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
	collections::HashMap,
	io::{BufReader, BufWriter},
	path::{Path, PathBuf},
};

/// Persistent storage of chunk volumes, consulted before a chunk is generated.
///
/// Called from every provider worker at once.
pub trait Storage<V>: Send + Sync {
	/// Reads the volume saved for `coordinate`, if one has ever been saved.
	fn try_load(
		&self,
		coordinate: &Point3<i64>,
		context: &Context<V>,
	) -> Result<Option<PalettedVolume<V>>>;

	fn save(&self, coordinate: &Point3<i64>, volume: &PalettedVolume<V>) -> Result<()>;
}

/// Storage which never has anything saved; every chunk is generated.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStorage;

impl<V> Storage<V> for NoStorage {
	fn try_load(&self, _: &Point3<i64>, _: &Context<V>) -> Result<Option<PalettedVolume<V>>> {
		Ok(None)
	}

	fn save(&self, _: &Point3<i64>, _: &PalettedVolume<V>) -> Result<()> {
		Ok(())
	}
}

/// Keeps the ids of saved chunks in memory for the lifetime of the storage.
#[derive(Default)]
pub struct MemoryStorage {
	chunks: Mutex<HashMap<Point3<i64>, Vec<GlobalId>>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.chunks.lock().len()
	}

	pub fn contains(&self, coordinate: &Point3<i64>) -> bool {
		self.chunks.lock().contains_key(coordinate)
	}
}

impl<V> Storage<V> for MemoryStorage {
	fn try_load(
		&self,
		coordinate: &Point3<i64>,
		context: &Context<V>,
	) -> Result<Option<PalettedVolume<V>>> {
		let chunks = self.chunks.lock();
		Ok(chunks.get(coordinate).map(|ids| {
			let mut volume = PalettedVolume::new(context);
			volume.copy_from_ids(ids);
			volume
		}))
	}

	fn save(&self, coordinate: &Point3<i64>, volume: &PalettedVolume<V>) -> Result<()> {
		let mut ids = vec![0; VOLUME];
		volume.copy_to_ids(&mut ids);
		self.chunks.lock().insert(*coordinate, ids);
		Ok(())
	}
}

/// The serialized form of a chunk on disk.
/// Cells are indices into the palette of values, so the file stays valid
/// even if global ids are assigned in a different order next session.
#[derive(Serialize, Deserialize)]
struct ChunkSaveData<V> {
	coordinate: [i64; 3],
	palette: Vec<V>,
	cells: Vec<u16>,
}

/// Saves chunks to disk at `<world root>/chunks/x.y.z.bin`.
pub struct FileStorage {
	root_dir: PathBuf,
}

impl FileStorage {
	pub fn new(root_dir: PathBuf) -> Self {
		Self { root_dir }
	}

	pub fn root_dir(&self) -> &Path {
		&self.root_dir
	}

	fn create_path_for(&self, coordinate: &Point3<i64>) -> PathBuf {
		let mut path = self.root_dir.clone();
		path.push("chunks");
		path.push(format!(
			"{}.{}.{}.bin",
			coordinate[0], coordinate[1], coordinate[2]
		));
		path
	}
}

impl<V> Storage<V> for FileStorage
where
	V: Serialize + DeserializeOwned,
{
	fn try_load(
		&self,
		coordinate: &Point3<i64>,
		context: &Context<V>,
	) -> Result<Option<PalettedVolume<V>>> {
		let path = self.create_path_for(coordinate);
		profiling::scope!("load-chunk", path.to_str().unwrap_or(""));
		if !path.exists() {
			return Ok(None);
		}

		let file = std::fs::File::open(&path).with_context(|| format!("opening {}", path.display()))?;
		let data: ChunkSaveData<V> = bincode::deserialize_from(BufReader::new(file))
			.with_context(|| format!("decoding {}", path.display()))?;

		if data.coordinate != [coordinate.x, coordinate.y, coordinate.z] {
			anyhow::bail!(
				"{} holds chunk <{}, {}, {}>",
				path.display(),
				data.coordinate[0],
				data.coordinate[1],
				data.coordinate[2]
			);
		}
		if data.cells.len() != VOLUME {
			anyhow::bail!("{} holds {} cells", path.display(), data.cells.len());
		}

		let palette_ids = data
			.palette
			.iter()
			.enumerate()
			.map(|(index, value)| {
				context.ids.id_for(value).ok_or_else(|| {
					anyhow::anyhow!("{} palette entry {} is not registered", path.display(), index)
				})
			})
			.collect::<Result<Vec<_>>>()?;
		let ids = data
			.cells
			.iter()
			.map(|cell| {
				palette_ids.get(*cell as usize).cloned().ok_or_else(|| {
					anyhow::anyhow!("{} references palette entry {}", path.display(), cell)
				})
			})
			.collect::<Result<Vec<_>>>()?;

		let mut volume = PalettedVolume::new(context);
		volume.copy_from_ids(&ids);
		Ok(Some(volume))
	}

	fn save(&self, coordinate: &Point3<i64>, volume: &PalettedVolume<V>) -> Result<()> {
		let path = self.create_path_for(coordinate);
		profiling::scope!("save-chunk", path.to_str().unwrap_or(""));

		let mut ids = vec![0; VOLUME];
		volume.copy_to_ids(&mut ids);
		let palette_ids = volume.distinct_ids();
		let cells = ids
			.iter()
			.map(|id| palette_ids.binary_search(id).unwrap_or_default() as u16)
			.collect::<Vec<_>>();
		let data = ChunkSaveData {
			coordinate: [coordinate.x, coordinate.y, coordinate.z],
			palette: palette_ids
				.iter()
				.map(|id| volume.ids().value_for(*id))
				.collect::<Vec<_>>(),
			cells,
		};

		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)
				.with_context(|| format!("creating {}", parent.display()))?;
		}
		let file =
			std::fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
		bincode::serialize_into(BufWriter::new(file), &data)
			.with_context(|| format!("encoding {}", path.display()))?;
		Ok(())
	}
}

#[cfg(test)]
mod storage {
	use super::*;
	use crate::{
		block::{IdMap, Lookup},
		world::{chunk::palette::BufferPool, PoolSettings},
	};
	use std::sync::Arc;

	fn context(values: &[&'static str]) -> Context<String> {
		let lookup = Lookup::new("air".to_owned());
		lookup.extend(values.iter().map(|value| value.to_string()));
		let ids: Arc<dyn IdMap<String>> = Arc::new(lookup);
		Context::new(Arc::new(BufferPool::new(&PoolSettings::default())), ids)
	}

	fn temp_world(name: &str) -> PathBuf {
		let mut path = std::env::temp_dir();
		path.push(format!("chunk-streaming-{}-{}", name, std::process::id()));
		let _ = std::fs::remove_dir_all(&path);
		path
	}

	fn sample(context: &Context<String>) -> PalettedVolume<String> {
		let mut volume = PalettedVolume::new(context);
		volume.fill(0..256, &"stone".to_owned()).unwrap();
		volume.set(300, &"dirt".to_owned()).unwrap();
		volume
	}

	#[test]
	fn no_storage_is_empty() {
		let context = context(&[]);
		let volume = PalettedVolume::new(&context);
		let storage = NoStorage;
		storage.save(&Point3::new(0, 0, 0), &volume).unwrap();
		assert!(storage.try_load(&Point3::new(0, 0, 0), &context).unwrap().is_none());
	}

	#[test]
	fn memory_round_trip() {
		let context = context(&["stone", "dirt"]);
		let storage = MemoryStorage::new();
		let coordinate = Point3::new(1, -2, 3);
		assert!(storage.try_load(&coordinate, &context).unwrap().is_none());
		storage.save(&coordinate, &sample(&context)).unwrap();
		assert!(storage.contains(&coordinate));
		assert_eq!(storage.len(), 1);

		let loaded = storage.try_load(&coordinate, &context).unwrap().unwrap();
		assert_eq!(loaded.get(0), "stone");
		assert_eq!(loaded.get(300), "dirt");
		assert_eq!(loaded.get(301), "air");
	}

	#[test]
	fn file_round_trip() {
		let root = temp_world("file-storage");
		let storage = FileStorage::new(root.clone());
		let coordinate = Point3::new(-4, 0, 12);

		let saving = context(&["stone", "dirt"]);
		storage.save(&coordinate, &sample(&saving)).unwrap();
		assert!(root.join("chunks").join("-4.0.12.bin").exists());

		// values are stored by name, so a different id order still loads
		let loading = context(&["dirt", "stone"]);
		let loaded = storage.try_load(&coordinate, &loading).unwrap().unwrap();
		assert_eq!(loaded.get(255), "stone");
		assert_eq!(loaded.get(256), "air");
		assert_eq!(loaded.get(300), "dirt");

		assert!(storage.try_load(&Point3::new(0, 0, 0), &loading).unwrap().is_none());

		let _ = std::fs::remove_dir_all(&root);
	}

	#[test]
	fn file_with_unknown_value() {
		let root = temp_world("file-storage-unknown");
		let storage = FileStorage::new(root.clone());
		let coordinate = Point3::new(0, 0, 0);
		storage.save(&coordinate, &sample(&context(&["stone", "dirt"]))).unwrap();
		assert!(storage.try_load(&coordinate, &context(&["stone"])).is_err());
		let _ = std::fs::remove_dir_all(&root);
	}
}
