//! Paletted chunk storage and anchor-driven chunk residency for voxel worlds.
//!
//! A world is split into 16x16x16 chunks. The cells of each chunk are stored as
//! [`GlobalId`](block::GlobalId)s in a [`PalettedVolume`](world::chunk::palette::PalettedVolume),
//! which packs them into as few bits as the chunk needs, recycling buffers through a shared
//! [`BufferPool`](world::chunk::palette::BufferPool).
//!
//! Which chunks are resident is decided by [`Anchor`](world::chunk::Anchor)s registered with a
//! [`ChunkMap`](world::chunk::ChunkMap). The map requests missing chunks from a pool of worker threads
//! (the [`Provider`](world::chunk::thread::Provider)), which load them from
//! [`Storage`](world::Storage) or fill them with a [`Generator`](world::Generator),
//! and unloads chunks once no anchor needs them.
//!
//! Library Notes:
//! - [log](https://crates.io/crates/log) for logging; the library never installs a logger
//! - [profiling](https://crates.io/crates/profiling), enable the `profile` feature to capture with tracy
//! - [crossbeam-channel](https://crates.io/crates/crossbeam-channel) for the request & result queues of the workers

pub use nalgebra;

pub mod block;
pub mod world;

mod utility;
