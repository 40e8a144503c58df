//! Chunk residency for a volumetric world: compact chunk storage,
//! the anchors which decide which chunks are resident, and how chunks are loaded, generated, and saved.

pub mod chunk;

pub mod database;
pub use database::{FileStorage, MemoryStorage, NoStorage, Storage};

pub mod generator;
pub use generator::Generator;

mod settings;
pub use settings::*;
