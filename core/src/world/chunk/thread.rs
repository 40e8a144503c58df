use crate::{
	utility::spawn_thread,
	world::{
		chunk::{
			palette::{Context, PalettedVolume},
			Chunk,
		},
		database::Storage,
		generator::Generator,
		Settings,
	},
};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use nalgebra::Point3;
use std::{
	panic::AssertUnwindSafe,
	sync::Arc,
	thread::JoinHandle,
};

/// The log category for the chunk provider workers.
static LOG: &'static str = "chunk-provider";

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error(
		"failed to generate chunk <{}, {}, {}>",
		.coordinate.x,
		.coordinate.y,
		.coordinate.z
	)]
	Generation {
		coordinate: Point3<i64>,
		source: anyhow::Error,
	},
	#[error(
		"worker panicked populating chunk <{}, {}, {}>: {message}",
		.coordinate.x,
		.coordinate.y,
		.coordinate.z
	)]
	Panicked {
		coordinate: Point3<i64>,
		message: String,
	},
	#[error("the chunk provider has stopped")]
	Stopped,
	#[error("failed to spawn a chunk provider worker")]
	Spawn(#[from] std::io::Error),
}

/// The outcome of populating a requested chunk coordinate.
pub struct Completed<V> {
	pub coordinate: Point3<i64>,
	pub outcome: Result<Chunk<V>, Error>,
}

/// A pool of worker threads which populate requested chunks,
/// loading them from [`Storage`] if they were saved, or from a [`Generator`] otherwise.
///
/// Every worker pulls from the one request channel, and pushes to the one result channel,
/// so results can come back in any order.
pub struct Provider<V> {
	context: Context<V>,
	storage: Arc<dyn Storage<V>>,
	send_requests: Option<Sender<Point3<i64>>>,
	/// Held so requests are accepted even while no worker exists to take them.
	recv_requests: Receiver<Point3<i64>>,
	recv_results: Receiver<Completed<V>>,
	workers: Vec<JoinHandle<()>>,
}

impl<V> Provider<V>
where
	V: 'static,
{
	pub fn new(
		settings: &Settings,
		context: Context<V>,
		storage: Arc<dyn Storage<V>>,
		generator: Arc<dyn Generator<V>>,
	) -> Result<Self, Error> {
		let (send_requests, recv_requests) = crossbeam_channel::unbounded();
		let (send_results, recv_results) = crossbeam_channel::unbounded();

		let mut workers = Vec::with_capacity(settings.worker_count);
		for index in 0..settings.worker_count {
			let requests = recv_requests.clone();
			let results = send_results.clone();
			let context = context.clone();
			let storage = storage.clone();
			let generator = generator.clone();
			workers.push(spawn_thread(
				LOG,
				format!("chunk-provider-{}", index),
				move || -> anyhow::Result<()> {
					log::info!(target: LOG, "Starting chunk provider worker {}", index);
					while let Ok(coordinate) = requests.recv() {
						let outcome = Self::populate(&coordinate, &context, &*storage, &*generator);
						results
							.send(Completed {
								coordinate,
								outcome,
							})
							.map_err(|_| Error::Stopped)?;
					}
					log::info!(target: LOG, "Ending chunk provider worker {}", index);
					Ok(())
				},
			)?);
		}

		Ok(Self {
			context,
			storage,
			send_requests: Some(send_requests),
			recv_requests,
			recv_results,
			workers,
		})
	}

	#[profiling::function]
	fn populate(
		coordinate: &Point3<i64>,
		context: &Context<V>,
		storage: &dyn Storage<V>,
		generator: &dyn Generator<V>,
	) -> Result<Chunk<V>, Error> {
		let attempt = std::panic::catch_unwind(AssertUnwindSafe(|| -> Result<Chunk<V>, Error> {
			match storage.try_load(coordinate, context) {
				Ok(Some(volume)) => return Ok(Chunk::loaded(*coordinate, volume)),
				Ok(None) => {}
				Err(error) => {
					log::warn!(
						target: LOG,
						"Failed to load chunk <{}, {}, {}>, it will be generated instead: {:?}",
						coordinate.x,
						coordinate.y,
						coordinate.z,
						error
					);
				}
			}

			let chunk_id = format!("<{}, {}, {}>", coordinate.x, coordinate.y, coordinate.z);
			profiling::scope!("generate-chunk", chunk_id.as_str());
			let mut volume = PalettedVolume::new(context);
			generator
				.generate(coordinate, &mut volume)
				.map_err(|source| Error::Generation {
					coordinate: *coordinate,
					source,
				})?;
			Ok(Chunk::generated(*coordinate, volume))
		}));
		match attempt {
			Ok(outcome) => outcome,
			Err(payload) => Err(Error::Panicked {
				coordinate: *coordinate,
				message: panic_message(payload.as_ref()),
			}),
		}
	}
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&'static str>() {
		message.to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"unknown panic".to_owned()
	}
}

impl<V> Provider<V> {
	/// Queues `coordinate` to be populated by the next free worker.
	pub fn request(&self, coordinate: Point3<i64>) -> Result<(), Error> {
		match &self.send_requests {
			Some(sender) => sender.send(coordinate).map_err(|_| Error::Stopped),
			None => Err(Error::Stopped),
		}
	}

	/// Returns the next completed chunk, if any worker has finished one.
	/// Errors once every worker has ended and all results have been taken.
	pub fn try_recv(&self) -> Result<Option<Completed<V>>, Error> {
		match self.recv_results.try_recv() {
			Ok(completed) => Ok(Some(completed)),
			Err(TryRecvError::Empty) => Ok(None),
			Err(TryRecvError::Disconnected) => Err(Error::Stopped),
		}
	}

	/// Blocks until a worker finishes a chunk.
	pub fn recv(&self) -> Result<Completed<V>, Error> {
		self.recv_results.recv().map_err(|_| Error::Stopped)
	}

	pub fn worker_count(&self) -> usize {
		self.workers.len()
	}

	pub fn is_stopped(&self) -> bool {
		self.send_requests.is_none()
	}

	pub fn storage(&self) -> &Arc<dyn Storage<V>> {
		&self.storage
	}

	pub fn context(&self) -> &Context<V> {
		&self.context
	}

	/// Takes every request which no worker has picked up yet.
	#[cfg(test)]
	pub(crate) fn take_requests(&self) -> Vec<Point3<i64>> {
		self.recv_requests.try_iter().collect()
	}

	/// Stops accepting requests, waits for every worker to finish its current chunk,
	/// and drops any results which were never received.
	pub fn stop(&mut self) {
		let sender = match self.send_requests.take() {
			Some(sender) => sender,
			None => return,
		};
		// Workers end once the request channel is both disconnected and empty.
		drop(sender);
		let abandoned = self.recv_requests.try_iter().count();
		for worker in self.workers.drain(..) {
			if worker.join().is_err() {
				log::error!(target: LOG, "A chunk provider worker failed to join");
			}
		}
		let dropped = self.recv_results.try_iter().count();
		log::info!(
			target: LOG,
			"Stopped chunk provider ({} requests abandoned, {} results dropped)",
			abandoned,
			dropped
		);
	}
}

impl<V> Drop for Provider<V> {
	fn drop(&mut self) {
		self.stop();
	}
}
