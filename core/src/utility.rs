use std::thread::JoinHandle;

/// Spawns a named thread, logging to `log` if its work returns an error.
pub fn spawn_thread<F>(log: &'static str, name: String, work: F) -> std::io::Result<JoinHandle<()>>
where
	F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
	std::thread::Builder::new()
		.name(name.clone())
		.spawn(move || {
			if let Err(error) = work() {
				log::error!(target: log, "Thread {} failed: {:?}", name, error);
			}
		})
}
