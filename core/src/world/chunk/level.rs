/// The possible levels a resident chunk could be held at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
	/// Within the radius of some anchor. Fully usable by the simulation.
	Active,
	/// Only in the outer shell of anchors. Loaded so neighbors of active chunks are available,
	/// but nothing should be simulated.
	Passive,
}

impl std::fmt::Display for Level {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Self::Active => write!(f, "Active"),
			Self::Passive => write!(f, "Passive"),
		}
	}
}
