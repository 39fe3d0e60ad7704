mod sweep;

pub use sweep::{SweepLoop, SweepLoopHandle, spawn_sweepers};
