pub mod accumulator;
pub mod classifier;
pub mod clock;
pub mod retention;
pub mod traffic;

pub use accumulator::{Accumulator, Cycle};
pub use classifier::CidrClassifier;
pub use clock::{Clock, SystemClock};
