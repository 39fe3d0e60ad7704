mod procfs;
mod source;

pub use procfs::{ProcConntrack, parse_line};
pub use source::ConnectionSource;
