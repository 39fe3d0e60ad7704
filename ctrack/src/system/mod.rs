pub mod checks;
pub mod iface;

pub use checks::*;
pub use iface::*;
