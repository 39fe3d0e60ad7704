pub mod consts;
mod errs;
pub mod net;
pub mod types;

pub use errs::CtrackErr;
