mod conntrack;
pub mod global;
mod schema;
mod server;

pub use conntrack::ConntrackCollector;
pub use schema::LabelSchema;
pub use server::{encode_text, serve};
