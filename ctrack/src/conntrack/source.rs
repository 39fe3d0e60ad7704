use anyhow::Result;
use ctrack_common::types::Conn;

/// Supplies the kernel connection tracking table, read once per scrape
pub trait ConnectionSource: Send + Sync {
    fn list(&self) -> Result<Vec<Conn>>;
}
