pub mod builder;
pub mod commander;
pub mod config;
pub mod disputer;
pub mod encoder;
pub mod executor;
pub mod logging;
pub mod mempool;
pub mod merkle;
pub mod state;
pub mod storage;
pub mod syncer;
pub mod traits;

#[cfg(test)]
mod tests;
