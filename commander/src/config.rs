//! Rollup batching configuration.

use std::path::Path;

use anyhow::{Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
    mempool::DEFAULT_INGEST_CAPACITY,
    state::{StateId, tree::DEFAULT_STATE_TREE_DEPTH},
};

/// Quotas and parties of commitment and batch building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollupConfig {
    pub min_txs_per_commitment: usize,
    pub max_txs_per_commitment: usize,
    pub min_commitments_per_batch: usize,
    pub max_commitments_per_batch: usize,
    /// Once the oldest pending transaction has waited this long, the minimums
    /// drop to one so it is not starved by low traffic
    pub max_txn_delay_secs: u64,
    /// Leaf credited with commitment fees
    pub fee_receiver_state_id: StateId,
    /// Pending transactions loaded into the mempool at startup
    pub pending_txs_limit: usize,
    pub ingest_queue_capacity: usize,
    /// Depth the account tree must have
    pub state_tree_depth: u8,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            min_txs_per_commitment: 1,
            max_txs_per_commitment: 32,
            min_commitments_per_batch: 1,
            max_commitments_per_batch: 32,
            max_txn_delay_secs: 30 * 60,
            fee_receiver_state_id: 0,
            pending_txs_limit: 10_000,
            ingest_queue_capacity: DEFAULT_INGEST_CAPACITY,
            state_tree_depth: DEFAULT_STATE_TREE_DEPTH,
        }
    }
}

impl RollupConfig {
    /// Load configuration from the `[rollup]` section of a .toml file.
    ///
    /// Environment variables prefixed `COMMANDER_` override file values,
    /// with `__` separating sections, e.g.
    /// `COMMANDER_ROLLUP__MAX_TXS_PER_COMMITMENT=64`.
    ///
    /// # Example config (TOML)
    /// ```toml
    /// [rollup]
    /// min_txs_per_commitment = 1
    /// max_txs_per_commitment = 32
    /// min_commitments_per_batch = 1
    /// max_commitments_per_batch = 32
    /// max_txn_delay_secs = 1800
    /// fee_receiver_state_id = 0
    /// ```
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => {}
            Some(ext) => bail!("Unsupported config file format: {ext}. Use .toml"),
            None => bail!("Config file must have a .toml extension"),
        }

        let config: RollupConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("COMMANDER_").split("__"))
            .extract_inner("rollup")
            .map_err(anyhow::Error::msg)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_txs_per_commitment == 0 || self.max_commitments_per_batch == 0 {
            bail!("per-commitment and per-batch maxima must be positive");
        }
        if self.min_txs_per_commitment > self.max_txs_per_commitment {
            bail!(
                "min_txs_per_commitment ({}) exceeds max_txs_per_commitment ({})",
                self.min_txs_per_commitment,
                self.max_txs_per_commitment
            );
        }
        if self.min_commitments_per_batch > self.max_commitments_per_batch {
            bail!(
                "min_commitments_per_batch ({}) exceeds max_commitments_per_batch ({})",
                self.min_commitments_per_batch,
                self.max_commitments_per_batch
            );
        }
        if self.state_tree_depth == 0 || self.state_tree_depth > DEFAULT_STATE_TREE_DEPTH {
            bail!(
                "state_tree_depth must be within 1..={DEFAULT_STATE_TREE_DEPTH}, got {}",
                self.state_tree_depth
            );
        }
        // commitment indices are stored as u8
        if self.max_commitments_per_batch > u8::MAX as usize + 1 {
            bail!("at most 256 commitments fit in a batch");
        }
        Ok(())
    }
}
