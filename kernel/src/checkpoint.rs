//! Whole-state checkpoint and restore. No durable commit log beyond the
//! event file; recovery is whole-state, not replay-from-events (§9 of the
//! original design note on crash recovery).

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::delegation::DelegationSnapshot;
use crate::escrow::Listing;
use crate::ledger::LedgerSnapshot;
use crate::mint_auction::MintAuctionSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub artifacts: Vec<Artifact>,
    pub ledger: LedgerSnapshot,
    pub mint_auction: MintAuctionSnapshot,
    pub delegation: DelegationSnapshot,
    #[serde(default)]
    pub escrow: Vec<Listing>,
    pub event_number: u64,
}

impl Checkpoint {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn write_to_file(&self, path: &std::path::Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_json()?)
    }

    pub fn read_from_file(path: &std::path::Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
