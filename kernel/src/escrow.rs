//! Genesis escrow: a kernel-internal resale marketplace.
//!
//! **[EXPANSION]** — spec.md does not name this module, but
//! `original_source/tests/integration/test_escrow_acceptance.py` exercises
//! a `GenesisEscrow` genesis artifact whose source file itself was not kept
//! in the retrieval pack; that test file is this module's grounding and
//! behavioral contract. A seller first transfers an artifact's control to
//! the reserved `genesis_escrow` principal (the existing `transfer`
//! intent), then deposits a listing naming a price and, optionally, a
//! single permitted buyer. `purchase` moves scrip and ownership together;
//! `cancel` returns the artifact to its seller.

use std::collections::BTreeMap;

use agency_shared::{ArtifactId, KernelError, PrincipalId};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactStore;
use crate::ledger::Ledger;

/// Reserved principal id artifacts must be transferred to before they can
/// be deposited into a listing.
pub const ESCROW_PRINCIPAL: &str = "genesis_escrow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub artifact_id: String,
    pub seller: String,
    pub price: u64,
    pub restricted_buyer: Option<String>,
    pub status: ListingStatus,
}

#[derive(Debug, Default)]
pub struct EscrowRegistry {
    listings: BTreeMap<ArtifactId, Listing>,
}

impl EscrowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lists `artifact_id` at `price`. The artifact must already be
    /// controlled by [`ESCROW_PRINCIPAL`] — the caller transfers it there
    /// with a plain `transfer` intent (price 0) before depositing.
    pub fn deposit(
        &mut self,
        store: &ArtifactStore,
        artifact_id: &ArtifactId,
        seller: &PrincipalId,
        price: u64,
        restricted_buyer: Option<PrincipalId>,
    ) -> Result<(), KernelError> {
        let artifact = store
            .get_raw(artifact_id)
            .ok_or_else(|| KernelError::ArtifactNotFound {
                id: artifact_id.as_str().to_string(),
            })?;
        if artifact.controller().as_str() != ESCROW_PRINCIPAL {
            return Err(KernelError::PermissionDenied {
                reason: format!("{} is not held by escrow", artifact_id.as_str()),
            });
        }
        self.listings.insert(
            artifact_id.clone(),
            Listing {
                artifact_id: artifact_id.as_str().to_string(),
                seller: seller.as_str().to_string(),
                price,
                restricted_buyer: restricted_buyer.map(|b| b.as_str().to_string()),
                status: ListingStatus::Active,
            },
        );
        Ok(())
    }

    /// Verifies feasibility — active listing, not the seller, buyer
    /// permitted, funds available — before moving anything.
    pub fn purchase(
        &mut self,
        store: &mut ArtifactStore,
        ledger: &mut Ledger,
        artifact_id: &ArtifactId,
        buyer: &PrincipalId,
    ) -> Result<u64, KernelError> {
        let listing = self
            .listings
            .get(artifact_id)
            .ok_or_else(|| KernelError::ListingNotFound {
                id: artifact_id.as_str().to_string(),
            })?;
        if listing.status != ListingStatus::Active {
            return Err(KernelError::PermissionDenied {
                reason: "listing is not active".to_string(),
            });
        }
        if listing.seller == buyer.as_str() {
            return Err(KernelError::PermissionDenied {
                reason: "seller cannot purchase their own listing".to_string(),
            });
        }
        if let Some(restricted) = &listing.restricted_buyer {
            if restricted != buyer.as_str() {
                return Err(KernelError::PermissionDenied {
                    reason: "listing is restricted to another buyer".to_string(),
                });
            }
        }
        let seller = PrincipalId::new(listing.seller.clone());
        let price = listing.price;

        ledger.transfer(buyer, &seller, price)?;
        store.transfer_ownership(artifact_id, buyer)?;
        self.listings.get_mut(artifact_id).unwrap().status = ListingStatus::Completed;
        Ok(price)
    }

    pub fn cancel(
        &mut self,
        store: &mut ArtifactStore,
        artifact_id: &ArtifactId,
        caller: &PrincipalId,
    ) -> Result<(), KernelError> {
        let listing = self
            .listings
            .get(artifact_id)
            .ok_or_else(|| KernelError::ListingNotFound {
                id: artifact_id.as_str().to_string(),
            })?;
        if listing.status != ListingStatus::Active {
            return Err(KernelError::PermissionDenied {
                reason: "listing is not active".to_string(),
            });
        }
        if listing.seller != caller.as_str() {
            return Err(KernelError::PermissionDenied {
                reason: "only the seller may cancel a listing".to_string(),
            });
        }
        let seller = PrincipalId::new(listing.seller.clone());
        store.transfer_ownership(artifact_id, &seller)?;
        self.listings.get_mut(artifact_id).unwrap().status = ListingStatus::Cancelled;
        Ok(())
    }

    pub fn get(&self, artifact_id: &ArtifactId) -> Option<&Listing> {
        self.listings.get(artifact_id)
    }

    pub fn snapshot(&self) -> Vec<Listing> {
        self.listings.values().cloned().collect()
    }

    pub fn restore(&mut self, listings: Vec<Listing>) {
        self.listings = listings
            .into_iter()
            .map(|l| (ArtifactId::new(l.artifact_id.clone()), l))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::WriteParams;
    use crate::config::KernelConfig;
    use serde_json::Value;

    fn listed(store: &mut ArtifactStore, escrow: &mut EscrowRegistry, price: u64) {
        store
            .write(WriteParams {
                id: ArtifactId::new("x1"),
                kind: "data".to_string(),
                content: Value::String("valuable".to_string()),
                created_by: PrincipalId::new("seller"),
                caller: PrincipalId::new("seller"),
                by_kernel: true,
                ..Default::default()
            })
            .unwrap();
        store
            .transfer_ownership(&ArtifactId::new("x1"), &PrincipalId::new(ESCROW_PRINCIPAL))
            .unwrap();
        escrow
            .deposit(store, &ArtifactId::new("x1"), &PrincipalId::new("seller"), price, None)
            .unwrap();
    }

    #[test]
    fn purchase_moves_scrip_and_ownership_together() {
        let config = KernelConfig::default();
        let mut store = ArtifactStore::new(config);
        let mut ledger = Ledger::new();
        ledger.credit(&PrincipalId::new("seller"), 100);
        ledger.credit(&PrincipalId::new("buyer"), 150);
        let mut escrow = EscrowRegistry::new();
        listed(&mut store, &mut escrow, 30);

        let price = escrow
            .purchase(&mut store, &mut ledger, &ArtifactId::new("x1"), &PrincipalId::new("buyer"))
            .unwrap();
        assert_eq!(price, 30);
        assert_eq!(ledger.balance(&PrincipalId::new("seller")), 130);
        assert_eq!(ledger.balance(&PrincipalId::new("buyer")), 120);
        assert_eq!(
            store.get_raw(&ArtifactId::new("x1")).unwrap().controller(),
            PrincipalId::new("buyer")
        );
        assert_eq!(escrow.get(&ArtifactId::new("x1")).unwrap().status, ListingStatus::Completed);
    }

    #[test]
    fn purchase_rejects_insufficient_funds_without_moving_ownership() {
        let config = KernelConfig::default();
        let mut store = ArtifactStore::new(config);
        let mut ledger = Ledger::new();
        ledger.credit(&PrincipalId::new("seller"), 100);
        ledger.credit(&PrincipalId::new("poor_buyer"), 10);
        let mut escrow = EscrowRegistry::new();
        listed(&mut store, &mut escrow, 100);

        let err = escrow
            .purchase(&mut store, &mut ledger, &ArtifactId::new("x1"), &PrincipalId::new("poor_buyer"))
            .unwrap_err();
        assert_eq!(err.code(), "insufficient_funds");
        assert_eq!(
            store.get_raw(&ArtifactId::new("x1")).unwrap().controller().as_str(),
            ESCROW_PRINCIPAL
        );
        assert_eq!(escrow.get(&ArtifactId::new("x1")).unwrap().status, ListingStatus::Active);
    }

    #[test]
    fn cancel_then_relist_succeeds() {
        let config = KernelConfig::default();
        let mut store = ArtifactStore::new(config);
        let mut escrow = EscrowRegistry::new();
        listed(&mut store, &mut escrow, 50);

        escrow.cancel(&mut store, &ArtifactId::new("x1"), &PrincipalId::new("seller")).unwrap();
        assert_eq!(
            store.get_raw(&ArtifactId::new("x1")).unwrap().controller(),
            PrincipalId::new("seller")
        );

        store
            .transfer_ownership(&ArtifactId::new("x1"), &PrincipalId::new(ESCROW_PRINCIPAL))
            .unwrap();
        escrow
            .deposit(&store, &ArtifactId::new("x1"), &PrincipalId::new("seller"), 75, None)
            .unwrap();
        assert_eq!(escrow.get(&ArtifactId::new("x1")).unwrap().price, 75);
    }

    #[test]
    fn restricted_buyer_listing_rejects_other_buyers() {
        let config = KernelConfig::default();
        let mut store = ArtifactStore::new(config);
        let mut ledger = Ledger::new();
        ledger.credit(&PrincipalId::new("seller"), 0);
        ledger.credit(&PrincipalId::new("buyer"), 100);
        ledger.credit(&PrincipalId::new("restricted_buyer"), 100);
        let mut escrow = EscrowRegistry::new();
        store
            .write(WriteParams {
                id: ArtifactId::new("x1"),
                kind: "data".to_string(),
                created_by: PrincipalId::new("seller"),
                caller: PrincipalId::new("seller"),
                by_kernel: true,
                ..Default::default()
            })
            .unwrap();
        store
            .transfer_ownership(&ArtifactId::new("x1"), &PrincipalId::new(ESCROW_PRINCIPAL))
            .unwrap();
        escrow
            .deposit(
                &store,
                &ArtifactId::new("x1"),
                &PrincipalId::new("seller"),
                50,
                Some(PrincipalId::new("restricted_buyer")),
            )
            .unwrap();

        let err = escrow
            .purchase(&mut store, &mut ledger, &ArtifactId::new("x1"), &PrincipalId::new("buyer"))
            .unwrap_err();
        assert_eq!(err.category(), agency_shared::ErrorCategory::Permission);

        escrow
            .purchase(&mut store, &mut ledger, &ArtifactId::new("x1"), &PrincipalId::new("restricted_buyer"))
            .unwrap();
    }
}
