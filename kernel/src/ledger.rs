//! Scrip balances and resource quotas.
//!
//! Grounded in the teacher's `state_tree.rs` `ActorState::deduct_funds` /
//! `deposit_funds` pair (checked arithmetic, never going negative) but
//! flattened into two plain maps rather than a Merkle-backed actor tree,
//! since the kernel has no consensus layer to root state against.

use std::collections::BTreeMap;

use agency_shared::{ErrorCategory, KernelError, PrincipalId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub balances: BTreeMap<String, u64>,
    pub resources: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(default)]
    pub standing: std::collections::BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct Ledger {
    balances: BTreeMap<PrincipalId, u64>,
    resources: BTreeMap<PrincipalId, BTreeMap<String, f64>>,
    /// Principals with standing, used for UBI distribution membership.
    standing: std::collections::BTreeSet<PrincipalId>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_principal(&mut self, principal: &PrincipalId, has_standing: bool) {
        self.balances.entry(principal.clone()).or_insert(0);
        if has_standing {
            self.standing.insert(principal.clone());
        } else {
            self.standing.remove(principal);
        }
    }

    pub fn balance(&self, principal: &PrincipalId) -> u64 {
        self.balances.get(principal).copied().unwrap_or(0)
    }

    pub fn credit(&mut self, principal: &PrincipalId, amount: u64) {
        *self.balances.entry(principal.clone()).or_insert(0) += amount;
    }

    pub fn debit(&mut self, principal: &PrincipalId, amount: u64) -> Result<(), KernelError> {
        let balance = self.balances.entry(principal.clone()).or_insert(0);
        if *balance < amount {
            return Err(KernelError::InsufficientFunds {
                needed: amount as f64,
                available: *balance as f64,
            });
        }
        *balance -= amount;
        Ok(())
    }

    pub fn can_afford(&self, principal: &PrincipalId, amount: u64) -> bool {
        self.balance(principal) >= amount
    }

    /// All-or-nothing pair: verify feasibility, then apply.
    pub fn transfer(
        &mut self,
        from: &PrincipalId,
        to: &PrincipalId,
        amount: u64,
    ) -> Result<(), KernelError> {
        if !self.can_afford(from, amount) {
            return Err(KernelError::InsufficientFunds {
                needed: amount as f64,
                available: self.balance(from) as f64,
            });
        }
        self.debit(from, amount)?;
        self.credit(to, amount);
        Ok(())
    }

    pub fn resource(&self, principal: &PrincipalId, resource: &str) -> f64 {
        self.resources
            .get(principal)
            .and_then(|r| r.get(resource))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn set_resource(&mut self, principal: &PrincipalId, resource: &str, amount: f64) {
        self.resources
            .entry(principal.clone())
            .or_default()
            .insert(resource.to_string(), amount);
    }

    pub fn deduct_resource(
        &mut self,
        principal: &PrincipalId,
        resource: &str,
        amount: f64,
    ) -> Result<(), KernelError> {
        let current = self.resource(principal, resource);
        if current < amount {
            return Err(KernelError::InsufficientResources {
                needed: amount,
                available: current,
            });
        }
        self.set_resource(principal, resource, current - amount);
        Ok(())
    }

    pub fn credit_resource(&mut self, principal: &PrincipalId, resource: &str, amount: f64) {
        let current = self.resource(principal, resource);
        self.set_resource(principal, resource, current + amount);
    }

    /// Divide `amount` evenly among all principals with standing except
    /// `exclude`. The remainder of an uneven split accrues to `sink`.
    /// Returns the per-principal shares actually credited.
    pub fn distribute_ubi(
        &mut self,
        amount: u64,
        exclude: &PrincipalId,
        sink: &PrincipalId,
    ) -> BTreeMap<PrincipalId, u64> {
        let recipients: Vec<PrincipalId> = self
            .standing
            .iter()
            .filter(|p| *p != exclude)
            .cloned()
            .collect();
        let mut shares = BTreeMap::new();
        if recipients.is_empty() {
            if amount > 0 {
                self.credit(sink, amount);
            }
            return shares;
        }
        let share = amount / recipients.len() as u64;
        let remainder = amount % recipients.len() as u64;
        for principal in &recipients {
            if share > 0 {
                self.credit(principal, share);
            }
            shares.insert(principal.clone(), share);
        }
        if remainder > 0 {
            self.credit(sink, remainder);
        }
        shares
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            balances: self
                .balances
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), *v))
                .collect(),
            resources: self
                .resources
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                .collect(),
            standing: self.standing.iter().map(|p| p.as_str().to_string()).collect(),
        }
    }

    pub fn restore(&mut self, snapshot: LedgerSnapshot) {
        self.balances = snapshot
            .balances
            .into_iter()
            .map(|(k, v)| (PrincipalId::new(k), v))
            .collect();
        self.resources = snapshot
            .resources
            .into_iter()
            .map(|(k, v)| (PrincipalId::new(k), v))
            .collect();
        self.standing = snapshot.standing.into_iter().map(PrincipalId::new).collect();
    }
}

#[allow(dead_code)]
fn _assert_category(err: &KernelError) -> ErrorCategory {
    err.category()
}
