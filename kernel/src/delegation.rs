//! Charge delegation: who may charge whom, for how much, within what
//! rolling window.
//!
//! Grounded in `original_source/src/world/delegation.py`: `DelegationEntry`
//! and `ChargeRecord` field shapes, the ephemeral per-(payer,charger)
//! history deque bounded by `_DEFAULT_MAX_ENTRIES_PER_PAIR = 1000` (FM-5).
//! Payer resolution (FM-2) departs from the original's own
//! `resolve_payer`, which reads `authorized_principal`/`authorized_writer`
//! metadata that nothing reserves at write time — `test_delegation.py`'s
//! `test_payer_resolution_ignores_forgeable_metadata` is the actual
//! contract, so `resolve_payer` here always falls back to `created_by`.

use std::collections::{BTreeMap, VecDeque};

use agency_shared::{ArtifactId, KernelError, PrincipalId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifact::{Artifact, ArtifactStore, WriteParams};
use crate::config::KernelConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelegationEntry {
    pub charger_id: String,
    #[serde(default)]
    pub max_per_call: Option<u64>,
    #[serde(default)]
    pub max_per_window: Option<u64>,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: i64,
    #[serde(default)]
    pub expires_at: Option<String>,
}

fn default_window_seconds() -> i64 {
    agency_shared::DEFAULT_WINDOW_SECONDS
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ChargeRecord {
    timestamp: i64,
    amount: u64,
}

/// Where a `charge_to` target resolves to a payer. `Caller` always
/// resolves to the caller; `Target` resolves to the artifact's
/// `created_by`, never its metadata (FM-2).
pub enum ChargeTarget<'a> {
    Caller,
    Target(&'a Artifact),
    Pool(&'a str),
}

pub struct DelegationManager {
    /// Ephemeral, per-(payer, charger) charge history. Reset on restart is
    /// acceptable: windows are not cumulative (§9 scheduler semantics).
    history: BTreeMap<(PrincipalId, PrincipalId), VecDeque<ChargeRecord>>,
    max_history: usize,
}

impl DelegationManager {
    pub fn new(config: &KernelConfig) -> Self {
        Self {
            history: BTreeMap::new(),
            max_history: config.max_charge_history,
        }
    }

    fn delegation_artifact_id(payer: &PrincipalId) -> ArtifactId {
        ArtifactId::new(format!("charge_delegation:{}", payer.as_str()))
    }

    fn read_entries(store: &ArtifactStore, payer: &PrincipalId) -> Vec<DelegationEntry> {
        store
            .get_raw(&Self::delegation_artifact_id(payer))
            .and_then(|a| serde_json::from_value::<Vec<DelegationEntry>>(a.content.clone()).ok())
            .unwrap_or_default()
    }

    /// May only be called by the payer themselves. Creates or upserts
    /// `charge_delegation:{payer}` as a kernel-protected, private-contract
    /// artifact via the kernel-only mutation path.
    pub fn grant(
        &mut self,
        store: &mut ArtifactStore,
        payer: &PrincipalId,
        charger: &PrincipalId,
        max_per_call: Option<u64>,
        max_per_window: Option<u64>,
        window_seconds: i64,
        expires_at: Option<String>,
    ) -> Result<(), KernelError> {
        let id = Self::delegation_artifact_id(payer);
        let entry = DelegationEntry {
            charger_id: charger.as_str().to_string(),
            max_per_call,
            max_per_window,
            window_seconds,
            expires_at,
        };

        if store.exists(&id) {
            let mut entries = Self::read_entries(store, payer);
            entries.retain(|e| e.charger_id != entry.charger_id);
            entries.push(entry);
            store.modify_protected_content(
                &id,
                Some(serde_json::to_value(&entries).expect("entries serialize")),
                None,
                None,
            )
        } else {
            let artifact = Artifact {
                id: id.clone(),
                kind: "charge_delegation".to_string(),
                content: serde_json::to_value(vec![entry]).expect("entry serializes"),
                code: String::new(),
                executable: false,
                created_by: payer.clone(),
                created_at: Timestamp::now(),
                updated_at: Timestamp::now(),
                access_contract_id: "private".to_string(),
                policy: Default::default(),
                metadata: Default::default(),
                depends_on: Vec::new(),
                has_standing: false,
                can_execute: false,
                deleted: false,
                deleted_at: None,
                deleted_by: None,
                kernel_protected: true,
                interface: None,
                content_digest: agency_shared::ContentDigest::compute(&[b""]),
            };
            store.create_protected(artifact);
            Ok(())
        }
    }

    /// Removes the entry for `charger`; returns false if none existed.
    pub fn revoke(
        &mut self,
        store: &mut ArtifactStore,
        payer: &PrincipalId,
        charger: &PrincipalId,
    ) -> Result<bool, KernelError> {
        let id = Self::delegation_artifact_id(payer);
        if !store.exists(&id) {
            return Ok(false);
        }
        let mut entries = Self::read_entries(store, payer);
        let before = entries.len();
        entries.retain(|e| e.charger_id != charger.as_str());
        let removed = entries.len() != before;
        if removed {
            store.modify_protected_content(
                &id,
                Some(serde_json::to_value(&entries).expect("entries serialize")),
                None,
                None,
            )?;
            self.history.remove(&(payer.clone(), charger.clone()));
        }
        Ok(removed)
    }

    fn find_entry(
        store: &ArtifactStore,
        payer: &PrincipalId,
        charger: &PrincipalId,
    ) -> Option<DelegationEntry> {
        Self::read_entries(store, payer)
            .into_iter()
            .find(|e| e.charger_id == charger.as_str())
    }

    /// Checks existence, expiry, `max_per_call`, and rolling-window
    /// cumulative usage. Does not mutate history; call `record_charge`
    /// after the charge actually applies.
    pub fn authorize_charge(
        &self,
        store: &ArtifactStore,
        charger: &PrincipalId,
        payer: &PrincipalId,
        amount: u64,
    ) -> Result<(), KernelError> {
        let entry = Self::find_entry(store, payer, charger).ok_or_else(|| {
            KernelError::DelegationNotFound {
                payer: payer.as_str().to_string(),
                charger: charger.as_str().to_string(),
            }
        })?;

        if let Some(expires_at) = &entry.expires_at {
            if let Ok(expiry) = Timestamp::parse(expires_at) {
                if Timestamp::now().unix_seconds() >= expiry.unix_seconds() {
                    return Err(KernelError::DelegationExpired {
                        payer: payer.as_str().to_string(),
                        charger: charger.as_str().to_string(),
                    });
                }
            }
        }

        if let Some(max_per_call) = entry.max_per_call {
            if amount > max_per_call {
                return Err(KernelError::RateLimitExceeded {
                    payer: payer.as_str().to_string(),
                    charger: charger.as_str().to_string(),
                });
            }
        }

        if let Some(max_per_window) = entry.max_per_window {
            let window_start = Timestamp::now().unix_seconds() - entry.window_seconds;
            let used: u64 = self
                .history
                .get(&(payer.clone(), charger.clone()))
                .into_iter()
                .flatten()
                .filter(|r| r.timestamp >= window_start)
                .map(|r| r.amount)
                .sum();
            if used + amount > max_per_window {
                return Err(KernelError::RateLimitExceeded {
                    payer: payer.as_str().to_string(),
                    charger: charger.as_str().to_string(),
                });
            }
        }

        Ok(())
    }

    /// Appends to the in-memory history window, pruned by window deadline
    /// and bounded by `max_history` most-recent entries (FM-5).
    pub fn record_charge(&mut self, payer: &PrincipalId, charger: &PrincipalId, amount: u64) {
        let key = (payer.clone(), charger.clone());
        let entry = self.history.entry(key).or_default();
        entry.push_back(ChargeRecord {
            timestamp: Timestamp::now().unix_seconds(),
            amount,
        });
        while entry.len() > self.max_history {
            entry.pop_front();
        }
    }

    /// `caller` returns caller; `target` resolves to the artifact's
    /// `created_by`; `pool:X` resolves to the pool id after the prefix.
    /// FM-2: `authorized_principal`/`authorized_writer` metadata is never
    /// consulted here — `write_artifact` places no restriction on who sets
    /// those keys, so trusting them would let any writer redirect charges
    /// to an arbitrary victim. `created_by` is the only field the kernel
    /// itself assigns at creation and cannot be forged by a later write.
    pub fn resolve_payer(
        &self,
        caller: &PrincipalId,
        target: ChargeTarget<'_>,
    ) -> Result<PrincipalId, KernelError> {
        match target {
            ChargeTarget::Caller => Ok(caller.clone()),
            ChargeTarget::Pool(p) => Ok(PrincipalId::new(p)),
            ChargeTarget::Target(artifact) => Ok(artifact.created_by.clone()),
        }
    }

    pub fn snapshot(&self) -> DelegationSnapshot {
        DelegationSnapshot {
            history: self
                .history
                .iter()
                .map(|((p, c), records)| {
                    (
                        format!("{}\u{1}{}", p.as_str(), c.as_str()),
                        records.iter().cloned().map(Into::into).collect(),
                    )
                })
                .collect(),
        }
    }

    pub fn restore(&mut self, snapshot: DelegationSnapshot) {
        self.history.clear();
        for (key, records) in snapshot.history {
            if let Some((p, c)) = key.split_once('\u{1}') {
                self.history.insert(
                    (PrincipalId::new(p), PrincipalId::new(c)),
                    records.into_iter().map(Into::into).collect(),
                );
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelegationSnapshot {
    history: BTreeMap<String, Vec<ChargeRecordSnapshot>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChargeRecordSnapshot {
    timestamp: i64,
    amount: u64,
}

impl From<ChargeRecord> for ChargeRecordSnapshot {
    fn from(r: ChargeRecord) -> Self {
        Self {
            timestamp: r.timestamp,
            amount: r.amount,
        }
    }
}

impl From<ChargeRecordSnapshot> for ChargeRecord {
    fn from(r: ChargeRecordSnapshot) -> Self {
        Self {
            timestamp: r.timestamp,
            amount: r.amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;

    fn setup() -> (ArtifactStore, DelegationManager, PrincipalId, PrincipalId) {
        let config = KernelConfig::default();
        let store = ArtifactStore::new(config.clone());
        let manager = DelegationManager::new(&config);
        (store, manager, PrincipalId::new("alice"), PrincipalId::new("bob"))
    }

    #[test]
    fn grant_then_authorize_within_limits_succeeds() {
        let (mut store, mut mgr, alice, bob) = setup();
        mgr.grant(&mut store, &alice, &bob, Some(10), Some(15), 60, None)
            .unwrap();
        mgr.authorize_charge(&store, &bob, &alice, 10).unwrap();
        mgr.record_charge(&alice, &bob, 10);
        let err = mgr.authorize_charge(&store, &bob, &alice, 10).unwrap_err();
        assert_eq!(err.code(), "rate_limit_exceeded");
    }

    #[test]
    fn revoke_then_authorize_fails_with_no_delegation() {
        let (mut store, mut mgr, alice, bob) = setup();
        mgr.grant(&mut store, &alice, &bob, None, None, 60, None)
            .unwrap();
        assert!(mgr.revoke(&mut store, &alice, &bob).unwrap());
        let err = mgr.authorize_charge(&store, &bob, &alice, 1).unwrap_err();
        assert_eq!(err.code(), "delegation_not_found");
    }

    #[test]
    fn max_per_call_boundary() {
        let (mut store, mgr, alice, bob) = setup();
        let mut mgr = mgr;
        mgr.grant(&mut store, &alice, &bob, Some(10), None, 60, None)
            .unwrap();
        mgr.authorize_charge(&store, &bob, &alice, 10).unwrap();
        let err = mgr.authorize_charge(&store, &bob, &alice, 11).unwrap_err();
        assert_eq!(err.code(), "rate_limit_exceeded");
    }

    #[test]
    fn resolve_payer_ignores_forgeable_metadata() {
        let (mut store, mgr, alice, _bob) = setup();
        use crate::artifact::WriteParams;
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert(
            "authorized_principal".to_string(),
            Value::String("rich_victim".to_string()),
        );
        // An ordinary write_artifact intent can set authorized_principal to
        // anyone; resolve_payer must not be swayed by it and charges the
        // artifact's real created_by instead.
        store
            .write(WriteParams {
                id: ArtifactId::new("target"),
                kind: "data".to_string(),
                content: serde_json::json!({}),
                created_by: alice.clone(),
                caller: alice.clone(),
                metadata,
                by_kernel: true,
                ..Default::default()
            })
            .unwrap();
        let artifact = store.get_raw(&ArtifactId::new("target")).unwrap();
        let resolved = mgr
            .resolve_payer(&alice, ChargeTarget::Target(artifact))
            .unwrap();
        assert_eq!(resolved.as_str(), "alice");
        assert_ne!(resolved.as_str(), "rich_victim");
    }
}
