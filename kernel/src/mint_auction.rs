//! Second-price periodic auction with an opaque quality scorer, escrowed
//! bids, and UBI redistribution of the price paid.
//!
//! Grounded in `original_source/src/world/mint_auction.py`: the winner
//! pays the second-highest bid (or the minimum of 1 if there was only one
//! submission), `scrip_minted = score / mint_ratio`, and refunds happen
//! regardless of whether scoring succeeds.

use agency_shared::{ArtifactId, KernelError, PrincipalId};
use agency_sandbox::Scorer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifact::ArtifactStore;
use crate::config::KernelConfig;
use crate::ledger::Ledger;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintSubmission {
    pub submission_id: String,
    pub principal_id: String,
    pub artifact_id: String,
    pub bid: u64,
    pub submitted_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintResolution {
    pub winner: Option<String>,
    pub price_paid: u64,
    pub score: Option<i64>,
    pub scrip_minted: u64,
    pub ubi_distribution: std::collections::BTreeMap<String, u64>,
    pub event_number: Option<u64>,
}

#[derive(Debug, Default)]
pub struct MintAuction {
    submissions: Vec<MintSubmission>,
    history: Vec<MintResolution>,
    max_history: usize,
}

impl MintAuction {
    pub fn new() -> Self {
        Self {
            submissions: Vec::new(),
            history: Vec::new(),
            max_history: 500,
        }
    }

    pub fn submit(
        &mut self,
        store: &ArtifactStore,
        ledger: &mut Ledger,
        principal: &PrincipalId,
        artifact_id: &ArtifactId,
        bid: u64,
    ) -> Result<String, KernelError> {
        let artifact = store.get_raw(artifact_id).ok_or_else(|| KernelError::ArtifactNotFound {
            id: artifact_id.as_str().to_string(),
        })?;
        if !artifact.executable {
            return Err(KernelError::InvalidArtifactType {
                kind: "not_executable".to_string(),
            });
        }
        if artifact.created_by != *principal {
            return Err(KernelError::PermissionDenied {
                reason: "only the owner may submit an artifact to the mint auction".to_string(),
            });
        }
        if bid == 0 {
            return Err(KernelError::InvalidIntent {
                reason: "bid must be positive".to_string(),
            });
        }
        if !ledger.can_afford(principal, bid) {
            return Err(KernelError::InsufficientFunds {
                needed: bid as f64,
                available: ledger.balance(principal) as f64,
            });
        }
        ledger.debit(principal, bid)?;
        let submission_id = format!("mint-sub-{}", self.submissions.len() + 1);
        self.submissions.push(MintSubmission {
            submission_id: submission_id.clone(),
            principal_id: principal.as_str().to_string(),
            artifact_id: artifact_id.as_str().to_string(),
            bid,
            submitted_at: agency_shared::Timestamp::now().to_iso_string(),
        });
        Ok(submission_id)
    }

    pub fn cancel(
        &mut self,
        ledger: &mut Ledger,
        principal: &PrincipalId,
        submission_id: &str,
    ) -> Result<(), KernelError> {
        let position = self
            .submissions
            .iter()
            .position(|s| s.submission_id == submission_id && s.principal_id == principal.as_str())
            .ok_or_else(|| KernelError::ArtifactNotFound {
                id: submission_id.to_string(),
            })?;
        let submission = self.submissions.remove(position);
        ledger.credit(principal, submission.bid);
        Ok(())
    }

    /// Resolves the auction: highest bidder wins (ties broken by
    /// submission order), pays the second-highest bid (or 1 if alone),
    /// scores the winning artifact, mints `score / mint_ratio`, and
    /// distributes the price paid as UBI. All effects apply atomically;
    /// if scoring fails, no mint happens but refunds still occur.
    pub fn resolve(
        &mut self,
        store: &ArtifactStore,
        ledger: &mut Ledger,
        scorer: &dyn Scorer,
        config: &KernelConfig,
        event_number: u64,
    ) -> Result<MintResolution, KernelError> {
        if self.submissions.is_empty() {
            let resolution = MintResolution {
                winner: None,
                price_paid: 0,
                score: None,
                scrip_minted: 0,
                ubi_distribution: Default::default(),
                event_number: Some(event_number),
            };
            self.push_history(resolution.clone());
            return Ok(resolution);
        }

        let submissions = std::mem::take(&mut self.submissions);
        let mut sorted = submissions;
        sorted.sort_by(|a, b| b.bid.cmp(&a.bid));
        let winner = sorted[0].clone();
        let price_paid = if sorted.len() > 1 { sorted[1].bid } else { 1 };

        // Refund every non-winner their full bid.
        for submission in sorted.iter().skip(1) {
            ledger.credit(&PrincipalId::new(submission.principal_id.clone()), submission.bid);
        }
        // Refund the winner the difference between their bid and the
        // price paid (second-price).
        let refund = winner.bid.saturating_sub(price_paid);
        if refund > 0 {
            ledger.credit(&PrincipalId::new(winner.principal_id.clone()), refund);
        }

        let winner_principal = PrincipalId::new(winner.principal_id.clone());
        let artifact_id = ArtifactId::new(winner.artifact_id.clone());
        let artifact = store.get_raw(&artifact_id);

        let (score, scrip_minted) = match artifact {
            Some(a) => match scorer.score(artifact_id.as_str(), &a.kind, &a.content) {
                Ok(outcome) if outcome.success => {
                    let score = outcome.score.unwrap_or(0).clamp(0, config.scoring_max);
                    let minted = (score as f64 / config.mint_ratio).floor().max(0.0) as u64;
                    if minted > 0 {
                        ledger.credit(&winner_principal, minted);
                    }
                    (Some(score), minted)
                }
                _ => (None, 0),
            },
            None => (None, 0),
        };

        // price_paid distributed as UBI across all other principals with
        // standing; escrow is already debited from the winner at submit
        // time, so the ledger now credits `price_paid` outward from the
        // implicit escrow pool.
        let ubi_distribution = ledger.distribute_ubi(
            price_paid,
            &winner_principal,
            &PrincipalId::new(config.ubi_sink.clone()),
        );

        let resolution = MintResolution {
            winner: Some(winner.principal_id.clone()),
            price_paid,
            score,
            scrip_minted,
            ubi_distribution: ubi_distribution
                .into_iter()
                .map(|(k, v)| (k.as_str().to_string(), v))
                .collect(),
            event_number: Some(event_number),
        };
        self.push_history(resolution.clone());
        Ok(resolution)
    }

    fn push_history(&mut self, resolution: MintResolution) {
        self.history.push(resolution);
        if self.history.len() > self.max_history {
            let overflow = self.history.len() - self.max_history;
            self.history.drain(0..overflow);
        }
    }

    pub fn query_view(&self, history_limit: usize) -> Value {
        let history: Vec<_> = self
            .history
            .iter()
            .rev()
            .take(history_limit)
            .cloned()
            .collect();
        serde_json::json!({
            "open_submissions": self.submissions,
            "history": history,
        })
    }

    pub fn snapshot(&self) -> MintAuctionSnapshot {
        MintAuctionSnapshot {
            submissions: self.submissions.clone(),
            history: self.history.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: MintAuctionSnapshot) {
        self.submissions = snapshot.submissions;
        self.history = snapshot.history;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MintAuctionSnapshot {
    pub submissions: Vec<MintSubmission>,
    pub history: Vec<MintResolution>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::WriteParams;
    use agency_sandbox::mock::MockScorer;
    use agency_sandbox::ScoreOutcome;

    fn setup_artifact(store: &mut ArtifactStore, id: &str, owner: &str) {
        store
            .write(WriteParams {
                id: ArtifactId::new(id),
                kind: "executable".to_string(),
                content: Value::Null,
                code: "sum".to_string(),
                executable: true,
                created_by: PrincipalId::new(owner),
                caller: PrincipalId::new(owner),
                by_kernel: true,
                ..Default::default()
            })
            .unwrap();
    }

    #[test]
    fn second_price_auction_matches_scenario_s2() {
        let mut store = ArtifactStore::new(KernelConfig::default());
        let mut ledger = Ledger::new();
        let config = KernelConfig::default();

        for (p, b) in [("alice", "X1"), ("bob", "X2"), ("carol", "X3")] {
            setup_artifact(&mut store, b, p);
        }
        ledger.credit(&PrincipalId::new("alice"), 40);
        ledger.credit(&PrincipalId::new("bob"), 25);
        ledger.credit(&PrincipalId::new("carol"), 10);
        for p in ["alice", "bob", "carol"] {
            ledger.register_principal(&PrincipalId::new(p), true);
        }

        let mut auction = MintAuction::new();
        auction
            .submit(&store, &mut ledger, &PrincipalId::new("alice"), &ArtifactId::new("X1"), 40)
            .unwrap();
        auction
            .submit(&store, &mut ledger, &PrincipalId::new("bob"), &ArtifactId::new("X2"), 25)
            .unwrap();
        auction
            .submit(&store, &mut ledger, &PrincipalId::new("carol"), &ArtifactId::new("X3"), 10)
            .unwrap();

        let scorer = MockScorer::new().script(
            "X1",
            ScoreOutcome {
                success: true,
                score: Some(100),
                reason: Some("great".to_string()),
                error: None,
            },
        );

        let resolution = auction.resolve(&store, &mut ledger, &scorer, &config, 1).unwrap();
        assert_eq!(resolution.winner.as_deref(), Some("alice"));
        assert_eq!(resolution.price_paid, 25);
        assert_eq!(resolution.scrip_minted, 10);
        assert_eq!(ledger.balance(&PrincipalId::new("alice")), 15 + 10);
        assert_eq!(ledger.balance(&PrincipalId::new("bob")), 25 + 12);
        assert_eq!(ledger.balance(&PrincipalId::new("carol")), 10 + 12);
    }

    #[test]
    fn single_submission_pays_minimum_price() {
        let mut store = ArtifactStore::new(KernelConfig::default());
        let mut ledger = Ledger::new();
        let config = KernelConfig::default();
        setup_artifact(&mut store, "X1", "alice");
        ledger.credit(&PrincipalId::new("alice"), 40);
        ledger.register_principal(&PrincipalId::new("alice"), true);

        let mut auction = MintAuction::new();
        auction
            .submit(&store, &mut ledger, &PrincipalId::new("alice"), &ArtifactId::new("X1"), 40)
            .unwrap();
        let scorer = MockScorer::new();
        let resolution = auction.resolve(&store, &mut ledger, &scorer, &config, 1).unwrap();
        assert_eq!(resolution.price_paid, 1);
        assert_eq!(ledger.balance(&PrincipalId::new("alice")), 39);
    }

    #[test]
    fn failed_scoring_still_refunds() {
        let mut store = ArtifactStore::new(KernelConfig::default());
        let mut ledger = Ledger::new();
        let config = KernelConfig::default();
        setup_artifact(&mut store, "X1", "alice");
        setup_artifact(&mut store, "X2", "bob");
        ledger.credit(&PrincipalId::new("alice"), 40);
        ledger.credit(&PrincipalId::new("bob"), 10);
        for p in ["alice", "bob"] {
            ledger.register_principal(&PrincipalId::new(p), true);
        }

        let mut auction = MintAuction::new();
        auction
            .submit(&store, &mut ledger, &PrincipalId::new("alice"), &ArtifactId::new("X1"), 40)
            .unwrap();
        auction
            .submit(&store, &mut ledger, &PrincipalId::new("bob"), &ArtifactId::new("X2"), 10)
            .unwrap();

        let scorer = MockScorer::new().script(
            "X1",
            ScoreOutcome {
                success: false,
                score: None,
                reason: None,
                error: Some("scorer unavailable".to_string()),
            },
        );
        let resolution = auction.resolve(&store, &mut ledger, &scorer, &config, 1).unwrap();
        assert_eq!(resolution.scrip_minted, 0);
        assert_eq!(ledger.balance(&PrincipalId::new("bob")), 10);
    }
}
