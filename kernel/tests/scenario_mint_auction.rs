//! Second-price mint auction: Alice, Bob and Carol each submit an
//! executable artifact with a bid; Alice's wins, she pays Bob's
//! second-highest bid, and that price is redistributed as UBI to the
//! losers.

mod common;

use agency_sandbox::{ScoreOutcome, mock::MockScorer};
use agency_shared::PrincipalId;
use common::test_kernel;

#[test]
fn alice_wins_and_losers_split_ubi() {
    let dir = tempfile::tempdir().unwrap();
    let mut kernel = test_kernel(dir.path());
    let alice = PrincipalId::new("alice");
    let bob = PrincipalId::new("bob");
    let carol = PrincipalId::new("carol");
    for p in [&alice, &bob, &carol] {
        kernel.register_principal(p, true);
    }
    kernel.ledger.credit(&alice, 100);
    kernel.ledger.credit(&bob, 100);
    kernel.ledger.credit(&carol, 100);

    for (owner, artifact_id) in [(&alice, "x1"), (&bob, "x2"), (&carol, "x3")] {
        let result = kernel.submit_action(
            owner,
            serde_json::json!({
                "action_type": "write_artifact",
                "artifact_id": artifact_id,
                "artifact_type": "executable",
                "executable": true,
                "code": "sum",
            }),
            "",
        );
        assert!(result.success);
    }

    for (bidder, artifact_id, bid) in [(&alice, "x1", 40u64), (&bob, "x2", 25), (&carol, "x3", 10)] {
        let result = kernel.submit_action(
            bidder,
            serde_json::json!({"action_type": "submit_to_mint", "artifact_id": artifact_id, "bid": bid}),
            "",
        );
        assert!(result.success);
    }
    assert_eq!(kernel.ledger.balance(&alice), 60);
    assert_eq!(kernel.ledger.balance(&bob), 75);
    assert_eq!(kernel.ledger.balance(&carol), 90);

    kernel.scorer = Box::new(MockScorer::new().script(
        "x1",
        ScoreOutcome {
            success: true,
            score: Some(100),
            reason: None,
            error: None,
        },
    ));

    let resolution = kernel.run_mint_cycle().unwrap();
    assert_eq!(resolution.winner.as_deref(), Some("alice"));
    assert_eq!(resolution.price_paid, 25);
    assert_eq!(resolution.score, Some(100));
    assert_eq!(resolution.scrip_minted, 10); // 100 / mint_ratio(10)

    // Alice refunded the 15 between her bid and the price paid, plus the
    // mint reward.
    assert_eq!(kernel.ledger.balance(&alice), 60 + 15 + 10);

    // The 25 price paid splits evenly between the two standing principals
    // other than the winner (12 each); the odd remainder of 1 accrues to
    // the configured UBI sink rather than either of them.
    assert_eq!(resolution.ubi_distribution.get("bob"), Some(&12));
    assert_eq!(resolution.ubi_distribution.get("carol"), Some(&12));
    assert!(!resolution.ubi_distribution.contains_key("alice"));
    assert_eq!(kernel.ledger.balance(&bob), 75 + 25 + 12);
    assert_eq!(kernel.ledger.balance(&carol), 90 + 10 + 12);
}
