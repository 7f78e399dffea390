//! `charge_delegation:alice` is created kernel-protected; no ordinary
//! `write_artifact` may touch it afterward, from any caller — only the
//! delegation manager's own `grant` path may.

mod common;

use agency_shared::PrincipalId;
use common::test_kernel;

#[test]
fn kernel_protected_delegation_artifact_resists_writes_but_not_grant() {
    let dir = tempfile::tempdir().unwrap();
    let mut kernel = test_kernel(dir.path());
    let alice = PrincipalId::new("alice");
    let bob = PrincipalId::new("bob");
    let mallory = PrincipalId::new("mallory");
    kernel.register_principal(&alice, true);
    kernel.register_principal(&bob, true);
    kernel.register_principal(&mallory, true);

    kernel
        .delegation
        .grant(&mut kernel.store, &alice, &bob, Some(10), Some(15), 60, None)
        .unwrap();
    assert!(kernel.store.exists(&agency_shared::ArtifactId::new("charge_delegation:alice")));

    // Alice owns the reserved `charge_delegation:` namespace for her own
    // id, so her write clears that check and is stopped by the
    // kernel-protected flag instead.
    let alice_attempt = kernel.submit_action(
        &alice,
        serde_json::json!({
            "action_type": "write_artifact",
            "artifact_id": "charge_delegation:alice",
            "artifact_type": "charge_delegation",
            "content": {"tampered": true},
        }),
        "attempted direct write",
    );
    assert!(!alice_attempt.success);
    assert_eq!(alice_attempt.error_code.as_deref(), Some("artifact_protected"));

    // Mallory isn't even the namespace owner, so her write is refused
    // before the kernel-protected check is reached.
    let mallory_attempt = kernel.submit_action(
        &mallory,
        serde_json::json!({
            "action_type": "write_artifact",
            "artifact_id": "charge_delegation:alice",
            "artifact_type": "charge_delegation",
            "content": {"tampered": true},
        }),
        "attempted direct write",
    );
    assert!(!mallory_attempt.success);
    assert_eq!(mallory_attempt.error_code.as_deref(), Some("permission_denied"));

    // The delegation manager's own path still works after the failed
    // tamper attempts.
    kernel
        .delegation
        .grant(&mut kernel.store, &alice, &mallory, Some(5), None, 60, None)
        .unwrap();
    kernel
        .delegation
        .authorize_charge(&kernel.store, &mallory, &alice, 5)
        .unwrap();
}
