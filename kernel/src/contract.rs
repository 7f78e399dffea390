//! V1 access contracts: a fixed, small set identified by id. General
//! contract-based policy is explicitly future work (§1 non-goals); this
//! module is deliberately not pluggable.

use agency_shared::PrincipalId;

use crate::artifact::Artifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Invoke,
}

/// `check_permission` is a pure function of the contract id plus
/// `caller == created_by`; it never consults anything else on the
/// artifact.
pub fn check_permission(caller: &PrincipalId, action: Action, artifact: &Artifact) -> bool {
    let is_creator = *caller == artifact.created_by;
    match artifact.access_contract_id.as_str() {
        "public" => true,
        "freeware" => match action {
            Action::Read => true,
            Action::Write | Action::Invoke => is_creator,
        },
        "private" => is_creator,
        // Unknown contract ids fail closed, matching the trigger
        // registry's "unknown operators fail closed" stance.
        _ => is_creator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::WriteParams;
    use agency_shared::ArtifactId;

    fn artifact_with_contract(contract: &str) -> Artifact {
        let mut store = crate::artifact::ArtifactStore::new(crate::config::KernelConfig::default());
        let mut params = WriteParams {
            id: ArtifactId::new("a1"),
            kind: "data".to_string(),
            content: serde_json::json!({}),
            created_by: PrincipalId::new("alice"),
            caller: PrincipalId::new("alice"),
            ..Default::default()
        };
        params.access_contract_id = Some(contract.to_string());
        store.write(params).unwrap();
        store.get_raw(&ArtifactId::new("a1")).unwrap().clone()
    }

    #[test]
    fn freeware_allows_public_read_creator_write() {
        let artifact = artifact_with_contract("freeware");
        assert!(check_permission(&PrincipalId::new("bob"), Action::Read, &artifact));
        assert!(!check_permission(&PrincipalId::new("bob"), Action::Write, &artifact));
        assert!(check_permission(&PrincipalId::new("alice"), Action::Write, &artifact));
    }

    #[test]
    fn private_restricts_everything_to_creator() {
        let artifact = artifact_with_contract("private");
        assert!(!check_permission(&PrincipalId::new("bob"), Action::Read, &artifact));
        assert!(check_permission(&PrincipalId::new("alice"), Action::Read, &artifact));
    }

    #[test]
    fn public_allows_everyone_everything() {
        let artifact = artifact_with_contract("public");
        assert!(check_permission(&PrincipalId::new("bob"), Action::Write, &artifact));
    }
}
