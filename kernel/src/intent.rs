//! The tagged-variant intent type.
//!
//! Per §9's design note: the source parses JSON into a discriminated union
//! with a legacy "flat" variant whose validity lives in per-variant
//! post-init hooks. Here every variant is a concrete record validated at
//! the parse boundary (`Intent::from_json`); there is no flat internal
//! form afterward.

use agency_shared::{ArtifactId, KernelError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteArtifactIntent {
    pub artifact_id: String,
    pub artifact_type: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub executable: bool,
    #[serde(default)]
    pub metadata: std::collections::BTreeMap<String, Value>,
    #[serde(default)]
    pub policy: Option<crate::artifact::Policy>,
    #[serde(default)]
    pub access_contract_id: Option<String>,
    #[serde(default)]
    pub interface: Option<Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditArtifactIntent {
    pub artifact_id: String,
    pub old_string: String,
    pub new_string: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeArtifactIntent {
    pub artifact_id: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferIntent {
    pub artifact_id: String,
    pub to: String,
    pub price: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintIntent {
    pub to: String,
    pub amount: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitToMintIntent {
    pub artifact_id: String,
    pub bid: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitToTaskIntent {
    pub artifact_id: String,
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryKernelIntent {
    pub query_type: String,
    #[serde(default)]
    pub params: std::collections::BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleArtifactIntent {
    pub artifact_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RightShare {
    pub artifact_id: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitRightIntent {
    pub right_id: String,
    pub splits: Vec<RightShare>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRightIntent {
    pub right_ids: Vec<String>,
    pub new_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowDepositIntent {
    pub artifact_id: String,
    pub price: u64,
    #[serde(default)]
    pub restricted_buyer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowPurchaseIntent {
    pub artifact_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowCancelIntent {
    pub artifact_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum Intent {
    Noop,
    ReadArtifact(SimpleArtifactIntent),
    WriteArtifact(WriteArtifactIntent),
    EditArtifact(EditArtifactIntent),
    DeleteArtifact(SimpleArtifactIntent),
    InvokeArtifact(InvokeArtifactIntent),
    SubscribeArtifact(SimpleArtifactIntent),
    UnsubscribeArtifact(SimpleArtifactIntent),
    SubmitToMint(SubmitToMintIntent),
    SubmitToTask(SubmitToTaskIntent),
    Transfer(TransferIntent),
    Mint(MintIntent),
    SplitRight(SplitRightIntent),
    MergeRight(MergeRightIntent),
    EscrowDeposit(EscrowDepositIntent),
    EscrowPurchase(EscrowPurchaseIntent),
    EscrowCancel(EscrowCancelIntent),
    QueryKernel(QueryKernelIntent),
    ConfigureContext(#[serde(default)] std::collections::BTreeMap<String, Value>),
    ModifySystemPrompt { content: String },
}

impl Intent {
    /// Parses and validates a JSON action. Unknown or missing fields yield
    /// `validation/invalid_argument` or `validation/missing_argument`;
    /// validation failures are never retriable.
    pub fn from_json(value: Value) -> Result<Self, KernelError> {
        serde_json::from_value(value).map_err(|e| KernelError::InvalidIntent {
            reason: e.to_string(),
        })
    }

    pub fn artifact_id(&self) -> Option<ArtifactId> {
        match self {
            Intent::ReadArtifact(i)
            | Intent::DeleteArtifact(i)
            | Intent::SubscribeArtifact(i)
            | Intent::UnsubscribeArtifact(i) => Some(ArtifactId::new(i.artifact_id.clone())),
            Intent::WriteArtifact(i) => Some(ArtifactId::new(i.artifact_id.clone())),
            Intent::EditArtifact(i) => Some(ArtifactId::new(i.artifact_id.clone())),
            Intent::InvokeArtifact(i) => Some(ArtifactId::new(i.artifact_id.clone())),
            Intent::Transfer(i) => Some(ArtifactId::new(i.artifact_id.clone())),
            Intent::SubmitToMint(i) => Some(ArtifactId::new(i.artifact_id.clone())),
            Intent::SubmitToTask(i) => Some(ArtifactId::new(i.artifact_id.clone())),
            Intent::EscrowDeposit(i) => Some(ArtifactId::new(i.artifact_id.clone())),
            Intent::EscrowPurchase(i) => Some(ArtifactId::new(i.artifact_id.clone())),
            Intent::EscrowCancel(i) => Some(ArtifactId::new(i.artifact_id.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_intent_parses_from_json() {
        let json = serde_json::json!({
            "action_type": "invoke_artifact",
            "artifact_id": "x1",
            "method": "run",
            "args": [1, 2]
        });
        let intent = Intent::from_json(json).unwrap();
        match intent {
            Intent::InvokeArtifact(i) => {
                assert_eq!(i.artifact_id, "x1");
                assert_eq!(i.args.len(), 2);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_action_type_is_validation_error() {
        let json = serde_json::json!({"action_type": "bogus"});
        let err = Intent::from_json(json).unwrap_err();
        assert_eq!(err.category(), agency_shared::ErrorCategory::Validation);
    }

    #[test]
    fn missing_required_field_is_validation_error() {
        let json = serde_json::json!({"action_type": "invoke_artifact", "artifact_id": "x1"});
        let err = Intent::from_json(json).unwrap_err();
        assert_eq!(err.category(), agency_shared::ErrorCategory::Validation);
    }
}
