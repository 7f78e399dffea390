//! Rights: tradeable, splittable, mergeable claims on capacity, stored as
//! plain artifacts of type `right` under the `right:` reserved prefix
//! (I-RESERVED — only the kernel may create them).

use agency_shared::{ArtifactId, KernelError, PrincipalId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifact::{ArtifactStore, WriteParams};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RightData {
    pub right_type: String,
    pub resource: String,
    pub amount: f64,
    pub model: Option<String>,
    pub window: Option<String>,
}

impl RightData {
    fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("right data always serializes")
    }

    fn from_artifact_content(content: &Value) -> Result<Self, KernelError> {
        serde_json::from_value(content.clone()).map_err(|_| KernelError::InvalidIntent {
            reason: "malformed right content".to_string(),
        })
    }
}

pub struct RightsRegistry;

impl RightsRegistry {
    pub fn create(
        store: &mut ArtifactStore,
        id: &ArtifactId,
        owner: &PrincipalId,
        data: RightData,
    ) -> Result<(), KernelError> {
        store.write(WriteParams {
            id: id.clone(),
            kind: "right".to_string(),
            content: data.to_value(),
            created_by: owner.clone(),
            caller: owner.clone(),
            by_kernel: true,
            ..Default::default()
        })
    }

    pub fn get_right_data(store: &ArtifactStore, id: &ArtifactId) -> Result<RightData, KernelError> {
        let artifact = store.get_raw(id).ok_or_else(|| KernelError::ArtifactNotFound {
            id: id.as_str().to_string(),
        })?;
        RightData::from_artifact_content(&artifact.content)
    }

    pub fn update_amount(
        store: &mut ArtifactStore,
        id: &ArtifactId,
        new_amount: f64,
    ) -> Result<(), KernelError> {
        let mut data = Self::get_right_data(store, id)?;
        data.amount = new_amount;
        store.modify_protected_content(id, Some(data.to_value()), None, None)
    }

    pub fn find_by_type(
        store: &ArtifactStore,
        owner: &PrincipalId,
        right_type: &str,
        model: Option<&str>,
    ) -> Vec<ArtifactId> {
        store
            .by_creator(owner)
            .into_iter()
            .filter(|a| a.kind == "right")
            .filter_map(|a| {
                let data = RightData::from_artifact_content(&a.content).ok()?;
                if data.right_type == right_type && data.model.as_deref() == model {
                    Some(a.id.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn total_amount(
        store: &ArtifactStore,
        owner: &PrincipalId,
        right_type: &str,
        model: Option<&str>,
    ) -> f64 {
        Self::find_by_type(store, owner, right_type, model)
            .iter()
            .filter_map(|id| Self::get_right_data(store, id).ok())
            .map(|d| d.amount)
            .sum()
    }

    /// Splits one right into many with amounts summing to the original.
    /// Every new artifact is metadata-linked to the parent; the parent is
    /// tombstoned.
    pub fn split(
        store: &mut ArtifactStore,
        right_id: &ArtifactId,
        new_ids_and_amounts: Vec<(ArtifactId, f64)>,
        caller: &PrincipalId,
    ) -> Result<(), KernelError> {
        let parent = store
            .get_raw(right_id)
            .ok_or_else(|| KernelError::ArtifactNotFound {
                id: right_id.as_str().to_string(),
            })?
            .clone();
        if parent.created_by != *caller {
            return Err(KernelError::PermissionDenied {
                reason: "only the owner may split a right".to_string(),
            });
        }
        let data = RightData::from_artifact_content(&parent.content)?;
        if new_ids_and_amounts.iter().any(|(_, amt)| *amt <= 0.0) {
            return Err(KernelError::InvalidIntent {
                reason: "split amounts must be positive".to_string(),
            });
        }
        let total: f64 = new_ids_and_amounts.iter().map(|(_, a)| a).sum();
        if (total - data.amount).abs() > f64::EPSILON {
            return Err(KernelError::InvalidIntent {
                reason: "split amounts must sum to the original amount".to_string(),
            });
        }

        for (new_id, amount) in &new_ids_and_amounts {
            let mut child_data = data.clone();
            child_data.amount = *amount;
            let mut metadata = std::collections::BTreeMap::new();
            metadata.insert(
                "split_from".to_string(),
                Value::String(right_id.as_str().to_string()),
            );
            store.write(WriteParams {
                id: new_id.clone(),
                kind: "right".to_string(),
                content: child_data.to_value(),
                created_by: caller.clone(),
                caller: caller.clone(),
                metadata,
                by_kernel: true,
                ..Default::default()
            })?;
        }
        store.delete(right_id, caller)
    }

    /// Merges many rights of the same type/resource/model, all owned by
    /// `caller`, into one. Originals are tombstoned.
    pub fn merge(
        store: &mut ArtifactStore,
        right_ids: &[ArtifactId],
        caller: &PrincipalId,
        new_id: ArtifactId,
    ) -> Result<(), KernelError> {
        if right_ids.is_empty() {
            return Err(KernelError::InvalidIntent {
                reason: "merge requires at least one right".to_string(),
            });
        }
        let mut datas = Vec::with_capacity(right_ids.len());
        for id in right_ids {
            let artifact = store.get_raw(id).ok_or_else(|| KernelError::ArtifactNotFound {
                id: id.as_str().to_string(),
            })?;
            if artifact.created_by != *caller {
                return Err(KernelError::PermissionDenied {
                    reason: format!("{} is not owned by caller", id.as_str()),
                });
            }
            datas.push(RightData::from_artifact_content(&artifact.content)?);
        }
        let first = &datas[0];
        if datas
            .iter()
            .any(|d| d.right_type != first.right_type || d.resource != first.resource || d.model != first.model)
        {
            return Err(KernelError::InvalidIntent {
                reason: "merge requires matching type/resource/model".to_string(),
            });
        }
        let total: f64 = datas.iter().map(|d| d.amount).sum();
        let mut merged = first.clone();
        merged.amount = total;

        store.write(WriteParams {
            id: new_id,
            kind: "right".to_string(),
            content: merged.to_value(),
            created_by: caller.clone(),
            caller: caller.clone(),
            by_kernel: true,
            ..Default::default()
        })?;
        for id in right_ids {
            store.delete(id, caller)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;

    fn store() -> ArtifactStore {
        ArtifactStore::new(KernelConfig::default())
    }

    fn data(amount: f64) -> RightData {
        RightData {
            right_type: "dollar_budget".to_string(),
            resource: "scrip".to_string(),
            amount,
            model: None,
            window: None,
        }
    }

    #[test]
    fn split_then_merge_preserves_total_amount() {
        let mut s = store();
        let owner = PrincipalId::new("alice");
        let right_id = ArtifactId::new("right:original");
        RightsRegistry::create(&mut s, &right_id, &owner, data(100.0)).unwrap();

        RightsRegistry::split(
            &mut s,
            &right_id,
            vec![
                (ArtifactId::new("right:a"), 40.0),
                (ArtifactId::new("right:b"), 60.0),
            ],
            &owner,
        )
        .unwrap();

        let merged_id = ArtifactId::new("right:merged");
        RightsRegistry::merge(
            &mut s,
            &[ArtifactId::new("right:a"), ArtifactId::new("right:b")],
            &owner,
            merged_id.clone(),
        )
        .unwrap();

        let merged = RightsRegistry::get_right_data(&s, &merged_id).unwrap();
        assert_eq!(merged.amount, 100.0);
    }

    #[test]
    fn split_amounts_must_sum_to_original() {
        let mut s = store();
        let owner = PrincipalId::new("alice");
        let right_id = ArtifactId::new("right:original");
        RightsRegistry::create(&mut s, &right_id, &owner, data(100.0)).unwrap();
        let err = RightsRegistry::split(
            &mut s,
            &right_id,
            vec![(ArtifactId::new("right:a"), 40.0)],
            &owner,
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid_intent");
    }
}
