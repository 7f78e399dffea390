//! Read-only projections of kernel state.
//!
//! Grounded in `original_source/src/world/kernel_queries.py`'s
//! `QUERY_SCHEMA` dispatch table: every query type has a fixed parameter
//! whitelist, validated (query type membership, no unknown params, all
//! required params present) before dispatch to a per-query handler.

use std::collections::BTreeMap;

use agency_shared::{ArtifactId, KernelError, PrincipalId};
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::artifact::ArtifactStore;
use crate::delegation::DelegationManager;
use crate::event_log::EventLog;
use crate::invocation::InvocationLog;
use crate::ledger::Ledger;
use crate::mint_auction::MintAuction;

struct QuerySchema {
    required: &'static [&'static str],
    optional: &'static [&'static str],
}

static QUERY_SCHEMAS: Lazy<BTreeMap<&'static str, QuerySchema>> = Lazy::new(|| {
    let mut m = BTreeMap::new();
    m.insert(
        "artifacts",
        QuerySchema {
            required: &[],
            optional: &["owner", "type", "executable", "name_pattern", "limit", "offset"],
        },
    );
    m.insert(
        "artifact",
        QuerySchema {
            required: &["artifact_id"],
            optional: &[],
        },
    );
    m.insert(
        "principals",
        QuerySchema {
            required: &[],
            optional: &["limit", "offset"],
        },
    );
    m.insert(
        "principal",
        QuerySchema {
            required: &["principal_id"],
            optional: &[],
        },
    );
    m.insert(
        "balances",
        QuerySchema {
            required: &[],
            optional: &["principal_id"],
        },
    );
    m.insert(
        "resources",
        QuerySchema {
            required: &["principal_id"],
            optional: &[],
        },
    );
    m.insert(
        "quotas",
        QuerySchema {
            required: &["principal_id"],
            optional: &[],
        },
    );
    m.insert(
        "mint",
        QuerySchema {
            required: &[],
            optional: &["history_limit"],
        },
    );
    m.insert(
        "events",
        QuerySchema {
            required: &[],
            optional: &["limit"],
        },
    );
    m.insert(
        "invocations",
        QuerySchema {
            required: &[],
            optional: &["artifact_id", "invoker", "limit"],
        },
    );
    m.insert(
        "frozen",
        QuerySchema {
            required: &[],
            optional: &[],
        },
    );
    m.insert(
        "libraries",
        QuerySchema {
            required: &[],
            optional: &["owner"],
        },
    );
    m.insert(
        "dependencies",
        QuerySchema {
            required: &["artifact_id"],
            optional: &["direction"],
        },
    );
    m
});

pub struct KernelQueryHandler<'s> {
    pub store: &'s ArtifactStore,
    pub ledger: &'s Ledger,
    pub delegation: &'s DelegationManager,
    pub event_log: &'s EventLog,
    pub mint_auction: &'s MintAuction,
    pub invocations: &'s InvocationLog,
}

impl<'s> KernelQueryHandler<'s> {
    pub fn execute(
        &self,
        query_type: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<Value, KernelError> {
        let _ = &self.delegation;
        let schema = QUERY_SCHEMAS
            .get(query_type)
            .ok_or_else(|| KernelError::InvalidQueryType {
                query_type: query_type.to_string(),
            })?;

        for key in params.keys() {
            if !schema.required.contains(&key.as_str()) && !schema.optional.contains(&key.as_str()) {
                return Err(KernelError::InvalidParam { param: key.clone() });
            }
        }
        for required in schema.required {
            if !params.contains_key(*required) {
                return Err(KernelError::MissingParam {
                    param: (*required).to_string(),
                });
            }
        }

        match query_type {
            "artifacts" => self.query_artifacts(params),
            "artifact" => self.query_artifact(params),
            "principals" => self.query_principals(),
            "principal" => self.query_principal(params),
            "balances" => self.query_balances(params),
            "resources" => self.query_resources(params),
            "quotas" => self.query_quotas(params),
            "mint" => self.query_mint(params),
            "events" => self.query_events(params),
            "invocations" => self.query_invocations(params),
            "frozen" => self.query_frozen(),
            "libraries" => self.query_libraries(params),
            "dependencies" => self.query_dependencies(params),
            other => Err(KernelError::QueryNotImplemented {
                query_type: other.to_string(),
            }),
        }
    }

    fn query_artifacts(&self, params: &BTreeMap<String, Value>) -> Result<Value, KernelError> {
        let mut results: Vec<&crate::artifact::Artifact> = self.store.list_all(false);

        if let Some(owner) = params.get("owner").and_then(|v| v.as_str()) {
            let owner = PrincipalId::new(owner);
            results.retain(|a| a.created_by == owner);
        }
        if let Some(kind) = params.get("type").and_then(|v| v.as_str()) {
            results.retain(|a| a.kind == kind);
        }
        if let Some(executable) = params.get("executable") {
            let executable = executable
                .as_bool()
                .ok_or_else(|| KernelError::InvalidParamType {
                    param: "executable".to_string(),
                })?;
            results.retain(|a| a.executable == executable);
        }
        if let Some(pattern) = params.get("name_pattern").and_then(|v| v.as_str()) {
            let re = regex::Regex::new(pattern).map_err(|_| KernelError::InvalidParam {
                param: "name_pattern".to_string(),
            })?;
            results.retain(|a| re.is_match(a.id.as_str()));
        }

        let limit = match params.get("limit") {
            Some(v) => Some(v.as_u64().ok_or_else(|| KernelError::InvalidParamType {
                param: "limit".to_string(),
            })? as usize),
            None => None,
        };
        let offset = match params.get("offset") {
            Some(v) => v.as_u64().ok_or_else(|| KernelError::InvalidParamType {
                param: "offset".to_string(),
            })? as usize,
            None => 0,
        };

        let total = results.len();
        let page: Vec<_> = results
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|a| serde_json::to_value(a).unwrap())
            .collect();
        Ok(serde_json::json!({"artifacts": page, "total": total}))
    }

    fn query_artifact(&self, params: &BTreeMap<String, Value>) -> Result<Value, KernelError> {
        let id = ArtifactId::new(params["artifact_id"].as_str().unwrap_or_default());
        self.store
            .get(&id)
            .map(|v| serde_json::json!({"artifact": v}))
            .ok_or_else(|| KernelError::ArtifactNotFound {
                id: id.as_str().to_string(),
            })
    }

    fn query_principals(&self) -> Result<Value, KernelError> {
        let principals: Vec<_> = self
            .store
            .list_all(false)
            .into_iter()
            .filter(|a| a.has_standing)
            .map(|a| a.id.as_str().to_string())
            .collect();
        Ok(serde_json::json!({"principals": principals}))
    }

    fn query_principal(&self, params: &BTreeMap<String, Value>) -> Result<Value, KernelError> {
        let id = PrincipalId::new(params["principal_id"].as_str().unwrap_or_default());
        Ok(serde_json::json!({
            "principal_id": id.as_str(),
            "balance": self.ledger.balance(&id),
        }))
    }

    fn query_balances(&self, params: &BTreeMap<String, Value>) -> Result<Value, KernelError> {
        if let Some(id) = params.get("principal_id").and_then(|v| v.as_str()) {
            let id = PrincipalId::new(id);
            return Ok(serde_json::json!({ id.as_str(): self.ledger.balance(&id) }));
        }
        let balances: BTreeMap<String, u64> = self
            .store
            .list_all(false)
            .into_iter()
            .filter(|a| a.has_standing)
            .map(|a| (a.id.as_str().to_string(), self.ledger.balance(&PrincipalId::new(a.id.as_str()))))
            .collect();
        Ok(serde_json::json!({"balances": balances}))
    }

    fn query_resources(&self, params: &BTreeMap<String, Value>) -> Result<Value, KernelError> {
        let id = PrincipalId::new(params["principal_id"].as_str().unwrap_or_default());
        Ok(serde_json::json!({
            "principal_id": id.as_str(),
            "cpu_seconds": self.ledger.resource(&id, "cpu_seconds"),
        }))
    }

    fn query_quotas(&self, params: &BTreeMap<String, Value>) -> Result<Value, KernelError> {
        let id = PrincipalId::new(params["principal_id"].as_str().unwrap_or_default());
        Ok(serde_json::json!({
            "principal_id": id.as_str(),
            "disk_bytes": self
                .store
                .by_creator(&id)
                .iter()
                .map(|a| a.byte_size())
                .sum::<usize>(),
        }))
    }

    fn query_mint(&self, params: &BTreeMap<String, Value>) -> Result<Value, KernelError> {
        let limit = match params.get("history_limit") {
            Some(v) => v.as_u64().ok_or_else(|| KernelError::InvalidParamType {
                param: "history_limit".to_string(),
            })? as usize,
            None => 10,
        };
        Ok(self.mint_auction.query_view(limit))
    }

    fn query_events(&self, params: &BTreeMap<String, Value>) -> Result<Value, KernelError> {
        let limit = match params.get("limit") {
            Some(v) => v.as_u64().ok_or_else(|| KernelError::InvalidParamType {
                param: "limit".to_string(),
            })? as usize,
            None => 50,
        };
        let events = self.event_log.read_recent(limit).map_err(|e| {
            KernelError::Internal(format!("failed to read event log: {e}"))
        })?;
        Ok(serde_json::json!({"events": events}))
    }

    fn query_invocations(&self, params: &BTreeMap<String, Value>) -> Result<Value, KernelError> {
        let limit = match params.get("limit") {
            Some(v) => v.as_u64().ok_or_else(|| KernelError::InvalidParamType {
                param: "limit".to_string(),
            })? as usize,
            None => 50,
        };
        let artifact_id = params.get("artifact_id").and_then(|v| v.as_str());
        let invoker = params.get("invoker").and_then(|v| v.as_str());

        let records = match (artifact_id, invoker) {
            (Some(artifact_id), _) => self.invocations.by_artifact(artifact_id, limit),
            (None, Some(invoker)) => self.invocations.by_invoker(invoker, limit),
            (None, None) => self.invocations.recent(limit),
        };
        Ok(serde_json::json!({"invocations": records}))
    }

    fn query_frozen(&self) -> Result<Value, KernelError> {
        let frozen: Vec<_> = self
            .store
            .list_all(false)
            .into_iter()
            .filter(|a| a.is_agent() && self.ledger.resource(&PrincipalId::new(a.id.as_str()), "cpu_seconds") <= 0.0)
            .map(|a| a.id.as_str().to_string())
            .collect();
        Ok(serde_json::json!({"frozen": frozen}))
    }

    fn query_libraries(&self, params: &BTreeMap<String, Value>) -> Result<Value, KernelError> {
        let mut results = self.store.by_type("data");
        if let Some(owner) = params.get("owner").and_then(|v| v.as_str()) {
            let owner = PrincipalId::new(owner);
            results.retain(|a| a.created_by == owner);
        }
        let libraries: Vec<_> = results
            .into_iter()
            .filter(|a| !a.executable)
            .map(|a| a.id.as_str().to_string())
            .collect();
        Ok(serde_json::json!({"libraries": libraries}))
    }

    fn query_dependencies(&self, params: &BTreeMap<String, Value>) -> Result<Value, KernelError> {
        let id = ArtifactId::new(params["artifact_id"].as_str().unwrap_or_default());
        let artifact = self.store.get_raw(&id).ok_or_else(|| KernelError::ArtifactNotFound {
            id: id.as_str().to_string(),
        })?;
        let direction = params.get("direction").and_then(|v| v.as_str()).unwrap_or("forward");
        if direction == "reverse" {
            let reverse: Vec<_> = self
                .store
                .list_all(false)
                .into_iter()
                .filter(|a| a.depends_on.contains(&id))
                .map(|a| a.id.as_str().to_string())
                .collect();
            Ok(serde_json::json!({"dependents": reverse}))
        } else {
            let forward: Vec<_> = artifact.depends_on.iter().map(|d| d.as_str().to_string()).collect();
            Ok(serde_json::json!({"dependencies": forward}))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::WriteParams;
    use crate::config::KernelConfig;
    use crate::event_log::{EventLog, LogDestination};
    use crate::mint_auction::MintAuction;

    fn handler_fixture() -> (ArtifactStore, Ledger, DelegationManager, EventLog, MintAuction, InvocationLog) {
        let config = KernelConfig::default();
        let store = ArtifactStore::new(config.clone());
        let ledger = Ledger::new();
        let delegation = DelegationManager::new(&config);
        let dir = tempfile::tempdir().unwrap();
        let event_log = EventLog::new(LogDestination::SingleFile(dir.path().join("e.jsonl"))).unwrap();
        let mint_auction = MintAuction::new();
        let invocations = InvocationLog::new(config.max_invocation_log);
        (store, ledger, delegation, event_log, mint_auction, invocations)
    }

    #[test]
    fn unknown_query_type_fails_fast() {
        let (store, ledger, delegation, event_log, mint_auction, invocations) = handler_fixture();
        let handler = KernelQueryHandler {
            store: &store,
            ledger: &ledger,
            delegation: &delegation,
            event_log: &event_log,
            mint_auction: &mint_auction,
            invocations: &invocations,
        };
        let err = handler.execute("bogus", &BTreeMap::new()).unwrap_err();
        assert_eq!(err.code(), "invalid_query_type");
    }

    #[test]
    fn unknown_param_rejected_before_dispatch() {
        let (store, ledger, delegation, event_log, mint_auction, invocations) = handler_fixture();
        let handler = KernelQueryHandler {
            store: &store,
            ledger: &ledger,
            delegation: &delegation,
            event_log: &event_log,
            mint_auction: &mint_auction,
            invocations: &invocations,
        };
        let mut params = BTreeMap::new();
        params.insert("bogus_param".to_string(), Value::from(1));
        let err = handler.execute("artifacts", &params).unwrap_err();
        assert_eq!(err.code(), "invalid_param");
    }

    #[test]
    fn missing_required_param_rejected() {
        let (store, ledger, delegation, event_log, mint_auction, invocations) = handler_fixture();
        let handler = KernelQueryHandler {
            store: &store,
            ledger: &ledger,
            delegation: &delegation,
            event_log: &event_log,
            mint_auction: &mint_auction,
            invocations: &invocations,
        };
        let err = handler.execute("artifact", &BTreeMap::new()).unwrap_err();
        assert_eq!(err.code(), "missing_param");
    }

    #[test]
    fn artifacts_query_filters_by_type() {
        let (mut store, ledger, delegation, event_log, mint_auction, invocations) = handler_fixture();
        store
            .write(WriteParams {
                id: ArtifactId::new("a1"),
                kind: "data".to_string(),
                content: Value::Null,
                created_by: PrincipalId::new("alice"),
                caller: PrincipalId::new("alice"),
                by_kernel: true,
                ..Default::default()
            })
            .unwrap();
        let handler = KernelQueryHandler {
            store: &store,
            ledger: &ledger,
            delegation: &delegation,
            event_log: &event_log,
            mint_auction: &mint_auction,
            invocations: &invocations,
        };
        let mut params = BTreeMap::new();
        params.insert("type".to_string(), Value::String("data".to_string()));
        let result = handler.execute("artifacts", &params).unwrap();
        assert_eq!(result["total"], 1);
    }

    #[test]
    fn invocations_query_filters_by_artifact_and_invoker() {
        let (store, ledger, delegation, event_log, mint_auction, mut invocations) = handler_fixture();
        invocations.record("art1", "alice", "run", true);
        invocations.record("art2", "bob", "run", false);
        let handler = KernelQueryHandler {
            store: &store,
            ledger: &ledger,
            delegation: &delegation,
            event_log: &event_log,
            mint_auction: &mint_auction,
            invocations: &invocations,
        };

        let mut params = BTreeMap::new();
        params.insert("artifact_id".to_string(), Value::String("art1".to_string()));
        let result = handler.execute("invocations", &params).unwrap();
        assert_eq!(result["invocations"].as_array().unwrap().len(), 1);
        assert_eq!(result["invocations"][0]["invoker"], "alice");

        let mut params = BTreeMap::new();
        params.insert("invoker".to_string(), Value::String("bob".to_string()));
        let result = handler.execute("invocations", &params).unwrap();
        assert_eq!(result["invocations"].as_array().unwrap().len(), 1);
        assert_eq!(result["invocations"][0]["artifact_id"], "art2");

        let result = handler.execute("invocations", &BTreeMap::new()).unwrap();
        assert_eq!(result["invocations"].as_array().unwrap().len(), 2);
    }
}
