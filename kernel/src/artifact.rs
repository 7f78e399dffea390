//! The artifact: the universal storage primitive, and the store that
//! enforces its invariants.
//!
//! Grounded in the teacher's `state_tree.rs`: a flat map keyed by id,
//! mutated only through checked accessors, with indexes maintained on
//! every write rather than rebuilt on query (`StateTree::set_actor`
//! updates the HAMT and the resolve cache together). Unlike the teacher's
//! actor tree, artifacts are validated against a fixed invariant set
//! (I-TYPE, I-CREATOR, I-CONTRACT, I-PROTECTED, I-DAG, I-RESERVED,
//! I-TOMBSTONE, I-SIZE) rather than left to actor code to enforce.

use std::collections::{BTreeMap, BTreeSet};

use agency_shared::{ArtifactId, ContentDigest, KernelError, PrincipalId, Timestamp};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::KernelConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub read_price: u64,
    #[serde(default)]
    pub invoke_price: u64,
    #[serde(default = "default_true")]
    pub allow_read: bool,
    #[serde(default = "default_true")]
    pub allow_write: bool,
    #[serde(default = "default_true")]
    pub allow_invoke: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Value,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub executable: bool,
    pub created_by: PrincipalId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default = "default_contract")]
    pub access_contract_id: String,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<ArtifactId>,
    #[serde(default)]
    pub has_standing: bool,
    #[serde(default)]
    pub can_execute: bool,
    #[serde(default)]
    pub deleted: bool,
    pub deleted_at: Option<Timestamp>,
    pub deleted_by: Option<PrincipalId>,
    #[serde(default)]
    pub kernel_protected: bool,
    pub interface: Option<Value>,
    pub content_digest: ContentDigest,
}

fn default_contract() -> String {
    "freeware".to_string()
}

impl Artifact {
    /// An artifact is a principal iff it has standing.
    pub fn is_principal(&self) -> bool {
        self.has_standing
    }

    /// An artifact is an agent iff it both has standing and runs its own
    /// decision loop.
    pub fn is_agent(&self) -> bool {
        self.has_standing && self.can_execute
    }

    pub fn controller(&self) -> PrincipalId {
        self.metadata
            .get("controller")
            .and_then(|v| v.as_str())
            .map(PrincipalId::new)
            .unwrap_or_else(|| self.created_by.clone())
    }

    pub fn byte_size(&self) -> usize {
        self.content.to_string().len() + self.code.len()
    }

    /// Tombstone projection returned for deleted artifacts: id, type,
    /// deleted_at, deleted_by, no content (I-TOMBSTONE).
    pub fn tombstone_view(&self) -> Value {
        serde_json::json!({
            "id": self.id.as_str(),
            "type": self.kind,
            "deleted": true,
            "deleted_at": self.deleted_at.map(|t| t.to_iso_string()),
            "deleted_by": self.deleted_by.as_ref().map(|p| p.as_str().to_string()),
        })
    }
}

/// Fields of `metadata` that the store maintains a value-index for.
/// Supports dot-notation for nested object fields (e.g. `tags.priority`).
pub const INDEXED_METADATA_FIELDS: &[&str] = &["tags.priority", "category", "authorized_writer"];

static INVOKE_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"invoke\(\s*["']([^"']+)["']"#).expect("static regex"));

#[derive(Debug, Default)]
struct Indexes {
    by_type: BTreeMap<String, BTreeSet<ArtifactId>>,
    by_creator: BTreeMap<PrincipalId, BTreeSet<ArtifactId>>,
    by_metadata: BTreeMap<String, BTreeMap<String, BTreeSet<ArtifactId>>>,
}

impl Indexes {
    fn remove_artifact(&mut self, artifact: &Artifact) {
        if let Some(set) = self.by_type.get_mut(&artifact.kind) {
            set.remove(&artifact.id);
        }
        if let Some(set) = self.by_creator.get_mut(&artifact.created_by) {
            set.remove(&artifact.id);
        }
        for field in INDEXED_METADATA_FIELDS {
            if let Some(values) = self.by_metadata.get_mut(*field) {
                for set in values.values_mut() {
                    set.remove(&artifact.id);
                }
            }
        }
    }

    fn index_artifact(&mut self, artifact: &Artifact) {
        self.by_type
            .entry(artifact.kind.clone())
            .or_default()
            .insert(artifact.id.clone());
        self.by_creator
            .entry(artifact.created_by.clone())
            .or_default()
            .insert(artifact.id.clone());
        for field in INDEXED_METADATA_FIELDS {
            if let Some(value) = lookup_dotted(&artifact.metadata, field) {
                if let Some(s) = value.as_str() {
                    self.by_metadata
                        .entry((*field).to_string())
                        .or_default()
                        .entry(s.to_string())
                        .or_default()
                        .insert(artifact.id.clone());
                }
            }
        }
    }
}

fn lookup_dotted<'a>(metadata: &'a BTreeMap<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = metadata.get(first)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

#[derive(Debug)]
pub struct ArtifactStore {
    artifacts: BTreeMap<ArtifactId, Artifact>,
    indexes: Indexes,
    config: KernelConfig,
}

impl ArtifactStore {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            artifacts: BTreeMap::new(),
            indexes: Indexes::default(),
            config,
        }
    }

    pub fn exists(&self, id: &ArtifactId) -> bool {
        self.artifacts.contains_key(id)
    }

    /// Returns the artifact, or its tombstone-safe projection if deleted.
    /// Callers that need the live record (kernel-internal) should use
    /// `get_raw`; external-facing reads go through `get`.
    pub fn get(&self, id: &ArtifactId) -> Option<Value> {
        let artifact = self.artifacts.get(id)?;
        if artifact.deleted {
            Some(artifact.tombstone_view())
        } else {
            Some(serde_json::to_value(artifact).expect("artifact always serializes"))
        }
    }

    pub fn get_raw(&self, id: &ArtifactId) -> Option<&Artifact> {
        self.artifacts.get(id)
    }

    pub fn list_all(&self, include_deleted: bool) -> Vec<&Artifact> {
        self.artifacts
            .values()
            .filter(|a| include_deleted || !a.deleted)
            .collect()
    }

    pub fn by_type(&self, kind: &str) -> Vec<&Artifact> {
        self.indexes
            .by_type
            .get(kind)
            .into_iter()
            .flatten()
            .filter_map(|id| self.artifacts.get(id))
            .filter(|a| !a.deleted)
            .collect()
    }

    pub fn by_creator(&self, creator: &PrincipalId) -> Vec<&Artifact> {
        self.indexes
            .by_creator
            .get(creator)
            .into_iter()
            .flatten()
            .filter_map(|id| self.artifacts.get(id))
            .filter(|a| !a.deleted)
            .collect()
    }

    pub fn by_metadata(&self, field: &str, value: &str) -> Vec<&Artifact> {
        self.indexes
            .by_metadata
            .get(field)
            .and_then(|values| values.get(value))
            .into_iter()
            .flatten()
            .filter_map(|id| self.artifacts.get(id))
            .filter(|a| !a.deleted)
            .collect()
    }

    fn is_reserved(&self, id: &ArtifactId) -> Option<ReservedCheck> {
        let s = id.as_str();
        if let Some(owner) = s.strip_prefix("charge_delegation:") {
            return Some(ReservedCheck::OwnerOnly(PrincipalId::new(owner)));
        }
        if s.starts_with("right:") {
            return Some(ReservedCheck::KernelOnly);
        }
        None
    }

    /// Create-or-update. Enforces I-TYPE, I-CREATOR, I-CONTRACT,
    /// I-PROTECTED, I-DAG, I-RESERVED, I-SIZE.
    #[allow(clippy::too_many_arguments)]
    pub fn write(&mut self, params: WriteParams) -> Result<(), KernelError> {
        if let Some(check) = self.is_reserved(&params.id) {
            match check {
                ReservedCheck::OwnerOnly(owner) if owner != params.created_by => {
                    return Err(KernelError::PermissionDenied {
                        reason: format!(
                            "only {} may create {}",
                            owner.as_str(),
                            params.id.as_str()
                        ),
                    });
                }
                ReservedCheck::KernelOnly if !params.by_kernel => {
                    return Err(KernelError::PermissionDenied {
                        reason: format!("only the kernel may create {}", params.id.as_str()),
                    });
                }
                _ => {}
            }
        }

        if let Some(existing) = self.artifacts.get(&params.id) {
            if existing.deleted {
                return Err(KernelError::ArtifactTombstoned {
                    id: params.id.as_str().to_string(),
                });
            }
            if existing.kernel_protected {
                return Err(KernelError::ArtifactProtected {
                    id: params.id.as_str().to_string(),
                });
            }
            if existing.kind != params.kind {
                return Err(KernelError::InvalidArtifactType {
                    kind: params.kind.clone(),
                });
            }
            if existing.created_by != params.created_by {
                return Err(KernelError::PermissionDenied {
                    reason: "created_by is immutable".to_string(),
                });
            }
            if let Some(ref new_contract) = params.access_contract_id {
                if new_contract != &existing.access_contract_id && params.caller != existing.created_by
                {
                    return Err(KernelError::PermissionDenied {
                        reason: "only the creator may change access_contract_id".to_string(),
                    });
                }
            }
        }

        self.check_dag(&params.id, &params.depends_on)?;

        let now = Timestamp::now();
        let created_at = self
            .artifacts
            .get(&params.id)
            .map(|a| a.created_at)
            .unwrap_or(now);

        let mut metadata = params.metadata.clone();
        let invokes = extract_invoke_targets(&params.code);
        if !invokes.is_empty() {
            metadata.insert(
                "invokes".to_string(),
                serde_json::to_value(invokes).unwrap(),
            );
        }

        let content_digest =
            ContentDigest::compute(&[params.content.to_string().as_bytes(), params.code.as_bytes()]);

        let artifact = Artifact {
            id: params.id.clone(),
            kind: params.kind,
            content: params.content,
            code: params.code,
            executable: params.executable,
            created_by: params.created_by,
            created_at,
            updated_at: now,
            access_contract_id: params
                .access_contract_id
                .unwrap_or_else(|| default_contract()),
            policy: params.policy.unwrap_or_default(),
            metadata,
            depends_on: params.depends_on,
            has_standing: params.has_standing,
            can_execute: params.can_execute,
            deleted: false,
            deleted_at: None,
            deleted_by: None,
            kernel_protected: params.kernel_protected,
            interface: params.interface,
            content_digest,
        };

        self.enforce_size_quota(&artifact)?;

        if let Some(existing) = self.artifacts.get(&params.id) {
            self.indexes.remove_artifact(existing);
        }
        self.indexes.index_artifact(&artifact);
        self.artifacts.insert(params.id, artifact);
        Ok(())
    }

    /// The only path that may mutate a kernel-protected artifact. Does not
    /// re-run I-TYPE/I-CONTRACT checks: the kernel is trusted.
    pub fn modify_protected_content(
        &mut self,
        id: &ArtifactId,
        content: Option<Value>,
        code: Option<String>,
        metadata: Option<BTreeMap<String, Value>>,
    ) -> Result<(), KernelError> {
        let artifact = self
            .artifacts
            .get_mut(id)
            .ok_or_else(|| KernelError::ArtifactNotFound {
                id: id.as_str().to_string(),
            })?;
        if let Some(c) = content {
            artifact.content = c;
        }
        if let Some(c) = code {
            artifact.code = c;
        }
        if let Some(m) = metadata {
            artifact.metadata = m;
        }
        artifact.content_digest = ContentDigest::compute(&[
            artifact.content.to_string().as_bytes(),
            artifact.code.as_bytes(),
        ]);
        artifact.updated_at = Timestamp::now();
        Ok(())
    }

    /// Create a fresh kernel-protected artifact directly, bypassing the
    /// normal write-path checks; used by the delegation manager to create
    /// `charge_delegation:{payer}` the first time.
    pub fn create_protected(&mut self, artifact: Artifact) {
        self.indexes.index_artifact(&artifact);
        self.artifacts.insert(artifact.id.clone(), artifact);
    }

    pub fn transfer_ownership(
        &mut self,
        id: &ArtifactId,
        to: &PrincipalId,
    ) -> Result<(), KernelError> {
        let artifact = self
            .artifacts
            .get_mut(id)
            .ok_or_else(|| KernelError::ArtifactNotFound {
                id: id.as_str().to_string(),
            })?;
        if artifact.deleted {
            return Err(KernelError::ArtifactTombstoned {
                id: id.as_str().to_string(),
            });
        }
        artifact
            .metadata
            .insert("controller".to_string(), Value::String(to.as_str().to_string()));
        artifact.updated_at = Timestamp::now();
        Ok(())
    }

    pub fn delete(&mut self, id: &ArtifactId, by: &PrincipalId) -> Result<(), KernelError> {
        if self.config.genesis_set.iter().any(|g| g == id.as_str())
            || id.as_str().starts_with("genesis_")
        {
            return Err(KernelError::PermissionDenied {
                reason: format!("{} is in the genesis set and cannot be deleted", id.as_str()),
            });
        }
        let artifact = self
            .artifacts
            .get_mut(id)
            .ok_or_else(|| KernelError::ArtifactNotFound {
                id: id.as_str().to_string(),
            })?;
        if artifact.deleted {
            return Err(KernelError::ArtifactTombstoned {
                id: id.as_str().to_string(),
            });
        }
        artifact.deleted = true;
        artifact.deleted_at = Some(Timestamp::now());
        artifact.deleted_by = Some(by.clone());
        self.indexes.remove_artifact(artifact);
        Ok(())
    }

    fn enforce_size_quota(&self, candidate: &Artifact) -> Result<(), KernelError> {
        let existing_size: usize = self
            .artifacts
            .values()
            .filter(|a| a.created_by == candidate.created_by && a.id != candidate.id && !a.deleted)
            .map(|a| a.byte_size())
            .sum();
        let total = existing_size + candidate.byte_size();
        if total as u64 > self.config.default_disk_quota {
            return Err(KernelError::ArtifactTooLarge {
                size: total,
                limit: self.config.default_disk_quota as usize,
            });
        }
        Ok(())
    }

    /// I-DAG: `depends_on` must reference existing non-deleted artifacts;
    /// the transitive graph must be acyclic and within the configured
    /// depth limit. Checked at write time, not invoke time (§9).
    fn check_dag(&self, id: &ArtifactId, depends_on: &[ArtifactId]) -> Result<(), KernelError> {
        for dep in depends_on {
            match self.artifacts.get(dep) {
                None => {
                    return Err(KernelError::MissingDependency {
                        id: dep.as_str().to_string(),
                    })
                }
                Some(a) if a.deleted => {
                    return Err(KernelError::MissingDependency {
                        id: dep.as_str().to_string(),
                    })
                }
                _ => {}
            }
        }

        let mut visited: BTreeSet<ArtifactId> = BTreeSet::new();
        let mut stack: Vec<(ArtifactId, u32)> = depends_on.iter().cloned().map(|d| (d, 1)).collect();
        let mut max_depth = 0;
        while let Some((current, depth)) = stack.pop() {
            if current == *id {
                return Err(KernelError::DependencyCycle {
                    id: id.as_str().to_string(),
                });
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            max_depth = max_depth.max(depth);
            if depth > self.config.max_dependency_depth {
                return Err(KernelError::DepthExceeded {
                    depth,
                    limit: self.config.max_dependency_depth,
                });
            }
            if let Some(a) = self.artifacts.get(&current) {
                for child in &a.depends_on {
                    stack.push((child.clone(), depth + 1));
                }
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Artifact> {
        self.artifacts.values().cloned().collect()
    }

    pub fn restore(&mut self, artifacts: Vec<Artifact>) {
        self.artifacts.clear();
        self.indexes = Indexes::default();
        for artifact in artifacts {
            self.indexes.index_artifact(&artifact);
            self.artifacts.insert(artifact.id.clone(), artifact);
        }
    }
}

enum ReservedCheck {
    OwnerOnly(PrincipalId),
    KernelOnly,
}

#[derive(Debug, Clone, Default)]
pub struct WriteParams {
    pub id: ArtifactId,
    pub kind: String,
    pub content: Value,
    pub code: String,
    pub executable: bool,
    pub created_by: PrincipalId,
    pub caller: PrincipalId,
    pub access_contract_id: Option<String>,
    pub policy: Option<Policy>,
    pub metadata: BTreeMap<String, Value>,
    pub depends_on: Vec<ArtifactId>,
    pub has_standing: bool,
    pub can_execute: bool,
    pub kernel_protected: bool,
    pub interface: Option<Value>,
    pub by_kernel: bool,
}

/// Scans `code` for static `invoke("<id>", ...)` call sites. False
/// positives from string literals or comments are a documented
/// limitation, not a bug: replacing the regex with a real parser would be
/// a silent behavior change (§9 open question).
fn extract_invoke_targets(code: &str) -> Vec<String> {
    let mut targets: Vec<String> = INVOKE_CALL_RE
        .captures_iter(code)
        .map(|c| c[1].to_string())
        .collect();
    targets.sort();
    targets.dedup();
    targets
}
