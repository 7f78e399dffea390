//! Thin newtypes over `String` for the two identifier spaces the kernel
//! distinguishes: principals (agents, pools, the treasury) and artifacts.
//!
//! Kept as newtypes rather than bare `String` so that call sites which mean
//! "a principal" can't accidentally be handed an artifact id, the same
//! reason the teacher keeps `ActorID` distinct from a raw integer.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for `pool:*` ids such as the UBI pool.
    pub fn is_pool(&self) -> bool {
        self.0.starts_with(crate::POOL_PREFIX)
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PrincipalId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub String);

impl ArtifactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ArtifactId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_prefix_detection() {
        assert!(PrincipalId::new("pool:ubi").is_pool());
        assert!(!PrincipalId::new("agent-7").is_pool());
    }

    #[test]
    fn json_roundtrip_is_transparent() {
        let id = ArtifactId::new("artifact-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"artifact-1\"");
        let back: ArtifactId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
