//! YAML policy files.
//!
//! ```yaml
//! name: production
//! policies:
//!   - name: prod-immutable
//!     pattern: '.*:v\d+\.\d+\.\d+$'
//!     immutable: true
//!     priority: 10
//!   - name: fresh-tags
//!     pattern: '.*'
//!     max_age_secs: 3600
//!     allow_delete: true
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protection::{ProtectionPolicy, TagProtection};

/// A policy as written in a policy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    /// Policy name.
    pub name: String,

    /// Pattern matched against `repository:tag`.
    pub pattern: String,

    /// Blocks every modification of matching tags.
    #[serde(default)]
    pub immutable: bool,

    /// Minimum tag age in seconds before modification is allowed.
    #[serde(default)]
    pub max_age_secs: u64,

    /// Whether matching tags may be deleted.
    #[serde(default)]
    pub allow_delete: bool,

    /// Higher priority wins when several policies match.
    #[serde(default)]
    pub priority: i32,
}

impl PolicyDefinition {
    /// Compiles the definition into a policy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPolicy` if the pattern is empty or invalid.
    pub fn compile(&self) -> Result<ProtectionPolicy> {
        let mut policy = ProtectionPolicy::new(&self.name, &self.pattern)?
            .max_age(Duration::from_secs(self.max_age_secs))
            .priority(self.priority);
        policy.immutable = self.immutable;
        policy.allow_delete = self.allow_delete;
        Ok(policy)
    }
}

/// A collection of policy definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySet {
    /// Optional name for the set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Policies in evaluation order.
    #[serde(default)]
    pub policies: Vec<PolicyDefinition>,
}

impl PolicySet {
    /// Parses a policy set from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid policy set.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Loads a policy set from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Number of policies in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Returns true if the set has no policies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Compiles every definition and adds it to the engine in file order.
    ///
    /// All definitions are compiled before any is added, so a bad entry
    /// leaves the engine untouched.
    ///
    /// # Errors
    ///
    /// Returns the first `InvalidPolicy` encountered.
    pub fn apply(&self, engine: &TagProtection) -> Result<usize> {
        let compiled = self
            .policies
            .iter()
            .map(PolicyDefinition::compile)
            .collect::<Result<Vec<_>>>()?;

        let count = compiled.len();
        for policy in compiled {
            engine.add_policy(policy)?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use harbor_audit::AuditLogger;
    use std::io::Write;
    use std::sync::Arc;

    const SAMPLE: &str = r#"
name: production
policies:
  - name: prod-immutable
    pattern: '.*:v\d+\.\d+\.\d+$'
    immutable: true
    priority: 10
  - name: fresh-tags
    pattern: '.*'
    max_age_secs: 3600
    allow_delete: true
"#;

    #[test]
    fn test_parse_defaults() {
        let set = PolicySet::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(set.name.as_deref(), Some("production"));
        assert_eq!(set.len(), 2);

        let fresh = &set.policies[1];
        assert!(!fresh.immutable);
        assert_eq!(fresh.priority, 0);
        assert!(fresh.allow_delete);
        assert!(!set.policies[0].allow_delete);
    }

    #[test]
    fn test_compile_definition() {
        let set = PolicySet::from_yaml_str(SAMPLE).unwrap();
        let policy = set.policies[1].compile().unwrap();
        assert_eq!(policy.max_age, Duration::from_secs(3600));
        assert!(policy.matches("library/app:latest"));
    }

    #[test]
    fn test_apply_loads_engine() {
        let engine = TagProtection::new(Arc::new(AuditLogger::disabled()));
        let set = PolicySet::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(set.apply(&engine).unwrap(), 2);

        let decision = engine.can_modify("library/nginx", "v1.2.3", Duration::from_secs(86_400));
        assert!(!decision.allowed);
        assert!(decision.reason.contains("prod-immutable"));
    }

    #[test]
    fn test_apply_is_all_or_nothing() {
        let engine = TagProtection::new(Arc::new(AuditLogger::disabled()));
        let set = PolicySet::from_yaml_str(
            "policies:\n  - name: ok\n    pattern: '.*'\n  - name: broken\n    pattern: ''\n",
        )
        .unwrap();

        let err = set.apply(&engine).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPolicy { ref name, .. } if name == "broken"));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_invalid_yaml() {
        let err = PolicySet::from_yaml_str("policies: [ {name: 1").unwrap_err();
        assert!(matches!(err, RegistryError::PolicyFile(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let set = PolicySet::from_file(file.path()).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_missing_file() {
        let err = PolicySet::from_file("/nonexistent/harbor/policies.yaml").unwrap_err();
        assert!(matches!(err, RegistryError::Io(_)));
    }
}
