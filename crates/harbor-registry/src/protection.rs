//! Tag protection policy engine.
//!
//! Policies are kept in insertion order. Modification checks resolve the
//! matching policy with the highest priority (earliest wins on ties); delete
//! checks veto on the first matching policy that does not allow deletion.
//! The two rules are intentionally different.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use harbor_audit::{AuditLogger, ProtectionEvent};
use parking_lot::RwLock;
use regex_lite::Regex;
use serde::{Serialize, Serializer};
use tracing::{debug, info};

use crate::error::{RegistryError, Result};

/// Compiled pattern matched against `repository:tag` references.
#[derive(Clone)]
pub struct TagPattern {
    source: String,
    regex: Regex,
}

impl TagPattern {
    /// Compiles a pattern. Empty patterns are rejected.
    pub fn new(pattern: &str) -> std::result::Result<Self, String> {
        if pattern.trim().is_empty() {
            return Err("pattern cannot be empty".to_string());
        }
        let regex = Regex::new(pattern).map_err(|e| format!("invalid pattern: {e}"))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Returns the pattern source.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if the reference matches.
    pub fn is_match(&self, tag_ref: &str) -> bool {
        self.regex.is_match(tag_ref)
    }
}

impl fmt::Debug for TagPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TagPattern").field(&self.source).finish()
    }
}

impl fmt::Display for TagPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for TagPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for TagPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

/// A named tag protection rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtectionPolicy {
    /// Policy name. Not required to be unique.
    pub name: String,
    /// Pattern matched against `repository:tag`.
    pub pattern: TagPattern,
    /// Blocks every modification of matching tags.
    pub immutable: bool,
    /// Blocks modification while a tag is younger than this. Zero disables.
    #[serde(serialize_with = "serialize_secs")]
    pub max_age: Duration,
    /// Whether matching tags may be deleted.
    pub allow_delete: bool,
    /// Higher priority wins when several policies match.
    pub priority: i32,
}

impl ProtectionPolicy {
    /// Creates a policy with no restrictions beyond the pattern.
    ///
    /// Returns `InvalidPolicy` if the pattern is empty or does not compile.
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self> {
        let name = name.into();
        let pattern =
            TagPattern::new(pattern).map_err(|reason| RegistryError::invalid_policy(&name, reason))?;
        Ok(Self {
            name,
            pattern,
            immutable: false,
            max_age: Duration::ZERO,
            allow_delete: false,
            priority: 0,
        })
    }

    /// Marks matching tags immutable.
    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    /// Protects matching tags until they reach `max_age`.
    #[must_use]
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Allows deletion of matching tags.
    #[must_use]
    pub fn allow_delete(mut self) -> Self {
        self.allow_delete = true;
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Returns true if the policy's pattern matches the reference.
    pub fn matches(&self, tag_ref: &str) -> bool {
        self.pattern.is_match(tag_ref)
    }
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

/// Outcome of a modify or delete check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectionDecision {
    /// Whether the action is permitted.
    pub allowed: bool,
    /// Reason for a denial. Empty when allowed.
    pub reason: String,
    /// Policy that decided, if any matched.
    pub policy: Option<String>,
}

impl ProtectionDecision {
    fn allow(policy: Option<String>) -> Self {
        Self {
            allowed: true,
            reason: String::new(),
            policy,
        }
    }

    fn deny(policy: String, reason: String) -> Self {
        Self {
            allowed: false,
            reason,
            policy: Some(policy),
        }
    }
}

/// Tag protection engine.
pub struct TagProtection {
    policies: RwLock<Vec<ProtectionPolicy>>,
    audit: Arc<AuditLogger>,
}

impl TagProtection {
    /// Creates an empty engine.
    pub fn new(audit: Arc<AuditLogger>) -> Self {
        Self {
            policies: RwLock::new(Vec::new()),
            audit,
        }
    }

    /// Appends a policy. Policies with duplicate names are kept side by side.
    pub fn add_policy(&self, policy: ProtectionPolicy) -> Result<()> {
        if policy.name.trim().is_empty() {
            return Err(RegistryError::invalid_policy(
                &policy.name,
                "policy name cannot be empty",
            ));
        }

        let event = ProtectionEvent::policy_added(&policy.name, policy.pattern.as_str());
        info!(
            policy = %policy.name,
            pattern = %policy.pattern,
            priority = policy.priority,
            "Added protection policy"
        );
        self.policies.write().push(policy);
        self.audit.record(&event);
        Ok(())
    }

    /// Removes the first policy with this name. Returns whether one was removed.
    pub fn remove_policy(&self, name: &str) -> bool {
        let removed = {
            let mut policies = self.policies.write();
            policies
                .iter()
                .position(|p| p.name == name)
                .map(|idx| policies.remove(idx))
        };

        if removed.is_some() {
            info!(policy = %name, "Removed protection policy");
            self.audit.record(&ProtectionEvent::policy_removed(name));
            true
        } else {
            false
        }
    }

    /// Returns a snapshot of all policies in insertion order.
    pub fn list_policies(&self) -> Vec<ProtectionPolicy> {
        self.policies.read().clone()
    }

    /// Number of policies.
    pub fn len(&self) -> usize {
        self.policies.read().len()
    }

    /// Returns true if no policies are configured.
    pub fn is_empty(&self) -> bool {
        self.policies.read().is_empty()
    }

    /// Checks whether `repository:tag` may be modified given the tag's age.
    pub fn can_modify(&self, repository: &str, tag: &str, age: Duration) -> ProtectionDecision {
        let tag_ref = tag_ref(repository, tag);

        let winner = {
            let policies = self.policies.read();
            let mut best: Option<&ProtectionPolicy> = None;
            for policy in policies.iter().filter(|p| p.matches(&tag_ref)) {
                if best.map_or(true, |b| policy.priority > b.priority) {
                    best = Some(policy);
                }
            }
            best.map(|p| (p.name.clone(), p.immutable, p.max_age))
        };

        let decision = match winner {
            None => ProtectionDecision::allow(None),
            Some((name, true, _)) => {
                let reason = format!("tag is immutable (policy: {name})");
                ProtectionDecision::deny(name, reason)
            }
            Some((name, false, max_age)) if !max_age.is_zero() && age < max_age => {
                let reason = format!(
                    "tag protected for {} (policy: {name})",
                    format_remaining(max_age - age)
                );
                ProtectionDecision::deny(name, reason)
            }
            Some((name, _, _)) => ProtectionDecision::allow(Some(name)),
        };

        if let (false, Some(policy)) = (decision.allowed, &decision.policy) {
            info!(tag_ref = %tag_ref, policy = %policy, reason = %decision.reason, "Modification blocked");
            self.audit
                .record(&ProtectionEvent::modify_blocked(&tag_ref, policy, &decision.reason));
        } else {
            debug!(tag_ref = %tag_ref, "Modification allowed");
        }

        decision
    }

    /// Checks whether `repository:tag` may be deleted.
    pub fn can_delete(&self, repository: &str, tag: &str) -> ProtectionDecision {
        let tag_ref = tag_ref(repository, tag);

        let veto = self
            .policies
            .read()
            .iter()
            .find(|p| !p.allow_delete && p.matches(&tag_ref))
            .map(|p| p.name.clone());

        match veto {
            Some(name) => {
                let reason = format!("tag deletion not allowed (policy: {name})");
                info!(tag_ref = %tag_ref, policy = %name, "Deletion blocked");
                self.audit
                    .record(&ProtectionEvent::delete_blocked(&tag_ref, &name, &reason));
                ProtectionDecision::deny(name, reason)
            }
            None => {
                debug!(tag_ref = %tag_ref, "Deletion allowed");
                ProtectionDecision::allow(None)
            }
        }
    }
}

impl fmt::Debug for TagProtection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagProtection")
            .field("policies", &self.policies.read().len())
            .finish_non_exhaustive()
    }
}

fn tag_ref(repository: &str, tag: &str) -> String {
    format!("{repository}:{tag}")
}

/// Formats a remaining protection window as `1h2m3s`.
fn format_remaining(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}
