use serde_json::Value;

use ocse_core::{CseError, Operation};
use ocse_model::{Resource, ResourceType};

use crate::Cse;

impl Cse {
    /// Evaluate access control for an operation on a target resource.
    ///
    /// For CREATE the caller passes the parent as `target` (a new resource
    /// inherits its context). A target without `acpi` inherits from its
    /// nearest ancestor that carries one; ACP resources are guarded by their
    /// own `pvs`.
    pub(crate) async fn check_access(
        &self,
        originator: &str,
        op: Operation,
        target: &Resource,
    ) -> Result<(), CseError> {
        if !self.inner.config.security.enable_acp_checks {
            return Ok(());
        }
        if self.is_admin(originator) {
            return Ok(());
        }
        if originator == self.inner.config.cse_id {
            return Ok(());
        }
        // Announced copies are managed by the CSE that announced them.
        if target.ty().is_announced() && self.remote_by_csi(originator).is_some() {
            return Ok(());
        }

        if target.ty() == ResourceType::Acp {
            // Self-privileges guard access to the policy itself.
            if acr_grants(target.get("pvs"), originator, op) {
                return Ok(());
            }
            return Err(CseError::no_privilege(format!(
                "originator {originator} has no {op} privilege on policy {}",
                target.ri()
            )));
        }

        let acpi = self.effective_acpi(target).await?;
        self.check_access_with(&acpi, originator, op, target.ri()).await
    }

    /// Evaluate an explicit ACP list (used for group `macp` and the
    /// subscription originator filter).
    pub(crate) async fn check_access_with(
        &self,
        acpi: &[String],
        originator: &str,
        op: Operation,
        target_ri: &str,
    ) -> Result<(), CseError> {
        if !self.inner.config.security.enable_acp_checks || self.is_admin(originator) {
            return Ok(());
        }
        for acp_ref in acpi {
            let Some(acp) = self.resolve_reference(acp_ref).await? else {
                // Broken policy references degrade to "no grant from here".
                tracing::debug!(acp = %acp_ref, "dangling acpi reference");
                continue;
            };
            if acp.ty() != ResourceType::Acp {
                continue;
            }
            if acr_grants(acp.get("pv"), originator, op) {
                return Ok(());
            }
        }
        Err(CseError::no_privilege(format!(
            "originator {originator} has no {op} privilege on {target_ri}"
        )))
    }

    pub(crate) fn is_admin(&self, originator: &str) -> bool {
        self.inner.config.security.full_access_admin
            && originator == self.inner.config.admin_originator
    }

    /// The ACP references governing a resource: its own `acpi`, or the
    /// nearest ancestor's when absent.
    async fn effective_acpi(&self, target: &Resource) -> Result<Vec<String>, CseError> {
        let mut current = target.clone();
        loop {
            let acpi = current.acpi();
            if !acpi.is_empty() {
                return Ok(acpi);
            }
            if current.pi().is_empty() {
                return Ok(Vec::new());
            }
            match self.inner.storage.resource_by_ri(current.pi()).await? {
                Some(parent) => current = parent,
                None => return Ok(Vec::new()),
            }
        }
    }

    /// Resolve an ACP reference given as ri, srn, or SP-relative address.
    async fn resolve_reference(&self, reference: &str) -> Result<Option<Resource>, CseError> {
        let local = reference
            .strip_prefix(&format!("{}/", self.inner.config.cse_id))
            .unwrap_or(reference);
        if local.contains('/') {
            Ok(self.inner.storage.resource_by_srn(local).await?)
        } else {
            Ok(self.inner.storage.resource_by_ri(local).await?)
        }
    }
}

/// Whether a privilege set (`pv`/`pvs` holding `{"acr": [...]}`) grants the
/// operation to the originator.
fn acr_grants(privileges: Option<&Value>, originator: &str, op: Operation) -> bool {
    let Some(entries) = privileges
        .and_then(|pv| pv.get("acr"))
        .and_then(Value::as_array)
    else {
        return false;
    };
    let mut mask = 0u32;
    for entry in entries {
        let matched = entry
            .get("acor")
            .and_then(Value::as_array)
            .is_some_and(|patterns| {
                patterns
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|pattern| originator_matches(pattern, originator))
            });
        if matched {
            mask |= entry.get("acop").and_then(Value::as_u64).unwrap_or(0) as u32;
        }
    }
    mask & op.acop_bit() != 0
}

/// Match an `acor` pattern against an originator: the `all` keyword, glob
/// wildcards `*`/`?`, a CSE-ID prefix, or an exact identifier.
fn originator_matches(pattern: &str, originator: &str) -> bool {
    if pattern == "all" {
        return true;
    }
    if pattern.starts_with('/') && !pattern.contains(['*', '?']) {
        // CSE-ID pattern: matches the CSE itself and originators under it.
        return originator == pattern
            || originator
                .strip_prefix(pattern)
                .is_some_and(|rest| rest.starts_with('/'));
    }
    glob_match(pattern, originator)
}

fn glob_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    // Iterative glob with backtracking on '*'.
    let (mut pi, mut vi) = (0usize, 0usize);
    let (mut star, mut star_vi) = (None::<usize>, 0usize);
    while vi < v.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            star_vi = vi;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            star_vi += 1;
            vi = star_vi;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
