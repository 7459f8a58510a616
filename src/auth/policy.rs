//! Attribute-based access control (spec §4.6 "Policy evaluation (ABAC)").
//!
//! Evaluates an ordered list of rules; the first match wins. Default deny
//! falls through with reason `no_matching_rule`.

use crate::models::{Role, User};

/// The resource-side attributes a policy decision is evaluated against.
#[derive(Debug, Clone)]
pub struct ResourceAttributes {
    pub confidentiality: u8,
    pub department: String,
    pub owner_id: String,
}

/// Outcome of evaluating the rule list against a user/resource pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: &'static str,
}

/// Evaluate the default rule set (spec §4.6), highest priority first:
/// 1. admin role -> allow
/// 2. clearance >= confidentiality -> allow
/// 3. same department -> allow
/// 4. owner -> allow
/// 5. public document -> allow
/// else -> deny (`no_matching_rule`)
pub fn evaluate(user: &User, resource: &ResourceAttributes) -> PolicyDecision {
    if user.has_role(Role::Admin) {
        return PolicyDecision {
            allowed: true,
            reason: "admin_role",
        };
    }
    if user.clearance_level >= resource.confidentiality {
        return PolicyDecision {
            allowed: true,
            reason: "clearance_sufficient",
        };
    }
    if user.department == resource.department {
        return PolicyDecision {
            allowed: true,
            reason: "same_department",
        };
    }
    if user.user_id == resource.owner_id {
        return PolicyDecision {
            allowed: true,
            reason: "resource_owner",
        };
    }
    if resource.confidentiality == 0 {
        return PolicyDecision {
            allowed: true,
            reason: "public_document",
        };
    }
    PolicyDecision {
        allowed: false,
        reason: "no_matching_rule",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn user(clearance: u8, department: &str, roles: Vec<Role>) -> User {
        User {
            user_id: "u1".to_string(),
            username: "alice".to_string(),
            password_hash: String::new(),
            department: department.to_string(),
            clearance_level: clearance,
            roles,
            email: None,
            active: true,
            attributes: HashMap::new(),
        }
    }

    #[test]
    fn admin_always_allowed() {
        let user = user(0, "legal", vec![Role::Admin]);
        let resource = ResourceAttributes {
            confidentiality: 3,
            department: "finance".into(),
            owner_id: "other".into(),
        };
        assert!(evaluate(&user, &resource).allowed);
    }

    #[test]
    fn clearance_at_or_above_confidentiality_allows() {
        let user = user(2, "finance", vec![Role::Viewer]);
        let resource = ResourceAttributes {
            confidentiality: 2,
            department: "legal".into(),
            owner_id: "other".into(),
        };
        let decision = evaluate(&user, &resource);
        assert!(decision.allowed);
        assert_eq!(decision.reason, "clearance_sufficient");
    }

    #[test]
    fn clearance_one_below_confidentiality_two_denies_without_other_match() {
        let user = user(1, "finance", vec![Role::Viewer]);
        let resource = ResourceAttributes {
            confidentiality: 2,
            department: "legal".into(),
            owner_id: "other".into(),
        };
        let decision = evaluate(&user, &resource);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "no_matching_rule");
    }

    #[test]
    fn public_document_always_allowed() {
        let user = user(0, "finance", vec![Role::Viewer]);
        let resource = ResourceAttributes {
            confidentiality: 0,
            department: "legal".into(),
            owner_id: "other".into(),
        };
        assert!(evaluate(&user, &resource).allowed);
    }
}
