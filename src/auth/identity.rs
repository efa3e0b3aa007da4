use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Role key used for limits that apply when no other role matches
pub const ANONYMOUS_ROLE: &str = "anonymous";

const ANONYMOUS_ID: &str = "0";

/// The account a request acts as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub roles: BTreeSet<String>,
}

impl Identity {
    pub fn new<I, S>(id: impl Into<String>, name: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Well-known sentinel for unauthenticated requests; carries no roles
    pub fn anonymous() -> Self {
        Self {
            id: ANONYMOUS_ID.to_string(),
            name: ANONYMOUS_ROLE.to_string(),
            roles: BTreeSet::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id == ANONYMOUS_ID
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_any_role<'a, I>(&self, roles: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        roles.into_iter().any(|r| self.roles.contains(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_has_no_roles() {
        let anon = Identity::anonymous();
        assert!(anon.is_anonymous());
        assert!(anon.roles.is_empty());
        assert!(!Identity::new("7", "ada", ["editor"]).is_anonymous());
    }
}
