//! Role-based authorization for listing and collection mutations.
//!
//! The identity layer resolves credentials into a [`Principal`]; everything
//! below is a pure decision over that value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, DirectoryResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Owner,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Owner => "owner",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(id, Role::User)
    }

    pub fn owner(id: impl Into<String>) -> Self {
        Self::new(id, Role::Owner)
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Submit,
    Moderate,
    SelfEdit,
    SelfDelete,
    AdminDelete,
    AdminEdit,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Submit,
        Action::Moderate,
        Action::SelfEdit,
        Action::SelfDelete,
        Action::AdminDelete,
        Action::AdminEdit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Submit => "submit",
            Action::Moderate => "moderate",
            Action::SelfEdit => "self_edit",
            Action::SelfDelete => "self_delete",
            Action::AdminDelete => "admin_delete",
            Action::AdminEdit => "admin_edit",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn can_perform(principal: &Principal, action: Action, resource_owner_id: Option<&str>) -> bool {
    match principal.role {
        Role::Admin => true,
        Role::Owner => match action {
            Action::Submit => true,
            Action::SelfEdit | Action::SelfDelete => {
                resource_owner_id == Some(principal.id.as_str())
            }
            Action::Moderate | Action::AdminDelete | Action::AdminEdit => false,
        },
        Role::User => false,
    }
}

/// [`can_perform`] as a `Result`, with the denial turned into `Forbidden`.
pub fn require(
    principal: &Principal,
    action: Action,
    resource_owner_id: Option<&str>,
) -> DirectoryResult<()> {
    if can_perform(principal, action, resource_owner_id) {
        Ok(())
    } else {
        Err(DirectoryError::forbidden(format!(
            "{} {} may not {}",
            principal.role, principal.id, action
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn admin_passes_everything() {
        let admin = Principal::admin("root");
        for action in Action::ALL {
            assert!(can_perform(&admin, action, None));
            assert!(can_perform(&admin, action, Some("someone-else")));
        }
    }

    #[test]
    fn user_passes_nothing() {
        let user = Principal::user("u1");
        for action in Action::ALL {
            assert!(!can_perform(&user, action, None));
            assert!(!can_perform(&user, action, Some("u1")));
        }
    }

    #[test]
    fn owner_rules() {
        let owner = Principal::owner("o1");
        assert!(can_perform(&owner, Action::Submit, None));
        assert!(can_perform(&owner, Action::SelfEdit, Some("o1")));
        assert!(can_perform(&owner, Action::SelfDelete, Some("o1")));
        assert!(!can_perform(&owner, Action::SelfEdit, Some("o2")));
        assert!(!can_perform(&owner, Action::SelfDelete, None));
        assert!(!can_perform(&owner, Action::Moderate, None));
        assert!(!can_perform(&owner, Action::AdminDelete, Some("o1")));
        assert!(!can_perform(&owner, Action::AdminEdit, Some("o1")));
    }

    #[test]
    fn require_reports_forbidden() {
        let err = require(&Principal::owner("o1"), Action::Moderate, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.to_string(), "forbidden: owner o1 may not moderate");
    }

    #[test]
    fn roles_round_trip_through_strings() {
        for role in [Role::User, Role::Owner, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("superuser".parse::<Role>().is_err());
    }
}
