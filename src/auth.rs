use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Reception,
    Security,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Reception => "reception",
            Role::Security => "security",
        }
    }

    pub fn can(&self, action: Action) -> bool {
        match action {
            Action::CreatePass | Action::DecideRequest => {
                matches!(self, Role::Admin | Role::Reception)
            }
            Action::ListPasses => true,
            Action::Scan => matches!(self, Role::Admin | Role::Security),
            Action::DeletePass | Action::ViewDashboard | Action::Export => {
                matches!(self, Role::Admin)
            }
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    CreatePass,
    DecideRequest,
    ListPasses,
    Scan,
    DeletePass,
    ViewDashboard,
    Export,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::CreatePass => "create passes",
            Action::DecideRequest => "approve or decline requests",
            Action::ListPasses => "list passes",
            Action::Scan => "check visitors in or out",
            Action::DeletePass => "delete passes",
            Action::ViewDashboard => "view the dashboard",
            Action::Export => "export passes",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub email: String,
    pub name: String,
    pub role: Role,
}

struct DemoUser {
    email: &'static str,
    name: &'static str,
    role: Role,
    password: &'static str,
}

const DEMO_USERS: &[DemoUser] = &[
    DemoUser {
        email: "admin@demo",
        name: "Admin",
        role: Role::Admin,
        password: "admin",
    },
    DemoUser {
        email: "reception@demo",
        name: "Reception",
        role: Role::Reception,
        password: "reception",
    },
    DemoUser {
        email: "security@demo",
        name: "Security",
        role: Role::Security,
        password: "security",
    },
];

pub fn login(email: &str, password: &str) -> Option<User> {
    DEMO_USERS
        .iter()
        .find(|u| u.email == email.trim() && u.password == password)
        .map(|u| User {
            email: u.email.to_string(),
            name: u.name.to_string(),
            role: u.role,
        })
}

/// Who is acting. Anonymous sessions are visitors using self-service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    user: Option<User>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    pub fn for_user(user: User) -> Self {
        Self { user: Some(user) }
    }

    pub fn role(&self) -> Option<Role> {
        self.user.as_ref().map(|u| u.role)
    }

    pub fn has_role(&self, roles: &[Role]) -> bool {
        self.role().is_some_and(|role| roles.contains(&role))
    }

    pub fn can(&self, action: Action) -> bool {
        self.role().is_some_and(|role| role.can(action))
    }

    /// Name recorded in audit fields: display name, then email, then role.
    pub fn actor(&self) -> Option<String> {
        let user = self.user.as_ref()?;
        [user.name.as_str(), user.email.as_str(), user.role.as_str()]
            .into_iter()
            .find(|s| !s.trim().is_empty())
            .map(str::to_string)
    }

    pub fn describe(&self) -> String {
        self.role()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "anonymous visitor".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_matches_demo_credentials() {
        let user = login("reception@demo", "reception").unwrap();
        assert_eq!(user.role, Role::Reception);
        assert!(login("reception@demo", "wrong").is_none());
        assert!(login("nobody@demo", "admin").is_none());
    }

    #[test]
    fn role_permissions() {
        assert!(Role::Admin.can(Action::DeletePass));
        assert!(!Role::Reception.can(Action::DeletePass));
        assert!(Role::Reception.can(Action::DecideRequest));
        assert!(!Role::Security.can(Action::DecideRequest));
        assert!(Role::Security.can(Action::Scan));
        assert!(!Role::Reception.can(Action::Scan));
        assert!(Role::Security.can(Action::ListPasses));
    }

    #[test]
    fn anonymous_session_has_no_permissions() {
        let session = Session::anonymous();
        assert!(!session.can(Action::ListPasses));
        assert!(!session.has_role(&[Role::Admin, Role::Reception]));
        assert_eq!(session.actor(), None);
        assert_eq!(session.describe(), "anonymous visitor");
    }

    #[test]
    fn actor_prefers_display_name() {
        let session = Session::for_user(login("admin@demo", "admin").unwrap());
        assert_eq!(session.actor().as_deref(), Some("Admin"));
        assert!(session.has_role(&[Role::Admin]));
    }
}
