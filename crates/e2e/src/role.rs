//! Personas recognised by the clinic application

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// A user persona a scenario runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Anonymous,
    Patient,
    Attendant,
    #[serde(alias = "staff", alias = "admin")]
    StaffAdmin,
    Owner,
}

impl Role {
    /// Roles that log in before a scenario runs.
    pub const PRIVILEGED: [Role; 4] = [Role::Patient, Role::Attendant, Role::StaffAdmin, Role::Owner];

    pub fn is_privileged(self) -> bool {
        self != Role::Anonymous
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Anonymous => "anonymous",
            Role::Patient => "patient",
            Role::Attendant => "attendant",
            Role::StaffAdmin => "staff_admin",
            Role::Owner => "owner",
        }
    }

    /// Prefix of the `<PREFIX>_USERNAME` / `<PREFIX>_PASSWORD` variables.
    pub fn env_prefix(self) -> Option<&'static str> {
        match self {
            Role::Anonymous => None,
            Role::Patient => Some("PATIENT"),
            Role::Attendant => Some("ATTENDANT"),
            Role::StaffAdmin => Some("STAFF"),
            Role::Owner => Some("OWNER"),
        }
    }

    pub fn descriptor(self) -> Option<&'static RoleDescriptor> {
        DESCRIPTORS.iter().find(|d| d.role == self)
    }

    /// Seeded development personas. Never used outside the development profile.
    pub fn fixture_credentials(self) -> Option<Credentials> {
        let (username, password) = match self {
            Role::Anonymous => return None,
            Role::Patient => ("maria.santos", "TestPass123!"),
            Role::Attendant => ("attendant.01", "AttendPass123!"),
            Role::StaffAdmin => ("admin.staff", "AdminPass123!"),
            Role::Owner => ("clinic.owner", "OwnerPass123!"),
        };
        Some(Credentials::new(username, password))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "anonymous" | "public" => Ok(Role::Anonymous),
            "patient" => Ok(Role::Patient),
            "attendant" => Ok(Role::Attendant),
            "staff_admin" | "staff" | "admin" => Ok(Role::StaffAdmin),
            "owner" => Ok(Role::Owner),
            other => Err(HarnessError::Configuration(format!("unknown role '{other}'"))),
        }
    }
}

/// How a privileged persona signs in and where it lands afterwards.
#[derive(Debug)]
pub struct RoleDescriptor {
    pub role: Role,
    /// Path segment of the per-role login form, `/accounts/login/<segment>/`.
    pub login_segment: &'static str,
    /// URL fragments that identify the post-login landing area.
    pub landing: &'static [&'static str],
}

impl RoleDescriptor {
    pub fn login_path(&self) -> String {
        format!("/accounts/login/{}/", self.login_segment)
    }

    /// Selectors for the role card on the shared login page.
    pub fn login_link_selectors(&self) -> Vec<String> {
        vec![
            format!("a[href*='/accounts/login/{}/']", self.login_segment),
            format!("a[href*='/login/{}/']", self.login_segment),
        ]
    }

    pub fn is_landing(&self, url: &str) -> bool {
        self.landing.iter().any(|fragment| url.contains(fragment))
    }
}

static DESCRIPTORS: [RoleDescriptor; 4] = [
    RoleDescriptor {
        role: Role::Patient,
        login_segment: "patient",
        landing: &["/accounts/profile/"],
    },
    RoleDescriptor {
        role: Role::Attendant,
        login_segment: "attendant",
        landing: &["/attendant/"],
    },
    RoleDescriptor {
        role: Role::StaffAdmin,
        login_segment: "admin",
        landing: &["/admin/"],
    },
    RoleDescriptor {
        role: Role::Owner,
        login_segment: "owner",
        landing: &["/owner/"],
    },
];

/// A username/password pair. The password is redacted from `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_privileged_role_has_a_descriptor() {
        for role in Role::PRIVILEGED {
            let descriptor = role.descriptor().unwrap();
            assert_eq!(descriptor.role, role);
            assert!(role.env_prefix().is_some());
            assert!(role.fixture_credentials().is_some());
        }
        assert!(Role::Anonymous.descriptor().is_none());
    }

    #[test]
    fn staff_logs_in_through_admin_card() {
        let descriptor = Role::StaffAdmin.descriptor().unwrap();
        assert_eq!(descriptor.login_path(), "/accounts/login/admin/");
        assert!(descriptor.login_link_selectors()[0].contains("/accounts/login/admin/"));
        assert!(descriptor.is_landing("http://localhost:8000/admin/dashboard/"));
    }

    #[test]
    fn parses_role_aliases() {
        assert_eq!("staff".parse::<Role>().unwrap(), Role::StaffAdmin);
        assert_eq!("staff-admin".parse::<Role>().unwrap(), Role::StaffAdmin);
        assert_eq!("Owner".parse::<Role>().unwrap(), Role::Owner);
        assert!("janitor".parse::<Role>().is_err());
    }

    #[test]
    fn debug_output_hides_password() {
        let creds = Credentials::new("clinic.owner", "OwnerPass123!");
        let debug = format!("{creds:?}");
        assert!(debug.contains("clinic.owner"));
        assert!(!debug.contains("OwnerPass123!"));
    }
}
