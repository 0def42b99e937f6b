use serde::{Deserialize, Serialize};

use crate::domain::company::CompanyId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserRole {
    Admin,
    Manager,
    Employee,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::Manager => "Manager",
            Self::Employee => "Employee",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "manager" => Some(Self::Manager),
            "employee" => Some(Self::Employee),
            _ => None,
        }
    }

    /// Managers and admins may bypass their own manager when a rule allows it.
    pub fn outranks_employee(&self) -> bool {
        matches!(self, Self::Admin | Self::Manager)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub company_id: CompanyId,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub department: Option<String>,
    pub manager_id: Option<UserId>,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::UserRole;

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(UserRole::parse("ADMIN"), Some(UserRole::Admin));
        assert_eq!(UserRole::parse(" manager "), Some(UserRole::Manager));
        assert_eq!(UserRole::parse("contractor"), None);
    }

    #[test]
    fn only_managers_and_admins_outrank_employees() {
        assert!(UserRole::Admin.outranks_employee());
        assert!(UserRole::Manager.outranks_employee());
        assert!(!UserRole::Employee.outranks_employee());
    }
}
