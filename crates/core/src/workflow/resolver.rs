use crate::domain::company::CompanyId;
use crate::domain::rule::StepDefinition;
use crate::domain::user::{User, UserId, UserRole};

/// Snapshot of one company's active users, ordered by id.
///
/// Built once per submission or action so resolution never reaches back into storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompanyDirectory {
    company_id: CompanyId,
    users: Vec<User>,
}

impl CompanyDirectory {
    /// Keeps only active members of `company_id`.
    pub fn new(company_id: CompanyId, users: impl IntoIterator<Item = User>) -> Self {
        let mut users: Vec<User> = users
            .into_iter()
            .filter(|user| user.is_active && user.company_id == company_id)
            .collect();
        users.sort_by(|left, right| left.id.cmp(&right.id));
        users.dedup_by(|left, right| left.id == right.id);
        Self { company_id, users }
    }

    pub fn company_id(&self) -> &CompanyId {
        &self.company_id
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn get(&self, id: &UserId) -> Option<&User> {
        self.users.iter().find(|user| &user.id == id)
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.get(id).is_some()
    }

    pub fn first_with_role(&self, role: UserRole, exclude: &UserId) -> Option<&User> {
        self.users.iter().find(|user| user.role == role && &user.id != exclude)
    }
}

/// Active users matching every selector the step provides, never `exclude`.
///
/// A step with no selectors at all matches every active user other than `exclude`.
pub fn resolve<'a>(
    step: &StepDefinition,
    directory: &'a CompanyDirectory,
    exclude: &UserId,
) -> Vec<&'a User> {
    directory
        .users()
        .iter()
        .filter(|user| &user.id != exclude)
        .filter(|user| step.user_id.as_ref().map_or(true, |id| &user.id == id))
        .filter(|user| step.role.map_or(true, |role| user.role == role))
        .filter(|user| {
            step.department
                .as_deref()
                .map_or(true, |department| user.department.as_deref() == Some(department))
        })
        .collect()
}
