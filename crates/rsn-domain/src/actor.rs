use uuid::Uuid;

use crate::types::AccountRole;

/// Acting identity recorded with every mutation.
///
/// Either an authenticated employee or a credited external system
/// (lab bridge, license sweep), never both — the audit table enforces the
/// same exclusivity with a check constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Employee(Uuid),
    External(String),
}

impl Actor {
    pub fn external(label: impl Into<String>) -> Self {
        Self::External(label.into())
    }

    pub fn employee_id(&self) -> Option<Uuid> {
        match self {
            Self::Employee(id) => Some(*id),
            Self::External(_) => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Employee(_) => None,
            Self::External(label) => Some(label),
        }
    }
}

/// Resolved session triple supplied by the authentication collaborator.
///
/// The core trusts this triple and does not re-derive identity. Entity
/// visibility is scoped to `organization_id`.
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub employee_id: Uuid,
    pub organization_id: Uuid,
    pub role: AccountRole,
}

impl ActorContext {
    pub fn actor(&self) -> Actor {
        Actor::Employee(self.employee_id)
    }
}
