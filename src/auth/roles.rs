/// Role hierarchy and permission checks
///
/// Roles form a total preorder by level. Some roles share a level and
/// satisfy each other. Permissions are an independent, finer-grained grant
/// and are never implied by role level.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    HospitalAdmin,
    InventoryManager,
    ProcurementManager,
    EquipmentManager,
    DepartmentManager,
    StaffUser,
    Viewer,
    Auditor,
    /// Any role name this build does not recognize. Level 0, fails every check.
    #[serde(other)]
    Unknown,
}

impl Role {
    pub const ALL: [Role; 9] = [
        Role::SuperAdmin,
        Role::HospitalAdmin,
        Role::InventoryManager,
        Role::ProcurementManager,
        Role::EquipmentManager,
        Role::DepartmentManager,
        Role::StaffUser,
        Role::Viewer,
        Role::Auditor,
    ];

    pub fn level(&self) -> u8 {
        match self {
            Role::SuperAdmin => 9,
            Role::HospitalAdmin => 8,
            Role::InventoryManager | Role::ProcurementManager | Role::EquipmentManager => 7,
            Role::DepartmentManager => 6,
            Role::StaffUser => 5,
            Role::Viewer | Role::Auditor => 4,
            Role::Unknown => 0,
        }
    }

    /// `self` has at least the privileges of `required`.
    pub fn satisfies(&self, required: Role) -> bool {
        // Unknown never satisfies anything, including another Unknown.
        *self != Role::Unknown && self.level() >= required.level()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::HospitalAdmin => "hospital_admin",
            Role::InventoryManager => "inventory_manager",
            Role::ProcurementManager => "procurement_manager",
            Role::EquipmentManager => "equipment_manager",
            Role::DepartmentManager => "department_manager",
            Role::StaffUser => "staff_user",
            Role::Viewer => "viewer",
            Role::Auditor => "auditor",
            Role::Unknown => "unknown",
        }
    }

    /// Lenient parse used at the datastore boundary.
    pub fn parse(s: &str) -> Role {
        s.parse().unwrap_or(Role::Unknown)
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
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown role '{}'", s))
    }
}

pub fn has_permission(granted: &[String], permission: &str) -> bool {
    granted.iter().any(|p| p == permission)
}
