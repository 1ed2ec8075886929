use serde::{Deserialize, Serialize};
use std::fmt;

/// A (database identifier, schema name) pair scoping every read and write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tenant {
    pub database_id: String,
    pub schema_name: String,
}

impl Tenant {
    pub fn new(database_id: impl Into<String>, schema_name: impl Into<String>) -> Self {
        Self {
            database_id: database_id.into(),
            schema_name: schema_name.into(),
        }
    }

    /// A tenant with an empty component cannot scope a query.
    pub fn is_scoped(&self) -> bool {
        !self.database_id.trim().is_empty() && !self.schema_name.trim().is_empty()
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database_id, self.schema_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_display() {
        let tenant = Tenant::new("SMVNPDB", "INFINITY21_JSMES");
        assert_eq!(tenant.to_string(), "SMVNPDB.INFINITY21_JSMES");
        assert!(tenant.is_scoped());
    }

    #[test]
    fn test_tenant_with_blank_component_is_unscoped() {
        assert!(!Tenant::default().is_scoped());
        assert!(!Tenant::new("DB", " ").is_scoped());
    }
}
