//! Hierarchical partition key: tenant → user → session.
//!
//! Reads may scope to any prefix of the hierarchy; writes always use the
//! full three-level key.

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    tenant_id: String,
    user_id: Option<String>,
    session_id: Option<String>,
}

impl PartitionKey {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: None,
            session_id: None,
        }
    }

    pub fn user(tenant_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: Some(user_id.into()),
            session_id: None,
        }
    }

    pub fn session(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: Some(user_id.into()),
            session_id: Some(session_id.into()),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_full(&self) -> bool {
        self.user_id.is_some() && self.session_id.is_some()
    }
}
