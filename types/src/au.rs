//! Archival units: the unit of preserved content a poll audits.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Identifier of an archival unit.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AuId(String);

impl AuId {
    pub fn new(raw: impl Into<String>) -> Result<Self, TypesError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(TypesError::InvalidAuId(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the publisher licenses the AU's content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// Content anyone may fetch from the publisher.
    OpenAccess,
    /// Content only subscribers may receive.
    #[default]
    Subscription,
}

/// An archival unit as seen by the polling layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivalUnit {
    pub id: AuId,
    pub access_type: AccessType,
}

impl ArchivalUnit {
    pub fn new(id: AuId, access_type: AccessType) -> Self {
        Self { id, access_type }
    }

    pub fn is_open_access(&self) -> bool {
        self.access_type == AccessType::OpenAccess
    }
}
