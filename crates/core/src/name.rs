//! Validated display names.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Display name of a catalog element (component, capability, ...).
///
/// Trimmed, non-empty, at most [`Name::MAX_LEN`] characters. Compared by value; a
/// `Name` that exists has already been validated, which lets mutators check every
/// input before raising an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name(String);

impl Name {
    pub const MAX_LEN: usize = 200;

    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if trimmed.chars().count() > Self::MAX_LEN {
            return Err(DomainError::validation(format!(
                "name cannot exceed {} characters",
                Self::MAX_LEN
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl core::fmt::Display for Name {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_trimmed() {
        assert_eq!(Name::parse("  CRM  ").unwrap().as_str(), "CRM");
    }

    #[test]
    fn blank_name_is_rejected() {
        assert!(matches!(Name::parse("   "), Err(DomainError::Validation(_))));
    }

    #[test]
    fn overlong_name_is_rejected() {
        let raw = "x".repeat(Name::MAX_LEN + 1);
        assert!(matches!(Name::parse(raw), Err(DomainError::Validation(_))));
    }
}
