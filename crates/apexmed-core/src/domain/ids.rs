use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_ID_LEN: usize = 64;

fn validate_id(
    field: &'static str,
    input: &str,
    empty: ValidationError,
) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(empty);
    }

    let len = trimmed.chars().count();
    if len > MAX_ID_LEN {
        return Err(ValidationError::IdTooLong {
            field,
            len,
            max: MAX_ID_LEN,
        });
    }

    for (index, ch) in trimmed.chars().enumerate() {
        let valid = ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_' | ':');
        if !valid {
            return Err(ValidationError::InvalidIdChar { field, ch, index });
        }
    }

    Ok(trimmed.to_owned())
}

/// Identifier of one demand-network integration, normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AdapterId(String);

impl AdapterId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        validate_id("adapter_id", input, ValidationError::EmptyAdapterId)
            .map(|id| Self(id.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Publisher placement identifier. Case is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlacementId(String);

impl PlacementId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        validate_id("placement_id", input, ValidationError::EmptyPlacementId).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! id_conversions {
    ($ty:ty) => {
        impl Display for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl TryFrom<String> for $ty {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl TryFrom<&str> for $ty {
            type Error = ValidationError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.0
            }
        }
    };
}

id_conversions!(AdapterId);
id_conversions!(PlacementId);

/// Identity for breaker, pacing and hedge-latency state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdapterCallKey {
    pub adapter: AdapterId,
    pub placement: PlacementId,
}

impl AdapterCallKey {
    pub fn new(adapter: AdapterId, placement: PlacementId) -> Self {
        Self { adapter, placement }
    }
}

impl Display for AdapterCallKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.adapter, self.placement)
    }
}
