use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Ad format requested for a placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdFormat {
    Banner,
    Interstitial,
    Rewarded,
    Native,
}

impl AdFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Banner => "banner",
            Self::Interstitial => "interstitial",
            Self::Rewarded => "rewarded",
            Self::Native => "native",
        }
    }

    /// Full-screen formats are subject to single-flight presentation.
    pub const fn is_fullscreen(self) -> bool {
        matches!(self, Self::Interstitial | Self::Rewarded)
    }
}

impl Display for AdFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdFormat {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "banner" => Ok(Self::Banner),
            "interstitial" => Ok(Self::Interstitial),
            "rewarded" => Ok(Self::Rewarded),
            "native" => Ok(Self::Native),
            _ => Err(ValidationError::InvalidAdFormat {
                value: value.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Rewarded".parse::<AdFormat>(), Ok(AdFormat::Rewarded));
        assert!("video".parse::<AdFormat>().is_err());
    }
}
