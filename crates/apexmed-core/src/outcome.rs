//! Vendor error normalization.
//!
//! Every adapter failure is reduced to one [`Outcome`] before anything else
//! looks at it. Retry eligibility, breaker failure counting and metrics
//! grouping all key off `Outcome`, never off vendor codes.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::http_client::{HttpError, HttpErrorKind};

/// Closed set of normalized adapter outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    NoFill,
    Timeout,
    NetworkError,
    ClientError(i64),
    ServerError(i64),
    Generic(String),
}

impl Outcome {
    /// Stable label used as the metrics bucket name.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NoFill => "no_fill",
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
            Self::ClientError(_) => "client_error",
            Self::ServerError(_) => "server_error",
            Self::Generic(_) => "generic",
        }
    }

    /// Whether the outcome is a failed call for breaker accounting.
    ///
    /// A no-fill means the adapter answered normally.
    pub const fn is_breaker_failure(&self) -> bool {
        !matches!(self, Self::NoFill)
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientError(code) | Self::ServerError(code) => {
                write!(f, "{}({code})", self.label())
            }
            Self::Generic(message) => write!(f, "generic({message})"),
            _ => f.write_str(self.label()),
        }
    }
}

/// Classification a vendor code table assigns to one code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    NoFill,
    Timeout,
    Network,
    Client,
    Server,
    Generic,
}

/// Per-vendor mapping from raw error codes to outcome classes.
///
/// Codes missing from the table fall back to HTTP-status interpretation when
/// `http_fallback` is set, and to [`Outcome::Generic`] otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorCodeTable {
    vendor: String,
    codes: HashMap<i64, OutcomeClass>,
    http_fallback: bool,
}

impl VendorCodeTable {
    /// Empty table: every code maps to `Generic`.
    pub fn new(vendor: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            codes: HashMap::new(),
            http_fallback: false,
        }
    }

    /// Table that interprets codes as HTTP statuses.
    pub fn http() -> Self {
        Self {
            vendor: String::from("http"),
            codes: HashMap::new(),
            http_fallback: true,
        }
    }

    pub fn with_code(mut self, code: i64, class: OutcomeClass) -> Self {
        self.codes.insert(code, class);
        self
    }

    pub fn with_http_fallback(mut self, enabled: bool) -> Self {
        self.http_fallback = enabled;
        self
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Map a vendor code and message to an outcome. Total and deterministic.
    pub fn normalize(&self, code: i64, message: &str) -> Outcome {
        if let Some(class) = self.codes.get(&code) {
            return apply_class(*class, code, message);
        }
        if self.http_fallback {
            if let Some(outcome) = http_status_outcome(code) {
                return outcome;
            }
        }
        Outcome::Generic(generic_message(code, message))
    }
}

impl Default for VendorCodeTable {
    fn default() -> Self {
        Self::http()
    }
}

/// Free-function form of [`VendorCodeTable::normalize`].
pub fn normalize(table: &VendorCodeTable, code: i64, message: &str) -> Outcome {
    table.normalize(code, message)
}

fn apply_class(class: OutcomeClass, code: i64, message: &str) -> Outcome {
    match class {
        OutcomeClass::NoFill => Outcome::NoFill,
        OutcomeClass::Timeout => Outcome::Timeout,
        OutcomeClass::Network => Outcome::NetworkError,
        OutcomeClass::Client => Outcome::ClientError(code),
        OutcomeClass::Server => Outcome::ServerError(code),
        OutcomeClass::Generic => Outcome::Generic(generic_message(code, message)),
    }
}

fn http_status_outcome(code: i64) -> Option<Outcome> {
    match code {
        204 => Some(Outcome::NoFill),
        408 | 504 => Some(Outcome::Timeout),
        400..=499 => Some(Outcome::ClientError(code)),
        500..=599 => Some(Outcome::ServerError(code)),
        _ => None,
    }
}

fn generic_message(code: i64, message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        format!("vendor code {code}")
    } else {
        trimmed.to_owned()
    }
}

/// Raw failure reported by an adapter call before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The adapter answered with no ad.
    NoFill,
    /// Vendor-specific error code and message.
    Vendor { code: i64, message: String },
    /// Transport failure before the vendor answered.
    Transport(HttpError),
}

impl AdapterError {
    pub fn vendor(code: i64, message: impl Into<String>) -> Self {
        Self::Vendor {
            code,
            message: message.into(),
        }
    }

    pub fn normalize(&self, table: &VendorCodeTable) -> Outcome {
        match self {
            Self::NoFill => Outcome::NoFill,
            Self::Vendor { code, message } => table.normalize(*code, message),
            Self::Transport(error) => match error.kind() {
                HttpErrorKind::Timeout => Outcome::Timeout,
                HttpErrorKind::Connect | HttpErrorKind::Other => Outcome::NetworkError,
            },
        }
    }
}

impl From<HttpError> for AdapterError {
    fn from(error: HttpError) -> Self {
        Self::Transport(error)
    }
}

impl Display for AdapterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFill => f.write_str("no fill"),
            Self::Vendor { code, message } => write!(f, "vendor error {code}: {message}"),
            Self::Transport(error) => write!(f, "transport error: {error}"),
        }
    }
}

impl std::error::Error for AdapterError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn admob_like() -> VendorCodeTable {
        VendorCodeTable::new("admob")
            .with_code(0, OutcomeClass::Generic)
            .with_code(1, OutcomeClass::Client)
            .with_code(2, OutcomeClass::Network)
            .with_code(3, OutcomeClass::NoFill)
    }

    #[test]
    fn vendor_table_entries_take_precedence() {
        let table = admob_like();

        assert_eq!(table.normalize(3, "No ad to show"), Outcome::NoFill);
        assert_eq!(table.normalize(2, "offline"), Outcome::NetworkError);
        assert_eq!(table.normalize(1, "bad unit id"), Outcome::ClientError(1));
        assert_eq!(
            table.normalize(0, "internal"),
            Outcome::Generic(String::from("internal"))
        );
    }

    #[test]
    fn unknown_codes_map_to_generic() {
        let table = admob_like();

        assert_eq!(
            table.normalize(99, "  "),
            Outcome::Generic(String::from("vendor code 99"))
        );
    }

    #[test]
    fn http_table_classifies_statuses() {
        let table = VendorCodeTable::http();

        assert_eq!(normalize(&table, 204, ""), Outcome::NoFill);
        assert_eq!(normalize(&table, 408, ""), Outcome::Timeout);
        assert_eq!(normalize(&table, 504, ""), Outcome::Timeout);
        assert_eq!(normalize(&table, 404, ""), Outcome::ClientError(404));
        assert_eq!(normalize(&table, 503, ""), Outcome::ServerError(503));
        assert!(matches!(normalize(&table, 302, "moved"), Outcome::Generic(_)));
    }

    #[test]
    fn transport_errors_normalize_by_kind() {
        let table = VendorCodeTable::http();

        assert_eq!(
            AdapterError::from(HttpError::timeout("slow")).normalize(&table),
            Outcome::Timeout
        );
        assert_eq!(
            AdapterError::from(HttpError::connect("refused")).normalize(&table),
            Outcome::NetworkError
        );
        assert_eq!(AdapterError::NoFill.normalize(&table), Outcome::NoFill);
    }

    #[test]
    fn no_fill_is_not_a_breaker_failure() {
        assert!(!Outcome::NoFill.is_breaker_failure());
        assert!(Outcome::ClientError(400).is_breaker_failure());
        assert_eq!(Outcome::ServerError(502).to_string(), "server_error(502)");
    }
}
