//! HTTP status classification for registry responses.

use std::fmt;

/// An HTTP status code as seen by the registry pipeline.
///
/// Only success (2xx) and `401 Unauthorized` drive branching; every other
/// code is a plain failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode {
    code: u16,
}

impl StatusCode {
    /// `200 OK`.
    pub const OK: Self = Self { code: 200 };
    /// `401 Unauthorized`.
    pub const UNAUTHORIZED: Self = Self { code: 401 };
    /// `500 Internal Server Error`.
    pub const INTERNAL_SERVER_ERROR: Self = Self { code: 500 };

    pub const fn from_code(code: u16) -> Self {
        Self { code }
    }

    /// Classify the status of a transport response.
    pub fn of(response: &reqwest::Response) -> Self {
        Self::from_code(response.status().as_u16())
    }

    pub const fn code(self) -> u16 {
        self.code
    }

    /// `200 <= code < 300`.
    pub const fn is_successful(self) -> bool {
        self.code >= 200 && self.code < 300
    }

    pub const fn is_unauthorized(self) -> bool {
        self.code == Self::UNAUTHORIZED.code
    }

    /// Standard reason phrase, or `Unknown`.
    pub fn text(self) -> &'static str {
        reqwest::StatusCode::from_u16(self.code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown")
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {} {}", self.code, self.text())
    }
}

impl From<reqwest::StatusCode> for StatusCode {
    fn from(status: reqwest::StatusCode) -> Self {
        Self::from_code(status.as_u16())
    }
}
