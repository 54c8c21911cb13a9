use thiserror::Error;

/// Failures of one account's refresh cycle.
///
/// `Http`, `Transport` and `InvalidUrl` form the connectivity class: retrying
/// later may help. `Authentication` means the credentials were rejected or the
/// session never activated. `SessionExpired` and `NotAuthenticated` mean the
/// caller has to run a fresh login before fetching again.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("{stage}: unexpected HTTP status {status}")]
    Http {
        stage: &'static str,
        status: u16,
        snippet: String,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid portal URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("session expired: portal answered with its login form")]
    SessionExpired,

    #[error("session is not authenticated")]
    NotAuthenticated,
}

impl PortalError {
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            PortalError::Http { .. } | PortalError::Transport(_) | PortalError::InvalidUrl(_)
        )
    }

    /// True when only a fresh `establish()` can recover the session.
    pub fn needs_reauth(&self) -> bool {
        matches!(
            self,
            PortalError::SessionExpired | PortalError::NotAuthenticated
        )
    }

    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, PortalError::Authentication(_))
    }
}

/// Soft parse problems. Never fatal; the affected item is skipped or falls
/// back to a sentinel and parsing continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseAmbiguity {
    #[error("table #{index} has no rows")]
    EmptyTable { index: usize },

    #[error("table #{index} not recognised (headers: {headers:?})")]
    UnrecognizedTable { index: usize, headers: Vec<String> },

    #[error("no subject heading found for grade table #{index}")]
    UnresolvedSubject { index: usize },
}
