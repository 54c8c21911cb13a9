pub mod cleaner;
pub mod detect;
pub mod http_client;
pub mod parsers;
pub mod session;
pub mod student;
pub mod subject;

use crate::config::PortalConfig;
use crate::error::PortalError;
use crate::models::Snapshot;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use self::http_client::{HttpClient, Transport};
use self::parsers::parse_snapshot;
use self::session::{Credentials, Session};

// ── Source trait ──────────────────────────────────────────────────────────────

/// What the poller needs from a portal: the current data page of an
/// authenticated session, and a parsed snapshot of it.
#[async_trait]
pub trait PortalSource: Send {
    /// Current data page HTML, logging in first if the session is not live.
    async fn fetch_html(&mut self) -> Result<String, PortalError>;

    async fn refresh(&mut self) -> Result<Snapshot, PortalError> {
        let html = self.fetch_html().await?;
        Ok(parse_snapshot(&html))
    }
}

// ── Home.InfoPoint scraper ────────────────────────────────────────────────────

pub struct HomeInfoPointScraper<T = HttpClient> {
    session: Session<T>,
}

impl HomeInfoPointScraper<HttpClient> {
    pub fn new(config: &PortalConfig, credentials: Credentials) -> Result<Self, PortalError> {
        Ok(Self {
            session: Session::new(config, credentials)?,
        })
    }
}

impl<T: Transport> HomeInfoPointScraper<T> {
    pub fn from_session(session: Session<T>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// Close the underlying session.
    pub fn close(self) {
        self.session.close();
    }
}

#[async_trait]
impl<T: Transport> PortalSource for HomeInfoPointScraper<T> {
    /// A session that is not yet verified logs in and uses the page that
    /// proved the login. A live session fetches directly; if the portal
    /// shows its login form instead, the error is returned and the next
    /// call logs in again.
    async fn fetch_html(&mut self) -> Result<String, PortalError> {
        if !self.session.is_authenticated() {
            let html = self.session.establish().await?;
            info!("Fetched data page for {} after login", self.session.username());
            return Ok(html);
        }

        match self.session.fetch_data().await {
            Ok(html) => {
                debug!("Fetched data page for {} ({} bytes)", self.session.username(), html.len());
                Ok(html)
            }
            Err(e) => {
                if e.needs_reauth() {
                    warn!("{}: {}, will log in again next cycle", self.session.username(), e);
                }
                Err(e)
            }
        }
    }
}
