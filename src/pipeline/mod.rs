//! Poll orchestration: ties scraper → parser → store together.
//!
//! ## Run mode
//!
//! `Pipeline::run()` starts one task per configured account:
//!   1. Refresh once immediately at startup
//!   2. Refresh again every `poll.interval_secs`
//!
//! Each refresh is bounded by `poll.refresh_timeout_secs`. A successful
//! refresh replaces the published snapshot in one step; a failed one leaves
//! the previous snapshot in place. Accounts share no mutable state.

use crate::config::{AccountConfig, AppConfig, PollConfig};
use crate::error::PortalError;
use crate::models::Snapshot;
use crate::scraper::parsers::parse_with_diagnostics;
use crate::scraper::session::Credentials;
use crate::scraper::{HomeInfoPointScraper, PortalSource};
use crate::storage::SnapshotStore;
use crate::utils::Timer;
use anyhow::{Context, Result, bail};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{error, info, warn};

pub type SnapshotReceiver = watch::Receiver<Option<Arc<Snapshot>>>;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Portal(#[from] PortalError),

    #[error("refresh timed out after {0:?}")]
    TimedOut(Duration),

    #[error("parser task failed: {0}")]
    Parser(#[from] tokio::task::JoinError),
}

// ── Account poller ────────────────────────────────────────────────────────────

pub struct AccountPoller<S> {
    name: String,
    source: S,
    store: Option<SnapshotStore>,
    interval: Duration,
    timeout: Duration,
    tx: watch::Sender<Option<Arc<Snapshot>>>,
}

impl<S: PortalSource> AccountPoller<S> {
    pub fn new(
        name: impl Into<String>,
        source: S,
        store: Option<SnapshotStore>,
        poll: &PollConfig,
    ) -> (Self, SnapshotReceiver) {
        let (tx, rx) = watch::channel(None);
        let poller = Self {
            name: name.into(),
            source,
            store,
            interval: poll.interval(),
            timeout: poll.refresh_timeout(),
            tx,
        };
        (poller, rx)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        self.tx.subscribe()
    }

    /// Publish the last stored snapshot, unless a live one is already out,
    /// so subscribers know the subjects before the first refresh completes.
    pub fn restore_stored(&self) -> Option<Arc<Snapshot>> {
        let store = self.store.as_ref()?;
        if self.tx.borrow().is_some() {
            return None;
        }
        let snapshot = match store.load_snapshot() {
            Ok(Some(snap)) => Arc::new(snap),
            Ok(None) => return None,
            Err(e) => {
                warn!("{}: ignoring stored snapshot: {:#}", self.name, e);
                return None;
            }
        };
        self.tx.send_replace(Some(Arc::clone(&snapshot)));
        Some(snapshot)
    }

    /// One fetch + parse cycle. On success the new snapshot is published
    /// and persisted; on failure the published snapshot is left untouched.
    pub async fn refresh_once(&mut self) -> Result<Arc<Snapshot>, RefreshError> {
        let _t = Timer::start(format!("refresh {}", self.name));

        let html = timeout(self.timeout, self.source.fetch_html())
            .await
            .map_err(|_| RefreshError::TimedOut(self.timeout))??;

        let (html, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = parse_with_diagnostics(&html);
            (html, outcome)
        })
        .await?;
        if !outcome.issues.is_empty() {
            info!("{}: {} table(s) skipped or unresolved", self.name, outcome.issues.len());
        }

        let snapshot = Arc::new(outcome.snapshot);
        self.persist(&html, &snapshot);
        self.tx.send_replace(Some(Arc::clone(&snapshot)));

        info!(
            "{}: {} subjects, {} grades, {} homework, {} remarks",
            self.name,
            snapshot.grades.len(),
            snapshot.grade_count(),
            snapshot.homework.len(),
            snapshot.remarks.len()
        );
        Ok(snapshot)
    }

    fn persist(&self, html: &str, snapshot: &Snapshot) {
        let Some(store) = &self.store else { return };
        if let Err(e) = store.save_html(html) {
            warn!("{}: could not store raw page: {:#}", self.name, e);
        }
        if let Err(e) = store.save_snapshot(snapshot) {
            warn!("{}: could not store snapshot: {:#}", self.name, e);
        }
    }

    /// Refresh now, then on every interval tick, forever.
    pub async fn run(mut self) {
        if let Some(stored) = self.restore_stored() {
            info!("{}: subjects from last run: {}", self.name, stored.subjects().join(", "));
        }

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // First tick completes immediately.
            ticker.tick().await;
            match self.refresh_once().await {
                Ok(_) => {}
                Err(RefreshError::Portal(e)) if e.is_auth_rejection() => {
                    error!("{}: {} (check the credentials)", self.name, e);
                }
                Err(e) => warn!("{}: refresh failed: {}", self.name, e),
            }
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Build the poller for one account with its own session and store.
    pub fn poller(
        &self,
        account: &AccountConfig,
    ) -> Result<(AccountPoller<HomeInfoPointScraper>, SnapshotReceiver)> {
        let portal = self.config.portal.with_base_url(account.base_url.as_deref());
        let credentials = Credentials::new(&account.username, &account.password);
        let scraper = HomeInfoPointScraper::new(&portal, credentials)
            .with_context(|| format!("Failed to set up session for {}", account.name))?;

        let store = if self.config.storage.enabled {
            Some(SnapshotStore::open(&self.config.storage.dir, &account.name)?)
        } else {
            None
        };

        Ok(AccountPoller::new(&account.name, scraper, store, &self.config.poll))
    }

    /// Poll every configured account until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        if self.config.accounts.is_empty() {
            bail!("no accounts configured");
        }

        let mut handles = Vec::new();
        for account in &self.config.accounts {
            let (poller, _rx) = self.poller(account)?;
            info!(
                "Polling {} every {:?}",
                poller.name(),
                Duration::from_secs(self.config.poll.interval_secs)
            );
            handles.push((account.name.clone(), tokio::spawn(poller.run())));
        }

        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        info!("Shutting down {} poller(s)", handles.len());
        for (name, handle) in handles {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Poller task for {} failed: {}", name, e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tempdir::TempDir;

    const PAGE: &str = r#"
        <div class="pupilinfo"><table class="t01">
          <tr><td>Name:</td><td>Max Muster</td></tr><tr><td>Klasse:</td><td>7b</td></tr>
        </table></div>
        <h3>Mathematik</h3>
        <table><tr><th>Datum</th><th>Zensur</th></tr><tr><td>01.09.2025</td><td>2</td></tr></table>"#;

    struct FakeSource {
        pages: VecDeque<Result<String, PortalError>>,
        delay: Duration,
    }

    impl FakeSource {
        fn new(pages: Vec<Result<String, PortalError>>) -> Self {
            Self {
                pages: pages.into(),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl PortalSource for FakeSource {
        async fn fetch_html(&mut self) -> Result<String, PortalError> {
            tokio::time::sleep(self.delay).await;
            self.pages.pop_front().unwrap_or(Err(PortalError::NotAuthenticated))
        }
    }

    #[tokio::test]
    async fn test_refresh_publishes_snapshot() {
        let source = FakeSource::new(vec![Ok(PAGE.to_string())]);
        let (mut poller, rx) = AccountPoller::new("kind1", source, None, &PollConfig::default());
        assert!(rx.borrow().is_none());

        let snap = poller.refresh_once().await.unwrap();
        assert_eq!(snap.student.class_label, "7b");
        assert_eq!(snap.grades["ma"].len(), 1);
        assert_eq!(rx.borrow().as_deref(), Some(&*snap));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let source = FakeSource::new(vec![
            Ok(PAGE.to_string()),
            Err(PortalError::SessionExpired),
        ]);
        let (mut poller, rx) = AccountPoller::new("kind1", source, None, &PollConfig::default());

        let first = poller.refresh_once().await.unwrap();
        let err = poller.refresh_once().await.unwrap_err();
        assert!(matches!(err, RefreshError::Portal(PortalError::SessionExpired)));
        assert_eq!(rx.borrow().as_deref(), Some(&*first));
    }

    #[tokio::test]
    async fn test_refresh_timeout() {
        let mut source = FakeSource::new(vec![Ok(PAGE.to_string())]);
        source.delay = Duration::from_secs(5);
        let (poller, rx) = AccountPoller::new("slow", source, None, &PollConfig::default());
        let mut poller = poller.with_timeout(Duration::from_millis(20));

        let err = poller.refresh_once().await.unwrap_err();
        assert!(matches!(err, RefreshError::TimedOut(_)));
        assert!(rx.borrow().is_none());
    }

    #[tokio::test]
    async fn test_refresh_persists_and_restores_on_restart() {
        let tmp = TempDir::new("hip-pipeline").unwrap();
        let store = SnapshotStore::open(tmp.path(), "kind1").unwrap();
        let source = FakeSource::new(vec![Ok(PAGE.to_string())]);
        let (mut poller, _rx) =
            AccountPoller::new("kind1", source, Some(store), &PollConfig::default());
        assert!(poller.restore_stored().is_none());

        let live = poller.refresh_once().await.unwrap();
        let reopened = SnapshotStore::open(tmp.path(), "kind1").unwrap();
        assert_eq!(reopened.load_html().unwrap().as_deref(), Some(PAGE));

        // A fresh poller publishes the stored snapshot before any refresh
        let source = FakeSource::new(vec![]);
        let (restarted, rx) =
            AccountPoller::new("kind1", source, Some(reopened), &PollConfig::default());
        assert!(rx.borrow().is_none());
        let restored = restarted.restore_stored().unwrap();
        assert_eq!(*restored, *live);
        assert_eq!(rx.borrow().as_deref(), Some(&*live));
        assert_eq!(rx.borrow().as_ref().unwrap().grades.keys().collect::<Vec<_>>(), vec!["ma"]);
    }

    #[tokio::test]
    async fn test_restore_does_not_replace_live_snapshot() {
        let tmp = TempDir::new("hip-pipeline").unwrap();
        let store = SnapshotStore::open(tmp.path(), "kind1").unwrap();
        store.save_snapshot(&Snapshot::default()).unwrap();
        let source = FakeSource::new(vec![Ok(PAGE.to_string())]);
        let (mut poller, rx) =
            AccountPoller::new("kind1", source, Some(store), &PollConfig::default());

        let live = poller.refresh_once().await.unwrap();
        assert!(poller.restore_stored().is_none());
        assert_eq!(rx.borrow().as_deref(), Some(&*live));
    }

    #[tokio::test]
    async fn test_pipeline_builds_isolated_pollers() {
        let tmp = TempDir::new("hip-pipeline").unwrap();
        let mut config = AppConfig::default();
        config.storage.dir = tmp.path().to_path_buf();
        for name in ["kind1", "kind2"] {
            config.accounts.push(AccountConfig {
                name: name.into(),
                username: format!("user-{name}"),
                password: "pw".into(),
                base_url: Some("https://portal.test/schule".into()),
            });
        }
        let pipeline = Pipeline::new(config.clone());

        let (a, _) = pipeline.poller(&config.accounts[0]).unwrap();
        let (b, _) = pipeline.poller(&config.accounts[1]).unwrap();
        assert_eq!(a.source.session().username(), "user-kind1");
        assert_eq!(b.source.session().username(), "user-kind2");
        assert_eq!(
            a.source.session().endpoints().data.as_str(),
            "https://portal.test/schule/getdata.php"
        );
        assert!(tmp.path().join("kind2").is_dir());
    }
}
