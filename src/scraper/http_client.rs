use crate::config::PortalConfig;
use crate::error::PortalError;
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

// ── Transport seam ────────────────────────────────────────────────────────────

/// Status and body of one HTTP exchange (after redirects).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub status: u16,
    pub body: String,
}

impl Page {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// The portal answers 200, or a redirect when the client does not follow it.
    pub fn is_acceptable(&self) -> bool {
        self.status == 200 || (300..400).contains(&self.status)
    }

    /// Turn an unexpected status into a connectivity error.
    pub fn check(self, stage: &'static str) -> Result<Self, PortalError> {
        if self.is_acceptable() {
            Ok(self)
        } else {
            Err(PortalError::Http {
                stage,
                status: self.status,
                snippet: self.body.chars().take(200).collect(),
            })
        }
    }
}

/// Extra request headers for a single call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions<'a> {
    pub no_cache: bool,
    pub referer: Option<&'a Url>,
}

/// The HTTP operations a portal session needs. Implementations own the
/// cookie store; one transport must never be shared by two accounts.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url, opts: RequestOptions<'_>) -> Result<Page, PortalError>;

    async fn post_form(
        &self,
        url: &Url,
        form: &[(&str, &str)],
        opts: RequestOptions<'_>,
    ) -> Result<Page, PortalError>;

    /// Names of the cookies currently held for `url`, for diagnostics.
    fn cookie_names(&self, _url: &Url) -> Vec<String> {
        Vec::new()
    }
}

// ── reqwest transport ─────────────────────────────────────────────────────────

pub struct HttpClient {
    inner: reqwest::Client,
    jar: Arc<Jar>,
}

impl HttpClient {
    /// Build a client with its own, empty cookie jar.
    pub fn new(config: &PortalConfig) -> Result<Self, PortalError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        if let Ok(lang) = HeaderValue::from_str(&config.accept_language) {
            headers.insert(header::ACCEPT_LANGUAGE, lang);
        }

        let jar = Arc::new(Jar::default());
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // The session cookie (PHPSESSID) is the only auth state
            .cookie_provider(Arc::clone(&jar))
            .build()?;

        Ok(Self { inner, jar })
    }

    fn apply(req: reqwest::RequestBuilder, opts: RequestOptions<'_>) -> reqwest::RequestBuilder {
        let mut req = req;
        if opts.no_cache {
            req = req
                .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
                .header(header::PRAGMA, "no-cache");
        }
        if let Some(referer) = opts.referer {
            req = req.header(header::REFERER, referer.as_str());
        }
        req
    }

    async fn into_page(resp: reqwest::Response) -> Result<Page, PortalError> {
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(Page { status, body })
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn get(&self, url: &Url, opts: RequestOptions<'_>) -> Result<Page, PortalError> {
        let req = Self::apply(self.inner.get(url.clone()), opts);
        let page = Self::into_page(req.send().await?).await?;
        debug!("GET {} -> {}", url, page.status);
        Ok(page)
    }

    async fn post_form(
        &self,
        url: &Url,
        form: &[(&str, &str)],
        opts: RequestOptions<'_>,
    ) -> Result<Page, PortalError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();
        let req = self
            .inner
            .post(url.clone())
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::ORIGIN, url.origin().ascii_serialization())
            .body(body);
        let page = Self::into_page(Self::apply(req, opts).send().await?).await?;
        debug!("POST {} -> {}", url, page.status);
        Ok(page)
    }

    fn cookie_names(&self, url: &Url) -> Vec<String> {
        let Some(value) = self.jar.cookies(url) else {
            return Vec::new();
        };
        value
            .to_str()
            .unwrap_or_default()
            .split(';')
            .filter_map(|pair| pair.split('=').next())
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}
