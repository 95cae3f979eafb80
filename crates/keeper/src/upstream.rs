use async_trait::async_trait;
use brandmark_core::{BrandError, BrandResult, CacheConfig, RemoteConfig};
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use surf::{StatusCode, Url};

/// Answer of an existence probe that actually completed.
///
/// Only a definitive answer is expressed here. A probe that could not be
/// carried out (connection failure, timeout, 5xx, redirect loop) comes back
/// as an `Err` instead and must never be remembered as "absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    Present,
    Absent,
}

impl ProbeVerdict {
    /// 2xx is present, 4xx is absent, anything else is a transport error.
    pub fn from_status(status: u16) -> BrandResult<Self> {
        match status {
            200..=299 => Ok(ProbeVerdict::Present),
            400..=499 => Ok(ProbeVerdict::Absent),
            other => Err(BrandError::transport(format!("probe answered HTTP {}", other))),
        }
    }
}

/// The two upstream endpoints the cache depends on.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Fetch the configuration document holding the current asset id.
    async fn fetch_config(&self) -> BrandResult<RemoteConfig>;

    /// Check, without transferring the body, whether `asset_id` exists.
    async fn probe(&self, asset_id: &str) -> BrandResult<ProbeVerdict>;
}

#[async_trait]
impl<U: Upstream + ?Sized> Upstream for Arc<U> {
    async fn fetch_config(&self) -> BrandResult<RemoteConfig> {
        (**self).fetch_config().await
    }

    async fn probe(&self, asset_id: &str) -> BrandResult<ProbeVerdict> {
        (**self).probe(asset_id).await
    }
}

#[async_trait]
impl<U: Upstream + ?Sized> Upstream for Box<U> {
    async fn fetch_config(&self) -> BrandResult<RemoteConfig> {
        (**self).fetch_config().await
    }

    async fn probe(&self, asset_id: &str) -> BrandResult<ProbeVerdict> {
        (**self).probe(asset_id).await
    }
}

/// `<base>/<asset_id>`, with the id pushed as a single path segment.
pub fn asset_url(base: &str, asset_id: &str) -> BrandResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| BrandError::ConfigUnavailable(format!("bad asset base '{}': {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| BrandError::ConfigUnavailable(format!("asset base '{}' cannot take a path", base)))?
        .pop_if_empty()
        .push(asset_id);
    Ok(url)
}

/// The locator handed to renderers: the asset url plus a cache-defeating stamp.
pub fn asset_locator(base: &str, asset_id: &str, param: &str, stamp: u64) -> BrandResult<String> {
    let mut url = asset_url(base, asset_id)?;
    url.query_pairs_mut().append_pair(param, &stamp.to_string());
    Ok(url.to_string())
}

/// HTTP upstream built on surf.
pub struct SurfUpstream {
    client: surf::Client,
    config_url: String,
    asset_base_url: String,
}

impl SurfUpstream {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            client: surf::Client::new().with(RedirectMiddleware::new(config.max_redirects)),
            config_url: config.config_url.clone(),
            asset_base_url: config.asset_base_url.clone(),
        }
    }
}

#[async_trait]
impl Upstream for SurfUpstream {
    async fn fetch_config(&self) -> BrandResult<RemoteConfig> {
        let mut response = self
            .client
            .get(&self.config_url)
            .await
            .map_err(|e| BrandError::ConfigUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BrandError::ConfigUnavailable(format!(
                "{} answered HTTP {}",
                self.config_url, status
            )));
        }

        response
            .body_json::<RemoteConfig>()
            .await
            .map_err(|e| BrandError::ConfigUnavailable(format!("undecodable config: {}", e)))
    }

    async fn probe(&self, asset_id: &str) -> BrandResult<ProbeVerdict> {
        let url = asset_url(&self.asset_base_url, asset_id)?;
        debug!("probing {}", url);
        let response = self
            .client
            .head(url)
            .await
            .map_err(|e| BrandError::transport(e.to_string()))?;
        ProbeVerdict::from_status(u16::from(response.status()))
    }
}

/// Bounds every upstream call; an expired call is dropped, which aborts the
/// underlying request.
pub struct TimeoutUpstream<U> {
    inner: U,
    timeout: Duration,
}

impl<U: Upstream> TimeoutUpstream<U> {
    pub fn new(inner: U, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &U {
        &self.inner
    }
}

#[async_trait]
impl<U: Upstream> Upstream for TimeoutUpstream<U> {
    async fn fetch_config(&self) -> BrandResult<RemoteConfig> {
        async_std::future::timeout(self.timeout, self.inner.fetch_config())
            .await
            .map_err(|_| BrandError::Timeout)?
    }

    async fn probe(&self, asset_id: &str) -> BrandResult<ProbeVerdict> {
        async_std::future::timeout(self.timeout, self.inner.probe(asset_id))
            .await
            .map_err(|_| BrandError::Timeout)?
    }
}

/// The surf upstream for `config`. [`LogoCache::init`](crate::LogoCache::init)
/// bounds every call with `request_timeout_ms`.
pub fn connect(config: &CacheConfig) -> SurfUpstream {
    SurfUpstream::new(config)
}

struct RedirectMiddleware {
    max_attempts: u8,
}

impl RedirectMiddleware {
    pub fn new(max_attempts: u8) -> Self {
        Self { max_attempts }
    }
}

#[surf::utils::async_trait]
impl surf::middleware::Middleware for RedirectMiddleware {
    async fn handle(
        &self,
        req: surf::Request,
        client: surf::Client,
        next: surf::middleware::Next<'_>,
    ) -> surf::Result<surf::Response> {
        let mut attempts = 0;
        let mut current_req = req;

        loop {
            if attempts > self.max_attempts {
                return Err(surf::Error::from_str(
                    StatusCode::LoopDetected,
                    "Too many redirects",
                ));
            }

            let response = next.run(current_req.clone(), client.clone()).await?;

            if !response.status().is_redirection() {
                return Ok(response);
            }
            let location = match response.header("Location") {
                Some(location) => location.last().as_str().to_string(),
                None => return Ok(response),
            };

            // Relative locations are resolved against the request being redirected.
            let next_url = match Url::parse(&location) {
                Ok(url) => url,
                Err(_) => current_req.url().join(&location).map_err(|_| {
                    surf::Error::from_str(StatusCode::BadGateway, "Invalid redirect location")
                })?,
            };

            // Keep the method: a redirected HEAD probe must stay a HEAD.
            current_req = surf::Request::new(current_req.method(), next_url);
            attempts += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(ProbeVerdict::from_status(200), Ok(ProbeVerdict::Present));
        assert_eq!(ProbeVerdict::from_status(204), Ok(ProbeVerdict::Present));
        assert_eq!(ProbeVerdict::from_status(404), Ok(ProbeVerdict::Absent));
        assert_eq!(ProbeVerdict::from_status(410), Ok(ProbeVerdict::Absent));
        assert!(matches!(
            ProbeVerdict::from_status(503),
            Err(BrandError::Transport(_))
        ));
        assert!(ProbeVerdict::from_status(302).is_err());
    }

    #[test]
    fn locator_appends_id_and_stamp() {
        let locator = asset_locator("http://admin.local/api/logo", "brand.png", "t", 1700).unwrap();
        assert_eq!(locator, "http://admin.local/api/logo/brand.png?t=1700");

        let trailing = asset_locator("http://admin.local/api/logo/", "brand.png", "t", 1).unwrap();
        assert_eq!(trailing, "http://admin.local/api/logo/brand.png?t=1");
    }

    #[test]
    fn id_is_escaped_as_one_segment() {
        let url = asset_url("http://h/logo", "a b/c.png").unwrap();
        assert_eq!(url.as_str(), "http://h/logo/a%20b%2Fc.png");
    }

    #[test]
    fn unusable_base_is_a_config_error() {
        assert!(matches!(
            asset_url("not a url", "x"),
            Err(BrandError::ConfigUnavailable(_))
        ));
        assert!(asset_url("mailto:ops@example.com", "x").is_err());
    }
}
