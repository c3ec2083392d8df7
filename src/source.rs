use crate::{
    catalog::{self, Catalog, Compatibility},
    error::{LoadError, NetworkError, NotFoundError},
    http::{Body, HttpClient},
};
use std::{
    fs::File,
    io::{BufReader, Cursor},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tracing::{debug, error, info, warn};

pub const CATALOG_URL: &str = "https://apps.fyne.io/api/v1/list.json";
pub const CACHE_PATH: &str = "testdata/apps-list.json";

/// Where raw catalog bytes come from: a live endpoint and a cached snapshot.
pub struct CatalogSource {
    client: Arc<dyn HttpClient>,
    url: String,
    cache_path: PathBuf,
}

impl CatalogSource {
    pub fn new(
        client: Arc<dyn HttpClient>,
        url: impl Into<String>,
        cache_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            cache_path: cache_path.into(),
        }
    }

    /// One GET against the live endpoint, no retry. The body is read to the end
    /// here, so a connection that drops mid-transfer is a `NetworkError` and not a
    /// truncated document.
    pub fn fetch(&self, timeout: Duration) -> Result<Body, NetworkError> {
        let bytes = self.client.get_bytes(&self.url, timeout)?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    pub fn fetch_cached(&self) -> Result<Body, NotFoundError> {
        let file = File::open(&self.cache_path).map_err(|source| NotFoundError {
            path: self.cache_path.clone(),
            source,
        })?;
        Ok(Box::new(BufReader::new(file)))
    }

    /// Live first, cache on any live failure. Parse errors from either side are
    /// returned as-is; a corrupt live payload does not fall back.
    pub fn load_catalog(
        &self,
        timeout: Duration,
        compat: &Compatibility,
    ) -> Result<Catalog, LoadError> {
        let (body, origin) = match self.fetch(timeout) {
            Ok(body) => (body, "live"),
            Err(live) => {
                warn!("failed to get app list from web, using cache: {live}");
                match self.fetch_cached() {
                    Ok(body) => (body, "cache"),
                    Err(cached) => {
                        error!("cache load failed: {cached}");
                        return Err(LoadError::Unavailable { live, cached });
                    }
                }
            }
        };
        self.parse_body(body, origin, compat)
    }

    /// Skips the network entirely.
    pub fn load_cached_catalog(&self, compat: &Compatibility) -> Result<Catalog, LoadError> {
        let body = self.fetch_cached().map_err(|cached| LoadError::Unavailable {
            live: NetworkError::Transport {
                url: self.url.clone(),
                reason: "offline mode".to_string(),
            },
            cached,
        })?;
        self.parse_body(body, "cache", compat)
    }

    fn parse_body(
        &self,
        body: Body,
        origin: &str,
        compat: &Compatibility,
    ) -> Result<Catalog, LoadError> {
        // The body is dropped (and its socket or file closed) on both arms.
        let catalog = catalog::parse(body, compat).map_err(|err| {
            error!("parse error in {origin} catalog: {err}");
            err
        })?;
        debug!(origin, entries = catalog.len(), "catalog parsed");
        info!("loaded {} apps from {origin} catalog", catalog.len());
        Ok(catalog)
    }
}
