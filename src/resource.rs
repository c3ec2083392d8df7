use crate::{catalog::CatalogEntry, error::NetworkError, http::HttpClient};
use std::{
    sync::{
        mpsc::{self, Receiver},
        Arc,
    },
    thread,
    time::Duration,
};
use tracing::warn;

/// Image fetches get their own short timeout so a slow host never holds up the catalog.
pub const RESOURCE_TIMEOUT: Duration = Duration::from_secs(1);

const WARNING_ICON_SVG: &[u8] = br##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 24 24"><path fill="#f4a100" d="M1 21h22L12 2 1 21zm12-3h-2v-2h2v2zm0-4h-2v-4h2v4z"/></svg>"##;

/// Opaque image bytes plus a display name taken from the URL path. The name is
/// not unique across URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Resource {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn warning() -> Self {
        Self::new("warning.svg", WARNING_ICON_SVG.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageState {
    /// No URL was published.
    Empty,
    Loaded(Resource),
    /// The fetch failed and a placeholder is shown instead.
    Broken(Resource),
}

impl ImageState {
    pub fn label(&self) -> String {
        match self {
            ImageState::Empty => "none".to_string(),
            ImageState::Loaded(res) => format!("{} ({} bytes)", res.name, res.bytes.len()),
            ImageState::Broken(res) => format!("placeholder {}", res.name),
        }
    }
}

#[derive(Clone)]
pub struct ResourceFetcher {
    client: Arc<dyn HttpClient>,
    timeout: Duration,
}

impl ResourceFetcher {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            client,
            timeout: RESOURCE_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `Ok(None)` for an empty URL, without touching the network.
    pub fn fetch(&self, url: &str) -> Result<Option<Resource>, NetworkError> {
        let url = url.trim();
        if url.is_empty() {
            return Ok(None);
        }
        let bytes = self.client.get_bytes(url, self.timeout)?;
        Ok(Some(Resource::new(resource_name(url), bytes)))
    }

    pub fn fetch_with_fallback(&self, url: &str, placeholder: &Resource) -> Option<Resource> {
        match self.fetch(url) {
            Ok(resource) => resource,
            Err(err) => {
                warn!("failed to load resource {url}: {err}");
                Some(placeholder.clone())
            }
        }
    }

    /// Runs the fetch on its own thread; the result arrives once on the returned handle.
    pub fn spawn_fetch(&self, url: &str) -> PendingResource {
        let (tx, rx) = mpsc::sync_channel(1);
        let fetcher = self.clone();
        let url = url.to_string();
        let worker_url = url.clone();
        thread::spawn(move || {
            let _ = tx.send(fetcher.fetch(&worker_url));
        });
        PendingResource { url, rx }
    }
}

pub struct PendingResource {
    url: String,
    rx: Receiver<Result<Option<Resource>, NetworkError>>,
}

impl PendingResource {
    /// A worker that died without sending counts as a failed fetch.
    pub fn wait(self) -> Result<Option<Resource>, NetworkError> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(NetworkError::Interrupted { url: self.url }))
    }
}

/// Icon and primary screenshot of one entry, fetched side by side.
pub struct DetailImages {
    icon: PendingResource,
    screenshot: Option<PendingResource>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImages {
    pub icon: ImageState,
    pub screenshot: Option<Resource>,
}

impl DetailImages {
    pub fn request(fetcher: &ResourceFetcher, entry: &CatalogEntry) -> Self {
        let icon = fetcher.spawn_fetch(&entry.icon);
        let screenshot = entry
            .primary_screenshot()
            .map(|shot| fetcher.spawn_fetch(&shot.image));
        Self { icon, screenshot }
    }

    pub fn resolve(self) -> LoadedImages {
        let icon = match self.icon.wait() {
            Ok(Some(resource)) => ImageState::Loaded(resource),
            Ok(None) => ImageState::Empty,
            Err(err) => {
                warn!("failed to load icon: {err}");
                ImageState::Broken(Resource::warning())
            }
        };
        // Screenshots are best effort: a failed fetch just leaves the slot empty.
        let screenshot = self
            .screenshot
            .and_then(|pending| pending.wait().ok().flatten());
        LoadedImages { icon, screenshot }
    }
}

pub fn resource_name(url: &str) -> String {
    let without_query = url.split(&['?', '#'][..]).next().unwrap_or_default();
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|index| &rest[index..]).unwrap_or(""),
        None => without_query,
    };
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}
