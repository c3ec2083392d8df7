use crate::error::NetworkError;
use std::{io::Read, time::Duration};

const USER_AGENT: &str = concat!("appshelf/", env!("CARGO_PKG_VERSION"));

pub type Body = Box<dyn Read + Send>;

/// Single-shot HTTP GET. Anything other than a 200 response is an error.
pub trait HttpClient: Send + Sync {
    fn get(&self, url: &str, timeout: Duration) -> Result<Body, NetworkError>;

    fn get_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, NetworkError> {
        let mut body = self.get(url, timeout)?;
        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes)
            .map_err(|source| NetworkError::Read {
                url: url.to_string(),
                source,
            })?;
        Ok(bytes)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UreqClient;

impl HttpClient for UreqClient {
    fn get(&self, url: &str, timeout: Duration) -> Result<Body, NetworkError> {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build();
        match agent.get(url).call() {
            Ok(response) if response.status() == 200 => Ok(Box::new(response.into_reader())),
            Ok(response) => Err(NetworkError::Status {
                url: url.to_string(),
                status: response.status(),
            }),
            Err(ureq::Error::Status(status, _)) => Err(NetworkError::Status {
                url: url.to_string(),
                status,
            }),
            Err(ureq::Error::Transport(transport)) => Err(NetworkError::Transport {
                url: url.to_string(),
                reason: transport.to_string(),
            }),
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::{
        collections::HashMap,
        io::Cursor,
        sync::atomic::{AtomicUsize, Ordering},
    };

    /// Serves canned bodies by URL and counts every request it sees.
    #[derive(Default)]
    pub struct StubClient {
        bodies: HashMap<String, Vec<u8>>,
        calls: AtomicUsize,
    }

    impl StubClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_body(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
            self.bodies.insert(url.to_string(), body.into());
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HttpClient for StubClient {
        fn get(&self, url: &str, _timeout: Duration) -> Result<Body, NetworkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.bodies.get(url) {
                Some(body) => Ok(Box::new(Cursor::new(body.clone()))),
                None => Err(NetworkError::Transport {
                    url: url.to_string(),
                    reason: "timed out".to_string(),
                }),
            }
        }
    }
}
