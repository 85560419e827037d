use url::Url;

use crate::{Error, Result};

/// URL scheme used to reach a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    #[default]
    Https,
    /// Plain HTTP, for local or otherwise insecure registries.
    Http,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Http => "http",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryEndpoint {
    /// Base URL with scheme, e.g. `https://quay.io`.
    pub base_url: Url,
    /// Registry host (and optional port) as written in image references.
    pub registry: String,
}

impl RegistryEndpoint {
    pub fn new(registry: &str, scheme: Scheme) -> Result<Self> {
        let raw = format!("{}://{registry}", scheme.as_str());
        let base_url = Url::parse(&raw).map_err(|_| Error::InvalidImageSpec(registry.to_string()))?;
        if base_url.host_str().is_none() {
            return Err(Error::InvalidImageSpec(registry.to_string()));
        }

        Ok(Self {
            base_url,
            registry: registry.to_string(),
        })
    }

    /// Absolute URL for `path` on this registry.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|_| Error::InvalidImageSpec(format!("{}{path}", self.registry)))
    }
}
