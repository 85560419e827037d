//! Image references of the form `[registry/]repository[:tag][@sha256:hash]`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

/// Registry used when a reference does not name one.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag used when a reference carries neither a tag nor a digest.
pub const DEFAULT_TAG: &str = "latest";

static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:(?P<registry>[a-z0-9_.-]+(?::[0-9]+)?)/)?",
        r"(?P<repository>[a-z0-9_.-]+(?:/[a-z0-9_.-]+)*)",
        r"(?::(?P<tag>[a-z0-9_.-]+))?",
        r"(?:@sha256:(?P<hash>[a-f0-9]+))?$",
    ))
    .expect("image reference pattern is valid")
});

/// A parsed, normalized image coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: String,
    repository: String,
    tag: Option<String>,
    hash: Option<String>,
}

impl ImageReference {
    /// Build a reference from its parts, applying the default registry,
    /// the implicit `library/` namespace and the default tag.
    pub fn new(
        repository: impl Into<String>,
        registry: Option<&str>,
        tag: Option<&str>,
        hash: Option<&str>,
    ) -> Self {
        let registry = registry.unwrap_or(DEFAULT_REGISTRY).to_string();
        let mut repository = repository.into();
        if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            repository = format!("library/{repository}");
        }
        let tag = match (tag, hash) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag.map(str::to_string),
        };
        Self {
            registry,
            repository,
            tag,
            hash: hash.map(str::to_string),
        }
    }

    /// Parse a reference string.
    ///
    /// The leading path component names the registry only when it looks
    /// like a host (has a `.` or a port, or is `localhost`); `org/name`
    /// resolves to `docker.io/org/name`.
    pub fn parse(spec: &str) -> Result<Self> {
        let caps = IMAGE_RE
            .captures(spec)
            .ok_or_else(|| Error::InvalidImageSpec(spec.to_string()))?;

        let repository = &caps["repository"];
        let tag = caps.name("tag").map(|m| m.as_str());
        let hash = caps.name("hash").map(|m| m.as_str());

        match caps.name("registry").map(|m| m.as_str()) {
            Some(registry) if looks_like_host(registry) => {
                Ok(Self::new(repository, Some(registry), tag, hash))
            }
            Some(namespace) => Ok(Self::new(
                format!("{namespace}/{repository}"),
                None,
                tag,
                hash,
            )),
            None => Ok(Self::new(repository, None, tag, hash)),
        }
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Hex part of the `sha256` digest, if the reference pins one.
    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// Token used to address manifests: `sha256:<hash>` if pinned, else the tag.
    pub fn reference(&self) -> String {
        match (&self.hash, &self.tag) {
            (Some(hash), _) => format!("sha256:{hash}"),
            (None, Some(tag)) => tag.clone(),
            (None, None) => DEFAULT_TAG.to_string(),
        }
    }

    /// Local artifact file name, `<slug(repository)>-<slug(reference)>.wasm`.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}.wasm",
            slug(&self.repository),
            slug(&self.reference())
        )
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(hash) = &self.hash {
            write!(f, "@sha256:{hash}")?;
        }
        Ok(())
    }
}

impl FromStr for ImageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn looks_like_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

/// Lower-case `s` and collapse every run of non-alphanumeric characters into `-`.
pub fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_run = false;
    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out
}
