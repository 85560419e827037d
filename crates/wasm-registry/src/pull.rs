//! Pulling a single-layer WASM image into a verified local file.

use std::io;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use oci_client::manifest::OciDescriptor;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::auth::{AuthNegotiator, Scope};
use crate::client::{BlobResponse, RegistryClient};
use crate::config::PullConfig;
use crate::digest::{ContentDigest, DigestAlgorithm};
use crate::error::RestCause;
use crate::media_types::is_wasm_layer;
use crate::reference::ImageReference;
use crate::{Error, Result};

/// A downloaded WASM module whose size and digest matched its manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WasmImage {
    pub image: ImageReference,
    pub file: PathBuf,
}

impl WasmImage {
    pub fn new(image: ImageReference, file: impl Into<PathBuf>) -> Self {
        Self {
            image,
            file: file.into(),
        }
    }
}

/// Pulls WASM images into a working directory.
#[derive(Debug, Clone)]
pub struct WasmRegistry {
    config: PullConfig,
}

impl WasmRegistry {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self::with_config(PullConfig::new(workdir))
    }

    pub fn with_config(config: PullConfig) -> Self {
        Self { config }
    }

    pub fn workdir(&self) -> &Path {
        self.config.workdir()
    }

    /// Publishing images is not supported.
    pub async fn push(&self, _wasm: &WasmImage) -> Result<()> {
        Err(Error::NotImplemented)
    }

    /// Pull `image` and return the verified local file.
    ///
    /// The first failure ends the pull. A file that was written but failed
    /// verification is removed before the error is returned.
    pub async fn pull(&self, image: &str) -> Result<WasmImage> {
        self.verify_workdir().await?;
        let image = ImageReference::parse(image)?;
        info!(%image, workdir = %self.workdir().display(), "pulling wasm image");

        let client = self.open_client(&image).await?;

        let manifest = client
            .fetch_manifest(image.repository(), &image.reference())
            .await?;
        if manifest.layers.len() != 1 {
            return Err(Error::invalid_image(
                &image,
                format!("Want one layer, got: {}", manifest.layers.len()),
            ));
        }
        let layer = &manifest.layers[0];
        if !is_wasm_layer(&layer.media_type) {
            return Err(Error::invalid_image(
                &image,
                format!("Want WASM media type, got: {}", layer.media_type),
            ));
        }
        let digest = ContentDigest::parse(&layer.digest).ok_or_else(|| {
            Error::invalid_image(&image, format!("Unsupported digest: {}", layer.digest))
        })?;

        let file = self.workdir().join(image.file_name());
        tokio::fs::create_dir_all(self.workdir())
            .await
            .map_err(|e| Error::invalid_workdir(self.workdir(), e))?;

        self.download(&client, &image, layer, &digest, &file).await?;

        info!(%image, file = %file.display(), size = layer.size, "pulled wasm image");
        Ok(WasmImage::new(image, file))
    }

    /// A missing directory is fine (it is created later); one that exists
    /// must be a directory this process can create files in.
    async fn verify_workdir(&self) -> Result<()> {
        let workdir = self.workdir();
        let meta = match tokio::fs::metadata(workdir).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::invalid_workdir(workdir, e)),
        };
        if !meta.is_dir() {
            return Err(Error::invalid_workdir(
                workdir,
                io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
            ));
        }

        let dir = workdir.to_path_buf();
        tokio::task::spawn_blocking(move || tempfile::tempfile_in(dir).map(drop))
            .await
            .map_err(io::Error::other)
            .and_then(|written| written)
            .map_err(|e| Error::invalid_workdir(workdir, e))
    }

    /// Probe the registry and authenticate if it asks for it.
    async fn open_client(&self, image: &ImageReference) -> Result<RegistryClient> {
        let endpoint = self.config.endpoint_for(image.registry())?;
        let mut client = RegistryClient::new(endpoint, &self.config.user_agent)?;

        let probe = client.check_version().await?;
        if probe.status.is_unauthorized() {
            let mut negotiator = AuthNegotiator::new();
            let scheme = negotiator.challenge(probe.www_authenticate.as_deref())?;
            debug!(registry = %image.registry(), ?scheme, "registry requires auth");
            let token = negotiator
                .negotiate(&client, &Scope::pull(image.repository()))
                .await?;
            client.set_token(token);
        } else if !probe.status.is_successful() {
            return Err(Error::rest(client.ping_failure(), probe.status));
        }

        Ok(client)
    }

    async fn download(
        &self,
        client: &RegistryClient,
        image: &ImageReference,
        layer: &OciDescriptor,
        digest: &ContentDigest,
        file: &Path,
    ) -> Result<()> {
        let blob = client
            .fetch_blob_stream(image.repository(), &layer.digest)
            .await?;
        if !blob.status.is_successful() {
            return Err(Error::rest("Failed to fetch blob", blob.status));
        }
        debug!(
            file = %file.display(),
            content_length = ?blob.content_length(),
            expected = layer.size,
            "writing blob"
        );

        let (size, got) = match write_blob(blob, file, digest.algorithm()).await {
            Ok(written) => written,
            Err(cause) => {
                remove_untrusted(file).await;
                return Err(Error::rest("Failed to fetch blob", cause));
            }
        };

        if u64::try_from(layer.size).ok() != Some(size) {
            remove_untrusted(file).await;
            return Err(Error::invalid_image(
                image,
                format!("Want size {}, got: {size}", layer.size),
            ));
        }
        if got != digest.hex() {
            remove_untrusted(file).await;
            return Err(Error::invalid_image(
                image,
                format!(
                    "Want digest {}, got: {}:{got}",
                    layer.digest,
                    digest.algorithm()
                ),
            ));
        }
        Ok(())
    }
}

/// Stream the blob into `path`, hashing each chunk as it is written.
/// Returns the byte count and the hex digest.
async fn write_blob(
    blob: BlobResponse,
    path: &Path,
    algorithm: DigestAlgorithm,
) -> std::result::Result<(u64, String), RestCause> {
    let mut out = tokio::fs::File::create(path).await?;
    let mut hasher = algorithm.hasher();
    let mut size = 0u64;

    let mut stream = std::pin::pin!(blob.into_stream());
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        out.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    out.flush().await?;

    Ok((size, hasher.finalize_hex()))
}

async fn remove_untrusted(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => warn!(file = %path.display(), "removed unverified download"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(file = %path.display(), error = %e, "failed to remove unverified download"),
    }
}
