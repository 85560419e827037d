//! Pull-only OCI registry client for WebAssembly modules.
//!
//! A WASM module published as an OCI image is a manifest with exactly one
//! layer of media type `application/vnd.wasm.content.layer.v1+wasm` (or the
//! legacy `application/vnd.module.wasm.content.layer.v1+wasm`). Pulling it:
//!
//! - parses the image reference (`[registry/]repository[:tag][@sha256:hash]`),
//! - probes `/v2/` and, on `401`, exchanges the `WWW-Authenticate` challenge
//!   for a bearer token (Docker `/v2/auth` or OAuth2 realm),
//! - fetches and validates the manifest,
//! - streams the layer to `<workdir>/<repository>-<reference>.wasm` while
//!   hashing it, then checks size and digest.
//!
//! A returned [`WasmImage`] always names a complete, verified file.
//!
//! # Example
//!
//! ```no_run
//! use wasm_registry::WasmRegistry;
//!
//! # async fn run() -> wasm_registry::Result<()> {
//! let registry = WasmRegistry::new("/tmp/wasm");
//! let wasm = registry.pull("quay.io/cardil/cloudevents-pretty-print").await?;
//! println!("downloaded to {}", wasm.file.display());
//! # Ok(()) }
//! ```

mod auth;
mod client;
mod config;
mod digest;
mod endpoint;
mod error;
mod media_types;
mod pull;
mod reference;
mod status;

pub use auth::{
    AuthChallenge, AuthNegotiator, AuthScheme, AuthState, BearerToken, Scope, TokenExchange,
};
pub use client::{BlobResponse, RegistryClient, VersionCheck};
pub use config::{DEFAULT_WORKDIR, INSECURE_ENV, PullConfig, WORKDIR_ENV};
pub use digest::{ContentDigest, DigestAlgorithm, Hasher};
pub use endpoint::{RegistryEndpoint, Scheme};
pub use error::{Error, RestCause, Result};
pub use media_types::*;
pub use pull::{WasmImage, WasmRegistry};
pub use reference::{DEFAULT_REGISTRY, DEFAULT_TAG, ImageReference, slug};
pub use status::StatusCode;

/// OCI manifest types as returned by [`RegistryClient::fetch_manifest`].
pub use oci_client::manifest::{OciDescriptor, OciImageManifest};
