use futures_util::Stream;
use oci_client::manifest::OciImageManifest;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT, WWW_AUTHENTICATE};
use tracing::debug;

use crate::auth::{BearerToken, Scope, TokenExchange};
use crate::endpoint::RegistryEndpoint;
use crate::media_types::OCI_IMAGE_MANIFEST_MEDIA_TYPE;
use crate::status::StatusCode;
use crate::{Error, Result};

const DISTRIBUTION_API_VERSION: HeaderName =
    HeaderName::from_static("docker-distribution-api-version");
const DISTRIBUTION_API_VERSION_VALUE: &str = "registry/2.0";

/// Thin binding of the OCI distribution calls needed to pull one image.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    endpoint: RegistryEndpoint,
    http: reqwest::Client,
    token: Option<BearerToken>,
}

/// Outcome of the `GET /v2/` probe.
#[derive(Debug, Clone)]
pub struct VersionCheck {
    pub status: StatusCode,
    pub www_authenticate: Option<String>,
}

/// An opened blob response whose status has not been judged yet.
#[derive(Debug)]
pub struct BlobResponse {
    pub status: StatusCode,
    response: reqwest::Response,
}

impl BlobResponse {
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// Body chunks as they arrive.
    pub fn into_stream(self) -> impl Stream<Item = reqwest::Result<bytes::Bytes>> {
        self.response.bytes_stream()
    }
}

impl RegistryClient {
    pub fn new(endpoint: RegistryEndpoint, user_agent: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            DISTRIBUTION_API_VERSION,
            HeaderValue::from_static(DISTRIBUTION_API_VERSION_VALUE),
        );
        let ua = HeaderValue::from_str(user_agent).map_err(|source| Error::InvalidUserAgent {
            value: user_agent.to_string(),
            source,
        })?;
        headers.insert(USER_AGENT, ua);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::rest("Failed to create HTTP client", e))?;

        Ok(Self {
            endpoint,
            http,
            token: None,
        })
    }

    pub fn endpoint(&self) -> &RegistryEndpoint {
        &self.endpoint
    }

    /// Attach a token to every following registry call.
    pub fn set_token(&mut self, token: BearerToken) {
        self.token = Some(token);
    }

    fn get(&self, path: &str) -> Result<reqwest::RequestBuilder> {
        let url = self.endpoint.url(path)?;
        let req = self.http.get(url);
        Ok(match &self.token {
            Some(token) => req.bearer_auth(token.token()),
            None => req,
        })
    }

    /// `GET /v2/`. Any answer is returned; only transport failures are errors.
    pub async fn check_version(&self) -> Result<VersionCheck> {
        let resp = self
            .get("/v2/")?
            .send()
            .await
            .map_err(|e| Error::rest(self.ping_failure(), e))?;
        let status = StatusCode::of(&resp);
        let www_authenticate = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        debug!(registry = %self.endpoint.registry, %status, "version check");

        Ok(VersionCheck {
            status,
            www_authenticate,
        })
    }

    pub(crate) fn ping_failure(&self) -> String {
        format!("Failed to ping registry: {}", self.endpoint.registry)
    }

    /// Fetch a bearer token from a resolved token endpoint.
    pub async fn authorize(
        &self,
        exchange: &TokenExchange,
        scope: &Scope,
        account: Option<&str>,
    ) -> Result<BearerToken> {
        let mut url = exchange.url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("scope", &scope.to_string());
            query.append_pair("service", &exchange.service);
            if let Some(account) = account {
                query.append_pair("account", account);
            }
        }

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::rest("Failed to authorize", e))?;
        let status = StatusCode::of(&resp);
        if !status.is_successful() {
            return Err(Error::rest("Failed to authorize", status));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::rest("Failed to authorize", e))?;
        exchange
            .token_from(&body)
            .map_err(|e| Error::rest("Failed to authorize", e))
    }

    /// `GET /v2/<repository>/manifests/<reference>` as an OCI image manifest.
    pub async fn fetch_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<OciImageManifest> {
        const FAILED: &str = "Failed to get manifest";

        let resp = self
            .get(&format!("/v2/{repository}/manifests/{reference}"))?
            .header(ACCEPT, OCI_IMAGE_MANIFEST_MEDIA_TYPE)
            .send()
            .await
            .map_err(|e| Error::rest(FAILED, e))?;
        let status = StatusCode::of(&resp);
        debug!(%repository, %reference, %status, "fetched manifest");
        if !status.is_successful() {
            return Err(Error::rest(FAILED, status));
        }

        let body = resp.bytes().await.map_err(|e| Error::rest(FAILED, e))?;
        serde_json::from_slice(&body).map_err(|e| Error::rest(FAILED, e))
    }

    /// `GET /v2/<repository>/blobs/<digest>`. The status is left to the caller.
    pub async fn fetch_blob_stream(&self, repository: &str, digest: &str) -> Result<BlobResponse> {
        let response = self
            .get(&format!("/v2/{repository}/blobs/{digest}"))?
            .send()
            .await
            .map_err(|e| Error::rest("Failed to fetch blob", e))?;
        let status = StatusCode::of(&response);
        debug!(%repository, %digest, %status, "opened blob stream");

        Ok(BlobResponse { status, response })
    }
}
