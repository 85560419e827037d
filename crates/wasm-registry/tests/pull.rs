use std::path::Path;

use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use wasm_registry::{
    Error, OCI_IMAGE_MANIFEST_MEDIA_TYPE, PullConfig, StatusCode, WASM_LAYER_MEDIA_TYPE,
    WASM_LAYER_MEDIA_TYPE_LEGACY, WasmImage, WasmRegistry,
};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPO: &str = "cardil/cloudevents-pretty-print";
const TOKEN: &str = "eyJ0eXAiOiJKV1QiLCJhbGciOiJSUzI1NiJ9";
const WASM: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

fn layer(media_type: &str, content: &[u8]) -> Value {
    json!({
        "mediaType": media_type,
        "digest": sha256_digest(content),
        "size": content.len(),
        "annotations": {
            "org.opencontainers.image.title": "target/wasm32-wasi/release/cloudevents_pretty_print.wasm"
        }
    })
}

fn manifest(layers: Vec<Value>) -> Value {
    json!({
        "schemaVersion": 2,
        "config": {
            "mediaType": "application/vnd.wasm.config.v1+json",
            "digest": sha256_digest(b"{}"),
            "size": 2
        },
        "layers": layers
    })
}

struct Fixture {
    server: MockServer,
    workdir: TempDir,
}

impl Fixture {
    async fn new() -> Self {
        Self {
            server: MockServer::start().await,
            workdir: tempfile::tempdir().unwrap(),
        }
    }

    fn host(&self) -> String {
        self.server.address().to_string()
    }

    fn image(&self) -> String {
        format!("{}/{REPO}", self.host())
    }

    fn registry_in(&self, workdir: &Path) -> WasmRegistry {
        WasmRegistry::with_config(PullConfig::new(workdir).with_insecure_registry(&self.host()))
    }

    fn registry(&self) -> WasmRegistry {
        self.registry_in(self.workdir.path())
    }

    fn artifact_path(&self) -> std::path::PathBuf {
        self.workdir
            .path()
            .join("cardil-cloudevents-pretty-print-latest.wasm")
    }

    /// `/v2/` answers 401 with the given challenge.
    async fn mount_challenge(&self, challenge: &str) {
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .and(header("docker-distribution-api-version", "registry/2.0"))
            .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", challenge))
            .expect(1)
            .mount(&self.server)
            .await;
    }

    /// `/v2/` challenges and `/v2/auth` issues [`TOKEN`].
    async fn mount_docker_auth(&self) {
        let host = self.host();
        self.mount_challenge(&format!(
            r#"Bearer realm="http://{host}/v2/auth",service="{host}""#
        ))
        .await;
        Mock::given(method("GET"))
            .and(path("/v2/auth"))
            .and(query_param("scope", format!("repository:{REPO}:pull").as_str()))
            .and(query_param("service", host.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": TOKEN })))
            .expect(1)
            .mount(&self.server)
            .await;
    }

    async fn mount_manifest(&self, reference: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/v2/{REPO}/manifests/{reference}").as_str()))
            .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
            .and(header("accept", OCI_IMAGE_MANIFEST_MEDIA_TYPE))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", OCI_IMAGE_MANIFEST_MEDIA_TYPE)
                    .set_body_json(body),
            )
            .mount(&self.server)
            .await;
    }

    async fn mount_blob(&self, digest: &str, body: &[u8]) {
        Mock::given(method("GET"))
            .and(path(format!("/v2/{REPO}/blobs/{digest}").as_str()))
            .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .mount(&self.server)
            .await;
    }

    /// A registry serving one valid WASM layer behind Docker token auth.
    async fn mount_valid_image(&self) {
        self.mount_docker_auth().await;
        self.mount_manifest(
            "latest",
            manifest(vec![layer(WASM_LAYER_MEDIA_TYPE, &WASM)]),
        )
        .await;
        self.mount_blob(&sha256_digest(&WASM), &WASM).await;
    }

    fn workdir_is_empty(&self) -> bool {
        std::fs::read_dir(self.workdir.path()).unwrap().next().is_none()
    }
}

fn assert_invalid_image(err: &Error, reason_prefix: &str) {
    match err {
        Error::InvalidImage { reason, .. } => assert!(
            reason.starts_with(reason_prefix),
            "unexpected reason: {reason}"
        ),
        other => panic!("expected InvalidImage, got {other:?}"),
    }
}

#[tokio::test]
async fn pull_with_docker_token_auth() {
    let fx = Fixture::new().await;
    fx.mount_valid_image().await;

    let wasm = fx.registry().pull(&fx.image()).await.unwrap();

    assert_eq!(wasm.file, fx.artifact_path());
    assert_eq!(wasm.image.repository(), REPO);
    assert_eq!(wasm.image.registry(), fx.host());
    assert_eq!(std::fs::read(&wasm.file).unwrap(), WASM);
}

#[tokio::test]
async fn pull_with_oauth2_auth() {
    let fx = Fixture::new().await;
    let host = fx.host();
    fx.mount_challenge(&format!(
        r#"Bearer realm="http://{host}/oauth2/token",service="{host}""#
    ))
    .await;
    Mock::given(method("GET"))
        .and(path("/oauth2/token"))
        .and(query_param("scope", format!("repository:{REPO}:pull").as_str()))
        .and(query_param("service", host.as_str()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "access_token": TOKEN })),
        )
        .expect(1)
        .mount(&fx.server)
        .await;
    fx.mount_manifest(
        "latest",
        manifest(vec![layer(WASM_LAYER_MEDIA_TYPE_LEGACY, &WASM)]),
    )
    .await;
    fx.mount_blob(&sha256_digest(&WASM), &WASM).await;

    let wasm = fx.registry().pull(&fx.image()).await.unwrap();

    assert_eq!(std::fs::read(&wasm.file).unwrap(), WASM);
}

#[tokio::test]
async fn pull_from_open_registry_skips_auth() {
    let fx = Fixture::new().await;
    let digest = sha256_digest(&WASM);
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&fx.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/auth"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fx.server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{REPO}/manifests/v1").as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(manifest(vec![layer(WASM_LAYER_MEDIA_TYPE, &WASM)])),
        )
        .mount(&fx.server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{REPO}/blobs/{digest}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WASM.to_vec()))
        .mount(&fx.server)
        .await;

    let wasm = fx
        .registry()
        .pull(&format!("{}:v1", fx.image()))
        .await
        .unwrap();

    assert!(wasm.file.ends_with("cardil-cloudevents-pretty-print-v1.wasm"));
    let requests = fx.server.received_requests().await.unwrap();
    assert!(
        requests
            .iter()
            .all(|r| !r.headers.contains_key("authorization"))
    );
}

#[tokio::test]
async fn pull_by_digest_addresses_manifest_by_digest() {
    let fx = Fixture::new().await;
    let pinned = "0123456789abcdef";
    fx.mount_docker_auth().await;
    fx.mount_manifest(
        &format!("sha256:{pinned}"),
        manifest(vec![layer(WASM_LAYER_MEDIA_TYPE, &WASM)]),
    )
    .await;
    fx.mount_blob(&sha256_digest(&WASM), &WASM).await;

    let wasm = fx
        .registry()
        .pull(&format!("{}:v1@sha256:{pinned}", fx.image()))
        .await
        .unwrap();

    assert!(
        wasm.file
            .ends_with(format!("cardil-cloudevents-pretty-print-sha256-{pinned}.wasm"))
    );
}

#[tokio::test]
async fn pull_creates_missing_workdir() {
    let fx = Fixture::new().await;
    fx.mount_valid_image().await;
    let missing = fx.workdir.path().join("not").join("there");

    let wasm = fx.registry_in(&missing).pull(&fx.image()).await.unwrap();

    assert!(missing.is_dir());
    assert_eq!(wasm.file.parent(), Some(missing.as_path()));
    assert_eq!(std::fs::read(&wasm.file).unwrap(), WASM);
}

#[cfg(unix)]
#[tokio::test]
async fn pull_rejects_read_only_workdir_before_network() {
    use std::os::unix::fs::PermissionsExt;

    // Root bypasses directory permission bits.
    if unsafe { libc::geteuid() } == 0 {
        eprintln!("skipping: running as root");
        return;
    }

    let fx = Fixture::new().await;
    let no_access = fx.workdir.path().join("no-access");
    std::fs::create_dir(&no_access).unwrap();
    std::fs::set_permissions(&no_access, std::fs::Permissions::from_mode(0o500)).unwrap();

    let result = fx.registry_in(&no_access).pull(&fx.image()).await;
    std::fs::set_permissions(&no_access, std::fs::Permissions::from_mode(0o700)).unwrap();

    let err = result.unwrap_err();
    assert!(matches!(err, Error::InvalidWorkdir { .. }), "{err:?}");
    assert!(err.to_string().starts_with("Invalid workdir"));
    assert!(fx.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn pull_rejects_workdir_that_is_a_file() {
    let fx = Fixture::new().await;
    let file = fx.workdir.path().join("plain-file");
    std::fs::write(&file, b"x").unwrap();

    let err = fx.registry_in(&file).pull(&fx.image()).await.unwrap_err();

    assert!(matches!(err, Error::InvalidWorkdir { .. }), "{err:?}");
}

#[tokio::test]
async fn pull_rejects_invalid_spec_without_network() {
    let fx = Fixture::new().await;

    let err = fx.registry().pull("Not A Valid/Image").await.unwrap_err();

    assert!(matches!(err, Error::InvalidImageSpec(ref s) if s == "Not A Valid/Image"));
    assert!(fx.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn pull_fails_when_ping_returns_server_error() {
    let fx = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&fx.server)
        .await;

    let err = fx.registry().pull(&fx.image()).await.unwrap_err();

    assert!(
        matches!(err, Error::InvalidRestResponse { .. }),
        "{err:?}"
    );
    assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(
        err.to_string(),
        format!(
            "Failed to ping registry: {}: HTTP 500 Internal Server Error",
            fx.host()
        )
    );
    assert_eq!(fx.server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn pull_fails_on_unknown_challenge_scheme() {
    let fx = Fixture::new().await;
    fx.mount_challenge(r#"Basic realm="registry""#).await;

    let err = fx.registry().pull(&fx.image()).await.unwrap_err();

    assert!(matches!(err, Error::IllegalAuth(ref h) if h == r#"Basic realm="registry""#));
}

#[tokio::test]
async fn pull_fails_when_token_endpoint_refuses() {
    let fx = Fixture::new().await;
    let host = fx.host();
    fx.mount_challenge(&format!(r#"Bearer realm="http://{host}/v2/auth""#))
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/auth"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&fx.server)
        .await;

    let err = fx.registry().pull(&fx.image()).await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::from_code(403)));
    assert!(err.to_string().starts_with("Failed to authorize"));
}

#[tokio::test]
async fn pull_fails_when_manifest_is_missing() {
    let fx = Fixture::new().await;
    fx.mount_docker_auth().await;

    let err = fx.registry().pull(&fx.image()).await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::from_code(404)));
    assert!(err.to_string().starts_with("Failed to get manifest"));
    assert!(fx.workdir_is_empty());
}

#[tokio::test]
async fn pull_rejects_two_layers() {
    let fx = Fixture::new().await;
    fx.mount_docker_auth().await;
    fx.mount_manifest(
        "latest",
        manifest(vec![
            layer(WASM_LAYER_MEDIA_TYPE, &WASM),
            layer(WASM_LAYER_MEDIA_TYPE, b"more"),
        ]),
    )
    .await;

    let err = fx.registry().pull(&fx.image()).await.unwrap_err();

    assert_invalid_image(&err, "Want one layer, got: 2");
    assert!(fx.workdir_is_empty());
}

#[tokio::test]
async fn pull_rejects_non_wasm_layer() {
    let fx = Fixture::new().await;
    fx.mount_docker_auth().await;
    fx.mount_manifest(
        "latest",
        manifest(vec![layer("application/vnd.oci.image.layer.v1.tar+gzip", &WASM)]),
    )
    .await;

    let err = fx.registry().pull(&fx.image()).await.unwrap_err();

    assert_invalid_image(
        &err,
        "Want WASM media type, got: application/vnd.oci.image.layer.v1.tar+gzip",
    );
}

#[tokio::test]
async fn pull_rejects_size_mismatch_and_removes_file() {
    let fx = Fixture::new().await;
    fx.mount_docker_auth().await;
    fx.mount_manifest(
        "latest",
        manifest(vec![layer(WASM_LAYER_MEDIA_TYPE, &WASM)]),
    )
    .await;
    fx.mount_blob(&sha256_digest(&WASM), &[0xDE, 0xAD, 0xBE])
        .await;

    let err = fx.registry().pull(&fx.image()).await.unwrap_err();

    assert_invalid_image(&err, "Want size 4, got: 3");
    assert!(!fx.artifact_path().exists());
}

#[tokio::test]
async fn pull_rejects_digest_mismatch_and_removes_file() {
    let fx = Fixture::new().await;
    let tampered = [0xDE, 0xAD, 0xBE, 0xEE];
    fx.mount_docker_auth().await;
    fx.mount_manifest(
        "latest",
        manifest(vec![layer(WASM_LAYER_MEDIA_TYPE, &WASM)]),
    )
    .await;
    fx.mount_blob(&sha256_digest(&WASM), &tampered).await;

    let err = fx.registry().pull(&fx.image()).await.unwrap_err();

    assert_invalid_image(
        &err,
        &format!(
            "Want digest {}, got: {}",
            sha256_digest(&WASM),
            sha256_digest(&tampered)
        ),
    );
    assert!(!fx.artifact_path().exists());
}

#[tokio::test]
async fn pull_fails_when_blob_is_missing() {
    let fx = Fixture::new().await;
    fx.mount_docker_auth().await;
    fx.mount_manifest(
        "latest",
        manifest(vec![layer(WASM_LAYER_MEDIA_TYPE, &WASM)]),
    )
    .await;

    let err = fx.registry().pull(&fx.image()).await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::from_code(404)));
    assert!(err.to_string().starts_with("Failed to fetch blob"));
    assert!(fx.workdir_is_empty());
}

/// A registry on a raw socket whose blob response declares 8 bytes and
/// closes the connection after 3.
async fn serve_truncated_blob(manifest: Value) -> std::net::SocketAddr {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let manifest = manifest.to_string();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            let head = String::from_utf8_lossy(&head);
            let target = head.split_whitespace().nth(1).unwrap_or_default();

            let response = if target.contains("/blobs/") {
                b"HTTP/1.1 200 OK\r\nContent-Length: 8\r\nConnection: close\r\n\r\n\xDE\xAD\xBE"
                    .to_vec()
            } else if target.contains("/manifests/") {
                format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: {OCI_IMAGE_MANIFEST_MEDIA_TYPE}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{manifest}",
                    manifest.len()
                )
                .into_bytes()
            } else {
                b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}".to_vec()
            };
            let _ = socket.write_all(&response).await;
            let _ = socket.shutdown().await;
        }
    });

    addr
}

#[tokio::test]
async fn pull_removes_partial_file_when_transfer_breaks() {
    let content = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x61, 0x73, 0x6D];
    let addr = serve_truncated_blob(manifest(vec![layer(WASM_LAYER_MEDIA_TYPE, &content)])).await;
    let host = addr.to_string();
    let workdir = tempfile::tempdir().unwrap();
    let registry =
        WasmRegistry::with_config(PullConfig::new(workdir.path()).with_insecure_registry(&host));

    let err = registry
        .pull(&format!("{host}/{REPO}"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidRestResponse { .. }), "{err:?}");
    assert!(
        err.to_string().starts_with("Failed to fetch blob: "),
        "unexpected error: {err}"
    );
    assert!(std::fs::read_dir(workdir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn pull_rejects_invalid_user_agent_before_network() {
    let fx = Fixture::new().await;
    let mut config = PullConfig::new(fx.workdir.path()).with_insecure_registry(&fx.host());
    config.user_agent = "wasm-registry\r\n".to_string();

    let err = WasmRegistry::with_config(config)
        .pull(&fx.image())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidUserAgent { .. }), "{err:?}");
    assert!(fx.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn pull_rejects_unsupported_digest_algorithm() {
    let fx = Fixture::new().await;
    let mut bad = layer(WASM_LAYER_MEDIA_TYPE, &WASM);
    bad["digest"] = json!("md5:2f249230a8e7c2bf6005ccd2679259ec");
    fx.mount_docker_auth().await;
    fx.mount_manifest("latest", manifest(vec![bad])).await;

    let err = fx.registry().pull(&fx.image()).await.unwrap_err();

    assert_invalid_image(&err, "Unsupported digest: md5:");
}

#[tokio::test]
async fn push_is_not_implemented() {
    let fx = Fixture::new().await;
    let image = wasm_registry::ImageReference::parse(&fx.image()).unwrap();
    let wasm = WasmImage::new(image, fx.workdir.path().join("cloudevents-pretty-print.wasm"));

    let err = fx.registry().push(&wasm).await.unwrap_err();

    assert!(matches!(err, Error::NotImplemented));
    assert_eq!(err.to_string(), "Not implemented");
}
