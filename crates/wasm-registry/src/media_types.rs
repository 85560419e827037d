//! Media types understood when pulling WASM module images.

/// WASM content layer media type (current).
pub const WASM_LAYER_MEDIA_TYPE: &str = oci_client::manifest::WASM_LAYER_MEDIA_TYPE;

/// WASM content layer media type used by older tooling.
pub const WASM_LAYER_MEDIA_TYPE_LEGACY: &str = "application/vnd.module.wasm.content.layer.v1+wasm";

/// OCI image manifest media type, sent as `Accept` when fetching manifests.
pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Returns true when `media_type` names a WASM content layer.
pub fn is_wasm_layer(media_type: &str) -> bool {
    media_type == WASM_LAYER_MEDIA_TYPE || media_type == WASM_LAYER_MEDIA_TYPE_LEGACY
}
