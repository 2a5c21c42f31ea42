//! Visual-crypto share reconstruction, in-browser WASM server.
//!
//! Two share images are normalized to a canonical width, stacked with a
//! multiplicative blend at an adjustable offset, optionally binarized, and
//! handed to a decoder. Results land in a bounded history.
//!
//! The library surface is [`imaging`], [`history`] and [`pipeline`]. For the
//! browser, `handle_request(method, path, query, body)` is exported for the
//! Web Worker bridge and routed with `matchit`.

use wasm_bindgen::prelude::*;

pub mod bridge;
pub mod config;
pub mod error;
pub mod history;
pub mod imaging;
pub mod pipeline;
pub mod qr_decode;
pub mod routes;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};

/// Process an HTTP-like request and return an HTML fragment.
///
/// Called from JavaScript (Web Worker) via wasm-bindgen.
///
/// # Arguments
/// * `method`: HTTP method ("GET" or "POST")
/// * `path`  : URL path (e.g., "/api/decrypt/composite")
/// * `query` : Query string (e.g., "?enhanced=true")
/// * `body`  : Request body (POST form data or JSON). Empty for GET.
#[wasm_bindgen]
pub fn handle_request(method: &str, path: &str, query: &str, body: &str) -> String {
    let mut router = matchit::Router::new();

    router.insert("/api/decrypt/layer", "decrypt_layer").ok();
    router.insert("/api/decrypt/offset", "decrypt_offset").ok();
    router.insert("/api/decrypt/composite", "decrypt_composite").ok();
    router.insert("/api/decrypt/decode", "decrypt_decode").ok();
    router.insert("/api/decrypt/save", "decrypt_save").ok();
    router.insert("/api/decrypt/reset", "decrypt_reset").ok();

    router.insert("/api/history", "history_list").ok();
    router.insert("/api/history/remove", "history_remove").ok();
    router.insert("/api/history/export", "history_export").ok();
    router.insert("/api/history/restore", "history_restore").ok();

    router.insert("/api/encrypt/record", "encrypt_record").ok();
    router.insert("/api/config", "config").ok();

    match router.at(path) {
        Ok(matched) => match (*matched.value, method) {
            ("decrypt_layer", "POST") => routes::decrypt::handle_layer_post(body),
            ("decrypt_offset", "POST") => routes::decrypt::handle_offset_post(body),
            ("decrypt_composite", "GET") => routes::decrypt::handle_composite_get(query),
            ("decrypt_decode", "POST") => routes::decrypt::handle_decode_post(body),
            ("decrypt_save", "POST") => routes::decrypt::handle_save_post(body),
            ("decrypt_reset", "POST") => routes::decrypt::handle_reset_post(body),

            ("history_list", "GET") => routes::history::handle_list_get(query),
            ("history_remove", "POST") => routes::history::handle_remove_post(body),
            ("history_export", "GET") => routes::history::handle_export_get(query),
            ("history_restore", "POST") => routes::history::handle_restore_post(body),

            ("encrypt_record", "POST") => routes::encrypt::handle_record_post(body),
            ("config", "GET") => routes::config::handle_config_get(query),
            ("config", "POST") => routes::config::handle_config_post(body),

            _ => method_not_allowed(),
        },
        Err(_) => not_found(),
    }
}

fn not_found() -> String {
    r#"<span class="text-kip-red">404 — route not found</span>"#.to_string()
}

fn method_not_allowed() -> String {
    r#"<span class="text-kip-red">405 — method not allowed</span>"#.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_404_for_unknown_route() {
        let html = handle_request("GET", "/api/nonexistent", "", "");
        assert!(html.contains("404"));
    }

    #[test]
    fn returns_405_for_wrong_method() {
        let html = handle_request("GET", "/api/decrypt/layer", "", "");
        assert!(html.contains("405"));
        let html = handle_request("POST", "/api/history/export", "", "");
        assert!(html.contains("405"));
    }

    #[test]
    fn routes_history_list() {
        bridge::reset_session();
        let html = handle_request("GET", "/api/history", "?category=decrypt", "");
        assert!(html.contains("history-decrypt"));
        bridge::reset_session();
    }

    #[test]
    fn routes_composite_without_layers() {
        bridge::reset_session();
        let html = handle_request("GET", "/api/decrypt/composite", "", "");
        assert!(html.contains("Missing layer"));
        bridge::reset_session();
    }

    #[test]
    fn routes_encrypt_then_export() {
        bridge::reset_session();
        let html = handle_request(
            "POST",
            "/api/encrypt/record",
            "",
            "text=secret&share1=AA%3D%3D&share2=AA%3D%3D",
        );
        assert!(html.contains("secret"));
        let json = handle_request("GET", "/api/history/export", "?category=encrypt", "");
        assert!(json.contains(r#""label":"secret""#));
        bridge::reset_session();
    }

    #[test]
    fn routes_config_roundtrip() {
        bridge::reset_session();
        let html = handle_request("POST", "/api/config", "", r#"{"threshold": 70}"#);
        assert!(html.contains("Settings updated"));
        let json = handle_request("GET", "/api/config", "", "");
        assert!(json.contains(r#""threshold":70"#));
        bridge::reset_session();
    }

    #[test]
    fn routes_reset() {
        bridge::reset_session();
        let html = handle_request("POST", "/api/decrypt/reset", "", "");
        assert!(html.contains("Layers cleared"));
        bridge::reset_session();
    }
}
