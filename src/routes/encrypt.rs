//! `/api/encrypt/record`: keep a share-generation result in the encrypt
//! history. The shares themselves come from the generation service; the page
//! posts them here once they arrive.

use crate::bridge::with_orchestrator;
use crate::imaging::decode_data_url;
use crate::routes::util::{error_fragment, escape_html, get_param, parse_form_body, pipeline_error_fragment};

/// Handle POST /api/encrypt/record
/// Body params: text={plaintext}&share1={data URL}&share2={data URL}
pub fn handle_record_post(body: &str) -> String {
    let params = parse_form_body(body);
    let text = match get_param(&params, "text") {
        Some(t) if !t.trim().is_empty() => t,
        _ => return error_fragment("Missing text parameter"),
    };
    let mut shares = Vec::with_capacity(2);
    for key in ["share1", "share2"] {
        match get_param(&params, key) {
            Some(s) if !s.is_empty() => shares.push(s.replace(' ', "+")),
            _ => return error_fragment(&format!("Missing {} parameter", key)),
        }
    }

    // Both shares must at least be well-formed before anything is stored.
    if let Some(e) = shares.iter().find_map(|s| decode_data_url(s).err()) {
        return pipeline_error_fragment(&e);
    }

    match with_orchestrator(|o| o.record_encryption(text, &shares[0])) {
        Ok(record) => format!(
            r#"<span class="text-emerald-600">Saved "{}" to history</span>"#,
            escape_html(&record.label)
        ),
        Err(e) => pipeline_error_fragment(&e),
    }
}
