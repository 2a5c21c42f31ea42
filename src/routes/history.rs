//! `/api/history/*` routes: bounded history lists and their localStorage
//! mirror.

use crate::bridge::with_orchestrator;
use crate::error::Result;
use crate::history::{Category, HistoryRecord};
use crate::routes::util::{
    error_fragment, escape_html, get_param, parse_form_body, parse_query, pipeline_error_fragment,
};

fn category_param(params: &[(String, String)]) -> std::result::Result<Category, String> {
    match get_param(params, "category") {
        None | Some("") => Ok(Category::Decrypt),
        Some(c) => Category::parse(c).ok_or_else(|| error_fragment("Invalid category parameter")),
    }
}

// ── GET /api/history ───────────────────────────────────────────────

/// Handle GET /api/history?category={encrypt|decrypt}
pub fn handle_list_get(query: &str) -> String {
    let params = parse_query(query);
    let category = match category_param(&params) {
        Ok(c) => c,
        Err(html) => return html,
    };
    render_category(category).unwrap_or_else(|e| pipeline_error_fragment(&e))
}

// ── POST /api/history/remove ───────────────────────────────────────

/// Handle POST /api/history/remove
/// Body params: category={encrypt|decrypt}&id={n}
/// Returns the re-rendered list.
pub fn handle_remove_post(body: &str) -> String {
    let params = parse_form_body(body);
    let category = match category_param(&params) {
        Ok(c) => c,
        Err(html) => return html,
    };
    let id = match get_param(&params, "id").map(str::parse::<u64>) {
        Some(Ok(id)) => id,
        _ => return error_fragment("Missing or invalid id parameter"),
    };

    let removed = with_orchestrator(|o| o.history_mut().remove(category, id));
    match removed {
        Ok(_) => render_category(category).unwrap_or_else(|e| pipeline_error_fragment(&e)),
        Err(e) => pipeline_error_fragment(&e),
    }
}

// ── GET /api/history/export ────────────────────────────────────────

/// Handle GET /api/history/export?category={encrypt|decrypt}
/// Returns the list as JSON. Called by the page after every change to
/// mirror the list into localStorage.
pub fn handle_export_get(query: &str) -> String {
    let params = parse_query(query);
    let category = match category_param(&params) {
        Ok(c) => c,
        Err(html) => return html,
    };
    match with_orchestrator(|o| o.history().export(category)) {
        Ok(json) => json,
        Err(e) => format!("error: {}", e),
    }
}

// ── POST /api/history/restore ──────────────────────────────────────

/// Handle POST /api/history/restore
/// Body params: category={encrypt|decrypt}&state={json}
/// Called on page load with the list saved in localStorage.
pub fn handle_restore_post(body: &str) -> String {
    let params = parse_form_body(body);
    let category = match category_param(&params) {
        Ok(c) => c,
        Err(html) => return html,
    };
    let state = get_param(&params, "state").unwrap_or("").trim();
    if state.is_empty() {
        return "ok".to_string();
    }
    match with_orchestrator(|o| o.history_mut().restore(category, state)) {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {}", e),
    }
}

// ── Rendering ──────────────────────────────────────────────────────

fn render_category(category: Category) -> Result<String> {
    let records = with_orchestrator(|o| o.history().list(category))?;
    Ok(render_list(category, &records))
}

fn render_list(category: Category, records: &[HistoryRecord]) -> String {
    let mut html = format!(
        r#"<div id="history-{}" class="flex flex-col gap-2">"#,
        category
    );
    if records.is_empty() {
        html.push_str(r#"<p class="text-sm text-slate-400">No history yet.</p>"#);
    }
    for r in records {
        let label = escape_html(&r.label);
        let label_class = if r.is_sentinel() {
            "italic text-slate-500"
        } else {
            "font-bold break-all"
        };
        html.push_str(&format!(
            r##"<div class="flex items-center gap-2">
<img src="{src}" alt="{label}" class="w-16 h-16 object-contain border border-slate-300">
<div class="flex flex-col grow"><span class="{label_class}">{label}</span><span class="text-xs text-slate-500">{created}</span></div>
<button class="text-xs text-kip-red" hx-post="/api/history/remove" hx-vals='{{"category":"{category}","id":"{id}"}}' hx-target="#history-{category}" hx-swap="outerHTML">Delete</button>
</div>"##,
            src = escape_html(&r.encoded_image),
            created = escape_html(&r.created_at),
            id = r.id,
        ));
    }
    html.push_str("</div>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::reset_session;

    fn seed(category: Category, labels: &[&str]) {
        for l in labels {
            with_orchestrator(|o| {
                o.history_mut()
                    .record(category, *l, "data:image/png;base64,AA==")
                    .map(|_| ())
            })
            .unwrap();
        }
    }

    fn stored_ids(category: Category) -> Vec<u64> {
        with_orchestrator(|o| Ok(o.history().list(category)?.iter().map(|r| r.id).collect())).unwrap()
    }

    #[test]
    fn empty_list_renders_placeholder() {
        reset_session();
        let html = handle_list_get("?category=encrypt");
        assert!(html.contains(r#"id="history-encrypt""#));
        assert!(html.contains("No history yet"));
        reset_session();
    }

    #[test]
    fn list_defaults_to_decrypt_newest_first() {
        reset_session();
        seed(Category::Decrypt, &["first", "second"]);
        let html = handle_list_get("");
        assert!(html.contains(r#"id="history-decrypt""#));
        let first = html.find("first").unwrap();
        let second = html.find("second").unwrap();
        assert!(second < first);
        reset_session();
    }

    #[test]
    fn sentinel_labels_are_styled() {
        reset_session();
        seed(Category::Decrypt, &["manually saved"]);
        assert!(handle_list_get("").contains("italic"));
        reset_session();
    }

    #[test]
    fn remove_rerenders_without_record() {
        reset_session();
        seed(Category::Decrypt, &["keep", "drop"]);
        let ids = stored_ids(Category::Decrypt);
        let html = handle_remove_post(&format!("category=decrypt&id={}", ids[0]));
        assert!(!html.contains(">drop<"));
        assert!(html.contains(">keep<"));
        assert_eq!(stored_ids(Category::Decrypt), vec![ids[1]]);
        reset_session();
    }

    #[test]
    fn remove_rejects_bad_params() {
        reset_session();
        assert!(handle_remove_post("category=decrypt&id=abc").contains("invalid id"));
        assert!(handle_remove_post("category=bogus&id=1").contains("Invalid category"));
        reset_session();
    }

    #[test]
    fn export_then_restore_mirrors_list() {
        reset_session();
        seed(Category::Encrypt, &["a", "b"]);
        let json = handle_export_get("?category=encrypt");
        assert!(json.starts_with('['));
        assert!(json.contains("encodedImage"));

        reset_session();
        let body = format!("category=encrypt&state={}", json.replace('+', "%2B").replace('&', "%26"));
        assert_eq!(handle_restore_post(&body), "ok");
        let html = handle_list_get("?category=encrypt");
        assert!(html.contains(">a<") && html.contains(">b<"));
        reset_session();
    }

    #[test]
    fn restore_reports_bad_json() {
        reset_session();
        assert!(handle_restore_post("category=decrypt&state=%7Bnope").starts_with("error:"));
        assert_eq!(handle_restore_post("category=decrypt"), "ok");
        reset_session();
    }

    #[test]
    fn restored_image_cannot_break_out_of_src() {
        reset_session();
        let state = r#"[{"id":1,"label":"x","encodedImage":"data:x\" onerror=\"alert(1)\" x=\";base64,AA==","createdAt":"now"}]"#;
        let body = format!("category=encrypt&state={}", state.replace('&', "%26"));
        assert_eq!(handle_restore_post(&body), "ok");
        let html = handle_list_get("?category=encrypt");
        assert!(!html.contains(r#"" onerror=""#));
        assert!(html.contains(r#"src="data:x&quot; onerror=&quot;alert(1)&quot;"#));
        reset_session();
    }

    #[test]
    fn labels_are_escaped() {
        reset_session();
        seed(Category::Decrypt, &["<script>"]);
        let html = handle_list_get("");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        reset_session();
    }
}
