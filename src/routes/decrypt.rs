//! `/api/decrypt/*` routes: share upload, alignment, composite view,
//! recognition and force-save.
//!
//! Uploads arrive as data URLs together with a per-slot generation number
//! issued by the page. The page bumps the number on every file pick, so a
//! slow read that lands after a newer pick is dropped here.

use crate::bridge::{BridgeOrchestrator, decode_now, with_orchestrator};
use crate::error::{PipelineError, Result};
use crate::history::{HistoryRecord, SaveReason};
use crate::imaging::{AlignmentOffset, Nudge, to_portable_encoding};
use crate::pipeline::{CompositeResult, ShareLayer, Slot, Upload};
use crate::routes::util::{
    error_fragment, escape_html, get_param, parse_form_body, parse_query, pipeline_error_fragment,
};

const COMPOSITE_DOWNLOAD: &str = "decrypted.png";

// ── POST /api/decrypt/layer ────────────────────────────────────────

/// Handle POST /api/decrypt/layer
/// Body params: slot={a|b}&gen={n}&name={filename}&image={data URL}
///
/// Returns the layer preview, plus the composite panel (out-of-band) once
/// both layers are present. A stale `gen` returns an empty string.
pub fn handle_layer_post(body: &str) -> String {
    let params = parse_form_body(body);
    let Some(slot) = get_param(&params, "slot").and_then(Slot::parse) else {
        return error_fragment("Missing or invalid slot parameter");
    };
    let generation = match get_param(&params, "gen").map(str::parse::<u64>) {
        Some(Ok(g)) => g,
        Some(Err(_)) => return error_fragment("Invalid gen parameter"),
        None => return error_fragment("Missing gen parameter"),
    };
    let name = get_param(&params, "name")
        .filter(|n| !n.is_empty())
        .unwrap_or(slot.file_name());
    // Unencoded form bodies turn base64 '+' into spaces.
    let image = match get_param(&params, "image") {
        Some(i) if !i.is_empty() => i.replace(' ', "+"),
        _ => return error_fragment("Missing image parameter"),
    };

    with_orchestrator(|o| {
        if generation < o.session().generation(slot) {
            return Ok(String::new());
        }
        let upload = Upload::from_data_url(name, &image)?;
        let Some(layer) = o.accept_layer(slot, generation, upload)? else {
            return Ok(String::new());
        };

        let mut html = render_layer(slot, &layer)?;
        if o.session().layer(slot.other()).is_some() {
            let panel = match o.current_composite() {
                Ok(c) => render_composite(o, &c, false)?,
                Err(e) => composite_error(&e),
            };
            html.push_str(&panel.replacen(
                r#"<div id="composite""#,
                r#"<div id="composite" hx-swap-oob="true""#,
                1,
            ));
        }
        Ok(html)
    })
    .unwrap_or_else(|e| pipeline_error_fragment(&e))
}

// ── POST /api/decrypt/offset ───────────────────────────────────────

/// Handle POST /api/decrypt/offset
/// Body params:
///   - reset=true                        → back to (0, 0)
///   - nudge={up|down|left|right}        → move layer B one pixel
///   - dx={n}&dy={n}                     → absolute offset
///
/// Returns the re-blended composite panel.
pub fn handle_offset_post(body: &str) -> String {
    let params = parse_form_body(body);

    let change = if get_param(&params, "reset") == Some("true") {
        OffsetChange::Set(AlignmentOffset::default())
    } else if let Some(dir) = get_param(&params, "nudge") {
        match Nudge::parse(dir) {
            Some(n) => OffsetChange::Nudge(n),
            None => return error_fragment("Invalid nudge direction"),
        }
    } else {
        let dx = get_param(&params, "dx").map(str::parse::<i32>);
        let dy = get_param(&params, "dy").map(str::parse::<i32>);
        match (dx, dy) {
            (Some(Ok(dx)), Some(Ok(dy))) => OffsetChange::Set(AlignmentOffset::new(dx, dy)),
            (None, None) => return error_fragment("Missing offset parameters"),
            _ => return error_fragment("Invalid offset parameters"),
        }
    };

    with_orchestrator(|o| {
        match change {
            OffsetChange::Set(offset) => o.set_offset(offset),
            OffsetChange::Nudge(dir) => {
                o.nudge(dir);
            }
        }
        match o.current_composite() {
            Ok(c) => render_composite(o, &c, false),
            Err(e) => Ok(composite_error(&e)),
        }
    })
    .unwrap_or_else(|e| pipeline_error_fragment(&e))
}

enum OffsetChange {
    Set(AlignmentOffset),
    Nudge(Nudge),
}

// ── GET /api/decrypt/composite ─────────────────────────────────────

/// Handle GET /api/decrypt/composite?enhanced={true|false}
pub fn handle_composite_get(query: &str) -> String {
    let params = parse_query(query);
    let enhanced = get_param(&params, "enhanced") == Some("true");
    with_orchestrator(|o| match o.current_composite() {
        Ok(c) => render_composite(o, &c, enhanced),
        Err(e) => Ok(composite_error(&e)),
    })
    .unwrap_or_else(|e| pipeline_error_fragment(&e))
}

// ── POST /api/decrypt/decode ───────────────────────────────────────

/// Handle POST /api/decrypt/decode
/// Runs local recognition. Success lands in decrypt history; failure keeps
/// the composite and offers a force-save.
pub fn handle_decode_post(_body: &str) -> String {
    with_orchestrator(|o| {
        let c = o.current_composite()?;
        match decode_now(o, &c) {
            Ok(record) => Ok(render_decoded(&record)),
            Err(e) if e.is_decode_failure() => Ok(render_decode_failure(&e)),
            Err(e) => Err(e),
        }
    })
    .unwrap_or_else(|e| pipeline_error_fragment(&e))
}

// ── POST /api/decrypt/save ─────────────────────────────────────────

/// Handle POST /api/decrypt/save
/// Body params: reason={unrecognized|manual} (default manual)
pub fn handle_save_post(body: &str) -> String {
    let params = parse_form_body(body);
    let reason = match get_param(&params, "reason") {
        None | Some("") => SaveReason::Manual,
        Some(r) => match SaveReason::parse(r) {
            Some(reason) => reason,
            None => return error_fragment("Invalid save reason"),
        },
    };

    with_orchestrator(|o| {
        let c = o.current_composite()?;
        let record = o.force_save(&c, reason)?;
        Ok(format!(
            r#"<div id="decode-result"><span class="text-emerald-600">Saved to history as {}</span></div>"#,
            escape_html(&record.label)
        ))
    })
    .unwrap_or_else(|e| pipeline_error_fragment(&e))
}

// ── POST /api/decrypt/reset ────────────────────────────────────────

/// Handle POST /api/decrypt/reset
pub fn handle_reset_post(_body: &str) -> String {
    with_orchestrator(|o| {
        o.reset();
        Ok(r#"<div id="composite"><span class="text-emerald-600">Layers cleared.</span></div>"#.to_string())
    })
    .unwrap_or_else(|e| pipeline_error_fragment(&e))
}

// ── Rendering ──────────────────────────────────────────────────────

fn render_layer(slot: Slot, layer: &ShareLayer) -> Result<String> {
    let src = to_portable_encoding(layer.buffer())?;
    let (w, h) = layer.buffer().dimensions();
    let label = escape_html(layer.label());
    Ok(format!(
        r#"<div id="layer-{id}" class="flex flex-col items-center gap-1">
<img src="{src}" alt="{label}" class="w-full border border-slate-300">
<span class="text-xs text-slate-500">{label} · {w}×{h}</span>
<a href="{src}" download="{file}" class="text-xs underline">Download</a>
</div>"#,
        id = slot.to_string().to_lowercase(),
        file = slot.file_name(),
    ))
}

fn render_composite(o: &BridgeOrchestrator, c: &CompositeResult, enhanced: bool) -> Result<String> {
    let src = if enhanced {
        to_portable_encoding(&o.enhanced(c))?
    } else {
        c.encoded.clone()
    };

    let mut html = String::with_capacity(src.len() * 2 + 2048);
    html.push_str(r#"<div id="composite" class="flex flex-col items-center gap-2">"#);
    html.push_str(&format!(
        r#"<img src="{}" alt="Reconstructed composite" class="w-full border border-slate-300">"#,
        src
    ));

    // Alignment controls
    html.push_str(r#"<div class="flex items-center gap-2 text-sm">"#);
    for (dir, label) in [("left", "←"), ("up", "↑"), ("down", "↓"), ("right", "→")] {
        html.push_str(&format!(
            r##"<button class="px-2 py-1 border rounded" hx-post="/api/decrypt/offset" hx-vals='{{"nudge":"{}"}}' hx-target="#composite" hx-swap="outerHTML">{}</button>"##,
            dir, label
        ));
    }
    html.push_str(&format!(
        r#"<span id="offset">dx: {}, dy: {}</span>"#,
        c.offset.dx, c.offset.dy
    ));
    html.push_str(r##"<button class="px-2 py-1 border rounded" hx-post="/api/decrypt/offset" hx-vals='{"reset":"true"}' hx-target="#composite" hx-swap="outerHTML">Reset</button>"##);
    html.push_str("</div>");

    // Actions
    html.push_str(r#"<div class="flex items-center gap-2 text-sm">"#);
    html.push_str(&format!(
        r##"<button class="px-2 py-1 border rounded" hx-get="/api/decrypt/composite?enhanced={}" hx-target="#composite" hx-swap="outerHTML">{}</button>"##,
        !enhanced,
        if enhanced { "Show original" } else { "Enhance" }
    ));
    html.push_str(&format!(
        r#"<a href="{}" download="{}" class="underline">Download</a>"#,
        src, COMPOSITE_DOWNLOAD
    ));
    html.push_str(r##"<button class="px-2 py-1 bg-kip-red text-amber-50 rounded" hx-post="/api/decrypt/decode" hx-target="#decode-result" hx-swap="outerHTML">Decode</button>"##);
    html.push_str(r##"<button class="px-2 py-1 border rounded" hx-post="/api/decrypt/save" hx-vals='{"reason":"manual"}' hx-target="#decode-result" hx-swap="outerHTML">Save</button>"##);
    html.push_str("</div>");

    html.push_str(&format!(
        r#"<span class="text-xs text-slate-500">{}</span>"#,
        escape_html(&c.created_at)
    ));
    html.push_str(r#"<div id="decode-result"></div>"#);
    html.push_str("</div>");
    Ok(html)
}

fn composite_error(err: &PipelineError) -> String {
    format!(r#"<div id="composite">{}</div>"#, pipeline_error_fragment(err))
}

fn render_decoded(record: &HistoryRecord) -> String {
    let text = escape_html(&record.label);
    let body = if record.label.starts_with("https://") || record.label.starts_with("http://") {
        format!(r#"<a href="{0}" target="_blank" rel="noopener" class="underline">{0}</a>"#, text)
    } else {
        format!(r#"<span class="font-bold">{}</span>"#, text)
    };
    format!(
        r#"<div id="decode-result"><span class="text-emerald-600">Decoded:</span> {}</div>"#,
        body
    )
}

fn render_decode_failure(err: &PipelineError) -> String {
    format!(
        r##"<div id="decode-result">{}<button class="ml-2 px-2 py-1 border rounded" hx-post="/api/decrypt/save" hx-vals='{{"reason":"unrecognized"}}' hx-target="#decode-result" hx-swap="outerHTML">Save anyway</button></div>"##,
        pipeline_error_fragment(err)
    )
}
