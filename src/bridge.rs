//! Browser-session orchestrator.
//!
//! Uses `thread_local!` + `RefCell` for mutable access in single-threaded
//! WASM. The Web Worker keeps the module alive, so layers and history persist
//! across `handle_request` calls until the page goes away. History lives in a
//! `MemoryStore`; the host mirrors it to localStorage through the
//! `/api/history/export` and `/api/history/restore` routes.

use std::cell::RefCell;

use futures::FutureExt;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::history::{HistoryRecord, MemoryStore};
use crate::pipeline::{CompositeResult, NoDeadline, Orchestrator};
use crate::qr_decode::LocalQrDecoder;

pub type BridgeOrchestrator = Orchestrator<MemoryStore>;

thread_local! {
    static ORCHESTRATOR: RefCell<Option<BridgeOrchestrator>> = const { RefCell::new(None) };
}

fn build(config: PipelineConfig) -> Result<BridgeOrchestrator> {
    let decoder = LocalQrDecoder::new(config.blur_radius, config.threshold);
    Orchestrator::new(config, MemoryStore::new(), Box::new(decoder), Box::new(NoDeadline))
}

/// Run `f` against the session orchestrator, creating it with default
/// settings on first use.
pub fn with_orchestrator<F, R>(f: F) -> Result<R>
where
    F: FnOnce(&mut BridgeOrchestrator) -> Result<R>,
{
    ORCHESTRATOR.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            *slot = Some(build(PipelineConfig::default())?);
        }
        match slot.as_mut() {
            Some(o) => f(o),
            None => Err(PipelineError::InvalidConfig {
                reason: "session not initialized".to_string(),
            }),
        }
    })
}

/// Apply new settings. Layers and history are kept; the local decoder picks
/// up the new blur and threshold.
pub fn apply_config(config: PipelineConfig) -> Result<()> {
    with_orchestrator(|o| {
        o.set_config(config.clone())?;
        o.set_decoder(Box::new(LocalQrDecoder::new(config.blur_radius, config.threshold)));
        Ok(())
    })
}

/// Decode on the bridge. Local recognition finishes on its first poll; a
/// decoder that would have to wait is reported as unavailable.
pub fn decode_now(o: &BridgeOrchestrator, composite: &CompositeResult) -> Result<HistoryRecord> {
    o.decode(composite).now_or_never().unwrap_or_else(|| {
        Err(PipelineError::DecodeServiceUnavailable {
            reason: "decoder did not complete synchronously".to_string(),
        })
    })
}

/// Drop the session entirely (tests and full page resets).
pub fn reset_session() {
    ORCHESTRATOR.with(|cell| {
        *cell.borrow_mut() = None;
    });
}
