//! Reconstruction orchestrator.
//!
//! Sequences normalize → composite → decode → history for one user session.
//! Loads are awaited and joined before compositing; each load holds a
//! generation [`Ticket`] so results from superseded uploads are dropped.
//! All state sits in `RefCell`s and no borrow is held across an await.

pub mod decoder;
pub mod session;

pub use decoder::{Decoder, NoDeadline, Timer};
#[cfg(not(target_arch = "wasm32"))]
pub use decoder::ThreadTimer;
pub use session::{Session, ShareLayer, Slot, Ticket};

use std::cell::{Ref, RefCell, RefMut};
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use futures::future::{Either, select};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::history::{Category, HistoryRecord, HistoryStore, KeyValueStore, SaveReason, display_timestamp};
use crate::imaging::{
    AlignmentOffset, Nudge, PixelBuffer, composite, decode_data_url, enhance, normalize_upload,
    to_portable_encoding,
};

/// Raw file handed over by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Upload from a `data:` URL as produced by a file reader or the
    /// generation service.
    pub fn from_data_url(name: impl Into<String>, url: &str) -> Result<Self> {
        Ok(Self::new(name, decode_data_url(url)?))
    }
}

/// Blended layers plus their portable form. Derived deterministically from
/// the two layers and the offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeResult {
    pub buffer: PixelBuffer,
    pub encoded: String,
    pub created_at: String,
    pub offset: AlignmentOffset,
    /// The installed layers this composite was blended from, A then B.
    pub layers: [Rc<ShareLayer>; 2],
}

impl CompositeResult {
    /// First slot whose installed layer is no longer the one blended here.
    fn replaced_slot(&self, session: &Session) -> Option<Slot> {
        [Slot::A, Slot::B].into_iter().find(|&slot| {
            !session
                .layer(slot)
                .is_some_and(|current| Rc::ptr_eq(&current, &self.layers[slot.index()]))
        })
    }
}

pub struct Orchestrator<S: KeyValueStore> {
    config: PipelineConfig,
    session: RefCell<Session>,
    history: RefCell<HistoryStore<S>>,
    decoder: Box<dyn Decoder>,
    timer: Box<dyn Timer>,
}

impl<S: KeyValueStore> Orchestrator<S> {
    pub fn new(
        config: PipelineConfig,
        store: S,
        decoder: Box<dyn Decoder>,
        timer: Box<dyn Timer>,
    ) -> Result<Self> {
        config.validate()?;
        let history = HistoryStore::with_capacity(store, config.history_capacity);
        Ok(Self {
            config,
            session: RefCell::new(Session::new()),
            history: RefCell::new(history),
            decoder,
            timer,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Swap tuning values; the session is kept.
    pub fn set_config(&mut self, config: PipelineConfig) -> Result<()> {
        config.validate()?;
        self.history.get_mut().set_capacity(config.history_capacity);
        self.config = config;
        Ok(())
    }

    pub fn set_decoder(&mut self, decoder: Box<dyn Decoder>) {
        self.decoder = decoder;
    }

    pub fn session(&self) -> Ref<'_, Session> {
        self.session.borrow()
    }

    pub fn history(&self) -> Ref<'_, HistoryStore<S>> {
        self.history.borrow()
    }

    pub fn history_mut(&self) -> RefMut<'_, HistoryStore<S>> {
        self.history.borrow_mut()
    }

    /// Await `upload`, normalize it and install it in `slot`, unless a newer
    /// upload to the same slot started meanwhile (`Superseded`).
    pub async fn load_layer<F>(&self, slot: Slot, upload: F) -> Result<Rc<ShareLayer>>
    where
        F: Future<Output = Result<Upload>>,
    {
        let ticket = self.session.borrow_mut().begin(slot);
        let outcome = upload.await;
        if !self.session.borrow().is_current(ticket) {
            return Err(self.superseded(ticket.slot));
        }
        let upload = outcome?;
        let buffer = normalize_upload(&upload.bytes, self.config.canonical_width)?;
        self.install(ticket, ShareLayer::new(upload.name, buffer))
    }

    /// Install an already-decoded upload under a host-issued generation.
    /// Stale generations return `Ok(None)` and change nothing.
    pub fn accept_layer(&self, slot: Slot, generation: u64, upload: Upload) -> Result<Option<Rc<ShareLayer>>> {
        let Some(ticket) = self.session.borrow_mut().observe(slot, generation) else {
            return Ok(None);
        };
        let buffer = normalize_upload(&upload.bytes, self.config.canonical_width)?;
        match self.install(ticket, ShareLayer::new(upload.name, buffer)) {
            Ok(layer) => Ok(Some(layer)),
            Err(PipelineError::Superseded { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Load both files concurrently, join, then composite at `offset`.
    pub async fn run<FA, FB>(&self, file_a: FA, file_b: FB, offset: AlignmentOffset) -> Result<Rc<CompositeResult>>
    where
        FA: Future<Output = Result<Upload>>,
        FB: Future<Output = Result<Upload>>,
    {
        self.session.borrow_mut().set_offset(offset);
        let (a, b) = futures::try_join!(
            self.load_layer(Slot::A, file_a),
            self.load_layer(Slot::B, file_b)
        )?;

        // Either slot may have been re-uploaded while the other was loading.
        for (slot, layer) in [(Slot::A, &a), (Slot::B, &b)] {
            let current = self.session.borrow().layer(slot);
            if !current.is_some_and(|c| Rc::ptr_eq(&c, layer)) {
                return Err(self.superseded(slot));
            }
        }
        self.recomposite()
    }

    /// Blend the current layers at the current offset.
    pub fn recomposite(&self) -> Result<Rc<CompositeResult>> {
        let (a, b, offset) = {
            let s = self.session.borrow();
            let a = s.layer(Slot::A).ok_or(PipelineError::MissingLayer { slot: Slot::A })?;
            let b = s.layer(Slot::B).ok_or(PipelineError::MissingLayer { slot: Slot::B })?;
            (a, b, s.offset())
        };

        let buffer = composite(a.buffer(), b.buffer(), offset)?;
        let encoded = to_portable_encoding(&buffer)?;
        let result = Rc::new(CompositeResult {
            buffer,
            encoded,
            created_at: display_timestamp(),
            offset,
            layers: [a, b],
        });
        debug!(dx = offset.dx, dy = offset.dy, "composite rebuilt");
        self.session.borrow_mut().set_composite(Rc::clone(&result));
        Ok(result)
    }

    /// The current composite, rebuilt if the layers or offset changed.
    pub fn current_composite(&self) -> Result<Rc<CompositeResult>> {
        if let Some(c) = self.session.borrow().composite() {
            return Ok(c);
        }
        self.recomposite()
    }

    pub fn set_offset(&self, offset: AlignmentOffset) {
        self.session.borrow_mut().set_offset(offset);
    }

    pub fn nudge(&self, dir: Nudge) -> AlignmentOffset {
        let mut s = self.session.borrow_mut();
        let next = s.offset().nudged(dir);
        s.set_offset(next);
        next
    }

    /// Binarized view of a composite using the configured blur and threshold.
    pub fn enhanced(&self, composite: &CompositeResult) -> PixelBuffer {
        enhance(&composite.buffer, self.config.blur_radius, self.config.threshold)
    }

    /// Run the decoder on `composite`, bounded by the configured timeout.
    ///
    /// Success persists a decrypt record labeled with the text. Failure
    /// persists nothing; the composite stays usable for [`force_save`].
    ///
    /// [`force_save`]: Self::force_save
    pub async fn decode(&self, composite: &CompositeResult) -> Result<HistoryRecord> {
        let timeout = Duration::from_millis(self.config.decode_timeout_ms);
        let attempt = self.decoder.decode(&composite.buffer, &composite.encoded);
        let bound = self.timer.sleep(timeout);

        let outcome = match select(attempt, bound).await {
            Either::Left((res, _)) => res,
            Either::Right(_) => Err(PipelineError::DecodeServiceUnavailable {
                reason: format!("no response within {} ms", timeout.as_millis()),
            }),
        };

        let text = match outcome {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => return Err(self.decode_failed(PipelineError::NoPatternRecognized)),
            Err(e) => return Err(self.decode_failed(e)),
        };

        // Drop the answer if either layer was replaced while decoding. A newer
        // upload that failed validation replaced nothing.
        let replaced = composite.replaced_slot(&self.session.borrow());
        if let Some(slot) = replaced {
            return Err(self.superseded(slot));
        }

        info!(chars = text.chars().count(), "composite decoded");
        self.history
            .borrow_mut()
            .record(Category::Decrypt, text, composite.encoded.clone())
    }

    /// Persist a composite that was not (or could not be) decoded.
    pub fn force_save(&self, composite: &CompositeResult, reason: SaveReason) -> Result<HistoryRecord> {
        info!(label = reason.label(), "force-saving composite");
        self.history
            .borrow_mut()
            .record(Category::Decrypt, reason.label(), composite.encoded.clone())
    }

    /// Keep a generation-service result in the encrypt history.
    pub fn record_encryption(&self, text: &str, share_image: &str) -> Result<HistoryRecord> {
        self.history
            .borrow_mut()
            .record(Category::Encrypt, text, share_image)
    }

    /// Forget both layers; in-flight loads are discarded when they land.
    pub fn reset(&self) {
        self.session.borrow_mut().clear();
    }

    fn install(&self, ticket: Ticket, layer: ShareLayer) -> Result<Rc<ShareLayer>> {
        let layer = Rc::new(layer);
        if !self.session.borrow_mut().commit(ticket, Rc::clone(&layer)) {
            return Err(self.superseded(ticket.slot));
        }
        debug!(
            slot = %ticket.slot,
            generation = ticket.generation,
            width = layer.buffer().width(),
            height = layer.buffer().height(),
            "layer installed"
        );
        Ok(layer)
    }

    fn superseded(&self, slot: Slot) -> PipelineError {
        PipelineError::Superseded {
            slot,
            generation: self.session.borrow().generation(slot),
        }
    }

    fn decode_failed(&self, err: PipelineError) -> PipelineError {
        if err.is_decode_failure() {
            info!(error = %err, "decode failed; composite kept for manual save");
        } else {
            warn!(error = %err, "decoder returned an unexpected error");
        }
        err
    }
}
