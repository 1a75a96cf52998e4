//! Input adapters connecting media sources to the shared chain input.
//!
//! Every bound source gets exactly one [`InputAdapter`]. Adapters routed to
//! [`Route::Chain`] are summed into the chain's input bus; adapters that could
//! not join the chain's processing context are summed into a direct bus that
//! bypasses every DSP stage but is still audible.

use std::{collections::BTreeMap, fmt};

use serde::Serialize;

use crate::{
    audio::ContextId,
    source::{MediaEvent, SharedSource, SourceId},
    EngineError, StereoFrame,
};

/// Handle of one input adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AdapterId(u64);

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adapter#{}", self.0)
    }
}

/// Where an adapter's signal goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Route {
    /// Into the shared input gain stage of the signal chain.
    Chain,
    /// Straight to the destination, bypassing all processing.
    Direct,
}

pub struct InputAdapter {
    id: AdapterId,
    source: SharedSource,
    source_id: SourceId,
    context: Option<ContextId>,
    route: Route,
    gain: f32,
}

impl InputAdapter {
    pub fn id(&self) -> AdapterId {
        self.id
    }

    pub fn source(&self) -> &SharedSource {
        &self.source
    }

    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl fmt::Debug for InputAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputAdapter")
            .field("id", &self.id)
            .field("source_id", &self.source_id)
            .field("route", &self.route)
            .field("gain", &self.gain)
            .finish()
    }
}

/// Result of [`MultiSourceInputMixer::bind`].
#[derive(Debug)]
pub struct BindOutcome {
    pub adapter: AdapterId,
    /// Set when the source had to be routed around the chain. Only reported
    /// by the bind call that created the adapter.
    pub degradation: Option<EngineError>,
}

#[derive(Debug, Default)]
pub struct MultiSourceInputMixer {
    adapters: BTreeMap<AdapterId, InputAdapter>,
    next_id: u64,
    scratch: Vec<StereoFrame>,
}

impl MultiSourceInputMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `source` to the chain input owned by `context`.
    ///
    /// Binding a source that already has an adapter returns that adapter
    /// unchanged. `chain_available` is false while the engine runs without a
    /// signal chain, in which case every adapter is routed directly.
    pub fn bind(
        &mut self,
        source: &SharedSource,
        context: ContextId,
        chain_available: bool,
        gain: f32,
    ) -> BindOutcome {
        let source_id = source.borrow().id();
        if let Some(existing) = self.find(source_id) {
            return BindOutcome {
                adapter: existing.id,
                degradation: None,
            };
        }

        let claim = source.borrow_mut().claim_context(context);
        let (route, owner, degradation) = match claim {
            Ok(()) if chain_available => (Route::Chain, Some(context), None),
            Ok(()) => (Route::Direct, Some(context), None),
            Err(err) => {
                tracing::warn!(
                    source = %source_id,
                    error = %err,
                    "PartialDegradation: routing source directly to output"
                );
                (Route::Direct, None, Some(err))
            }
        };

        self.next_id += 1;
        let id = AdapterId(self.next_id);
        self.adapters.insert(
            id,
            InputAdapter {
                id,
                source: source.clone(),
                source_id,
                context: owner,
                route,
                gain: gain.max(0.0),
            },
        );
        tracing::debug!(adapter = %id, source = %source_id, ?route, "source bound");

        BindOutcome {
            adapter: id,
            degradation,
        }
    }

    /// Detaches an adapter and hands back its source. The source itself is
    /// left as it is. Unknown ids are ignored.
    pub fn unbind(&mut self, adapter: AdapterId) -> Option<SharedSource> {
        let removed = self.adapters.remove(&adapter)?;
        if let Some(context) = removed.context {
            removed.source.borrow_mut().release_context(context);
        }
        tracing::debug!(adapter = %adapter, source = %removed.source_id, "source unbound");
        Some(removed.source)
    }

    /// Detaches every adapter.
    pub fn unbind_all(&mut self) -> Vec<SharedSource> {
        let ids: Vec<_> = self.adapters.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.unbind(id)).collect()
    }

    pub fn adapter(&self, adapter: AdapterId) -> Option<&InputAdapter> {
        self.adapters.get(&adapter)
    }

    pub fn find(&self, source: SourceId) -> Option<&InputAdapter> {
        self.adapters
            .values()
            .find(|adapter| adapter.source_id == source)
    }

    pub fn set_gain(&mut self, adapter: AdapterId, gain: f32) {
        if let Some(adapter) = self.adapters.get_mut(&adapter) {
            adapter.gain = gain.max(0.0);
        }
    }

    pub fn gain(&self, adapter: AdapterId) -> Option<f32> {
        self.adapter(adapter).map(InputAdapter::gain)
    }

    /// Number of adapters connected to the chain input.
    pub fn connections(&self) -> usize {
        self.adapters
            .values()
            .filter(|adapter| adapter.route == Route::Chain)
            .count()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Pulls one block from every bound source. Chain-routed audio is summed
    /// into `chain_bus` and bypassed audio into `direct_bus`; both are
    /// overwritten and must have the same length.
    pub fn render(
        &mut self,
        chain_bus: &mut [StereoFrame],
        direct_bus: &mut [StereoFrame],
        sample_rate: u32,
    ) {
        chain_bus.fill(StereoFrame::SILENCE);
        direct_bus.fill(StereoFrame::SILENCE);

        let frames = chain_bus.len().min(direct_bus.len());
        if self.scratch.len() < frames {
            self.scratch.resize(frames, StereoFrame::SILENCE);
        }
        let scratch = &mut self.scratch[..frames];

        for adapter in self.adapters.values() {
            adapter.source.borrow_mut().read(scratch, sample_rate);
            let bus = match adapter.route {
                Route::Chain => &mut chain_bus[..frames],
                Route::Direct => &mut direct_bus[..frames],
            };
            for (out, frame) in bus.iter_mut().zip(scratch.iter()) {
                *out += *frame * adapter.gain;
            }
        }
    }

    /// Collects pending media events of every bound source, in adapter order.
    pub fn drain_events(&mut self) -> Vec<(SourceId, MediaEvent)> {
        self.adapters
            .values()
            .flat_map(|adapter| {
                adapter
                    .source
                    .borrow_mut()
                    .drain_events()
                    .into_iter()
                    .map(move |event| (adapter.source_id, event))
            })
            .collect()
    }
}
