use std::{
    cell::Cell,
    f32::consts::PI,
    fmt,
    ops::Range,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    sync::Arc,
};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{config::AnalysisConfig, EngineError, Result, StereoFrame};

const BASS_SPLIT: f32 = 0.15;
const MID_SPLIT: f32 = 0.5;

/// Band energies and derived features for one display tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSample {
    pub bass: f32,
    pub mids: f32,
    pub highs: f32,
    /// Mean of the three band energies.
    pub energy: f32,
    /// Approximate tempo in beats per minute. This is a heuristic derived from
    /// energy, not a beat tracker.
    pub tempo: f32,
}

/// Partition of `len` frequency bins into bass, mids and highs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandSplit {
    len: usize,
    bass_end: usize,
    mid_end: usize,
}

impl BandSplit {
    /// Splits at 15% and 50% of the bin count. Every band gets at least one
    /// bin, so at least three bins are required.
    pub fn new(len: usize) -> Result<Self> {
        if len < 3 {
            return Err(EngineError::InvalidInput(
                "band split requires at least three bins",
            ));
        }

        let bass_end = ((len as f32 * BASS_SPLIT) as usize).max(1);
        let mid_end = ((len as f32 * MID_SPLIT) as usize).clamp(bass_end + 1, len - 1);
        Ok(Self {
            len,
            bass_end,
            mid_end,
        })
    }

    pub fn bass(&self) -> Range<usize> {
        0..self.bass_end
    }

    pub fn mids(&self) -> Range<usize> {
        self.bass_end..self.mid_end
    }

    pub fn highs(&self) -> Range<usize> {
        self.mid_end..self.len
    }
}

/// Ring buffer capturing the most recent output of the signal chain.
#[derive(Debug, Clone)]
pub struct AnalysisTap {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl AnalysisTap {
    pub fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            write_pos: 0,
        }
    }

    pub fn capture(&mut self, frames: &[StereoFrame]) {
        let len = self.buffer.len();
        for frame in frames {
            self.buffer[self.write_pos] = frame.mid();
            self.write_pos = (self.write_pos + 1) % len;
        }
    }

    /// Copies the captured window into `out`, oldest sample first.
    pub fn snapshot(&self, out: &mut [f32]) {
        let len = self.buffer.len();
        for (index, slot) in out.iter_mut().enumerate().take(len) {
            *slot = self.buffer[(self.write_pos + index) % len];
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

type Callback = Box<dyn FnMut(&AnalysisSample)>;

struct Subscriber {
    callback: Callback,
    active: Rc<Cell<bool>>,
}

/// Handle returned by [`SpectrumAnalyzer::subscribe`].
#[derive(Debug, Clone)]
pub struct Subscription {
    active: Rc<Cell<bool>>,
}

impl Subscription {
    /// Stops delivery to the associated callback. Safe to call repeatedly and
    /// from inside a callback.
    pub fn unsubscribe(&self) {
        self.active.set(false);
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }
}

/// Spectrum analysis over the chain's analysis tap.
pub struct SpectrumAnalyzer {
    config: AnalysisConfig,
    split: BandSplit,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    smoothed: Vec<f32>,
    bins: Vec<f32>,
    latest: AnalysisSample,
    subscribers: Vec<Subscriber>,
}

impl SpectrumAnalyzer {
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        let fft_size = config.fft_size;
        if fft_size < 8 || !fft_size.is_power_of_two() {
            return Err(EngineError::InvalidInput(
                "fft size must be a power of two of at least 8",
            ));
        }

        let bin_count = fft_size / 2;
        let split = BandSplit::new(bin_count)?;
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(fft_size);

        Ok(Self {
            config: config.clone(),
            split,
            window: (0..fft_size).map(|i| hann_value(i, fft_size)).collect(),
            input: fft.make_input_vec(),
            spectrum: fft.make_output_vec(),
            scratch: fft.make_scratch_vec(),
            fft,
            smoothed: vec![0.0; bin_count],
            bins: vec![0.0; bin_count],
            latest: AnalysisSample::default(),
            subscribers: Vec::new(),
        })
    }

    pub fn fft_size(&self) -> usize {
        self.config.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    pub fn band_split(&self) -> BandSplit {
        self.split
    }

    /// Normalised (0..1) bin magnitudes from the last tick.
    pub fn bins(&self) -> &[f32] {
        &self.bins
    }

    /// Last sample produced.
    pub fn latest(&self) -> AnalysisSample {
        self.latest
    }

    /// Computes one sample from the tap. Without a tap the sample is zeroed.
    pub fn tick(&mut self, tap: Option<&AnalysisTap>) -> Result<AnalysisSample> {
        let Some(tap) = tap else {
            self.latest = AnalysisSample::default();
            return Ok(self.latest);
        };

        self.update_bins(tap)?;
        self.latest = self.summarise();
        Ok(self.latest)
    }

    fn update_bins(&mut self, tap: &AnalysisTap) -> Result<()> {
        self.input.fill(0.0);
        tap.snapshot(&mut self.input);
        for (sample, weight) in self.input.iter_mut().zip(&self.window) {
            *sample *= weight;
        }

        self.fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;

        let scale = (self.config.fft_size as f32).recip();
        let smoothing = self.config.smoothing.clamp(0.0, 1.0);
        let floor = self.config.min_decibels;
        let range = (self.config.max_decibels - floor).max(f32::EPSILON);

        for ((smoothed, bin), value) in self
            .smoothed
            .iter_mut()
            .zip(self.bins.iter_mut())
            .zip(&self.spectrum)
        {
            let magnitude = value.norm() * scale;
            *smoothed = smoothing * *smoothed + (1.0 - smoothing) * magnitude;
            let db = if *smoothed > 0.0 {
                20.0 * smoothed.log10()
            } else {
                f32::NEG_INFINITY
            };
            *bin = ((db - floor) / range).clamp(0.0, 1.0);
        }

        Ok(())
    }

    fn summarise(&self) -> AnalysisSample {
        let mean = |range: Range<usize>| {
            let len = range.len().max(1) as f32;
            self.bins[range].iter().sum::<f32>() / len
        };

        let bass = mean(self.split.bass());
        let mids = mean(self.split.mids());
        let highs = mean(self.split.highs());
        let energy = (bass + mids + highs) / 3.0;

        AnalysisSample {
            bass,
            mids,
            highs,
            energy,
            tempo: self.config.tempo_base + energy * self.config.tempo_span,
        }
    }

    /// Registers a callback that receives every published sample.
    pub fn subscribe(&mut self, callback: impl FnMut(&AnalysisSample) + 'static) -> Subscription {
        let active = Rc::new(Cell::new(true));
        self.subscribers.push(Subscriber {
            callback: Box::new(callback),
            active: active.clone(),
        });
        Subscription { active }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|subscriber| subscriber.active.get())
            .count()
    }

    /// Delivers `sample` to every active subscriber. A panicking callback is
    /// logged and skipped; the remaining subscribers still receive the sample.
    pub fn publish(&mut self, sample: &AnalysisSample) {
        self.subscribers.retain(|subscriber| subscriber.active.get());

        for (index, subscriber) in self.subscribers.iter_mut().enumerate() {
            if !subscriber.active.get() {
                continue;
            }
            let callback = &mut subscriber.callback;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(sample))) {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(subscriber = index, %reason, "analysis subscriber failed");
            }
        }
    }

    pub fn clear_subscribers(&mut self) {
        for subscriber in self.subscribers.drain(..) {
            subscriber.active.set(false);
        }
    }

    /// Drops smoothing history.
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
        self.bins.fill(0.0);
        self.latest = AnalysisSample::default();
    }
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("fft_size", &self.config.fft_size)
            .field("split", &self.split)
            .field("latest", &self.latest)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
