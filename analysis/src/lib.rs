//! Acoustic fingerprint extraction.
//!
//! This library turns decoded PCM into a 25-dimensional descriptor of a
//! track's frequency balance, dynamics, temporal feel, spectral shape,
//! harmonic content, variation over time and stereo image. The descriptor
//! is the currency of the whole engine: it is what gets persisted, compared
//! and turned into mastering targets.

use std::ops::{Index, Range};

use serde::{Deserialize, Serialize};
use strum::{EnumCount, EnumIter, IntoEnumIterator, IntoStaticStr};

pub mod decoder;
pub mod errors;
pub mod frequency;
pub mod harmonic;
pub mod loudness;
pub mod spectrum;
pub mod stereo;
pub mod temporal;
pub mod timbral;
pub mod utils;
pub mod variation;

use decoder::DecodedAudio;
use errors::{AnalysisError, AnalysisResult};
use harmonic::HarmonicDesc;
use loudness::Bs1770Meter;
use spectrum::SpectrumDesc;
use stereo::StereoDesc;
use temporal::FluxDesc;
use utils::{mono_mix, sanitize};
use variation::VariationDesc;

/// The number of dimensions in a fingerprint.
pub const NUM_DIMENSIONS: usize = DimensionIndex::COUNT;

/// Version of the descriptor algorithm. Stored rows carrying an older
/// version are treated as present-but-stale and overwritten on the next
/// extraction pass.
pub const FINGERPRINT_VERSION: u32 = 1;

/// Tracks longer than this default to the sampling strategy.
pub const FULL_TRACK_MAX_SECS: f64 = 60.;

/// Length of one sampling analysis window.
pub const SAMPLE_WINDOW_SECS: f64 = 10.;

/// Default stride between sampling window starts.
pub const DEFAULT_SAMPLING_INTERVAL_SECS: f64 = 20.;

/// Indexes the dimensions of a [`Fingerprint`], in the canonical vector
/// order. The order is part of the persistence and similarity contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumCount, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum DimensionIndex {
    // Frequency balance (7)
    SubBassPct,
    BassPct,
    LowMidPct,
    MidPct,
    UpperMidPct,
    PresencePct,
    AirPct,
    // Dynamics (3)
    Lufs,
    CrestDb,
    BassMidRatio,
    // Temporal (4)
    TempoBpm,
    RhythmStability,
    TransientDensity,
    SilenceRatio,
    // Spectral shape (3)
    SpectralCentroid,
    SpectralRolloff,
    SpectralFlatness,
    // Harmonic content (3)
    HarmonicRatio,
    PitchStability,
    ChromaEnergy,
    // Variation over time (3)
    DynamicRangeVariation,
    LoudnessVariationStd,
    PeakConsistency,
    // Stereo image (2)
    StereoWidth,
    PhaseCorrelation,
}

/// The snake_case names of all 25 dimensions in canonical order.
#[must_use]
pub fn dimension_names() -> [&'static str; NUM_DIMENSIONS] {
    let mut names = [""; NUM_DIMENSIONS];
    for (slot, index) in names.iter_mut().zip(DimensionIndex::iter()) {
        *slot = index.into();
    }
    names
}

/// The 25-dimensional acoustic descriptor of a track.
///
/// Every field is required; a serialized fingerprint with a missing
/// dimension fails deserialization rather than defaulting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    // Frequency balance: percentages of total in-band energy, sum ~100.
    pub sub_bass_pct: f64,
    pub bass_pct: f64,
    pub low_mid_pct: f64,
    pub mid_pct: f64,
    pub upper_mid_pct: f64,
    pub presence_pct: f64,
    pub air_pct: f64,
    // Dynamics
    pub lufs: f64,
    pub crest_db: f64,
    pub bass_mid_ratio: f64,
    // Temporal
    pub tempo_bpm: f64,
    pub rhythm_stability: f64,
    pub transient_density: f64,
    pub silence_ratio: f64,
    // Spectral shape
    pub spectral_centroid: f64,
    pub spectral_rolloff: f64,
    pub spectral_flatness: f64,
    // Harmonic content
    pub harmonic_ratio: f64,
    pub pitch_stability: f64,
    pub chroma_energy: f64,
    // Variation over time
    pub dynamic_range_variation: f64,
    pub loudness_variation_std: f64,
    pub peak_consistency: f64,
    // Stereo image
    pub stereo_width: f64,
    pub phase_correlation: f64,
}

impl Fingerprint {
    /// The canonical vector form consumed by normalization and distance.
    #[must_use]
    pub const fn to_vector(&self) -> [f64; NUM_DIMENSIONS] {
        [
            self.sub_bass_pct,
            self.bass_pct,
            self.low_mid_pct,
            self.mid_pct,
            self.upper_mid_pct,
            self.presence_pct,
            self.air_pct,
            self.lufs,
            self.crest_db,
            self.bass_mid_ratio,
            self.tempo_bpm,
            self.rhythm_stability,
            self.transient_density,
            self.silence_ratio,
            self.spectral_centroid,
            self.spectral_rolloff,
            self.spectral_flatness,
            self.harmonic_ratio,
            self.pitch_stability,
            self.chroma_energy,
            self.dynamic_range_variation,
            self.loudness_variation_std,
            self.peak_consistency,
            self.stereo_width,
            self.phase_correlation,
        ]
    }

    /// Rebuild a fingerprint from its canonical vector.
    #[must_use]
    pub const fn from_vector(v: [f64; NUM_DIMENSIONS]) -> Self {
        Self {
            sub_bass_pct: v[0],
            bass_pct: v[1],
            low_mid_pct: v[2],
            mid_pct: v[3],
            upper_mid_pct: v[4],
            presence_pct: v[5],
            air_pct: v[6],
            lufs: v[7],
            crest_db: v[8],
            bass_mid_ratio: v[9],
            tempo_bpm: v[10],
            rhythm_stability: v[11],
            transient_density: v[12],
            silence_ratio: v[13],
            spectral_centroid: v[14],
            spectral_rolloff: v[15],
            spectral_flatness: v[16],
            harmonic_ratio: v[17],
            pitch_stability: v[18],
            chroma_energy: v[19],
            dynamic_range_variation: v[20],
            loudness_variation_std: v[21],
            peak_consistency: v[22],
            stereo_width: v[23],
            phase_correlation: v[24],
        }
    }

    /// Build a fingerprint from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidFeaturesLen`] unless the slice holds
    /// exactly [`NUM_DIMENSIONS`] values.
    pub fn from_slice(values: &[f64]) -> AnalysisResult<Self> {
        let array: [f64; NUM_DIMENSIONS] = values
            .try_into()
            .map_err(|_| AnalysisError::InvalidFeaturesLen)?;
        Ok(Self::from_vector(array))
    }

    /// The seven frequency-band percentages in band order.
    #[must_use]
    pub const fn frequency_percentages(&self) -> [f64; frequency::NUM_BANDS] {
        [
            self.sub_bass_pct,
            self.bass_pct,
            self.low_mid_pct,
            self.mid_pct,
            self.upper_mid_pct,
            self.presence_pct,
            self.air_pct,
        ]
    }

    /// True when all 25 dimensions are finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|v| v.is_finite())
    }
}

impl Index<DimensionIndex> for Fingerprint {
    type Output = f64;

    fn index(&self, index: DimensionIndex) -> &f64 {
        match index {
            DimensionIndex::SubBassPct => &self.sub_bass_pct,
            DimensionIndex::BassPct => &self.bass_pct,
            DimensionIndex::LowMidPct => &self.low_mid_pct,
            DimensionIndex::MidPct => &self.mid_pct,
            DimensionIndex::UpperMidPct => &self.upper_mid_pct,
            DimensionIndex::PresencePct => &self.presence_pct,
            DimensionIndex::AirPct => &self.air_pct,
            DimensionIndex::Lufs => &self.lufs,
            DimensionIndex::CrestDb => &self.crest_db,
            DimensionIndex::BassMidRatio => &self.bass_mid_ratio,
            DimensionIndex::TempoBpm => &self.tempo_bpm,
            DimensionIndex::RhythmStability => &self.rhythm_stability,
            DimensionIndex::TransientDensity => &self.transient_density,
            DimensionIndex::SilenceRatio => &self.silence_ratio,
            DimensionIndex::SpectralCentroid => &self.spectral_centroid,
            DimensionIndex::SpectralRolloff => &self.spectral_rolloff,
            DimensionIndex::SpectralFlatness => &self.spectral_flatness,
            DimensionIndex::HarmonicRatio => &self.harmonic_ratio,
            DimensionIndex::PitchStability => &self.pitch_stability,
            DimensionIndex::ChromaEnergy => &self.chroma_energy,
            DimensionIndex::DynamicRangeVariation => &self.dynamic_range_variation,
            DimensionIndex::LoudnessVariationStd => &self.loudness_variation_std,
            DimensionIndex::PeakConsistency => &self.peak_consistency,
            DimensionIndex::StereoWidth => &self.stereo_width,
            DimensionIndex::PhaseCorrelation => &self.phase_correlation,
        }
    }
}

/// How much of the track the analyzer looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnalysisStrategy {
    /// Analyze the entire track in one pass.
    FullTrack,
    /// Fixed-length windows placed at a fixed stride across the track.
    /// Deterministic, and bounds compute at ~O(duration / interval).
    Sampling { interval_secs: f64 },
}

impl Default for AnalysisStrategy {
    fn default() -> Self {
        Self::Sampling {
            interval_secs: DEFAULT_SAMPLING_INTERVAL_SECS,
        }
    }
}

/// Computes a [`Fingerprint`] from decoded PCM.
#[derive(Debug, Clone, Default)]
pub struct FingerprintAnalyzer {
    strategy: AnalysisStrategy,
}

/// Per-window results for the descriptor groups that run inside the rayon
/// join.
struct WindowFeatures {
    band_energies: [f64; frequency::NUM_BANDS],
    centroid: f64,
    rolloff: f64,
    flatness: f64,
    chroma: [f64; 12],
    spectrum_energy: f64,
    lufs: f64,
    tempo_estimates: Vec<f64>,
    onsets: usize,
    silent_ratio: f64,
    rms: f64,
    peak: f64,
    frames: usize,
}

impl FingerprintAnalyzer {
    #[must_use]
    pub const fn new(strategy: AnalysisStrategy) -> Self {
        Self { strategy }
    }

    /// Analyze decoded PCM into a validated fingerprint.
    ///
    /// This is meant to run inside a worker thread; independent descriptor
    /// groups of each window are parallelized with rayon.
    ///
    /// # Errors
    ///
    /// Fails when the input is empty or shorter than one spectral frame, or
    /// when a non-finite value survives sanitization.
    pub fn analyze(&self, audio: &DecodedAudio) -> AnalysisResult<Fingerprint> {
        let channels = usize::from(audio.channels.max(1));
        let total_frames = audio.samples.len() / channels;
        if total_frames < SpectrumDesc::WINDOW_SIZE {
            return Err(AnalysisError::EmptySamples);
        }

        let windows = analysis_windows(
            total_frames,
            audio.sample_rate,
            self.strategy,
        );

        // Cheap accumulators run sequentially across windows; the heavy
        // groups run inside the per-window rayon join.
        let mut stereo_desc = StereoDesc::new();
        let mut variation_desc = VariationDesc::new();
        let mut harmonic_desc = HarmonicDesc::new();
        let mut features: Vec<WindowFeatures> = Vec::with_capacity(windows.len());

        for window in &windows {
            let interleaved = &audio.samples[window.start * channels..window.end * channels];
            let mono = mono_mix(interleaved, channels);

            if channels >= 2 {
                stereo_desc.do_(interleaved);
            }
            variation_desc.process_all(&mono, audio.sample_rate);

            let (spectral, (loudness, (temporal, window_harmonics))) = rayon::join(
                || {
                    let mut desc = SpectrumDesc::new(audio.sample_rate);
                    desc.process_all(&mono);
                    let spectrum = desc.get_value();
                    (
                        frequency::band_energies(&spectrum),
                        timbral::spectral_centroid(&spectrum),
                        timbral::spectral_rolloff(&spectrum),
                        timbral::spectral_flatness(&spectrum),
                        harmonic::chroma_distribution(&spectrum),
                        spectrum.total_energy(),
                    )
                },
                || {
                    rayon::join(
                        || {
                            Bs1770Meter::new(audio.sample_rate, audio.channels)
                                .integrated_loudness(interleaved)
                        },
                        || {
                            rayon::join(
                                || analyze_tempo_window(&mono, audio.sample_rate),
                                || analyze_harmonics_window(&mono, audio.sample_rate),
                            )
                        },
                    )
                },
            );
            let (band_energies, centroid, rolloff, flatness, chroma, spectrum_energy) = spectral;
            let (tempo_estimates, onsets, silent_ratio) = temporal;

            harmonic_desc.merge(window_harmonics);
            features.push(WindowFeatures {
                band_energies,
                centroid,
                rolloff,
                flatness,
                chroma,
                spectrum_energy,
                lufs: loudness,
                tempo_estimates,
                onsets,
                silent_ratio,
                rms: utils::rms(&mono),
                peak: utils::peak(&mono),
                frames: window.len(),
            });
        }

        let fingerprint = self.aggregate(
            &features,
            &stereo_desc,
            &variation_desc,
            &harmonic_desc,
            audio,
        );

        if !fingerprint.is_finite() {
            return Err(AnalysisError::InvalidSamples);
        }
        Ok(fingerprint)
    }

    #[allow(clippy::cast_precision_loss)]
    fn aggregate(
        &self,
        features: &[WindowFeatures],
        stereo_desc: &StereoDesc,
        variation_desc: &VariationDesc,
        harmonic_desc: &HarmonicDesc,
        audio: &DecodedAudio,
    ) -> Fingerprint {
        let total_weight: f64 = features.iter().map(|f| f.frames as f64).sum();
        let weight_of = |f: &WindowFeatures| f.frames as f64 / total_weight;

        // Frequency balance: length-weighted band energies, then percentages.
        let mut band_energies = [0.; frequency::NUM_BANDS];
        for f in features {
            let w = weight_of(f);
            for (acc, &e) in band_energies.iter_mut().zip(&f.band_energies) {
                *acc += e * w;
            }
        }
        let percentages = frequency::band_percentages(&band_energies);
        let bass_mid_ratio = frequency::bass_mid_ratio(&band_energies);

        // LUFS: combine windows in the energy domain, length-weighted.
        let mean_square: f64 = features
            .iter()
            .map(|f| weight_of(f) * 10f64.powf((f.lufs + 0.691) / 10.))
            .sum();
        let lufs = if mean_square > 0. {
            (-0.691 + 10. * mean_square.log10())
                .clamp(loudness::SILENCE_LUFS, 0.)
        } else {
            loudness::SILENCE_LUFS
        };

        // Crest over the whole analyzed region.
        let peak = features.iter().map(|f| f.peak).fold(0., f64::max);
        let rms = features
            .iter()
            .map(|f| weight_of(f) * f.rms * f.rms)
            .sum::<f64>()
            .sqrt();
        let crest_db = loudness::crest_factor_db(peak, rms);

        // Tempo: length-weighted mean of the confident per-segment
        // estimates; 0 when nothing was confident anywhere.
        let confident: Vec<f64> = features
            .iter()
            .flat_map(|f| f.tempo_estimates.iter().copied())
            .filter(|&t| t > 0.)
            .collect();
        let tempo_bpm = if confident.is_empty() {
            0.
        } else {
            confident.iter().sum::<f64>() / confident.len() as f64
        };
        let rhythm_stability = if confident.len() < 2 {
            0.5
        } else {
            (1. - utils::coefficient_of_variation(&confident)).clamp(0., 1.)
        };

        let analyzed_secs = total_weight / f64::from(audio.sample_rate);
        let total_onsets: usize = features.iter().map(|f| f.onsets).sum();
        let transient_density = if analyzed_secs > 0. {
            sanitize(total_onsets as f64 / analyzed_secs).max(0.)
        } else {
            0.
        };

        let silence_ratio = features
            .iter()
            .map(|f| weight_of(f) * f.silent_ratio)
            .sum::<f64>()
            .clamp(0., 1.);

        // Spectral shape: arithmetic (length-weighted) means.
        let spectral_centroid = features
            .iter()
            .map(|f| weight_of(f) * f.centroid)
            .sum::<f64>()
            .clamp(0., 1.);
        let spectral_rolloff = features
            .iter()
            .map(|f| weight_of(f) * f.rolloff)
            .sum::<f64>()
            .clamp(0., 1.);
        let spectral_flatness = features
            .iter()
            .map(|f| weight_of(f) * f.flatness)
            .sum::<f64>()
            .clamp(0., 1.);

        // Harmonics: evidence was merged across windows; chroma is
        // energy-weighted so loud windows dominate quiet ones.
        let (harmonic_ratio, pitch_stability) = harmonic_desc.get_value();
        let mut chroma = [0.; 12];
        for f in features {
            for (acc, &c) in chroma.iter_mut().zip(&f.chroma) {
                *acc += c * f.spectrum_energy;
            }
        }
        let chroma_total: f64 = chroma.iter().sum();
        if chroma_total > 1e-18 {
            for bin in &mut chroma {
                *bin /= chroma_total;
            }
        }
        let chroma_energy = harmonic::chroma_energy(&chroma);

        let (dynamic_range_variation, loudness_variation_std, peak_consistency) =
            variation_desc.get_value();

        let (stereo_width, phase_correlation) = if audio.channels >= 2 {
            stereo_desc.get_value()
        } else {
            stereo::mono_value()
        };

        Fingerprint {
            sub_bass_pct: percentages[0],
            bass_pct: percentages[1],
            low_mid_pct: percentages[2],
            mid_pct: percentages[3],
            upper_mid_pct: percentages[4],
            presence_pct: percentages[5],
            air_pct: percentages[6],
            lufs: sanitize(lufs),
            crest_db: sanitize(crest_db),
            bass_mid_ratio: sanitize(bass_mid_ratio),
            tempo_bpm: sanitize(tempo_bpm),
            rhythm_stability: sanitize(rhythm_stability),
            transient_density: sanitize(transient_density),
            silence_ratio: sanitize(silence_ratio),
            spectral_centroid: sanitize(spectral_centroid),
            spectral_rolloff: sanitize(spectral_rolloff),
            spectral_flatness: sanitize(spectral_flatness),
            harmonic_ratio: sanitize(harmonic_ratio),
            pitch_stability: sanitize(pitch_stability),
            chroma_energy: sanitize(chroma_energy),
            dynamic_range_variation: sanitize(dynamic_range_variation),
            loudness_variation_std: sanitize(loudness_variation_std),
            peak_consistency: sanitize(peak_consistency),
            stereo_width: sanitize(stereo_width),
            phase_correlation: sanitize(phase_correlation),
        }
    }
}

/// Frame ranges the analyzer will look at.
///
/// Short tracks (or the full-track strategy) yield one window covering
/// everything; longer tracks yield [`SAMPLE_WINDOW_SECS`] windows starting
/// every `interval_secs`.
fn analysis_windows(
    total_frames: usize,
    sample_rate: u32,
    strategy: AnalysisStrategy,
) -> Vec<Range<usize>> {
    let duration_secs = total_frames as f64 / f64::from(sample_rate);

    let interval_secs = match strategy {
        AnalysisStrategy::FullTrack => return vec![0..total_frames],
        AnalysisStrategy::Sampling { interval_secs } => interval_secs,
    };
    if duration_secs <= FULL_TRACK_MAX_SECS {
        return vec![0..total_frames];
    }

    let window_len = (SAMPLE_WINDOW_SECS * f64::from(sample_rate)) as usize;
    let stride = ((interval_secs * f64::from(sample_rate)) as usize).max(window_len);

    let mut windows = Vec::new();
    let mut start = 0;
    while start < total_frames {
        let end = (start + window_len).min(total_frames);
        if end - start >= SpectrumDesc::WINDOW_SIZE {
            windows.push(start..end);
        }
        start += stride;
    }
    if windows.is_empty() {
        windows.push(0..total_frames);
    }
    windows
}

/// Tempo estimates (one per ~10 s segment), onset count and silence ratio
/// for one analysis window.
fn analyze_tempo_window(mono: &[f32], sample_rate: u32) -> (Vec<f64>, usize, f64) {
    let mut flux_desc = FluxDesc::new();
    flux_desc.process_all(mono);
    let flux = flux_desc.get_value();

    let frames_per_segment =
        ((SAMPLE_WINDOW_SECS * f64::from(sample_rate)) as usize / FluxDesc::HOP_SIZE).max(8);
    let mut estimates = Vec::new();
    for segment in flux.chunks(frames_per_segment) {
        // Segments shorter than ~4 s cannot resolve a 40 BPM period.
        if segment.len() * 2 >= frames_per_segment {
            estimates.push(temporal::estimate_tempo(segment, sample_rate));
        }
    }
    if estimates.is_empty() && !flux.is_empty() {
        estimates.push(temporal::estimate_tempo(&flux, sample_rate));
    }

    let onsets = temporal::count_onsets(&flux, sample_rate);
    let silent_ratio = temporal::silence_ratio(mono, sample_rate);
    (estimates, onsets, silent_ratio)
}

/// Autocorrelation pitch evidence for one window, with the frame hop chosen
/// so the per-window cost stays bounded.
fn analyze_harmonics_window(mono: &[f32], sample_rate: u32) -> HarmonicDesc {
    const MAX_FRAMES_PER_WINDOW: usize = 64;

    let mut desc = HarmonicDesc::new();
    if mono.len() < harmonic::FRAME_SIZE {
        return desc;
    }
    let hop = (mono.len() / MAX_FRAMES_PER_WINDOW).max(harmonic::FRAME_SIZE);
    for frame in mono.windows(harmonic::FRAME_SIZE).step_by(hop) {
        desc.do_(frame, sample_rate);
    }
    desc
}
