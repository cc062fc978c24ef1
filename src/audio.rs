use std::{collections::VecDeque, f64::consts::PI, path::Path};

use hound::SampleFormat;
use rustfft::{FftPlanner, num_complex::Complex};
use tracing::{debug, info};

use crate::config::{Config, PeakMode};
use crate::error::DecodeError;

/// A spectrogram cell selected as a fingerprinting anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peak {
    pub freq: usize,
    pub time: usize,
}

/// A local maximum that has not yet been checked against the amplitude floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakCandidate {
    pub peak: Peak,
    pub magnitude: f64,
}

/// One-sided power spectrogram, stored time-major: `frames[t][f]`.
#[derive(Debug, Clone, Default)]
pub struct Spectrogram {
    frames: Vec<Vec<f64>>,
    freq_bins: usize,
}

impl Spectrogram {
    pub fn frames(&self) -> &[Vec<f64>] {
        &self.frames
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn freq_bins(&self) -> usize {
        self.freq_bins
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() || self.freq_bins == 0
    }
}

/// Reads a WAV file into a mono waveform at `target_sample_rate`.
///
/// Integer and float encodings are normalized to [-1, 1]; channels are
/// averaged.
pub fn load_and_prepare_audio(
    filepath: impl AsRef<Path>,
    target_sample_rate: u32,
) -> Result<Vec<f32>, DecodeError> {
    let filepath = filepath.as_ref();
    let mut reader = hound::WavReader::open(filepath)?;
    let spec = reader.spec();

    debug!(
        path = %filepath.display(),
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        bits = spec.bits_per_sample,
        format = ?spec.sample_format,
        samples = reader.len(),
        "decoding WAV"
    );

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
            let scale = (1i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
        (SampleFormat::Float, bits) => {
            return Err(DecodeError::UnsupportedFormat {
                bits,
                format: "float",
            });
        }
        (SampleFormat::Int, bits) => {
            return Err(DecodeError::UnsupportedFormat { bits, format: "int" });
        }
    };

    let channels = spec.channels.max(1) as usize;
    let mono: Vec<f32> = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    if mono.is_empty() {
        return Err(DecodeError::Empty);
    }

    let samples = resample(&mono, spec.sample_rate, target_sample_rate);
    info!(
        path = %filepath.display(),
        samples = samples.len(),
        sample_rate = target_sample_rate,
        "audio loaded"
    );
    Ok(samples)
}

/// Linear-interpolation resampling.
pub fn resample(samples: &[f32], original_sample_rate: u32, target_sample_rate: u32) -> Vec<f32> {
    if original_sample_rate == target_sample_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = original_sample_rate as f64 / target_sample_rate as f64;
    let out_len = (samples.len() as f64 / ratio).floor() as usize;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx];
            let b = samples.get(idx + 1).copied().unwrap_or(a);
            a + (b - a) * frac
        })
        .collect()
}

pub fn hamming_window(window_size: usize) -> Vec<f64> {
    if window_size == 1 {
        return vec![1.0];
    }
    (0..window_size)
        .map(|n| {
            // 0.54 - 0.46 * cos(2 * pi * n / (N - 1))
            let value = 2.0 * PI * (n as f64) / (window_size as f64 - 1.0);
            0.54 - 0.46 * value.cos()
        })
        .collect()
}

/// Short-time power spectral density of `samples`.
///
/// Each frame takes `n_perseg` samples, removes their mean, applies a Hamming
/// window and zero-pads to `n_fft`. Frames advance by `hop_size()`.
pub fn compute_spectrogram(samples: &[f32], config: &Config) -> Spectrogram {
    let window_size = config.n_perseg;
    let n_fft = config.n_fft;
    let freq_bins = config.freq_bins();

    if samples.len() < window_size {
        return Spectrogram {
            frames: Vec::new(),
            freq_bins,
        };
    }

    let window = hamming_window(window_size);
    let window_power: f64 = window.iter().map(|w| w * w).sum();
    let scale = 1.0 / (config.sample_rate as f64 * window_power);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n_fft);
    let mut buffer = vec![Complex::new(0.0, 0.0); n_fft];

    let mut frames = Vec::with_capacity((samples.len() - window_size) / config.hop_size() + 1);

    for chunk in samples.windows(window_size).step_by(config.hop_size()) {
        let mean = chunk.iter().map(|&s| s as f64).sum::<f64>() / window_size as f64;

        buffer.fill(Complex::new(0.0, 0.0));
        for (slot, (&sample, &coeff)) in buffer.iter_mut().zip(chunk.iter().zip(window.iter())) {
            *slot = Complex::new((sample as f64 - mean) * coeff, 0.0);
        }

        fft.process(&mut buffer);

        let magnitudes: Vec<f64> = buffer[..freq_bins]
            .iter()
            .enumerate()
            .map(|(bin, c)| {
                let power = c.norm_sqr() * scale;
                // one-sided: fold the negative frequencies in, except DC and Nyquist
                let is_nyquist = n_fft % 2 == 0 && bin == n_fft / 2;
                if bin == 0 || is_nyquist { power } else { 2.0 * power }
            })
            .collect();
        frames.push(magnitudes);
    }

    debug!(frames = frames.len(), freq_bins, "spectrogram computed");
    Spectrogram { frames, freq_bins }
}

/// Half-width, in cells, of the peak neighborhood along each compared axis.
pub fn neighborhood_radius(fraction: f64, freq_bins: usize) -> usize {
    ((fraction * freq_bins as f64).round() as usize).max(1)
}

/// Sliding-window maximum over `[i - radius, i + radius]`, clipped to bounds.
fn sliding_max(values: &[f64], radius: usize, out: &mut [f64]) {
    let n = values.len();
    let mut window: VecDeque<usize> = VecDeque::with_capacity(2 * radius + 1);
    let mut next = 0;

    for i in 0..n {
        let hi = (i + radius).min(n - 1);
        while next <= hi {
            while window.back().is_some_and(|&back| values[back] <= values[next]) {
                window.pop_back();
            }
            window.push_back(next);
            next += 1;
        }
        let lo = i.saturating_sub(radius);
        while window.front().is_some_and(|&front| front < lo) {
            window.pop_front();
        }
        out[i] = values[window[0]];
    }
}

/// Cells that are at least as large as every neighbor along the axes chosen by
/// `mode`, in frequency-major then time order.
pub fn local_maxima(spectrogram: &Spectrogram, fraction: f64, mode: PeakMode) -> Vec<PeakCandidate> {
    if spectrogram.is_empty() {
        return Vec::new();
    }

    let freq_bins = spectrogram.freq_bins;
    let num_frames = spectrogram.num_frames();
    let radius = neighborhood_radius(fraction, freq_bins);

    let mut maxed = spectrogram.frames.clone();

    if mode.along_frequency() {
        for (row, out) in spectrogram.frames.iter().zip(maxed.iter_mut()) {
            sliding_max(row, radius, out);
        }
    }

    if mode.along_time() {
        let mut column = vec![0.0; num_frames];
        let mut column_max = vec![0.0; num_frames];
        for f in 0..freq_bins {
            for (slot, frame) in column.iter_mut().zip(maxed.iter()) {
                *slot = frame[f];
            }
            sliding_max(&column, radius, &mut column_max);
            for (frame, &value) in maxed.iter_mut().zip(column_max.iter()) {
                frame[f] = value;
            }
        }
    }

    let mut candidates = Vec::new();
    for f in 0..freq_bins {
        for t in 0..num_frames {
            let magnitude = spectrogram.frames[t][f];
            if magnitude >= maxed[t][f] {
                candidates.push(PeakCandidate {
                    peak: Peak { freq: f, time: t },
                    magnitude,
                });
            }
        }
    }
    candidates
}

/// Drops candidates at or below the absolute floor `amp_min`.
pub fn filter_peaks(candidates: &[PeakCandidate], amp_min: f64) -> Vec<Peak> {
    candidates
        .iter()
        .filter(|c| c.magnitude > amp_min)
        .map(|c| c.peak)
        .collect()
}

/// Waveform to filtered peaks in one call.
pub fn extract_peaks(samples: &[f32], config: &Config) -> Vec<Peak> {
    let spectrogram = compute_spectrogram(samples, config);
    let candidates = local_maxima(&spectrogram, config.fraction, config.mode);
    let peaks = filter_peaks(&candidates, config.amp_min);
    debug!(
        candidates = candidates.len(),
        peaks = peaks.len(),
        "peaks extracted"
    );
    peaks
}
