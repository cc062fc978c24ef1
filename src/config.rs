use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// Matching quality thresholds, applied to confidence in [0, 1]
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.5;
pub const MEDIUM_CONFIDENCE_THRESHOLD: f64 = 0.1;

/// Axes along which a spectrogram cell has to dominate its neighborhood to
/// count as a peak. Serialized as its integer code (0, 1, 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PeakMode {
    Frequency,
    Time,
    Both,
}

impl PeakMode {
    pub fn along_frequency(self) -> bool {
        matches!(self, PeakMode::Frequency | PeakMode::Both)
    }

    pub fn along_time(self) -> bool {
        matches!(self, PeakMode::Time | PeakMode::Both)
    }
}

impl TryFrom<u8> for PeakMode {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(PeakMode::Frequency),
            1 => Ok(PeakMode::Time),
            2 => Ok(PeakMode::Both),
            other => Err(format!("unknown peak mode {other}, expected 0, 1 or 2")),
        }
    }
}

impl From<PeakMode> for u8 {
    fn from(mode: PeakMode) -> Self {
        match mode {
            PeakMode::Frequency => 0,
            PeakMode::Time => 1,
            PeakMode::Both => 2,
        }
    }
}

/// Fingerprinting and matching parameters.
///
/// Built once by the caller and handed to every component by value; missing
/// TOML keys fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Rate every waveform is decoded/resampled to, in Hz.
    pub sample_rate: u32,
    /// FFT length; segments are zero-padded up to it.
    pub n_fft: usize,
    /// Samples shared by consecutive segments.
    pub n_overlap: usize,
    /// Samples per segment.
    pub n_perseg: usize,
    /// Peak neighborhood size as a fraction of the frequency axis.
    pub fraction: f64,
    pub mode: PeakMode,
    /// Absolute magnitude floor for peaks.
    pub amp_min: f64,
    /// Each anchor is paired with the next `fan_value - 1` peaks.
    pub fan_value: usize,
    /// Minimum time delta (in frames) of a hashed pair.
    pub mn_htd: u32,
    /// Maximum time delta (in frames) of a hashed pair.
    pub mx_htd: u32,
    /// Sort peaks by time before pairing.
    pub peak_sort: bool,
    /// Hex characters kept from each SHA-1 digest.
    pub fingerprint_reduction: usize,
    pub top_n: usize,
    /// Distinct hashes per store lookup.
    pub batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            n_fft: 1024,
            n_overlap: 32,
            n_perseg: 64,
            fraction: 0.05,
            mode: PeakMode::Both,
            amp_min: 1e-5,
            fan_value: 5,
            mn_htd: 0,
            mx_htd: 200,
            peak_sort: true,
            fingerprint_reduction: 40,
            top_n: 5,
            batch_size: 500,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::invalid("sample_rate", "must be positive"));
        }
        if self.n_perseg == 0 {
            return Err(ConfigError::invalid("n_perseg", "must be positive"));
        }
        if self.n_overlap >= self.n_perseg {
            return Err(ConfigError::invalid(
                "n_overlap",
                format!("must be smaller than n_perseg ({})", self.n_perseg),
            ));
        }
        if self.n_fft < self.n_perseg {
            return Err(ConfigError::invalid(
                "n_fft",
                format!("must be at least n_perseg ({})", self.n_perseg),
            ));
        }
        if !(self.fraction > 0.0 && self.fraction <= 1.0) {
            return Err(ConfigError::invalid("fraction", "must lie in (0, 1]"));
        }
        if !(self.amp_min.is_finite() && self.amp_min >= 0.0) {
            return Err(ConfigError::invalid("amp_min", "must be finite and non-negative"));
        }
        if self.fan_value == 0 {
            return Err(ConfigError::invalid("fan_value", "must be at least 1"));
        }
        if self.mn_htd > self.mx_htd {
            return Err(ConfigError::invalid(
                "mn_htd",
                format!("{} exceeds mx_htd {}", self.mn_htd, self.mx_htd),
            ));
        }
        if !(1..=40).contains(&self.fingerprint_reduction) {
            return Err(ConfigError::invalid(
                "fingerprint_reduction",
                "must lie in 1..=40 (SHA-1 hex length)",
            ));
        }
        if self.top_n == 0 {
            return Err(ConfigError::invalid("top_n", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        Ok(())
    }

    /// Samples advanced between successive spectrogram frames.
    pub fn hop_size(&self) -> usize {
        self.n_perseg - self.n_overlap
    }

    /// Rows of the one-sided spectrum.
    pub fn freq_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Converts a time-bin offset into seconds.
    pub fn offset_to_secs(&self, offset: i64) -> f64 {
        offset as f64 / self.sample_rate as f64 * self.hop_size() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.hop_size(), 32);
        assert_eq!(config.freq_bins(), 513);
        assert_eq!(config.mode, PeakMode::Both);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config = Config::from_toml_str("fan_value = 10\nmode = 0\n").unwrap();
        assert_eq!(config.fan_value, 10);
        assert_eq!(config.mode, PeakMode::Frequency);
        assert_eq!(config.sample_rate, 16_000);
    }

    #[test]
    fn rejects_inverted_delta_range() {
        let err = Config::from_toml_str("mn_htd = 300\nmx_htd = 200\n").unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid { ref field, .. } if field == "mn_htd"),
            "got: {err}"
        );
    }

    #[test]
    fn rejects_non_positive_fraction() {
        let err = Config::from_toml_str("fraction = 0.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "fraction"));
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = Config::from_toml_str("mode = 7").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(_)), "got: {err}");
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(Config::from_toml_str("fanvalue = 3").is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn offset_seconds_use_hop_size() {
        let config = Config::default();
        assert!((config.offset_to_secs(1500) - 3.0).abs() < 1e-12);
        assert!((config.offset_to_secs(-500) + 1.0).abs() < 1e-12);
    }
}
