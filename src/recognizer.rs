//! Recognition facade: decode → extract → hash → persist or match → align.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info, info_span};

use crate::audio::{self, Peak};
use crate::config::Config;
use crate::error::Result;
use crate::hashing::{self, Fingerprint, HashParams};
use crate::matching::{self, MatchResult};
use crate::store::{FingerprintRecord, Recording, Store};

/// Where a recognizer call currently is. Every call starts at `Idle` and
/// either reaches `Done` or returns the first error it hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Decoding,
    Extracting,
    Hashing,
    Persisting,
    Matching,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Decoding => "decoding",
            Stage::Extracting => "extracting",
            Stage::Hashing => "hashing",
            Stage::Persisting => "persisting",
            Stage::Matching => "matching",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

fn enter(stage: Stage) {
    debug!(%stage, "stage");
}

/// Acknowledgment of a finished ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub recording_id: String,
    /// Distinct `(hash, offset)` pairs written.
    pub fingerprints: usize,
}

pub struct Recognizer<S> {
    config: Config,
    store: S,
}

impl<S: Store> Recognizer<S> {
    /// Fails if `config` does not validate.
    pub fn new(config: Config, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, store })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn peaks(&self, samples: &[f32]) -> Vec<Peak> {
        enter(Stage::Extracting);
        audio::extract_peaks(samples, &self.config)
    }

    /// Pure waveform → hashes step; may contain duplicates.
    pub fn fingerprint(&self, samples: &[f32]) -> Vec<Fingerprint> {
        let peaks = self.peaks(samples);
        enter(Stage::Hashing);
        hashing::generate_hashes(&peaks, &HashParams::from(&self.config))
    }

    fn decode(&self, path: &Path) -> Result<Vec<f32>> {
        enter(Stage::Decoding);
        Ok(audio::load_and_prepare_audio(path, self.config.sample_rate)?)
    }

    fn records_for(&self, recording_id: &str, samples: &[f32]) -> Vec<FingerprintRecord> {
        hashing::dedup_fingerprints(self.fingerprint(samples))
            .into_iter()
            .map(|fp| FingerprintRecord {
                hash: fp.hash,
                recording_id: recording_id.to_string(),
                offset: fp.offset,
            })
            .collect()
    }

    fn persist(&self, recording_id: &str, records: &[FingerprintRecord]) -> Result<IngestReport> {
        enter(Stage::Persisting);
        // the marker only goes in once its rows are stored
        self.store.put_fingerprints(records)?;
        self.store.put_recording(&Recording {
            recording_id: recording_id.to_string(),
            fingerprinted: true,
        })?;
        enter(Stage::Done);
        info!(recording_id, fingerprints = records.len(), "recording ingested");
        Ok(IngestReport {
            recording_id: recording_id.to_string(),
            fingerprints: records.len(),
        })
    }

    /// Fingerprints a decoded reference and stores it under `recording_id`.
    ///
    /// A waveform without peaks still records a (fingerprint-less) marker.
    pub fn ingest(&self, recording_id: &str, samples: &[f32]) -> Result<IngestReport> {
        let _span = info_span!("ingest", recording_id).entered();
        enter(Stage::Idle);
        let records = self.records_for(recording_id, samples);
        self.persist(recording_id, &records)
    }

    pub fn ingest_file(&self, recording_id: &str, path: impl AsRef<Path>) -> Result<IngestReport> {
        let _span = info_span!("ingest", recording_id).entered();
        enter(Stage::Idle);
        let samples = self.decode(path.as_ref())?;
        let records = self.records_for(recording_id, &samples);
        self.persist(recording_id, &records)
    }

    /// Ingests several files. Decoding and hashing run in parallel; the first
    /// failure aborts the call.
    pub fn ingest_dataset(&self, items: &[(String, PathBuf)]) -> Result<Vec<IngestReport>> {
        let span = info_span!("ingest_dataset", items = items.len());
        let _guard = span.enter();
        enter(Stage::Idle);

        let prepared = items
            .par_iter()
            .map(|(recording_id, path)| {
                let _span = info_span!(parent: &span, "ingest", recording_id = %recording_id).entered();
                let samples = self.decode(path)?;
                Ok((recording_id, self.records_for(recording_id, &samples)))
            })
            .collect::<Result<Vec<_>>>()?;

        prepared
            .iter()
            .map(|(recording_id, records)| {
                let _span = info_span!("ingest", recording_id = %recording_id).entered();
                self.persist(recording_id, records)
            })
            .collect()
    }

    /// Ranked matches for a decoded query clip, best first.
    pub fn recognize(&self, samples: &[f32]) -> Result<Vec<MatchResult>> {
        let _span = info_span!("recognize", samples = samples.len()).entered();
        enter(Stage::Idle);

        let query: BTreeSet<Fingerprint> = self.fingerprint(samples).into_iter().collect();
        if query.is_empty() {
            enter(Stage::Done);
            info!("query produced no fingerprints");
            return Ok(Vec::new());
        }

        enter(Stage::Matching);
        let matches = matching::match_fingerprints(&self.store, &query, self.config.batch_size)?;
        let results = matching::align_offsets(&self.store, &matches, &self.config)?;

        enter(Stage::Done);
        info!(
            hashes = query.len(),
            candidates = matches.dedup_hashes.len(),
            results = results.len(),
            "recognition finished"
        );
        Ok(results)
    }

    /// Like [`recognize`](Self::recognize) on `samples[range]`, clamped to the
    /// waveform.
    pub fn recognize_range(&self, samples: &[f32], range: Range<usize>) -> Result<Vec<MatchResult>> {
        let end = range.end.min(samples.len());
        let start = range.start.min(end);
        self.recognize(&samples[start..end])
    }

    /// Decodes `path` and recognizes the `[start_sec, end_sec)` part of it.
    pub fn recognize_file(
        &self,
        path: impl AsRef<Path>,
        start_sec: Option<f64>,
        end_sec: Option<f64>,
    ) -> Result<Vec<MatchResult>> {
        let samples = self.decode(path.as_ref())?;
        let rate = self.config.sample_rate as f64;
        let to_index = |secs: f64| (secs.max(0.0) * rate).round() as usize;
        let start = start_sec.map_or(0, to_index);
        let end = end_sec.map_or(samples.len(), to_index);
        self.recognize_range(&samples, start..end)
    }

    pub fn recordings(&self) -> Result<Vec<Recording>> {
        Ok(self.store.recordings()?)
    }

    pub fn fingerprint_count(&self, recording_id: &str) -> Result<usize> {
        Ok(self.store.count_by_recording(recording_id)?)
    }

    pub fn delete_all_fingerprints(&self) -> Result<()> {
        Ok(self.store.delete_all_fingerprints()?)
    }

    pub fn delete_all_recordings(&self) -> Result<()> {
        Ok(self.store.delete_all_recordings()?)
    }

    pub fn delete_fingerprints_for(&self, recording_id: &str) -> Result<()> {
        Ok(self.store.delete_by_recording(recording_id)?)
    }

    /// Removes a recording's fingerprints and its marker.
    pub fn forget(&self, recording_id: &str) -> Result<()> {
        self.store.delete_by_recording(recording_id)?;
        self.store.delete_recording(recording_id)?;
        Ok(())
    }
}
