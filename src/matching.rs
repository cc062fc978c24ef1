use std::collections::{BTreeMap, BTreeSet, HashMap};

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::config::{Config, HIGH_CONFIDENCE_THRESHOLD, MEDIUM_CONFIDENCE_THRESHOLD};
use crate::error::StoreError;
use crate::hashing::Fingerprint;
use crate::store::FingerprintRepository;

/// A stored row hit by a query hash, as `(recording_id, stored - query offset)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawMatch {
    pub recording_id: String,
    pub delta: i64,
}

/// Output of the lookup phase.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Matches {
    pub raw: Vec<RawMatch>,
    /// Store rows returned per recording.
    pub dedup_hashes: HashMap<String, usize>,
}

impl Matches {
    fn merge(mut self, other: Matches) -> Matches {
        self.raw.extend(other.raw);
        for (recording_id, count) in other.dedup_hashes {
            *self.dedup_hashes.entry(recording_id).or_default() += count;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub recording_id: String,
    /// Alignment in time bins: where the query starts inside the recording.
    pub offset: i64,
    pub offset_sec: f64,
    /// Share of the recording's fingerprints present in the query.
    pub confidence: f64,
    /// Raw matches agreeing on `offset`.
    pub votes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchQuality {
    High,
    Medium,
    Low,
}

impl MatchQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchQuality::High => "High",
            MatchQuality::Medium => "Medium",
            MatchQuality::Low => "Low",
        }
    }
}

pub fn get_match_quality(confidence: f64) -> MatchQuality {
    if confidence >= HIGH_CONFIDENCE_THRESHOLD {
        MatchQuality::High
    } else if confidence >= MEDIUM_CONFIDENCE_THRESHOLD {
        MatchQuality::Medium
    } else {
        MatchQuality::Low
    }
}

/// Looks the query hashes up in `store`, `batch_size` distinct hashes per
/// call, and expands every returned row against each query offset of its hash.
///
/// `dedup_hashes` grows by one per returned row, however many query offsets
/// that row is paired with. Batches run in parallel and are merged afterwards.
pub fn match_fingerprints<S>(
    store: &S,
    query: &BTreeSet<Fingerprint>,
    batch_size: usize,
) -> Result<Matches, StoreError>
where
    S: FingerprintRepository + Sync + ?Sized,
{
    let mut bins: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
    for fp in query {
        bins.entry(fp.hash.as_str()).or_default().push(fp.offset);
    }
    let values: Vec<String> = bins.keys().map(|h| h.to_string()).collect();

    let partials = values
        .par_chunks(batch_size.max(1))
        .map(|batch| {
            let rows = store.find_by_hashes(batch)?;
            let mut partial = Matches::default();
            for row in rows {
                let Some(offsets) = bins.get(row.hash.as_str()) else {
                    continue;
                };
                *partial
                    .dedup_hashes
                    .entry(row.recording_id.clone())
                    .or_default() += 1;
                for &sampled in offsets {
                    partial.raw.push(RawMatch {
                        recording_id: row.recording_id.clone(),
                        delta: row.offset as i64 - sampled as i64,
                    });
                }
            }
            Ok(partial)
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    let matches = partials
        .into_iter()
        .fold(Matches::default(), Matches::merge);

    debug!(
        distinct_hashes = values.len(),
        batches = values.len().div_ceil(batch_size.max(1)),
        raw_matches = matches.raw.len(),
        recordings = matches.dedup_hashes.len(),
        "fingerprint lookup finished"
    );
    Ok(matches)
}

/// Best-voted alignment per recording, ranked by votes.
///
/// Ties on votes rank by recording id; within one recording equally voted
/// offsets resolve to the smallest.
pub fn best_alignments(raw: &[RawMatch]) -> Vec<(String, i64, usize)> {
    let mut counts: HashMap<(&str, i64), usize> = HashMap::new();
    for m in raw {
        *counts.entry((m.recording_id.as_str(), m.delta)).or_default() += 1;
    }

    let mut best: HashMap<&str, (i64, usize)> = HashMap::new();
    for (&(recording_id, delta), &votes) in &counts {
        let entry = best.entry(recording_id).or_insert((delta, votes));
        if votes > entry.1 || (votes == entry.1 && delta < entry.0) {
            *entry = (delta, votes);
        }
    }

    let mut ranked: Vec<(String, i64, usize)> = best
        .into_iter()
        .map(|(recording_id, (delta, votes))| (recording_id.to_string(), delta, votes))
        .collect();
    ranked.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// Ranks candidates and scores the top `config.top_n` of them.
///
/// Confidence is the recording's matched row count over its total row count.
pub fn align_offsets<S>(
    store: &S,
    matches: &Matches,
    config: &Config,
) -> Result<Vec<MatchResult>, StoreError>
where
    S: FingerprintRepository + ?Sized,
{
    let mut results = Vec::new();
    for (recording_id, offset, votes) in best_alignments(&matches.raw)
        .into_iter()
        .take(config.top_n)
    {
        let matched = matches.dedup_hashes.get(&recording_id).copied().unwrap_or(0);
        let total = store.count_by_recording(&recording_id)?;
        let confidence = if total == 0 {
            0.0
        } else {
            (matched as f64 / total as f64).min(1.0)
        };
        results.push(MatchResult {
            offset_sec: config.offset_to_secs(offset),
            recording_id,
            offset,
            confidence,
            votes,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FingerprintRecord, MemoryStore};

    fn fp(hash: &str, offset: u32) -> Fingerprint {
        Fingerprint {
            hash: hash.into(),
            offset,
        }
    }

    fn row(hash: &str, recording_id: &str, offset: u32) -> FingerprintRecord {
        FingerprintRecord {
            hash: hash.into(),
            recording_id: recording_id.into(),
            offset,
        }
    }

    fn raw(recording_id: &str, delta: i64) -> RawMatch {
        RawMatch {
            recording_id: recording_id.into(),
            delta,
        }
    }

    #[test]
    fn store_rows_count_once_per_row() {
        let store = MemoryStore::new();
        store
            .put_fingerprints(&[row("aa", "R1", 10), row("bb", "R1", 20)])
            .unwrap();
        // "aa" appears at two query offsets
        let query: BTreeSet<Fingerprint> = [fp("aa", 1), fp("aa", 4), fp("bb", 11)].into();

        let matches = match_fingerprints(&store, &query, 500).unwrap();

        assert_eq!(matches.dedup_hashes["R1"], 2);
        let mut deltas: Vec<i64> = matches.raw.iter().map(|m| m.delta).collect();
        deltas.sort();
        assert_eq!(deltas, vec![6, 9, 9]);
    }

    #[test]
    fn batching_does_not_change_the_outcome() {
        let store = MemoryStore::new();
        let rows: Vec<FingerprintRecord> = (0..40)
            .map(|i| row(&format!("h{i:02}"), if i % 2 == 0 { "R1" } else { "R2" }, i + 5))
            .collect();
        store.put_fingerprints(&rows).unwrap();
        let query: BTreeSet<Fingerprint> = (0..40).map(|i| fp(&format!("h{i:02}"), i)).collect();

        let one = match_fingerprints(&store, &query, 500).unwrap();
        let many = match_fingerprints(&store, &query, 3).unwrap();

        assert_eq!(one.dedup_hashes, many.dedup_hashes);
        assert_eq!(one.raw.len(), many.raw.len());
        assert_eq!(many.dedup_hashes["R1"], 20);
    }

    #[test]
    fn empty_query_matches_nothing() {
        let store = MemoryStore::new();
        let matches = match_fingerprints(&store, &BTreeSet::new(), 500).unwrap();
        assert!(matches.raw.is_empty());
        assert!(matches.dedup_hashes.is_empty());
    }

    #[test]
    fn mode_offset_wins_per_recording() {
        let ranked = best_alignments(&[
            raw("R1", 7),
            raw("R1", 7),
            raw("R1", 7),
            raw("R1", 2),
            raw("R2", 4),
            raw("R2", 4),
            raw("R2", 9),
        ]);
        assert_eq!(
            ranked,
            vec![("R1".to_string(), 7, 3), ("R2".to_string(), 4, 2)]
        );
    }

    #[test]
    fn ties_break_on_recording_id_then_offset() {
        let ranked = best_alignments(&[raw("Rb", 5), raw("Ra", 8), raw("Ra", 3)]);
        assert_eq!(
            ranked,
            vec![("Ra".to_string(), 3, 1), ("Rb".to_string(), 5, 1)]
        );
    }

    #[test]
    fn confidence_uses_row_counts_not_votes() {
        let store = MemoryStore::new();
        store
            .put_fingerprints(&[
                row("aa", "R1", 10),
                row("bb", "R1", 11),
                row("cc", "R1", 12),
                row("dd", "R1", 13),
            ])
            .unwrap();
        let matches = Matches {
            raw: vec![raw("R1", 10), raw("R1", 10), raw("R1", 3)],
            dedup_hashes: [("R1".to_string(), 3)].into(),
        };
        let config = Config::default();

        let results = align_offsets(&store, &matches, &config).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].offset, 10);
        assert_eq!(results[0].votes, 2);
        assert!((results[0].confidence - 0.75).abs() < 1e-12);
        assert!((results[0].offset_sec - 0.02).abs() < 1e-12);
    }

    #[test]
    fn results_are_capped_at_top_n() {
        let store = MemoryStore::new();
        let raw_matches: Vec<RawMatch> = (0..8).map(|i| raw(&format!("R{i}"), 0)).collect();
        let config = Config {
            top_n: 3,
            ..Config::default()
        };
        let matches = Matches {
            raw: raw_matches,
            dedup_hashes: HashMap::new(),
        };
        let results = align_offsets(&store, &matches, &config).unwrap();
        assert_eq!(results.len(), 3);
        // nothing stored for these ids
        assert!(results.iter().all(|r| r.confidence == 0.0));
    }

    #[test]
    fn quality_labels() {
        assert_eq!(get_match_quality(0.99), MatchQuality::High);
        assert_eq!(get_match_quality(0.2), MatchQuality::Medium);
        assert_eq!(get_match_quality(0.01), MatchQuality::Low);
    }
}
