use std::collections::HashSet;

use ring::digest::{SHA1_FOR_LEGACY_USE_ONLY, digest};
use tracing::debug;

use crate::audio::Peak;
use crate::config::Config;

/// A truncated pair hash tied to the anchor's time bin (plus one).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    pub hash: String,
    pub offset: u32,
}

/// Pairing parameters, taken from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    pub fan_value: usize,
    pub min_time_delta: u32,
    pub max_time_delta: u32,
    pub peak_sort: bool,
    pub reduction: usize,
}

impl From<&Config> for HashParams {
    fn from(config: &Config) -> Self {
        Self {
            fan_value: config.fan_value,
            min_time_delta: config.mn_htd,
            max_time_delta: config.mx_htd,
            peak_sort: config.peak_sort,
            reduction: config.fingerprint_reduction,
        }
    }
}

/// Pairs each anchor with up to `fan_value - 1` following peaks and hashes
/// `"{freq_anchor}|{freq_target}|{time_delta}"` with SHA-1.
///
/// The result can contain duplicates; see [`dedup_fingerprints`].
pub fn generate_hashes(peaks: &[Peak], params: &HashParams) -> Vec<Fingerprint> {
    let mut peaks = peaks.to_vec();
    if params.peak_sort {
        // stable: equal times keep their extraction order
        peaks.sort_by_key(|p| p.time);
    }

    let min_delta = params.min_time_delta as i64;
    let max_delta = params.max_time_delta as i64;
    let mut hashes = Vec::with_capacity(peaks.len() * params.fan_value.saturating_sub(1));

    for (i, anchor) in peaks.iter().enumerate() {
        for target in peaks.iter().skip(i + 1).take(params.fan_value.saturating_sub(1)) {
            let time_delta = target.time as i64 - anchor.time as i64;
            if time_delta < min_delta || time_delta > max_delta {
                continue;
            }
            hashes.push(Fingerprint {
                hash: pair_hash(anchor.freq, target.freq, time_delta, params.reduction),
                offset: anchor.time as u32 + 1,
            });
        }
    }

    debug!(
        peaks = peaks.len(),
        hashes = hashes.len(),
        "generated pair hashes"
    );
    hashes
}

fn pair_hash(anchor_freq: usize, target_freq: usize, time_delta: i64, reduction: usize) -> String {
    let key = format!("{anchor_freq}|{target_freq}|{time_delta}");
    let mut hex = hex::encode(digest(&SHA1_FOR_LEGACY_USE_ONLY, key.as_bytes()));
    hex.truncate(reduction);
    hex
}

/// Removes repeated `(hash, offset)` pairs, keeping first occurrences in order.
pub fn dedup_fingerprints(hashes: Vec<Fingerprint>) -> Vec<Fingerprint> {
    let mut seen = HashSet::with_capacity(hashes.len());
    hashes
        .into_iter()
        .filter(|fp| seen.insert(fp.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> HashParams {
        HashParams::from(&Config::default())
    }

    fn peak(freq: usize, time: usize) -> Peak {
        Peak { freq, time }
    }

    #[test]
    fn known_sha1_prefix() {
        // sha1("10|20|5")
        let expected = hex::encode(digest(&SHA1_FOR_LEGACY_USE_ONLY, b"10|20|5"));
        let hashes = generate_hashes(&[peak(10, 0), peak(20, 5)], &params());
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0].hash, expected);
        assert_eq!(hashes[0].hash.len(), 40);
        assert_eq!(hashes[0].offset, 1);
    }

    #[test]
    fn truncates_to_reduction() {
        let mut p = params();
        p.reduction = 12;
        let hashes = generate_hashes(&[peak(3, 4), peak(9, 10)], &p);
        assert_eq!(hashes[0].hash.len(), 12);
        assert_eq!(hashes[0].offset, 5);
    }

    #[test]
    fn pair_count_bounded_by_fan_value() {
        let peaks: Vec<Peak> = (0..50).map(|i| peak(i * 7 % 300, i)).collect();
        let p = params();
        let hashes = generate_hashes(&peaks, &p);
        assert!(hashes.len() <= peaks.len() * (p.fan_value - 1));
        // all deltas are small and positive, so every slot is used except the tail
        assert_eq!(hashes.len(), 46 * 4 + 3 + 2 + 1);
    }

    #[test]
    fn deltas_outside_window_are_dropped() {
        let mut p = params();
        p.min_time_delta = 2;
        p.max_time_delta = 10;
        let peaks = vec![peak(1, 0), peak(2, 1), peak(3, 5), peak(4, 30)];
        let hashes = generate_hashes(&peaks, &p);
        // kept: (0->5) d=5, (1->5) d=4; dropped: d=1, d=30, d=29, d=25
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0].offset, 1);
        assert_eq!(hashes[1].offset, 2);
    }

    #[test]
    fn sorting_makes_output_order_independent() {
        let p = params();
        let a = vec![peak(5, 3), peak(9, 1), peak(2, 7), peak(4, 1)];
        let b = vec![peak(9, 1), peak(4, 1), peak(5, 3), peak(2, 7)];
        assert_eq!(generate_hashes(&a, &p), generate_hashes(&b, &p));
    }

    #[test]
    fn unsorted_negative_deltas_are_skipped() {
        let mut p = params();
        p.peak_sort = false;
        let hashes = generate_hashes(&[peak(1, 10), peak(2, 4)], &p);
        assert!(hashes.is_empty());
    }

    #[test]
    fn fan_value_one_emits_nothing() {
        let mut p = params();
        p.fan_value = 1;
        assert!(generate_hashes(&[peak(1, 0), peak(2, 1)], &p).is_empty());
    }

    #[test]
    fn empty_peaks_emit_nothing() {
        assert!(generate_hashes(&[], &params()).is_empty());
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let fp = |h: &str, o: u32| Fingerprint {
            hash: h.to_string(),
            offset: o,
        };
        let deduped = dedup_fingerprints(vec![fp("b", 1), fp("a", 2), fp("b", 1), fp("b", 3)]);
        assert_eq!(deduped, vec![fp("b", 1), fp("a", 2), fp("b", 3)]);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let peaks: Vec<Peak> = (0..40).map(|i| peak((i * 31) % 513, i * 3)).collect();
        let p = params();
        assert_eq!(generate_hashes(&peaks, &p), generate_hashes(&peaks, &p));
    }
}
