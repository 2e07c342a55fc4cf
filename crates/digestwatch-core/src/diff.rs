//! Snapshot differencing.
//!
//! Cumulative counters are turned into per-interval deltas. A counter that
//! went backwards (statistics reset, server restart, inconsistent read) is
//! clamped to zero instead of underflowing. This is an approximation: the
//! activity between the reset and the next sample is lost, and nothing here
//! tells a reset apart from a bad read.
//!
//! Keys that disappear between two snapshots contribute nothing; their
//! trailing activity for that interval is not recovered.

use std::collections::HashMap;

use crate::model::{DigestDelta, DigestKey, DigestStat, Snapshot};

/// Delta of a cumulative counter, zero on regression.
#[inline]
pub fn clamped_delta(curr: u64, prev: u64) -> u64 {
    curr.saturating_sub(prev)
}

/// Compute per-key deltas between two full snapshots.
///
/// Only keys with activity in `count`, `rows_examined` or `rows_sent` appear
/// in the result. A key absent from `prev` is credited with its entire
/// current value.
pub fn diff_snapshots(prev: &Snapshot, curr: &Snapshot) -> HashMap<DigestKey, DigestDelta> {
    let mut out = HashMap::new();

    for (key, now) in curr {
        let delta = match prev.get(key) {
            Some(before) => DigestDelta {
                count: clamped_delta(now.count, before.count),
                rows_examined: clamped_delta(now.rows_examined, before.rows_examined),
                rows_sent: clamped_delta(now.rows_sent, before.rows_sent),
                rows_affected: clamped_delta(now.rows_affected, before.rows_affected),
                ..carry(now)
            },
            None => DigestDelta {
                count: now.count,
                rows_examined: now.rows_examined,
                rows_sent: now.rows_sent,
                rows_affected: now.rows_affected,
                ..carry(now)
            },
        };
        if delta.count == 0 && delta.rows_examined == 0 && delta.rows_sent == 0 {
            continue;
        }
        out.insert(key.clone(), delta);
    }

    out
}

fn carry(stat: &DigestStat) -> DigestDelta {
    DigestDelta {
        digest: stat.digest.clone(),
        text: stat.text.clone(),
        sample: stat.sample.clone(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(digest: &str, count: u64, examined: u64, sent: u64) -> DigestStat {
        DigestStat {
            digest: digest.to_string(),
            text: format!("SELECT /* {digest} */ ?"),
            sample: None,
            count,
            rows_examined: examined,
            rows_sent: sent,
            rows_affected: 0,
        }
    }

    fn snap(rows: &[(&str, u64, u64, u64)]) -> Snapshot {
        rows.iter()
            .map(|&(k, c, e, s)| (DigestKey::from(k), stat(k, c, e, s)))
            .collect()
    }

    #[test]
    fn new_key_gets_full_credit() {
        let prev = Snapshot::new();
        let curr = snap(&[("a", 3, 500, 10)]);

        let delta = diff_snapshots(&prev, &curr);
        let d = &delta[&DigestKey::from("a")];
        assert_eq!((d.count, d.rows_examined, d.rows_sent), (3, 500, 10));
    }

    #[test]
    fn idle_new_key_is_suppressed() {
        let delta = diff_snapshots(&Snapshot::new(), &snap(&[("a", 0, 0, 0)]));
        assert!(delta.is_empty());
    }

    #[test]
    fn unchanged_key_is_suppressed() {
        let prev = snap(&[("a", 3, 500, 10), ("b", 1, 1, 1)]);
        let curr = snap(&[("a", 3, 500, 10), ("b", 2, 1, 1)]);

        let delta = diff_snapshots(&prev, &curr);
        assert!(!delta.contains_key(&DigestKey::from("a")));
        assert_eq!(delta[&DigestKey::from("b")].count, 1);
        assert_eq!(delta.len(), 1);
    }

    #[test]
    fn regression_clamps_to_zero() {
        let prev = snap(&[("a", 100, 5000, 300)]);
        let curr = snap(&[("a", 10, 6000, 20)]);

        let delta = diff_snapshots(&prev, &curr);
        let d = &delta[&DigestKey::from("a")];
        assert_eq!(d.count, 0);
        assert_eq!(d.rows_examined, 1000);
        assert_eq!(d.rows_sent, 0);
    }

    #[test]
    fn full_reset_is_suppressed_not_underflowed() {
        let prev = snap(&[("a", 100, 5000, 300)]);
        let curr = snap(&[("a", 0, 0, 0)]);

        assert!(diff_snapshots(&prev, &curr).is_empty());
    }

    #[test]
    fn evicted_key_contributes_nothing() {
        let prev = snap(&[("a", 1, 1, 1), ("gone", 9, 9, 9)]);
        let curr = snap(&[("a", 2, 2, 2)]);

        let delta = diff_snapshots(&prev, &curr);
        assert_eq!(delta.len(), 1);
        assert!(!delta.contains_key(&DigestKey::from("gone")));
    }

    #[test]
    fn rows_affected_does_not_keep_entry_alive() {
        let mut prev = snap(&[("a", 5, 5, 5)]);
        let mut curr = snap(&[("a", 5, 5, 5)]);
        prev.get_mut(&DigestKey::from("a")).unwrap().rows_affected = 1;
        curr.get_mut(&DigestKey::from("a")).unwrap().rows_affected = 7;

        assert!(diff_snapshots(&prev, &curr).is_empty());
    }

    #[test]
    fn carries_text_and_sample() {
        let prev = Snapshot::new();
        let mut curr = snap(&[("a", 1, 1, 1)]);
        curr.get_mut(&DigestKey::from("a")).unwrap().sample = Some("SELECT 1".to_string());

        let delta = diff_snapshots(&prev, &curr);
        let d = &delta[&DigestKey::from("a")];
        assert_eq!(d.digest, "a");
        assert_eq!(d.sample.as_deref(), Some("SELECT 1"));
        assert_eq!(d.text, "SELECT /* a */ ?");
    }

    #[test]
    fn deltas_never_underflow_across_mixed_pairs() {
        let prev = snap(&[("a", 10, 0, 50), ("b", 0, 99, 0), ("c", 7, 7, 7)]);
        let curr = snap(&[("a", 5, 10, 60), ("b", 3, 1, 0), ("c", 6, 6, 6)]);

        for d in diff_snapshots(&prev, &curr).values() {
            assert!(d.count <= 10 && d.rows_examined <= 10 && d.rows_sent <= 10);
        }
    }
}
