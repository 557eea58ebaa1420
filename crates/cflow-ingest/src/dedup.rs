//! Content-addressed duplicate suppression.
//!
//! The key is `sha256(platform ‖ 0x1f ‖ source_event_id)`. Keys are
//! remembered for the configured window, measured from first sighting.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use cflow_core::Platform;

pub type DedupKey = [u8; 32];

#[must_use]
pub fn dedup_key(platform: Platform, source_event_id: &str) -> DedupKey {
    let mut hasher = Sha256::new();
    hasher.update(platform.as_str().as_bytes());
    hasher.update([0x1f]);
    hasher.update(source_event_id.as_bytes());
    hasher.finalize().into()
}

#[derive(Debug)]
pub struct DedupWindow {
    window: Duration,
    seen: HashSet<DedupKey>,
    order: VecDeque<(DateTime<Utc>, DedupKey)>,
}

impl DedupWindow {
    #[must_use]
    pub fn new(window_secs: u64) -> Self {
        Self {
            window: i64::try_from(window_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns `true` if the key is new (and records it), `false` for a
    /// duplicate inside the window.
    pub fn check_and_insert(
        &mut self,
        platform: Platform,
        source_event_id: &str,
        now: DateTime<Utc>,
    ) -> bool {
        self.evict(now);
        let key = dedup_key(platform, source_event_id);
        if !self.seen.insert(key) {
            return false;
        }
        self.order.push_back((now, key));
        true
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let Some(cutoff) = now.checked_sub_signed(self.window) else {
            return;
        };
        while let Some((seen_at, key)) = self.order.front().copied() {
            if seen_at > cutoff {
                break;
            }
            self.order.pop_front();
            self.seen.remove(&key);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn same_event_id_on_different_platforms_is_distinct() {
        assert_ne!(
            dedup_key(Platform::Youtube, "e1"),
            dedup_key(Platform::Twitter, "e1")
        );
        assert_eq!(
            dedup_key(Platform::Youtube, "e1"),
            dedup_key(Platform::Youtube, "e1")
        );
    }

    #[test]
    fn duplicates_inside_window_are_rejected() {
        let mut window = DedupWindow::new(60);
        assert!(window.check_and_insert(Platform::Youtube, "e1", at(0)));
        assert!(!window.check_and_insert(Platform::Youtube, "e1", at(30)));
        assert!(window.check_and_insert(Platform::Spotify, "e1", at(30)));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn keys_expire_after_window() {
        let mut window = DedupWindow::new(60);
        assert!(window.check_and_insert(Platform::Youtube, "e1", at(0)));
        assert!(window.check_and_insert(Platform::Youtube, "e1", at(61)));
        assert_eq!(window.len(), 1);
    }
}
