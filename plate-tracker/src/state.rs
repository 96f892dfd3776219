//! Candidate and confirmed plates.
//!
//! A plate is first tracked as a candidate. Near-identical readings of the same plate
//! collapse into one candidate, represented by the reading with the highest confidence.
//! Once a candidate has been tracked for the scan window it is confirmed and handed back
//! to the caller for publication. Confirmed plates stay around, suppressing every reading
//! that looks like them, until they have not been seen for the lost window.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::event::RawEvent;
use crate::metrics_consts::{PLATES_LOST, READINGS_REJECTED};
use crate::plate::{is_fuzzy_match, is_valid_format, match_count, MATCH_THRESHOLD, PLATE_LENGTH};

/// A plate under observation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPlate {
    pub plate: String,
    pub confidence: f64,
    pub first_seen: Instant,
    pub last_seen: Instant,
}

impl TrackedPlate {
    fn new(event: &RawEvent, now: Instant) -> Self {
        Self {
            plate: event.plate.clone(),
            confidence: event.confidence,
            first_seen: now,
            last_seen: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupSettings {
    /// Minimum confidence (0-100) for a reading to start a new candidate.
    pub confidence_threshold: f64,
    /// A confirmed plate not seen for this long is considered gone.
    pub lost_window: Duration,
    /// How long a candidate is observed before it is confirmed.
    pub scan_window: Duration,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 80.0,
            lost_window: Duration::from_millis(5000),
            scan_window: Duration::from_millis(3000),
        }
    }
}

/// What happened to a single reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Started a new candidate.
    Inserted,
    /// Replaced a similar candidate with a more confident reading.
    Replaced,
    /// Matched a similar candidate that was at least as confident.
    Merged,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    WrongLength,
    InvalidFormat,
    /// Looks like a plate that was already published.
    Confirmed,
    LowConfidence,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::WrongLength => "wrong_length",
            RejectReason::InvalidFormat => "invalid_format",
            RejectReason::Confirmed => "confirmed",
            RejectReason::LowConfidence => "low_confidence",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DedupState {
    candidates: HashMap<String, TrackedPlate>,
    confirmed: HashMap<String, TrackedPlate>,
}

impl DedupState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn candidates(&self) -> &HashMap<String, TrackedPlate> {
        &self.candidates
    }

    pub fn confirmed(&self) -> &HashMap<String, TrackedPlate> {
        &self.confirmed
    }

    /// Apply one batch of readings observed at `now` and return the plates confirmed by it,
    /// oldest first.
    ///
    /// An empty batch still expires confirmed plates and confirms candidates whose scan
    /// window has passed.
    pub fn apply(
        &mut self,
        events: &[RawEvent],
        settings: &DedupSettings,
        now: Instant,
    ) -> Vec<TrackedPlate> {
        self.refresh_confirmed(events, now);

        let lost = self.expire_confirmed(settings.lost_window, now);
        metrics::counter!(PLATES_LOST).increment(lost as u64);

        for event in events {
            let admission = self.admit(event, settings.confidence_threshold, now);
            debug!(
                plate = %event.plate,
                confidence = event.confidence,
                ?admission,
                "reading processed"
            );
            if let Admission::Rejected(reason) = admission {
                metrics::counter!(READINGS_REJECTED, "reason" => reason.as_str()).increment(1);
            }
        }
        self.promote_candidates(settings.scan_window, now)
    }

    /// Mark confirmed plates read again in this batch as seen.
    fn refresh_confirmed(&mut self, events: &[RawEvent], now: Instant) {
        for event in events {
            if let Some(confirmed) = self.confirmed.get_mut(&event.plate) {
                confirmed.last_seen = now;
            }
        }
    }

    /// Forget confirmed plates that have not been seen for `lost_window`.
    fn expire_confirmed(&mut self, lost_window: Duration, now: Instant) -> usize {
        let before = self.confirmed.len();
        self.confirmed.retain(|plate, confirmed| {
            let keep = now.saturating_duration_since(confirmed.last_seen) < lost_window;
            if !keep {
                debug!(plate = %plate, "plate lost");
            }
            keep
        });
        before - self.confirmed.len()
    }

    /// Decide whether a single reading starts, updates or is absorbed by a candidate.
    pub fn admit(
        &mut self,
        event: &RawEvent,
        confidence_threshold: f64,
        now: Instant,
    ) -> Admission {
        if event.plate.chars().count() != PLATE_LENGTH {
            return Admission::Rejected(RejectReason::WrongLength);
        }
        if !is_valid_format(&event.plate) {
            return Admission::Rejected(RejectReason::InvalidFormat);
        }
        if self
            .confirmed
            .keys()
            .any(|confirmed| is_fuzzy_match(confirmed, &event.plate))
        {
            return Admission::Rejected(RejectReason::Confirmed);
        }

        if let Some(existing) = self.closest_candidate(&event.plate) {
            if event.confidence <= existing.confidence {
                return Admission::Merged;
            }

            let previous = existing.plate.clone();
            let first_seen = existing.first_seen;
            self.candidates.remove(&previous);
            self.candidates.insert(
                event.plate.clone(),
                TrackedPlate {
                    plate: event.plate.clone(),
                    confidence: event.confidence,
                    first_seen,
                    last_seen: now,
                },
            );
            return Admission::Replaced;
        }

        if event.confidence < confidence_threshold {
            return Admission::Rejected(RejectReason::LowConfidence);
        }

        self.candidates
            .insert(event.plate.clone(), TrackedPlate::new(event, now));
        Admission::Inserted
    }

    /// The candidate sharing the most positions with `plate`, if any reaches the match
    /// threshold. Ties go to the smallest key so the choice does not depend on map order.
    fn closest_candidate(&self, plate: &str) -> Option<&TrackedPlate> {
        self.candidates
            .values()
            .map(|candidate| {
                let count = match_count(&candidate.plate, plate, PLATE_LENGTH);
                (count, candidate)
            })
            .filter(|(count, _)| *count >= MATCH_THRESHOLD)
            .max_by(|(count_a, a), (count_b, b)| {
                count_a.cmp(count_b).then_with(|| b.plate.cmp(&a.plate))
            })
            .map(|(_, candidate)| candidate)
    }

    /// Move every candidate observed for at least `scan_window` to the confirmed plates.
    fn promote_candidates(&mut self, scan_window: Duration, now: Instant) -> Vec<TrackedPlate> {
        let ready: Vec<String> = self
            .candidates
            .iter()
            .filter(|(_, candidate)| {
                now.saturating_duration_since(candidate.first_seen) >= scan_window
            })
            .map(|(plate, _)| plate.clone())
            .collect();

        let mut promoted = Vec::with_capacity(ready.len());
        for plate in ready {
            if let Some(candidate) = self.candidates.remove(&plate) {
                self.confirmed.insert(plate, candidate.clone());
                promoted.push(candidate);
            }
        }

        promoted.sort_by(|a, b| match a.first_seen.cmp(&b.first_seen) {
            Ordering::Equal => a.plate.cmp(&b.plate),
            other => other,
        });
        promoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DedupSettings {
        DedupSettings {
            confidence_threshold: 90.0,
            lost_window: Duration::from_millis(5000),
            scan_window: Duration::from_millis(3000),
        }
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn assert_disjoint(state: &DedupState) {
        for plate in state.candidates().keys() {
            assert!(
                !state.confirmed().contains_key(plate),
                "{plate} is both candidate and confirmed"
            );
        }
        let candidates = state.candidates().values();
        for tracked in candidates.chain(state.confirmed().values()) {
            assert!(tracked.first_seen <= tracked.last_seen);
        }
    }

    #[test]
    fn inserts_confident_valid_plate() {
        let mut state = DedupState::new();
        let now = Instant::now();

        let admission = state.admit(&RawEvent::new("AB1234", 90.0), 90.0, now);

        assert_eq!(admission, Admission::Inserted);
        let candidate = &state.candidates()["AB1234"];
        assert_eq!(candidate.first_seen, now);
        assert_eq!(candidate.last_seen, now);
        assert_eq!(candidate.confidence, 90.0);
    }

    #[test]
    fn rejects_low_confidence() {
        let mut state = DedupState::new();

        let admission = state.admit(&RawEvent::new("AB1234", 89.9), 90.0, Instant::now());

        assert_eq!(admission, Admission::Rejected(RejectReason::LowConfidence));
        assert!(state.candidates().is_empty());
    }

    #[test]
    fn rejects_wrong_length_and_format() {
        let mut state = DedupState::new();
        let now = Instant::now();

        assert_eq!(
            state.admit(&RawEvent::new("AB12345", 99.0), 90.0, now),
            Admission::Rejected(RejectReason::WrongLength)
        );
        assert_eq!(
            state.admit(&RawEvent::new("ABCDEF", 99.0), 90.0, now),
            Admission::Rejected(RejectReason::InvalidFormat)
        );
        assert!(state.candidates().is_empty());
    }

    #[test]
    fn more_confident_reading_replaces_similar_candidate() {
        let mut state = DedupState::new();
        let start = Instant::now();

        state.admit(&RawEvent::new("AB1234", 92.0), 90.0, start);
        let admission = state.admit(&RawEvent::new("AB1235", 95.0), 90.0, start + ms(100));

        assert_eq!(admission, Admission::Replaced);
        assert_eq!(state.candidates().len(), 1);
        let candidate = &state.candidates()["AB1235"];
        assert_eq!(candidate.confidence, 95.0);
        assert_eq!(candidate.first_seen, start);
        assert_eq!(candidate.last_seen, start + ms(100));
    }

    #[test]
    fn less_confident_reading_is_merged() {
        let mut state = DedupState::new();
        let start = Instant::now();

        state.admit(&RawEvent::new("AB1234", 95.0), 90.0, start);
        let admission = state.admit(&RawEvent::new("AB1235", 70.0), 90.0, start + ms(100));

        assert_eq!(admission, Admission::Merged);
        assert_eq!(state.candidates().len(), 1);
        assert_eq!(state.candidates()["AB1234"].last_seen, start);
    }

    #[test]
    fn replacement_below_threshold_is_allowed() {
        let mut state = DedupState::new();
        let start = Instant::now();

        state.admit(&RawEvent::new("AB1234", 60.0), 50.0, start);
        let admission = state.admit(&RawEvent::new("AB1235", 70.0), 90.0, start);

        assert_eq!(admission, Admission::Replaced);
        assert!(state.candidates().contains_key("AB1235"));
    }

    #[test]
    fn closest_candidate_wins() {
        let mut state = DedupState::new();
        let now = Instant::now();

        state.admit(&RawEvent::new("AB1239", 91.0), 90.0, now);
        state.admit(&RawEvent::new("ZZ1234", 91.0), 90.0, now);
        assert_eq!(state.candidates().len(), 2);

        let admission = state.admit(&RawEvent::new("AB1234", 99.0), 90.0, now);

        assert_eq!(admission, Admission::Replaced);
        assert!(state.candidates().contains_key("AB1234"));
        assert!(state.candidates().contains_key("ZZ1234"));
        assert!(!state.candidates().contains_key("AB1239"));
    }

    #[test]
    fn equally_close_candidates_resolve_to_smallest_plate() {
        let mut state = DedupState::new();
        let now = Instant::now();

        state.admit(&RawEvent::new("ZZ1234", 91.0), 90.0, now);
        state.admit(&RawEvent::new("AB1299", 91.0), 90.0, now);
        assert_eq!(state.candidates().len(), 2);

        state.admit(&RawEvent::new("AB1234", 99.0), 90.0, now);

        assert!(state.candidates().contains_key("AB1234"));
        assert!(state.candidates().contains_key("ZZ1234"));
        assert!(!state.candidates().contains_key("AB1299"));
    }

    #[test]
    fn readings_similar_to_confirmed_plates_are_rejected() {
        let mut state = DedupState::new();
        let start = Instant::now();
        let settings = settings();

        state.apply(&[RawEvent::new("AB1234", 95.0)], &settings, start);
        let promoted = state.apply(&[], &settings, start + ms(3000));
        assert_eq!(promoted.len(), 1);

        let admission = state.admit(&RawEvent::new("AB1299", 99.0), 90.0, start + ms(3100));

        assert_eq!(admission, Admission::Rejected(RejectReason::Confirmed));
        assert!(state.candidates().is_empty());
        assert_disjoint(&state);
    }

    #[test]
    fn promotes_after_scan_window() {
        let mut state = DedupState::new();
        let start = Instant::now();
        let settings = settings();

        assert!(state
            .apply(&[RawEvent::new("AB1234", 95.0)], &settings, start)
            .is_empty());
        assert!(state.apply(&[], &settings, start + ms(2999)).is_empty());
        assert!(state.candidates().contains_key("AB1234"));

        let promoted = state.apply(&[], &settings, start + ms(3000));

        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].plate, "AB1234");
        assert!(state.candidates().is_empty());
        assert!(state.confirmed().contains_key("AB1234"));

        assert!(state.apply(&[], &settings, start + ms(3001)).is_empty());
        assert_disjoint(&state);
    }

    #[test]
    fn zero_scan_window_promotes_in_the_same_batch() {
        let mut state = DedupState::new();
        let settings = DedupSettings {
            scan_window: Duration::ZERO,
            ..settings()
        };

        let promoted = state.apply(&[RawEvent::new("AB1234", 95.0)], &settings, Instant::now());

        assert_eq!(promoted.len(), 1);
        assert!(state.confirmed().contains_key("AB1234"));
    }

    #[test]
    fn expires_after_lost_window() {
        let mut state = DedupState::new();
        let start = Instant::now();
        let settings = DedupSettings {
            scan_window: Duration::ZERO,
            ..settings()
        };

        state.apply(&[RawEvent::new("AB1234", 95.0)], &settings, start);
        state.apply(&[], &settings, start + ms(4999));
        assert!(state.confirmed().contains_key("AB1234"));

        state.apply(&[], &settings, start + ms(5000));
        assert!(state.confirmed().is_empty());
    }

    #[test]
    fn refresh_postpones_expiry() {
        let mut state = DedupState::new();
        let start = Instant::now();
        let settings = DedupSettings {
            scan_window: Duration::ZERO,
            ..settings()
        };

        state.apply(&[RawEvent::new("AB1234", 95.0)], &settings, start);
        let later = start + ms(4999);
        state.apply(&[RawEvent::new("AB1234", 40.0)], &settings, later);
        assert_eq!(state.confirmed()["AB1234"].last_seen, later);

        state.apply(&[], &settings, start + ms(9000));
        assert!(state.confirmed().contains_key("AB1234"));

        state.apply(&[], &settings, start + ms(9999));
        assert!(state.confirmed().is_empty());
    }

    #[test]
    fn near_duplicate_does_not_refresh_confirmed() {
        let mut state = DedupState::new();
        let start = Instant::now();
        let settings = DedupSettings {
            scan_window: Duration::ZERO,
            ..settings()
        };

        state.apply(&[RawEvent::new("AB1234", 95.0)], &settings, start);
        let later = start + ms(4000);
        state.apply(&[RawEvent::new("AB1235", 99.0)], &settings, later);

        assert_eq!(state.confirmed()["AB1234"].last_seen, start);
        assert!(state.candidates().is_empty());
    }

    #[test]
    fn plate_can_be_published_again_after_it_is_lost() {
        let mut state = DedupState::new();
        let start = Instant::now();
        let settings = settings();

        state.apply(&[RawEvent::new("AB1234", 95.0)], &settings, start);
        assert_eq!(state.apply(&[], &settings, start + ms(3000)).len(), 1);

        // confirmed plates keep the last_seen of their candidate
        state.apply(&[], &settings, start + ms(5000));
        assert!(state.confirmed().is_empty());

        let later = start + ms(6000);
        assert!(state
            .apply(&[RawEvent::new("AB1234", 95.0)], &settings, later)
            .is_empty());
        assert!(state.confirmed().is_empty());
        assert!(state.candidates().contains_key("AB1234"));

        assert_eq!(state.apply(&[], &settings, later + ms(3000)).len(), 1);
        assert_disjoint(&state);
    }

    #[test]
    fn promotes_oldest_first() {
        let mut state = DedupState::new();
        let start = Instant::now();
        let settings = settings();

        state.apply(&[RawEvent::new("XY99ZZ", 95.0)], &settings, start);
        state.apply(
            &[RawEvent::new("12AB34", 95.0), RawEvent::new("AB1234", 95.0)],
            &settings,
            start + ms(10),
        );

        let promoted: Vec<String> = state
            .apply(&[], &settings, start + ms(3010))
            .into_iter()
            .map(|p| p.plate)
            .collect();

        assert_eq!(promoted, vec!["XY99ZZ", "12AB34", "AB1234"]);
    }
}
