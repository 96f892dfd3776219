//! Metric names emitted by the tracker.

/// Messages read from the recognizer output.
pub const MESSAGES_RECEIVED: &str = "plate_tracker_messages_received_total";

/// Messages that could not be decoded and were dropped.
pub const MESSAGES_DROPPED: &str = "plate_tracker_messages_dropped_total";

/// Plate readings contained in decoded messages.
pub const READINGS_RECEIVED: &str = "plate_tracker_readings_received_total";

/// Readings kept out of the candidates, labeled by `reason`.
pub const READINGS_REJECTED: &str = "plate_tracker_readings_rejected_total";

/// Candidates confirmed and handed over for publication.
pub const PLATES_CONFIRMED: &str = "plate_tracker_plates_confirmed_total";

/// Confirmed plates forgotten after the lost window.
pub const PLATES_LOST: &str = "plate_tracker_plates_lost_total";

pub const CANDIDATES_TRACKED: &str = "plate_tracker_candidates";
pub const CONFIRMED_TRACKED: &str = "plate_tracker_confirmed";

pub const BATCH_DURATION: &str = "plate_tracker_batch_duration_seconds";

/// Publications delivered to the sink, labeled by `outcome`.
pub const PUBLICATIONS: &str = "plate_tracker_publications_total";
pub const PUBLISH_DURATION: &str = "plate_tracker_publish_duration_seconds";

/// Messages waiting in the dispatcher queue.
pub const PENDING_MESSAGES: &str = "plate_tracker_pending_messages";
