//! Metric names and recorders for the hub.
//!
//! Recording goes through the `metrics` facade; nothing is exported unless
//! the process installs a recorder.

use metrics::{counter, histogram};

/// Metric names.
pub mod names {
    pub const ROOMS_CREATED_TOTAL: &str = "parley_rooms_created_total";
    pub const CLIENTS_ATTACHED_TOTAL: &str = "parley_clients_attached_total";
    pub const MESSAGES_INBOUND_TOTAL: &str = "parley_messages_inbound_total";
    pub const FANOUT_RECIPIENTS: &str = "parley_fanout_recipients";
    pub const FRAMES_WRITTEN_TOTAL: &str = "parley_frames_written_total";
    pub const FRAMES_WRITTEN_BYTES: &str = "parley_frames_written_bytes";
    pub const SLOW_CONSUMERS_TOTAL: &str = "parley_slow_consumers_total";
    pub const ABNORMAL_CLOSES_TOTAL: &str = "parley_abnormal_closes_total";
}

pub(crate) fn record_room_created() {
    counter!(names::ROOMS_CREATED_TOTAL).increment(1);
}

pub(crate) fn record_client_attached() {
    counter!(names::CLIENTS_ATTACHED_TOTAL).increment(1);
}

pub(crate) fn record_inbound_message() {
    counter!(names::MESSAGES_INBOUND_TOTAL).increment(1);
}

pub(crate) fn record_fanout(recipients: usize) {
    histogram!(names::FANOUT_RECIPIENTS).record(recipients as f64);
}

pub(crate) fn record_frame_written(bytes: usize) {
    counter!(names::FRAMES_WRITTEN_TOTAL).increment(1);
    counter!(names::FRAMES_WRITTEN_BYTES).increment(bytes as u64);
}

pub(crate) fn record_slow_consumer() {
    counter!(names::SLOW_CONSUMERS_TOTAL).increment(1);
}

pub(crate) fn record_abnormal_close(reason: &'static str) {
    counter!(names::ABNORMAL_CLOSES_TOTAL, "reason" => reason).increment(1);
}
