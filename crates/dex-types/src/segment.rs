use chrono::{DateTime, Duration, Utc};

/// Length of one scheduling quantum. Work enqueued within the same segment
/// is drained by the same main-loop tick, which is what lets a burst of
/// enqueues fuse into a single batched transaction.
pub const SEGMENT_MS: i64 = 100;

/// Upper bound on how far into the future a single item may be scheduled.
/// Chosen generously; it exists only to keep a mistyped `run_at` from
/// pinning a segment index decades out.
pub const MAX_SCHEDULE_HORIZON: Duration = Duration::days(365);

/// A discrete point on the scheduling grid: `floor(unix_ms / SEGMENT_MS)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Segment(pub u64);

impl Segment {
    pub fn succ(self) -> Self {
        Segment(self.0 + 1)
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "seg({})", self.0)
    }
}

/// Quantize a timestamp to its segment, clamping negative (pre-epoch) inputs to 0.
pub fn to_segment(t: DateTime<Utc>) -> Segment {
    let ms = t.timestamp_millis();
    Segment((ms.max(0) / SEGMENT_MS) as u64)
}

/// The wall-clock time at which a segment begins.
pub fn from_segment(s: Segment) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(s.0 as i64 * SEGMENT_MS).unwrap_or_else(Utc::now)
}

/// The segment containing `now()`.
pub fn current_segment() -> Segment {
    to_segment(Utc::now())
}

/// The segment immediately following `current_segment()`.
pub fn next_segment() -> Segment {
    current_segment().succ()
}

/// Clamp a requested run time into `[now, now + MAX_SCHEDULE_HORIZON]`.
pub fn clamp_run_at(requested: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    let horizon = now + MAX_SCHEDULE_HORIZON;
    requested.clamp(now, horizon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_round_trip_is_monotonic() {
        let t0 = Utc::now();
        let s0 = to_segment(t0);
        let t1 = t0 + Duration::milliseconds(SEGMENT_MS * 3);
        let s1 = to_segment(t1);
        assert!(s1.0 >= s0.0 + 2);
    }

    #[test]
    fn from_segment_is_segment_aligned() {
        let s = Segment(12345);
        let t = from_segment(s);
        assert_eq!(t.timestamp_millis() % SEGMENT_MS, 0);
        assert_eq!(to_segment(t), s);
    }

    #[test]
    fn clamp_run_at_never_goes_past_horizon() {
        let far_future = Utc::now() + Duration::days(3650);
        let clamped = clamp_run_at(far_future);
        assert!(clamped <= Utc::now() + MAX_SCHEDULE_HORIZON + Duration::seconds(1));
    }

    #[test]
    fn clamp_run_at_never_goes_before_now() {
        let past = Utc::now() - Duration::days(1);
        let clamped = clamp_run_at(past);
        assert!(clamped >= Utc::now() - Duration::seconds(1));
    }
}
