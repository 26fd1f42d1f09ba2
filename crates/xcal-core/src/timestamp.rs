//! Clock domains and timestamp reconciliation.
//!
//! One device stamps frames with wall-clock epoch nanoseconds, the other with
//! nanoseconds since its stream started. A [`ClockOffset`] measured once at
//! session start bridges the relative axis onto the absolute one so pair
//! skew can be reported. Reconciled times are diagnostics only.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockDomain {
    /// Nanoseconds since the Unix epoch.
    Absolute,
    /// Nanoseconds since the device's stream started.
    Relative,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub nanos: i64,
    pub domain: ClockDomain,
}

impl Timestamp {
    pub fn absolute(nanos: i64) -> Self {
        Self {
            nanos,
            domain: ClockDomain::Absolute,
        }
    }

    pub fn relative(nanos: i64) -> Self {
        Self {
            nanos,
            domain: ClockDomain::Relative,
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.domain == ClockDomain::Absolute
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.domain {
            ClockDomain::Absolute => write!(f, "{} ns (epoch, {} UTC)", self.nanos, format_hms(*self)),
            ClockDomain::Relative => write!(f, "{} ns (+{})", self.nanos, format_hms(*self)),
        }
    }
}

/// Signed shift taking a relative clock onto the absolute axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClockOffset {
    pub nanos: i64,
}

/// Offset that maps `local` onto `reference` when both were taken at the same
/// instant.
pub fn offset(reference: Timestamp, local: Timestamp) -> ClockOffset {
    ClockOffset {
        nanos: reference.nanos - local.nanos,
    }
}

/// Express `local` on the absolute axis. Absolute inputs pass through.
pub fn to_reference(local: Timestamp, offset: ClockOffset) -> Timestamp {
    match local.domain {
        ClockDomain::Absolute => local,
        ClockDomain::Relative => Timestamp::absolute(local.nanos + offset.nanos),
    }
}

/// `HH:MM:SS.nnnnnnnnn`; time of day (UTC) for absolute stamps, elapsed time
/// for relative ones.
pub fn format_hms(ts: Timestamp) -> String {
    const NS_PER_SEC: i64 = 1_000_000_000;
    let sign = if ts.nanos < 0 { "-" } else { "" };
    let total = ts.nanos.unsigned_abs();
    let secs = total / NS_PER_SEC as u64;
    let frac = total % NS_PER_SEC as u64;
    let secs = match ts.domain {
        ClockDomain::Absolute => secs % 86_400,
        ClockDomain::Relative => secs,
    };
    format!(
        "{sign}{:02}:{:02}:{:02}.{:09}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        frac
    )
}

/// Tracks the clock offset of a session and reports per-pair skew.
#[derive(Clone, Debug, Default)]
pub struct TimestampReconciler {
    offset: Option<ClockOffset>,
}

impl TimestampReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(offset: ClockOffset) -> Self {
        Self {
            offset: Some(offset),
        }
    }

    pub fn offset(&self) -> Option<ClockOffset> {
        self.offset
    }

    /// Absolute difference between the two capture instants.
    ///
    /// When exactly one stamp is relative and no offset is known yet, the
    /// offset is taken from this pair (its skew is therefore zero). Two
    /// relative stamps share no axis and give `None`.
    pub fn skew(&mut self, a: Timestamp, b: Timestamp) -> Option<Duration> {
        let (a, b) = match (a.domain, b.domain) {
            (ClockDomain::Absolute, ClockDomain::Absolute) => (a, b),
            (ClockDomain::Relative, ClockDomain::Relative) => return None,
            (ClockDomain::Absolute, ClockDomain::Relative) => {
                let off = *self.offset.get_or_insert_with(|| offset(a, b));
                (a, to_reference(b, off))
            }
            (ClockDomain::Relative, ClockDomain::Absolute) => {
                let off = *self.offset.get_or_insert_with(|| offset(b, a));
                (to_reference(a, off), b)
            }
        };
        Some(Duration::from_nanos(a.nanos.abs_diff(b.nanos)))
    }
}

/// Time between two stamps of the same clock.
pub fn span(first: Timestamp, last: Timestamp) -> Duration {
    Duration::from_nanos(last.nanos.abs_diff(first.nanos))
}

/// First/last stamps of a recorded stream and derived rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamSpan {
    pub first: Timestamp,
    pub last: Timestamp,
    pub frames: u64,
}

impl StreamSpan {
    pub fn start(first: Timestamp) -> Self {
        Self {
            first,
            last: first,
            frames: 1,
        }
    }

    pub fn push(&mut self, ts: Timestamp) {
        self.last = ts;
        self.frames += 1;
    }

    pub fn duration(&self) -> Duration {
        span(self.first, self.last)
    }

    /// Mean frame rate over the span, `None` for fewer than two frames.
    pub fn mean_fps(&self) -> Option<f64> {
        let secs = self.duration().as_secs_f64();
        if self.frames < 2 || secs <= 0.0 {
            return None;
        }
        Some((self.frames - 1) as f64 / secs)
    }
}
