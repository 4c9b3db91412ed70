use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

use super::regions::Region;

/// Time of the last capture, on the monotonic clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureState {
    pub last_capture: Option<Instant>,
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    /// Nothing captured yet.
    Idle,
    /// A capture happened; further captures wait for the interval.
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureReason {
    /// The first frame of the stream only seeded the reference.
    ReferenceInitialized,
    NoMotion,
    /// Motion with no capture on record.
    Motion,
    /// Motion after the cooldown ran out.
    CooldownElapsed,
    /// Motion, but the previous capture is too recent.
    Cooldown { remaining: Duration },
}

impl fmt::Display for CaptureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReferenceInitialized => f.write_str("reference initialized"),
            Self::NoMotion => f.write_str("no motion"),
            Self::Motion => f.write_str("motion detected"),
            Self::CooldownElapsed => f.write_str("motion detected, cooldown elapsed"),
            Self::Cooldown { remaining } => {
                write!(f, "cooldown, remaining = {:.1}s", remaining.as_secs_f64())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDecision {
    pub should_capture: bool,
    pub regions: Vec<Region>,
    pub reason: CaptureReason,
}

impl CaptureDecision {
    pub fn skip(regions: Vec<Region>, reason: CaptureReason) -> Self {
        Self {
            should_capture: false,
            regions,
            reason,
        }
    }

    pub fn motion_present(&self) -> bool {
        !self.regions.is_empty()
    }
}

/// Debounces captures so persistent motion yields at most one capture per
/// `interval`. Frames without regions never touch the state.
#[derive(Debug)]
pub struct CaptureGate {
    interval: Duration,
    state: CaptureState,
}

impl CaptureGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: CaptureState::default(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    #[cfg(test)]
    pub fn phase(&self) -> GatePhase {
        match self.state.last_capture {
            None => GatePhase::Idle,
            Some(_) => GatePhase::Cooldown,
        }
    }

    pub fn evaluate(&mut self, regions: Vec<Region>, now: Instant) -> CaptureDecision {
        if regions.is_empty() {
            return CaptureDecision::skip(regions, CaptureReason::NoMotion);
        }

        let reason = match self.state.last_capture {
            None => CaptureReason::Motion,
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                if elapsed < self.interval {
                    let remaining = self.interval - elapsed;
                    debug!(
                        remaining_secs = format!("{:.1}", remaining.as_secs_f64()),
                        "motion during cooldown"
                    );
                    return CaptureDecision::skip(regions, CaptureReason::Cooldown { remaining });
                }
                CaptureReason::CooldownElapsed
            }
        };

        self.state.last_capture = Some(now);
        CaptureDecision {
            should_capture: true,
            regions,
            reason,
        }
    }
}
