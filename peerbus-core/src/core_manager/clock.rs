//! Manager time source
//!
//! The mode is fixed when the manager is built. Simulated time starts at
//! the given instant and only moves through `advance_to`.

use super::errors::{ManagerError, ManagerResult};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Clock {
    /// Seconds since the Unix epoch, read from the system clock
    Real,
    /// Seconds, driven explicitly
    Simulated(f64),
}

impl Clock {
    pub fn simulated() -> Self {
        Clock::Simulated(0.0)
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Clock::Simulated(_))
    }

    pub fn now(&self) -> f64 {
        match self {
            Clock::Real => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            Clock::Simulated(t) => *t,
        }
    }

    pub fn advance_to(&mut self, to: f64) -> ManagerResult<()> {
        match self {
            Clock::Real => Err(ManagerError::RealTimeClock),
            Clock::Simulated(now) if to < *now => Err(ManagerError::TimeWentBackwards {
                now: *now,
                requested: to,
            }),
            Clock::Simulated(now) => {
                *now = to;
                Ok(())
            }
        }
    }
}
