use crate::types::{BathyError, BathyResult};
use std::time::{Duration, Instant};

/// Cooperative per-granule time limit, polled at safe points by long-running loops
#[derive(Debug, Clone)]
pub struct Deadline {
    granule: String,
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn new(granule: impl Into<String>, limit: Option<Duration>) -> Self {
        Self {
            granule: granule.into(),
            started: Instant::now(),
            limit,
        }
    }

    /// A deadline that never expires
    pub fn unlimited(granule: impl Into<String>) -> Self {
        Self::new(granule, None)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.limit.map_or(false, |limit| self.started.elapsed() >= limit)
    }

    pub fn check(&self) -> BathyResult<()> {
        match self.limit {
            Some(limit) if self.is_expired() => Err(BathyError::Timeout {
                granule: self.granule.clone(),
                limit,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_expiry() {
        assert!(Deadline::unlimited("g").check().is_ok());
        let expired = Deadline::new("g", Some(Duration::ZERO));
        assert!(expired.is_expired());
        assert!(matches!(expired.check(), Err(BathyError::Timeout { ref granule, .. }) if granule == "g"));
        assert!(Deadline::new("g", Some(Duration::from_secs(3600))).check().is_ok());
    }

    #[test]
    fn test_elapsed_grows_without_expiring_unlimited() {
        let deadline = Deadline::unlimited("g");
        let first = deadline.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        assert!(deadline.elapsed() > first);
        assert!(!deadline.is_expired());
    }
}
