use crate::error::RelayError;
use crate::log::frame::MAX_FRAME_BODY_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// fsync after every append; an acknowledged offset survives power loss.
    Full,
    /// Leave flushing to the OS page cache.
    OsBuffered,
}

/// Runtime configuration for a relay service.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub durability_mode: DurabilityMode,
    /// How long the dispatcher waits on an idle input log before rechecking.
    pub poll_interval_ms: u64,
    /// Upper bound on one encoded record payload.
    pub max_record_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            durability_mode: DurabilityMode::Full,
            poll_interval_ms: 10,
            max_record_bytes: 16 * 1024 * 1024,
        }
    }
}

impl RelayConfig {
    pub fn production() -> Self {
        Self {
            durability_mode: DurabilityMode::Full,
            ..Self::default()
        }
    }

    pub fn development() -> Self {
        Self {
            durability_mode: DurabilityMode::OsBuffered,
            poll_interval_ms: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.max_record_bytes == 0 {
            return Err(RelayError::InvalidConfig {
                message: "max_record_bytes must be positive".into(),
            });
        }
        if self.max_record_bytes > MAX_FRAME_BODY_BYTES {
            return Err(RelayError::InvalidConfig {
                message: format!(
                    "max_record_bytes {} exceeds frame limit {}",
                    self.max_record_bytes, MAX_FRAME_BODY_BYTES
                ),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(RelayError::InvalidConfig {
                message: "poll_interval_ms must be positive".into(),
            });
        }
        Ok(())
    }
}
