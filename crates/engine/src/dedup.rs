//! Change-event deduplication with Redis-backed "seen" markers.
//!
//! Every worker replica listens on the same channels, so each event reaches
//! all of them. The first replica to claim an `event_id` processes it; the
//! others drop it. Markers expire after the configured TTL.
//!
//! Uses Redis `SET NX EX` for atomic check-and-set with automatic TTL expiry.

use redis::aio::ConnectionManager;
use uuid::Uuid;

/// Default marker lifetime in seconds (1 hour).
const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Redis-backed event claim.
#[derive(Debug, Clone)]
pub struct EventDeduplicator {
    ttl_seconds: u64,
}

impl Default for EventDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECONDS)
    }
}

impl EventDeduplicator {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds: ttl_seconds.max(1),
        }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Claim `event_id`.
    ///
    /// Returns `true` if this caller is the first to see the event (process it).
    /// Returns `false` if it was already claimed (drop it).
    pub async fn first_seen(
        &self,
        redis: &mut ConnectionManager,
        event_id: Uuid,
    ) -> anyhow::Result<bool> {
        // Some("OK") when the key was set, None when it already existed
        let result: Option<String> = redis::cmd("SET")
            .arg(Self::key(event_id))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(redis)
            .await?;

        let first = result.is_some();
        if !first {
            tracing::debug!(event_id = %event_id, "Duplicate change event dropped");
        }

        Ok(first)
    }

    fn key(event_id: Uuid) -> String {
        format!("taskpush:event:{}", event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let id = Uuid::parse_str("5f0c6f8e-1d2b-4a55-9a7e-0b7c1f2d3e4a").unwrap();
        assert_eq!(
            EventDeduplicator::key(id),
            "taskpush:event:5f0c6f8e-1d2b-4a55-9a7e-0b7c1f2d3e4a"
        );
    }

    #[test]
    fn test_ttl_defaults_and_floor() {
        assert_eq!(EventDeduplicator::default().ttl_seconds(), 3600);
        // EX 0 is rejected by Redis
        assert_eq!(EventDeduplicator::new(0).ttl_seconds(), 1);
    }
}
