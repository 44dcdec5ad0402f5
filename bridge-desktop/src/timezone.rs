//! Timezone Resolution

use bridge_traits::{
    error::{BridgeError, Result},
    time::TimezoneProvider,
};
use chrono::{DateTime, FixedOffset, Local, Offset, TimeZone, Utc};
use chrono_tz::Tz;

/// Operating system timezone
///
/// Re-reads the local zone on every call, so a user changing the system
/// timezone is picked up at the next check.
#[derive(Debug, Clone, Default)]
pub struct SystemTimezone;

impl SystemTimezone {
    pub fn new() -> Self {
        Self
    }
}

impl TimezoneProvider for SystemTimezone {
    fn offset_at(&self, instant: DateTime<Utc>) -> Result<FixedOffset> {
        Ok(Local.offset_from_utc_datetime(&instant.naive_utc()).fix())
    }

    fn zone_name(&self) -> Option<String> {
        std::env::var("TZ").ok().filter(|name| !name.is_empty())
    }
}

/// IANA named timezone backed by the `chrono-tz` database
///
/// Resolves daylight saving transitions exactly, which makes it the provider
/// of choice for DST scenarios and for hosts that report a zone name.
#[derive(Debug, Clone, Copy)]
pub struct NamedTimezone {
    tz: Tz,
}

impl NamedTimezone {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Parse an IANA name such as `America/New_York`
    pub fn parse(name: &str) -> Result<Self> {
        name.parse::<Tz>()
            .map(Self::new)
            .map_err(|e| BridgeError::NotAvailable(format!("Unknown timezone {}: {}", name, e)))
    }
}

impl TimezoneProvider for NamedTimezone {
    fn offset_at(&self, instant: DateTime<Utc>) -> Result<FixedOffset> {
        Ok(self.tz.offset_from_utc_datetime(&instant.naive_utc()).fix())
    }

    fn zone_name(&self) -> Option<String> {
        Some(self.tz.name().to_string())
    }
}
