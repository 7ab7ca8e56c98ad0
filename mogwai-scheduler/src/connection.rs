//! Connection telemetry interface
//!
//! The scheduler treats the host's connection tracker as an observable
//! collection of [`ConnectionDetails`]. Production backends wrap the
//! platform network daemon; tests use
//! [`DummyConnectionMonitor`](crate::testing::DummyConnectionMonitor).

use chrono::{DateTime, Utc};
use mogwai_tariff::Tariff;

use crate::signal::HandlerId;

/// Whether a connection is metered, as far as the host can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metered {
    /// No information; treated as metered out of caution
    Unknown,
    /// Known to be metered
    Yes,
    /// Known to be unmetered
    No,
    /// Heuristically assumed metered
    GuessYes,
    /// Heuristically assumed unmetered
    GuessNo,
}

impl Metered {
    /// Whether scheduling policy must treat the connection as metered
    pub fn treat_as_metered(self) -> bool {
        !matches!(self, Metered::No | Metered::GuessNo)
    }
}

/// Identifier of one active connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Wrap a backend connection identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling-relevant state of one connection, polled each reschedule
#[derive(Debug, Clone)]
pub struct ConnectionDetails {
    /// Metered status
    pub metered: Metered,
    /// Whether the user allows large downloads on this connection at all
    pub allow_downloads: bool,
    /// Whether the user allows downloads while the connection is metered
    pub allow_downloads_when_metered: bool,
    /// Tariff governing the connection, if any
    pub tariff: Option<Tariff>,
}

impl Default for ConnectionDetails {
    /// Safe, unmetered defaults; used when a backend cannot report details
    fn default() -> Self {
        Self {
            metered: Metered::GuessNo,
            allow_downloads: true,
            allow_downloads_when_metered: false,
            tariff: None,
        }
    }
}

impl ConnectionDetails {
    /// Whether downloads may proceed over this connection at `now`: the
    /// user allows downloads, the connection is not metered (or metered
    /// use is allowed), and any governing tariff period has capacity.
    pub fn safe_for_downloads(&self, now: DateTime<Utc>) -> bool {
        if !self.allow_downloads {
            return false;
        }
        if self.metered.treat_as_metered() && !self.allow_downloads_when_metered {
            return false;
        }
        match &self.tariff {
            None => true,
            Some(tariff) => match tariff.lookup_period(now) {
                None => true,
                Some(period) => period.capacity_limit() > 0,
            },
        }
    }
}

/// Delta payload of the connections-changed signal
#[derive(Debug, Clone, Default)]
pub struct ConnectionsChanged {
    /// Connections that appeared
    pub added: Vec<ConnectionId>,
    /// Connections that disappeared
    pub removed: Vec<ConnectionId>,
}

/// Observable view of the host's active connections
pub trait ConnectionMonitor: Send + Sync {
    /// Identifiers of all active connections; stable within one dispatch
    /// tick
    fn connection_ids(&self) -> Vec<ConnectionId>;

    /// Details for one connection, or `None` if it vanished since
    /// [`connection_ids`](ConnectionMonitor::connection_ids)
    fn connection_details(&self, id: &ConnectionId) -> Option<ConnectionDetails>;

    /// Subscribe to connection arrival/departure
    fn connect_connections_changed(
        &self,
        handler: Box<dyn Fn(&ConnectionsChanged) + Send + Sync>,
    ) -> HandlerId;

    /// Unsubscribe a connections-changed handler
    fn disconnect_connections_changed(&self, id: HandlerId);

    /// Subscribe to per-connection detail changes
    fn connect_connection_details_changed(
        &self,
        handler: Box<dyn Fn(&ConnectionId) + Send + Sync>,
    ) -> HandlerId;

    /// Unsubscribe a details-changed handler
    fn disconnect_connection_details_changed(&self, id: HandlerId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;
    use mogwai_tariff::{Period, RepeatType, TariffBuilder};

    fn capacity_zero_tariff() -> Tariff {
        let mut builder = TariffBuilder::new();
        builder.set_name("forbidden-overnight").add_period(
            Period::new(
                Tz::UTC.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
                Tz::UTC.with_ymd_and_hms(2018, 1, 1, 6, 0, 0).unwrap(),
                RepeatType::Day,
                1,
                0,
            )
            .unwrap(),
        );
        builder.build().unwrap()
    }

    #[test]
    fn test_default_details_are_safe() {
        let details = ConnectionDetails::default();
        assert!(details.safe_for_downloads(Utc::now()));
    }

    #[test]
    fn test_metered_connection_requires_opt_in() {
        let mut details = ConnectionDetails {
            metered: Metered::GuessYes,
            ..Default::default()
        };
        assert!(!details.safe_for_downloads(Utc::now()));
        details.allow_downloads_when_metered = true;
        assert!(details.safe_for_downloads(Utc::now()));

        // Unknown is conservatively metered.
        details.metered = Metered::Unknown;
        details.allow_downloads_when_metered = false;
        assert!(!details.safe_for_downloads(Utc::now()));
    }

    #[test]
    fn test_user_veto_wins() {
        let details = ConnectionDetails {
            allow_downloads: false,
            ..Default::default()
        };
        assert!(!details.safe_for_downloads(Utc::now()));
    }

    #[test]
    fn test_capacity_zero_period_forbids() {
        let details = ConnectionDetails {
            tariff: Some(capacity_zero_tariff()),
            ..Default::default()
        };
        let inside = Utc.with_ymd_and_hms(2018, 3, 5, 3, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2018, 3, 5, 12, 0, 0).unwrap();
        assert!(!details.safe_for_downloads(inside));
        assert!(details.safe_for_downloads(outside));
    }
}
