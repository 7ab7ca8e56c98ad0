//! Ordered, non-overlapping period sets
//!
//! A [`Tariff`] is a named, validated set of [`Period`]s. Periods are held
//! sorted by decreasing base span, then increasing start, and must be
//! pairwise nested or disjoint; partial overlap of base windows is
//! rejected. Overlap checking compares base windows only and does not
//! expand recurrences, so two periods that only collide in a later
//! recurrence are accepted.

use chrono::{DateTime, Utc};
use url::Host;

use crate::error::{TariffError, TariffResult};
use crate::period::{Occurrence, Period};

/// Named, immutable set of non-overlapping periods
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tariff {
    name: String,
    periods: Vec<Period>,
}

impl Tariff {
    /// Construct a tariff from pre-validated parts.
    ///
    /// Callers must run [`Tariff::validate`] first; invalid input here is a
    /// programming error.
    pub fn new(name: String, periods: Vec<Period>) -> Self {
        debug_assert!(Self::validate(&name, &periods).is_ok());
        Self { name, periods }
    }

    /// Validate a tariff name and an ordered period set
    pub fn validate(name: &str, periods: &[Period]) -> TariffResult<()> {
        validate_name(name)?;

        if periods.is_empty() {
            return Err(TariffError::invalid_tariff("tariff has no periods"));
        }

        for pair in periods.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let ordered = a.span() > b.span()
                || (a.span() == b.span()
                    && a.start().with_timezone(&Utc) < b.start().with_timezone(&Utc));
            if !ordered {
                return Err(TariffError::invalid_tariff(format!(
                    "periods are not sorted by decreasing span then increasing start \
                     (offending pair: {} and {})",
                    a, b
                )));
            }
        }

        for (i, a) in periods.iter().enumerate() {
            for b in &periods[i + 1..] {
                if crosses(a, b) {
                    return Err(TariffError::invalid_tariff(format!(
                        "periods {} and {} partially overlap",
                        a, b
                    )));
                }
            }
        }

        Ok(())
    }

    /// Tariff name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Periods, sorted by decreasing span then increasing start
    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    /// The governing period for `when`: the one whose current occurrence
    /// contains `when` with the shortest span
    pub fn lookup_period(&self, when: DateTime<Utc>) -> Option<&Period> {
        self.lookup(when).map(|(period, _)| period)
    }

    /// The smallest instant strictly after `when` at which
    /// [`Tariff::lookup_period`] changes its answer
    pub fn next_transition(&self, when: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut next: Option<DateTime<Utc>> = None;
        let mut fold = |candidate: DateTime<Utc>| {
            if candidate > when && next.map_or(true, |current| candidate < current) {
                next = Some(candidate);
            }
        };

        if let Some((_, occurrence)) = self.lookup(when) {
            fold(occurrence.end.with_timezone(&Utc));
        }
        for period in &self.periods {
            if let Some(occurrence) = period.next_recurrence(Some(when)) {
                fold(occurrence.start.with_timezone(&Utc));
            }
        }
        next
    }

    /// Governing period and its current occurrence
    fn lookup(&self, when: DateTime<Utc>) -> Option<(&Period, Occurrence)> {
        let mut best: Option<(&Period, Occurrence)> = None;
        for period in &self.periods {
            if let Some(occurrence) = period.contains(when) {
                let shorter = best
                    .as_ref()
                    .map_or(true, |(_, current)| occurrence.span() < current.span());
                if shorter {
                    best = Some((period, occurrence));
                }
            }
        }
        best
    }
}

/// Tariff names double as file and service identifiers, so they must be
/// valid internationalized hostnames with no path separators.
fn validate_name(name: &str) -> TariffResult<()> {
    if name.is_empty() {
        return Err(TariffError::invalid_tariff("tariff name is empty"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(TariffError::invalid_tariff(format!(
            "tariff name {:?} contains a path separator",
            name
        )));
    }
    match Host::parse(name) {
        Ok(_) => Ok(()),
        Err(err) => Err(TariffError::invalid_tariff(format!(
            "tariff name {:?} is not a valid hostname: {}",
            name, err
        ))),
    }
}

/// True if the base windows of `a` and `b` partially overlap: neither
/// nested one way or the other, nor disjoint. Identical windows cross too,
/// which keeps lookup results unique.
fn crosses(a: &Period, b: &Period) -> bool {
    let (a_start, a_end) = (a.start().with_timezone(&Utc), a.end().with_timezone(&Utc));
    let (b_start, b_end) = (b.start().with_timezone(&Utc), b.end().with_timezone(&Utc));

    if a_start == b_start && a_end == b_end {
        return true;
    }
    let a_in_b = b_start <= a_start && a_end <= b_end;
    let b_in_a = a_start <= b_start && b_end <= a_end;
    let disjoint = a_end <= b_start || b_end <= a_start;
    !(a_in_b || b_in_a || disjoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::{RepeatType, CAPACITY_UNLIMITED};
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn instant(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn period(start: &str, end: &str, capacity: u64) -> Period {
        Period::new(
            instant(start).with_timezone(&Tz::UTC),
            instant(end).with_timezone(&Tz::UTC),
            RepeatType::None,
            0,
            capacity,
        )
        .unwrap()
    }

    fn weekly(start: &str, end: &str, capacity: u64) -> Period {
        Period::new(
            instant(start).with_timezone(&Tz::UTC),
            instant(end).with_timezone(&Tz::UTC),
            RepeatType::Week,
            1,
            capacity,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_name_rules() {
        let periods = vec![period("2018-01-01T00:00:00Z", "2018-01-02T00:00:00Z", 0)];
        assert!(Tariff::validate("variable-data-cap", &periods).is_ok());
        assert!(Tariff::validate("", &periods).is_err());
        assert!(Tariff::validate("night/rate", &periods).is_err());
        assert!(Tariff::validate("night\\rate", &periods).is_err());
        assert!(Tariff::validate("not a hostname", &periods).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_period_set() {
        assert!(matches!(
            Tariff::validate("empty", &[]),
            Err(TariffError::InvalidTariff(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unsorted_periods() {
        // Shorter period first: wrong order.
        let periods = vec![
            period("2018-01-01T00:00:00Z", "2018-01-01T06:00:00Z", 0),
            period("2018-01-01T00:00:00Z", "2018-01-02T00:00:00Z", 0),
        ];
        assert!(Tariff::validate("unsorted", &periods).is_err());
    }

    #[test]
    fn test_validate_rejects_partial_overlap() {
        let periods = vec![
            period("2018-01-01T00:00:00Z", "2018-01-01T12:00:00Z", 0),
            period("2018-01-01T06:00:00Z", "2018-01-01T16:00:00Z", 0),
        ];
        let err = Tariff::validate("crossing", &periods).unwrap_err();
        assert!(matches!(err, TariffError::InvalidTariff(_)));
    }

    #[test]
    fn test_validate_rejects_duplicate_window() {
        let periods = vec![
            period("2018-01-01T00:00:00Z", "2018-01-01T12:00:00Z", 0),
            period("2018-01-01T00:00:00Z", "2018-01-01T12:00:00Z", 1),
        ];
        assert!(Tariff::validate("duplicate", &periods).is_err());
    }

    #[test]
    fn test_validate_accepts_nested_and_disjoint() {
        let periods = vec![
            period("2018-01-01T00:00:00Z", "2018-01-02T00:00:00Z", CAPACITY_UNLIMITED),
            period("2018-01-01T06:00:00Z", "2018-01-01T12:00:00Z", 0),
            period("2018-01-03T00:00:00Z", "2018-01-03T04:00:00Z", 0),
        ];
        assert!(Tariff::validate("nested", &periods).is_ok());
    }

    #[test]
    fn test_lookup_returns_shortest_enclosing_period() {
        // A day-long outer window with a six-hour restricted inner window.
        let outer = weekly(
            "2018-01-01T00:00:00Z",
            "2018-01-02T00:00:00Z",
            CAPACITY_UNLIMITED,
        );
        let inner = weekly("2018-01-01T06:00:00Z", "2018-01-01T12:00:00Z", 0);
        let tariff = Tariff::new("nested".to_string(), vec![outer, inner]);

        let governing = tariff.lookup_period(instant("2018-01-01T08:00:00Z")).unwrap();
        assert_eq!(governing.capacity_limit(), 0);

        let governing = tariff.lookup_period(instant("2018-01-01T02:00:00Z")).unwrap();
        assert_eq!(governing.capacity_limit(), CAPACITY_UNLIMITED);

        assert!(tariff
            .lookup_period(instant("2018-01-03T00:00:00Z"))
            .is_none());
    }

    #[test]
    fn test_next_transition_inside_and_outside_periods() {
        let outer = weekly(
            "2018-01-01T00:00:00Z",
            "2018-01-02T00:00:00Z",
            CAPACITY_UNLIMITED,
        );
        let inner = weekly("2018-01-01T06:00:00Z", "2018-01-01T12:00:00Z", 0);
        let tariff = Tariff::new("nested".to_string(), vec![outer, inner]);

        // In the outer window, the next change is the inner window opening.
        assert_eq!(
            tariff.next_transition(instant("2018-01-01T02:00:00Z")),
            Some(instant("2018-01-01T06:00:00Z"))
        );
        // In the inner window, the next change is the inner window closing.
        assert_eq!(
            tariff.next_transition(instant("2018-01-01T08:00:00Z")),
            Some(instant("2018-01-01T12:00:00Z"))
        );
        // Outside all windows, the next change is the next recurrence.
        assert_eq!(
            tariff.next_transition(instant("2018-01-03T00:00:00Z")),
            Some(instant("2018-01-08T00:00:00Z"))
        );
    }

    #[test]
    fn test_next_transition_none_after_final_occurrence() {
        let once = period("2018-01-01T00:00:00Z", "2018-01-02T00:00:00Z", 0);
        let tariff = Tariff::new("single".to_string(), vec![once]);
        assert_eq!(tariff.next_transition(instant("2018-02-01T00:00:00Z")), None);
        // Inside the only occurrence the transition is its end.
        assert_eq!(
            tariff.next_transition(instant("2018-01-01T12:00:00Z")),
            Some(instant("2018-01-02T00:00:00Z"))
        );
    }

    #[test]
    fn test_lookup_at_utc_instant_with_zoned_periods() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let start = tz.with_ymd_and_hms(2018, 6, 1, 22, 0, 0).unwrap();
        let end = tz.with_ymd_and_hms(2018, 6, 2, 6, 0, 0).unwrap();
        let night = Period::new(start, end, RepeatType::Day, 1, 0).unwrap();
        let tariff = Tariff::new("overnight".to_string(), vec![night]);

        // 02:00 UTC is 22:00 the previous evening in New York.
        assert!(tariff
            .lookup_period(instant("2018-06-02T02:00:00Z"))
            .is_some());
        assert!(tariff
            .lookup_period(instant("2018-06-02T18:00:00Z"))
            .is_none());
    }
}
