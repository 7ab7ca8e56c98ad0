//! Recurring time windows with capacity limits
//!
//! A [`Period`] is one recurring wall-clock window `[start, end)` with a
//! capacity limit in bytes. Recurrence arithmetic is done on the wall-clock
//! fields of the endpoints in the endpoint's own time zone, so a window
//! pinned to 01:30 local time stays at 01:30 local time across DST
//! transitions. A recurrence whose endpoint lands on a nonexistent local
//! time (spring-forward hole) is skipped; month recurrences that land in a
//! shorter month clamp to the month's last valid day.

use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{TariffError, TariffResult};

/// Recurrence sequences terminate at the end of this calendar year.
const MAX_YEAR: i32 = 9999;

/// Upper bound on the candidate scan in [`Period::contains`] and
/// [`Period::next_recurrence`]. The initial estimate is accurate to within
/// a couple of units, so the scan settles long before this.
const SCAN_LIMIT: u32 = 32;

/// Capacity limit meaning "no limit".
pub const CAPACITY_UNLIMITED: u64 = u64::MAX;

/// Calendar unit a period recurs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepeatType {
    /// No recurrence; the base window is the only occurrence
    None,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl RepeatType {
    /// Wire representation (stable, part of the tariff file format)
    pub fn to_wire(self) -> u16 {
        match self {
            RepeatType::None => 0,
            RepeatType::Hour => 1,
            RepeatType::Day => 2,
            RepeatType::Week => 3,
            RepeatType::Month => 4,
            RepeatType::Year => 5,
        }
    }

    /// Parse the wire representation
    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            0 => Some(RepeatType::None),
            1 => Some(RepeatType::Hour),
            2 => Some(RepeatType::Day),
            3 => Some(RepeatType::Week),
            4 => Some(RepeatType::Month),
            5 => Some(RepeatType::Year),
            _ => None,
        }
    }
}

impl std::fmt::Display for RepeatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RepeatType::None => "none",
            RepeatType::Hour => "hour",
            RepeatType::Day => "day",
            RepeatType::Week => "week",
            RepeatType::Month => "month",
            RepeatType::Year => "year",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for RepeatType {
    type Err = TariffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(RepeatType::None),
            "hour" => Ok(RepeatType::Hour),
            "day" => Ok(RepeatType::Day),
            "week" => Ok(RepeatType::Week),
            "month" => Ok(RepeatType::Month),
            "year" => Ok(RepeatType::Year),
            other => Err(TariffError::invalid_period(format!(
                "unknown repeat type {:?}",
                other
            ))),
        }
    }
}

/// One concrete `[start, end)` interval produced by a recurrence rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    /// Inclusive start of the interval
    pub start: DateTime<Tz>,
    /// Exclusive end of the interval
    pub end: DateTime<Tz>,
}

impl Occurrence {
    /// Absolute span of the interval
    pub fn span(&self) -> Duration {
        self.end.with_timezone(&Utc) - self.start.with_timezone(&Utc)
    }

    /// Whether `when` falls within `[start, end)`, compared by instant
    pub fn contains(&self, when: DateTime<Utc>) -> bool {
        self.start.with_timezone(&Utc) <= when && when < self.end.with_timezone(&Utc)
    }
}

/// One recurring time window with a capacity limit
///
/// Immutable after construction; [`Period::new`] validates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    start: DateTime<Tz>,
    end: DateTime<Tz>,
    repeat_type: RepeatType,
    repeat_period: u32,
    capacity_limit: u64,
}

impl Period {
    /// Create a new period, validating the window and recurrence rule
    pub fn new(
        start: DateTime<Tz>,
        end: DateTime<Tz>,
        repeat_type: RepeatType,
        repeat_period: u32,
        capacity_limit: u64,
    ) -> TariffResult<Self> {
        Self::validate(&start, &end, repeat_type, repeat_period)?;
        Ok(Self {
            start,
            end,
            repeat_type,
            repeat_period,
            capacity_limit,
        })
    }

    /// Validate a candidate period without constructing it
    pub fn validate(
        start: &DateTime<Tz>,
        end: &DateTime<Tz>,
        repeat_type: RepeatType,
        repeat_period: u32,
    ) -> TariffResult<()> {
        if end.with_timezone(&Utc) <= start.with_timezone(&Utc) {
            return Err(TariffError::invalid_period(format!(
                "end ({}) must be after start ({})",
                end, start
            )));
        }
        // A non-recurring period carries no repeat count, and vice versa.
        if (repeat_type == RepeatType::None) != (repeat_period == 0) {
            return Err(TariffError::invalid_period(format!(
                "repeat type {} is inconsistent with repeat period {}",
                repeat_type, repeat_period
            )));
        }
        Ok(())
    }

    /// Inclusive start of the base window
    pub fn start(&self) -> &DateTime<Tz> {
        &self.start
    }

    /// Exclusive end of the base window
    pub fn end(&self) -> &DateTime<Tz> {
        &self.end
    }

    /// Recurrence unit
    pub fn repeat_type(&self) -> RepeatType {
        self.repeat_type
    }

    /// Number of recurrence units between occurrences (0 iff non-recurring)
    pub fn repeat_period(&self) -> u32 {
        self.repeat_period
    }

    /// Capacity limit in bytes; [`CAPACITY_UNLIMITED`] means no limit and 0
    /// means downloads are forbidden during the period
    pub fn capacity_limit(&self) -> u64 {
        self.capacity_limit
    }

    /// Absolute span of the base window
    pub fn span(&self) -> Duration {
        self.end.with_timezone(&Utc) - self.start.with_timezone(&Utc)
    }

    /// The unique occurrence `[s, e)` with `s <= when < e`, if any
    pub fn contains(&self, when: DateTime<Utc>) -> Option<Occurrence> {
        if self.repeat_type == RepeatType::None {
            let base = self.base_occurrence();
            return base.contains(when).then_some(base);
        }

        let mut n = self.estimate_index(when).saturating_sub(2).max(0);
        for _ in 0..SCAN_LIMIT {
            match self.occurrence(n) {
                Some(occ) => {
                    if when < occ.start.with_timezone(&Utc) {
                        // Occurrences are ordered; an earlier one would
                        // already have matched.
                        return None;
                    }
                    if occ.contains(when) {
                        return Some(occ);
                    }
                }
                None => {
                    // Distinguish a skipped occurrence (DST hole, empty
                    // window) from running off the end of the calendar.
                    if self.naive_start(n).is_none() {
                        return None;
                    }
                }
            }
            n += 1;
        }
        None
    }

    /// The earliest occurrence strictly after `when`, or the base window if
    /// `when` is `None`. Returns `None` once the recurrence sequence has
    /// terminated at the end of the representable calendar range.
    pub fn next_recurrence(&self, when: Option<DateTime<Utc>>) -> Option<Occurrence> {
        let when = match when {
            None => return Some(self.base_occurrence()),
            Some(when) => when,
        };

        if self.repeat_type == RepeatType::None {
            let base = self.base_occurrence();
            return (base.start.with_timezone(&Utc) > when).then_some(base);
        }

        let mut n = self.estimate_index(when).saturating_sub(2).max(0);
        for _ in 0..SCAN_LIMIT {
            match self.occurrence(n) {
                Some(occ) => {
                    if occ.start.with_timezone(&Utc) > when {
                        return Some(occ);
                    }
                }
                None => {
                    if self.naive_start(n).is_none() {
                        return None;
                    }
                }
            }
            n += 1;
        }
        None
    }

    /// The n-th occurrence, or `None` if it is skipped (an endpoint falls
    /// in a DST hole or the window collapses) or past the calendar range
    fn occurrence(&self, n: i64) -> Option<Occurrence> {
        let start = resolve_local(&self.start.timezone(), self.naive_start(n)?)?;
        let end = resolve_local(&self.end.timezone(), self.naive_end(n)?)?;
        if end.with_timezone(&Utc) <= start.with_timezone(&Utc) {
            return None;
        }
        Some(Occurrence { start, end })
    }

    fn base_occurrence(&self) -> Occurrence {
        Occurrence {
            start: self.start.clone(),
            end: self.end.clone(),
        }
    }

    /// Wall-clock start of the n-th occurrence, before time zone resolution
    fn naive_start(&self, n: i64) -> Option<NaiveDateTime> {
        advance_wall_clock(
            self.start.naive_local(),
            self.repeat_type,
            n * i64::from(self.repeat_period),
        )
    }

    fn naive_end(&self, n: i64) -> Option<NaiveDateTime> {
        advance_wall_clock(
            self.end.naive_local(),
            self.repeat_type,
            n * i64::from(self.repeat_period),
        )
    }

    /// Estimate the occurrence index whose window is near `when`. Accurate
    /// to within a unit or two; callers scan outward from a margin below.
    fn estimate_index(&self, when: DateTime<Utc>) -> i64 {
        let base = self.start.naive_local();
        let target = when.with_timezone(&self.start.timezone()).naive_local();
        let units = match self.repeat_type {
            RepeatType::None => 0,
            RepeatType::Hour => (target - base).num_hours(),
            RepeatType::Day => (target - base).num_days(),
            RepeatType::Week => (target - base).num_weeks(),
            RepeatType::Month => {
                i64::from(target.year() - base.year()) * 12
                    + i64::from(target.month() as i32 - base.month() as i32)
            }
            RepeatType::Year => i64::from(target.year() - base.year()),
        };
        units / i64::from(self.repeat_period.max(1))
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} – {}), repeat {} × {}, capacity {}",
            self.start.to_rfc3339(),
            self.end.to_rfc3339(),
            self.repeat_period,
            self.repeat_type,
            if self.capacity_limit == CAPACITY_UNLIMITED {
                "unlimited".to_string()
            } else {
                self.capacity_limit.to_string()
            }
        )
    }
}

/// Advance a wall-clock time by `units` recurrence units, clamping month
/// arithmetic to the last valid day. Returns `None` past year 9999.
fn advance_wall_clock(
    base: NaiveDateTime,
    repeat_type: RepeatType,
    units: i64,
) -> Option<NaiveDateTime> {
    let advanced = match repeat_type {
        RepeatType::None => {
            if units != 0 {
                return None;
            }
            base
        }
        RepeatType::Hour => base.checked_add_signed(Duration::hours(units))?,
        RepeatType::Day => base.checked_add_days(Days::new(u64::try_from(units).ok()?))?,
        RepeatType::Week => {
            base.checked_add_days(Days::new(u64::try_from(units).ok()?.checked_mul(7)?))?
        }
        RepeatType::Month => base.checked_add_months(Months::new(u32::try_from(units).ok()?))?,
        RepeatType::Year => {
            base.checked_add_months(Months::new(u32::try_from(units).ok()?.checked_mul(12)?))?
        }
    };
    if advanced.year() > MAX_YEAR {
        return None;
    }
    Some(advanced)
}

/// Resolve a wall-clock time in a zone. A nonexistent local time (DST
/// spring-forward hole) yields `None`; an ambiguous one (fall-back)
/// resolves to the earlier instant.
fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _latest) => Some(earliest),
        LocalResult::None => None,
    }
}
