//! Tariff tool command implementations

use std::path::Path;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use mogwai_tariff::{
    Period, RepeatType, Tariff, TariffBuilder, TariffLoader, CAPACITY_UNLIMITED,
};

/// Fields per period definition on the `build` command line
pub const PERIOD_FIELDS: usize = 5;

/// Command failures, mapped to process exit codes by the caller
#[derive(Error, Debug)]
pub enum CommandError {
    /// Arguments were malformed (exit code 1)
    #[error("{0}")]
    InvalidOptions(String),
    /// No period governs the requested instant (exit code 2)
    #[error("lookup failed")]
    LookupFailed,
    /// The operation itself failed (exit code 3)
    #[error("{0}")]
    Failed(String),
}

/// Build a tariff file from repeated
/// `<start> <end> <repeat-type> <repeat-period> <capacity>` groups
pub fn build(
    out_file: &Path,
    name: &str,
    zone: &str,
    period_args: &[String],
) -> Result<(), CommandError> {
    let tz: Tz = zone
        .parse()
        .map_err(|_| CommandError::InvalidOptions(format!("unknown time zone {:?}", zone)))?;

    if period_args.is_empty() || period_args.len() % PERIOD_FIELDS != 0 {
        return Err(CommandError::InvalidOptions(format!(
            "period definitions come in groups of {} (start, end, repeat-type, \
             repeat-period, capacity); got {} arguments",
            PERIOD_FIELDS,
            period_args.len()
        )));
    }

    let mut builder = TariffBuilder::new();
    builder.set_name(name);
    for chunk in period_args.chunks(PERIOD_FIELDS) {
        builder.add_period(parse_period(chunk, &tz)?);
    }
    let tariff = builder
        .build()
        .map_err(|err| CommandError::InvalidOptions(err.to_string()))?;

    let bytes = tariff
        .to_bytes()
        .map_err(|err| CommandError::Failed(err.to_string()))?;
    std::fs::write(out_file, bytes)
        .map_err(|err| CommandError::Failed(format!("writing {}: {}", out_file.display(), err)))?;
    Ok(())
}

/// Print a tariff file in human-readable form
pub fn dump(file: &Path) -> Result<String, CommandError> {
    let tariff = load(file)?;
    let mut out = format!("Tariff: {}\n", tariff.name());
    for period in tariff.periods() {
        out.push_str(&format!("  {}\n", period));
    }
    Ok(out)
}

/// Print the period governing `instant`, or fail with exit code 2
pub fn lookup(file: &Path, instant: &str) -> Result<String, CommandError> {
    let when = parse_instant(instant)?;
    let tariff = load(file)?;
    match tariff.lookup_period(when) {
        Some(period) => Ok(format!("{}\n", period)),
        None => Err(CommandError::LookupFailed),
    }
}

fn load(file: &Path) -> Result<Tariff, CommandError> {
    TariffLoader::new()
        .load_from_file(file)
        .map_err(|err| CommandError::Failed(err.to_string()))
}

fn parse_period(fields: &[String], tz: &Tz) -> Result<Period, CommandError> {
    let start = parse_instant(&fields[0])?.with_timezone(tz);
    let end = parse_instant(&fields[1])?.with_timezone(tz);
    let repeat_type: RepeatType = fields[2]
        .parse()
        .map_err(|err: mogwai_tariff::TariffError| {
            CommandError::InvalidOptions(err.to_string())
        })?;
    let repeat_period: u32 = fields[3].parse().map_err(|_| {
        CommandError::InvalidOptions(format!("invalid repeat period {:?}", fields[3]))
    })?;
    let capacity = parse_capacity(&fields[4])?;

    Period::new(start, end, repeat_type, repeat_period, capacity)
        .map_err(|err| CommandError::InvalidOptions(err.to_string()))
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, CommandError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            CommandError::InvalidOptions(format!("invalid ISO 8601 instant {:?}: {}", value, err))
        })
}

fn parse_capacity(value: &str) -> Result<u64, CommandError> {
    if value == "unlimited" {
        return Ok(CAPACITY_UNLIMITED);
    }
    value.parse().map_err(|_| {
        CommandError::InvalidOptions(format!(
            "capacity must be a byte count or \"unlimited\"; got {:?}",
            value
        ))
    })
}
