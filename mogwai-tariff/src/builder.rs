//! Accumulating tariff builder

use chrono::Utc;

use crate::error::TariffResult;
use crate::period::Period;
use crate::tariff::Tariff;

/// Accumulator for building a [`Tariff`]
///
/// Periods may be added in any order; [`TariffBuilder::build`] sorts them
/// by decreasing span then increasing start before validation. A builder
/// may be [`reset`](TariffBuilder::reset) and reused.
#[derive(Debug, Default)]
pub struct TariffBuilder {
    name: Option<String>,
    periods: Vec<Period>,
}

impl TariffBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tariff name
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Add a period
    pub fn add_period(&mut self, period: Period) -> &mut Self {
        self.periods.push(period);
        self
    }

    /// Return the builder to its empty state
    pub fn reset(&mut self) {
        self.name = None;
        self.periods.clear();
    }

    /// Sort the accumulated periods, validate, and produce the tariff,
    /// leaving the builder empty
    pub fn build(&mut self) -> TariffResult<Tariff> {
        let name = self.name.take().unwrap_or_default();
        let mut periods = std::mem::take(&mut self.periods);

        periods.sort_by(|a, b| {
            b.span()
                .cmp(&a.span())
                .then_with(|| a.start().with_timezone(&Utc).cmp(&b.start().with_timezone(&Utc)))
        });

        Tariff::validate(&name, &periods)?;
        Ok(Tariff::new(name, periods))
    }
}
