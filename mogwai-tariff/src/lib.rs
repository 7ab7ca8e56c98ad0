//! Tariff model for metered-network download scheduling
//!
//! A tariff describes when, and at what capacity, a network connection may
//! be used for bulk downloads: a named set of recurring wall-clock
//! [`Period`]s, each with a capacity limit in bytes. Tariffs are built with
//! [`TariffBuilder`], serialized to a stable byte format with
//! [`Tariff::to_bytes`], and read back with [`TariffLoader`].

pub mod builder;
pub mod error;
pub mod loader;
pub mod period;
pub mod tariff;
pub mod wire;

pub use builder::TariffBuilder;
pub use error::{TariffError, TariffResult};
pub use loader::TariffLoader;
pub use period::{Occurrence, Period, RepeatType, CAPACITY_UNLIMITED};
pub use tariff::Tariff;
