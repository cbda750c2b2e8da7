//! Device fingerprint uniqueness.
//!
//! Mutates the identity attributes that correlate sessions: identifiers,
//! browser storage, user agent, timezone, GPS, locale and build properties.

mod country;
mod location;
mod service;
mod timezone;
mod types;

pub use country::{country_centroid, country_locale, country_timezone};
pub use location::{LocaleChanger, LocationChanger};
pub use service::UniquenessService;
pub use timezone::TimezoneChanger;
pub use types::{Outcome, UniquenessConfig, UniquenessResult, ValueSource};
