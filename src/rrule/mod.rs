//! RRULE parsing and calendar-aware occurrence expansion.

pub mod expand;
pub mod grammar;

pub use expand::expand;
pub use grammar::{ByDayTerm, Freq, RRule, Until, Weekday, parse_rrule, set_until};
