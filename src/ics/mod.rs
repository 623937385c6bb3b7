//! ICS (iCalendar) codec: parsing, serialization, and a surgical
//! editor API for in-place edits that must preserve components the
//! object model does not represent.

pub mod editor;
pub mod model;
pub mod parser;
pub mod serializer;
pub mod text;

pub use editor::IcsDocument;
pub use model::{exdate_raw_key, Attendee, DateTimeValue, VCalendar, VEvent};
pub use parser::parse_calendar;
pub use serializer::{serialize_vevent, serialize_vevent_block};
