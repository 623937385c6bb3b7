pub mod client;
pub mod conflict;
pub mod discovery;
pub mod streaming;
pub mod types;

pub use client::{
    CalDavClient, build_calendar_multiget_body, build_calendar_query_body, map_calendar_list,
    map_calendar_objects,
};
pub use conflict::{classify_delete, classify_put, WriteOutcome};
pub use discovery::{discover_home, discover_principal, extract_color, list_etags, DiscoveredHome};
pub use streaming::{parse_multistatus_bytes, parse_multistatus_bytes_visit};
pub use types::{CalendarInfo, CalendarObject, DavItem, Depth};
