//! A local-first CalDAV calendar engine.
//!
//! This crate is the headless core behind a desktop calendar app: a
//! CalDAV client built on hyper 1.x/rustls/tokio, an RFC 5545 codec,
//! a calendar-aware RRULE expansion engine, a SQLite-backed local
//! index, and a sync orchestrator implementing the three-scope
//! recurring-edit model (`this` / `thisAndFollowing` / `all`).
//!
//! # Layout
//!
//! - [`caldav`] — the HTTP/WebDAV transport: discovery, REPORT/PROPFIND,
//!   conditional PUT/DELETE, and conflict classification.
//! - [`ics`] — the iCalendar codec: parsing, serialization, line-level
//!   surgical edits, and text folding/escaping.
//! - [`rrule`] — RRULE grammar parsing and calendar-aware expansion.
//! - [`store`] — the local index: event rows, ICS blobs, the offline
//!   write queue.
//! - [`materialize`] — turns indexed rows into concrete occurrences
//!   over a date range.
//! - [`sync`] — the orchestrator tying transport, codec, and index
//!   together, plus the injectable [`sync::Clock`] and progress
//!   reporting.
//! - [`account`], [`config`] — persisted account/collection
//!   configuration.
//! - [`error`] — the shared error taxonomy.
//! - [`uid`], [`vtimezone`] — small codec-adjacent helpers.
//!
//! # Example: pulling and reading occurrences
//!
//! ```no_run
//! use corkboard_core::account::{Collection, SourceKind};
//! use corkboard_core::caldav::client::CalDavClient;
//! use corkboard_core::store::Store;
//! use corkboard_core::sync::{NullProgressSink, Orchestrator, SystemClock};
//! use corkboard_core::materialize::{instances_in_range, CollectionConfig};
//! use chrono::Utc;
//! use anyhow::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = CalDavClient::new("https://caldav.example.com/user/", Some("me"), Some("secret"))?;
//!     let store = Store::open(
//!         &std::path::PathBuf::from("index.sqlite"),
//!         &std::path::PathBuf::from("blobs"),
//!     )?;
//!     let clock = SystemClock;
//!     let orchestrator = Orchestrator::new(&client, &store, &clock);
//!
//!     let collections = vec![Collection::new("https://caldav.example.com/user/personal/", "Personal", SourceKind::Caldav)];
//!     let result = orchestrator.sync_all("acc1", &collections, &NullProgressSink).await;
//!     println!("added={} updated={} deleted={}", result.added, result.updated, result.deleted);
//!
//!     let now = Utc::now();
//!     let configs: Vec<_> = collections.iter().map(|c| CollectionConfig { collection_id: c.id.clone(), color: c.color.clone() }).collect();
//!     let occurrences = instances_in_range(&store, &configs, now, now + chrono::Duration::days(30), "UTC")?;
//!     println!("{} occurrences in the next 30 days", occurrences.len());
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod caldav;
pub mod common;
pub mod config;
pub mod error;
pub mod ics;
pub mod materialize;
pub mod rrule;
pub mod store;
pub mod sync;
pub mod uid;
pub mod vtimezone;

pub use error::{CoreError, CoreResult};
