//! The Sync Orchestrator: phased near-first pulls, ETag-diff
//! catch-up, and the three-scope recurring-edit push algorithm, with
//! conflict retry and offline-queue fallback.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::account::{Collection, SourceKind};
use crate::caldav::client::CalDavClient;
use crate::caldav::discovery::list_etags;
use crate::error::CoreError;
use crate::ics::editor::IcsDocument;
use crate::ics::model::{VCalendar, VEvent, exdate_raw_key};
use crate::ics::parser::parse_calendar;
use crate::ics::serializer::{serialize_vevent, serialize_vevent_block};
use crate::store::offline_queue::QueueOperation;
use crate::store::{EventRecord, PendingSync, Store};
use crate::sync::clock::Clock;
use crate::sync::convert::vevent_to_record;
use crate::sync::progress::{ProgressSink, SyncPhase, SyncProgress, SyncResult};
use crate::sync::retry::update_with_retry;
use crate::uid::generate_uid;
use crate::vtimezone::resolve_vtimezone;

/// Which instances of a recurring series an edit or delete applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditScope {
    This,
    ThisAndFollowing,
    All,
}

fn caldav_instant(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Orchestrates pull and push for every enabled collection of every
/// enabled account. Owns a per-UID lock table so concurrent pushes to
/// the same event never race.
pub struct Orchestrator<'a> {
    client: &'a CalDavClient,
    store: &'a Store,
    clock: &'a dyn Clock,
    uid_locks: Mutex<HashMap<String, std::sync::Arc<tokio::sync::Mutex<()>>>>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(client: &'a CalDavClient, store: &'a Store, clock: &'a dyn Clock) -> Self {
        Self {
            client,
            store,
            clock,
            uid_locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, uid: &str) -> std::sync::Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.uid_locks.lock().unwrap();
        locks
            .entry(uid.to_string())
            .or_insert_with(|| std::sync::Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // ---------------------------------------------------------------
    // Pull
    // ---------------------------------------------------------------

    /// Reconcile every enabled collection with its server, then replay
    /// the offline queue.
    pub async fn sync_all(
        &self,
        account_id: &str,
        collections: &[Collection],
        progress: &dyn ProgressSink,
    ) -> SyncResult {
        let mut result = SyncResult::default();
        for collection in collections.iter().filter(|c| c.enabled) {
            let r = match collection.source_kind {
                SourceKind::Caldav => self.pull_collection(account_id, collection, progress).await,
                SourceKind::IcsSubscription => self.pull_subscription(account_id, collection).await,
            };
            result.merge(r);
        }
        if !collections.iter().any(|c| c.source_kind == SourceKind::Caldav && c.enabled) {
            return result;
        }
        result.merge(self.replay_offline_queue(collections).await);
        result
    }

    async fn pull_collection(
        &self,
        account_id: &str,
        collection: &Collection,
        progress: &dyn ProgressSink,
    ) -> SyncResult {
        let mut result = SyncResult::default();
        let now = self.clock.now();
        let before_etags = match self.store.etag_map(&collection.id) {
            Ok(m) => m,
            Err(e) => {
                result.errors.push(format!("{}: reading local etags failed: {e}", collection.name));
                return result;
            }
        };
        let mut processed: HashSet<String> = HashSet::new();
        tracing::info!(collection = %collection.name, "starting pull");

        let windows = [
            (SyncPhase::NearTerm, now - ChronoDuration::days(60), now + ChronoDuration::days(180)),
            (SyncPhase::FarFuture, now + ChronoDuration::days(180), now + ChronoDuration::days(365 * 5)),
            (SyncPhase::RecentPast, now - ChronoDuration::days(365 * 5), now - ChronoDuration::days(60)),
        ];

        for (phase, start, end) in windows {
            progress.on_progress(SyncProgress {
                phase,
                done: 0,
                total: 1,
                collection_name: Some(collection.name.clone()),
                events_done: 0,
                events_total: 0,
            });
            let objects = self
                .client
                .calendar_query_timerange(&collection.url, "VEVENT", Some(&caldav_instant(start)), Some(&caldav_instant(end)), true)
                .await;
            let objects = match objects {
                Ok(v) => v,
                Err(e) => {
                    // Phase-level failures are non-fatal; the
                    // orchestrator proceeds to the next phase.
                    tracing::warn!(collection = %collection.name, phase = phase.label(), err = %e, "pull phase failed");
                    result.errors.push(format!("{}: {} phase failed: {e}", collection.name, phase.label()));
                    continue;
                }
            };
            for object in objects {
                if processed.contains(&object.href) {
                    continue;
                }
                processed.insert(object.href.clone());
                let Some(ics) = object.calendar_data else { continue };
                self.apply_pulled_object(account_id, collection, &object.href, object.etag, &ics, &before_etags, &mut result);
            }
            progress.on_progress(SyncProgress {
                phase,
                done: 1,
                total: 1,
                collection_name: Some(collection.name.clone()),
                events_done: processed.len(),
                events_total: processed.len(),
            });
        }

        // Phase 4: catch-up, the only phase whose failure surfaces.
        progress.on_progress(SyncProgress {
            phase: SyncPhase::CatchUp,
            done: 0,
            total: 1,
            collection_name: Some(collection.name.clone()),
            events_done: 0,
            events_total: 0,
        });
        match list_etags(self.client, &collection.url).await {
            Ok(server_etags) => {
                for (href, etag) in &server_etags {
                    if processed.contains(href) {
                        continue;
                    }
                    if before_etags.get(href) == Some(etag) {
                        continue;
                    }
                    match self.client.get(href).await {
                        Ok(resp) if resp.status().is_success() => {
                            let server_etag = CalDavClient::etag_from_headers(resp.headers()).or_else(|| Some(etag.clone()));
                            let ics = String::from_utf8_lossy(resp.body()).to_string();
                            self.apply_pulled_object(account_id, collection, href, server_etag, &ics, &before_etags, &mut result);
                        }
                        Ok(resp) => result.errors.push(format!("{}: GET {href} returned {}", collection.name, resp.status())),
                        Err(e) => result.errors.push(format!("{}: GET {href} failed: {e}", collection.name)),
                    }
                }
                for (href, _) in before_etags.iter() {
                    if !server_etags.contains_key(href) && !processed.contains(href) {
                        if let Err(e) = self.store.delete_by_href(href) {
                            result.errors.push(format!("{}: cleanup of {href} failed: {e}", collection.name));
                        } else {
                            result.deleted += 1;
                        }
                    }
                }
            }
            Err(e) => {
                // Phase 4 surfaces its errors to the caller.
                tracing::warn!(collection = %collection.name, err = %e, "catch-up phase failed");
                result.errors.push(format!("{}: catch-up listEtags failed: {e}", collection.name));
            }
        }

        tracing::info!(collection = %collection.name, added = result.added, updated = result.updated, deleted = result.deleted, "pull complete");
        result
    }

    fn apply_pulled_object(
        &self,
        account_id: &str,
        collection: &Collection,
        href: &str,
        etag: Option<String>,
        ics: &str,
        before_etags: &HashMap<String, String>,
        result: &mut SyncResult,
    ) {
        let Some(calendar) = parse_calendar(ics) else {
            tracing::warn!(collection = %collection.name, %href, "malformed ICS, skipping");
            result.errors.push(format!("{}: malformed ICS at {href}", collection.name));
            return;
        };
        let valid_uids: Vec<String> = calendar.events.iter().map(|e| e.uid.clone()).collect();
        if let Err(e) = self.store.cleanup_stale_href_rows(href, &valid_uids) {
            result.errors.push(format!("{}: cleanup_stale_href_rows failed: {e}", collection.name));
        }

        if before_etags.get(href) == etag.as_ref() {
            return; // content unchanged
        }

        let Some(master_uid) = calendar.master().or_else(|| calendar.events.first()).map(|e| e.uid.clone()) else {
            return;
        };
        let path = match self.store.write_blob(&master_uid, ics) {
            Ok(p) => p,
            Err(e) => {
                result.errors.push(format!("{}: writing blob for {href} failed: {e}", collection.name));
                return;
            }
        };
        let path_str = path.to_string_lossy().to_string();
        for event in &calendar.events {
            let record = vevent_to_record(event, href, etag.clone(), account_id, &collection.id, &path_str);
            if let Err(e) = self.store.upsert(record) {
                result.errors.push(format!("{}: upsert for {href} failed: {e}", collection.name));
            }
        }
        if before_etags.contains_key(href) {
            result.updated += 1;
        } else {
            result.added += 1;
        }
    }

    /// Read-only ICS subscriptions: a single GET replaces the
    /// collection's rows wholesale.
    async fn pull_subscription(&self, account_id: &str, collection: &Collection) -> SyncResult {
        let mut result = SyncResult::default();
        let resp = match self.client.get(&collection.url).await {
            Ok(r) => r,
            Err(e) => {
                result.errors.push(format!("{}: subscription GET failed: {e}", collection.name));
                return result;
            }
        };
        if !resp.status().is_success() {
            result.errors.push(format!("{}: subscription GET returned {}", collection.name, resp.status()));
            return result;
        }
        let text = String::from_utf8_lossy(resp.body()).to_string();
        let Some(calendar) = parse_calendar(&text) else {
            result.errors.push(format!("{}: malformed subscription ICS", collection.name));
            return result;
        };

        let existing_hrefs = self.store.hrefs_for_collection(&collection.id).unwrap_or_default();
        for href in &existing_hrefs {
            let _ = self.store.delete_by_href(href);
        }

        let mut by_uid: HashMap<&str, Vec<&VEvent>> = HashMap::new();
        for event in &calendar.events {
            by_uid.entry(event.uid.as_str()).or_default().push(event);
        }
        let now = self.clock.now();
        for (uid, events) in by_uid {
            let href = format!("{}#{uid}", collection.url);
            let text = serialize_subscription_events(&calendar, &events, now);
            let path = match self.store.write_blob(uid, &text) {
                Ok(p) => p,
                Err(e) => {
                    result.errors.push(format!("{}: writing blob for {uid} failed: {e}", collection.name));
                    continue;
                }
            };
            let path_str = path.to_string_lossy().to_string();
            for event in events {
                let record = vevent_to_record(event, &href, None, account_id, &collection.id, &path_str);
                if self.store.upsert(record).is_ok() {
                    result.added += 1;
                }
            }
        }
        result
    }

    // ---------------------------------------------------------------
    // Push: create
    // ---------------------------------------------------------------

    /// `createEvent`: generate a UID, best-effort VTIMEZONE, and
    /// PUT-create the resource. On a transport failure the write is
    /// queued offline and the row is indexed as pending.
    pub async fn create_event(&self, account_id: &str, collection: &Collection, mut event: VEvent) -> Result<String, CoreError> {
        if event.uid.is_empty() {
            event.uid = generate_uid();
        }
        let uid = event.uid.clone();
        let _guard = self.lock_for(&uid).lock_owned().await;

        let now = self.clock.now();
        let vtimezone = if let Some(tzid) = event.dtstart.tzid() {
            resolve_vtimezone(tzid, now).await
        } else {
            None
        };
        let ics = serialize_vevent(&event, vtimezone.as_deref(), now);
        let href = format!("{}{}.ics", ensure_trailing_slash(&collection.url), urlencoding::encode(&uid));
        tracing::info!(collection = %collection.name, %uid, "creating event");

        match self.client.put_if_none_match(&href, bytes::Bytes::from(ics.clone())).await {
            Ok(resp) if resp.status().is_success() => {
                let etag = CalDavClient::etag_from_headers(resp.headers());
                let location = resp
                    .headers()
                    .get(hyper::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .unwrap_or_else(|| href.clone());
                self.index_written_resource(account_id, collection, &location, etag, &ics, None);
                Ok(uid)
            }
            Ok(resp) => Err(CoreError::ProtocolStatus { status: resp.status().as_u16(), detail: "create failed".into() }),
            Err(transport_err) => {
                tracing::warn!(collection = %collection.name, %uid, err = %transport_err, "create failed, queuing offline");
                self.index_written_resource(account_id, collection, &href, None, &ics, Some(PendingSync::Create));
                let _ = self.store.enqueue_offline(
                    QueueOperation::Create,
                    &uid,
                    &collection.id,
                    account_id,
                    Some(&href),
                    None,
                    &now.to_rfc3339(),
                );
                Err(CoreError::Transport(transport_err))
            }
        }
    }

    fn index_written_resource(
        &self,
        account_id: &str,
        collection: &Collection,
        href: &str,
        etag: Option<String>,
        ics: &str,
        pending: Option<PendingSync>,
    ) {
        let Some(calendar) = parse_calendar(ics) else { return };
        let Some(master) = calendar.master() else { return };
        let path = self.store.write_blob(&master.uid, ics).unwrap_or_default();
        let path_str = path.to_string_lossy().to_string();
        for event in &calendar.events {
            let mut record = vevent_to_record(event, href, etag.clone(), account_id, &collection.id, &path_str);
            record.pending_sync = pending;
            let _ = self.store.upsert(record);
        }
    }

    // ---------------------------------------------------------------
    // Push: update
    // ---------------------------------------------------------------

    /// `reschedule`: derive the instance's current duration from
    /// the master/override ICS (or default to 1h), shift DTSTART/DTEND
    /// to `new_start`, and reissue as an `updateEvent` at the given
    /// scope. Does not lock `uid` itself — `update_event` does.
    pub async fn reschedule(
        &self,
        account_id: &str,
        collection: &Collection,
        uid: &str,
        instance_start: DateTime<Utc>,
        new_start: DateTime<Utc>,
        scope: EditScope,
    ) -> Result<(), CoreError> {
        let rows = self.store.by_uid(uid).map_err(|e| CoreError::Precondition(e.to_string()))?;
        let master = rows.iter().find(|r| r.is_master()).ok_or_else(|| CoreError::Precondition("no master indexed for this uid".into()))?;
        let blob = self.store.read_blob(std::path::Path::new(&master.ics_path)).unwrap_or_default();
        let calendar = parse_calendar(&blob).ok_or_else(|| CoreError::Parse("malformed ICS blob".into()))?;

        let instance_key = exdate_raw_key(&instance_start.format("%Y%m%dT%H%M%SZ").to_string());
        let template = calendar
            .overrides()
            .find(|o| o.recurrence_id.as_ref().map(|r| r.exdate_key()) == Some(instance_key.clone()))
            .or_else(|| calendar.master())
            .ok_or_else(|| CoreError::Precondition("no template VEVENT found for this instance".into()))?;

        let duration = crate::materialize::duration_of(&template.dtstart, template.dtend.as_ref(), template.duration.as_deref());
        let new_end = new_start + duration;

        let mut new_event = template.clone();
        new_event.dtstart = crate::ics::model::DateTimeValue::Utc(new_start);
        new_event.dtend = Some(crate::ics::model::DateTimeValue::Utc(new_end));

        self.update_event(account_id, collection, uid, &new_event, scope, Some(instance_start)).await
    }

    /// `updateEvent`: dispatch to the scope-appropriate rewrite.
    pub async fn update_event(
        &self,
        account_id: &str,
        collection: &Collection,
        uid: &str,
        new_event: &VEvent,
        scope: EditScope,
        instance_start: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let _guard = self.lock_for(uid).lock_owned().await;
        let rows = self.store.by_uid(uid).map_err(|e| CoreError::Precondition(e.to_string()))?;
        let master = rows.iter().find(|r| r.is_master()).cloned();

        let has_rrule = master.as_ref().map(|m| m.rrule.is_some()).unwrap_or(false);
        let scope = if has_rrule { scope } else { EditScope::All };

        match scope {
            EditScope::All => self.update_all(account_id, collection, &rows, new_event).await,
            EditScope::This => {
                let Some(start) = instance_start else {
                    return Err(CoreError::Precondition("scope=this requires an instance start".into()));
                };
                self.update_this(account_id, collection, &rows, new_event, start).await
            }
            EditScope::ThisAndFollowing => {
                let Some(start) = instance_start else {
                    return Err(CoreError::Precondition("scope=thisAndFollowing requires an instance start".into()));
                };
                self.update_this_and_following(account_id, collection, &rows, new_event, start).await
            }
        }
    }

    async fn update_all(
        &self,
        account_id: &str,
        collection: &Collection,
        rows: &[EventRecord],
        new_event: &VEvent,
    ) -> Result<(), CoreError> {
        let master = rows.iter().find(|r| r.is_master());
        let href = master.map(|m| m.href.clone()).unwrap_or_else(|| format!("{}{}.ics", ensure_trailing_slash(&collection.url), urlencoding::encode(&new_event.uid)));
        let etag = master.and_then(|m| m.etag.clone());

        let prior_sequence = master
            .and_then(|m| self.store.read_blob(std::path::Path::new(&m.ics_path)).ok())
            .and_then(|blob| parse_calendar(&blob))
            .and_then(|cal| cal.master().map(|e| e.sequence))
            .unwrap_or(0);

        let base_event = new_event.clone();
        let now = self.clock.now();
        let mut to_write = base_event.clone();
        to_write.sequence = prior_sequence + 1;
        let ics = serialize_vevent(&to_write, None, now);

        let fallback_href = format!("{}{}.ics", ensure_trailing_slash(&collection.url), urlencoding::encode(&new_event.uid));
        let rebuild = move |server_ics: &str| -> String {
            let server_sequence = parse_calendar(server_ics).and_then(|cal| cal.master().map(|e| e.sequence)).unwrap_or(prior_sequence);
            let mut rebuilt = base_event.clone();
            rebuilt.sequence = server_sequence.max(prior_sequence) + 1;
            serialize_vevent(&rebuilt, None, now)
        };
        let outcome = self.write_or_queue(account_id, collection, &new_event.uid, &href, &fallback_href, etag, ics, rebuild).await?;
        if let Some(outcome) = outcome {
            self.store.delete_overrides_for_uid(&new_event.uid).map_err(|e| CoreError::Precondition(e.to_string()))?;
            self.index_written_resource(account_id, collection, &outcome.href, Some(outcome.etag.unwrap_or_default()), &outcome.ics, None);
        }
        Ok(())
    }

    /// scope="this": build a combined resource carrying the (possibly
    /// truncated) master plus a fresh override VEVENT for this
    /// instance.
    async fn update_this(
        &self,
        account_id: &str,
        collection: &Collection,
        rows: &[EventRecord],
        new_event: &VEvent,
        instance_start: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let master = rows.iter().find(|r| r.is_master()).ok_or_else(|| CoreError::Precondition("no master indexed for this uid".into()))?;
        let href = master.href.clone();
        let etag = master.etag.clone();
        let all_day = master.dtstart_is_date;
        let recurrence_id_value = if all_day {
            instance_start.format("%Y%m%d").to_string()
        } else {
            instance_start.format("%Y%m%dT%H%M%SZ").to_string()
        };
        let recurrence_key = exdate_raw_key(&recurrence_id_value);

        let blob = self.store.read_blob(std::path::Path::new(&master.ics_path)).unwrap_or_default();
        let master_sequence = parse_calendar(&blob).and_then(|cal| cal.master().map(|e| e.sequence)).unwrap_or(0);

        let mut override_event = new_event.clone();
        override_event.uid = master.uid.clone();
        override_event.rrule = None;
        override_event.exdates.clear();
        override_event.recurrence_id = crate::ics::model::DateTimeValue::parse_annotated(&recurrence_id_value);
        override_event.sequence = master_sequence + 1;

        let rebuild = {
            let override_event = override_event.clone();
            let recurrence_key = recurrence_key.clone();
            let now = self.clock.now();
            move |server_ics: &str| -> String {
                build_scope_this_document(server_ics, &recurrence_key, &override_event, all_day, now)
            }
        };

        let initial_ics = rebuild(&blob);

        let fallback_href = format!("{}{}.ics", ensure_trailing_slash(&collection.url), urlencoding::encode(&master.uid));
        let outcome = self.write_or_queue(account_id, collection, &master.uid, &href, &fallback_href, etag, initial_ics, rebuild).await?;
        if let Some(outcome) = outcome {
            self.index_written_resource(account_id, collection, &outcome.href, Some(outcome.etag.unwrap_or_default()), &outcome.ics, None);
        }
        Ok(())
    }

    /// scope="thisAndFollowing": truncate the master's RRULE with
    /// `UNTIL=instanceStart-1day`, drop local rows from the instance
    /// onward, then create a brand-new series for the remainder.
    async fn update_this_and_following(
        &self,
        account_id: &str,
        collection: &Collection,
        rows: &[EventRecord],
        new_event: &VEvent,
        instance_start: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let master = rows.iter().find(|r| r.is_master()).ok_or_else(|| CoreError::Precondition("no master indexed for this uid".into()))?;
        let href = master.href.clone();
        let etag = master.etag.clone();
        let all_day = master.dtstart_is_date;
        let until_instant = instance_start - ChronoDuration::days(1);
        let until_value = if all_day {
            until_instant.format("%Y%m%d").to_string()
        } else {
            until_instant.format("%Y%m%dT%H%M%SZ").to_string()
        };
        let old_rrule = master.rrule.clone().unwrap_or_default();
        let truncated_rrule = crate::rrule::grammar::set_until(&old_rrule, &until_value);

        let rebuild = {
            let truncated_rrule = truncated_rrule.clone();
            move |server_ics: &str| -> String {
                IcsDocument::parse(server_ics).with_rrule(Some(&truncated_rrule)).to_text()
            }
        };

        let blob = self.store.read_blob(std::path::Path::new(&master.ics_path)).unwrap_or_default();
        let initial_ics = rebuild(&blob);

        let fallback_href = format!("{}{}.ics", ensure_trailing_slash(&collection.url), urlencoding::encode(&master.uid));
        let outcome = self.write_or_queue(account_id, collection, &master.uid, &href, &fallback_href, etag, initial_ics, rebuild).await?;
        if let Some(outcome) = outcome {
            self.index_written_resource(account_id, collection, &outcome.href, Some(outcome.etag.unwrap_or_default()), &outcome.ics, None);
        }

        let cutoff = instance_start.to_rfc3339();
        self.store
            .delete_events_from_date(&master.uid, &cutoff)
            .map_err(|e| CoreError::Precondition(e.to_string()))?;

        let mut continuation = new_event.clone();
        continuation.uid = generate_uid();
        self.create_event(account_id, collection, continuation.clone()).await.map(|_| ())
    }

    // ---------------------------------------------------------------
    // Push: delete
    // ---------------------------------------------------------------

    /// `deleteEvent`: mirrors update's scope semantics.
    pub async fn delete_event(
        &self,
        account_id: &str,
        collection: &Collection,
        uid: &str,
        scope: EditScope,
        instance_start: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let _guard = self.lock_for(uid).lock_owned().await;
        let rows = self.store.by_uid(uid).map_err(|e| CoreError::Precondition(e.to_string()))?;
        let master = rows.iter().find(|r| r.is_master()).ok_or_else(|| CoreError::Precondition("no master indexed for this uid".into()))?;
        let has_rrule = master.rrule.is_some();
        let scope = if has_rrule { scope } else { EditScope::All };

        match scope {
            EditScope::All => {
                let href = master.href.clone();
                let etag = master.etag.clone();
                match self.delete_resource(&href, etag.as_deref()).await {
                    Ok(()) => {
                        self.store.delete_by_uid(uid).map_err(|e| CoreError::Precondition(e.to_string()))?;
                        Ok(())
                    }
                    Err(CoreError::Transport(transport_err)) => {
                        self.store.set_pending_sync(uid, Some(PendingSync::Delete)).map_err(|e| CoreError::Precondition(e.to_string()))?;
                        let _ = self.store.enqueue_offline(
                            QueueOperation::Delete,
                            uid,
                            &collection.id,
                            account_id,
                            Some(&href),
                            etag.as_deref(),
                            &self.clock.now().to_rfc3339(),
                        );
                        Err(CoreError::Transport(transport_err))
                    }
                    Err(other) => Err(other),
                }
            }
            EditScope::This => {
                let Some(start) = instance_start else {
                    return Err(CoreError::Precondition("scope=this requires an instance start".into()));
                };
                let all_day = master.dtstart_is_date;
                let recurrence_value = if all_day { start.format("%Y%m%d").to_string() } else { start.format("%Y%m%dT%H%M%SZ").to_string() };
                let recurrence_key = exdate_raw_key(&recurrence_value);
                let rebuild = {
                    let recurrence_key = recurrence_key.clone();
                    let recurrence_value = recurrence_value.clone();
                    move |server_ics: &str| -> String {
                        let mut exdates = parse_calendar(server_ics)
                            .and_then(|cal| cal.master().cloned())
                            .map(|m| m.exdates)
                            .unwrap_or_default();
                        if !exdates.iter().any(|e| exdate_raw_key(e) == recurrence_key) {
                            exdates.push(recurrence_value.clone());
                        }
                        IcsDocument::parse(server_ics)
                            .strip_override_for(&recurrence_key)
                            .with_exdates(&exdates, all_day)
                            .to_text()
                    }
                };
                let href = master.href.clone();
                let etag = master.etag.clone();
                let blob = self.store.read_blob(std::path::Path::new(&master.ics_path)).unwrap_or_default();
                let initial_ics = rebuild(&blob);
                let fallback_href = format!("{}{}.ics", ensure_trailing_slash(&collection.url), urlencoding::encode(uid));
                let outcome = self.write_or_queue(account_id, collection, uid, &href, &fallback_href, etag, initial_ics, rebuild).await?;
                if let Some(outcome) = outcome {
                    self.store.delete_override(uid, &recurrence_value).map_err(|e| CoreError::Precondition(e.to_string()))?;
                    self.index_written_resource(account_id, collection, &outcome.href, Some(outcome.etag.unwrap_or_default()), &outcome.ics, None);
                }
                Ok(())
            }
            EditScope::ThisAndFollowing => {
                let Some(start) = instance_start else {
                    return Err(CoreError::Precondition("scope=thisAndFollowing requires an instance start".into()));
                };
                let all_day = master.dtstart_is_date;
                let until_instant = start - ChronoDuration::days(1);
                let until_value = if all_day { until_instant.format("%Y%m%d").to_string() } else { until_instant.format("%Y%m%dT%H%M%SZ").to_string() };
                let old_rrule = master.rrule.clone().unwrap_or_default();
                let truncated_rrule = crate::rrule::grammar::set_until(&old_rrule, &until_value);
                let rebuild = {
                    let truncated_rrule = truncated_rrule.clone();
                    move |server_ics: &str| -> String {
                        IcsDocument::parse(server_ics).with_rrule(Some(&truncated_rrule)).to_text()
                    }
                };
                let href = master.href.clone();
                let etag = master.etag.clone();
                let blob = self.store.read_blob(std::path::Path::new(&master.ics_path)).unwrap_or_default();
                let initial_ics = rebuild(&blob);
                let fallback_href = format!("{}{}.ics", ensure_trailing_slash(&collection.url), urlencoding::encode(uid));
                let outcome = self.write_or_queue(account_id, collection, uid, &href, &fallback_href, etag, initial_ics, rebuild).await?;
                if let Some(outcome) = outcome {
                    self.index_written_resource(account_id, collection, &outcome.href, Some(outcome.etag.unwrap_or_default()), &outcome.ics, None);
                }
                self.store
                    .delete_events_from_date(uid, &start.to_rfc3339())
                    .map_err(|e| CoreError::Precondition(e.to_string()))?;
                Ok(())
            }
        }
    }

    async fn delete_resource(&self, href: &str, etag: Option<&str>) -> Result<(), CoreError> {
        let resp = match etag {
            Some(e) if !e.is_empty() => self.client.delete_if_match(href, e).await,
            _ => self.client.delete(href).await,
        };
        let resp = resp.map_err(CoreError::Transport)?;
        crate::caldav::conflict::classify_delete(&resp, href)
    }

    /// Push one PUT through [`update_with_retry`]; on a transport
    /// failure, persist the intended write to the offline queue and
    /// mark the affected rows pending instead of propagating.
    #[allow(clippy::too_many_arguments)]
    async fn write_or_queue(
        &self,
        account_id: &str,
        collection: &Collection,
        uid: &str,
        href: &str,
        fallback_href: &str,
        etag: Option<String>,
        ics_body: String,
        rebuild: impl Fn(&str) -> String,
    ) -> Result<Option<crate::sync::retry::RetriedWrite>, CoreError> {
        match update_with_retry(self.client, href, fallback_href, etag.clone(), ics_body.clone(), rebuild).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(CoreError::Transport(transport_err)) => {
                tracing::warn!(%uid, err = %transport_err, "update failed, queuing offline");
                self.store.write_blob(uid, &ics_body).map_err(|e| CoreError::Precondition(e.to_string()))?;
                self.store.set_pending_sync(uid, Some(PendingSync::Update)).map_err(|e| CoreError::Precondition(e.to_string()))?;
                let _ = self.store.enqueue_offline(
                    QueueOperation::Update,
                    uid,
                    &collection.id,
                    account_id,
                    Some(href),
                    etag.as_deref(),
                    &self.clock.now().to_rfc3339(),
                );
                let _ = account_id;
                Err(CoreError::Transport(transport_err))
            }
            Err(other) => Err(other),
        }
    }

    // ---------------------------------------------------------------
    // Offline replay
    // ---------------------------------------------------------------

    /// Drain the offline queue FIFO, replaying each item against its
    /// collection. Items that succeed are removed and their pending
    /// flag cleared; items that fail stay queued for next time.
    pub async fn replay_offline_queue(&self, collections: &[Collection]) -> SyncResult {
        let mut result = SyncResult::default();
        let items = match self.store.offline_queue_fifo() {
            Ok(v) => v,
            Err(e) => {
                result.errors.push(format!("reading offline queue failed: {e}"));
                return result;
            }
        };
        for item in items {
            let Some(collection) = collections.iter().find(|c| c.id == item.collection_id) else {
                continue;
            };
            let outcome = match item.operation {
                QueueOperation::Delete => {
                    let href = item.href.clone().unwrap_or_else(|| format!("{}{}.ics", ensure_trailing_slash(&collection.url), urlencoding::encode(&item.uid)));
                    self.delete_resource(&href, item.etag.as_deref()).await.map(|_| ())
                }
                QueueOperation::Create | QueueOperation::Update => {
                    let rows = self.store.by_uid(&item.uid).unwrap_or_default();
                    let Some(master) = rows.iter().find(|r| r.is_master()) else { continue };
                    let Ok(blob) = self.store.read_blob(std::path::Path::new(&master.ics_path)) else { continue };
                    let href = item.href.clone().unwrap_or_else(|| master.href.clone());
                    match item.operation {
                        QueueOperation::Create => self
                            .client
                            .put_if_none_match(&href, bytes::Bytes::from(blob.clone()))
                            .await
                            .map_err(CoreError::Transport)
                            .and_then(|resp| crate::caldav::conflict::classify_put(&resp, &href).map(|_| ())),
                        _ => update_with_retry(self.client, &href, &href, item.etag.clone(), blob.clone(), |server_ics| server_ics.to_string())
                            .await
                            .map(|_| ()),
                    }
                }
            };
            match outcome {
                Ok(()) => {
                    let _ = self.store.set_pending_sync(&item.uid, None);
                    let _ = self.store.offline_queue_remove(item.id);
                }
                Err(e) => result.errors.push(format!("offline replay of {} failed: {e}", item.uid)),
            }
        }
        result
    }
}

fn ensure_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

/// Build the combined resource for a scope="this" write: the master's
/// EXDATE list rebuilt to omit this instance (RFC 5545 §3.8.5.3
/// forbids an EXDATE and an override VEVENT for the same instant),
/// plus a freshly injected override VEVENT whose RECURRENCE-ID
/// shadows the instance during expansion.
fn build_scope_this_document(
    server_ics: &str,
    recurrence_key: &str,
    override_event: &VEvent,
    all_day: bool,
    now: DateTime<Utc>,
) -> String {
    let remaining_exdates: Vec<String> = parse_calendar(server_ics)
        .and_then(|cal| cal.master().cloned())
        .map(|m| m.exdates)
        .unwrap_or_default()
        .into_iter()
        .filter(|e| exdate_raw_key(e) != recurrence_key)
        .collect();

    let override_block = serialize_vevent_block(override_event, now);
    IcsDocument::parse(server_ics)
        .with_exdates(&remaining_exdates, all_day)
        .strip_override_for(recurrence_key)
        .inject_override(&override_block)
        .to_text()
}

fn serialize_subscription_events(calendar: &VCalendar, events: &[&VEvent], now: DateTime<Utc>) -> String {
    let mut lines = vec!["BEGIN:VCALENDAR".to_string(), format!("VERSION:{}", if calendar.version.is_empty() { "2.0" } else { &calendar.version })];
    if let Some(tz) = &calendar.timezone {
        lines.push(tz.trim_end().to_string());
    }
    let mut out = lines.join("\r\n");
    out.push_str("\r\n");
    for event in events {
        out.push_str(&serialize_vevent_block(event, now));
    }
    out.push_str("END:VCALENDAR\r\n");
    out
}
