//! End-to-end sync scenarios driven against a mock CalDAV server,
//! exercising the orchestrator's push scopes and conflict retry
//! without a live server.

use chrono::{TimeZone, Utc};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use corkboard_core::account::{Collection, SourceKind};
use corkboard_core::caldav::client::CalDavClient;
use corkboard_core::ics::model::{DateTimeValue, VEvent};
use corkboard_core::materialize::{instances_in_range, CollectionConfig};
use corkboard_core::store::Store;
use corkboard_core::sync::clock::FixedClock;
use corkboard_core::sync::orchestrator::{EditScope, Orchestrator};

fn blank_event(uid: &str, summary: &str, start: &str, end: &str) -> VEvent {
    VEvent {
        uid: uid.to_string(),
        summary: Some(summary.to_string()),
        description: None,
        location: None,
        url: None,
        dtstart: DateTimeValue::parse_annotated(start).unwrap(),
        dtend: Some(DateTimeValue::parse_annotated(end).unwrap()),
        duration: None,
        rrule: None,
        exdates: vec![],
        rdates: vec![],
        recurrence_id: None,
        status: None,
        transp: None,
        organizer: None,
        attendees: vec![],
        sequence: 0,
        created: None,
        last_modified: None,
        geo: None,
    }
}

fn store_in_memory() -> Store {
    let dir = tempfile::tempdir().unwrap().keep();
    Store::open(&dir.join("index.db"), &dir.join("ics")).unwrap()
}

/// A PUT-created event is immediately visible through
/// `instancesInRange`.
#[tokio::test]
async fn basic_create_and_read() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201).insert_header("ETag", "\"etag-1\""))
        .mount(&server)
        .await;

    let client = CalDavClient::new(&server.uri(), Some("user"), Some("pass")).unwrap();
    let store = store_in_memory();
    let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap());
    let orchestrator = Orchestrator::new(&client, &store, &clock);

    let collection = Collection::new(format!("{}/cal/", server.uri()), "Personal", SourceKind::Caldav);
    let event = blank_event("dentist-1", "Dentist", "20260115T140000Z", "20260115T150000Z");

    let uid = orchestrator.create_event("acc1", &collection, event).await.unwrap();
    assert_eq!(uid, "dentist-1");

    let configs = vec![CollectionConfig { collection_id: collection.id.clone(), color: None }];
    let start = Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2026, 1, 16, 0, 0, 0).unwrap();
    let occurrences = instances_in_range(&store, &configs, start, end, "UTC").unwrap();

    assert_eq!(occurrences.len(), 1);
    assert_eq!(occurrences[0].start_iso, "2026-01-15T14:00:00+00:00");
}

/// A stale-ETag PUT is refetched, rebuilt over the server's current
/// SUMMARY, and retried to success.
#[tokio::test]
async fn etag_conflict_recovers_via_refetch_and_retry() {
    let server = MockServer::start().await;

    // First PUT: 412, server's copy has moved on.
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(412))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let server_ics = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\nBEGIN:VEVENT\r\nUID:meet-1\r\nDTSTAMP:20260101T000000Z\r\nDTSTART:20260115T140000Z\r\nDTEND:20260115T150000Z\r\nSUMMARY:Server Renamed\r\nSEQUENCE:3\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(server_ics).insert_header("ETag", "\"server-etag\""))
        .mount(&server)
        .await;

    // Second PUT (after rebuild): succeeds.
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(204).insert_header("ETag", "\"etag-final\""))
        .mount(&server)
        .await;

    let client = CalDavClient::new(&server.uri(), Some("user"), Some("pass")).unwrap();
    let store = store_in_memory();
    let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap());
    let orchestrator = Orchestrator::new(&client, &store, &clock);

    let collection = Collection::new(format!("{}/cal/", server.uri()), "Work", SourceKind::Caldav);
    // Seed the local index with a master row carrying a stale etag.
    let href = format!("{}cal/meet-1.ics", server.uri());
    let blob_path = store.write_blob("meet-1", server_ics).unwrap();
    let seed = blank_event("meet-1", "My Edit", "20260115T140000Z", "20260115T150000Z");
    let record = corkboard_core::sync::convert::vevent_to_record(
        &seed,
        &href,
        Some("stale-etag".into()),
        "acc1",
        &collection.id,
        &blob_path.to_string_lossy(),
    );
    store.upsert(record).unwrap();

    let new_event = blank_event("meet-1", "My Edit", "20260115T140000Z", "20260115T153000Z");
    orchestrator
        .update_event("acc1", &collection, "meet-1", &new_event, EditScope::All, None)
        .await
        .unwrap();

    let rows = store.by_uid("meet-1").unwrap();
    let master = rows.iter().find(|r| r.is_master()).unwrap();
    assert_eq!(master.etag.as_deref(), Some("etag-final"));
}

/// scope="this" rewrites the master's blob with the instance's EXDATE
/// omitted and a fresh override VEVENT injected.
#[tokio::test]
async fn scope_this_injects_override_and_omits_exdate() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(204).insert_header("ETag", "\"etag-2\""))
        .mount(&server)
        .await;

    let client = CalDavClient::new(&server.uri(), Some("user"), Some("pass")).unwrap();
    let store = store_in_memory();
    let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap());
    let orchestrator = Orchestrator::new(&client, &store, &clock);

    let collection = Collection::new(format!("{}/cal/", server.uri()), "Work", SourceKind::Caldav);
    let href = format!("{}cal/weekly-1.ics", server.uri());

    let master_ics = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\nBEGIN:VEVENT\r\nUID:weekly-1\r\nDTSTAMP:20260101T000000Z\r\nDTSTART:20260105T090000Z\r\nDTEND:20260105T100000Z\r\nSUMMARY:Standup\r\nRRULE:FREQ=WEEKLY;BYDAY=MO;COUNT=3\r\nSEQUENCE:0\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
    let mut master_row = {
        let master_event = blank_event("weekly-1", "Standup", "20260105T090000Z", "20260105T100000Z");
        corkboard_core::sync::convert::vevent_to_record(&master_event, &href, Some("etag-1".into()), "acc1", &collection.id, "")
    };
    master_row.rrule = Some("FREQ=WEEKLY;BYDAY=MO;COUNT=3".to_string());
    let blob_path = store.write_blob("weekly-1", master_ics).unwrap();
    master_row.ics_path = blob_path.to_string_lossy().to_string();
    store.upsert(master_row).unwrap();

    let instance_start = Utc.with_ymd_and_hms(2026, 1, 12, 9, 0, 0).unwrap();
    let new_event = blank_event("weekly-1", "Standup", "20260112T090000Z", "20260112T103000Z");

    orchestrator
        .update_event("acc1", &collection, "weekly-1", &new_event, EditScope::This, Some(instance_start))
        .await
        .unwrap();

    let rows = store.by_uid("weekly-1").unwrap();
    let master = rows.iter().find(|r| r.is_master()).unwrap();
    assert!(
        !master.exdates.iter().any(|e| e.contains("20260112")),
        "master must not EXDATE an instant covered by an override"
    );
    let overrides: Vec<_> = rows.iter().filter(|r| r.is_override()).collect();
    assert_eq!(overrides.len(), 1);
    assert_eq!(overrides[0].summary.as_deref(), Some("Standup"));
}

/// scope="this" must also strip a *pre-existing* EXDATE entry for the
/// target instant — not just avoid adding one — since RFC 5545 forbids
/// an EXDATE and an override VEVENT for the same RECURRENCE-ID.
#[tokio::test]
async fn scope_this_strips_preexisting_exdate_for_target_instant() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(204).insert_header("ETag", "\"etag-2b\""))
        .mount(&server)
        .await;

    let client = CalDavClient::new(&server.uri(), Some("user"), Some("pass")).unwrap();
    let store = store_in_memory();
    let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap());
    let orchestrator = Orchestrator::new(&client, &store, &clock);

    let collection = Collection::new(format!("{}/cal/", server.uri()), "Work", SourceKind::Caldav);
    let href = format!("{}cal/weekly-2.ics", server.uri());

    // The master already EXDATEs the instant we're about to override
    // (e.g. a stray entry from another client).
    let master_ics = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\nBEGIN:VEVENT\r\nUID:weekly-2\r\nDTSTAMP:20260101T000000Z\r\nDTSTART:20260105T090000Z\r\nDTEND:20260105T100000Z\r\nSUMMARY:Standup\r\nRRULE:FREQ=WEEKLY;BYDAY=MO;COUNT=3\r\nEXDATE:20260112T090000Z\r\nSEQUENCE:0\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
    let mut master_row = {
        let master_event = blank_event("weekly-2", "Standup", "20260105T090000Z", "20260105T100000Z");
        corkboard_core::sync::convert::vevent_to_record(&master_event, &href, Some("etag-1".into()), "acc1", &collection.id, "")
    };
    master_row.rrule = Some("FREQ=WEEKLY;BYDAY=MO;COUNT=3".to_string());
    master_row.exdates = vec!["20260112T090000Z".to_string()];
    let blob_path = store.write_blob("weekly-2", master_ics).unwrap();
    master_row.ics_path = blob_path.to_string_lossy().to_string();
    store.upsert(master_row).unwrap();

    let instance_start = Utc.with_ymd_and_hms(2026, 1, 12, 9, 0, 0).unwrap();
    let new_event = blank_event("weekly-2", "Standup", "20260112T090000Z", "20260112T103000Z");

    orchestrator
        .update_event("acc1", &collection, "weekly-2", &new_event, EditScope::This, Some(instance_start))
        .await
        .unwrap();

    let rows = store.by_uid("weekly-2").unwrap();
    let master = rows.iter().find(|r| r.is_master()).unwrap();
    assert!(
        !master.exdates.iter().any(|e| e.contains("20260112")),
        "a scope=this edit must strip a pre-existing EXDATE for the instant it overrides"
    );
    let overrides: Vec<_> = rows.iter().filter(|r| r.is_override()).collect();
    assert_eq!(overrides.len(), 1);
}

/// `reschedule` shifts a single instance's start while preserving its
/// original duration, reissuing the write as a scope="this" update.
#[tokio::test]
async fn reschedule_preserves_duration() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(204).insert_header("ETag", "\"etag-3\""))
        .mount(&server)
        .await;

    let client = CalDavClient::new(&server.uri(), Some("user"), Some("pass")).unwrap();
    let store = store_in_memory();
    let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap());
    let orchestrator = Orchestrator::new(&client, &store, &clock);

    let collection = Collection::new(format!("{}/cal/", server.uri()), "Work", SourceKind::Caldav);
    let href = format!("{}cal/daily-1.ics", server.uri());

    let master_ics = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\nBEGIN:VEVENT\r\nUID:daily-1\r\nDTSTAMP:20260101T000000Z\r\nDTSTART:20260105T090000Z\r\nDTEND:20260105T093000Z\r\nSUMMARY:Sync\r\nRRULE:FREQ=DAILY;COUNT=5\r\nSEQUENCE:0\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
    let mut master_row = {
        let master_event = blank_event("daily-1", "Sync", "20260105T090000Z", "20260105T093000Z");
        corkboard_core::sync::convert::vevent_to_record(&master_event, &href, Some("etag-1".into()), "acc1", &collection.id, "")
    };
    master_row.rrule = Some("FREQ=DAILY;COUNT=5".to_string());
    let blob_path = store.write_blob("daily-1", master_ics).unwrap();
    master_row.ics_path = blob_path.to_string_lossy().to_string();
    store.upsert(master_row).unwrap();

    let instance_start = Utc.with_ymd_and_hms(2026, 1, 6, 9, 0, 0).unwrap();
    let new_start = Utc.with_ymd_and_hms(2026, 1, 6, 11, 0, 0).unwrap();

    orchestrator
        .reschedule("acc1", &collection, "daily-1", instance_start, new_start, EditScope::This)
        .await
        .unwrap();

    let rows = store.by_uid("daily-1").unwrap();
    let overrides: Vec<_> = rows.iter().filter(|r| r.is_override()).collect();
    assert_eq!(overrides.len(), 1);
    // Original instance ran 09:00-09:30 (30 min); the rescheduled
    // override must preserve that 30-minute span at the new start.
    assert_eq!(overrides[0].dtstart, "20260106T110000Z");
    assert_eq!(overrides[0].dtend.as_deref(), Some("20260106T113000Z"));
}
