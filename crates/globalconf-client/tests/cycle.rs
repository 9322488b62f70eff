//! End-to-end refresh cycle tests against an in-memory fetcher.
//!
//! These tests verify:
//! - A valid directory is persisted with its index and instance identifier
//! - Expired directories fail with exit code 123 and leave disk untouched
//! - Only transport failures fall through to the next location
//! - Extension failures are contained and only shared parameters are taken
//! - Extensions declared by an extension are not followed
//! - Unreadable private parameters reject the directory before any write
//! - Sources no longer declared are garbage collected
//! - Validation enforces content requirements without writing anything
//! - Downgrades are rejected and leave stored configuration intact
//! - A failed write is an internal error that the next cycle repairs
//! - Repeating a cycle against unchanged input changes nothing

mod common;

use chrono::Duration;
use common::{client, now, snapshot, Publisher, StaticFetcher};
use globalconf_client::{ClientContext, ConfigurationClient, CycleOptions};
use globalconf_directory::DirectoryWriter;
use globalconf_store::{ConfigurationStore, DownloadedFiles};
use globalconf_types::{exit_code, ContentId, ContentRequirement, Outcome};
use std::sync::Arc;

#[tokio::test]
async fn valid_directory_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fetcher = StaticFetcher::default();
    fetcher.serve(
        ee.url(0),
        ee.directory(1, now() + Duration::hours(1), Some(&ee.private_params(&[]))),
    );

    let client = client(&fetcher, ee.anchor(1), dir.path());
    let report = client.run_cycle(&CycleOptions::daemon()).await;

    assert_eq!(report.outcome, Outcome::Success, "{:?}", report.error);
    assert_eq!(report.exit_code(), exit_code::SUCCESS);
    assert_eq!(report.primary_instance, "EE");
    assert_eq!(
        report.persisted,
        vec!["EE/private-parameters", "EE/shared-parameters"]
    );

    let store = client.store();
    assert_eq!(
        std::fs::read(store.part_path("EE", &ContentId::SharedParameters)).unwrap(),
        ee.shared_content(1)
    );
    assert_eq!(store.read_instance_identifier().unwrap().as_deref(), Some("EE"));

    let index = DownloadedFiles::load(store.index_path()).unwrap();
    assert_eq!(index.len(), 2);
    assert!(index.entries().all(|e| e.source == "EE" && e.version == 1));

    let last = client.last_report().unwrap();
    assert_eq!(last.cycle_id, report.cycle_id);
}

#[tokio::test]
async fn expired_directory_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fetcher = StaticFetcher::default();
    fetcher.serve(ee.url(0), ee.directory(1, now() - Duration::minutes(1), None));

    let client = client(&fetcher, ee.anchor(1), dir.path());
    let report = client.run_cycle(&CycleOptions::daemon()).await;

    assert_eq!(report.outcome, Outcome::Expired);
    assert_eq!(report.exit_code(), 123);
    assert!(snapshot(dir.path()).is_empty());
}

#[tokio::test]
async fn expired_directory_passes_validation_when_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fetcher = StaticFetcher::default();
    fetcher.serve(ee.url(0), ee.directory(1, now() - Duration::minutes(1), None));

    let client = client(&fetcher, ee.anchor(1), dir.path());
    let report = client
        .run_cycle(&CycleOptions::validate(ContentRequirement::None, true))
        .await;

    assert_eq!(report.outcome, Outcome::Success);
    assert!(snapshot(dir.path()).is_empty());
}

#[tokio::test]
async fn transport_failure_falls_through_to_next_location() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fetcher = StaticFetcher::default();
    // Location 0 serves nothing (404); location 1 serves the directory.
    fetcher.serve(ee.url(1), ee.directory(1, now() + Duration::hours(1), None));

    let client = client(&fetcher, ee.anchor(2), dir.path());
    let report = client.run_cycle(&CycleOptions::daemon()).await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(fetcher.requests(), vec![ee.url(0), ee.url(1)]);
}

#[tokio::test]
async fn verification_failure_does_not_fall_through() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let impostor = Publisher::new("EE");
    let fetcher = StaticFetcher::default();
    fetcher.serve(
        ee.url(0),
        impostor.directory(1, now() + Duration::hours(1), None),
    );
    fetcher.serve(ee.url(1), ee.directory(1, now() + Duration::hours(1), None));

    let client = client(&fetcher, ee.anchor(2), dir.path());
    let report = client.run_cycle(&CycleOptions::daemon()).await;

    assert_eq!(report.outcome, Outcome::SignatureInvalid);
    assert_eq!(report.exit_code(), 124);
    assert_eq!(fetcher.requests(), vec![ee.url(0)]);
    assert!(snapshot(dir.path()).is_empty());
}

#[tokio::test]
async fn all_locations_failing_is_a_download_failure() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fetcher = StaticFetcher::default();

    let client = client(&fetcher, ee.anchor(3), dir.path());
    let report = client.run_cycle(&CycleOptions::daemon()).await;

    assert_eq!(report.outcome, Outcome::DownloadFailed);
    assert_eq!(report.exit_code(), 122);
    assert_eq!(fetcher.requests().len(), 3);
    assert!(report.error.unwrap().contains("all 3 download locations failed"));
}

#[tokio::test]
async fn anchor_without_locations_is_an_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fetcher = StaticFetcher::default();

    let client = client(&fetcher, ee.anchor(0), dir.path());
    let report = client.run_cycle(&CycleOptions::daemon()).await;

    assert_eq!(report.outcome, Outcome::InternalError);
    assert_eq!(report.exit_code(), 125);
    assert!(fetcher.requests().is_empty());
}

#[tokio::test]
async fn extension_failures_are_contained() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fi = Publisher::new("FI");
    let lv = Publisher::new("LV");
    let fetcher = StaticFetcher::default();
    let expires = now() + Duration::hours(1);

    fetcher.serve(
        ee.url(0),
        ee.directory(1, expires, Some(&ee.private_params(&[&fi, &lv]))),
    );
    // FI also publishes private parameters; only its shared part is taken.
    fetcher.serve(
        fi.url(0),
        fi.directory(7, expires, Some(&fi.private_params(&[]))),
    );
    // LV is not served at all.

    let client = client(&fetcher, ee.anchor(1), dir.path());
    let report = client.run_cycle(&CycleOptions::daemon()).await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.extensions.len(), 2);
    assert_eq!(report.extensions[0].instance, "FI");
    assert_eq!(report.extensions[0].outcome, Outcome::Success);
    assert_eq!(report.extensions[0].persisted, vec!["FI/shared-parameters"]);
    assert_eq!(report.extensions[1].instance, "LV");
    assert_eq!(report.extensions[1].outcome, Outcome::DownloadFailed);

    let store = client.store();
    assert_eq!(
        std::fs::read(store.part_path("FI", &ContentId::SharedParameters)).unwrap(),
        fi.shared_content(7)
    );
    assert!(!store.part_path("FI", &ContentId::PrivateParameters).exists());
    assert!(!dir.path().join("LV").exists());

    let index = DownloadedFiles::load(store.index_path()).unwrap();
    let fi_entry = index.get("FI/shared-parameters").unwrap();
    assert_eq!(fi_entry.source, "FI");
    assert_eq!(fi_entry.version, 7);
}

#[tokio::test]
async fn extensions_of_extensions_are_not_followed() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fi = Publisher::new("FI");
    let lt = Publisher::new("LT");
    let fetcher = StaticFetcher::default();
    let expires = now() + Duration::hours(1);

    fetcher.serve(
        ee.url(0),
        ee.directory(1, expires, Some(&ee.private_params(&[&fi]))),
    );
    fetcher.serve(
        fi.url(0),
        fi.directory(1, expires, Some(&fi.private_params(&[&lt]))),
    );
    fetcher.serve(lt.url(0), lt.directory(1, expires, None));

    let client = client(&fetcher, ee.anchor(1), dir.path());
    let report = client.run_cycle(&CycleOptions::daemon()).await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.extensions.len(), 1);
    assert_eq!(report.extensions[0].instance, "FI");
    assert_eq!(fetcher.requests(), vec![ee.url(0), fi.url(0)]);
    assert!(!fetcher.requests().contains(&lt.url(0)));
    assert!(!dir.path().join("LT").exists());

    let index = DownloadedFiles::load(client.store().index_path()).unwrap();
    assert!(index.entries().all(|e| e.instance != "LT"));
}

#[tokio::test]
async fn unreadable_private_parameters_leave_disk_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fetcher = StaticFetcher::default();
    let expires = now() + Duration::hours(1);

    let v1 = DirectoryWriter::new()
        .file(
            ContentId::Other("MONITORING".to_string()),
            "EE",
            1,
            expires,
            b"<monitoring/>".to_vec(),
        )
        .file(
            ContentId::PrivateParameters,
            "EE",
            1,
            expires,
            serde_json::to_vec(&ee.private_params(&[])).unwrap(),
        )
        .file(ContentId::SharedParameters, "EE", 1, expires, ee.shared_content(1))
        .sign(&ee.key);
    fetcher.serve(ee.url(0), v1);

    let client = client(&fetcher, ee.anchor(1), dir.path());
    assert_eq!(
        client.run_cycle(&CycleOptions::daemon()).await.outcome,
        Outcome::Success
    );
    let before = snapshot(dir.path());

    let v2 = DirectoryWriter::new()
        .file(ContentId::PrivateParameters, "EE", 2, expires, b"not json".to_vec())
        .file(ContentId::SharedParameters, "EE", 2, expires, ee.shared_content(2))
        .sign(&ee.key);
    fetcher.serve(ee.url(0), v2);
    let report = client.run_cycle(&CycleOptions::daemon()).await;

    assert_eq!(report.outcome, Outcome::MalformedDocument);
    assert_eq!(report.exit_code(), 125);
    assert!(report.persisted.is_empty());
    assert_eq!(snapshot(dir.path()), before);

    let index = DownloadedFiles::load(client.store().index_path()).unwrap();
    assert_eq!(index.get("EE/shared-parameters").unwrap().version, 1);
    assert!(index.get("EE/monitoring").is_some());
}

#[tokio::test]
async fn skipped_extensions_are_not_fetched() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fi = Publisher::new("FI");
    let fetcher = StaticFetcher::default();
    let expires = now() + Duration::hours(1);
    fetcher.serve(
        ee.url(0),
        ee.directory(1, expires, Some(&ee.private_params(&[&fi]))),
    );
    fetcher.serve(fi.url(0), fi.directory(1, expires, None));

    let client = client(&fetcher, ee.anchor(1), dir.path());
    let report = client.run_cycle(&CycleOptions::download()).await;

    assert_eq!(report.outcome, Outcome::Success);
    assert!(report.extensions.is_empty());
    assert_eq!(fetcher.requests(), vec![ee.url(0)]);
}

#[tokio::test]
async fn undeclared_sources_are_garbage_collected() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fi = Publisher::new("FI");
    let fetcher = StaticFetcher::default();
    let expires = now() + Duration::hours(1);
    fetcher.serve(
        ee.url(0),
        ee.directory(1, expires, Some(&ee.private_params(&[&fi]))),
    );
    fetcher.serve(fi.url(0), fi.directory(1, expires, None));

    let client = client(&fetcher, ee.anchor(1), dir.path());
    assert_eq!(
        client.run_cycle(&CycleOptions::daemon()).await.outcome,
        Outcome::Success
    );
    assert!(client
        .store()
        .part_path("FI", &ContentId::SharedParameters)
        .exists());

    // EE stops declaring FI.
    fetcher.serve(
        ee.url(0),
        ee.directory(2, expires, Some(&ee.private_params(&[]))),
    );
    let report = client.run_cycle(&CycleOptions::daemon()).await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.deleted, vec!["FI/shared-parameters"]);
    assert!(!dir.path().join("FI").exists());
    let index = DownloadedFiles::load(client.store().index_path()).unwrap();
    assert!(index.entries().all(|e| e.source == "EE"));
}

#[tokio::test]
async fn failed_extension_keeps_previous_files() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fi = Publisher::new("FI");
    let fetcher = StaticFetcher::default();
    let expires = now() + Duration::hours(1);
    fetcher.serve(
        ee.url(0),
        ee.directory(1, expires, Some(&ee.private_params(&[&fi]))),
    );
    fetcher.serve(fi.url(0), fi.directory(1, expires, None));

    let client = client(&fetcher, ee.anchor(1), dir.path());
    client.run_cycle(&CycleOptions::daemon()).await;

    fetcher.unserve(&fi.url(0));
    let report = client.run_cycle(&CycleOptions::daemon()).await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.extensions[0].outcome, Outcome::DownloadFailed);
    assert_eq!(
        std::fs::read(client.store().part_path("FI", &ContentId::SharedParameters)).unwrap(),
        fi.shared_content(1)
    );
}

#[tokio::test]
async fn validate_requires_private_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fetcher = StaticFetcher::default();
    fetcher.serve(ee.url(0), ee.directory(1, now() + Duration::hours(1), None));

    let store = ConfigurationStore::new(dir.path());
    let client = ConfigurationClient::new(
        fetcher.clone(),
        store,
        ClientContext::new(ee.anchor(1), DownloadedFiles::detached()),
    )
    .with_clock(Arc::new(now));
    let report = client
        .run_cycle(&CycleOptions::validate(
            ContentRequirement::PrivateParameters,
            false,
        ))
        .await;

    assert_eq!(
        report.outcome,
        Outcome::MissingRequiredContent(ContentRequirement::PrivateParameters)
    );
    assert_eq!(report.exit_code(), 121);
    assert!(snapshot(dir.path()).is_empty());
}

#[tokio::test]
async fn validate_external_anchor_rejects_private_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fetcher = StaticFetcher::default();
    fetcher.serve(
        ee.url(0),
        ee.directory(1, now() + Duration::hours(1), Some(&ee.private_params(&[]))),
    );

    let client = client(&fetcher, ee.anchor(1), dir.path());
    let report = client
        .run_cycle(&CycleOptions::validate(
            ContentRequirement::ExternalAnchor,
            false,
        ))
        .await;

    assert_eq!(report.exit_code(), 120);
    assert!(snapshot(dir.path()).is_empty());

    fetcher.serve(ee.url(0), ee.directory(1, now() + Duration::hours(1), None));
    let report = client
        .run_cycle(&CycleOptions::validate(
            ContentRequirement::ExternalAnchor,
            false,
        ))
        .await;
    assert_eq!(report.outcome, Outcome::Success);
    assert!(snapshot(dir.path()).is_empty());
}

#[tokio::test]
async fn downgrade_leaves_state_unmodified() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fetcher = StaticFetcher::default();
    let expires = now() + Duration::hours(1);
    fetcher.serve(ee.url(0), ee.directory(3, expires, None));

    let client = client(&fetcher, ee.anchor(1), dir.path());
    assert_eq!(
        client.run_cycle(&CycleOptions::daemon()).await.outcome,
        Outcome::Success
    );
    let before = snapshot(dir.path());

    fetcher.serve(ee.url(0), ee.directory(2, expires, None));
    let report = client.run_cycle(&CycleOptions::daemon()).await;

    assert_eq!(report.outcome, Outcome::StaleVersion);
    assert_eq!(report.exit_code(), 123);
    assert_eq!(snapshot(dir.path()), before);
}

#[tokio::test]
async fn store_failure_is_internal_and_next_cycle_repairs() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fetcher = StaticFetcher::default();
    fetcher.serve(ee.url(0), ee.directory(1, now() + Duration::hours(1), None));

    let client = client(&fetcher, ee.anchor(1), dir.path());
    let blocker = client.store().part_path("EE", &ContentId::SharedParameters);
    std::fs::create_dir_all(blocker.join("occupied")).unwrap();

    let report = client.run_cycle(&CycleOptions::daemon()).await;
    assert_eq!(report.outcome, Outcome::InternalError);
    assert!(!client.store().index_path().exists());

    std::fs::remove_dir_all(&blocker).unwrap();
    let report = client.run_cycle(&CycleOptions::daemon()).await;
    assert_eq!(report.outcome, Outcome::Success, "{:?}", report.error);
    assert_eq!(
        std::fs::read(&blocker).unwrap(),
        ee.shared_content(1)
    );
    let index = DownloadedFiles::load(client.store().index_path()).unwrap();
    assert_eq!(index.get("EE/shared-parameters").unwrap().version, 1);
}

#[tokio::test]
async fn repeated_cycles_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let fi = Publisher::new("FI");
    let fetcher = StaticFetcher::default();
    let expires = now() + Duration::hours(1);
    fetcher.serve(
        ee.url(0),
        ee.directory(1, expires, Some(&ee.private_params(&[&fi]))),
    );
    fetcher.serve(fi.url(0), fi.directory(1, expires, None));

    let client = client(&fetcher, ee.anchor(1), dir.path());
    client.run_cycle(&CycleOptions::daemon()).await;
    let first = snapshot(dir.path());

    let report = client.run_cycle(&CycleOptions::daemon()).await;
    assert_eq!(report.outcome, Outcome::Success);
    assert!(report.deleted.is_empty());
    assert_eq!(snapshot(dir.path()), first);
}

#[tokio::test]
async fn reloaded_anchor_is_used_by_next_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let ee = Publisher::new("EE");
    let rotated = Publisher::new("EE");
    let fetcher = StaticFetcher::default();
    fetcher.serve(
        ee.url(0),
        rotated.directory(1, now() + Duration::hours(1), None),
    );

    let client = client(&fetcher, ee.anchor(1), dir.path().join("conf").as_path());
    assert_eq!(
        client.run_cycle(&CycleOptions::daemon()).await.outcome,
        Outcome::SignatureInvalid
    );

    let anchor_path = dir.path().join("anchor.json");
    std::fs::write(&anchor_path, rotated.anchor(1).to_json().unwrap()).unwrap();
    client.reload_anchor(&anchor_path).await.unwrap();

    assert_eq!(
        client.run_cycle(&CycleOptions::daemon()).await.outcome,
        Outcome::Success
    );
}
