use super::*;
use crate::catalog::schema::overwrite_meta;

#[test]
fn open_creates_layout_and_reopens() -> Result<()> {
    let (temp, catalog) = new_catalog()?;
    assert!(catalog.assets_dir().is_dir());
    assert!(catalog.database_path().is_file());
    catalog.add_update(&update("u1", 10))?;

    let reopened = Catalog::open(temp.path().join("store"))?;
    assert!(reopened.update_by_id("u1")?.is_some());
    Ok(())
}

#[test]
fn incompatible_schema_is_reported_not_rewritten() -> Result<()> {
    let (temp, catalog) = new_catalog()?;
    overwrite_meta(&catalog, "schema_version", "999")?;

    let err = Catalog::open(temp.path().join("store")).unwrap_err();
    assert!(matches!(err, UpdatesError::IncompatibleSchema { .. }), "{err}");

    let conn = catalog.connection()?;
    let version: String = conn.query_row(
        "SELECT value FROM meta WHERE key = 'schema_version'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(version, "999");
    Ok(())
}

#[test]
fn unopenable_root_is_store_unavailable() -> Result<()> {
    let temp = tempdir()?;
    let blocker = temp.path().join("not-a-dir");
    fs::write(&blocker, b"file")?;
    let err = Catalog::open(blocker.join("store")).unwrap_err();
    assert!(matches!(err, UpdatesError::StoreUnavailable { .. }), "{err}");
    Ok(())
}

#[test]
fn duplicate_update_id_is_rejected() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    catalog.add_update(&update("u1", 10))?;
    let err = catalog.add_update(&update("u1", 20)).unwrap_err();
    assert!(matches!(err, UpdatesError::DuplicateId(ref id) if id == "u1"));

    let stored = catalog.update_by_id("u1")?.expect("update recorded");
    assert_eq!(stored.commit_time, 10);
    Ok(())
}

#[test]
fn update_round_trips_metadata_and_starts_pending() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    let mut original = update("u1", 42);
    original.status = UpdateStatus::Ready;
    catalog.add_update(&original)?;

    let stored = catalog.update_by_id("u1")?.expect("update recorded");
    assert_eq!(stored.status, UpdateStatus::Pending);
    assert_eq!(stored.metadata.get("channel"), Some(&json!("default")));
    assert_eq!(stored.raw_manifest, original.raw_manifest);
    assert!(catalog.update_by_id("missing")?.is_none());
    Ok(())
}

#[test]
fn launchable_updates_are_ordered_and_filtered() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    ready_update(&catalog, "b", 20, &[])?;
    ready_update(&catalog, "a", 20, &[])?;
    ready_update(&catalog, "c", 30, &[])?;
    ready_update(&catalog, "old", 5, &[])?;
    catalog.add_update(&update("pending", 100))?;

    let ids: Vec<String> = catalog
        .launchable_updates()?
        .into_iter()
        .map(|update| update.id)
        .collect();
    assert_eq!(ids, ["c", "a", "b", "old"]);

    catalog.mark_for_deletion("a", BINARY)?;
    let ids: Vec<String> = catalog
        .launchable_updates()?
        .into_iter()
        .map(|update| update.id)
        .collect();
    assert_eq!(ids, ["c", "a", "b"]);
    Ok(())
}

#[test]
fn mark_ready_lists_missing_assets() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    catalog.add_update(&update("u1", 10))?;
    let launch = stored(&catalog, "bundle.js", b"bundle")?.launch();
    let image = declared("logo.png", b"png");
    let status = catalog.add_assets(&[launch, image], "u1")?;
    assert_eq!(status, UpdateStatus::Pending);

    match catalog.mark_ready("u1").unwrap_err() {
        UpdatesError::IncompleteAssets {
            update_id,
            missing,
            launch_assets,
        } => {
            assert_eq!(update_id, "u1");
            assert_eq!(missing, ["logo.png"]);
            assert_eq!(launch_assets, 1);
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(matches!(
        catalog.mark_ready("nope").unwrap_err(),
        UpdatesError::UnknownUpdate(_)
    ));
    Ok(())
}

#[test]
fn mark_ready_requires_a_single_launch_asset() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    catalog.add_update(&update("u1", 10))?;
    let a = stored(&catalog, "a.js", b"a")?;
    catalog.add_assets(&[a], "u1")?;
    match catalog.mark_ready("u1").unwrap_err() {
        UpdatesError::IncompleteAssets {
            missing,
            launch_assets,
            ..
        } => {
            assert!(missing.is_empty());
            assert_eq!(launch_assets, 0);
        }
        other => panic!("unexpected error {other}"),
    }
    Ok(())
}

#[test]
fn mark_ready_is_idempotent_once_launchable() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    ready_update(&catalog, "u1", 10, &["logo.png"])?;
    assert_eq!(catalog.mark_ready("u1")?, UpdateStatus::Ready);
    Ok(())
}

#[test]
fn embedded_updates_promote_to_embedded() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    let mut embedded = update("e1", 0);
    embedded.status = UpdateStatus::Embedded;
    catalog.add_update(&embedded)?;
    let launch = stored(&catalog, "bundle.js", b"embedded bundle")?.launch();
    assert_eq!(catalog.add_assets(&[launch], "e1")?, UpdateStatus::Embedded);
    Ok(())
}

#[test]
fn all_updates_reports_marks_and_counts() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    ready_update(&catalog, "old", 1, &["shared.png"])?;
    ready_update(&catalog, "new", 2, &["shared.png"])?;
    catalog.mark_for_deletion("new", BINARY)?;

    let entries = catalog.all_updates()?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].update.id, "new");
    assert!(!entries[0].marked_for_deletion);
    assert_eq!(entries[0].asset_count, 2);
    assert!(entries[1].marked_for_deletion);
    Ok(())
}
