use super::*;

fn asset_rows(catalog: &Catalog) -> Result<i64> {
    let conn = catalog.connection()?;
    Ok(conn.query_row("SELECT COUNT(*) FROM assets", [], |row| row.get(0))?)
}

#[test]
fn shared_assets_are_stored_once() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    let first = ready_update(&catalog, "u1", 10, &["logo.png"])?;
    ready_update(&catalog, "u2", 20, &["logo.png"])?;

    assert_eq!(asset_rows(&catalog)?, 3);
    let from_u1 = catalog.asset_by_key("logo.png", HashType::Sha1)?.expect("asset");
    let linked: Vec<Option<i64>> = catalog
        .assets_for_update("u2")?
        .into_iter()
        .filter(|asset| asset.key == "logo.png")
        .map(|asset| asset.row_id)
        .collect();
    assert_eq!(linked, vec![from_u1.row_id]);
    assert_eq!(from_u1.content_hash, first[1].content_hash);
    Ok(())
}

#[test]
fn same_key_with_other_hash_type_is_a_separate_row() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    catalog.add_update(&update("u1", 10))?;
    let sha1 = declared("logo.png", b"png");
    let sha256 = Asset::new(
        "logo.png",
        HashType::Sha256,
        digest_bytes(HashType::Sha256, b"png"),
    );
    catalog.add_assets(&[sha1, sha256], "u1")?;
    assert_eq!(asset_rows(&catalog)?, 2);
    Ok(())
}

#[test]
fn conflicting_digest_is_rejected_and_rolled_back() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    ready_update(&catalog, "u1", 10, &["logo.png"])?;
    catalog.add_update(&update("u2", 20))?;

    let launch = stored(&catalog, "u2.bundle.js", b"u2")?.launch();
    let conflicting = declared("logo.png", b"different bytes");
    let err = catalog.add_assets(&[launch, conflicting], "u2").unwrap_err();
    assert!(matches!(err, UpdatesError::AssetConflict { .. }), "{err}");

    assert!(catalog.assets_for_update("u2")?.is_empty());
    assert!(catalog.asset_by_key("u2.bundle.js", HashType::Sha1)?.is_none());
    Ok(())
}

#[test]
fn linking_to_unknown_update_fails() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    let asset = declared("bundle.js", b"bundle").launch();
    let err = catalog.add_assets(&[asset], "ghost").unwrap_err();
    assert!(matches!(err, UpdatesError::UnknownUpdate(ref id) if id == "ghost"));
    assert_eq!(asset_rows(&catalog)?, 0);
    assert!(matches!(
        catalog.assets_for_update("ghost").unwrap_err(),
        UpdatesError::UnknownUpdate(_)
    ));
    Ok(())
}

#[test]
fn recording_a_download_promotes_waiting_updates() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    catalog.add_update(&update("u1", 10))?;
    let launch = stored(&catalog, "bundle.js", b"bundle")?.launch();
    let image = declared("logo.png", b"png");
    assert_eq!(
        catalog.add_assets(&[launch, image.clone()], "u1")?,
        UpdateStatus::Pending
    );

    let path = catalog.asset_path(&image);
    fs::create_dir_all(path.parent().expect("parent"))?;
    fs::write(&path, b"png")?;
    let promoted = catalog.update_asset_local_path("logo.png", HashType::Sha1, &path)?;
    assert_eq!(promoted, ["u1"]);
    assert_eq!(
        catalog.update_by_id("u1")?.expect("update").status,
        UpdateStatus::Ready
    );

    let err = catalog
        .update_asset_local_path("missing.png", HashType::Sha1, &path)
        .unwrap_err();
    assert!(matches!(err, UpdatesError::UnknownAsset { .. }));
    Ok(())
}

#[test]
fn relinking_fills_in_missing_local_path() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    catalog.add_update(&update("u1", 10))?;
    let launch = stored(&catalog, "bundle.js", b"bundle")?.launch();
    let image = declared("logo.png", b"png");
    catalog.add_assets(&[launch, image], "u1")?;

    let present = stored(&catalog, "logo.png", b"png")?;
    assert_eq!(catalog.add_assets(&[present.clone()], "u1")?, UpdateStatus::Ready);
    let recorded = catalog.asset_by_key("logo.png", HashType::Sha1)?.expect("asset");
    assert_eq!(recorded.local_path, present.local_path);
    Ok(())
}

#[test]
fn launch_asset_lookup() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    let assets = ready_update(&catalog, "u1", 10, &["logo.png", "font.ttf"])?;
    let launch = catalog.launch_asset_for_update("u1")?.expect("launch asset");
    assert!(launch.is_launch_asset);
    assert_eq!(launch.key, assets[0].key);
    assert_eq!(launch.local_path, assets[0].local_path);

    let all = catalog.assets_for_update("u1")?;
    assert_eq!(all.len(), 3);
    assert_eq!(all.iter().filter(|asset| asset.is_launch_asset).count(), 1);
    assert!(catalog.launch_asset_for_update("ghost")?.is_none());
    Ok(())
}

#[test]
fn asset_paths_are_sharded_by_key() -> Result<()> {
    let (_temp, catalog) = new_catalog()?;
    let asset = declared("images/logo.png", b"png");
    let path = catalog.asset_path(&asset);
    assert!(path.starts_with(catalog.assets_dir().join("sha1")));
    assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("png"));
    assert_eq!(path, catalog.asset_path(&asset));
    assert_ne!(path, catalog.asset_path(&declared("images/other.png", b"png")));
    Ok(())
}
