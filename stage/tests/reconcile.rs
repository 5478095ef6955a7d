//! End-to-end reconciliation scenarios against the in-memory scene.

use pini_pipe::output::{ContentType, Output};
use pini_pipe::{AutoConfirm, DenyConfirm};
use pini_stage::{ApplyOutcome, ImportOpts, MemScene, SceneOp, SceneRefs, StagedSet};

fn abc_with_lookdev(name: &str) -> Output {
    let lookdev = Output::new(
        format!("/jobs/x/publish/{name}_lookdev.ma"),
        "deer",
        "lookdev",
        ContentType::Lookdev,
    );
    Output::new(
        format!("/jobs/x/cache/{name}.abc"),
        "deer",
        name,
        ContentType::GeoAbc,
    )
    .with_lookdev(lookdev)
}

#[test]
fn lookdev_companion_lands_after_its_cache() {
    let mut scene = MemScene::new();
    let mut staged = StagedSet::new();

    let refs = staged.stage_import(&scene, &abc_with_lookdev("deer01"), ImportOpts::default());
    assert_eq!(refs.len(), 2);
    assert_eq!(refs[0].namespace, "deer01");
    assert_eq!(refs[1].namespace, "deer01_shd");
    assert_eq!(refs[1].attach_to.as_deref(), Some("deer01"));
    assert_eq!(staged.pending(), 2);

    let outcome = staged
        .apply_updates(&mut scene, &mut AutoConfirm, true)
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied(2));

    assert_eq!(
        scene.ops,
        vec![
            SceneOp::CreateAbcRef {
                namespace: "deer01".to_string(),
                path: "/jobs/x/cache/deer01.abc".to_string(),
            },
            SceneOp::AttachShaders {
                namespace: "deer01".to_string(),
                path: "/jobs/x/publish/deer01_lookdev.ma".to_string(),
            },
        ]
    );
}

#[test]
fn apply_order_is_delete_import_update_rename() {
    let mut scene = MemScene::with_refs(&["old01", "upd01", "ren01"]);
    let mut staged = StagedSet::new();

    staged.stage_rename("ren01", "ren02");
    staged.stage_ref_update(
        "upd01",
        Output::new("/jobs/x/cache/upd01_v002.abc", "deer", "upd01", ContentType::GeoAbc),
    );
    staged.stage_import(
        &scene,
        &Output::new("/jobs/x/cache/new01.abc", "fox", "new01", ContentType::GeoAbc),
        ImportOpts::default(),
    );
    staged.stage_delete("old01");

    let outcome = staged
        .apply_updates(&mut scene, &mut AutoConfirm, true)
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied(4));

    let kinds: Vec<&str> = scene
        .ops
        .iter()
        .map(|op| match op {
            SceneOp::DeleteRef { .. } => "delete",
            SceneOp::CreateAbcRef { .. } => "import",
            SceneOp::UpdateRef { .. } => "update",
            SceneOp::RenameRef { .. } => "rename",
            other => panic!("unexpected op {other:?}"),
        })
        .collect();
    assert_eq!(kinds, vec!["delete", "import", "update", "rename"]);
    assert_eq!(scene.namespaces(), vec!["upd01", "ren02", "new01"]);
}

#[test]
fn import_over_live_namespace_replaces_the_ref() {
    let mut scene = MemScene::with_refs(&["deer01"]);
    let mut staged = StagedSet::new();

    let newer = Output::new(
        "/jobs/x/cache/deer01_v002.abc",
        "deer",
        "deer01",
        ContentType::GeoAbc,
    );
    let refs = staged.stage_import(
        &scene,
        &newer,
        ImportOpts {
            namespace: Some("deer01".to_string()),
            ..ImportOpts::default()
        },
    );
    assert_eq!(refs[0].namespace, "deer01");

    staged
        .apply_updates(&mut scene, &mut AutoConfirm, true)
        .unwrap();

    // Exactly one ref at the namespace, pointing at the staged output
    assert_eq!(scene.namespaces(), vec!["deer01"]);
    assert_eq!(
        scene.ops,
        vec![
            SceneOp::DeleteRef {
                namespace: "deer01".to_string(),
            },
            SceneOp::CreateAbcRef {
                namespace: "deer01".to_string(),
                path: "/jobs/x/cache/deer01_v002.abc".to_string(),
            },
        ]
    );
}

#[test]
fn declined_confirmation_has_no_side_effects() {
    let mut scene = MemScene::with_refs(&["deer01"]);
    let mut staged = StagedSet::new();
    staged.stage_delete("deer01");
    staged.stage_import(
        &scene,
        &Output::new("/jobs/x/cache/fox01.abc", "fox", "fox01", ContentType::GeoAbc),
        ImportOpts::default(),
    );

    let outcome = staged
        .apply_updates(&mut scene, &mut DenyConfirm, false)
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Cancelled);

    // Scene untouched, staged edits retained for a later apply
    assert!(scene.ops.is_empty());
    assert_eq!(scene.namespaces(), vec!["deer01"]);
    assert_eq!(staged.pending(), 2);

    let outcome = staged
        .apply_updates(&mut scene, &mut AutoConfirm, false)
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied(2));
    assert_eq!(scene.namespaces(), vec!["fox01"]);
}

#[test]
fn namespaces_allocate_clear_of_scene_and_staged() {
    let scene = MemScene::with_refs(&["deer01"]);
    let mut staged = StagedSet::new();

    let cache = Output::new("/jobs/x/cache/deer01.abc", "deer", "deer01", ContentType::GeoAbc);
    let first = staged.stage_import(&scene, &cache, ImportOpts::default());
    let second = staged.stage_import(&scene, &cache, ImportOpts::default());
    assert_eq!(first[0].namespace, "deer011");
    assert_eq!(second[0].namespace, "deer012");

    // No implicit deletes were staged - the live ref was never claimed
    assert!(staged.deletes().is_empty());
}

#[test]
fn camera_and_vdb_imports_use_typed_creators() {
    let mut scene = MemScene::new();
    let mut staged = StagedSet::new();

    staged.stage_import(
        &scene,
        &Output::new(
            "/jobs/x/cache/renderCam.abc",
            "shot010",
            "renderCam",
            ContentType::CameraAbc,
        ),
        ImportOpts::default(),
    );
    staged.stage_import(
        &scene,
        &Output::new("/jobs/x/cache/smoke01.vdb", "smoke", "smoke01", ContentType::Vdb),
        ImportOpts::default(),
    );

    staged
        .apply_updates(&mut scene, &mut AutoConfirm, true)
        .unwrap();
    assert!(matches!(scene.ops[0], SceneOp::CreateCamRef { .. }));
    assert!(matches!(scene.ops[1], SceneOp::CreateVdbRef { .. }));
}
