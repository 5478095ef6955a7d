//! The four staging buckets and their apply sequencing.

use crate::{
    namespace::output_to_namespace,
    scene::{SceneError, SceneRefs},
};
use pini_pipe::{
    output::{ContentType, Output},
    Confirm,
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StageError {
    #[error("No reference importer for {0} outputs")]
    UnsupportedContentType(ContentType),
    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// A reference which exists only in the staging set, not yet in the
/// scene. Mutations to it (retarget, rename) happen in place rather
/// than through the live-ref buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRef {
    pub output: Output,
    pub namespace: String,
    /// Namespace of the reference these shaders attach to, for lookdev
    /// companions.
    pub attach_to: Option<String>,
}

impl StagedRef {
    pub fn set_output(&mut self, output: Output) {
        self.output = output;
    }
}

/// Options for staging an import.
#[derive(Debug, Default, Clone)]
pub struct ImportOpts {
    /// Attach the output's shaders to this existing reference instead of
    /// importing it standalone.
    pub attach_to: Option<String>,
    /// Override the namespace base.
    pub base: Option<String>,
    /// Force the namespace (skips conflict resolution).
    pub namespace: Option<String>,
    /// Clear all staged edits first.
    pub reset: bool,
}

/// Result of an apply pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The given number of staged edits were applied.
    Applied(usize),
    /// The user declined; the staged edits are untouched.
    Cancelled,
}

/// Staged edits to a scene's references.
///
/// Nothing here touches the scene until `apply_updates` runs. Live
/// references are keyed by namespace; staged-new references live in the
/// import list and are mutated in place.
#[derive(Debug, Default)]
pub struct StagedSet {
    imports: Vec<StagedRef>,
    deletes: BTreeSet<String>,
    updates: BTreeMap<String, Output>,
    renames: BTreeMap<String, String>,
}

impl StagedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn imports(&self) -> &[StagedRef] {
        &self.imports
    }

    pub fn deletes(&self) -> &BTreeSet<String> {
        &self.deletes
    }

    pub fn updates(&self) -> &BTreeMap<String, Output> {
        &self.updates
    }

    pub fn renames(&self) -> &BTreeMap<String, String> {
        &self.renames
    }

    /// Number of staged edits across all buckets.
    pub fn pending(&self) -> usize {
        self.imports.len() + self.deletes.len() + self.updates.len() + self.renames.len()
    }

    /// Drop all staged edits.
    pub fn reset(&mut self) {
        self.imports.clear();
        self.deletes.clear();
        self.updates.clear();
        self.renames.clear();
    }

    /// Stage an output to be imported, allocating a conflict-free
    /// namespace against both the scene and the other staged imports.
    ///
    /// A forced namespace colliding with a live reference implicitly
    /// stages that reference's delete (the import replaces it). A geo
    /// cache with a published lookdev companion also stages the
    /// companion as `<ns>_shd`, attached to the new reference.
    ///
    /// Returns the newly staged references: the primary first, then any
    /// lookdev companion.
    pub fn stage_import(
        &mut self,
        scene: &dyn SceneRefs,
        output: &Output,
        opts: ImportOpts,
    ) -> Vec<StagedRef> {
        debug!("Staging import {}", output.path.display());
        if opts.reset {
            self.reset();
        }

        let live = scene.namespaces();
        let ignore: Vec<String> = self
            .imports
            .iter()
            .map(|staged| staged.namespace.clone())
            .collect();
        let ns = opts.namespace.clone().unwrap_or_else(|| {
            output_to_namespace(
                output,
                opts.attach_to.as_deref(),
                &ignore,
                opts.base.as_deref(),
                &live,
            )
        });

        // Importing over a live reference replaces it
        if live.iter().any(|existing| existing == &ns) {
            self.stage_delete(&ns);
        }

        let start = self.imports.len();
        self.imports.push(StagedRef {
            output: output.clone(),
            namespace: ns.clone(),
            attach_to: opts.attach_to.clone(),
        });

        // Shaders published alongside a cache come along with it
        if output.content_type == ContentType::GeoAbc && opts.attach_to.is_none() {
            if let Some(lookdev) = &output.lookdev {
                let lookdev_ns = format!("{ns}_shd");
                debug!(" - Adding lookdev companion {lookdev_ns}");
                self.imports.push(StagedRef {
                    output: (**lookdev).clone(),
                    namespace: lookdev_ns,
                    attach_to: Some(ns.clone()),
                });
            }
        }

        self.imports[start..].to_vec()
    }

    /// Stage a retarget of a reference to a different output. A staged-new
    /// reference is retargeted in place; a live one joins the updates
    /// bucket, superseding any pending delete.
    pub fn stage_ref_update(&mut self, namespace: &str, output: Output) {
        debug!("Staging update {namespace} -> {}", output.path.display());
        if let Some(staged) = self.find_import_mut(namespace) {
            staged.set_output(output);
            return;
        }
        self.deletes.remove(namespace);
        self.updates.insert(namespace.to_string(), output);
    }

    /// Stage a reference for deletion. A staged-new reference is simply
    /// dropped from the imports; a live one joins the delete set,
    /// superseding any pending update.
    pub fn stage_delete(&mut self, namespace: &str) {
        debug!("Staging delete {namespace}");
        if self.imports.iter().any(|staged| staged.namespace == namespace) {
            self.imports.retain(|staged| staged.namespace != namespace);
            return;
        }
        self.updates.remove(namespace);
        self.deletes.insert(namespace.to_string());
    }

    /// Stage a namespace change. A staged-new reference is renamed in
    /// place; a live one joins the renames bucket.
    pub fn stage_rename(&mut self, namespace: &str, new_namespace: &str) {
        debug!("Staging rename {namespace} -> {new_namespace}");
        if let Some(staged) = self.find_import_mut(namespace) {
            staged.namespace = new_namespace.to_string();
            return;
        }
        self.renames
            .insert(namespace.to_string(), new_namespace.to_string());
    }

    fn find_import_mut(&mut self, namespace: &str) -> Option<&mut StagedRef> {
        self.imports
            .iter_mut()
            .find(|staged| staged.namespace == namespace)
    }

    /// Apply all staged edits to the scene in a fixed order: deletes,
    /// then imports in ascending namespace order (so a lookdev companion
    /// lands after its parent reference), then updates, then renames.
    ///
    /// Declining the confirmation leaves both the scene and the staged
    /// buckets untouched. On error, edits applied before the failure are
    /// not rolled back; the failed edit and everything not yet applied
    /// stay staged.
    pub fn apply_updates(
        &mut self,
        scene: &mut dyn SceneRefs,
        confirm: &mut dyn Confirm,
        force: bool,
    ) -> Result<ApplyOutcome, StageError> {
        let count = self.pending();
        if count == 0 {
            return Ok(ApplyOutcome::Applied(0));
        }
        if !force {
            let suffix = if count == 1 { "" } else { "s" };
            let msg = format!("Apply {count} scene update{suffix}?");
            if !confirm.confirm(&msg) {
                return Ok(ApplyOutcome::Cancelled);
            }
        }
        info!("Applying {count} scene updates");

        // Each edit leaves its bucket only once it has landed, so a
        // mid-bucket failure keeps the unapplied remainder staged
        while let Some(ns) = self.deletes.first().cloned() {
            scene.delete_ref(&ns)?;
            self.deletes.remove(&ns);
        }

        self.imports.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        while let Some(staged) = self.imports.first().cloned() {
            debug!(" - Importing {}", staged.namespace);
            match (&staged.attach_to, staged.output.content_type) {
                (_, ContentType::CameraAbc) => {
                    scene.create_cam_ref(&staged.output, &staged.namespace)?;
                }
                (_, ContentType::GeoAbc) => {
                    scene.create_abc_ref(&staged.output, &staged.namespace)?;
                }
                (_, ContentType::Vdb) => {
                    scene.create_vdb_ref(&staged.output, &staged.namespace)?;
                }
                (_, ContentType::Render) => {
                    return Err(StageError::UnsupportedContentType(ContentType::Render));
                }
                (Some(target), _) => {
                    scene.attach_shaders(target, &staged.output)?;
                }
                (None, _) => {
                    scene.create_ref(&staged.output, &staged.namespace)?;
                }
            }
            self.imports.remove(0);
        }

        while let Some((ns, output)) = self
            .updates
            .first_key_value()
            .map(|(ns, output)| (ns.clone(), output.clone()))
        {
            scene.update_ref(&ns, &output)?;
            self.updates.remove(&ns);
        }

        while let Some((ns, new_ns)) = self
            .renames
            .first_key_value()
            .map(|(ns, new_ns)| (ns.clone(), new_ns.clone()))
        {
            scene.rename_ref(&ns, &new_ns)?;
            self.renames.remove(&ns);
        }

        Ok(ApplyOutcome::Applied(count))
    }
}

#[cfg(test)]
mod staged_test {
    use super::*;
    use crate::scene::{MemScene, SceneError, SceneOp};
    use pini_pipe::AutoConfirm;

    fn cache(name: &str) -> Output {
        Output::new(
            format!("/jobs/x/{name}.abc"),
            "deer",
            name,
            ContentType::GeoAbc,
        )
    }

    #[test]
    fn update_supersedes_pending_delete() {
        let mut staged = StagedSet::new();
        staged.stage_delete("deer01");
        assert_eq!(staged.deletes().len(), 1);

        staged.stage_ref_update("deer01", cache("deer01"));
        assert!(staged.deletes().is_empty());
        assert_eq!(staged.updates().len(), 1);

        // And the other way round
        staged.stage_delete("deer01");
        assert!(staged.updates().is_empty());
        assert_eq!(staged.deletes().len(), 1);
    }

    #[test]
    fn staged_new_refs_mutate_in_place() {
        let scene = MemScene::new();
        let mut staged = StagedSet::new();
        let refs = staged.stage_import(&scene, &cache("deer01"), ImportOpts::default());
        assert_eq!(refs[0].namespace, "deer01");
        let ns = refs[0].namespace.clone();

        staged.stage_ref_update(&ns, cache("deer02"));
        assert_eq!(staged.imports()[0].output.name, "deer02");
        assert!(staged.updates().is_empty());

        staged.stage_rename(&ns, "stag01");
        assert_eq!(staged.imports()[0].namespace, "stag01");
        assert!(staged.renames().is_empty());

        staged.stage_delete("stag01");
        assert!(staged.imports().is_empty());
        assert_eq!(staged.pending(), 0);
    }

    #[test]
    fn forced_namespace_collision_replaces_live_ref() {
        let scene = MemScene::with_refs(&["deer01"]);
        let mut staged = StagedSet::new();
        let opts = ImportOpts {
            namespace: Some("deer01".to_string()),
            ..ImportOpts::default()
        };
        let refs = staged.stage_import(&scene, &cache("deer01"), opts);
        assert_eq!(refs[0].namespace, "deer01");
        assert!(staged.deletes().contains("deer01"));
        assert_eq!(staged.imports().len(), 1);
    }

    #[test]
    fn render_outputs_cannot_be_imported() {
        let mut scene = MemScene::new();
        let mut staged = StagedSet::new();
        let render = Output::new(
            "/jobs/x/bg_v001.%04d.exr",
            "shot010",
            "bg",
            ContentType::Render,
        );
        staged.stage_import(&scene, &render, ImportOpts::default());
        let result = staged.apply_updates(&mut scene, &mut AutoConfirm, true);
        assert_eq!(
            result,
            Err(StageError::UnsupportedContentType(ContentType::Render))
        );
        assert_eq!(staged.pending(), 1);
    }

    #[test]
    fn failed_apply_keeps_unapplied_edits_staged() {
        let mut scene = MemScene::with_refs(&["old01", "upd01"]);
        let mut staged = StagedSet::new();
        staged.stage_delete("old01");
        staged.stage_ref_update("missing01", cache("missing01"));
        staged.stage_ref_update("upd01", cache("upd01"));
        staged.stage_rename("upd01", "upd02");

        // "missing01" drains first and fails
        let result = staged.apply_updates(&mut scene, &mut AutoConfirm, true);
        assert_eq!(
            result,
            Err(StageError::Scene(SceneError::MissingRef(
                "missing01".to_string()
            )))
        );

        // The delete landed; the failed edit and the rest of its bucket
        // are retained, as is the untouched renames bucket
        assert_eq!(
            scene.ops,
            vec![SceneOp::DeleteRef {
                namespace: "old01".to_string(),
            }]
        );
        assert!(staged.deletes().is_empty());
        assert_eq!(staged.updates().len(), 2);
        assert_eq!(staged.renames().len(), 1);
        assert_eq!(staged.pending(), 3);
    }
}
