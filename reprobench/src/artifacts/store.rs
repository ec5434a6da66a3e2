//! Filesystem-backed freshness tracking.

use crate::layout::Layout;
use crate::pipeline::StageSpec;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, trace};

/// Decides whether stages are up to date.
///
/// Nothing is cached: every query reads the filesystem, so manual deletion
/// or touching of artifacts between runs is always honoured.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: Layout,
}

impl ArtifactStore {
    /// Creates a store over the given layout.
    #[must_use]
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Returns the layout.
    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Returns the modification time of `path`, or `None` if it is missing.
    #[must_use]
    pub fn modified(path: &Path) -> Option<SystemTime> {
        fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    /// True iff every artifact exists and none is older than any dependency.
    ///
    /// A missing dependency makes the artifacts stale. An empty artifact list
    /// is never fresh.
    #[must_use]
    pub fn is_fresh(artifacts: &[PathBuf], dependencies: &[PathBuf]) -> bool {
        if artifacts.is_empty() {
            return false;
        }

        let mut newest_dep = None;
        for dep in dependencies {
            let Some(mtime) = Self::modified(dep) else {
                trace!(dependency = %dep.display(), "Dependency missing");
                return false;
            };
            newest_dep = newest_dep.max(Some(mtime));
        }

        artifacts.iter().all(|artifact| match Self::modified(artifact) {
            Some(mtime) => newest_dep.map_or(true, |dep| mtime >= dep),
            None => {
                trace!(artifact = %artifact.display(), "Artifact missing");
                false
            }
        })
    }

    /// The paths proving a stage's completion: its declared outputs, or its
    /// stamp when it declares none.
    #[must_use]
    pub fn stage_artifacts(&self, spec: &StageSpec) -> Vec<PathBuf> {
        if spec.outputs.is_empty() {
            vec![self.layout.stamp(&spec.id)]
        } else {
            spec.outputs.clone()
        }
    }

    /// True iff the stage's stamp exists and holds `key`.
    ///
    /// `key` is the stage's resolved key (see [`StageSpec::resolved_key`]).
    #[must_use]
    pub fn stamp_matches(&self, spec: &StageSpec, key: &str) -> bool {
        fs::read_to_string(self.layout.stamp(&spec.id))
            .map(|stamp| stamp.trim() == key)
            .unwrap_or(false)
    }

    /// Full freshness check for a stage against its dependencies' artifacts.
    #[must_use]
    pub fn stage_is_fresh(&self, spec: &StageSpec, key: &str, dependencies: &[&StageSpec]) -> bool {
        if !self.stamp_matches(spec, key) {
            debug!(stage = %spec.id, "Stamp missing or outdated");
            return false;
        }

        let dep_artifacts: Vec<PathBuf> = dependencies
            .iter()
            .flat_map(|dep| self.stage_artifacts(dep))
            .collect();
        Self::is_fresh(&self.stage_artifacts(spec), &dep_artifacts)
    }

    /// Marks a stage complete: touches its outputs and writes `key` to its
    /// stamp.
    ///
    /// Outputs are touched so that a stage whose tool left an existing file
    /// unmodified still counts as newer than the dependencies it just
    /// consumed.
    ///
    /// # Errors
    ///
    /// Returns an error if a declared output is missing or cannot be touched.
    pub fn record(&self, spec: &StageSpec, key: &str) -> io::Result<()> {
        let now = SystemTime::now();
        for output in &spec.outputs {
            touch(output, now).map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("declared output {} of stage '{}': {e}", output.display(), spec.id),
                )
            })?;
        }

        let stamp = self.layout.stamp(&spec.id);
        fs::create_dir_all(self.layout.stamp_dir())?;
        write_atomic(&stamp, format!("{key}\n").as_bytes())?;
        debug!(stage = %spec.id, stamp = %stamp.display(), "Recorded completion");
        Ok(())
    }

    /// Makes the stage recognizably stale.
    ///
    /// Removes the stamp and every declared output that is a regular file.
    /// Output directories are kept so incremental build tools can reuse
    /// them; without a stamp they never count as complete.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing path cannot be removed.
    pub fn invalidate(&self, spec: &StageSpec) -> io::Result<()> {
        remove_file_if_exists(&self.layout.stamp(&spec.id))?;
        for output in &spec.outputs {
            if output.is_file() || output.is_symlink() {
                remove_file_if_exists(output)?;
            }
        }
        Ok(())
    }

    /// Removes the stamp and every declared output, directories included.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing path cannot be removed.
    pub fn purge(&self, spec: &StageSpec) -> io::Result<()> {
        self.invalidate(spec)?;
        for output in &spec.outputs {
            if output.is_dir() {
                fs::remove_dir_all(output)?;
            }
        }
        Ok(())
    }

    /// Removes the results directory and leftover trial directories.
    /// Built toolchains and downloaded sources are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing directory cannot be removed.
    pub fn clean_results(&self) -> io::Result<()> {
        debug!(results = %self.layout.results_dir().display(), "Cleaning results");
        remove_dir_if_exists(self.layout.results_dir())?;
        remove_dir_if_exists(&self.layout.trial_root())
    }

    /// Removes everything: results, stage directories, logs and stamps.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing directory cannot be removed.
    pub fn clean_all(&self) -> io::Result<()> {
        self.clean_results()?;
        debug!(work = %self.layout.work_dir().display(), "Cleaning work directory");
        remove_dir_if_exists(self.layout.work_dir())
    }
}

/// Sets the mtime of an existing file or directory.
fn touch(path: &Path, when: SystemTime) -> io::Result<()> {
    File::open(path)?.set_modified(when)
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Writes `contents` to a sibling temp file, then renames it over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageKind;
    use crate::process::CommandTemplate;
    use std::time::Duration;

    fn set_mtime(path: &Path, secs_ago: u64) {
        let when = SystemTime::now() - Duration::from_secs(secs_ago);
        touch(path, when).unwrap();
    }

    fn stage(id: &str, outputs: &[&Path]) -> StageSpec {
        outputs.iter().fold(
            StageSpec::command(id, StageKind::Build, CommandTemplate::new("true")),
            |spec, out| spec.with_output(*out),
        )
    }

    #[test]
    fn test_is_fresh_compares_mtimes() {
        let dir = tempfile::tempdir().unwrap();
        let dep = dir.path().join("dep");
        let out = dir.path().join("out");
        fs::write(&dep, "d").unwrap();
        fs::write(&out, "o").unwrap();

        set_mtime(&dep, 100);
        set_mtime(&out, 50);
        assert!(ArtifactStore::is_fresh(&[out.clone()], &[dep.clone()]));

        set_mtime(&dep, 10);
        assert!(!ArtifactStore::is_fresh(&[out.clone()], &[dep.clone()]));
    }

    #[test]
    fn test_is_fresh_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let missing = dir.path().join("missing");
        fs::write(&out, "o").unwrap();

        assert!(ArtifactStore::is_fresh(&[out.clone()], &[]));
        assert!(!ArtifactStore::is_fresh(&[out.clone()], &[missing.clone()]));
        assert!(!ArtifactStore::is_fresh(&[missing], &[]));
        assert!(!ArtifactStore::is_fresh(&[], &[]));
    }

    #[test]
    fn test_record_and_stamp_matches() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(Layout::new(dir.path().join("w"), dir.path().join("r")));
        let out = dir.path().join("out");
        fs::write(&out, "o").unwrap();
        set_mtime(&out, 1000);

        let spec = stage("build", &[&out]);
        assert!(!store.stamp_matches(&spec, &spec.idempotency_key()));

        store.record(&spec, &spec.idempotency_key()).unwrap();
        assert!(store.stamp_matches(&spec, &spec.idempotency_key()));
        let age = SystemTime::now()
            .duration_since(ArtifactStore::modified(&out).unwrap())
            .unwrap_or_default();
        assert!(age < Duration::from_secs(500));

        let changed = StageSpec::command("build", StageKind::Build, CommandTemplate::new("make"))
            .with_output(&out);
        assert!(!store.stamp_matches(&changed, &changed.idempotency_key()));
    }

    #[test]
    fn test_record_requires_declared_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(Layout::new(dir.path().join("w"), dir.path().join("r")));
        let spec = stage("build", &[&dir.path().join("never-written")]);

        assert!(store.record(&spec, &spec.idempotency_key()).is_err());
        assert!(!store.stamp_matches(&spec, &spec.idempotency_key()));
    }

    #[test]
    fn test_invalidate_keeps_directories_but_drops_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(Layout::new(dir.path().join("w"), dir.path().join("r")));
        let file_out = dir.path().join("profile.fdata");
        let dir_out = dir.path().join("install");
        fs::write(&file_out, "x").unwrap();
        fs::create_dir_all(&dir_out).unwrap();

        let spec = stage("bolt", &[&file_out, &dir_out]);
        store.record(&spec, &spec.idempotency_key()).unwrap();
        assert!(store.stage_is_fresh(&spec, &spec.idempotency_key(), &[]));

        store.invalidate(&spec).unwrap();
        assert!(!file_out.exists());
        assert!(dir_out.is_dir());
        assert!(!store.stage_is_fresh(&spec, &spec.idempotency_key(), &[]));

        store.purge(&spec).unwrap();
        assert!(!dir_out.exists());
    }

    #[test]
    fn test_stage_without_outputs_uses_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(Layout::new(dir.path().join("w"), dir.path().join("r")));
        let upstream = stage("upstream", &[]);
        let downstream = stage("downstream", &[]).with_dependency("upstream");

        store.record(&upstream, &upstream.idempotency_key()).unwrap();
        store.record(&downstream, &downstream.idempotency_key()).unwrap();
        assert!(store.stage_is_fresh(&downstream, &downstream.idempotency_key(), &[&upstream]));

        // A newer upstream stamp makes the downstream stale.
        set_mtime(&store.layout().stamp("downstream"), 100);
        assert!(!store.stage_is_fresh(&downstream, &downstream.idempotency_key(), &[&upstream]));
    }

    #[test]
    fn test_clean_results_keeps_work_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(Layout::new(dir.path().join("w"), dir.path().join("r")));
        let build = store.layout().stage_dir("build-baseline");
        fs::create_dir_all(&build).unwrap();
        fs::create_dir_all(store.layout().trial_root().join("leftover")).unwrap();
        fs::create_dir_all(store.layout().results_dir()).unwrap();
        fs::write(store.layout().final_report(), "r").unwrap();

        store.clean_results().unwrap();
        assert!(!store.layout().results_dir().exists());
        assert!(!store.layout().trial_root().exists());
        assert!(build.is_dir());

        store.clean_all().unwrap();
        assert!(!store.layout().work_dir().exists());
        // Cleaning twice is fine.
        store.clean_all().unwrap();
    }
}
