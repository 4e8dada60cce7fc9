//! Conflict resolution for the git backend.
//!
//! After a merge stops, every unmerged `<data>/<environment>/<KEY>.enc` is a
//! [`Conflict`]. The [`Resolver`] decrypts the three index stages, settles
//! each conflict with one [`Strategy`], writes the result back through the
//! [`GitBackend`] and stages it. Failures are recorded per key and never
//! stop the remaining keys.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::core::backend::repo::UnmergedPath;
use crate::core::backend::{Backend, GitBackend, GitRepo, StoredValue};
use crate::core::domain::{Conflict, Outcome, Resolution, ResolutionSummary, Strategy};
use crate::core::keys::EnvironmentKeys;
use crate::core::validation;
use crate::error::{ConflictError, Result};

/// Commit message for local changes recorded before a sync.
const LOCAL_COMMIT_MESSAGE: &str = "lockbox: update variables";

/// Commit message for a resolved merge.
const MERGE_COMMIT_MESSAGE: &str = "lockbox: resolve variable conflicts";

/// Answers conflicts for [`Strategy::Prompt`].
pub trait ConflictPrompt {
    /// Pick a resolution, or `None` to leave the conflict unresolved.
    fn choose(&mut self, conflict: &Conflict) -> Result<Option<Resolution>>;
}

/// Result of [`Resolver::sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// The merge went through without conflicts.
    pub clean: bool,
    /// A merge commit was created after resolving conflicts.
    pub committed: bool,
    pub summary: ResolutionSummary,
}

/// Settles conflicts on git-tracked variable blobs.
pub struct Resolver {
    repo: GitRepo,
    data_dir: PathBuf,
    /// `data_dir` relative to the repository root, `/`-separated.
    prefix: String,
}

impl Resolver {
    /// Resolver for the variables stored under `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns `ConflictError::Untracked` if `data_dir` is outside `repo`.
    pub fn new(repo: GitRepo, data_dir: &Path) -> Result<Self> {
        let prefix = repo.relative(data_dir)?;
        debug!(prefix = %prefix, "conflict resolver ready");
        Ok(Self {
            repo,
            data_dir: data_dir.to_path_buf(),
            prefix,
        })
    }

    pub fn repo(&self) -> &GitRepo {
        &self.repo
    }

    /// Map a repository path back to `(environment, key)`.
    fn locate(&self, path: &str) -> Option<(String, String)> {
        let rest = if self.prefix.is_empty() {
            path
        } else {
            path.strip_prefix(&self.prefix)?.strip_prefix('/')?
        };
        let (environment, file) = rest.split_once('/')?;
        validation::validate_environment(environment).ok()?;
        let key = GitBackend::key_for_file(file)?;
        Some((environment.to_string(), key.to_string()))
    }

    fn path_of(&self, environment: &str, key: &str) -> String {
        let file = format!("{}/{}.{}", environment, key, crate::core::constants::GIT_BLOB_EXT);
        if self.prefix.is_empty() {
            file
        } else {
            format!("{}/{}", self.prefix, file)
        }
    }

    fn backend(&self, environment: &str, keys: &mut dyn EnvironmentKeys) -> Result<GitBackend> {
        GitBackend::open(&self.data_dir, environment, keys.key_for(environment)?)
    }

    /// Unmerged variable blobs, as `(path, environment, key)`. Other unmerged
    /// paths are skipped.
    fn unmerged(&self) -> Result<Vec<(UnmergedPath, String, String)>> {
        let mut found = Vec::new();
        for entry in self.repo.unmerged()? {
            match self.locate(&entry.path) {
                Some((environment, key)) => found.push((entry, environment, key)),
                None => warn!(path = %entry.path, "unmerged path is not a variable, skipping"),
            }
        }
        Ok(found)
    }

    /// Decrypt the stages of one unmerged blob.
    fn load(
        &self,
        entry: &UnmergedPath,
        environment: &str,
        key: &str,
        keys: &mut dyn EnvironmentKeys,
    ) -> Result<Conflict> {
        let backend = self.backend(environment, keys)?;
        let mut sealed = false;
        let mut stage = |present: bool, n: u8| -> Result<Option<Zeroizing<Vec<u8>>>> {
            if !present {
                return Ok(None);
            }
            let bytes = self.repo.show_stage(n, &entry.path)?;
            let stored: StoredValue = backend.decode_blob(key, &bytes)?;
            sealed |= stored.is_sealed();
            backend.open_blob(key, &bytes).map(Some)
        };
        let base = stage(entry.base, 1)?;
        let local = stage(entry.ours, 2)?;
        let remote = stage(entry.theirs, 3)?;

        let local_time = self.repo.last_commit_time("HEAD", &entry.path)?;
        let remote_time = if self.repo.is_merging()? {
            self.repo.last_commit_time("MERGE_HEAD", &entry.path)?
        } else {
            None
        };

        Ok(Conflict {
            environment: environment.to_string(),
            key: key.to_string(),
            base,
            local,
            remote,
            local_time,
            remote_time,
            // A blob present on neither side has nothing to preserve.
            sealed: sealed || !(entry.ours || entry.theirs),
        })
    }

    /// Every conflicting variable, decrypted.
    ///
    /// # Errors
    ///
    /// Fails on the first conflict that can't be read or decrypted. Use
    /// [`Resolver::resolve_all`] to carry on past such keys.
    pub fn detect(&self, keys: &mut dyn EnvironmentKeys) -> Result<Vec<Conflict>> {
        let mut conflicts = Vec::new();
        for (entry, environment, key) in self.unmerged()? {
            conflicts.push(self.load(&entry, &environment, &key, keys)?);
        }
        info!(count = conflicts.len(), "detected conflicts");
        Ok(conflicts)
    }

    /// Detect and resolve every conflict, recording unreadable keys as
    /// failed.
    pub fn resolve_all(
        &self,
        strategy: Strategy,
        keys: &mut dyn EnvironmentKeys,
        prompt: Option<&mut dyn ConflictPrompt>,
    ) -> Result<ResolutionSummary> {
        let mut summary = ResolutionSummary::default();
        let mut conflicts = Vec::new();
        for (entry, environment, key) in self.unmerged()? {
            match self.load(&entry, &environment, &key, keys) {
                Ok(conflict) => conflicts.push(conflict),
                Err(e) => {
                    warn!(environment = %environment, key = %key, error = %e, "cannot read conflict");
                    summary.record(&environment, &key, Outcome::Failed(e.to_string()));
                }
            }
        }
        self.resolve_into(&mut summary, &conflicts, strategy, keys, prompt);
        Ok(summary)
    }

    /// Resolve already detected conflicts.
    pub fn resolve(
        &self,
        conflicts: &[Conflict],
        strategy: Strategy,
        keys: &mut dyn EnvironmentKeys,
        prompt: Option<&mut dyn ConflictPrompt>,
    ) -> ResolutionSummary {
        let mut summary = ResolutionSummary::default();
        self.resolve_into(&mut summary, conflicts, strategy, keys, prompt);
        summary
    }

    fn resolve_into(
        &self,
        summary: &mut ResolutionSummary,
        conflicts: &[Conflict],
        strategy: Strategy,
        keys: &mut dyn EnvironmentKeys,
        mut prompt: Option<&mut dyn ConflictPrompt>,
    ) {
        let mut backends: HashMap<String, GitBackend> = HashMap::new();
        for conflict in conflicts {
            let outcome = match choose(conflict, strategy, prompt.as_deref_mut()) {
                Ok(Some((resolution, outcome))) => {
                    match self.apply(conflict, &resolution, &mut backends, keys) {
                        Ok(()) => outcome,
                        Err(e) => Outcome::Failed(e.to_string()),
                    }
                }
                Ok(None) => Outcome::Unresolved,
                Err(e) => Outcome::Failed(e.to_string()),
            };
            debug!(
                environment = %conflict.environment,
                key = %conflict.key,
                outcome = %outcome,
                "conflict settled"
            );
            summary.record(&conflict.environment, &conflict.key, outcome);
        }
        info!(
            resolved = summary.resolved_count,
            unresolved = summary.unresolved_count,
            "conflict resolution finished"
        );
    }

    /// Write `resolution` and stage the blob.
    fn apply(
        &self,
        conflict: &Conflict,
        resolution: &Resolution,
        backends: &mut HashMap<String, GitBackend>,
        keys: &mut dyn EnvironmentKeys,
    ) -> Result<()> {
        if !backends.contains_key(&conflict.environment) {
            let backend = self.backend(&conflict.environment, keys)?;
            backends.insert(conflict.environment.clone(), backend);
        }
        let Some(backend) = backends.get_mut(&conflict.environment) else {
            return Ok(());
        };
        let path = self.path_of(&conflict.environment, &conflict.key);

        match resolution {
            Resolution::Value(value) => {
                backend.set(&conflict.key, value, conflict.sealed)?;
                self.repo.add(&[&path])?;
            }
            Resolution::Deleted => {
                match backend.delete(&conflict.key) {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                self.repo.remove(&path)?;
            }
        }
        Ok(())
    }

    /// Commit local changes, pull `remote`, settle conflicts and commit the
    /// merge once every conflict is resolved.
    ///
    /// When an earlier sync left a merge open, nothing is committed or
    /// pulled: the remaining conflicts are settled and the merge is
    /// committed if none are left.
    ///
    /// # Errors
    ///
    /// Returns `ConflictError::ForeignConflicts` if all variables were
    /// resolved but other files are still unmerged.
    pub fn sync(
        &self,
        remote: &str,
        branch: Option<&str>,
        strategy: Strategy,
        keys: &mut dyn EnvironmentKeys,
        prompt: Option<&mut dyn ConflictPrompt>,
    ) -> Result<SyncReport> {
        let resuming = self.repo.is_merging()? || !self.repo.unmerged()?.is_empty();
        if resuming {
            info!("merge already in progress, settling remaining conflicts");
        } else {
            self.stage_data_dir()?;
            if self.repo.commit(LOCAL_COMMIT_MESSAGE)? {
                debug!("committed local changes");
            }

            if self.repo.pull(remote, branch)? {
                info!(remote = %remote, "merged cleanly");
                return Ok(SyncReport {
                    clean: true,
                    committed: false,
                    summary: ResolutionSummary::default(),
                });
            }
        }

        let summary = self.resolve_all(strategy, keys, prompt)?;
        if !summary.is_complete() {
            warn!(
                unresolved = summary.unresolved_count,
                "sync incomplete, merge left open"
            );
            return Ok(SyncReport {
                clean: false,
                committed: false,
                summary,
            });
        }

        let remaining: Vec<String> = self.repo.unmerged()?.into_iter().map(|p| p.path).collect();
        if !remaining.is_empty() {
            return Err(ConflictError::ForeignConflicts(remaining.join(", ")).into());
        }

        // Edits made while the merge was open go into the merge commit.
        self.stage_data_dir()?;
        let committed = self.repo.commit(MERGE_COMMIT_MESSAGE)?;
        info!(resolved = summary.resolved_count, committed, "sync complete");
        Ok(SyncReport {
            clean: false,
            committed,
            summary,
        })
    }

    /// Stage every change under the data directory. Callers make sure no
    /// path there is still unmerged.
    fn stage_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            return Ok(());
        }
        let target = if self.prefix.is_empty() { "." } else { self.prefix.as_str() };
        self.repo.add(&[target])
    }
}

/// Pick a resolution for `conflict`. `None` leaves it unresolved.
pub fn choose(
    conflict: &Conflict,
    strategy: Strategy,
    prompt: Option<&mut (dyn ConflictPrompt + '_)>,
) -> Result<Option<(Resolution, Outcome)>> {
    if conflict.both_deleted() {
        return Ok(Some((Resolution::Deleted, Outcome::Deleted)));
    }
    if conflict.local == conflict.remote {
        return Ok(Some((side(&conflict.local), Outcome::KeptLocal)));
    }

    let local = || Some((side(&conflict.local), Outcome::KeptLocal));
    let remote = || Some((side(&conflict.remote), Outcome::KeptRemote));

    match strategy {
        Strategy::Ours => Ok(local()),
        Strategy::Theirs => Ok(remote()),
        Strategy::Newest => match (conflict.local_time, conflict.remote_time) {
            (Some(l), Some(r)) if r > l => Ok(remote()),
            (None, Some(_)) => Ok(remote()),
            _ => Ok(local()),
        },
        Strategy::Prompt => {
            let Some(prompt) = prompt else {
                return Ok(None);
            };
            Ok(prompt.choose(conflict)?.map(|resolution| {
                let outcome = match &resolution {
                    Resolution::Deleted => Outcome::Deleted,
                    Resolution::Value(v) if Some(v) == conflict.local.as_ref() => Outcome::KeptLocal,
                    Resolution::Value(v) if Some(v) == conflict.remote.as_ref() => Outcome::KeptRemote,
                    Resolution::Value(_) => Outcome::Custom,
                };
                (resolution, outcome)
            }))
        }
    }
}

fn side(value: &Option<Zeroizing<Vec<u8>>>) -> Resolution {
    match value {
        Some(v) => Resolution::Value(v.clone()),
        None => Resolution::Deleted,
    }
}
