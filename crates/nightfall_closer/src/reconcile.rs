//! Promotion of staged analysis products into their destination trees.
//!
//! Concepts are visited in priority order and a file is claimed by the first
//! concept whose pattern matches it. For each claimed file:
//!
//! - destination has a same-named file: a staged symlink is dropped, an
//!   identical copy is dropped, anything else is a conflict left for the
//!   operator;
//! - destination is free: the file is registered, moved (copied for a
//!   single-sequence close) and its sequence marked closed.
//!
//! Re-running over an already reconciled night is a no-op.

use crate::error::{CloseError, Result};
use nightfall_db::{upsert_record, RecordStore, RunFileRecord};
use nightfall_protocol::{NightContext, NightPaths, Sequence};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// What happened to one staged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Moved,
    /// Single-sequence close: promoted, staged copy kept.
    Copied,
    /// Staged symlink removed, destination already holds the data.
    LinkRemoved,
    /// Staged copy removed, destination is byte-identical.
    DuplicateRemoved,
    /// Already promoted; the staged copy is kept (single-sequence close).
    AlreadyPromoted,
    /// Destination differs from the staged file. Both kept.
    Conflict,
    /// No sequence owns the file. Left staged.
    Unowned,
}

impl ReconcileAction {
    /// Counts as settled for the night.
    pub fn is_reconciled(&self) -> bool {
        !matches!(self, ReconcileAction::Conflict | ReconcileAction::Unowned)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDecision {
    pub concept: String,
    pub staged: PathBuf,
    pub destination: PathBuf,
    pub action: ReconcileAction,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub decisions: Vec<FileDecision>,
    /// Concepts whose pass stopped on a filesystem error, with the reason.
    pub failed_concepts: Vec<(String, String)>,
    /// Job names whose closed marker was written.
    pub closed_sequences: BTreeSet<String>,
}

impl ReconcileReport {
    pub fn count(&self, action: ReconcileAction) -> usize {
        self.decisions.iter().filter(|d| d.action == action).count()
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &FileDecision> {
        self.decisions
            .iter()
            .filter(|d| d.action == ReconcileAction::Conflict)
    }

    /// Nothing was promoted or removed.
    pub fn is_noop(&self) -> bool {
        self.decisions.iter().all(|d| {
            matches!(
                d.action,
                ReconcileAction::Conflict | ReconcileAction::Unowned | ReconcileAction::AlreadyPromoted
            )
        })
    }
}

struct CompiledConcept {
    name: String,
    pattern: Regex,
    destination: PathBuf,
}

/// Reconciles one night's staging directory.
pub struct FileReconciler<'a> {
    staging_dir: PathBuf,
    telescope: String,
    night: String,
    staged_suffix: String,
    closed_suffix: String,
    files_table: String,
    concepts: Vec<CompiledConcept>,
    sequence_filter: Option<String>,
    dry_run: bool,
    store: &'a dyn RecordStore,
}

impl<'a> FileReconciler<'a> {
    /// Compile the configured concepts and resolve their destinations.
    pub fn new(paths: &NightPaths<'_>, ctx: &NightContext, store: &'a dyn RecordStore) -> Result<Self> {
        let config = paths.config();
        let concepts = config
            .concepts
            .iter()
            .map(|concept| -> Result<CompiledConcept> {
                let pattern = Regex::new(&concept.pattern).map_err(|e| CloseError::Pattern {
                    concept: concept.name.clone(),
                    message: e.to_string(),
                })?;
                Ok(CompiledConcept {
                    name: concept.name.clone(),
                    pattern,
                    destination: paths.destination_dir(concept)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            staging_dir: paths.analysis_dir(),
            telescope: ctx.telescope.clone(),
            night: ctx.night.to_iso(),
            staged_suffix: config.paths.staged_suffix.clone(),
            closed_suffix: config.paths.closed_suffix.clone(),
            files_table: config.database.files_table.clone(),
            concepts,
            sequence_filter: ctx.sequence_to_close.as_deref().map(run_filter),
            dry_run: ctx.simulate,
            store,
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    fn partial(&self) -> bool {
        self.sequence_filter.is_some()
    }

    /// Staged candidates, sorted for a deterministic pass order.
    pub fn staged_files(&self) -> Result<BTreeSet<PathBuf>> {
        staged_files(&self.staging_dir, &self.staged_suffix)
    }

    /// Run the pass over `sequences`. Conflicts and unowned files are
    /// reported, not returned as errors.
    pub fn reconcile(&self, sequences: &[Sequence]) -> Result<ReconcileReport> {
        let mut remaining = self.staged_files()?;
        let mut report = ReconcileReport::default();
        info!(
            staging = %self.staging_dir.display(),
            candidates = remaining.len(),
            partial = self.partial(),
            dry_run = self.dry_run,
            "Reconciling staged files"
        );

        for concept in &self.concepts {
            let claimed: Vec<PathBuf> = remaining
                .iter()
                .filter(|path| self.claims(concept, path))
                .cloned()
                .collect();
            if claimed.is_empty() {
                continue;
            }
            debug!(concept = %concept.name, files = claimed.len(), "Concept pass");
            for staged in &claimed {
                remaining.remove(staged);
            }

            for staged in &claimed {
                if let Err(e) = self.reconcile_file(concept, staged, sequences, &mut report) {
                    error!(concept = %concept.name, path = %staged.display(), "Aborting concept: {}", e);
                    report.failed_concepts.push((concept.name.clone(), e.to_string()));
                    break;
                }
            }
        }

        info!(
            moved = report.count(ReconcileAction::Moved),
            copied = report.count(ReconcileAction::Copied),
            removed = report.count(ReconcileAction::LinkRemoved) + report.count(ReconcileAction::DuplicateRemoved),
            conflicts = report.count(ReconcileAction::Conflict),
            unowned = report.count(ReconcileAction::Unowned),
            "Reconciliation finished"
        );
        Ok(report)
    }

    fn claims(&self, concept: &CompiledConcept, path: &Path) -> bool {
        let name = file_name(path);
        if !concept.pattern.is_match(&name) {
            return false;
        }
        match &self.sequence_filter {
            Some(run) => name.contains(run.as_str()),
            None => true,
        }
    }

    fn reconcile_file(
        &self,
        concept: &CompiledConcept,
        staged: &Path,
        sequences: &[Sequence],
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let name = file_name(staged);
        let destination = concept.destination.join(&name);

        let action = if destination.symlink_metadata().is_ok() {
            self.settle_existing(staged, &destination)?
        } else {
            match owner_of(&name, sequences) {
                Some(seq) => {
                    let action = self.promote(concept, staged, &destination, seq)?;
                    self.mark_closed(seq, report)?;
                    action
                }
                None => {
                    warn!(path = %staged.display(), "No sequence owns staged file, leaving it");
                    ReconcileAction::Unowned
                }
            }
        };

        report.decisions.push(FileDecision {
            concept: concept.name.clone(),
            staged: staged.to_path_buf(),
            destination,
            action,
        });
        Ok(())
    }

    fn settle_existing(&self, staged: &Path, destination: &Path) -> Result<ReconcileAction> {
        let meta = staged
            .symlink_metadata()
            .map_err(|e| CloseError::io(staged, e))?;

        let action = if meta.file_type().is_symlink() {
            ReconcileAction::LinkRemoved
        } else if files_identical(staged, destination).map_err(|e| CloseError::io(staged, e))? {
            ReconcileAction::DuplicateRemoved
        } else {
            warn!(
                staged = %staged.display(),
                destination = %destination.display(),
                "Destination exists and differs, leaving both for the operator"
            );
            return Ok(ReconcileAction::Conflict);
        };

        if self.partial() {
            return Ok(ReconcileAction::AlreadyPromoted);
        }
        if self.dry_run {
            info!("SIMULATE remove {}", staged.display());
        } else {
            fs::remove_file(staged).map_err(|e| CloseError::io(staged, e))?;
            debug!(path = %staged.display(), ?action, "Removed staged file");
        }
        Ok(action)
    }

    fn promote(
        &self,
        concept: &CompiledConcept,
        staged: &Path,
        destination: &Path,
        seq: &Sequence,
    ) -> Result<ReconcileAction> {
        let action = if self.partial() {
            ReconcileAction::Copied
        } else {
            ReconcileAction::Moved
        };

        if self.dry_run {
            info!(
                "SIMULATE {:?} {} -> {} (run {})",
                action,
                staged.display(),
                destination.display(),
                seq.run_str()
            );
            return Ok(action);
        }

        if let Some(dir) = destination.parent() {
            fs::create_dir_all(dir).map_err(|e| CloseError::io(dir, e))?;
        }
        self.register(concept, staged, destination, seq)?;

        match action {
            ReconcileAction::Copied => {
                fs::copy(staged, destination).map_err(|e| CloseError::io(destination, e))?;
            }
            _ => move_file(staged, destination)?,
        }
        info!(
            concept = %concept.name,
            run = %seq.run_str(),
            destination = %destination.display(),
            ?action,
            "Promoted file"
        );
        Ok(action)
    }

    fn register(
        &self,
        concept: &CompiledConcept,
        staged: &Path,
        destination: &Path,
        seq: &Sequence,
    ) -> Result<()> {
        let (size_bytes, checksum) = checksum_file(staged).map_err(|e| CloseError::io(staged, e))?;
        let record = RunFileRecord {
            telescope: self.telescope.clone(),
            night: self.night.clone(),
            run_id: seq.run_id,
            concept: concept.name.clone(),
            file_name: file_name(staged),
            destination: destination.display().to_string(),
            size_bytes,
            checksum,
        };
        upsert_record(self.store, &self.files_table, &record)?;
        Ok(())
    }

    fn mark_closed(&self, seq: &Sequence, report: &mut ReconcileReport) -> Result<()> {
        let marker = seq.closed_marker(&self.closed_suffix);
        if report.closed_sequences.insert(seq.job_name()) {
            if self.dry_run {
                info!("SIMULATE create {}", marker.display());
            } else {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&marker)
                    .map_err(|e| CloseError::io(&marker, e))?;
            }
        }
        Ok(())
    }
}

/// "1805" and "01805" select the same run.
fn run_filter(sequence: &str) -> String {
    match sequence.trim().parse::<u32>() {
        Ok(run) => format!("{:05}", run),
        Err(_) => sequence.trim().to_string(),
    }
}

fn owner_of<'s>(name: &str, sequences: &'s [Sequence]) -> Option<&'s Sequence> {
    sequences.iter().find(|seq| name.contains(&seq.run_str()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Regular files and symlinks directly under `dir` whose name ends with
/// `suffix`. A missing directory has no candidates.
pub fn staged_files(dir: &Path, suffix: &str) -> Result<BTreeSet<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(CloseError::io(dir, e)),
    };

    let mut files = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| CloseError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| CloseError::io(entry.path(), e))?;
        if file_type.is_dir() {
            continue;
        }
        if entry.file_name().to_string_lossy().ends_with(suffix) {
            files.insert(entry.path());
        }
    }
    Ok(files)
}

/// `rename`, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    debug!(from = %from.display(), to = %to.display(), "rename failed, copying");
    fs::copy(from, to).map_err(|e| CloseError::io(to, e))?;
    fs::remove_file(from).map_err(|e| CloseError::io(from, e))
}

fn files_identical(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    let mut ra = BufReader::new(File::open(a)?);
    let mut rb = BufReader::new(File::open(b)?);
    let mut ba = [0u8; 64 * 1024];
    let mut bb = [0u8; 64 * 1024];
    loop {
        let n = ra.read(&mut ba)?;
        if n == 0 {
            return Ok(true);
        }
        rb.read_exact(&mut bb[..n])?;
        if ba[..n] != bb[..n] {
            return Ok(false);
        }
    }
}

fn checksum_file(path: &Path) -> io::Result<(u64, String)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = blake3::Hasher::new();
    let size = io::copy(&mut reader, &mut hasher)?;
    Ok((size, hasher.finalize().to_hex().to_string()))
}
