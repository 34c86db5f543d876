//! Closing report: what the night produced, as persisted and written into
//! the night lock.

use crate::error::{CloseError, Result};
use crate::reconcile::staged_files;
use chrono::{DateTime, Utc};
use nightfall_protocol::{ConceptSpec, NightContext, NightPaths, Sequence};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const BYTES_PER_GB: f64 = 1e9;

#[derive(Debug, Clone, PartialEq)]
pub struct ClosingReport {
    pub telescope: String,
    /// `YYYY_MM_DD`
    pub night: String,
    pub sequences: usize,
    /// Sum of subruns over every sequence.
    pub files_raw: u64,
    /// Raw data volume, whole GB.
    pub raw_gb: u64,
    pub end: DateTime<Utc>,
    /// Files per concept, in priority order.
    pub concept_counts: Vec<(String, usize)>,
}

impl ClosingReport {
    /// Measure the night. Safe to repeat after a partial failure: files
    /// already promoted still count.
    pub fn collect(
        paths: &NightPaths<'_>,
        ctx: &NightContext,
        sequences: &[Sequence],
    ) -> Result<Self> {
        let config = paths.config();
        Ok(Self {
            telescope: ctx.telescope.clone(),
            night: ctx.night.to_string(),
            sequences: sequences.len(),
            files_raw: sequences.iter().map(|s| u64::from(s.subrun_count)).sum(),
            raw_gb: raw_volume_gb(&paths.raw_night_dir(), &config.paths.raw_pattern)?,
            end: Utc::now(),
            concept_counts: count_concepts(paths, &config.concepts)?,
        })
    }

    pub fn counts_map(&self) -> BTreeMap<String, i64> {
        self.concept_counts
            .iter()
            .map(|(name, n)| (name.clone(), *n as i64))
            .collect()
    }

    /// `KEY: value` listing written into the night lock.
    pub fn to_lock_text(&self) -> String {
        let mut lines = vec![
            format!("NIGHT: {}", self.night),
            format!("TELESCOPE: {}", self.telescope),
            "IS_CLOSED: 1".to_string(),
            format!("SEQUENCES: {}", self.sequences),
            format!("FILES_RAW: {}", self.files_raw),
            format!("RAW_GB: {}", self.raw_gb),
            format!("END: {}", self.end.format("%Y-%m-%d %H:%M")),
        ];
        lines.extend(
            self.concept_counts
                .iter()
                .map(|(concept, n)| format!("FILES_{}: {}", concept, n)),
        );
        lines.push(String::new());
        lines.join("\n")
    }
}

/// Files per concept, staged or already promoted. A name present in both
/// places counts once.
pub fn count_concepts(
    paths: &NightPaths<'_>,
    concepts: &[ConceptSpec],
) -> Result<Vec<(String, usize)>> {
    let suffix = &paths.config().paths.staged_suffix;
    let mut compiled = Vec::with_capacity(concepts.len());
    for concept in concepts {
        let re = Regex::new(&concept.pattern).map_err(|e| CloseError::Pattern {
            concept: concept.name.clone(),
            message: e.to_string(),
        })?;
        compiled.push((concept.name.as_str(), re));
    }

    let mut names = file_names(&staged_files(&paths.analysis_dir(), suffix)?);
    for (concept, (_, re)) in concepts.iter().zip(&compiled) {
        let dir = paths.destination_dir(concept)?;
        // A blocked destination is reported by the reconciler.
        if !dir.is_dir() {
            continue;
        }
        names.extend(
            file_names(&staged_files(&dir, suffix)?)
                .into_iter()
                .filter(|name| re.is_match(name)),
        );
    }
    Ok(first_match_counts(&names, &compiled))
}

/// Count each name once, for the first concept that matches it.
fn first_match_counts(
    names: &BTreeSet<String>,
    concepts: &[(&str, Regex)],
) -> Vec<(String, usize)> {
    let mut remaining: Vec<&String> = names.iter().collect();
    concepts
        .iter()
        .map(|(name, re)| {
            let before = remaining.len();
            remaining.retain(|file| !re.is_match(file));
            let n = before - remaining.len();
            debug!(concept = *name, files = n, "Counted concept files");
            (name.to_string(), n)
        })
        .collect()
}

fn file_names(files: &BTreeSet<PathBuf>) -> BTreeSet<String> {
    files
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect()
}

/// Total size of the files in `dir` matching `pattern`, rounded to whole GB.
/// A missing directory weighs nothing.
pub fn raw_volume_gb(dir: &Path, pattern: &str) -> Result<u64> {
    let re = Regex::new(pattern).map_err(|e| CloseError::Pattern {
        concept: "RAW".to_string(),
        message: e.to_string(),
    })?;
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(CloseError::io(dir, e)),
    };

    let mut bytes = 0u64;
    for entry in entries {
        let entry = entry.map_err(|e| CloseError::io(dir, e))?;
        if !re.is_match(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let meta = entry.metadata().map_err(|e| CloseError::io(entry.path(), e))?;
        if meta.is_file() {
            bytes += meta.len();
        }
    }
    Ok((bytes as f64 / BYTES_PER_GB).round() as u64)
}
