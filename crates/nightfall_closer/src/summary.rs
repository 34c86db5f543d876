//! Night summary extraction and the "is the night finished" check.
//!
//! A night summary lists one run per line:
//!
//! ```text
//! # run  subruns  kind
//! 01805  5        PEDCALIB
//! 01807  24       DATA
//! ```
//!
//! Columns after the kind are ignored.

use crate::error::{CloseError, Result};
use nightfall_protocol::{NightContext, NightPaths, NightfallConfig, RunKind, Sequence};
use nightfall_runner::{sequence_level, ProcessingLevel};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Sequences of a night together with the level each one has reached.
#[derive(Debug, Clone, Default)]
pub struct FinishedCheck {
    pub sequences: Vec<Sequence>,
    pub levels: Vec<ProcessingLevel>,
}

impl FinishedCheck {
    /// Every sequence reached level 0. Vacuously true for an empty night.
    pub fn success(&self) -> bool {
        self.levels.iter().all(ProcessingLevel::is_done)
    }

    /// Sequences that still have steps to run.
    pub fn pending(&self) -> impl Iterator<Item = (&Sequence, &ProcessingLevel)> {
        self.sequences
            .iter()
            .zip(self.levels.iter())
            .filter(|(_, level)| !level.is_done())
    }
}

/// Parse night summary text into sequences staged under `staging_dir`.
///
/// Artifact paths are left empty; see [`NightPaths::resolve_artifacts`].
pub fn parse_night_summary(text: &str, telescope: &str, staging_dir: &Path) -> Vec<Sequence> {
    let mut sequences = Vec::new();

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(run), Some(subruns), Some(kind)) = (fields.next(), fields.next(), fields.next())
        else {
            warn!(line = lineno + 1, content = raw, "Skipping short night summary line");
            continue;
        };
        let (Ok(run_id), Ok(subrun_count)) = (run.parse::<u32>(), subruns.parse::<u32>()) else {
            warn!(line = lineno + 1, content = raw, "Skipping night summary line with bad numbers");
            continue;
        };
        let run_kind = match kind.parse::<RunKind>() {
            Ok(kind) => kind,
            Err(e) => {
                warn!(line = lineno + 1, "Skipping night summary line: {}", e);
                continue;
            }
        };
        let index = sequences.len();
        sequences.push(Sequence::new(
            index,
            telescope,
            run_id,
            run_kind,
            subrun_count,
            staging_dir,
        ));
    }

    link_parents(&mut sequences);
    sequences
}

/// Data runs use the latest calibration run before them, or the first one
/// after them if the night starts with data.
fn link_parents(sequences: &mut [Sequence]) {
    let calibrations: Vec<(usize, u32)> = sequences
        .iter()
        .filter(|s| s.run_kind == RunKind::Pedcalib)
        .map(|s| (s.seq_index, s.run_id))
        .collect();

    for seq in sequences.iter_mut().filter(|s| s.run_kind == RunKind::Data) {
        let parent = calibrations
            .iter()
            .rev()
            .find(|(index, _)| *index < seq.seq_index)
            .or_else(|| calibrations.first());
        match parent {
            Some(&(index, run)) => {
                seq.parent = Some(index);
                seq.parent_run = Some(run);
            }
            None => warn!(run = seq.run_id, "No calibration run for data sequence"),
        }
    }
}

/// Read the night summary, build the sequence list and compute each
/// sequence's level from its history file.
pub fn is_finished_check(config: &NightfallConfig, ctx: &NightContext) -> Result<FinishedCheck> {
    let paths = NightPaths::new(config, ctx);
    let summary = paths.night_summary_file();
    if !summary.exists() {
        return Err(CloseError::MissingNightSummary(summary));
    }
    let text = fs::read_to_string(&summary).map_err(|e| CloseError::io(&summary, e))?;

    let mut sequences = parse_night_summary(&text, &ctx.telescope, &paths.analysis_dir());
    paths.resolve_artifacts(&mut sequences);
    if sequences.is_empty() {
        info!(summary = %summary.display(), "Night summary lists no runs");
    }

    let levels = sequences
        .iter()
        .map(|seq| -> Result<ProcessingLevel> {
            let level = sequence_level(config, seq)?;
            debug!(job = %seq.job_name(), %level, "Sequence level");
            Ok(level)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(FinishedCheck { sequences, levels })
}
