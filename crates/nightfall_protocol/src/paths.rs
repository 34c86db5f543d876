//! Path derivation for one night.
//!
//! Nothing here touches the filesystem: every function is a pure mapping
//! from (config, telescope, night) to a path.

use crate::config::{ConceptSpec, NightfallConfig};
use crate::error::{ProtocolError, Result};
use crate::types::{CalibrationArtifacts, NightContext, NightDate, Sequence};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Placeholder values for [`expand_template`].
pub type TemplateVars = BTreeMap<String, String>;

/// Replace every `{name}` in `template` with its value from `vars`.
pub fn expand_template(template: &str, vars: &TemplateVars) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| ProtocolError::UnterminatedPlaceholder(template.to_string()))?;
        let key = &after[..end];
        let value = vars
            .get(key)
            .ok_or_else(|| ProtocolError::UnknownPlaceholder {
                placeholder: key.to_string(),
                template: template.to_string(),
            })?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// All paths belonging to one (telescope, night, production) tuple.
#[derive(Debug, Clone)]
pub struct NightPaths<'a> {
    config: &'a NightfallConfig,
    telescope: String,
    night: NightDate,
}

impl<'a> NightPaths<'a> {
    pub fn new(config: &'a NightfallConfig, ctx: &NightContext) -> Self {
        Self::for_night(config, &ctx.telescope, ctx.night)
    }

    pub fn for_night(config: &'a NightfallConfig, telescope: &str, night: NightDate) -> Self {
        Self {
            config,
            telescope: telescope.to_string(),
            night,
        }
    }

    pub fn config(&self) -> &NightfallConfig {
        self.config
    }

    pub fn telescope(&self) -> &str {
        &self.telescope
    }

    pub fn night(&self) -> NightDate {
        self.night
    }

    /// Flat staging directory: `<analysis_dir>/<YYYYMMDD>/<prod_id>`.
    pub fn analysis_dir(&self) -> PathBuf {
        self.config
            .paths
            .analysis_dir
            .join(self.night.to_dir())
            .join(&self.config.prod.prod_id)
    }

    /// The night's lock: `<closer_dir>/<YYYYMMDD>/<prod_id>/<lock_basename>`.
    pub fn lock_file(&self) -> PathBuf {
        self.config
            .paths
            .closer_dir
            .join(self.night.to_dir())
            .join(&self.config.prod.prod_id)
            .join(&self.config.paths.lock_basename)
    }

    pub fn night_summary_file(&self) -> PathBuf {
        self.config.paths.night_summary_dir.join(format!(
            "{}{}.txt",
            self.config.paths.night_summary_prefix,
            self.night.to_dir()
        ))
    }

    pub fn raw_night_dir(&self) -> PathBuf {
        self.config.paths.raw_dir.join(self.night.to_dir())
    }

    pub fn incidences_file(&self) -> PathBuf {
        self.analysis_dir()
            .join(&self.config.paths.incidences_basename)
    }

    /// Placeholders shared by every template of this night.
    pub fn template_vars(&self) -> TemplateVars {
        let prod = &self.config.prod;
        let mut vars = TemplateVars::new();
        vars.insert("tel".into(), self.telescope.clone());
        vars.insert("night".into(), self.night.to_dir());
        vars.insert("night_iso".into(), self.night.to_iso());
        vars.insert("prod_id".into(), prod.prod_id.clone());
        vars.insert("calib_prod_id".into(), prod.calib_prod_id.clone());
        vars.insert("dl1_prod_id".into(), prod.dl1_prod_id.clone());
        vars.insert("dl2_prod_id".into(), prod.dl2_prod_id.clone());
        vars.insert("analysis_dir".into(), display(&self.analysis_dir()));
        vars.insert("raw_dir".into(), display(&self.config.paths.raw_dir));
        vars.insert(
            "lstchain_config".into(),
            display(&self.config.steps.lstchain_config),
        );
        vars.insert("models_dir".into(), display(&self.config.steps.models_dir));
        vars
    }

    /// Night placeholders plus the run-specific ones for `seq`.
    pub fn sequence_vars(&self, seq: &Sequence) -> TemplateVars {
        let mut vars = self.template_vars();
        vars.insert("run".into(), seq.run_id.to_string());
        vars.insert("run_str".into(), seq.run_str());
        vars.insert("job_name".into(), seq.job_name());
        vars.insert("run_kind".into(), seq.run_kind.to_string());
        let artifacts = &seq.artifacts;
        for (key, value) in [
            ("pedestal_file", &artifacts.pedestal),
            ("calibration_file", &artifacts.calibration),
            ("time_calibration_file", &artifacts.time_calibration),
            ("systematic_correction_file", &artifacts.systematic_correction),
        ] {
            let value = value.as_deref().map(display).unwrap_or_default();
            vars.insert(key.into(), value);
        }
        vars
    }

    /// Final directory for a concept's files. Relative templates resolve
    /// against `paths.destination_root`.
    pub fn destination_dir(&self, concept: &ConceptSpec) -> Result<PathBuf> {
        let relative = expand_template(&concept.destination, &self.template_vars())?;
        Ok(self.config.paths.destination_root.join(relative))
    }

    /// Calibration products of calibration run `calib_run`.
    pub fn calibration_artifacts(&self, calib_run: u32) -> CalibrationArtifacts {
        let staging = self.analysis_dir();
        let night = self.night.to_dir();
        let systematics = self
            .config
            .paths
            .systematics_dir
            .join(&night)
            .join(&self.config.prod.calib_prod_id)
            .join(format!("ffactor_systematics_{}.h5", night));
        CalibrationArtifacts {
            pedestal: Some(staging.join(format!("drs4_pedestal.Run{:05}.0000.h5", calib_run))),
            calibration: Some(staging.join(format!(
                "calibration_filters_52.Run{:05}.0000.h5",
                calib_run
            ))),
            time_calibration: Some(
                staging.join(format!("time_calibration.Run{:05}.0000.h5", calib_run)),
            ),
            systematic_correction: Some(systematics),
        }
    }

    /// Attach calibration paths to every sequence.
    pub fn resolve_artifacts(&self, sequences: &mut [Sequence]) {
        for seq in sequences.iter_mut() {
            seq.artifacts = self.calibration_artifacts(seq.calibration_run());
        }
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
