//! Ordered step tables and the commands rendered from them.

use nightfall_protocol::{expand_template, NightfallConfig, RunKind, StepSpec, TemplateVars};
use std::path::Path;

/// A configured step bound to the production id its entries must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    spec: StepSpec,
    product_id: String,
}

impl PlannedStep {
    pub fn new(spec: StepSpec, product_id: impl Into<String>) -> Self {
        Self {
            spec,
            product_id: product_id.into(),
        }
    }

    /// Step without a program, for level computations.
    pub fn named(name: &str, product_id: &str) -> Self {
        Self::new(
            StepSpec::new(name, "", nightfall_protocol::ProductKind::Calib),
            product_id,
        )
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn spec(&self) -> &StepSpec {
        &self.spec
    }

    /// Expand the step's templates for one sequence.
    pub fn render(&self, vars: &TemplateVars) -> nightfall_protocol::Result<StepCommand> {
        let args = self
            .spec
            .args
            .iter()
            .map(|arg| expand_template(arg, vars))
            .collect::<nightfall_protocol::Result<Vec<_>>>()?;
        Ok(StepCommand {
            step: self.spec.name.clone(),
            program: expand_template(&self.spec.program, vars)?,
            args,
            product_id: self.product_id.clone(),
            input_ref: basename(&expand_template(&self.spec.input, vars)?),
            config_ref: basename(&expand_template(&self.spec.config, vars)?),
        })
    }
}

/// Steps of one run kind, first to last. Level `L` maps to the step at
/// index `len - L`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTable {
    kind: String,
    steps: Vec<PlannedStep>,
}

impl StepTable {
    pub fn for_kind(config: &NightfallConfig, kind: RunKind) -> Self {
        let steps = config
            .steps_for(kind)
            .iter()
            .map(|spec| PlannedStep::new(spec.clone(), config.product_id(spec.product)))
            .collect();
        Self::from_steps(kind.as_str(), steps)
    }

    pub fn from_steps(kind: &str, steps: Vec<PlannedStep>) -> Self {
        Self {
            kind: kind.to_string(),
            steps,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step run when `level` steps remain.
    pub fn step_at_level(&self, level: usize) -> Option<&PlannedStep> {
        if level == 0 || level > self.steps.len() {
            return None;
        }
        self.steps.get(self.steps.len() - level)
    }
}

/// Fully expanded invocation of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCommand {
    pub step: String,
    pub program: String,
    pub args: Vec<String>,
    pub product_id: String,
    pub input_ref: String,
    pub config_ref: String,
}

impl StepCommand {
    /// Shell-like rendering for logs.
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightfall_protocol::ProductKind;

    #[test]
    fn table_follows_config_order_and_product_ids() {
        let config = NightfallConfig::default();
        let table = StepTable::for_kind(&config, RunKind::Data);

        let names: Vec<_> = table.steps().iter().map(PlannedStep::name).collect();
        assert_eq!(names, vec!["R0_TO_DL1", "DL1_DATACHECK", "DL1_TO_DL2"]);
        assert_eq!(table.steps()[0].product_id(), "tailcut84");
        assert_eq!(table.steps()[2].product_id(), "model1");
    }

    #[test]
    fn level_maps_to_step() {
        let table = StepTable::from_steps(
            "PEDCALIB",
            vec![PlannedStep::named("A", "v1"), PlannedStep::named("B", "v1")],
        );
        assert_eq!(table.step_at_level(2).map(PlannedStep::name), Some("A"));
        assert_eq!(table.step_at_level(1).map(PlannedStep::name), Some("B"));
        assert!(table.step_at_level(0).is_none());
        assert!(table.step_at_level(3).is_none());
    }

    #[test]
    fn render_expands_arguments_and_refs() {
        let spec = StepSpec::new("CALIB", "create_calib", ProductKind::Calib)
            .with_args(["--run={run_str}", "--out={analysis_dir}/calib.h5"])
            .with_input("{analysis_dir}/calib.h5")
            .with_config("/cfg/{run_str}.json");
        let step = PlannedStep::new(spec, "v01");

        let mut vars = TemplateVars::new();
        vars.insert("run_str".into(), "01805".into());
        vars.insert("analysis_dir".into(), "/data/20200117".into());

        let cmd = step.render(&vars).unwrap();
        assert_eq!(cmd.args, vec!["--run=01805", "--out=/data/20200117/calib.h5"]);
        assert_eq!(cmd.input_ref, "calib.h5");
        assert_eq!(cmd.config_ref, "01805.json");
        assert_eq!(cmd.product_id, "v01");
        assert_eq!(
            cmd.display_line(),
            "create_calib --run=01805 --out=/data/20200117/calib.h5"
        );
    }

    #[test]
    fn render_fails_on_unknown_placeholder() {
        let spec = StepSpec::new("X", "prog", ProductKind::Dl1).with_args(["{nope}"]);
        let step = PlannedStep::new(spec, "v1");
        assert!(step.render(&TemplateVars::new()).is_err());
    }
}
