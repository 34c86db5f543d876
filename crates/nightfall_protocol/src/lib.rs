//! Shared vocabulary for the Nightfall closing pipeline.
//!
//! Every other crate speaks in these types:
//!
//! - [`NightDate`]: one observing night, written `YYYY_MM_DD` on the command line
//! - [`RunKind`] / [`Sequence`]: a run and the pipeline kind that processes it
//! - [`NightfallConfig`]: the immutable TOML configuration
//! - [`NightContext`]: the per-invocation options (telescope, night, simulate, ...)
//! - [`NightPaths`]: every path derived from the three above

pub mod config;
pub mod defaults;
pub mod error;
pub mod paths;
pub mod types;

pub use config::{
    ConceptSpec, DatabaseConfig, NightConfig, NightfallConfig, PathsConfig, ProdConfig,
    RemoteConfig, StepSpec, StepsConfig,
};
pub use error::{ProtocolError, Result};
pub use paths::{expand_template, NightPaths, TemplateVars};
pub use types::{CalibrationArtifacts, NightContext, NightDate, ProductKind, RunKind, Sequence};
