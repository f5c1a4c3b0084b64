//! Setup versions: each names an ordered step list.

use super::steps::{cluster_steps, deploy_driver};
use super::SetupContext;
use crate::chain::DriverRole;
use crate::error::{StackError, StackResult};
use crate::pipeline::PipelineStep;
use strum::{AsRefStr, Display, EnumIter, EnumString};

type StepListBuilder = fn() -> Vec<PipelineStep<SetupContext>>;

/// Bootstrap variant selected by `setup_version` in the stack config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum SetupVersion {
    /// Worker, gatekeeper and cluster; no driver contracts.
    Minimal,
    /// Cluster plus the cost accounting and sandbox runtime drivers.
    Default,
    /// Everything in `Default` plus the logging driver.
    WithLogging,
}

impl SetupVersion {
    /// Look up a version by its config name.
    pub fn parse(name: &str) -> StackResult<Self> {
        name.parse()
            .map_err(|_| StackError::UnsupportedSetupVersion(name.to_string()))
    }

    /// Driver roles this version deploys, in deployment order.
    pub fn drivers(&self) -> &'static [DriverRole] {
        match self {
            Self::Minimal => &[],
            Self::Default => &[DriverRole::CostAccounting, DriverRole::SandboxRuntime],
            Self::WithLogging => &[
                DriverRole::CostAccounting,
                DriverRole::SandboxRuntime,
                DriverRole::Logging,
            ],
        }
    }

    /// Fresh step list of this version.
    pub fn steps(&self) -> Vec<PipelineStep<SetupContext>> {
        (self.builder())()
    }

    fn builder(&self) -> StepListBuilder {
        match self {
            Self::Minimal => cluster_steps,
            Self::Default => default_steps,
            Self::WithLogging => with_logging_steps,
        }
    }
}

fn default_steps() -> Vec<PipelineStep<SetupContext>> {
    cluster_then_drivers(SetupVersion::Default.drivers())
}

fn with_logging_steps() -> Vec<PipelineStep<SetupContext>> {
    cluster_then_drivers(SetupVersion::WithLogging.drivers())
}

fn cluster_then_drivers(roles: &[DriverRole]) -> Vec<PipelineStep<SetupContext>> {
    let mut steps = cluster_steps();
    steps.extend(roles.iter().copied().map(deploy_driver));
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_parse() {
        assert_eq!(SetupVersion::parse("minimal").unwrap(), SetupVersion::Minimal);
        assert_eq!(
            SetupVersion::parse("with-logging").unwrap(),
            SetupVersion::WithLogging
        );
        assert!(matches!(
            SetupVersion::parse("v2"),
            Err(StackError::UnsupportedSetupVersion(v)) if v == "v2"
        ));
    }

    #[test]
    fn test_step_lists() {
        let titles = |version: SetupVersion| -> Vec<String> {
            version
                .steps()
                .iter()
                .map(|s| s.title().to_string())
                .collect()
        };

        let minimal = titles(SetupVersion::Minimal);
        assert_eq!(minimal.first().map(String::as_str), Some("Fetch worker info"));
        assert_eq!(minimal.last().map(String::as_str), Some("Wait for cluster"));

        let logging = titles(SetupVersion::WithLogging);
        assert_eq!(logging.len(), minimal.len() + 3);
        assert_eq!(
            logging.last().map(String::as_str),
            Some("Deploy logging driver")
        );

        for version in SetupVersion::iter() {
            assert_eq!(
                titles(version).len(),
                minimal.len() + version.drivers().len()
            );
        }
    }
}
