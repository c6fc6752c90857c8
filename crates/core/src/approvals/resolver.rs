use thiserror::Error;

use crate::domain::approval::{ApproverConfig, ApproverConfigId, StepDraft};
use crate::errors::WorkflowError;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no approver configured for this request type")]
    NoConfigs,
    #[error("approver config `{}` has level {level}; levels start at 1", .config_id.0)]
    InvalidLevel { config_id: ApproverConfigId, level: u32 },
    #[error("approver chain has more steps than can be numbered")]
    TooManySteps,
}

impl From<ResolveError> for WorkflowError {
    fn from(value: ResolveError) -> Self {
        Self::Configuration(value.to_string())
    }
}

/// Turns the approver rows of a request type into a numbered step chain.
///
/// Rows are ordered by `(level, priority)` with a stable sort, so rows that tie keep the order
/// the store returned them in. Each row becomes its own step; step numbers are contiguous
/// starting at 1.
#[derive(Clone, Debug, Default)]
pub struct ConfigResolver;

impl ConfigResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn build_steps(&self, configs: &[ApproverConfig]) -> Result<Vec<StepDraft>, ResolveError> {
        if configs.is_empty() {
            return Err(ResolveError::NoConfigs);
        }

        if let Some(config) = configs.iter().find(|config| config.level == 0) {
            return Err(ResolveError::InvalidLevel {
                config_id: config.id.clone(),
                level: config.level,
            });
        }

        let mut ordered: Vec<&ApproverConfig> = configs.iter().collect();
        ordered.sort_by_key(|config| (config.level, config.priority));

        ordered
            .into_iter()
            .enumerate()
            .map(|(index, config)| {
                let step_number =
                    u32::try_from(index + 1).map_err(|_| ResolveError::TooManySteps)?;
                Ok(StepDraft {
                    step_number,
                    approver: config.approver.clone(),
                    mode: config.mode,
                })
            })
            .collect()
    }
}
