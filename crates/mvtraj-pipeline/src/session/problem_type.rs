use anyhow::Result;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

/// What a session discards when its input or configuration is replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidationPolicy {
    /// Keep state, output and exports.
    #[default]
    Keep,
    /// Reset state and output; exports stay as a history.
    ClearComputed,
    /// Reset state and output and forget past exports.
    ClearAll,
}

impl InvalidationPolicy {
    pub fn clears_computed(self) -> bool {
        self != Self::Keep
    }

    pub fn clears_exports(self) -> bool {
        self == Self::ClearAll
    }
}

/// The types a [`ReconstructionSession`](super::ReconstructionSession)
/// carries and the checks it runs before accepting them.
pub trait ProblemType: Sized + Debug {
    type Config: Clone + Debug + Default + Serialize + DeserializeOwned;
    type Input: Clone + Debug + Serialize + DeserializeOwned;
    type State: Clone + Debug + Default + Serialize + DeserializeOwned;
    type Output: Clone + Debug + Serialize + DeserializeOwned;
    type Export: Clone + Debug + Serialize + DeserializeOwned;

    /// Stored in snapshots; a snapshot only loads into the same problem.
    fn name() -> &'static str;

    /// Snapshots with a higher version are refused.
    fn schema_version() -> u32 {
        1
    }

    fn validate_input(_input: &Self::Input) -> Result<()> {
        Ok(())
    }

    fn validate_config(_config: &Self::Config) -> Result<()> {
        Ok(())
    }

    fn validate_input_config(_input: &Self::Input, _config: &Self::Config) -> Result<()> {
        Ok(())
    }

    fn on_input_change() -> InvalidationPolicy {
        InvalidationPolicy::ClearComputed
    }

    fn on_config_change() -> InvalidationPolicy {
        InvalidationPolicy::Keep
    }

    fn export(output: &Self::Output, config: &Self::Config) -> Result<Self::Export>;
}
