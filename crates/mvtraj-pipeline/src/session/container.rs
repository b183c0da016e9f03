use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

use super::problem_type::{InvalidationPolicy, ProblemType};
use super::types::{ExportRecord, LogEntry, SessionMetadata, StepOutcome, unix_seconds};

/// Everything one reconstruction run owns, between and across steps.
///
/// The configuration always exists (defaults until replaced); input and
/// output are filled in as the run proceeds. Every mutation made through
/// these methods advances [`SessionMetadata::revision`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "P: ProblemType")]
pub struct ReconstructionSession<P: ProblemType> {
    pub metadata: SessionMetadata,
    pub config: P::Config,
    input: Option<P::Input>,
    pub state: P::State,
    output: Option<P::Output>,
    pub exports: Vec<ExportRecord<P::Export>>,
    pub log: Vec<LogEntry>,
}

impl<P: ProblemType> Default for ReconstructionSession<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ProblemType> ReconstructionSession<P> {
    pub fn new() -> Self {
        Self {
            metadata: SessionMetadata::new(P::name(), P::schema_version()),
            config: P::Config::default(),
            input: None,
            state: P::State::default(),
            output: None,
            exports: Vec::new(),
            log: Vec::new(),
        }
    }

    pub fn with_input(input: P::Input) -> Result<Self> {
        let mut session = Self::new();
        session.set_input(input)?;
        Ok(session)
    }

    fn discard(&mut self, policy: InvalidationPolicy) {
        if policy.clears_computed() {
            self.state = P::State::default();
            self.output = None;
        }
        if policy.clears_exports() {
            self.exports.clear();
        }
    }

    pub fn set_input(&mut self, input: P::Input) -> Result<()> {
        P::validate_input(&input)?;
        self.discard(P::on_input_change());
        self.input = Some(input);
        self.metadata.bump();
        Ok(())
    }

    pub fn input(&self) -> Option<&P::Input> {
        self.input.as_ref()
    }

    pub fn require_input(&self) -> Result<&P::Input> {
        self.input.as_ref().ok_or_else(|| anyhow!("input not set"))
    }

    pub fn set_config(&mut self, config: P::Config) -> Result<()> {
        P::validate_config(&config)?;
        self.discard(P::on_config_change());
        self.config = config;
        self.metadata.bump();
        Ok(())
    }

    /// Apply `edit` to a copy of the configuration; the session keeps the
    /// old one if the result does not validate.
    pub fn update_config(&mut self, edit: impl FnOnce(&mut P::Config)) -> Result<()> {
        let mut config = self.config.clone();
        edit(&mut config);
        self.set_config(config)
    }

    pub fn output(&self) -> Option<&P::Output> {
        self.output.as_ref()
    }

    pub fn require_output(&self) -> Result<&P::Output> {
        self.output
            .as_ref()
            .ok_or_else(|| anyhow!("no output yet; run the pipeline first"))
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn set_output(&mut self, output: P::Output) {
        self.output = Some(output);
        self.metadata.bump();
    }

    /// Convert the current output and append it to [`Self::exports`].
    pub fn export(&mut self) -> Result<P::Export> {
        let value = P::export(self.require_output()?, &self.config)?;
        let revision = self.metadata.bump();
        self.exports.push(ExportRecord {
            revision,
            at: unix_seconds(),
            value: value.clone(),
        });
        Ok(value)
    }

    /// Checks input presence, input, config and their combination.
    pub fn validate(&self) -> Result<()> {
        let input = self.require_input()?;
        P::validate_input(input)?;
        P::validate_config(&self.config)?;
        P::validate_input_config(input, &self.config)
    }

    fn record(&mut self, step: String, outcome: StepOutcome, detail: Option<String>) {
        let revision = self.metadata.bump();
        self.log.push(LogEntry {
            step,
            outcome,
            detail,
            revision,
            at: unix_seconds(),
        });
    }

    pub fn log_success_with_notes(&mut self, step: impl Into<String>, notes: impl Into<String>) {
        self.record(step.into(), StepOutcome::Completed, Some(notes.into()));
    }

    pub fn log_failure(&mut self, step: impl Into<String>, error: impl Into<String>) {
        self.record(step.into(), StepOutcome::Failed, Some(error.into()));
    }

    /// Forget state and output, keeping input, config, exports and log.
    pub fn reset_state(&mut self) {
        self.discard(InvalidationPolicy::ClearComputed);
        self.metadata.bump();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a snapshot written by [`Self::to_json`].
    ///
    /// Fails on snapshots of another problem type or of a newer schema.
    pub fn from_json(json: &str) -> Result<Self> {
        let session: Self = serde_json::from_str(json).context("parsing session snapshot")?;
        let meta = &session.metadata;
        ensure!(
            meta.problem_type == P::name(),
            "snapshot holds a '{}' session, expected '{}'",
            meta.problem_type,
            P::name()
        );
        ensure!(
            meta.schema_version <= P::schema_version(),
            "snapshot schema {} is newer than supported schema {}",
            meta.schema_version,
            P::schema_version()
        );
        Ok(session)
    }
}
