//! Corpus-level captioning metrics provider contract.
//!
//! The scoring algorithms live outside this crate. A provider receives the
//! full prediction and reference collections in one call and returns a
//! mapping from metric name to a record with at least a `score` field.

use std::collections::HashMap;
use std::io::Write;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub file_name: String,
    pub caption_predicted: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub file_name: String,
    pub caption_1: String,
    pub caption_2: String,
    pub caption_3: String,
    pub caption_4: String,
    pub caption_5: String,
}

impl ReferenceRecord {
    pub fn new(file_name: impl Into<String>, captions: &[String; 5]) -> Self {
        let [c1, c2, c3, c4, c5] = captions.clone();
        Self {
            file_name: file_name.into(),
            caption_1: c1,
            caption_2: c2,
            caption_3: c3,
            caption_4: c4,
            caption_5: c5,
        }
    }
}

/// One metric's result. Extra fields from the provider are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricScore {
    pub score: f64,
}

pub trait MetricsProvider {
    fn evaluate(
        &self,
        predictions: &[PredictionRecord],
        references: &[ReferenceRecord],
    ) -> Result<HashMap<String, MetricScore>>;
}

#[derive(Serialize)]
struct MetricsRequest<'a> {
    predictions: &'a [PredictionRecord],
    references: &'a [ReferenceRecord],
}

/// Runs an external program: request JSON on stdin, scores JSON on stdout.
#[derive(Debug, Clone)]
pub struct CommandMetricsProvider {
    program: String,
    args: Vec<String>,
}

impl CommandMetricsProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from `[program, args...]`.
    pub fn from_command(command: &[String]) -> Result<Self> {
        match command.split_first() {
            Some((program, args)) => Ok(Self::new(program.clone(), args.to_vec())),
            None => Err(Error::Config("metrics command is empty".into())),
        }
    }
}

impl MetricsProvider for CommandMetricsProvider {
    fn evaluate(
        &self,
        predictions: &[PredictionRecord],
        references: &[ReferenceRecord],
    ) -> Result<HashMap<String, MetricScore>> {
        let request = serde_json::to_vec(&MetricsRequest {
            predictions,
            references,
        })?;
        tracing::debug!(program = %self.program, bytes = request.len(), "running metrics command");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Metrics(format!("cannot start {:?}: {e}", self.program)))?;

        let writer = child.stdin.take().map(|mut stdin| {
            std::thread::spawn(move || stdin.write_all(&request))
        });
        let output = child
            .wait_with_output()
            .map_err(|e| Error::Metrics(format!("{:?} did not finish: {e}", self.program)))?;
        if let Some(writer) = writer {
            writer
                .join()
                .map_err(|_| Error::Metrics("stdin writer panicked".into()))?
                .map_err(|e| Error::Metrics(format!("writing request failed: {e}")))?;
        }

        if !output.status.success() {
            return Err(Error::Metrics(format!(
                "{:?} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Metrics(format!("unreadable scores from {:?}: {e}", self.program)))
    }
}
