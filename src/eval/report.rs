//! Per-epoch evaluation report.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::metrics::MetricScore;
use crate::{Error, Result};

/// `(provider key, report name)` for the nine extracted metrics, in
/// display order.
pub const REPORTED_METRICS: [(&str, &str); 9] = [
    ("bleu_1", "BLEU_1"),
    ("bleu_2", "BLEU_2"),
    ("bleu_3", "BLEU_3"),
    ("bleu_4", "BLEU_4"),
    ("meteor", "METEOR"),
    ("rouge_l", "ROUGE_l"),
    ("cider", "CIDEr"),
    ("spice", "SPICE"),
    ("spider", "SPIDEr"),
];

/// Scores of one evaluation, keyed by epoch and run name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub epoch: usize,
    pub run_name: String,
    pub scores: BTreeMap<String, f64>,
}

impl EvaluationReport {
    /// Pick the nine reported metrics out of a provider result.
    pub fn from_metrics(
        epoch: usize,
        run_name: &str,
        metrics: &HashMap<String, MetricScore>,
    ) -> Result<Self> {
        let mut scores = BTreeMap::new();
        for (key, name) in REPORTED_METRICS {
            let score = metrics
                .get(key)
                .ok_or_else(|| Error::Metrics(format!("provider returned no {key:?} score")))?;
            scores.insert(name.to_string(), score.score);
        }
        Ok(Self {
            epoch,
            run_name: run_name.to_string(),
            scores,
        })
    }

    pub fn score(&self, name: &str) -> Option<f64> {
        self.scores.get(name).copied()
    }

    pub fn path(eval_dir: impl AsRef<Path>, epoch: usize, run_name: &str) -> PathBuf {
        eval_dir
            .as_ref()
            .join(format!("epoch_{epoch}_{run_name}.json"))
    }

    /// Write the report as JSON under `eval_dir`.
    pub fn save(&self, eval_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let eval_dir = eval_dir.as_ref();
        std::fs::create_dir_all(eval_dir)?;
        let path = Self::path(eval_dir, self.epoch, &self.run_name);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Two-column text table, six decimals.
    pub fn table(&self) -> String {
        let rows: Vec<(&str, String)> = REPORTED_METRICS
            .iter()
            .filter_map(|(_, name)| self.score(name).map(|s| (*name, format!("{s:.6}"))))
            .collect();
        let name_w = rows.iter().map(|(n, _)| n.len()).chain([4]).max().unwrap_or(4);
        let value_w = rows.iter().map(|(_, v)| v.len()).chain([5]).max().unwrap_or(5);
        let rule = format!("+{}+{}+", "-".repeat(name_w + 2), "-".repeat(value_w + 2));

        let mut out = String::new();
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "| {:<name_w$} | {:<value_w$} |", "Type", "Value");
        let _ = writeln!(out, "{rule}");
        for (name, value) in &rows {
            let _ = writeln!(out, "| {name:<name_w$} | {value:<value_w$} |");
        }
        let _ = write!(out, "{rule}");
        out
    }
}
