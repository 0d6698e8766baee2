//! Benchmark runner.

use super::scoring::check_answer;
use crate::error::PipelineError;
use crate::models::{AgentOutput, ImageRef};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Marker separating question text from the image file name.
const IMAGE_MARKER: &str = "<IMG>";

/// Capabilities reported separately in the summary.
const CAPABILITIES: [&str; 4] = ["ocr", "math", "spat", "rec"];

/// One dataset question.
///
/// v2 datasets embed the image in the question as `<text><IMG><file>`;
/// v1 datasets name it in `imagename`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub question: String,
    /// Ground truth, possibly with `<OR>` / `<AND>`.
    pub answer: String,
    #[serde(default)]
    pub capability: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imagename: Option<String>,
}

impl DatasetEntry {
    /// Split into (question text, image file name).
    pub fn split_question(&self) -> Option<(&str, &str)> {
        if let Some((text, rest)) = self.question.split_once(IMAGE_MARKER) {
            let file = rest.split(IMAGE_MARKER).next().unwrap_or_default().trim();
            return (!file.is_empty()).then(|| (text.trim(), file));
        }
        let file = self.imagename.as_deref()?.trim();
        (!file.is_empty()).then(|| (self.question.trim(), file))
    }
}

/// Where the benchmark reads from and writes to.
#[derive(Debug, Clone)]
pub struct BenchmarkOptions {
    pub dataset: PathBuf,
    pub image_dir: PathBuf,
    /// Answers file (`qid -> answer`), also used to resume.
    pub output: PathBuf,
    /// Stop after this many new questions.
    pub limit: Option<usize>,
    pub show_progress: bool,
}

/// Accuracy for one capability over every stored answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilityScore {
    pub accuracy: f64,
    pub count: usize,
}

/// Outcome of a benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    /// Questions answered in this run.
    pub answered: usize,
    /// Of those, how many matched the ground truth.
    pub correct: usize,
    /// Questions that failed in this run (stored as empty answers).
    pub failed: usize,
    /// Questions skipped because a previous run already answered them.
    pub skipped: usize,
    /// Accuracy of this run in percent.
    pub accuracy: f64,
    pub by_capability: BTreeMap<String, CapabilityScore>,
    pub finished_at: DateTime<Utc>,
}

/// Load the dataset file.
pub fn load_dataset(path: &Path) -> Result<BTreeMap<String, DatasetEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse dataset: {}", path.display()))
}

/// Load earlier answers, starting fresh if the file is missing or corrupt.
pub fn load_existing_results(path: &Path) -> BTreeMap<String, String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return BTreeMap::new();
    };
    match serde_json::from_str::<BTreeMap<String, String>>(&content) {
        Ok(results) => {
            info!("Loaded {} existing results", results.len());
            results
        }
        Err(e) => {
            warn!("Failed to load existing results, starting fresh: {}", e);
            BTreeMap::new()
        }
    }
}

fn save_results(path: &Path, results: &BTreeMap<String, String>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write results to {}", path.display()))
}

fn percent(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64 * 100.0
    }
}

/// Accuracy per capability over every stored answer.
pub fn capability_scores(
    dataset: &BTreeMap<String, DatasetEntry>,
    results: &BTreeMap<String, String>,
) -> BTreeMap<String, CapabilityScore> {
    let mut scores = BTreeMap::new();
    for cap in CAPABILITIES {
        let questions: Vec<_> = dataset
            .iter()
            .filter(|(_, entry)| entry.capability.iter().any(|c| c == cap))
            .collect();
        if questions.is_empty() {
            continue;
        }
        let correct = questions
            .iter()
            .filter(|(qid, entry)| {
                results
                    .get(qid.as_str())
                    .is_some_and(|answer| check_answer(answer, &entry.answer))
            })
            .count();
        scores.insert(
            cap.to_string(),
            CapabilityScore {
                accuracy: percent(correct, questions.len()),
                count: questions.len(),
            },
        );
    }
    scores
}

/// Run every unanswered dataset question through `answer`.
///
/// A failing question is logged, stored as an empty answer and skipped;
/// it does not stop the run.
pub async fn run_benchmark<F, Fut>(options: &BenchmarkOptions, answer: F) -> Result<BenchmarkSummary>
where
    F: Fn(ImageRef, String) -> Fut,
    Fut: Future<Output = Result<AgentOutput, PipelineError>>,
{
    let dataset = load_dataset(&options.dataset)?;
    let mut results = load_existing_results(&options.output);

    let pending: Vec<_> = dataset
        .iter()
        .filter(|(qid, _)| !results.contains_key(qid.as_str()))
        .take(options.limit.unwrap_or(usize::MAX))
        .collect();
    let skipped = dataset
        .keys()
        .filter(|qid| results.contains_key(qid.as_str()))
        .count();
    info!(
        "{} questions in dataset, {} already answered, {} to run",
        dataset.len(),
        skipped,
        pending.len()
    );

    let progress = if options.show_progress {
        let pb = ProgressBar::new(pending.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let (mut answered, mut correct, mut failed) = (0usize, 0usize, 0usize);

    for (qid, entry) in pending {
        let outcome = match entry.split_question() {
            Some((question, file)) => {
                info!("Processing {}: {}", qid, question);
                let image = ImageRef::new(options.image_dir.join(file));
                answer(image, question.to_string())
                    .await
                    .map_err(anyhow::Error::from)
            }
            None => Err(anyhow::anyhow!(
                "question has no {} marker and no imagename",
                IMAGE_MARKER
            )),
        };

        match outcome {
            Ok(output) => {
                answered += 1;
                if check_answer(&output.result, &entry.answer) {
                    correct += 1;
                }
                debug!("Answer for {}: {}", qid, output.result);
                info!(
                    "Current Accuracy: {:.2}% ({}/{})",
                    percent(correct, answered),
                    correct,
                    answered
                );
                results.insert(qid.clone(), output.result);
            }
            Err(e) => {
                error!("Error processing {}: {}", qid, e);
                failed += 1;
                results.insert(qid.clone(), String::new());
            }
        }
        save_results(&options.output, &results)?;

        if let Some(ref pb) = progress {
            pb.set_message(format!("{:.1}%", percent(correct, answered)));
            pb.inc(1);
        }
    }

    if let Some(pb) = progress {
        pb.finish_with_message("Benchmark complete");
    }

    Ok(BenchmarkSummary {
        answered,
        correct,
        failed,
        skipped,
        accuracy: percent(correct, answered),
        by_capability: capability_scores(&dataset, &results),
        finished_at: Utc::now(),
    })
}
