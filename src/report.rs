//! Rendering of benchmark results: console table, Markdown report, JSON and YAML

use crate::progress::{level_progress_bar, ProgressSink};
use crate::session::SessionObserver;
use crate::{BenchmarkReport, LevelFailure, StatisticsRecord};
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;

const TABLE_HEADER: &str = "| Concurrency | Generation Throughput (tokens/s) |  Prompt Throughput (tokens/s) | Min TTFT (s) | Max TTFT (s) |";
const TABLE_RULE: &str = "|-------------|----------------------------------|-------------------------------|--------------|--------------|";

fn format_row(record: &StatisticsRecord) -> String {
    format!(
        "| {:>11} | {:>32.2} | {:>29.2} | {:>12.2} | {:>12.2} |",
        record.concurrency,
        record.generation_throughput,
        record.prompt_throughput,
        record.min_ttft,
        record.max_ttft
    )
}

fn format_failure(failure: &LevelFailure) -> String {
    format!(
        "| {:>11} | FAILED ({} error{}) |",
        failure.concurrency,
        failure.causes.len(),
        if failure.causes.len() == 1 { "" } else { "s" }
    )
}

pub fn print_report_header(model: &str, input_tokens: u64, max_tokens: u32, latency_ms: f64) {
    let separator = "=".repeat(112);
    println!("\n{}", separator);
    println!("{:^112}", "LLM API Throughput Benchmark");
    println!("{}", separator);
    println!("Model:          {}", model);
    println!("Input Tokens:   {}", input_tokens);
    println!("Output Tokens:  {}", max_tokens);
    println!("Latency:        {:.2} ms", latency_ms);
    println!("{}", separator);
    println!();
    println!("{}", TABLE_HEADER);
    println!("{}", TABLE_RULE);
}

pub fn print_level_row(record: &StatisticsRecord) {
    println!("{}", format_row(record));
}

/// Markdown document for a finished session
pub fn render_markdown(report: &BenchmarkReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# LLM API Throughput Benchmark");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Generated: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "- **Model**: {}", report.model_name);
    let _ = writeln!(out, "- **Input Tokens**: {}", report.input_tokens);
    let _ = writeln!(out, "- **Output Tokens**: {}", report.max_tokens);
    let _ = writeln!(out, "- **Latency**: {:.2} ms", report.latency);
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", TABLE_HEADER);
    let _ = writeln!(out, "{}", TABLE_RULE);
    for record in &report.results {
        let _ = writeln!(out, "{}", format_row(record));
    }

    if !report.failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Failed Concurrency Levels");
        for failure in &report.failures {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "### Level {} (concurrency {})",
                failure.index, failure.concurrency
            );
            for cause in &failure.causes {
                let _ = writeln!(out, "- {}", cause);
            }
        }
    }

    out
}

/// Generate a timestamped Markdown output filename
pub fn generate_output_filename(model_name: &str, output_dir: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let safe_name = model_name.replace([' ', '/', ':'], "_").to_lowercase();
    format!("{}/{}_{}.md", output_dir, safe_name, timestamp)
}

/// Save the Markdown report, creating the parent directory if needed
pub fn save_markdown_report(report: &BenchmarkReport, output_path: &str) -> Result<()> {
    if let Some(parent) = std::path::Path::new(output_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(output_path, render_markdown(report))
        .with_context(|| format!("Failed to write {}", output_path))?;
    info!("Results saved to: {}", output_path);
    Ok(())
}

pub fn to_json(report: &BenchmarkReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Error marshalling JSON")
}

pub fn to_yaml(report: &BenchmarkReport) -> Result<String> {
    serde_yaml::to_string(report).context("Error marshalling YAML")
}

/// Prints the table as levels finish, with a progress bar per running level
#[derive(Default)]
pub struct ConsoleObserver {
    show_progress: bool,
    current: Option<ProgressBar>,
}

impl ConsoleObserver {
    pub fn new(show_progress: bool) -> Self {
        ConsoleObserver {
            show_progress,
            current: None,
        }
    }

    fn clear_bar(&mut self) {
        if let Some(bar) = self.current.take() {
            bar.finish_and_clear();
        }
    }
}

impl SessionObserver for ConsoleObserver {
    fn on_session_start(&mut self, model: &str, input_tokens: u64, max_tokens: u32, latency_ms: f64) {
        print_report_header(model, input_tokens, max_tokens, latency_ms);
    }

    fn on_level_start(&mut self, concurrency: usize, max_tokens: u32) -> Option<Arc<dyn ProgressSink>> {
        if !self.show_progress {
            return None;
        }
        let bar = level_progress_bar(concurrency, max_tokens);
        self.current = Some(bar.clone());
        Some(Arc::new(bar))
    }

    fn on_level_complete(&mut self, record: &StatisticsRecord) {
        self.clear_bar();
        print_level_row(record);
    }

    fn on_level_failed(&mut self, failure: &LevelFailure) {
        self.clear_bar();
        println!("{}", format_failure(failure));
        for cause in &failure.causes {
            eprintln!("  {}", cause);
        }
    }
}
