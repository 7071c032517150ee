//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use stixkit_core::extractor::{ExtractReport, Extractor};
use stixkit_core::merger::{MergeReport, MergeStats, Merger};
use stixkit_core::pipeline::{PipelineConfig, PipelineResult, ProgressReporter, run_pipeline};
use stixkit_download::DownloadResult;
use stixkit_shared::{
    AppConfig, DownloadConfig, ExtractConfig, MergeConfig, init_config, init_config_at, load_config,
    load_config_from,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// stixkit: split and merge STIX threat-intelligence bundles.
#[derive(Parser)]
#[command(
    name = "stixkit",
    version,
    about = "Extract per-adversary STIX bundles and merge partial bundles into one.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.stixkit/stixkit.toml).
    #[arg(long, global = true, env = "STIXKIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Write one bundle per intrusion-set found in the canonical bundle.
    Extract {
        /// Bundle to extract from (defaults to the canonical bundle).
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output directory (defaults to the adversary bundle directory).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Merge every bundle in the raw directory into the canonical bundle.
    Merge {
        /// Directory of bundles to merge.
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Merged output file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Download the upstream bundle into the raw directory.
    Download {
        /// URL to fetch instead of the configured one.
        #[arg(long)]
        url: Option<String>,
    },

    /// Download, merge, and extract in one go.
    Pipeline {
        /// Use the bundles already on disk.
        #[arg(long)]
        skip_download: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "stixkit=info",
        1 => "stixkit=debug",
        _ => "stixkit=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Extract { input, out } => cmd_extract(config_path, input, out),
        Command::Merge { dir, output } => cmd_merge(config_path, dir, output),
        Command::Download { url } => cmd_download(config_path, url).await,
        Command::Pipeline { skip_download } => cmd_pipeline(config_path, skip_download).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

/// Load `--config FILE` if given, else the default config (or defaults).
fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_extract(
    config_path: Option<&Path>,
    input: Option<PathBuf>,
    out: Option<PathBuf>,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    let mut extract_config = ExtractConfig::from(&config);
    if let Some(input) = input {
        extract_config.input_file = input;
    }
    if let Some(out) = out {
        extract_config.output_dir = out;
    }

    info!(
        input = %extract_config.input_file.display(),
        output = %extract_config.output_dir.display(),
        "extracting adversary bundles"
    );

    let reporter = CliProgress::new();
    let report = Extractor::new(extract_config).run(&reporter);
    reporter.finish();
    print_extract_report(&report?);
    Ok(())
}

fn cmd_merge(
    config_path: Option<&Path>,
    dir: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    let mut merge_config = MergeConfig::from(&config);
    if let Some(dir) = dir {
        // keep the canonical file next to the bundles it is built from
        if output.is_none() {
            merge_config.output_file = dir.join(&config.paths.canonical_file);
        }
        merge_config.raw_dir = dir;
    }
    if let Some(output) = output {
        merge_config.output_file = output;
    }

    info!(
        dir = %merge_config.raw_dir.display(),
        output = %merge_config.output_file.display(),
        "merging bundles"
    );

    let reporter = CliProgress::new();
    let report = Merger::new(merge_config).merge(&reporter);
    reporter.finish();
    print_merge_report(&report?);
    Ok(())
}

async fn cmd_download(config_path: Option<&Path>, url: Option<String>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let mut download_config = DownloadConfig::from(&config);
    if let Some(url) = url {
        download_config.url = url;
    }

    let reporter = CliProgress::new();
    reporter.phase("Downloading bundle");
    let result = stixkit_download::download(&download_config).await;
    reporter.finish();
    print_download(&result?);
    Ok(())
}

async fn cmd_pipeline(config_path: Option<&Path>, skip_download: bool) -> Result<()> {
    let config = resolve_config(config_path)?;
    let pipeline_config = PipelineConfig::from_app(&config, skip_download);

    info!(skip_download, "running pipeline");

    let reporter = CliProgress::new();
    let result = run_pipeline(&pipeline_config, &reporter).await;
    reporter.finish();
    let result = result?;

    match &result.download {
        Some(download) => print_download(download),
        None if !skip_download => println!("  Download failed, used bundles already on disk."),
        None => {}
    }
    print_merge_report(&result.merge);
    print_extract_report(&result.extract);
    println!("  Total time: {:.1}s", result.elapsed.as_secs_f64());
    println!();
    Ok(())
}

fn cmd_config_init(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(path) => {
            init_config_at(path)?;
            path.to_path_buf()
        }
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

fn print_extract_report(report: &ExtractReport) {
    println!();
    if report.groups_found == 0 {
        println!("  No intrusion sets found, nothing extracted.");
        println!();
        return;
    }

    for written in &report.written {
        let code = written.mitre_id.as_deref().unwrap_or("-");
        println!(
            "  {code:<6} {:<40} {:>5} objects  {}",
            written.group_name,
            written.object_count,
            written.path.display()
        );
    }
    for failure in report.build_failures.iter().chain(&report.write_failures) {
        println!("  FAILED {}: {}", failure.group, failure.error);
    }

    println!();
    println!("  Groups:   {}", report.groups_found);
    println!("  Written:  {}", report.written.len());
    println!(
        "  Failed:   {}",
        report.build_failures.len() + report.write_failures.len()
    );
    println!("  Skipped:  {} input objects", report.skipped_objects);
    println!("  Time:     {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

fn print_merge_report(report: &MergeReport) {
    println!();
    match report {
        MergeReport::NothingToMerge => println!("  No bundle files to merge."),
        MergeReport::Copied {
            source,
            bytes,
            stats,
        } => {
            println!("  Single bundle copied unchanged.");
            println!("  From:        {}", source.display());
            println!("  Bytes:       {bytes}");
            print_merge_stats(stats);
        }
        MergeReport::Merged(stats) => {
            println!("  Bundles merged.");
            println!("  Files:       {}", stats.files);
            print_merge_stats(stats);
        }
    }
    println!();
}

fn print_merge_stats(stats: &MergeStats) {
    println!("  Read:        {}", stats.objects_read);
    println!("  Unique:      {}", stats.unique);
    println!("  Duplicates:  {}", stats.duplicates);
    println!("  Missing id:  {}", stats.missing_id);
    if stats.non_objects > 0 {
        println!("  Non-objects: {}", stats.non_objects);
    }
    for failure in &stats.stream_errors {
        println!("  Stream error in {}: {}", failure.path.display(), failure.error);
    }
    println!("  Output:      {}", stats.output.display());
    println!("  Time:        {:.1}s", stats.elapsed.as_secs_f64());
}

fn print_download(result: &DownloadResult) {
    println!();
    println!("  Downloaded {}", result.path.display());
    println!("  Bytes:   {}", result.bytes);
    println!("  SHA-256: {}", result.sha256);
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn group_extracted(&self, name: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Extracting [{current}/{total}] {name}"));
    }

    fn file_streamed(&self, path: &Path, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Merged [{current}/{total}] {}", path.display()));
    }

    fn done(&self, _result: &PipelineResult) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_extract_overrides() {
        let cli = Cli::try_parse_from(["stixkit", "-v", "extract", "--input", "a.json", "--out", "groups"])
            .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Extract { input, out } => {
                assert_eq!(input, Some(PathBuf::from("a.json")));
                assert_eq!(out, Some(PathBuf::from("groups")));
            }
            _ => panic!("expected extract"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["stixkit", "merge", "--log-format", "json", "--config", "c.toml"])
            .unwrap();
        assert!(matches!(cli.log_format, LogFormat::Json));
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["stixkit", "frobnicate"]).is_err());
        assert!(Cli::try_parse_from(["stixkit"]).is_err());
    }

    #[test]
    fn pipeline_skip_download_flag() {
        let cli = Cli::try_parse_from(["stixkit", "pipeline", "--skip-download"]).unwrap();
        assert!(matches!(cli.command, Command::Pipeline { skip_download: true }));
    }
}
