use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde_sarif::sarif::Invocation;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mutascope::config::Configuration;
use mutascope::names::ClassIdentifier;
use mutascope::report::{build_sarif, render_text};
use mutascope::scan::ClassPath;
use mutascope::session::AnalysisSession;
use mutascope::source::ClassSource;

/// CLI arguments for a mutascope run.
#[derive(Parser, Debug)]
#[command(
    name = "mutascope",
    about = "Static immutability analysis for JVM class files and JAR files.",
    version
)]
struct Cli {
    #[arg(long, value_name = "PATH", required = true)]
    input: Vec<PathBuf>,
    /// Dependencies used for hierarchy and mutability lookups only.
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    /// Restrict the analysis to the named classes.
    #[arg(long = "class", value_name = "NAME")]
    classes: Vec<String>,
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long)]
    verbose: bool,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
    #[arg(long)]
    allow_subclassing: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum Format {
    Text,
    Sarif,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run(cli)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    for input in &cli.input {
        if !input.exists() {
            anyhow::bail!("input not found: {}", input.display());
        }
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }

    let started_at = Instant::now();
    let configuration = load_configuration(cli.config.as_deref(), cli.allow_subclassing)?;
    let mut class_path = ClassPath::load(&cli.input, &cli.classpath)?;
    let class_count = class_path.class_count();
    let artifacts = std::mem::take(&mut class_path.artifacts);
    let targets = select_targets(&class_path, &cli.classes);
    let session = AnalysisSession::new(configuration, Arc::new(class_path));
    let results = session.analyze_all(&targets);
    info!(
        classes = results.len(),
        cached = session.cached_results(),
        battery_runs = session.battery_runs(),
        "analysis finished"
    );

    let mut writer = output_writer(cli.output.as_deref())?;
    match cli.format {
        Format::Text => writer
            .write_all(render_text(&results, cli.verbose).as_bytes())
            .context("failed to write report")?,
        Format::Sarif => {
            let sarif = build_sarif(&results, artifacts, build_invocation())?;
            serde_json::to_writer_pretty(&mut writer, &sarif)
                .context("failed to serialize SARIF output")?;
            writer
                .write_all(b"\n")
                .context("failed to write SARIF output")?;
        }
    }

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} classes={} analysed={}",
            started_at.elapsed().as_millis(),
            class_count,
            results.len()
        );
    }

    Ok(())
}

fn load_configuration(path: Option<&Path>, allow_subclassing: bool) -> Result<Configuration> {
    let configuration = match path {
        Some(path) => {
            let document = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Configuration::from_json(&document)
                .with_context(|| format!("invalid configuration {}", path.display()))?
        }
        None => Configuration::default(),
    };
    if allow_subclassing {
        return Ok(configuration.with_allow_subclassing(true));
    }
    Ok(configuration)
}

/// Classes named with `--class`, or every input class when none are named.
fn select_targets(class_path: &ClassPath, names: &[String]) -> Vec<ClassIdentifier> {
    if names.is_empty() {
        return class_path.targets.clone();
    }
    names
        .iter()
        .map(ClassIdentifier::new)
        .inspect(|class| {
            if class_path.class(class).is_none() {
                warn!(class = %class, "requested class not found in inputs or classpath");
            }
        })
        .collect()
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

fn build_invocation() -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_accepts_repeated_inputs_and_classes() {
        let cli = Cli::try_parse_from([
            "mutascope",
            "--input",
            "a.jar",
            "--input",
            "b.jar",
            "--class",
            "com.example.A",
            "--format",
            "sarif",
            "--allow-subclassing",
        ])
        .expect("parse");

        assert_eq!(2, cli.input.len());
        assert_eq!(vec!["com.example.A".to_string()], cli.classes);
        assert_eq!(Format::Sarif, cli.format);
        assert!(cli.allow_subclassing);
    }

    #[test]
    fn cli_requires_input() {
        assert!(Cli::try_parse_from(["mutascope"]).is_err());
    }

    #[test]
    fn configuration_flag_overrides_subclassing_policy() {
        let configuration = load_configuration(None, true).expect("config");
        assert!(configuration.allow_subclassing());
        assert!(!load_configuration(None, false).expect("config").allow_subclassing());
    }
}
