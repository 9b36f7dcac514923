use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use log::debug;
use std::io;
use std::path::PathBuf;

use oci_inventory::output::{self, AnalyzerReport};
use oci_inventory::{AutoSource, Config, DockerSource, ImageProcessor, Notifier, Source, TarSource};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Engine {
    Auto,
    Tar,
    Docker,
}

#[derive(Subcommand)]
enum Command {
    /// Report the packages installed in one image
    Analyze {
        #[arg(help = "Image tarball path or local Docker image (e.g., debian:bookworm)")]
        image: String,
    },
    /// Compare the packages installed in two images
    Diff {
        #[arg(help = "Base image")]
        image1: String,
        #[arg(help = "Image compared against the base")]
        image2: String,
    },
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(
        short = 't',
        long = "type",
        global = true,
        help = "Analyzer to run: apt, apk or rpm (repeatable, default: all)"
    )]
    types: Vec<String>,

    #[arg(
        short,
        long,
        global = true,
        help = "Keep the squashed image filesystems after the run"
    )]
    save: bool,

    #[arg(
        short = 'x',
        long,
        global = true,
        help = "Path prefix inside the image to skip during extraction (repeatable)"
    )]
    exclude: Vec<PathBuf>,

    #[arg(
        short,
        long,
        value_enum,
        global = true,
        default_value = "auto",
        help = "Where images come from"
    )]
    engine: Engine,

    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Verbose mode (-v for info, -vv for debug, -vvv for trace). Also switches to text-based progress"
    )]
    verbose: u8,
}

fn run<S: Source>(source: S, notifier: Notifier, config: Config, command: &Command) -> Result<bool> {
    let processor = ImageProcessor::new(source, notifier, config);
    match command {
        Command::Analyze { image } => {
            let report = processor.analyze(image)?;
            output::write_json(io::stdout().lock(), &report)?;
            Ok(report.results.iter().any(AnalyzerReport::is_failed))
        }
        Command::Diff { image1, image2 } => {
            let report = processor.diff(image1, image2)?;
            output::write_json(io::stdout().lock(), &report)?;
            Ok(report.results.iter().any(AnalyzerReport::is_failed))
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Unknown analyzers are rejected before any image work
    let config = Config::from_names(&cli.types, cli.save, cli.exclude.clone())?;

    let notifier = Notifier::new(cli.verbose);
    notifier.install()?;

    debug!("Engine: {:?}", cli.engine);
    debug!("Analyzers: {:?}", config.analyzers);
    debug!("Beautiful progress: {}", notifier.use_beautiful_progress());

    let any_failed = match cli.engine {
        Engine::Auto => run(AutoSource::new()?, notifier, config, &cli.command)?,
        Engine::Tar => run(TarSource::new()?, notifier, config, &cli.command)?,
        Engine::Docker => run(DockerSource::new()?, notifier, config, &cli.command)?,
    };

    if any_failed {
        log::warn!("Some analyzers failed, see the error entries in the report");
    }

    Ok(())
}
