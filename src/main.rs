// databanka CLI - extract, validate and inspect the question bank PDF
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use databanka::pdf_extraction::PdfReader;
use databanka::segmenter::{BoundaryDetector, PatternDetector};
use databanka::{pipeline, validator, Config, DatabankaError, Severity};
use env_logger::Env;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "databanka")]
#[command(version, about = "Turn the citizenship test question bank PDF into a validated dataset")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Log filter (error, warn, info, debug, trace)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Build questions.json and the image store from the PDF
    Extract {
        /// Path to the question bank PDF
        pdf: PathBuf,
        /// Output directory (default: <pdf stem>_dataset next to the PDF)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Cross-check an existing dataset against the PDF
    Validate {
        /// Path to the question bank PDF
        pdf: PathBuf,
        /// Dataset directory (default: <pdf stem>_dataset next to the PDF)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Unreferenced images tolerated before warning
        #[arg(short, long)]
        tolerance: Option<usize>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Dump pages, classified lines and images
    Inspect {
        /// Path to the question bank PDF
        pdf: PathBuf,
        /// Only this page (1-based)
        #[arg(short, long)]
        page: Option<u32>,
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(cli.log_level.as_str())).init();

    let severity = match run(cli.command) {
        Ok(severity) => severity,
        Err(e) => {
            report_error(&e);
            Severity::Fatal
        }
    };
    std::process::exit(severity.exit_code());
}

fn run(command: Commands) -> Result<Severity> {
    match command {
        Commands::Extract { pdf, out, config } => {
            let config = load_config(config.as_deref())?;
            let out = out.unwrap_or_else(|| pipeline::default_output_dir(&pdf));
            let summary = pipeline::extract(&pdf, &out, &config)
                .with_context(|| format!("extracting {}", pdf.display()))?;
            println!("Wrote {}", summary.out_dir.display());
            println!("  pages:      {}", summary.pages);
            println!("  categories: {}", summary.categories);
            println!("  questions:  {}", summary.questions);
            println!(
                "  images:     {} ({} linked, {} anomalies, {} artifacts discarded)",
                summary.images, summary.linked, summary.anomalies, summary.artifacts_discarded
            );
            Ok(summary.severity())
        }
        Commands::Validate { pdf, out, tolerance, json, config } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(tolerance) = tolerance {
                config.validation.orphan_tolerance = tolerance;
            }
            let out = out.unwrap_or_else(|| pipeline::default_output_dir(&pdf));
            let report = validator::validate(&pdf, &out, &config)
                .with_context(|| format!("validating {}", out.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{report}");
            }
            Ok(report.severity())
        }
        Commands::Inspect { pdf, page, config } => {
            let config = load_config(config.as_deref())?;
            inspect(&pdf, page, &config)?;
            Ok(Severity::Clean)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load(path).context("loading configuration")
}

fn inspect(pdf: &Path, only: Option<u32>, config: &Config) -> Result<()> {
    let reader = PdfReader::open(pdf)?;
    let detector = PatternDetector::new(&config.layout, config.dataset.questions_per_category)?;
    println!("{}: {} pages", reader.path().display(), reader.page_count());

    for page in reader.pages() {
        let page = page?;
        if only.is_some_and(|n| n != page.number) {
            continue;
        }
        println!("{}", "=".repeat(60));
        println!("Page {} ({:.0} x {:.0})", page.number, page.width, page.height);
        for line in page.lines(config.layout.row_tolerance) {
            println!("{:>3} {:>6.1}  {:<24} {}", line.index, line.depth, short_kind(&detector, &line.text), line.text);
        }
        for image in &page.images {
            println!(
                "  image #{} at depth {:.1}, x {:.1}: {}x{} {} ({} bytes)",
                image.extraction_order,
                image.depth,
                image.rect.x0,
                image.encoded.width,
                image.encoded.height,
                image.encoded.format,
                image.encoded.bytes.len()
            );
        }
    }
    Ok(())
}

fn short_kind(detector: &PatternDetector, text: &str) -> String {
    let kind = format!("{:?}", detector.detect(text));
    let name = kind.split(['(', ' ', '{']).next().unwrap_or_default();
    name.to_string()
}

fn report_error(error: &anyhow::Error) {
    eprintln!("error: {error:#}");
    if let Some(DatabankaError::Segmentation(problems)) = error.downcast_ref::<DatabankaError>() {
        for problem in problems {
            eprintln!("  {problem}");
        }
    }
    if let Some(DatabankaError::IncompleteDataset { missing, unexpected }) = error.downcast_ref::<DatabankaError>() {
        for id in missing {
            eprintln!("  missing question {id}");
        }
        for id in unexpected {
            eprintln!("  unexpected question {id}");
        }
    }
}
