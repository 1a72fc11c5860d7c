use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use apisentinel::cli::{Cli, Commands, ScanArgs};
use apisentinel::config;
use apisentinel::error::ConfigError;
use apisentinel::models::ScanReport;
use apisentinel::reporter::{self, BurpExporter, ConsoleReporter, JsonExporter, PostmanExporter, ReportSink};
use apisentinel::rules::builtin::all_checkers;
use apisentinel::scanner::Orchestrator;

const EXIT_TARGET_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.debug);

    let result = match cli.command {
        Commands::Scan(args) => run_scan(args).await,
        Commands::Report { input, output } => run_report(&input, output.as_deref()),
        Commands::Categories => {
            print_categories();
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            if e.downcast_ref::<ConfigError>().is_some() {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn init_logging(verbose: bool, debug: bool) {
    let crate_level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter_str = format!(
        "apisentinel={crate_level},reqwest=info,hyper=info,h2=info",
        crate_level = crate_level
    );
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&filter_str))
        .unwrap_or_else(|_| EnvFilter::new(crate_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_scan(args: ScanArgs) -> Result<ExitCode> {
    let targets = config::load_targets(&args.file)?;
    let scan_config = args.to_config()?;
    let cancel = CancellationToken::new();
    let orchestrator = Orchestrator::new(scan_config, cancel.clone())?;

    let settings = orchestrator.config();
    println!(
        "{} {} targets, {} paths x {} methods, {} threads, {} req/s{}",
        "[*]".cyan(),
        targets.len(),
        settings.wordlist.len(),
        settings.methods.len(),
        settings.threads,
        settings.rate_limit_rps,
        if settings.sqli.enabled { ", SQLi dispatch on" } else { "" }
    );

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{} interrupted, flushing partial reports", "[!]".yellow());
                cancel.cancel();
            }
        })
    };

    let pb = create_progress_bar(targets.len(), args.quiet);
    let console = ConsoleReporter::new();
    let (tx, mut rx) = mpsc::channel::<ScanReport>(targets.len().max(1));

    let collect = async {
        let mut reports = Vec::new();
        while let Some(report) = rx.recv().await {
            pb.inc(1);
            pb.set_message(report.target.clone());
            if !args.quiet {
                pb.suspend(|| console.print_report(&report));
            }
            reports.push(report);
        }
        reports
    };

    let ((), reports) = tokio::join!(orchestrator.run(targets, tx), collect);
    interrupt.abort();
    pb.finish_and_clear();

    for sink in reporter::all_sinks() {
        let path = sink.write(&reports, &args.output)?;
        println!("{} Report generated: {}", "[+]".green(), path.display());
    }

    if !args.quiet {
        console.print_details(&reports);
    }
    console.print_warnings(&reports);
    console.print_summary(&reports);

    Ok(if cancel.is_cancelled() {
        ExitCode::from(EXIT_INTERRUPTED)
    } else if reports.iter().any(ScanReport::is_failed) {
        ExitCode::from(EXIT_TARGET_FAILED)
    } else {
        ExitCode::SUCCESS
    })
}

fn run_report(input: &Path, output: Option<&Path>) -> Result<ExitCode> {
    let reports = JsonExporter::load(input)?;
    let console = ConsoleReporter::new();

    for report in &reports {
        console.print_report(report);
    }
    console.print_details(&reports);
    console.print_summary(&reports);

    if let Some(dir) = output {
        let sinks: [&dyn ReportSink; 2] = [&PostmanExporter, &BurpExporter];
        for sink in sinks {
            let path = sink.write(&reports, dir)?;
            println!("{} Report generated: {}", "[+]".green(), path.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_categories() {
    for checker in all_checkers() {
        let category = checker.category();
        println!(
            "{:11} {:45} {}",
            category.id().yellow(),
            category.title(),
            checker.name().dimmed()
        );
    }
}

fn create_progress_bar(total: usize, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}
