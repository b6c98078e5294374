use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;

mod orchestrator;
mod schemas;
mod tools;

use orchestrator::service::{OrchestratorService, RunMode, RunStatus};
use schemas::events::Event;

#[derive(Parser)]
#[command(name = "ns")]
#[command(author, version, about = "Namesmith - staged AI naming consultation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the naming pipeline with the given brief
    Run {
        /// The naming brief describing the family's preferences
        brief: String,

        /// Run mode: 'serial' (quick preview) or 'parallel' (full analysis)
        #[arg(long, short, default_value = "parallel")]
        mode: String,

        /// Output file for JSON results
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Suppress progress output
        #[arg(long, short)]
        quiet: bool,

        /// Fail instead of falling back to stub output
        #[arg(long)]
        no_stubs: bool,

        /// Output format: 'plain' or 'json-stream' (one event JSON per line)
        #[arg(long, default_value = "plain")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            brief,
            mode,
            output,
            quiet,
            no_stubs,
            format,
        } => {
            let run_mode = match mode.as_str() {
                "serial" => RunMode::Serial,
                "parallel" => RunMode::Parallel,
                other => {
                    eprintln!("Error: Invalid mode '{}'. Use 'serial' or 'parallel'.", other);
                    std::process::exit(1);
                }
            };

            let json_stream = match format.as_str() {
                "json-stream" => true,
                "plain" => false,
                other => {
                    eprintln!(
                        "Error: Invalid format '{}'. Use 'plain' or 'json-stream'.",
                        other
                    );
                    std::process::exit(1);
                }
            };

            run_pipeline(&brief, run_mode, output, quiet, no_stubs, json_stream);
        }
        Commands::Version => {
            println!("namesmith version {}", env!("CARGO_PKG_VERSION"));
        }
    }
}

fn run_pipeline(
    brief: &str,
    mode: RunMode,
    output: Option<PathBuf>,
    quiet: bool,
    no_stubs: bool,
    json_stream: bool,
) {
    let service = OrchestratorService::new(!no_stubs);
    let run_id = service.start_run(brief, mode);

    let subscription = service.subscribe(
        &run_id,
        Arc::new(move |event: &Event| {
            if json_stream {
                if let Ok(line) = serde_json::to_string(event) {
                    println!("{}", line);
                }
                return;
            }
            if quiet {
                if let Event::Error { msg, .. } = event {
                    eprintln!("Error: {}", msg);
                }
                return;
            }
            print_progress(event);
        }),
    );
    if let Err(e) = subscription {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // No per-run deadline; poll until the pipeline reaches a terminal state
    loop {
        match service.wait(&run_id, Duration::from_secs(3600)) {
            Some(status) if status.is_terminal() => break,
            Some(_) => continue,
            None => break,
        }
    }

    let record = match service.get_run(&run_id) {
        Some(record) => record,
        None => {
            eprintln!("Error: run disappeared from the registry");
            std::process::exit(1);
        }
    };
    let rec = record.lock().unwrap();

    match rec.status {
        RunStatus::Completed => {
            let result = match rec.result.as_ref() {
                Some(result) => result,
                None => {
                    eprintln!("Error: completed run has no result");
                    std::process::exit(1);
                }
            };

            if json_stream {
                let terminal = json!({
                    "t": "run-complete",
                    "runId": run_id,
                    "result": result,
                });
                if let Ok(line) = serde_json::to_string(&terminal) {
                    println!("{}", line);
                }
            } else if !quiet {
                print_results(result);
            }

            if let Some(path) = output {
                match serde_json::to_string_pretty(result) {
                    Ok(json_str) => {
                        if let Err(e) = std::fs::write(&path, json_str) {
                            eprintln!("Failed to write results: {}", e);
                            std::process::exit(1);
                        }
                        if !json_stream {
                            println!("\nResults written to: {}", path.display());
                        }
                    }
                    Err(e) => {
                        eprintln!("Failed to serialize results: {}", e);
                        std::process::exit(1);
                    }
                }
            }
        }
        _ => {
            let error = rec.error.as_deref().unwrap_or("Unknown error");
            eprintln!("Pipeline failed: {}", error);
            std::process::exit(1);
        }
    }
}

fn print_progress(event: &Event) {
    match event {
        Event::Activity { agent, msg, .. } => eprintln!("[{}] {}", agent, msg),
        Event::Start {
            agent,
            name: Some(name),
            ..
        } => eprintln!("[{}] researching {}", agent, name),
        Event::Done {
            agent,
            name: Some(name),
            ..
        } => eprintln!("[{}] finished {}", agent, name),
        Event::Log { agent, msg, .. } => eprintln!("[{}] {}", agent, msg),
        Event::Error { agent, msg, .. } => eprintln!("[{}] error: {}", agent, msg),
        _ => {}
    }
}

fn print_results(result: &schemas::result::RunResult) {
    println!("{}", result.report.summary);

    println!("\nFinalists:");
    for finalist in &result.selection.finalists {
        println!("  {} - {}", finalist.name, finalist.why);
        if let Some(combo) = &finalist.combo {
            println!("    combo: {} {} ({})", combo.first, combo.middle, combo.why);
        }
    }

    if !result.selection.near_misses.is_empty() {
        println!("\nNear misses:");
        for miss in &result.selection.near_misses {
            println!("  {} - {}", miss.name, miss.reason);
        }
    }
}
