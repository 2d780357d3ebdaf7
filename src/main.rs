use clap::{Parser, Subcommand};
use colored::Colorize;
use log::warn;
use std::path::PathBuf;

use flowcheck::parser::{self, Suite};
use flowcheck::runner::{self, CancelToken, ConsoleEventListener, EventEmitter};
use flowcheck::{report, utils};

#[derive(Parser)]
#[command(name = "flowcheck")]
#[command(version = "0.1.0")]
#[command(about = "Authenticated multi-profile API and UI consistency checks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a verification suite across its environment profiles
    Run {
        /// Path to the suite file
        suite: PathBuf,

        /// Only run these profile ids. Can be specified multiple times.
        #[arg(short, long)]
        profile: Vec<String>,

        /// Output directory for reports and artifacts
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Run profiles in parallel
        #[arg(long, default_value = "false")]
        parallel: bool,

        /// Run the browser headless (true/false)
        #[arg(long)]
        headless: Option<bool>,

        /// Default per-step timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Do not capture diagnostic snapshots on failure
        #[arg(long, default_value = "false")]
        no_snapshot: bool,

        /// Skip writing JSON, HTML and JUnit reports
        #[arg(long, default_value = "false")]
        no_report: bool,
    },

    /// Generate report from saved results
    Report {
        /// Path to results.json
        results: PathBuf,

        /// Output format (json, html, junit, text)
        #[arg(short, long, default_value = "html")]
        format: String,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show a suite's profiles and their expected UI states
    Profiles {
        /// Path to the suite file
        suite: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            suite,
            profile,
            output,
            parallel,
            headless,
            timeout,
            no_snapshot,
            no_report,
        } => {
            let parsed = parser::parse_suite_file(&suite)?;

            let mut config = utils::Config::from_env().merge_suite(&parsed.header);
            if parallel {
                config.parallel = true;
            }
            if let Some(h) = headless {
                config.headless = h;
            }
            if let Some(ms) = timeout {
                config.default_timeout_ms = ms;
            }
            if let Some(dir) = output {
                config.output_dir = dir;
            }
            config.snapshot_on_failure = !no_snapshot;

            println!(
                "{} Running suite: {}",
                "▶".green().bold(),
                suite.display()
            );
            println!("  Output: {}", config.output_dir.display().to_string().cyan());
            if config.parallel {
                println!("  Parallel: {}", "Enabled".yellow());
            }

            let cancel = CancelToken::new();
            let handler_token = cancel.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                eprintln!("\n{} Cancelling run...", "⏹".yellow());
                handler_token.cancel();
            }) {
                warn!("Could not install Ctrl-C handler: {}", e);
            }

            let (emitter, receiver) = EventEmitter::new();
            let listener = tokio::spawn(ConsoleEventListener::listen(receiver));

            let results = runner::run_suite(&parsed, &config, &profile, emitter, cancel).await?;
            let _ = listener.await;

            println!("\n{}", report::render(&results.summary));

            if !no_report {
                for path in report::write_outputs(&results, &config.output_dir)? {
                    println!("  {} {}", "📄".blue(), path.display());
                }
            }

            if !results.summary.passed {
                std::process::exit(1);
            }
        }

        Commands::Report {
            results,
            format,
            output,
        } => {
            println!(
                "{} Generating {} report from: {}",
                "📊".to_string().blue(),
                format.cyan(),
                results.display()
            );
            report::generate_report(&results, &format, output.as_deref())?;
        }

        Commands::Profiles { suite } => {
            let parsed = parser::parse_suite_file(&suite)?;
            print_profiles(&parsed);
        }
    }

    Ok(())
}

fn print_profiles(suite: &Suite) {
    println!("{} {}", "Suite:".bold(), suite.name);
    for profile in &suite.profiles {
        let mut traits = vec![format!(
            "{}x{}",
            profile.viewport.width, profile.viewport.height
        )];
        if profile.is_mobile {
            traits.push("mobile".to_string());
        }
        if profile.has_touch {
            traits.push("touch".to_string());
        }
        traits.extend(profile.capabilities.iter().cloned());
        println!("\n  {} [{}]", profile.id.cyan().bold(), traits.join(", "));

        match suite.ui.for_profile(&profile.id) {
            Some(expected) => {
                for (affordance, expectations) in expected {
                    let rendered: Vec<String> =
                        expectations.iter().map(|e| e.to_string()).collect();
                    println!("    {}: {}", affordance, rendered.join(", "));
                }
            }
            None => println!("    {}", "no expected UI state".dimmed()),
        }
    }
}
