use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use nullvad_checker::{
    account::AccountSource,
    checker::{AccountChecker, RunEvent, RunHandle, RunSummary},
    config::FileConfig,
    logging,
    proxy::{ProxyParser, ProxyPolicy, ProxyType},
    tui::RunApp,
    validator::CommandValidator,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// A VPN account checker driving an external validator command
#[derive(Parser)]
#[command(name = "nullvad-checker")]
#[command(about = "A VPN account checker driving an external validator command")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log file path
    #[arg(long, global = true, default_value = logging::DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Disable the log file
    #[arg(long, global = true)]
    no_log_file: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check accounts and append valid ones to the output file
    Check {
        /// Input file with one account number per line
        input: Option<PathBuf>,
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output file for valid accounts
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// File for accounts refused for their device limit ("" disables it)
        #[arg(long)]
        max_devices_output: Option<PathBuf>,
        /// Save every outcome to this file when the run ends
        #[arg(long)]
        report: Option<PathBuf>,
        /// Proxy (host:port[:user:pass] or scheme://[user:pass@]host:port), repeatable
        #[arg(short, long = "proxy")]
        proxies: Vec<String>,
        /// File containing proxies, one per line
        #[arg(long)]
        proxy_file: Option<PathBuf>,
        /// Proxy type for entries without a scheme (http, https, socks4, socks5)
        #[arg(short = 't', long)]
        proxy_type: Option<String>,
        /// Proxy selection policy (none, one, rotate)
        #[arg(long)]
        policy: Option<String>,
        /// Delay between checks in seconds
        #[arg(short, long)]
        delay: Option<u64>,
        /// Timeout for a single check in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Checker program to run instead of the configured one
        #[arg(long)]
        program: Option<String>,
        /// Print outcomes line by line instead of starting the TUI
        #[arg(long)]
        plain: bool,
    },
    /// Load an account file and show what a run would check
    Accounts {
        /// Input file with one account number per line
        input: PathBuf,
    },
    /// Parse proxies from a file
    Proxies {
        /// Input file containing proxies
        input: PathBuf,
        /// Output file for normalized proxies
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Proxy type (http, https, socks4, socks5)
        #[arg(short = 't', long, default_value = "socks5")]
        proxy_type: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let console = !matches!(cli.command, Commands::Check { plain: false, .. });
    let log_file = (!cli.no_log_file).then_some(cli.log_file.as_path());
    let _guard = logging::init(log_file, console)?;

    match cli.command {
        Commands::Check {
            input,
            config,
            output,
            max_devices_output,
            report,
            proxies,
            proxy_file,
            proxy_type,
            policy,
            delay,
            timeout,
            program,
            plain,
        } => {
            let mut file = match &config {
                Some(path) => FileConfig::load(path)?,
                None => FileConfig::default(),
            };

            // Command line values win over the config file
            file.input = input.or(file.input);
            file.output = output.or(file.output);
            file.max_devices_output = max_devices_output.or(file.max_devices_output);
            file.report = report.or(file.report);
            file.proxies.extend(proxies);
            file.proxy_file = proxy_file.or(file.proxy_file);
            if let Some(t) = proxy_type {
                file.proxy_type = Some(t.parse::<ProxyType>()?);
            }
            if let Some(p) = policy {
                file.policy = Some(p.parse::<ProxyPolicy>()?);
            }
            file.delay_secs = delay.or(file.delay_secs);
            file.timeout_secs = timeout.or(file.timeout_secs);
            if let Some(program) = program {
                let mut command = file.command.take().unwrap_or_default();
                command.program = program;
                file.command = Some(command);
            }

            let config = file.into_run_config()?;
            let input = config
                .input
                .clone()
                .ok_or_else(|| anyhow!("no input file given on the command line or in the config"))?;
            let accounts = AccountSource::load(&input)?;

            let proxy_label = config.proxies.describe();
            let output_path = config.output.clone();
            info!(
                accounts = accounts.len(),
                input = %input.display(),
                output = %output_path.display(),
                proxy = %proxy_label,
                "starting check"
            );

            let validator = Arc::new(CommandValidator::new(config.command.clone()));
            let handle = AccountChecker::new(config, validator).start(accounts)?;

            let summary = if plain {
                run_plain(handle).await?
            } else {
                RunApp::new(handle, proxy_label).run().await?
            };

            print_summary(&summary, &output_path);
        }
        Commands::Accounts { input } => {
            let accounts = AccountSource::load(&input)?;
            println!("Loaded {} unique accounts from {:?}", accounts.len(), input);
            for account in &accounts {
                println!("{}", account);
            }
        }
        Commands::Proxies {
            input,
            output,
            proxy_type,
        } => {
            let ptype: ProxyType = proxy_type.parse()?;
            let proxies = ProxyParser::parse_file(&input, ptype)?;

            println!("Parsed {} proxies from {:?}", proxies.len(), input);

            if let Some(output_path) = output {
                ProxyParser::save_to_file(&proxies, &output_path, true)?;
                println!("Saved parsed proxies to {:?}", output_path);
            } else {
                for proxy in &proxies {
                    println!("{}", proxy.url());
                }
            }
        }
    }

    Ok(())
}

/// Console mode: one line per outcome, Ctrl-C cancels after the current check
async fn run_plain(handle: RunHandle) -> Result<RunSummary> {
    info!(run_id = %handle.run_id(), "checking in console mode");
    let (control, mut events, task) = handle.into_parts();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelling after the current check...");
                control.cancel();
            }
        }
    }

    Ok(task.await?)
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::Started { total, .. } => println!("Checking {} accounts", total),
        RunEvent::Outcome { outcome, tally } => println!(
            "[{}/{}] {} - {} - {}",
            tally.checked(),
            tally.total,
            outcome.account,
            outcome.status,
            outcome.detail
        ),
        RunEvent::Paused { tally } => println!("Paused at {}", tally),
        RunEvent::Resumed { tally } => println!("Resumed at {}", tally),
        RunEvent::Cancelled { tally } => println!("Cancelled: {}", tally),
        RunEvent::Completed { tally } => println!("Completed: {}", tally),
    }
}

fn print_summary(summary: &RunSummary, output: &std::path::Path) {
    println!(
        "\nRun {}: Valid: {} | Invalid: {} | Errors: {} ({} of {} checked)",
        summary.phase,
        summary.tally.valid,
        summary.tally.invalid,
        summary.tally.error,
        summary.tally.checked(),
        summary.tally.total
    );

    let valid: Vec<_> = summary.valid_accounts().collect();
    if !valid.is_empty() {
        println!("\nValid accounts (appended to {:?}):", output);
        for outcome in valid {
            println!("  {} ({})", outcome.account, outcome.detail);
        }
    }
    if summary.unwritten > 0 {
        eprintln!(
            "Warning: {} valid accounts could not be written to {:?}",
            summary.unwritten, output
        );
    }
}
