use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use threadpilot::agent::ChatReplyGenerator;
use threadpilot::cli::{self, Cli, Commands};
use threadpilot::config::{AppConfig, LoggingConfig};
use threadpilot::coordination::{install_signal_handlers, StopSignal};
use threadpilot::error::Result;
use threadpilot::services::{self, SessionOptions};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;
    init_logging(&config.logging, cli.json_logs || config.logging.json);

    match &cli.command {
        Commands::Run {
            agent,
            dry_run,
            post_cap,
        } => {
            let options = SessionOptions {
                dry_run: *dry_run,
                post_cap: *post_cap,
            };
            let fatal = run_mode(&config, agent.as_deref(), &options)
                .await
                .context("crawl run could not start")?;
            if fatal > 0 {
                error!("{} agent(s) stopped on a fatal error", fatal);
                std::process::exit(1);
            }
        }
        Commands::CheckProxy { agent } => {
            let failed = check_proxy_mode(&config, agent.as_deref())
                .await
                .context("proxy check could not start")?;
            if failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::Ledger => cli::show_ledger(&config),
    }

    Ok(())
}

/// Run each selected agent in turn. Returns the number of agents that hit a
/// fatal error.
async fn run_mode(config: &AppConfig, only: Option<&str>, options: &SessionOptions) -> Result<usize> {
    config.validate()?;
    let agents = cli::select_agents(config, only)?;

    let generator = ChatReplyGenerator::new(config.generation.clone())?;
    if !generator.is_configured() {
        warn!("generation.api_key is empty; every reply will be skipped");
    }
    let generator = Arc::new(generator);

    let stop = StopSignal::new();
    install_signal_handlers(stop.clone());

    info!(
        "Starting crawl: {} agent(s), communities={:?}, terms={:?}{}",
        agents.len(),
        config.crawl.communities,
        config.crawl.terms,
        if options.dry_run { " [DRY RUN]" } else { "" }
    );

    let mut fatal = 0;
    for agent in &agents {
        if stop.is_stopped() {
            info!("Stop requested; skipping remaining agents");
            break;
        }
        match services::run_agent(agent, config, generator.clone(), stop.clone(), options).await {
            Ok(summary) => info!(
                "[{}] posted {} of {} (unrecorded: {})",
                summary.agent,
                summary.posted,
                options.post_cap.unwrap_or(config.crawl.post_cap),
                summary.unrecorded
            ),
            Err(e) => {
                fatal += 1;
                error!("[{}] Agent halted: {}", agent.name, e);
            }
        }
    }

    Ok(fatal)
}

async fn check_proxy_mode(config: &AppConfig, only: Option<&str>) -> Result<usize> {
    let agents = cli::select_agents(config, only)?;

    let mut failed = 0;
    for agent in &agents {
        match services::check_proxy(agent, config).await {
            Ok(ip) => println!("{:<16} OK    egress {} via {}", agent.name, ip, agent.proxy),
            Err(e) => {
                failed += 1;
                println!("{:<16} FAIL  {}", agent.name, e);
            }
        }
    }

    Ok(failed)
}

fn init_logging(logging: &LoggingConfig, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},threadpilot={}", logging.level, logging.level))
    });

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}
