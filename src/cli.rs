use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::domain::Agent;
use crate::error::{PilotError, Result};
use crate::persistence::EngagementLedger;

#[derive(Parser)]
#[command(name = "threadpilot")]
#[command(version = "0.1.0")]
#[command(about = "Rate-aware discussion crawler and reply agent", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory holding default.toml
    #[arg(short, long, default_value = "config", env = "THREADPILOT_CONFIG_DIR")]
    pub config: String,

    /// Emit JSON formatted logs
    #[arg(long)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the crawl for every configured agent, one after another
    Run {
        /// Only run the named agent
        #[arg(short, long)]
        agent: Option<String>,
        /// Generate replies and log them without upvoting, posting, or recording
        #[arg(long)]
        dry_run: bool,
        /// Override crawl.post_cap
        #[arg(long)]
        post_cap: Option<usize>,
    },
    /// Verify that each agent's traffic leaves through its proxy
    CheckProxy {
        /// Only check the named agent
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// Summarize the engagement ledger
    Ledger,
}

/// Resolve the agents a command applies to
pub fn select_agents(config: &AppConfig, only: Option<&str>) -> Result<Vec<Agent>> {
    let roster = Agent::roster(&config.agents)?;
    match only {
        None => Ok(roster),
        Some(name) => {
            let selected: Vec<Agent> = roster.into_iter().filter(|a| a.name == name).collect();
            if selected.is_empty() {
                return Err(PilotError::Validation(format!("unknown agent '{}'", name)));
            }
            Ok(selected)
        }
    }
}

/// Print per-agent record counts for the ledger at `config.ledger.path`
pub fn show_ledger(config: &AppConfig) {
    let ledger = EngagementLedger::load(&config.ledger.path);

    println!("Ledger: {}", ledger.path().display());
    println!(
        "  {} items, {} records",
        ledger.item_count(),
        ledger.record_count()
    );
    for (agent, count) in ledger.counts_by_agent() {
        println!("  {:<16} {}", agent, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    fn config_with(names: &[&str]) -> AppConfig {
        AppConfig {
            agents: names
                .iter()
                .map(|name| AgentConfig {
                    name: name.to_string(),
                    client_id: "id".to_string(),
                    client_secret: "secret".to_string(),
                    username: format!("{}_user", name),
                    password: "pw".to_string(),
                    proxy: "http://10.0.0.1:8080".to_string(),
                })
                .collect(),
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::parse_from(["threadpilot", "run", "--dry-run", "--post-cap", "2"]);
        match cli.command {
            Commands::Run {
                agent,
                dry_run,
                post_cap,
            } => {
                assert!(agent.is_none());
                assert!(dry_run);
                assert_eq!(post_cap, Some(2));
            }
            _ => panic!("expected run"),
        }
        assert_eq!(cli.config, "config");
    }

    #[test]
    fn test_select_agents() {
        let config = config_with(&["agent0", "agent1"]);
        assert_eq!(select_agents(&config, None).unwrap().len(), 2);

        let only = select_agents(&config, Some("agent1")).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].name, "agent1");

        assert!(select_agents(&config, Some("agent9")).is_err());
    }
}
