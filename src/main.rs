use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use patchpilot::audit::AuditPipeline;
use patchpilot::config::Settings;
use patchpilot::git_ops::GitCli;
use patchpilot::github::{parse_github_url, GitHubClient, PullRequestHost};
use patchpilot::llm::OpenRouterClient;
use patchpilot::models::Audit;
use patchpilot::store::AuditStore;
use patchpilot::worker::{TimeLimits, Worker};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "patchpilot",
    about = "Audit a GitHub repository with an LLM and open a pull request with the fixes",
    version
)]
struct Cli {
    /// Config file (defaults to <config dir>/patchpilot/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue an audit for a GitHub repository
    Submit {
        url: String,
        #[arg(long, default_value = "main")]
        branch: String,
    },
    /// Run one pending audit in this process
    Run { audit_id: i64 },
    /// Process pending audits until interrupted
    Worker {
        /// Process at most one audit, then exit
        #[arg(long)]
        once: bool,
    },
    /// Show an audit's progress and log trail
    Status { audit_id: i64 },
    /// List the issues found by an audit
    Issues { audit_id: i64 },
    /// List recent audits
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Put an audit back in the queue (finished, or stuck after a killed worker)
    Requeue { audit_id: i64 },
    /// Delete an audit with its issues and logs
    Delete { audit_id: i64 },
    /// Aggregate counts across all audits
    Stats,
    /// Fork a repository into the token owner's account
    Fork { url: String },
    /// Print the effective settings
    Config {
        /// Write the effective settings to the config file (`--config` or the default)
        #[arg(long)]
        write: bool,
    },
}

/// Settings plus a notice to log once tracing is initialized
fn load_settings(path: Option<&Path>) -> Result<(Settings, Option<String>)> {
    match path {
        Some(path) => {
            let (mut settings, notice) = Settings::load_file(path);
            settings.apply_env(|key| std::env::var(key).ok())?;
            Ok((settings, notice))
        }
        None => Ok(Settings::load()?),
    }
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (settings, notice) = load_settings(cli.config.as_deref())?;
    init_tracing(&settings.log_level);
    if let Some(notice) = notice {
        tracing::warn!("{}", notice);
    }

    run_command(cli.command, &settings, cli.config.as_deref()).await
}

async fn run_command(
    command: Commands,
    settings: &Settings,
    config_path: Option<&Path>,
) -> Result<()> {
    let open_store = || AuditStore::open(&settings.database_path);

    match command {
        Commands::Submit { url, branch } => submit(&open_store()?, &url, &branch),
        Commands::Run { audit_id } => {
            run_worker(settings, &open_store()?, Some(audit_id), false).await
        }
        Commands::Worker { once } => run_worker(settings, &open_store()?, None, once).await,
        Commands::Status { audit_id } => status(&open_store()?, audit_id),
        Commands::Issues { audit_id } => issues(&open_store()?, audit_id),
        Commands::List { limit } => list(&open_store()?, limit),
        Commands::Requeue { audit_id } => {
            if open_store()?.requeue(audit_id)? {
                println!("Audit {} re-queued", audit_id);
                Ok(())
            } else {
                anyhow::bail!("Audit {} not found", audit_id)
            }
        }
        Commands::Delete { audit_id } => {
            if open_store()?.delete_audit(audit_id)? {
                println!("Audit {} deleted", audit_id);
                Ok(())
            } else {
                anyhow::bail!("Audit {} not found", audit_id)
            }
        }
        Commands::Stats => stats(&open_store()?),
        Commands::Fork { url } => fork(settings, &url).await,
        Commands::Config { write } => show_config(settings, write, config_path),
    }
}

fn submit(store: &AuditStore, url: &str, branch: &str) -> Result<()> {
    let (owner, name) = parse_github_url(url)
        .with_context(|| format!("Not a GitHub repository URL: {}", url))?;
    let canonical = format!("https://github.com/{}/{}", owner, name);
    let repository = store.get_or_create_repository(&owner, &name, &canonical, branch)?;
    let audit = store.create_audit(repository.id)?;
    println!("{}", audit.id);
    eprintln!(
        "Queued audit {} for {} ({})",
        audit.id,
        repository.full_name(),
        repository.branch
    );
    Ok(())
}

async fn run_worker(
    settings: &Settings,
    store: &AuditStore,
    audit_id: Option<i64>,
    once: bool,
) -> Result<()> {
    let vcs = GitCli::new(settings.github_token.clone());
    let ai = OpenRouterClient::from_settings(settings);
    if !ai.is_configured() {
        tracing::warn!("No OpenRouter API key configured; every file analysis will fail");
    }
    let host = GitHubClient::new(settings.github_token.clone())?;

    let pipeline = AuditPipeline::new(store, settings, &vcs, &ai, &host);
    let limits = TimeLimits {
        soft: settings.soft_time_limit(),
        hard: settings.time_limit(),
    };
    let worker = Worker::new(pipeline, store, limits, settings.poll_interval());

    match audit_id {
        Some(id) => match worker.run_audit(id).await? {
            Some(audit) => print_audit(store, &audit),
            None => anyhow::bail!("Audit {} not found", id),
        },
        None if once => {
            if !worker.run_once().await? {
                println!("No pending audits");
            }
            Ok(())
        }
        None => worker.run().await,
    }
}

fn print_audit(store: &AuditStore, audit: &Audit) -> Result<()> {
    let repo = store
        .get_repository(audit.repository_id)?
        .map(|r| format!("{} ({})", r.full_name(), r.branch))
        .unwrap_or_else(|| "<unknown repository>".to_string());

    println!("Audit {}: {}", audit.id, repo);
    println!("  Status:    {}", audit.status);
    println!("  Files:     {}/{}", audit.processed_files, audit.total_files);
    println!("  Issues:    {}", audit.issues_found);
    println!("  Fixes:     {}", audit.fixes_applied);
    if let (Some(url), Some(number)) = (&audit.pr_url, audit.pr_number) {
        println!("  PR:        #{} {}", number, url);
    }
    if let Some(error) = &audit.error_message {
        println!("  Error:     {}", error);
    }
    Ok(())
}

fn status(store: &AuditStore, audit_id: i64) -> Result<()> {
    let audit = store
        .get_audit(audit_id)?
        .with_context(|| format!("Audit {} not found", audit_id))?;
    print_audit(store, &audit)?;

    let logs = store.logs(audit_id)?;
    if !logs.is_empty() {
        println!();
        for entry in logs {
            println!(
                "{} [{}] {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.level.as_str(),
                entry.message
            );
        }
    }
    Ok(())
}

fn issues(store: &AuditStore, audit_id: i64) -> Result<()> {
    store
        .get_audit(audit_id)?
        .with_context(|| format!("Audit {} not found", audit_id))?;

    let issues = store.issues(audit_id)?;
    if issues.is_empty() {
        println!("No issues recorded");
        return Ok(());
    }
    for issue in issues {
        let location = match issue.line_number {
            Some(line) => format!("{}:{}", issue.file_path, line),
            None => issue.file_path.clone(),
        };
        let marker = if issue.has_applicable_fix() { "fix" } else { "   " };
        println!(
            "[{:<8}] {} {:<22} {} - {}",
            issue.severity.as_str().to_uppercase(),
            marker,
            issue.issue_type.as_str(),
            location,
            issue.description
        );
    }
    Ok(())
}

fn list(store: &AuditStore, limit: usize) -> Result<()> {
    for audit in store.list_audits(limit)? {
        let repo = store
            .get_repository(audit.repository_id)?
            .map(|r| r.full_name())
            .unwrap_or_default();
        println!(
            "{:>5}  {:<12} {:<30} issues={} fixes={}",
            audit.id,
            audit.status.as_str(),
            repo,
            audit.issues_found,
            audit.fixes_applied
        );
    }
    Ok(())
}

fn stats(store: &AuditStore) -> Result<()> {
    let stats = store.stats()?;
    println!("Audits:         {}", stats.total_audits);
    for (status, count) in &stats.by_status {
        println!("  {:<12}  {}", status, count);
    }
    println!("Issues found:   {}", stats.total_issues);
    println!("Fixes applied:  {}", stats.total_fixes_applied);
    println!("PRs opened:     {}", stats.pull_requests_opened);
    Ok(())
}

async fn fork(settings: &Settings, url: &str) -> Result<()> {
    let (owner, name) = parse_github_url(url)
        .with_context(|| format!("Not a GitHub repository URL: {}", url))?;
    let host = GitHubClient::new(settings.github_token.clone())?;
    let fork = host.fork_repository(&format!("{}/{}", owner, name)).await?;
    println!("{}", fork);
    Ok(())
}

fn show_config(settings: &Settings, write: bool, config_path: Option<&Path>) -> Result<()> {
    let mut shown = settings.clone();
    let mask = |secret: &mut Option<String>| {
        if secret.is_some() {
            *secret = Some("********".to_string());
        }
    };
    mask(&mut shown.openrouter_api_key);
    mask(&mut shown.github_token);
    println!("{}", serde_json::to_string_pretty(&shown)?);

    if write {
        let path = match config_path {
            Some(path) => {
                settings.save_to(path)?;
                path.to_path_buf()
            }
            None => settings.save()?,
        };
        eprintln!("Wrote {}", path.display());
    }
    Ok(())
}
