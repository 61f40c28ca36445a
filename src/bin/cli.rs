//! agent-loop - role agents running plan/execute/verify loops
//!
//! This is the CLI entry point for the agent-loop tool.
//! Run with: cargo run --bin agent-loop -- <command>

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use agent_loop::orchestrator::DailyAgenda;
use agent_loop::roles::RoleAgent;
use agent_loop::{
    AgentRegistry, AppSettings, GitCommandRunner, LoopEvent, ModelClient, Orchestrator,
    ProgressStore, RunOutcome, Schedule, SharedServices, TaskReport, WorkspaceManager,
};
use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage:
  agent-loop run [--workspace] <role> <objective...>
  agent-loop agenda
  agent-loop daily
  agent-loop worktree list
  agent-loop worktree create <task-id> [base]
  agent-loop worktree remove <task-id>
  agent-loop progress <task-id>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let settings = AppSettings::load().with_env_overrides();

    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    match command.as_str() {
        "run" => run_command(&settings, &args[1..]).await,
        "agenda" => {
            let orchestrator = build_orchestrator(&settings)?;
            print_agenda(&orchestrator.daily_agenda(today()));
            Ok(())
        }
        "daily" => run_daily(&settings).await,
        "worktree" => worktree_command(&settings, &args[1..]).await,
        "progress" => {
            let task_id = args.get(1).context("progress needs a task id")?;
            let digest = progress_store(&settings).memory_digest(task_id)?;
            println!("{}", digest);
            Ok(())
        }
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("unknown command `{}`\n\n{}", other, USAGE),
    }
}

fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

fn progress_store(settings: &AppSettings) -> ProgressStore {
    match settings.progress_path() {
        Some(dir) => ProgressStore::in_dir(dir),
        None => {
            tracing::warn!("no data directory; progress is kept in memory");
            ProgressStore::in_memory()
        }
    }
}

fn workspace_manager(settings: &AppSettings) -> WorkspaceManager {
    let repo_root = PathBuf::from(&settings.repo_root);
    let runner = Arc::new(GitCommandRunner::new(repo_root.clone()));
    WorkspaceManager::new(runner, repo_root).with_dir_name(&settings.worktree_dir)
}

fn build_registry(settings: &AppSettings) -> Arc<AgentRegistry> {
    let services = SharedServices::new(
        Arc::new(ModelClient::new(settings.model_config())),
        progress_store(settings),
        workspace_manager(settings),
    )
    .with_loop_config(settings.loop_config());
    Arc::new(AgentRegistry::new(&services))
}

fn build_orchestrator(settings: &AppSettings) -> anyhow::Result<Orchestrator> {
    let schedule = match settings.schedule_file() {
        Some(path) => Schedule::load(&path)?,
        None => Schedule::default(),
    };
    Ok(Orchestrator::new(build_registry(settings), schedule))
}

/// Print loop events until the sender goes away.
fn stream_events(agent: &RoleAgent) -> tokio::task::JoinHandle<()> {
    let mut events = agent.controller().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LoopEvent::Log(entry)) => println!("{}", entry.format_line()),
                Ok(LoopEvent::PlanReady { steps, .. }) => {
                    println!("📋 Plan ({} steps)", steps.len());
                    for step in steps {
                        println!("   {} - {}", step.id, step.description);
                    }
                }
                Ok(LoopEvent::RunTerminal { status, .. }) => {
                    println!("🏁 {}", status.as_str());
                    break;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn run_command(settings: &AppSettings, args: &[String]) -> anyhow::Result<()> {
    let (in_workspace, args) = match args.first().map(String::as_str) {
        Some("--workspace") => (true, &args[1..]),
        _ => (false, args),
    };
    if args.len() < 2 {
        bail!("run needs a role and an objective\n\n{}", USAGE);
    }
    let role = &args[0];
    let objective = args[1..].join(" ");

    let registry = build_registry(settings);
    let agent = registry.get_or_default(role);
    println!("🤖 {} ({})", agent.profile().name, agent.id());
    println!("📝 Task: {}\n", objective);

    let printer = stream_events(&agent);
    let task_type = agent.profile().task_type;
    let outcome = if in_workspace {
        let (workspace, outcome) = agent.run_in_workspace(&objective, task_type).await?;
        println!("📁 Workspace: {} ({})", workspace.path.display(), workspace.branch);
        outcome
    } else {
        agent.run_task(&objective, task_type).await?
    };
    let _ = printer.await;

    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    if outcome.success {
        println!(
            "\n✅ {} completed in {} iterations",
            outcome.task_id, outcome.iterations
        );
        for (step_id, result) in &outcome.results {
            println!("\n--- {} ---\n{}", step_id, result.output);
        }
    } else {
        let reason = outcome
            .reason
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| outcome.status.as_str().to_string());
        eprintln!(
            "\n❌ {} {} after {} iterations: {}",
            outcome.task_id,
            outcome.status.as_str(),
            outcome.iterations,
            reason
        );
    }
}

fn print_agenda(agenda: &DailyAgenda) {
    println!("📅 {} ({}, {})", agenda.date, agenda.day, agenda.quarter);
    println!("Focus: {}", agenda.focus);
    println!("{}", agenda.description);
    if let Some(milestone) = &agenda.milestone {
        println!("Milestone: {}", milestone);
    }
    if agenda.tasks.is_empty() {
        println!("\nNo scheduled tasks.");
        return;
    }
    println!();
    for task in &agenda.tasks {
        println!("  [{}] {}: {}", task.agent_id, task.name, task.task_prompt);
    }
}

fn print_reports(reports: &[TaskReport]) {
    println!("\n================================================");
    for report in reports {
        let mark = if report.success { "✅" } else { "❌" };
        match &report.error {
            Some(error) if !report.success => {
                println!("{} [{}] {}: {}", mark, report.agent_id, report.task, error)
            }
            _ => println!("{} [{}] {}", mark, report.agent_id, report.task),
        }
    }
}

async fn run_daily(settings: &AppSettings) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(settings)?;
    let date = today();
    print_agenda(&orchestrator.daily_agenda(date));

    let queued = orchestrator.queue_daily_tasks(date);
    if queued.is_empty() {
        return Ok(());
    }
    let reports = orchestrator.run_queue().await?;
    print_reports(&reports);
    Ok(())
}

async fn worktree_command(settings: &AppSettings, args: &[String]) -> anyhow::Result<()> {
    let manager = workspace_manager(settings);
    match args.first().map(String::as_str) {
        Some("list") => {
            for entry in manager.list_managed().await? {
                println!(
                    "{}\t{}\t{}",
                    entry.path.display(),
                    entry.branch.as_deref().unwrap_or("(detached)"),
                    entry.head.as_deref().unwrap_or("-")
                );
            }
        }
        Some("create") => {
            let task_id = args.get(1).context("worktree create needs a task id")?;
            let base = args.get(2).map(String::as_str).unwrap_or("HEAD");
            let workspace = manager.create(task_id, base).await?;
            println!(
                "{}\t{}\t{}",
                workspace.path.display(),
                workspace.branch,
                workspace.head
            );
        }
        Some("remove") => {
            let task_id = args.get(1).context("worktree remove needs a task id")?;
            manager.remove(task_id).await?;
            println!("Removed workspace for {}", task_id);
        }
        _ => bail!("worktree needs list, create or remove\n\n{}", USAGE),
    }
    Ok(())
}
