use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use treehole_agent::{Agent, AgentConfig, RuntimeSettings, TurnReply};
use treehole_memory::{CancellationToken, CycleOutcome, Skip, TriggerResult};

fn build_agent(runtime_settings: &RuntimeSettings) -> Result<Agent> {
    let config = AgentConfig::resolve(runtime_settings);
    tracing::debug!(
        model = %config.model,
        summary_model = %config.summary_model,
        window_turns = config.window_turns(),
        threshold = config.memory.threshold,
        state_path = ?config.memory.state_path,
        "agent config resolved"
    );
    Agent::from_config(config)
}

fn print_reply(reply: &TurnReply) {
    for line in reply.display_lines() {
        println!("{line}");
    }
}

pub(crate) async fn run_repl_mode(
    query: Option<String>,
    runtime_settings: &RuntimeSettings,
) -> Result<()> {
    let agent = build_agent(runtime_settings)?;
    if let Some(q) = query {
        let reply = agent.run_turn(q.trim()).await?;
        print_reply(&reply);
    } else {
        run_stdio(&agent).await?;
    }
    agent.flush().await
}

/// Read lines, run a turn for each, print the reply. Exits on EOF or Ctrl+C.
async fn run_stdio(agent: &Agent) -> Result<()> {
    let mut reader = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = reader.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match agent.run_turn(line).await {
            Ok(reply) => print_reply(&reply),
            Err(error) => eprintln!("error: {error:#}"),
        }
    }
    Ok(())
}

pub(crate) async fn run_consolidate_mode(runtime_settings: &RuntimeSettings) -> Result<()> {
    let agent = build_agent(runtime_settings)?;
    let cancel = CancellationToken::new();
    let ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });
    let result = agent.consolidate_now(&cancel).await;
    ctrl_c.abort();
    match result? {
        TriggerResult::Skipped(Skip::InFlight) => {
            println!("A consolidation is already running.");
        }
        TriggerResult::Skipped(_) => println!("Nothing to consolidate."),
        TriggerResult::Ran(report) => match report.outcome {
            CycleOutcome::Committed {
                snapshot_id,
                evicted,
            } => println!(
                "Consolidated {} turns into memory #{snapshot_id} (cursor {} -> {}, evicted {evicted}).",
                report.batch_len, report.cursor_before, report.cursor_after
            ),
            CycleOutcome::Cancelled => println!("Consolidation cancelled; nothing changed."),
            CycleOutcome::Failed { error } => println!("Consolidation failed: {error}"),
        },
    }
    agent.flush().await
}

pub(crate) fn run_memory_mode(runtime_settings: &RuntimeSettings) -> Result<()> {
    let agent = build_agent(runtime_settings)?;
    let status = agent.memory_status();
    println!(
        "turns={} cursor={} pending={} snapshots={} state={:?}",
        status.turns, status.cursor, status.pending, status.snapshots, status.state
    );
    let memory = agent.active_memory();
    if memory.is_empty() {
        println!("(no long-term memory yet)");
    } else {
        println!("{memory}");
    }
    Ok(())
}
