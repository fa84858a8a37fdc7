//! Board of One — local driver.
//!
//! Runs a deliberation session end-to-end against an in-process broker and
//! prints the event stream as it unfolds. This is the graph's "does it
//! actually converge" smoke test, not the HTTP API — that lives in a
//! collaborator crate.

use anyhow::Result;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use board_of_one::broker::{LLMBroker, MockBroker};
use board_of_one::embedding::BrokerEmbeddingService;
use board_of_one::events::EventPublisher;
use board_of_one::personas::PersonaLibrary;
use board_of_one::store::{Checkpointer, SqliteKeyValueStore};
use board_of_one::{CoordinatorDeps, SessionCoordinator, StartOptions};

const CHECKPOINT_DB: &str = "board_of_one_checkpoints.sqlite3";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    println!("\n{}", "═".repeat(60));
    println!("⚖️  Board of One — deliberation engine");
    println!("{}", "═".repeat(60));
    println!("Decompose | Panel | Discuss | Converge | Synthesize");
    println!("{}\n", "═".repeat(60));

    let broker: Arc<dyn LLMBroker> = Arc::new(demo_broker().await);
    let kv = Arc::new(SqliteKeyValueStore::new(CHECKPOINT_DB).await?);
    let deps = Arc::new(CoordinatorDeps {
        broker: broker.clone(),
        personas: Arc::new(PersonaLibrary::new()),
        embeddings: Arc::new(BrokerEmbeddingService::new(broker)),
        checkpointer: Arc::new(Checkpointer::new(kv)),
        events: Arc::new(EventPublisher::new()),
    });
    let coordinator = Arc::new(SessionCoordinator::new(deps.clone()));

    println!("💡 Enter a problem statement ('quit' to exit).\n");

    loop {
        print!("🧑 Problem: ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let problem = input.trim();

        if problem.is_empty() {
            continue;
        }
        if matches!(problem.to_lowercase().as_str(), "quit" | "exit" | "q") {
            println!("\n👋 Goodbye!\n");
            break;
        }

        let mut events = deps.events.subscribe();
        let session_id = match coordinator.start_session(problem.to_string(), None, StartOptions::default()).await {
            Ok(id) => id,
            Err(e) => {
                eprintln!("failed to start session: {e}");
                continue;
            }
        };
        info!(session_id = %session_id, "session started");

        let watcher = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                print_event(&event);
                if event.event_type == "complete" || event.event_type == "error" {
                    break;
                }
            }
        });

        if let Err(e) = coordinator.join(&session_id).await {
            println!("❌ Session error: {e}");
        }
        let _ = watcher.await;

        match coordinator.get_session(&session_id).await {
            Ok(state) => {
                println!("\n📋 Final synthesis:");
                println!("{}\n", state.synthesis.unwrap_or_else(|| "(no synthesis produced)".to_string()));
            }
            Err(_) => println!("(session state no longer available)"),
        }
    }

    Ok(())
}

fn print_event(event: &board_of_one::domain::Event) {
    use board_of_one::domain::EventData::*;
    match &event.data {
        SessionStarted { problem_description } => println!("🟢 session started: {problem_description}"),
        DecompositionStarted => println!("🧩 decomposing problem..."),
        DecompositionComplete { sub_problem_count } => println!("🧩 decomposed into {sub_problem_count} sub-problem(s)"),
        SubproblemStarted { sub_problem_id, goal } => println!("\n— sub-problem {sub_problem_id}: {goal}"),
        PersonaSelectionComplete { personas } => println!("👥 panel: {}", personas.join(", ")),
        ContributionStarted { persona_code, round_number } => println!("   [{round_number}] {persona_code} is thinking..."),
        Contribution { persona_code, round_number, content } => println!("   [{round_number}] {persona_code}: {content}"),
        ModeratorIntervention { moderator_type, content } => println!("   [moderator:{moderator_type:?}] {content}"),
        Convergence { round, semantic_score, should_stop, .. } => {
            println!("   (round {round} semantic_score={semantic_score:.2} stop={should_stop})")
        }
        ClarificationRequested { question, .. } => println!("❓ clarification needed: {question}"),
        VotingComplete { consensus_level } => println!("🗳️  consensus: {consensus_level:?}"),
        SynthesisComplete { synthesis } => println!("✅ sub-problem synthesis: {synthesis}"),
        SubproblemFailed { sub_problem_id, error } => println!("⚠️  sub-problem {sub_problem_id} failed: {error}"),
        MetaSynthesisComplete { synthesis } => println!("\n🏁 meta-synthesis: {synthesis}"),
        Complete { total_cost_usd, duration_seconds } => {
            println!("\n{}", "─".repeat(60));
            println!("Done in {duration_seconds:.1}s, cost ${total_cost_usd:.4}");
        }
        Error { message, .. } => println!("❌ error: {message}"),
        _ => {}
    }
}

/// Unscripted, so every agent falls back to its safe default on each call
/// (single atomic sub-problem, top-expertise persona picks, rotation-only
/// facilitation). Enough to drive the graph end to end without a live
/// model. Real deployments swap this for `OllamaBroker` or another
/// `LLMBroker` implementation.
async fn demo_broker() -> MockBroker {
    MockBroker::new()
}
