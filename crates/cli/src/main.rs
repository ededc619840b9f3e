//! Repo Rover CLI
//!
//! Find a research paper, connect it to its code, and ask questions about how
//! the paper is implemented.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rover_agents::{
    cache_dir_from_env, AgentError, InitOutcome, IndexedFiles, Orchestrator, SearchOutcome,
    SelectOutcome, Settings,
};
use rover_api::ApiState;
use rover_core::{ChatAnswer, Confidence, PaperOption, Session, SessionState};
use rover_store::PaperCache;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Repo Rover - chat with the code behind a research paper
#[derive(Parser)]
#[command(name = "rover")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Address to listen on (defaults to ROVER_BIND or 127.0.0.1:5000)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Ask one question about a paper's code
    Ask {
        /// ArXiv id, arXiv URL or title keywords
        paper: String,

        question: String,

        /// Candidate to use when the paper query is ambiguous
        #[arg(short, long)]
        pick: Option<usize>,
    },

    /// Interactive mode
    Interactive,

    /// Explain how a concept from the paper is implemented
    Explain {
        paper: String,

        concept: String,

        #[arg(short, long)]
        pick: Option<usize>,
    },

    /// Generate a minimal working example for a function or class
    Example {
        paper: String,

        /// Function or class name
        target: String,

        /// Write the example to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[arg(short, long)]
        pick: Option<usize>,
    },

    /// Inspect or clear the paper cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show cached papers and usage
    Stats,

    /// Remove one paper, or every paper when no id is given
    Clear {
        arxiv_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    // The cache is local state and works without API keys.
    if let Commands::Cache { action } = &cli.command {
        return cmd_cache(action).await;
    }

    let settings = Settings::from_env()
        .context("Repo Rover is not configured. Set the variables in .env or the environment")?;
    let settings = Arc::new(settings);
    info!("Using data directory {}", settings.data_dir.display());
    let orchestrator = Orchestrator::from_settings(settings.clone())
        .context("Failed to prepare the data directories")?;

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.bind.clone());
            let state = ApiState::new(Arc::new(orchestrator));
            rover_api::serve(state, &bind)
                .await
                .with_context(|| format!("Server on {} stopped", bind))?;
        }
        Commands::Ask {
            paper,
            question,
            pick,
        } => {
            let mut session = Session::new();
            open_paper(&orchestrator, &mut session, &paper, pick).await?;
            let answer = orchestrator
                .ask(&mut session, &question)
                .await
                .map_err(friendly)?;
            print_answer(&answer);
        }
        Commands::Interactive => {
            cmd_interactive(&orchestrator).await?;
        }
        Commands::Explain {
            paper,
            concept,
            pick,
        } => {
            let mut session = Session::new();
            open_paper(&orchestrator, &mut session, &paper, pick).await?;
            let explanation = orchestrator
                .explain(&mut session, &concept)
                .await
                .map_err(friendly)?;
            println!("{}\n", explanation.explanation);
            print_sources(&explanation.citations);
        }
        Commands::Example {
            paper,
            target,
            out,
            pick,
        } => {
            let mut session = Session::new();
            open_paper(&orchestrator, &mut session, &paper, pick).await?;
            let code = orchestrator
                .example(&mut session, &target)
                .await
                .map_err(friendly)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, format!("{}\n", code))
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("✓ Wrote example for {} to {}", target, path.display());
                }
                None => println!("{}", code),
            }
        }
        Commands::Cache { .. } => {
            // Handled before configuration is loaded.
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Show the user-facing message, keeping the detail as the cause.
fn friendly(err: AgentError) -> anyhow::Error {
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}

/// Resolve `query` to a ready paper, using `pick` when there are candidates.
async fn open_paper(
    orchestrator: &Orchestrator,
    session: &mut Session,
    query: &str,
    pick: Option<usize>,
) -> Result<()> {
    println!("Looking for \"{}\"...", query);
    let outcome = orchestrator
        .submit_query(session, query)
        .await
        .map_err(friendly)?;

    let init = match outcome {
        SearchOutcome::Ready(init) => init,
        SearchOutcome::NeedsSelection { options, message } => {
            print_options(&options);
            let Some(choice) = pick else {
                anyhow::bail!("{} Re-run with --pick N.", message);
            };
            match orchestrator
                .select(session, &choice.to_string())
                .await
                .map_err(friendly)?
            {
                SelectOutcome::Ready(init) => init,
                SelectOutcome::Dropped { message, .. } => anyhow::bail!(message),
            }
        }
    };

    print_ready(&init);
    Ok(())
}

async fn cmd_cache(action: &CacheCommand) -> Result<()> {
    let dir = cache_dir_from_env();
    let cache = PaperCache::open(&dir)
        .with_context(|| format!("Failed to open cache at {}", dir.display()))?;

    match action {
        CacheCommand::Stats => {
            let stats = cache.stats().await;
            println!("Paper cache ({}):", dir.display());
            println!("  • Papers: {}", stats.total_papers);
            println!("  • Size: {} bytes", stats.total_size_bytes);
            println!("  • Accesses: {}", stats.total_accesses);
            for paper in &stats.papers {
                let indexed = paper
                    .indexed_files
                    .map(|n| format!("{} files", n))
                    .unwrap_or_else(|| "not indexed".to_string());
                println!(
                    "  {} - {} ({}, {} accesses)",
                    paper.arxiv_id, paper.title, indexed, paper.access_count
                );
            }
        }
        CacheCommand::Clear { arxiv_id: Some(id) } => {
            if cache.delete(id).await? {
                println!("✓ Removed {} from the cache", id);
            } else {
                println!("{} is not cached, nothing to remove", id);
            }
        }
        CacheCommand::Clear { arxiv_id: None } => {
            let removed = cache.clear_all().await?;
            println!("✓ Cleared {} cached papers", removed);
        }
    }

    Ok(())
}

async fn cmd_interactive(orchestrator: &Orchestrator) -> Result<()> {
    let mut session = Session::new();

    println!("Repo Rover - Interactive Mode");
    println!("Commands: paper, select, ask, explain, example, suggest, status, reset, help, quit");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("rover> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }

        let line = line.trim();
        let (cmd, arg) = match line.split_once(' ') {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (line, ""),
        };

        match cmd {
            "" => continue,

            "paper" | "p" => {
                if arg.is_empty() {
                    println!("Usage: paper <arxiv id, url or title>");
                    continue;
                }
                search(orchestrator, &mut session, arg).await;
            }

            "select" | "s" => {
                if arg.is_empty() {
                    println!("Usage: select <number|cancel>");
                    continue;
                }
                choose(orchestrator, &mut session, arg).await;
            }

            "ask" | "a" => {
                if arg.is_empty() {
                    println!("Usage: ask <question>");
                    continue;
                }
                ask(orchestrator, &mut session, arg).await;
            }

            "explain" | "e" => {
                if arg.is_empty() {
                    println!("Usage: explain <concept>");
                    continue;
                }
                match orchestrator.explain(&mut session, arg).await {
                    Ok(explanation) => {
                        println!("{}\n", explanation.explanation);
                        print_sources(&explanation.citations);
                    }
                    Err(e) => print_error(&e),
                }
            }

            "example" | "x" => {
                if arg.is_empty() {
                    println!("Usage: example <function or class>");
                    continue;
                }
                match orchestrator.example(&mut session, arg).await {
                    Ok(code) => println!("{}", code),
                    Err(e) => print_error(&e),
                }
            }

            "suggest" => match orchestrator.suggest_questions(&session) {
                Ok(questions) if questions.is_empty() => println!("No suggestions yet."),
                Ok(questions) => {
                    for question in questions {
                        println!("• {}", question);
                    }
                }
                Err(e) => print_error(&e),
            },

            "status" => {
                let status = orchestrator.status(&session);
                println!("State: {}", status.state);
                if let Some(title) = &status.paper_title {
                    println!("Paper: {}", title);
                }
                if let Some(url) = &status.repo_url {
                    println!("Repository: {}", url);
                }
                println!("Questions asked: {}", status.questions_asked);
                if let Some(error) = &status.error {
                    println!("Error: {}", error);
                }
            }

            "reset" => {
                orchestrator.reset(&mut session);
                println!("✓ Session reset");
            }

            "help" | "h" | "?" => {
                println!("Commands:");
                println!("  paper <query>     - Find a paper by arXiv id, URL or title");
                println!("  select <n>        - Pick a search result (or 'cancel')");
                println!("  ask <question>    - Ask about the paper's code");
                println!("  explain <concept> - Explain how a concept is implemented");
                println!("  example <name>    - Generate a usage example");
                println!("  suggest           - Suggested questions");
                println!("  status            - Show session state");
                println!("  reset             - Start over");
                println!("  quit              - Exit");
                println!("Plain text asks a question once a paper is ready.");
            }

            "quit" | "q" | "exit" => break,

            _ => match session.state {
                SessionState::Ready => ask(orchestrator, &mut session, line).await,
                SessionState::AwaitingSelection => choose(orchestrator, &mut session, line).await,
                _ => search(orchestrator, &mut session, line).await,
            },
        }
    }

    println!("Goodbye!");
    Ok(())
}

async fn search(orchestrator: &Orchestrator, session: &mut Session, query: &str) {
    match orchestrator.submit_query(session, query).await {
        Ok(SearchOutcome::Ready(init)) => print_ready(&init),
        Ok(SearchOutcome::NeedsSelection { options, message }) => {
            print_options(&options);
            println!("{}", message);
        }
        Err(e) => print_error(&e),
    }
}

async fn choose(orchestrator: &Orchestrator, session: &mut Session, input: &str) {
    match orchestrator.select(session, input).await {
        Ok(SelectOutcome::Ready(init)) => print_ready(&init),
        Ok(SelectOutcome::Dropped { message, .. }) => println!("{}", message),
        Err(e) => print_error(&e),
    }
}

async fn ask(orchestrator: &Orchestrator, session: &mut Session, question: &str) {
    match orchestrator.ask(session, question).await {
        Ok(answer) => print_answer(&answer),
        Err(e) => print_error(&e),
    }
}

fn print_error(err: &AgentError) {
    debug!("{:?}", err);
    println!("Error: {}", err.user_message());
}

fn print_options(options: &[PaperOption]) {
    println!("Found {} papers:", options.len());
    for option in options {
        println!(
            "  {}. {} ({})",
            option.index, option.paper.title, option.paper.arxiv_id
        );
        let authors = option.paper.author_line();
        if !authors.is_empty() {
            println!("     {}", authors);
        }
    }
}

fn print_ready(init: &InitOutcome) {
    println!("✓ {}", init.paper.title);
    if let Some(url) = &init.repo_url {
        println!("  Repository: {}", url);
    }
    match init.indexed_files {
        IndexedFiles::Count(n) => println!("  Indexed {} files", n),
        IndexedFiles::Cached => println!("  Using the existing index"),
    }
    if !init.suggested_questions.is_empty() {
        println!("  Try asking:");
        for question in &init.suggested_questions {
            println!("    • {}", question);
        }
    }
    println!();
}

fn print_answer(answer: &ChatAnswer) {
    println!("{}\n", answer.answer);
    let confidence = match answer.confidence {
        Confidence::High => "high",
        Confidence::Medium => "medium",
        Confidence::Low => "low",
    };
    println!("Confidence: {} ({} sources)", confidence, answer.num_sources);
    print_sources(&answer.citations);
}

fn print_sources(citations: &[rover_core::Citation]) {
    if citations.is_empty() {
        return;
    }
    println!("Sources:");
    for citation in citations {
        println!("  • {} (score {:.2})", citation.file_path, citation.score);
    }
}
