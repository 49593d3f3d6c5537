//! agentdesk CLI
//!
//! A command-line interface for managing agents, uploading knowledge and
//! chatting against it.

use agentdesk_agents::{
    generate_system_prompt, Answer, DocumentStatus, IngestDocument, IngestReport,
    KnowledgeService, Settings, ToolRegistry,
};
use agentdesk_core::{validate_agent_id, AgentConfig, ChatRole};
use agentdesk_db::{init_memory, init_persistent, IndexStore, Repository};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// agentdesk - Per-agent knowledge bases with retrieval-augmented chat
#[derive(Parser)]
#[command(name = "agentdesk")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory (defaults to $AGENTDESK_DATA_DIR or ~/.agentdesk)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Use in-memory database (for testing)
    #[arg(long)]
    memory: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update an agent
    AddAgent {
        /// Agent ID
        id: String,

        /// Display name
        name: String,

        /// Short description
        #[arg(short = 'D', long, default_value = "")]
        description: String,

        /// System prompt (generated from the name, description and files if omitted)
        #[arg(short, long)]
        prompt: Option<String>,

        /// Tools (comma-separated)
        #[arg(short = 'T', long)]
        tools: Option<String>,

        /// PDF files to seed the knowledge base with
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,
    },

    /// List agents
    ListAgents,

    /// Upload documents into an agent's knowledge base
    Ingest {
        /// Agent ID
        agent: String,

        /// PDF files to index
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Uploading user
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// Ask an agent a single question
    Chat {
        /// Agent ID
        agent: String,

        /// Message
        message: String,

        /// User the conversation belongs to
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// Interactive chat with an agent
    Interactive {
        /// Agent ID
        agent: String,

        /// User the conversation belongs to
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// Show the agent's vector index
    IndexStats {
        /// Agent ID
        agent: String,
    },

    /// Show the stored conversation
    History {
        /// Agent ID
        agent: String,

        /// User the conversation belongs to
        #[arg(short, long, default_value = "cli")]
        user: String,

        /// Delete the conversation instead of printing it
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_writer(io::stderr);
    match EnvFilter::try_from_default_env() {
        Ok(filter) => {
            tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish())?
        }
        Err(_) => {
            tracing::subscriber::set_global_default(builder.with_max_level(log_level).finish())?
        }
    }

    let mut settings = Settings::from_env().context("Invalid configuration")?;
    if let Some(data_dir) = cli.data_dir {
        settings = settings.with_data_dir(data_dir);
    }

    let db = if cli.memory {
        info!("Using in-memory database");
        init_memory().await?
    } else {
        let db_path = settings.db_dir();
        std::fs::create_dir_all(&settings.data_dir).with_context(|| {
            format!("Failed to create data dir {}", settings.data_dir.display())
        })?;

        info!("Using database at: {}", db_path.display());
        init_persistent(&db_path).await?
    };

    let repo = Repository::new(db);

    // Check the model provider only when needed
    let needs_provider = match &cli.command {
        Commands::AddAgent { files, .. } => !files.is_empty(),
        Commands::Ingest { .. } | Commands::Chat { .. } | Commands::Interactive { .. } => true,
        _ => false,
    };
    if needs_provider {
        let client = settings.provider.client();
        let provider_ok = client.health().await.unwrap_or(false);
        if !provider_ok {
            eprintln!("Error: model provider is not reachable.");
            eprintln!("  {:?}: {}", client.provider(), client.base_url());
            eprintln!("Set MODEL_PROVIDER / MODEL_BASE_URL / OPENAI_API_KEY");
            anyhow::bail!("Model provider unavailable");
        }
    }

    // Execute command
    match cli.command {
        Commands::AddAgent {
            id,
            name,
            description,
            prompt,
            tools,
            files,
        } => {
            let new_agent = NewAgent {
                id,
                name,
                description,
                prompt,
                tools,
                files,
            };
            cmd_add_agent(repo, &settings, new_agent).await?;
        }
        Commands::ListAgents => {
            cmd_list_agents(repo).await?;
        }
        Commands::Ingest { agent, files, user } => {
            cmd_ingest(repo, &settings, agent, files, user).await?;
        }
        Commands::Chat {
            agent,
            message,
            user,
        } => {
            cmd_chat(repo, &settings, agent, message, user).await?;
        }
        Commands::Interactive { agent, user } => {
            cmd_interactive(repo, &settings, agent, user).await?;
        }
        Commands::IndexStats { agent } => {
            cmd_index_stats(&settings, agent)?;
        }
        Commands::History { agent, user, clear } => {
            cmd_history(repo, agent, user, clear).await?;
        }
    }

    Ok(())
}

fn service(repo: &Repository, settings: &Settings) -> Result<KnowledgeService> {
    Ok(KnowledgeService::from_settings(
        settings,
        Arc::new(repo.clone()),
    )?)
}

fn read_documents(files: &[PathBuf]) -> Result<Vec<IngestDocument>> {
    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        documents.push(IngestDocument::new(path.display().to_string(), bytes));
    }
    Ok(documents)
}

fn print_report(report: &IngestReport) {
    println!("✓ Ingest complete:");
    for document in &report.documents {
        match &document.status {
            DocumentStatus::Indexed { chunks } => {
                println!("  • {}: {} chunks", document.name, chunks)
            }
            DocumentStatus::Failed { error } => {
                println!("  • {}: failed ({})", document.name, error)
            }
        }
    }
    println!("  • Chunks added: {}", report.chunks_added);
    println!("  • Total chunks: {}", report.total_chunks);
    println!("  • Generation: {}", report.location.generation);
}

struct NewAgent {
    id: String,
    name: String,
    description: String,
    prompt: Option<String>,
    tools: Option<String>,
    files: Vec<PathBuf>,
}

async fn cmd_add_agent(repo: Repository, settings: &Settings, new: NewAgent) -> Result<()> {
    let NewAgent {
        id,
        name,
        description,
        prompt,
        tools,
        files,
    } = new;
    validate_agent_id(&id)?;
    let documents = read_documents(&files)?;

    let tools: Vec<String> = tools
        .map(|t| {
            t.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let registry = ToolRegistry::builtin();
    let known = registry.names();
    for tool in tools.iter().filter(|t| !known.contains(&t.as_str())) {
        eprintln!("Warning: unknown tool '{}' will be ignored", tool);
    }

    // Keep the index of an existing agent
    let existing = repo.get_agent(&id).await?;
    let mut agent = AgentConfig::new(id, name)
        .with_description(description)
        .with_tools(tools);
    agent.vector_index_path = existing.as_ref().and_then(|a| a.vector_index_path.clone());

    let service = if documents.is_empty() {
        None
    } else {
        Some(service(&repo, settings)?)
    };

    let unchanged = existing.as_ref().filter(|e| {
        e.name == agent.name && e.description == agent.description && e.tools == agent.tools
    });

    agent.system_prompt = match (prompt, unchanged) {
        (Some(prompt), _) => prompt,
        // An unchanged agent keeps the prompt it already has
        (None, Some(existing)) if documents.is_empty() => existing.system_prompt.clone(),
        (None, _) => {
            let summary = match &service {
                Some(service) => service.knowledge_summary(&documents).await,
                None => String::new(),
            };
            generate_system_prompt(&agent, &summary)
        }
    };

    let agent = repo.save_agent(agent).await?;
    println!("✓ Saved agent: {} ({})", agent.name, agent.id);

    if let Some(service) = service {
        let report = service.ingest(&agent.id, "cli", &documents).await?;
        print_report(&report);
    }

    Ok(())
}

async fn cmd_list_agents(repo: Repository) -> Result<()> {
    let agents = repo.list_agents().await?;

    if agents.is_empty() {
        println!("No agents yet. Add one with: agentdesk add-agent <id> <name>");
        return Ok(());
    }

    println!("Agents ({}):\n", agents.len());

    for agent in agents {
        println!("• {} [{}]", agent.name, agent.id);
        if !agent.description.is_empty() {
            println!("  {}", agent.description);
        }
        if !agent.tools.is_empty() {
            println!("  Tools: {}", agent.tools.join(", "));
        }
        if let Some(first_line) = agent.system_prompt.lines().next() {
            println!("  Prompt: {}", first_line);
        }
        match &agent.vector_index_path {
            Some(path) if agent.has_index() => println!("  Knowledge base: {}", path.display()),
            Some(path) => println!("  Knowledge base: {} (missing)", path.display()),
            None => println!("  Knowledge base: (none)"),
        }
        println!();
    }

    Ok(())
}

async fn cmd_ingest(
    repo: Repository,
    settings: &Settings,
    agent: String,
    files: Vec<PathBuf>,
    user: String,
) -> Result<()> {
    let documents = read_documents(&files)?;

    let service = service(&repo, settings)?;
    let report = service.ingest(&agent, &user, &documents).await?;
    print_report(&report);

    Ok(())
}

/// Shown under declined answers; the CLI itself has no live handoff
const HANDOFF_HINT: &str = "(No confident answer. Please take this question to a person.)";

fn handoff_hint(answer: &Answer) -> Option<&'static str> {
    answer.offers_handoff().then_some(HANDOFF_HINT)
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text());
    if let Some(hint) = handoff_hint(answer) {
        println!("{}", hint);
    }
}

async fn cmd_chat(
    repo: Repository,
    settings: &Settings,
    agent: String,
    message: String,
    user: String,
) -> Result<()> {
    let service = service(&repo, settings)?;
    let history = repo.load_history(&agent, &user).await?;

    let outcome = service.chat(&agent, &user, &message, history).await?;
    repo.save_history(&agent, &user, &outcome.history).await?;

    print_answer(&outcome.answer);
    Ok(())
}

async fn cmd_interactive(
    repo: Repository,
    settings: &Settings,
    agent: String,
    user: String,
) -> Result<()> {
    let service = service(&repo, settings)?;
    let reaper = service.pool().spawn_reaper(settings.reaper_interval);

    let config = repo
        .get_agent(&agent)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Agent not found: {}", agent))?;

    println!("agentdesk - chatting with {} as {}", config.name, user);
    println!("Commands: /reset, /history, /help, /quit");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{}> ", agent);
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let line = line.trim();

        match line {
            "" => continue,

            "/reset" => {
                service.invalidate(&agent, &user);
                match repo.save_history(&agent, &user, &[]).await {
                    Ok(()) => println!("✓ Conversation cleared"),
                    Err(e) => println!("Error: {}", e),
                }
            }

            "/history" => match repo.load_history(&agent, &user).await {
                Ok(turns) if turns.is_empty() => println!("No messages yet."),
                Ok(turns) => {
                    for turn in turns {
                        println!("{}: {}", turn.role, turn.content);
                    }
                }
                Err(e) => println!("Error: {}", e),
            },

            "/help" | "/?" => {
                println!("Commands:");
                println!("  <message>   - Ask the agent");
                println!("  /reset      - Forget the conversation and reload the agent");
                println!("  /history    - Show the conversation");
                println!("  /quit       - Exit");
            }

            "/quit" | "/q" | "/exit" => {
                println!("Goodbye!");
                break;
            }

            message => {
                let history = match repo.load_history(&agent, &user).await {
                    Ok(history) => history,
                    Err(e) => {
                        println!("Error: {}", e);
                        continue;
                    }
                };
                match service.chat(&agent, &user, message, history).await {
                    Ok(outcome) => {
                        if let Err(e) = repo.save_history(&agent, &user, &outcome.history).await {
                            println!("Error saving history: {}", e);
                        }
                        print_answer(&outcome.answer);
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
        }

        println!();
    }

    reaper.abort();
    Ok(())
}

fn cmd_index_stats(settings: &Settings, agent: String) -> Result<()> {
    let store = IndexStore::new(settings.index_dir());
    let path = store.location_for(&agent)?;

    let Some(index) = store.load(&agent)? else {
        println!("No knowledge base for {} (expected at {})", agent, path.display());
        return Ok(());
    };

    println!("Index for {}:", agent);
    println!("  • Path: {}", path.display());
    println!("  • Generation: {}", index.generation);
    println!("  • Chunks: {}", index.len());
    println!("  • Dimension: {}", index.dimension);
    println!("  • Updated: {}", index.updated_at.to_rfc3339());

    Ok(())
}

async fn cmd_history(repo: Repository, agent: String, user: String, clear: bool) -> Result<()> {
    if clear {
        repo.save_history(&agent, &user, &[]).await?;
        println!("✓ Cleared conversation for {}/{}", agent, user);
        return Ok(());
    }

    let turns = repo.load_history(&agent, &user).await?;
    if turns.is_empty() {
        println!("No conversation for {}/{}", agent, user);
        return Ok(());
    }

    for turn in turns {
        let speaker = match turn.role {
            ChatRole::User => user.as_str(),
            ChatRole::Assistant => agent.as_str(),
        };
        println!("{}: {}", speaker, turn.content);
    }

    Ok(())
}
