//! `ragq`: ask the RAG service a question from the terminal.
//!
//! The answer streams to stdout; step progress, notices and logs go to stderr.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, bail};
use clap::{Args, Parser, Subcommand};
use ragstream_client::prelude::*;
use ragstream_client::{CredentialStore, EnvCredentialStore, SettingsFileStore, init_observability};
use tracing::debug;

#[derive(Parser)]
#[command(name = "ragq", version, about = "Stream answers from a RAG query service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Save the API key to the settings file.
    SetKey {
        key: String,
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// Ask a question and stream the answer.
    Ask(AskArgs),
}

#[derive(Args)]
struct AskArgs {
    question: String,
    /// Let the service search the web.
    #[arg(long)]
    web: bool,
    /// Force document retrieval regardless of routing.
    #[arg(long)]
    rag: bool,
    /// Ask the service to review its answer before finishing.
    #[arg(long)]
    reflect: bool,
    #[arg(long)]
    session_id: Option<String>,
    /// Overrides `RAG_API_BASE`.
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long)]
    max_retries: Option<u32>,
    /// First-byte timeout.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: Option<u64>,
    /// Print the model's reasoning to stderr as it streams.
    #[arg(long)]
    show_thought: bool,
}

fn default_settings_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ragstream")
        .join("settings.json")
}

/// `RAG_API_KEY` wins over the settings file.
struct KeyLookup {
    env: EnvCredentialStore,
    file: SettingsFileStore,
}

impl CredentialStore for KeyLookup {
    fn api_key(&self) -> Option<String> {
        self.env.api_key().or_else(|| self.file.api_key())
    }
}

struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, notice: Notice) {
        eprintln!("! {}", notice.text());
    }
}

/// Incremental terminal rendering of [`StreamSnapshot`]s.
struct ProgressView {
    show_thought: bool,
    statuses: [StepStatus; 4],
    retry_count: u32,
    printed_content: usize,
    printed_thought: usize,
}

impl ProgressView {
    fn new(show_thought: bool) -> Self {
        Self {
            show_thought,
            statuses: [StepStatus::Pending; 4],
            retry_count: 0,
            printed_content: 0,
            printed_thought: 0,
        }
    }

    fn render(&mut self, snapshot: &StreamSnapshot) {
        if snapshot.retry_count != self.retry_count {
            self.retry_count = snapshot.retry_count;
            if self.printed_content > 0 {
                println!();
            }
            self.printed_content = 0;
            self.printed_thought = 0;
        }

        for (seen, step) in self.statuses.iter_mut().zip(snapshot.steps.steps()) {
            if *seen == step.status {
                continue;
            }
            *seen = step.status;
            let state = match step.status {
                StepStatus::Pending => "pending",
                StepStatus::InProgress => "...",
                StepStatus::Completed => "done",
            };
            match &step.details {
                Some(details) => eprintln!("[{}] {state} ({details})", step.stage),
                None => eprintln!("[{}] {state}", step.stage),
            }
        }

        if self.show_thought
            && let Some(delta) = snapshot.current_thought.get(self.printed_thought..)
            && !delta.is_empty()
        {
            eprint!("{delta}");
            self.printed_thought = snapshot.current_thought.len();
        }

        if let Some(delta) = snapshot.current_content.get(self.printed_content..)
            && !delta.is_empty()
        {
            print!("{delta}");
            let _ = std::io::stdout().flush();
            self.printed_content = snapshot.current_content.len();
        }
    }
}

fn print_summary(message: &Message) {
    println!();
    if !message.sources.is_empty() {
        println!("\nSources:");
        for (i, source) in message.sources.iter().enumerate() {
            let label = source
                .url
                .as_deref()
                .or(source.document_id.as_deref())
                .unwrap_or("-");
            match source.similarity_score {
                Some(score) => println!("  {}. [{}] {label} ({score:.2})", i + 1, source.source_type),
                None => println!("  {}. [{}] {label}", i + 1, source.source_type),
            }
        }
    }
    if let Some(id) = &message.conversation_id {
        println!("\nconversation: {id}");
    }
    debug!(
        event = "cli.answer_rendered",
        message_id = %message.id,
        sources = message.sources.len() as u64
    );
}

async fn ask(args: AskArgs) -> anyhow::Result<()> {
    let mut config = ClientConfig::from_env();
    if let Some(base) = args.api_base {
        config = config.api_base(base);
    }
    if let Some(retries) = args.max_retries {
        config = config.max_retries(retries);
    }
    if let Some(secs) = args.timeout_secs {
        config = config.timeout(Duration::from_secs(secs));
    }
    let settings = args.settings.unwrap_or_else(default_settings_path);
    debug!(
        event = "cli.config_resolved",
        api_base = %config.api_base,
        timeout_ms = config.timeout.as_millis() as u64,
        max_retries = config.retry_policy.max_retries,
        settings = %settings.display()
    );

    let client = Arc::new(
        StreamingQueryClient::builder(config)
            .credentials(Arc::new(KeyLookup {
                env: EnvCredentialStore,
                file: SettingsFileStore::new(settings),
            }))
            .notifier(Arc::new(StderrNotifier))
            .build()
            .context("failed to build the query client")?,
    );

    let interrupt = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                client.cancel_stream();
            }
        })
    };

    let mut options = QueryOptions::default();
    if args.web {
        options = options.web_search(true);
    }
    if args.reflect {
        options = options.reflection(true);
    }
    if args.rag {
        options = options.force_rag(true);
    }
    if let Some(session_id) = args.session_id {
        options = options.session(session_id);
    }

    let mut view = ProgressView::new(args.show_thought);
    let mut updates = client.subscribe();
    let send = client.send_stream(&args.question, options);
    tokio::pin!(send);
    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            changed = updates.changed() => {
                if changed.is_ok() {
                    let snapshot = updates.borrow_and_update().clone();
                    view.render(&snapshot);
                }
            }
        }
    };
    interrupt.abort();
    view.render(&client.snapshot());

    match result? {
        QueryOutcome::Completed(message) => print_summary(&message),
        QueryOutcome::Cancelled => {
            println!();
            eprintln!("(cancelled)");
        }
    }
    Ok(())
}

fn set_key(key: &str, settings: Option<PathBuf>) -> anyhow::Result<()> {
    if key.trim().is_empty() {
        bail!("API key must not be empty");
    }
    let store = SettingsFileStore::new(settings.unwrap_or_else(default_settings_path));
    store.store_api_key(key)?;
    eprintln!("API key saved to {}", store.path().display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_observability();

    match Cli::parse().command {
        Command::SetKey { key, settings } => set_key(&key, settings),
        Command::Ask(args) => ask(args).await,
    }
}
