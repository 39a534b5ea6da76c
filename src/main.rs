//! # Docent CLI (`docent`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docent init` | Create the SQLite database and run schema migrations |
//! | `docent ingest` | Ingest a file or inline text for a user |
//! | `docent documents list\|delete\|purge` | Manage a user's documents |
//! | `docent query "<question>"` | Answer a question over a user's documents |
//! | `docent answer "<question>"` | Answer from passages given on the command line |
//! | `docent feedback <query-id>` | Rate a recorded answer |
//! | `docent status` | Document and embedding counts |
//! | `docent health` | Component health report |
//! | `docent serve` | Start the HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docent::{config, documents, ingest, logging, migrate, query, server, status};
use docent_core::pipeline::QueryRequest;

/// Docent: question answering over your own documents.
#[derive(Parser)]
#[command(
    name = "docent",
    about = "Docent: retrieval-augmented question answering over user documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest a document for a user.
    ///
    /// Pass a file path (pdf, docx, txt, md; at most 10 MiB), or `--text`
    /// together with `--title`.
    Ingest {
        /// Owner of the document.
        #[arg(long)]
        user: String,

        /// File to ingest.
        path: Option<PathBuf>,

        /// Document title. Defaults to the file name without extension.
        #[arg(long)]
        title: Option<String>,

        /// Inline document text instead of a file.
        #[arg(long, conflicts_with = "path")]
        text: Option<String>,
    },

    /// List, delete, or purge a user's documents.
    Documents {
        #[command(subcommand)]
        action: DocumentsAction,
    },

    /// Answer a question over a user's documents.
    Query {
        question: String,

        #[arg(long)]
        user: String,

        /// Number of passages to retrieve (1-20).
        #[arg(long)]
        max_documents: Option<usize>,

        /// Minimum cosine similarity for a passage to count (0-1).
        #[arg(long)]
        threshold: Option<f64>,

        /// Sampling temperature (0-1).
        #[arg(long)]
        temperature: Option<f64>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer a question from the given passages, without retrieval.
    Answer {
        question: String,

        /// A reference passage. Repeat for several.
        #[arg(long = "context", required = true)]
        context: Vec<String>,

        #[arg(long)]
        temperature: Option<f64>,
    },

    /// Attach a rating and/or comment to a recorded query.
    Feedback {
        query_id: String,

        #[arg(long)]
        user: String,

        /// Rating from 1 to 10.
        #[arg(long)]
        score: Option<u8>,

        /// Free-text comment (at most 500 characters).
        #[arg(long)]
        comment: Option<String>,
    },

    /// Show document and embedding counts.
    Status {
        /// Restrict counts to one user.
        #[arg(long)]
        user: Option<String>,
    },

    /// Check the generator, the store, and the embedder.
    Health,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum DocumentsAction {
    /// List a user's documents, newest first.
    List {
        #[arg(long)]
        user: String,
    },
    /// Delete one document and its chunks and embeddings.
    Delete {
        id: String,
        #[arg(long)]
        user: String,
    },
    /// Delete every document a user owns.
    Purge {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            user,
            path,
            title,
            text,
        } => {
            ingest::run_ingest(
                &cfg,
                &user,
                path.as_deref(),
                title.as_deref(),
                text.as_deref(),
            )
            .await?;
        }
        Commands::Documents { action } => match action {
            DocumentsAction::List { user } => documents::run_list(&cfg, &user).await?,
            DocumentsAction::Delete { id, user } => {
                documents::run_delete(&cfg, &user, &id).await?
            }
            DocumentsAction::Purge { user } => documents::run_purge(&cfg, &user).await?,
        },
        Commands::Query {
            question,
            user,
            max_documents,
            threshold,
            temperature,
            json,
        } => {
            let request = QueryRequest {
                max_documents,
                similarity_threshold: threshold,
                temperature,
                ..QueryRequest::new(question, user)
            };
            query::run_query(&cfg, request, json).await?;
        }
        Commands::Answer {
            question,
            context,
            temperature,
        } => {
            query::run_answer(&cfg, &question, &context, temperature).await?;
        }
        Commands::Feedback {
            query_id,
            user,
            score,
            comment,
        } => {
            query::run_feedback(&cfg, &user, &query_id, score, comment).await?;
        }
        Commands::Status { user } => {
            status::run_status(&cfg, user.as_deref()).await?;
        }
        Commands::Health => {
            status::run_health(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
