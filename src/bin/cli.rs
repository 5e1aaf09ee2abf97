//! Memoria admin CLI: chain validation/repair and store maintenance
//! operations, against the same SQLite database the service uses.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use memoria::chain::ChainValidator;
use memoria::error::Result;
use memoria::storage::{ChunkStore, MessageStore, SqliteChunkStore, SqliteMessageStore, Storage};

#[derive(Parser)]
#[command(name = "memoria-cli", about = "Memoria administrative CLI", version)]
struct Cli {
    /// SQLite database path
    #[arg(long, env = "MEMORIA_DB_PATH", default_value = ":memory:")]
    db_path: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a session's message chain
    ValidateChain {
        session_id: String,
    },
    /// Validate and repair a session's broken parent references
    RepairChain {
        session_id: String,
    },
    /// Delete all messages and chunks for one session
    ClearSession {
        session_id: String,
    },
    /// Delete all messages and chunks in the store
    ClearAll,
    /// Print store-wide statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    let storage = Arc::new(Storage::open(&cli.db_path)?);
    let message_store = SqliteMessageStore::new(storage.clone());
    let chunk_store = SqliteChunkStore::new(storage.clone());

    match cli.command {
        Command::ValidateChain { session_id } => {
            let validator = ChainValidator::new(&message_store);
            let validation = validator.validate(&session_id).await?;
            println!("{}", serde_json::to_string_pretty(&validation)?);
        }
        Command::RepairChain { session_id } => {
            let validator = ChainValidator::new(&message_store);
            let result = validator.repair(&session_id).await?;
            println!("repairs applied: {}", result.repairs.len());
            for repair in &result.repairs {
                println!(
                    "  {} : {:?} -> {:?}",
                    repair.message_id, repair.old_parent, repair.new_parent
                );
            }
            println!("before: {}", serde_json::to_string(&result.before)?);
            println!("after:  {}", serde_json::to_string(&result.after)?);
        }
        Command::ClearSession { session_id } => {
            message_store.delete_by_session_id(&session_id).await?;
            chunk_store.delete_by_session_id(&session_id).await?;
            println!("cleared session {session_id}");
        }
        Command::ClearAll => {
            message_store.delete_all().await?;
            let all = chunk_store.find_all().await?;
            for chunk in all {
                chunk_store.delete_by_message_id(&chunk.message_id).await?;
            }
            println!("cleared all messages and chunks");
        }
        Command::Stats => {
            let messages = message_store.find_all().await?;
            let total_chunks = chunk_store.count().await?;
            println!("messages: {}", messages.len());
            println!("chunks:   {total_chunks}");
        }
    }

    Ok(())
}
