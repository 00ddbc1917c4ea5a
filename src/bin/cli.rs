//! Thin CLI harness exercising the core's public surface. Not a protocol
//! boundary — see `src/bin/server.rs` for the same scope note.

use clap::{Parser, Subcommand};
use engram::config::{Config, EmbeddingConfig};
use engram::queue::MessageQueue;
use engram::registry::ClientRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "engram-cli", about = "Inspect and exercise an Engram data directory")]
struct Cli {
    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<String>,

    #[arg(long, env = "CLIENT_ID")]
    client_id: String,

    #[arg(long, env = "USE_FALLBACK", default_value_t = true)]
    use_fallback: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a memory to a namespace.
    Add { namespace: String, content: String },
    /// Search a namespace.
    Search { namespace: String, query: String, #[arg(default_value_t = 10)] limit: usize },
    /// Add a structured memory with auto-assigned category.
    Remember { content: String },
    /// Print the markdown digest of structured memories.
    Digest {
        #[arg(long, default_value_t = 20)]
        max_memories: usize,
        #[arg(long, default_value_t = false)]
        include_private: bool,
    },
    /// List known namespaces.
    Namespaces,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let data_dir = match &cli.data_dir {
        Some(raw) => PathBuf::from(shellexpand::tilde(raw).into_owned()),
        None => engram::config::default_data_dir(),
    };

    let config = Config {
        data_dir,
        embedding: EmbeddingConfig {
            use_fallback: cli.use_fallback,
            ..EmbeddingConfig::default()
        },
        ..Config::default()
    };

    let queue = Arc::new(MessageQueue::open(&config.data_dir.join("messages")).await?);
    let registry = ClientRegistry::new(config, queue);
    let service = registry.get(&cli.client_id).await?;

    match cli.command {
        Command::Add { namespace, content } => {
            let id = service.add(&content, &namespace, None).await?;
            println!("added {id} to {namespace}");
        }
        Command::Search { namespace, query, limit } => {
            let results = service.search(&namespace, &query, limit).await?;
            for hit in results.results {
                println!("{:.3}\t{}\t{}", hit.relevance, hit.id, hit.content);
            }
        }
        Command::Remember { content } => {
            let id = service.add_auto_categorized(&content, Vec::new()).await?;
            println!("remembered as {id}");
        }
        Command::Digest { max_memories, include_private } => {
            let digest = service.get_memory_digest(max_memories, include_private).await?;
            print!("{}", digest.markdown);
        }
        Command::Namespaces => {
            for namespace in service.get_namespaces().await {
                println!("{namespace}");
            }
        }
    }

    Ok(())
}
