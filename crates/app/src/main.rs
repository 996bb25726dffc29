use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use kb_vector_core::{
    BackendKind, BackendSelector, CancellationToken, CharacterNgramEmbedder, ClearCommand,
    EmbeddingProvider, OpenAiEmbeddings, PineconeSettings, QdrantSettings, RetryPolicy,
    StoreConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "kb-vector", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    embedding: EmbeddingArgs,
}

#[derive(Args)]
struct StoreArgs {
    /// Vector backend: qdrant or pinecone
    #[arg(long, env = "VECTOR_DB", default_value = "qdrant")]
    vector_db: String,

    /// Collection (Qdrant) or index (Pinecone) name
    #[arg(long, env = "COLLECTION_NAME", default_value = "knowledge-base")]
    collection: String,

    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    qdrant_api_key: Option<String>,

    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pinecone_api_key: Option<String>,

    #[arg(long, env = "PINECONE_CONTROLLER_URL", default_value = "https://api.pinecone.io")]
    pinecone_controller_url: String,

    #[arg(long, env = "PINECONE_CLOUD", default_value = "aws")]
    pinecone_cloud: String,

    #[arg(long, env = "PINECONE_REGION", default_value = "us-east-1")]
    pinecone_region: String,

    #[arg(long, env = "PINECONE_NAMESPACE", default_value = "")]
    pinecone_namespace: String,

    /// Minimum similarity for a match to be returned
    #[arg(long, env = "SCORE_THRESHOLD", default_value_t = 0.7)]
    score_threshold: f64,

    #[arg(long, env = "TOP_K", default_value_t = 3)]
    top_k: usize,

    #[arg(long, env = "MAX_TOKENS_PER_ITEM", default_value_t = 8191)]
    max_tokens_per_item: usize,

    #[arg(long, env = "BATCH_SIZE", default_value_t = 50)]
    batch_size: usize,

    /// Pause between upload batches
    #[arg(long, env = "BATCH_DELAY_MS", default_value_t = 1000)]
    batch_delay_ms: u64,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value_t = 3)]
    retry_max_attempts: u32,

    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value_t = 1000)]
    retry_base_delay_ms: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKind {
    Openai,
    /// Character n-gram hashing, no network access
    Local,
}

#[derive(Args)]
struct EmbeddingArgs {
    #[arg(long, env = "EMBEDDING_PROVIDER", value_enum, default_value = "openai")]
    embedding_provider: ProviderKind,

    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = 1536)]
    embedding_dimensions: usize,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    openai_base_url: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a knowledge file and upload it in batches.
    Upload {
        /// JSON array of knowledge items.
        #[arg(long, default_value = kb_vector_core::DEFAULT_KNOWLEDGE_FILE)]
        file: PathBuf,
    },
    /// Remove or inspect stored vectors: clear-all, preview or duplicates.
    Clear {
        command: ClearCommand,
    },
    /// Print the stored texts that best match a question.
    Query {
        text: String,
        /// Show ids, scores and topics alongside each match.
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },
    /// Check that the configured backend is reachable.
    Health {
        #[arg(long, default_value_t = false)]
        detailed: bool,
    },
}

impl StoreArgs {
    fn to_config(&self, dimensions: usize) -> StoreConfig {
        StoreConfig {
            backend: BackendKind::from_selector(&self.vector_db),
            qdrant: QdrantSettings {
                url: self.qdrant_url.clone(),
                api_key: self.qdrant_api_key.clone(),
            },
            pinecone: PineconeSettings {
                api_key: self.pinecone_api_key.clone(),
                controller_url: self.pinecone_controller_url.clone(),
                cloud: self.pinecone_cloud.clone(),
                region: self.pinecone_region.clone(),
                namespace: self.pinecone_namespace.clone(),
            },
            collection: self.collection.clone(),
            dimensions,
            score_threshold: self.score_threshold,
            top_k: self.top_k,
            max_tokens_per_item: self.max_tokens_per_item,
            batch_size: self.batch_size,
            batch_delay: Duration::from_millis(self.batch_delay_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.retry_max_attempts,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                ..RetryPolicy::default()
            },
        }
    }
}

impl EmbeddingArgs {
    fn build(&self, timeout: Duration) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
        let provider: Arc<dyn EmbeddingProvider> = match self.embedding_provider {
            ProviderKind::Openai => Arc::new(OpenAiEmbeddings::new(
                self.openai_api_key.as_deref().unwrap_or_default(),
                &self.openai_base_url,
                self.embedding_model.clone(),
                self.embedding_dimensions,
                timeout,
            )?),
            ProviderKind::Local => Arc::new(CharacterNgramEmbedder::new(self.embedding_dimensions)),
        };
        Ok(provider)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = cli.store.to_config(cli.embedding.embedding_dimensions);
    config.validate().context("invalid vector store configuration")?;
    let embedder = cli
        .embedding
        .build(config.request_timeout)
        .context("embedding provider setup failed")?;

    info!(
        version = app_version,
        backend = %config.backend,
        collection = %config.collection,
        embedder = embedder.name(),
        started_at = %Utc::now().to_rfc3339(),
        "kb-vector boot"
    );
    let selector = BackendSelector::new(config, embedder);

    match cli.command {
        Command::Upload { file } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, stopping after the current batch");
                    on_signal.cancel();
                }
            });

            let stats = selector
                .upload_data(Some(&file), Some(cancel))
                .await
                .with_context(|| format!("upload of {} failed", file.display()))?;
            println!("{stats}");
            if !stats.is_complete_success() {
                anyhow::bail!(
                    "{} of {} item(s) were not uploaded",
                    stats.total_items - stats.successful_items,
                    stats.total_items
                );
            }
        }
        Command::Clear { command } => {
            let report = selector
                .clear_data(command)
                .await
                .with_context(|| format!("{command} failed"))?;
            println!("{report}");
        }
        Command::Query { text, verbose } => {
            if verbose {
                let store = selector.store().await?;
                let matches = store.query_matches(&text).await?;
                if matches.is_empty() {
                    println!("no matches above the score threshold");
                }
                for hit in matches {
                    println!(
                        "[{}] score={:.4} topic={}",
                        hit.id,
                        hit.score,
                        hit.topic.as_deref().unwrap_or("-")
                    );
                    println!("  {}", hit.text);
                }
            } else {
                let texts = selector.query_knowledge_base(&text).await;
                if texts.is_empty() {
                    println!("no matches above the score threshold");
                }
                for text in texts {
                    println!("{text}");
                }
            }
        }
        Command::Health { detailed } => {
            if detailed {
                let status = selector.detailed_health_status().await;
                println!(
                    "backend={} healthy={} checked_at={}",
                    status.backend_name,
                    status.is_healthy,
                    status.timestamp.to_rfc3339()
                );
                println!("  {}", status.message);
                if !status.is_healthy {
                    anyhow::bail!("{} is unhealthy", status.backend_name);
                }
            } else if selector.health_status().await {
                println!("healthy");
            } else {
                anyhow::bail!("vector backend is unhealthy");
            }
        }
    }

    Ok(())
}
