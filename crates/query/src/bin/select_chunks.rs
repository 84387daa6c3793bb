use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use extract::{ExtractionMode, LlmExtractor, OllamaClient};
use index::{EmbeddingClient, KnowledgeGraph};
use query::{AppConfig, ChunkSelector, SelectionRequest, build_context};

/// Rank the chunks of a saved knowledge graph against a query.
#[derive(Parser)]
#[command(name = "select_chunks", version)]
struct Args {
    /// Graph snapshot written by `KnowledgeGraph::save`
    snapshot: PathBuf,

    /// Question to select chunks for
    query: String,

    /// JSON config file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum number of chunks to return
    #[arg(long)]
    max: Option<usize>,

    /// Print the rendered prompt context instead of JSON
    #[arg(long)]
    context: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    if std::env::var_os("GRAPHRAG_LOG_JSON").is_some() {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load(path).await?,
        None => AppConfig::default(),
    }
    .apply_env_overrides()?;

    let graph = KnowledgeGraph::load(&args.snapshot)
        .await
        .with_context(|| format!("Failed to load graph snapshot {}", args.snapshot.display()))?;
    info!(stats = ?graph.stats(), "graph loaded");

    let provider = &config.provider;
    let embedder = EmbeddingClient::with_timeout(
        provider.ollama_url.clone(),
        provider.embedding_model.clone(),
        Duration::from_secs(provider.request_timeout_secs),
    );
    let extractor = LlmExtractor::new(
        OllamaClient::new(provider.ollama_url.clone(), provider.extraction_model.clone()),
        ExtractionMode::Query,
    )
    .with_max_retries(config.retry.max_retries);

    let selector = ChunkSelector::new(embedder, extractor, &config);

    let mut request = SelectionRequest::new();
    if let Some(max) = args.max {
        request = request.with_max_chunks(max);
    }

    let selection = selector.select(&args.query, &graph, request).await?;
    info!(metrics = ?selector.metrics().snapshot(), "done");

    if args.context {
        println!("{}", build_context(selection.chunks(), &graph));
    } else {
        println!("{}", serde_json::to_string_pretty(&selection)?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "select_chunks",
            "graph.json",
            "capital of France",
            "--max",
            "3",
            "--context",
        ])
        .unwrap();

        assert_eq!(args.snapshot, PathBuf::from("graph.json"));
        assert_eq!(args.query, "capital of France");
        assert_eq!(args.max, Some(3));
        assert!(args.context);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_missing_values_rejected() {
        let err = Args::try_parse_from(["select_chunks", "graph.json", "q", "--max"])
            .err()
            .unwrap();
        assert!(err.to_string().contains("--max"));

        let err = Args::try_parse_from(["select_chunks", "graph.json"]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        assert!(Args::try_parse_from(["select_chunks", "g.json", "q", "--max", "many"]).is_err());
    }
}
