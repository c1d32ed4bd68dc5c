//! `veridoc` command-line host.
//!
//! The default index lives in memory, so `query` and `chat` ingest the
//! document directory given with `--docs` before answering.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use veridoc::gemini::{GeminiEmbeddingProvider, GeminiGenerator};
use veridoc::{InMemoryVectorIndex, IngestStatus, QaPipeline, Settings};

/// Grounded question answering over a document directory.
#[derive(Parser, Debug)]
#[command(name = "veridoc", version, about, long_about = None)]
struct Cli {
    /// Skip PII scrubbing, refusal and grounding checks
    #[arg(long, global = true)]
    no_guardrails: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a directory or a single file and print the ingest report
    Ingest {
        /// Directory or file to ingest
        path: PathBuf,
    },
    /// Answer one question
    Query {
        /// Directory of documents to answer from
        #[arg(long)]
        docs: PathBuf,
        /// Number of evidence chunks to retrieve
        #[arg(long)]
        top_k: Option<usize>,
        /// The question
        question: String,
    },
    /// Answer questions interactively
    Chat {
        /// Directory of documents to answer from
        #[arg(long)]
        docs: PathBuf,
        /// Number of evidence chunks to retrieve
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Print pipeline statistics
    Stats {
        /// Directory of documents to ingest first
        #[arg(long)]
        docs: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env().context("invalid configuration")?;
    if cli.no_guardrails {
        settings.guardrails_enabled = false;
    }
    let pipeline = build_pipeline(settings)?;

    match cli.command {
        Command::Ingest { path } => {
            let report = if path.is_file() {
                pipeline.ingest_file(&path).await?
            } else {
                pipeline.ingest_directory(&path).await?
            };
            print_json(&report)?;
        }
        Command::Query { docs, top_k, question } => {
            ingest(&pipeline, &docs).await?;
            print_json(&pipeline.query(&question, top_k).await)?;
        }
        Command::Chat { docs, top_k } => {
            ingest(&pipeline, &docs).await?;
            chat(&pipeline, top_k).await?;
        }
        Command::Stats { docs } => {
            if let Some(docs) = docs {
                ingest(&pipeline, &docs).await?;
            }
            print_json(&pipeline.stats().await?)?;
        }
    }

    Ok(())
}

fn build_pipeline(settings: Settings) -> anyhow::Result<QaPipeline> {
    let Some(api_key) = settings.api_key.clone() else {
        bail!("GOOGLE_API_KEY or GEMINI_API_KEY must be set");
    };

    let embedder = GeminiEmbeddingProvider::new(&api_key, &settings.embedding_model)?;
    let generator = GeminiGenerator::new(&api_key, &settings.llm_model)?;

    Ok(QaPipeline::builder()
        .settings(settings)
        .index(Arc::new(InMemoryVectorIndex::new(Arc::new(embedder))))
        .generator(Arc::new(generator))
        .build()?)
}

async fn ingest(pipeline: &QaPipeline, docs: &Path) -> anyhow::Result<()> {
    let report = pipeline
        .ingest_directory(docs)
        .await
        .with_context(|| format!("failed to ingest {}", docs.display()))?;
    if report.status == IngestStatus::Error {
        bail!("{}: {}", docs.display(), report.message.unwrap_or_default());
    }
    info!(chunks = ?report.chunks, total_indexed = ?report.total_indexed, "documents ready");
    Ok(())
}

async fn chat(pipeline: &QaPipeline, top_k: Option<usize>) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("Escriba su pregunta (Ctrl-D para salir).");

    loop {
        match editor.readline("? ") {
            Ok(line) => {
                let question = line.trim();
                if question.is_empty() {
                    continue;
                }
                editor.add_history_entry(question)?;
                print_json(&pipeline.query(question, top_k).await)?;
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
