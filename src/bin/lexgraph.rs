//! LexGraph CLI — index contracts and run checklist risk analyses.
//!
//! Usage:
//!   lexgraph index --db graph.db --file contract.txt --contract-id c1
//!   lexgraph analyze --db graph.db --file contract.txt --contract-id c1 --name "MSA"
//!   lexgraph retrieve --db graph.db --query "termination for convenience"
//!   lexgraph report --id <analysis-id>
//!   lexgraph list
//!   lexgraph stats --db graph.db

use clap::{Parser, Subcommand};
use lexgraph::{
    AnalyzerBackend, ChecklistCatalog, Concept, ConceptExtractor, Config, Embedder, GraphStore,
    HashEmbedder, HttpChatClient, LexGraphApi, MemoryVectorIndex, Node, Passage, Relation,
    SessionId, SessionStore, SqliteGraphStore, StartAnalysisRequest, VectorIndex,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "lexgraph",
    version,
    about = "Retrieval-augmented contract-risk analyzer"
)]
struct Cli {
    /// Path to a YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory for saved analysis sessions
    #[arg(long, global = true)]
    sessions_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a contract file into the graph store
    Index {
        /// Path to the SQLite graph database
        #[arg(long)]
        db: PathBuf,
        /// Contract text file
        #[arg(long)]
        file: PathBuf,
        /// Stable contract identifier
        #[arg(long)]
        contract_id: String,
    },
    /// Run the checklist analysis over an indexed contract
    Analyze {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        contract_id: String,
        /// Display name for the contract
        #[arg(long)]
        name: String,
        /// Comma-separated part numbers (default: all ten)
        #[arg(long)]
        parts: Option<String>,
        /// Use the retrieval-free GPT-only backend
        #[arg(long)]
        gpt_only: bool,
    },
    /// Run one hybrid retrieval against the indexed corpus
    Retrieve {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        query: String,
        #[arg(long)]
        top_n: Option<usize>,
    },
    /// Print the integrated report of a saved analysis
    Report {
        #[arg(long)]
        id: String,
    },
    /// List saved analyses
    List,
    /// Graph store statistics
    Stats {
        #[arg(long)]
        db: PathBuf,
    },
}

fn default_sessions_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lexgraph")
        .join("sessions")
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, String> {
    match path {
        Some(path) => Config::load(path).map_err(|e| format!("failed to load config: {}", e)),
        None => Ok(Config::default()),
    }
}

/// Build the vector index by embedding every stored passage and concept.
/// Deterministic with the hash embedder, so reruns see the same index.
async fn build_vector_index(
    store: &dyn GraphStore,
    embedder: &dyn Embedder,
) -> Result<MemoryVectorIndex, String> {
    let index = MemoryVectorIndex::new(embedder.dimensions());
    let passages = store.all_passages().map_err(|e| e.to_string())?;
    if !passages.is_empty() {
        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let vectors = embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| e.to_string())?;
        for (passage, vector) in passages.iter().zip(vectors) {
            index
                .upsert(passage.id.as_str(), vector)
                .map_err(|e| e.to_string())?;
        }
    }
    for concept_id in store.concept_ids().map_err(|e| e.to_string())? {
        if let Some(concept) = store.get_concept(&concept_id).map_err(|e| e.to_string())? {
            index
                .upsert(concept.id.as_str(), concept.embedding)
                .map_err(|e| e.to_string())?;
        }
    }
    Ok(index)
}

/// Minimal deterministic indexer: paragraphs become passages, repeated
/// capitalized phrases become entity nodes, extracted concepts attach to the
/// nodes that mention them. The production ingestion pipeline is an external
/// collaborator; this keeps the binary usable end to end.
async fn index_contract(
    store: &dyn GraphStore,
    embedder: Arc<dyn Embedder>,
    contract_id: &str,
    text: &str,
) -> Result<(usize, usize, usize), String> {
    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut passages = Vec::new();
    for (position, paragraph) in paragraphs.iter().enumerate() {
        let passage = Passage::new(
            format!("{}:p{}", contract_id, position),
            *paragraph,
            contract_id,
            position,
        );
        store.add_passage(&passage).map_err(|e| e.to_string())?;
        passages.push(passage);
    }

    // Entity candidates: capitalized phrases of up to three words, kept when
    // they recur
    let mut counts: HashMap<String, usize> = HashMap::new();
    for paragraph in &paragraphs {
        for phrase in capitalized_phrases(paragraph) {
            *counts.entry(phrase).or_insert(0) += 1;
        }
    }
    let mut entities: Vec<(String, usize)> =
        counts.into_iter().filter(|(_, n)| *n >= 2).collect();
    entities.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entities.truncate(50);

    let mut nodes = Vec::new();
    for (numeric_id, (name, _)) in entities.iter().enumerate() {
        let node = Node::new(
            format!("{}:n{}", contract_id, numeric_id),
            name.clone(),
            "Entity",
            numeric_id as u64,
        );
        store.add_node(&node).map_err(|e| e.to_string())?;
        for passage in &passages {
            if passage.text.contains(name.as_str()) {
                store
                    .add_relation(&Relation::mentions(&passage.id, &node.id))
                    .map_err(|e| e.to_string())?;
            }
        }
        nodes.push(node);
    }

    // Co-occurrence edges between entities sharing a passage
    for (i, a) in nodes.iter().enumerate() {
        for b in nodes.iter().skip(i + 1) {
            let together = passages
                .iter()
                .any(|p| p.text.contains(a.name.as_str()) && p.text.contains(b.name.as_str()));
            if together {
                store
                    .add_relation(&Relation::relates(&a.id, &b.id, "CO_OCCURS_WITH"))
                    .map_err(|e| e.to_string())?;
            }
        }
    }

    // Concepts from the contract text, attached to nodes that mention them
    let extractor = ConceptExtractor::new(embedder).with_max_concepts(24);
    let concepts: Vec<Concept> = extractor
        .extract(text)
        .await
        .map_err(|e| e.to_string())?;
    for concept in &concepts {
        store.add_concept(concept).map_err(|e| e.to_string())?;
        for node in &nodes {
            if node.name.to_lowercase().contains(&concept.text) {
                store
                    .add_relation(&Relation::has_concept(&node.id, &concept.id))
                    .map_err(|e| e.to_string())?;
            }
        }
    }

    Ok((passages.len(), nodes.len(), concepts.len()))
}

fn capitalized_phrases(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut phrases = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for word in words {
        let cleaned = word.trim_matches(|c: char| c.is_ascii_punctuation());
        let capitalized = cleaned
            .chars()
            .next()
            .map(|c| c.is_uppercase())
            .unwrap_or(false);
        if capitalized && current.len() < 3 {
            current.push(cleaned);
        } else {
            if !current.is_empty() && current.iter().map(|w| w.len()).sum::<usize>() > 3 {
                phrases.push(current.join(" "));
            }
            current.clear();
        }
    }
    if !current.is_empty() {
        phrases.push(current.join(" "));
    }
    phrases
}

fn parse_parts(parts: Option<&String>) -> Result<Option<Vec<u8>>, String> {
    match parts {
        None => Ok(None),
        Some(raw) => raw
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<u8>()
                    .map_err(|_| format!("invalid part number: {}", p))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
    }
}

fn chat_client_from_env(config: &Config) -> Result<Arc<HttpChatClient>, String> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| "OPENAI_API_KEY is not set (required for analysis)".to_string())?;
    let api_base =
        std::env::var("OPENAI_API_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    Ok(Arc::new(
        HttpChatClient::new(api_base, api_key)
            .with_timeout(Duration::from_secs(config.llm_timeout_s)),
    ))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lexgraph=info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(message) = run(cli).await {
        eprintln!("error: {}", message);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = load_config(cli.config.as_ref())?;
    let sessions_dir = cli.sessions_dir.clone().unwrap_or_else(default_sessions_dir);

    match cli.command {
        Commands::Index {
            db,
            file,
            contract_id,
        } => {
            let text = std::fs::read_to_string(&file).map_err(|e| e.to_string())?;
            let store = SqliteGraphStore::open(&db).map_err(|e| e.to_string())?;
            let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
            let (passages, nodes, concepts) =
                index_contract(&store, embedder, &contract_id, &text).await?;
            println!(
                "indexed {}: {} passages, {} entities, {} concepts",
                contract_id, passages, nodes, concepts
            );
        }
        Commands::Analyze {
            db,
            file,
            contract_id,
            name,
            parts,
            gpt_only,
        } => {
            let text = std::fs::read_to_string(&file).map_err(|e| e.to_string())?;
            let store: Arc<dyn GraphStore> =
                Arc::new(SqliteGraphStore::open(&db).map_err(|e| e.to_string())?);
            let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
            let index = Arc::new(build_vector_index(store.as_ref(), embedder.as_ref()).await?);
            let chat = chat_client_from_env(&config)?;

            let api = LexGraphApi::build(&config, store, index, embedder, chat, &sessions_dir)
                .map_err(|e| e.to_string())?;
            let id = api
                .start_analysis(StartAnalysisRequest {
                    contract_id,
                    contract_name: name,
                    contract_text: text,
                    selected_parts: parse_parts(parts.as_ref())?,
                    backend: if gpt_only {
                        AnalyzerBackend::GptOnly
                    } else {
                        AnalyzerBackend::Hybrid
                    },
                })
                .map_err(|e| e.to_string())?;
            println!("analysis started: {}", id);

            loop {
                tokio::time::sleep(Duration::from_secs(2)).await;
                let status = api.get_status(&id).map_err(|e| e.to_string())?;
                println!("  [{:?}] {}", status.status, status.message);
                if status.status.is_terminal() {
                    break;
                }
            }
            let report = api.get_report(&id).map_err(|e| e.to_string())?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?
            );
        }
        Commands::Retrieve { db, query, top_n } => {
            let store: Arc<dyn GraphStore> =
                Arc::new(SqliteGraphStore::open(&db).map_err(|e| e.to_string())?);
            let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
            let index = Arc::new(build_vector_index(store.as_ref(), embedder.as_ref()).await?);
            // Retrieval never talks to the LLM; a key-less client placeholder
            // keeps the wiring uniform
            let chat = Arc::new(HttpChatClient::new("http://localhost", ""));
            let api = LexGraphApi::build(&config, store, index, embedder, chat, &sessions_dir)
                .map_err(|e| e.to_string())?;

            let result = api
                .hybrid_retrieve(&query, top_n)
                .await
                .map_err(|e| e.to_string())?;
            println!(
                "{} passages ({} of {} channels succeeded)",
                result.passages.len(),
                result.stats.successful_searches,
                result.stats.total_searches
            );
            for hit in &result.passages {
                println!("  [{:.3}] {}: {}", hit.score, hit.passage.id, hit.passage.text);
            }
        }
        Commands::Report { id } => {
            let store = SessionStore::open(&sessions_dir).map_err(|e| e.to_string())?;
            let session = store
                .load(&SessionId::from_string(id.clone()))
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("no saved analysis {}", id))?;
            let report = lexgraph::IntegratedReport::from_session(&session);
            println!(
                "{}",
                serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?
            );
        }
        Commands::List => {
            let store = SessionStore::open(&sessions_dir).map_err(|e| e.to_string())?;
            for summary in store.list_summaries().map_err(|e| e.to_string())? {
                println!(
                    "{}  {:?}  {:>3}%  {}  {}",
                    summary.id, summary.status, summary.progress, summary.started_at, summary.contract_name
                );
            }
        }
        Commands::Stats { db } => {
            let store = SqliteGraphStore::open(&db).map_err(|e| e.to_string())?;
            let stats = store.stats().map_err(|e| e.to_string())?;
            let catalog = ChecklistCatalog::builtin();
            println!(
                "passages: {}, nodes: {}, concepts: {}, relations: {}",
                stats.passages, stats.nodes, stats.concepts, stats.relations
            );
            println!(
                "checklist: version {}, {} parts",
                catalog.version,
                catalog.parts.len()
            );
        }
    }
    Ok(())
}
