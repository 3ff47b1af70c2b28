use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use codemem::db::SearchFilter;
use codemem::graph::Direction;
use codemem::impact::{DEFAULT_CHAIN_DEPTH, DEFAULT_IMPACT_DEPTH, DEFAULT_MAX_PATHS, ImpactAnalyzer};
use codemem::indexer::Indexer;
use codemem::models::Decision;
use codemem::project::Project;

#[derive(Parser)]
#[command(name = "codemem")]
#[command(about = "Code memory: dependency graph and semantic search over a source tree")]
#[command(version)]
struct Cli {
    /// Project root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create `.codemem/` under the project root
    Init,

    /// Bring the index up to date with the files on disk
    Sync {
        /// Rebuild everything instead of only changed files
        #[arg(long)]
        full: bool,
    },

    /// Semantic search over indexed chunks
    Search {
        query: String,

        /// Number of results (defaults to the configured `search_top_k`)
        #[arg(short)]
        k: Option<usize>,

        /// Restrict to these languages
        #[arg(long = "language")]
        languages: Vec<String>,

        /// Restrict to one file
        #[arg(long)]
        file: Option<String>,

        /// Widen hits to related files and symbols up to this many hops
        #[arg(long)]
        context_depth: Option<usize>,
    },

    /// Show a symbol with its source and relationships
    Symbol {
        name: String,

        #[arg(long)]
        file: Option<String>,
    },

    /// Chunks, symbols and relationships of one file
    File { path: String },

    /// Dependencies (or dependents) of a node id
    Deps {
        id: String,

        /// Follow incoming edges instead
        #[arg(long)]
        dependents: bool,

        #[arg(long, default_value_t = DEFAULT_IMPACT_DEPTH)]
        depth: usize,
    },

    /// Shortest path from a node id to everything it reaches
    Chains {
        id: String,

        #[arg(long, value_enum, default_value_t = Towards::Dependents)]
        towards: Towards,

        #[arg(long, default_value_t = DEFAULT_CHAIN_DEPTH)]
        depth: usize,
    },

    /// Impact of changing the given files
    Impact {
        #[arg(required = true)]
        files: Vec<String>,

        #[arg(long, default_value_t = DEFAULT_IMPACT_DEPTH)]
        depth: usize,
    },

    /// Record an architectural decision
    Decide {
        title: String,

        #[arg(long)]
        description: String,

        #[arg(long)]
        rationale: String,

        #[arg(long, default_value = "")]
        context: String,

        /// Related file (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,

        /// Related node id (repeatable)
        #[arg(long = "symbol")]
        symbols: Vec<String>,

        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Id of an earlier decision this one replaces
        #[arg(long)]
        supersedes: Option<String>,
    },

    /// Semantic search over recorded decisions
    Decisions {
        query: String,

        #[arg(short, default_value_t = 5)]
        k: usize,
    },

    /// Index statistics and sync times
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum Towards {
    Dependents,
    Dependencies,
    Both,
}

impl From<Towards> for Direction {
    fn from(t: Towards) -> Self {
        match t {
            Towards::Dependents => Direction::Incoming,
            Towards::Dependencies => Direction::Outgoing,
            Towards::Both => Direction::Both,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Init => {
            let project = Project::init(&cli.root).context("Failed to initialize project")?;
            print_json(&json!({
                "project": project.name(),
                "root": project.root(),
                "config": project.config_path(),
            }))
        }
        Commands::Sync { full } => {
            let mut indexer = open_indexer(&cli.root)?;
            let stats = indexer.sync(full)?;
            print_json(&stats)
        }
        Commands::Search {
            query,
            k,
            languages,
            file,
            context_depth,
        } => {
            let indexer = open_indexer(&cli.root)?;
            let config = indexer.project().config();
            let k = k.unwrap_or(config.search_top_k);
            let store = indexer.store();
            let languages: Vec<&str> = languages.iter().map(String::as_str).collect();
            let filter = SearchFilter {
                languages: &languages,
                file_path: file.as_deref(),
            };

            match context_depth {
                Some(depth) => {
                    let depth = config.graph.clamp_depth(depth);
                    print_json(&store.search_with_context(&query, k, depth, Some(&filter))?)
                }
                None => print_json(&store.search(&query, k, true, Some(&filter))?),
            }
        }
        Commands::Symbol { name, file } => {
            let indexer = open_indexer(&cli.root)?;
            match indexer.store().get_symbol_info(&name, file.as_deref())? {
                Some(info) => print_json(&info),
                None => bail!("No symbol matching '{name}'"),
            }
        }
        Commands::File { path } => {
            let indexer = open_indexer(&cli.root)?;
            print_json(&indexer.store().get_file_context(&path, true)?)
        }
        Commands::Deps {
            id,
            dependents,
            depth,
        } => {
            let indexer = open_indexer(&cli.root)?;
            let depth = indexer.project().config().graph.clamp_depth(depth);
            let store = indexer.store();
            let ids = if dependents {
                store.get_dependents(&id, depth)
            } else {
                store.get_dependencies(&id, depth)
            };
            print_json(&json!({ "id": id, "dependents": dependents, "depth": depth, "ids": ids }))
        }
        Commands::Chains { id, towards, depth } => {
            let indexer = open_indexer(&cli.root)?;
            let depth = indexer.project().config().graph.clamp_depth(depth);
            let chains =
                ImpactAnalyzer::new(indexer.store()).get_dependency_chain(&id, towards.into(), depth);
            print_json(&json!({ "id": id, "depth": depth, "chains": chains }))
        }
        Commands::Impact { files, depth } => {
            let indexer = open_indexer(&cli.root)?;
            let depth = indexer.project().config().graph.clamp_depth(depth);
            let analyzer = ImpactAnalyzer::new(indexer.store());
            let result = analyzer.analyze_files(files.as_slice(), depth);
            let critical_paths = analyzer.get_critical_paths(files.as_slice(), DEFAULT_MAX_PATHS);
            print_json(&json!({
                "summary": result.to_summary(),
                "impact": result,
                "critical_paths": critical_paths,
            }))
        }
        Commands::Decide {
            title,
            description,
            rationale,
            context,
            files,
            symbols,
            tags,
            supersedes,
        } => {
            let mut indexer = open_indexer(&cli.root)?;
            let mut decision = Decision::new(title, description, rationale);
            decision.context = context;
            decision.related_files = files;
            decision.related_symbols = symbols;
            decision.tags = tags;
            indexer.record_decision(&decision, supersedes.as_deref())?;
            print_json(&decision)
        }
        Commands::Decisions { query, k } => {
            let indexer = open_indexer(&cli.root)?;
            print_json(&indexer.store().search_decisions(&query, k)?)
        }
        Commands::Stats => {
            let indexer = open_indexer(&cli.root)?;
            print_json(&indexer.status()?)
        }
    }
}

fn open_indexer(root: &Path) -> Result<Indexer> {
    let project = Project::open(root)
        .with_context(|| format!("Run `codemem init` in {} first", root.display()))?;
    Ok(Indexer::open(project)?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
