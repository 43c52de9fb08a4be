//! dagstore CLI - Command-line interface
//!
//! Usage:
//!   dagstore init
//!   dagstore add-vertex [key] --data '{"name": "build"}'
//!   dagstore add-edge <src> <dst> [--create-vertices]
//!   dagstore descendants <key> [--dfs]
//!   dagstore path <src> <dst>
//!   dagstore dot
//!   dagstore fanout --levels 4 --branches 3
//!   dagstore --memory fanout

use anyhow::Context;
use clap::{Parser, Subcommand};
use dagstore_core::{DagConfig, DocumentStore, LoggingConfig};
use dagstore_graph::{Cursor, Dag, DagError, EdgeOptions, MemoryStore, SurrealDbStore, Vertex};
use futures::future::try_join_all;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "dagstore")]
#[command(about = "Directed acyclic graphs on SurrealDB")]
#[command(version)]
struct Cli {
    /// Use an in-process store that lives for one command (init and fanout only)
    #[arg(long, global = true)]
    memory: bool,

    /// TOML configuration file (environment variables still override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and collections
    Init,
    /// Add a vertex, with a generated key unless one is given
    AddVertex {
        key: Option<String>,
        /// JSON payload
        #[arg(long)]
        data: Option<String>,
    },
    /// Print a vertex as JSON
    GetVertex { key: String },
    /// Remove a vertex and its edges
    DelVertex { key: String },
    /// Add an edge, rejecting duplicates and cycles
    AddEdge {
        src: String,
        dst: String,
        /// Create missing endpoints
        #[arg(long)]
        create_vertices: bool,
        /// JSON payload
        #[arg(long)]
        data: Option<String>,
    },
    /// Remove an edge
    DelEdge { src: String, dst: String },
    /// Direct successors
    Children { key: String },
    /// Direct predecessors
    Parents { key: String },
    /// Every vertex reaching the given one
    Ancestors {
        key: String,
        /// Depth-first, one result per path
        #[arg(long)]
        dfs: bool,
    },
    /// Every vertex reachable from the given one
    Descendants {
        key: String,
        /// Depth-first, one result per path
        #[arg(long)]
        dfs: bool,
    },
    /// Shortest path between two vertices
    Path { src: String, dst: String },
    /// Vertices without parents
    Roots,
    /// Vertices without children
    Leaves,
    /// Vertex and edge counts
    Stats,
    /// Print the graph in DOT format
    Dot,
    /// Build a tree concurrently and time a descendants scan
    Fanout {
        #[arg(long, default_value_t = 3)]
        levels: u32,
        #[arg(long, default_value_t = 4)]
        branches: u32,
    },
}

impl Commands {
    /// Commands meaningful on a store that starts empty and is dropped on exit
    fn runs_in_memory(&self) -> bool {
        matches!(self, Commands::Init | Commands::Fanout { .. })
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.clone().into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<DagConfig> {
    let config = match path {
        Some(path) => DagConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?
            .with_env_override()?,
        None => DagConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

async fn connect(config: &DagConfig, memory: bool) -> anyhow::Result<Dag> {
    let store: Arc<dyn DocumentStore> = if memory {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SurrealDbStore::new(&config.store).await?)
    };
    Ok(Dag::provision(store, &config.graph).await?)
}

fn parse_data(data: Option<&str>) -> anyhow::Result<Option<Value>> {
    data.map(|text| serde_json::from_str(text).context("payload is not valid JSON"))
        .transpose()
}

async fn print_keys(cursor: Cursor) -> anyhow::Result<()> {
    for key in cursor.collect_keys().await? {
        println!("{key}");
    }
    Ok(())
}

async fn fanout(dag: &Dag, levels: u32, branches: u32) -> anyhow::Result<()> {
    let root = format!("fanout-{}", uuid::Uuid::new_v4().simple());
    dag.add_named_vertex(&root, Some(&0u32)).await?;

    let started = Instant::now();
    let mut frontier = vec![root.clone()];
    for level in 1..=levels {
        let children: Vec<(String, String)> = frontier
            .iter()
            .flat_map(|parent| (0..branches).map(move |b| (parent.clone(), format!("{parent}.{b}"))))
            .collect();

        let level_started = Instant::now();
        try_join_all(children.iter().map(|(parent, child)| async move {
            dag.add_named_vertex(child, Some(&level)).await?;
            dag.add_edge_unchecked(parent, child).await?;
            Ok::<_, DagError>(())
        }))
        .await?;

        tracing::info!(
            level,
            vertices = children.len(),
            elapsed_ms = level_started.elapsed().as_millis() as u64,
            "level created"
        );
        frontier = children.into_iter().map(|(_, child)| child).collect();
    }
    let built = started.elapsed();

    let scan_started = Instant::now();
    let reached = dag.descendants(&root, false).await?.total().await?;
    let scanned = scan_started.elapsed();

    println!("root:        {root}");
    println!("descendants: {reached}");
    println!("build:       {built:?}");
    println!("scan:        {scanned:?}");
    Ok(())
}

async fn run(cli: Cli, config: DagConfig) -> anyhow::Result<()> {
    if cli.memory && !cli.command.runs_in_memory() {
        anyhow::bail!("--memory keeps no data between runs; use it with init or fanout");
    }
    let dag = connect(&config, cli.memory).await?;

    match cli.command {
        Commands::Init => {
            println!(
                "{}: {} / {}",
                dag.database(),
                dag.vertex_collection().name,
                dag.edge_collection().name
            );
        }
        Commands::AddVertex { key, data } => {
            let data = parse_data(data.as_deref())?;
            let meta = match key {
                Some(key) => dag.add_named_vertex(&key, data.as_ref()).await?,
                None => dag.add_vertex(&data).await?,
            };
            println!("{}", meta.key);
        }
        Commands::GetVertex { key } => {
            let vertex: Vertex = dag.get_vertex(&key).await?;
            println!("{}", serde_json::to_string_pretty(&vertex)?);
        }
        Commands::DelVertex { key } => {
            let removed = dag.del_vertex(&key).await?;
            println!("removed {key} and {removed} edge(s)");
        }
        Commands::AddEdge {
            src,
            dst,
            create_vertices,
            data,
        } => {
            let mut options = EdgeOptions::new().create_vertices(create_vertices);
            if let Some(data) = parse_data(data.as_deref())? {
                options = options.with_data(&data)?;
            }
            let meta = dag.add_edge_with(&src, &dst, options).await?;
            println!("{}", meta.key);
        }
        Commands::DelEdge { src, dst } => {
            dag.del_edge(&src, &dst).await?;
        }
        Commands::Children { key } => print_keys(dag.children(&key).await?).await?,
        Commands::Parents { key } => print_keys(dag.parents(&key).await?).await?,
        Commands::Ancestors { key, dfs } => print_keys(dag.ancestors(&key, dfs).await?).await?,
        Commands::Descendants { key, dfs } => {
            print_keys(dag.descendants(&key, dfs).await?).await?
        }
        Commands::Path { src, dst } => print_keys(dag.shortest_path(&src, &dst).await?).await?,
        Commands::Roots => print_keys(dag.roots().await?).await?,
        Commands::Leaves => print_keys(dag.leaves().await?).await?,
        Commands::Stats => {
            println!("vertices: {}", dag.order().await?);
            println!("edges:    {}", dag.size().await?);
            println!("roots:    {}", dag.roots().await?.total().await?);
            println!("leaves:   {}", dag.leaves().await?.total().await?);
        }
        Commands::Dot => print!("{}", dag.to_dot().await?),
        Commands::Fanout { levels, branches } => fanout(&dag, levels, branches).await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging);

    if let Err(err) = run(cli, config).await {
        match err.downcast_ref::<DagError>() {
            Some(dag_err) => eprintln!("error {}: {dag_err}", dag_err.code()),
            None => eprintln!("error: {err:#}"),
        }
        std::process::exit(1);
    }
    Ok(())
}
