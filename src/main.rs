use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use memorymesh::config::{detect_project_root, project_db_path};
use memorymesh::{
    MemoryMesh, MeshOptions, RecallOptions, RememberOptions, Scope,
};

#[derive(Parser)]
#[command(name = "memorymesh", version, about = "Persistent memory engine for AI applications")]
struct Cli {
    /// Project root (auto-detected from the working directory when omitted)
    #[arg(long, global = true)]
    project: Option<std::path::PathBuf>,

    /// Run without a project store, global memory only
    #[arg(long, global = true)]
    no_project: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve line-delimited JSON-RPC over stdio
    Serve,
    /// Store a memory
    Remember {
        text: String,
        #[arg(long)]
        scope: Option<Scope>,
        #[arg(long)]
        pin: bool,
        #[arg(long)]
        redact: bool,
        #[arg(long)]
        auto_categorize: bool,
    },
    /// Recall memories for a query
    Recall {
        query: String,
        #[arg(short, default_value_t = 5)]
        k: usize,
        #[arg(long)]
        scope: Option<Scope>,
    },
    /// Delete a memory by id
    Forget { id: String },
    /// Show store statistics
    Stats,
    /// Merge near-duplicate memories
    Compact {
        #[arg(long, default_value = "project")]
        scope: Scope,
        #[arg(long, default_value_t = 0.85)]
        threshold: f64,
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut options = MeshOptions::load()?;

    // Log to stderr so stdout stays clean for protocol and command output.
    let filter = EnvFilter::try_new(&options.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Server mode defaults to keyword-only; embedding stays opt-in there.
    if matches!(cli.command, Command::Serve) && options.embedding_provider == "local" {
        options.embedding_provider = "none".into();
    }

    if !cli.no_project && options.project_path.is_none() {
        let start = cli.project.clone().unwrap_or(std::path::PathBuf::from("."));
        match detect_project_root(&start) {
            Ok(root) => options.project_path = Some(project_db_path(&root)),
            Err(e) => tracing::warn!(error = %e, "continuing without a project store"),
        }
    }
    if cli.no_project {
        options.project_path = None;
    }

    let mesh = MemoryMesh::open(options)?;

    match cli.command {
        Command::Serve => {
            memorymesh::server::serve_stdio(&mesh)?;
        }
        Command::Remember {
            text,
            scope,
            pin,
            redact,
            auto_categorize,
        } => {
            let id = mesh.remember(
                &text,
                RememberOptions {
                    scope,
                    pin,
                    redact,
                    auto_categorize,
                    ..Default::default()
                },
            )?;
            if id.is_empty() {
                println!("skipped (conflict)");
            } else {
                println!("{id}");
            }
        }
        Command::Recall { query, k, scope } => {
            let results = mesh.recall(
                &query,
                RecallOptions {
                    k,
                    scope,
                    ..Default::default()
                },
            )?;
            for mem in results {
                let scope = mem.scope.map(|s| s.to_string()).unwrap_or_default();
                println!("[{scope}] {} {}", mem.id, mem.text);
            }
        }
        Command::Forget { id } => {
            println!("{}", if mesh.forget(&id)? { "deleted" } else { "not found" });
        }
        Command::Stats => {
            println!("global:  {:>6}  {}", mesh.count(Some(Scope::Global))?, mesh.global_path().display());
            match mesh.project_path() {
                Some(path) => println!(
                    "project: {:>6}  {}",
                    mesh.count(Some(Scope::Project))?,
                    path.display()
                ),
                None => println!("project: none configured"),
            }
            if let Some((oldest, newest)) = mesh.time_range(None)? {
                println!("range:   {oldest} .. {newest}");
            }
        }
        Command::Compact {
            scope,
            threshold,
            dry_run,
        } => {
            let result = mesh.compact(scope, threshold, dry_run)?;
            println!(
                "{} {} merge(s), {} deleted",
                if dry_run { "planned" } else { "performed" },
                result.merged_count,
                result.deleted_ids.len()
            );
        }
    }

    mesh.close();
    Ok(())
}
