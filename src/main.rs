//! chainsaw: hybrid semantic + knowledge-graph code index
//!
//! Usage:
//!   chainsaw init                      Create the store
//!   chainsaw index <path>              Queue a path for indexing
//!   chainsaw search <query>            Semantic similarity search
//!   chainsaw graph query <cypher>      Query the knowledge graph
//!   chainsaw status                    Show index statistics
//!   chainsaw daemon start|status       Background indexing daemon
//!   chainsaw version                   Print the version

use std::env;
use std::process::ExitCode;

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use chainsaw::cli::{self, OutputFormat};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    let level = if args.iter().any(|a| a == "--debug") {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &[String]) -> Result<()> {
    let Some(command) = args.first() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "init" => cli::init_command(),
        "index" => {
            let Some(path) = args.get(1) else {
                anyhow::bail!("usage: chainsaw index <path>");
            };
            cli::index_command(path)
        }
        "search" => {
            let Some(query) = args.get(1).filter(|q| !q.starts_with("--")) else {
                anyhow::bail!("usage: chainsaw search <query> [--limit N] [--format yaml|json]");
            };
            let limit = match cli::flag_value(args, "--limit") {
                Some(value) => value
                    .parse::<i64>()
                    .map_err(|_| anyhow::anyhow!("invalid --limit value: {}", value))?,
                None => 10,
            };
            let format = parse_format(args, OutputFormat::Text)?;
            cli::search_command(query, limit, format).await
        }
        "graph" => match args.get(1).map(|s| s.as_str()) {
            Some("query") => {
                let Some(query) = args.get(2) else {
                    anyhow::bail!("usage: chainsaw graph query <cypher> [--format yaml|json]");
                };
                let format = parse_format(args, OutputFormat::Yaml)?;
                cli::graph_query_command(query, format)
            }
            _ => {
                anyhow::bail!("usage: chainsaw graph query <cypher>");
            }
        },
        "context" => match args.get(1).map(|s| s.as_str()) {
            Some("inject") => {
                let Some(query) = args.get(2) else {
                    anyhow::bail!("usage: chainsaw context inject <query> [--limit N]");
                };
                let limit = match cli::flag_value(args, "--limit") {
                    Some(value) => value
                        .parse::<i64>()
                        .map_err(|_| anyhow::anyhow!("invalid --limit value: {}", value))?,
                    None => 5,
                };
                cli::context_inject_command(query, limit).await
            }
            Some("clean") => {
                let Some(file) = args.get(2) else {
                    anyhow::bail!("usage: chainsaw context clean <file>");
                };
                cli::context_clean_command(file)
            }
            _ => {
                anyhow::bail!("usage: chainsaw context inject <query> | clean <file>");
            }
        },
        "status" => cli::status_command(),
        "daemon" => match args.get(1).map(|s| s.as_str()) {
            Some("start") => cli::daemon_start_command().await,
            Some("status") => cli::daemon_status_command(),
            _ => {
                anyhow::bail!("usage: chainsaw daemon start|status");
            }
        },
        "version" | "--version" | "-V" => {
            println!("chainsaw version {}", chainsaw::VERSION);
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            print_usage();
            anyhow::bail!("unknown command: {}", other);
        }
    }
}

fn parse_format(args: &[String], default: OutputFormat) -> Result<OutputFormat> {
    match cli::flag_value(args, "--format") {
        None => Ok(default),
        Some(value) => OutputFormat::parse(value)
            .ok_or_else(|| anyhow::anyhow!("invalid --format value: {} (yaml|json)", value)),
    }
}

fn print_usage() {
    println!(
        r#"chainsaw: hybrid semantic + knowledge-graph code index

USAGE:
    chainsaw <COMMAND> [OPTIONS]

COMMANDS:
    init                      Create the store at ~/.chainsaw/chainsaw.db
    index <path>              Queue a file or directory for indexing
    search <query>            Semantic similarity search, scoped to the
                              current directory
        --limit N             Maximum results (default 10)
        --format yaml|json    Machine-readable output
    graph query <cypher>      Query the knowledge graph
        --format yaml|json    Output format (default yaml)
    context inject <query>    Emit a context block for downstream tools
    context clean <file>      Remove injected context blocks from a file
    status                    Show queue and index statistics
    daemon start              Run the indexing daemon (watcher + workers)
        --debug               Enable debug logging
    daemon status             Daemon health and counters
    version                   Print the version

EXAMPLES:
    chainsaw index ~/code/project
    chainsaw search "error handling middleware" --limit 3
    chainsaw graph query "MATCH (f:FUNCTION)-[:calls]->(t) RETURN f.name, t.name"
"#
    );
}
