use std::{env, io, process};

use graphbridge::{AnyGraph, CommandLineConfig, GraphError};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("{}", CommandLineConfig::help());
        return;
    }
    let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    let config = match CommandLineConfig::from_args(&arg_refs) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(2);
        }
    };

    let graph = match AnyGraph::open(&config.graph_config()) {
        Ok(graph) => graph,
        Err(err) => {
            eprintln!("{err}");
            process::exit(2);
        }
    };

    let outcome = run_command(&graph, &config);
    if let Err(err) = graph.shutdown() {
        eprintln!("shutdown failed: {err}");
    }
    match outcome {
        Ok(output) => println!("{output}"),
        Err(err) => {
            eprintln!("command failed: {err}");
            process::exit(1);
        }
    }
}

fn run_command(graph: &AnyGraph, config: &CommandLineConfig) -> Result<String, GraphError> {
    let value = match config.command.as_str() {
        "capabilities" => serde_json::to_value(graph.capabilities()),
        "schema" => serde_json::to_value(graph.schema_snapshot()?),
        "ensure" => {
            let specs = config.index_specs()?;
            serde_json::to_value(graph.ensure_indices(&specs)?)
        }
        other => {
            return Err(GraphError::invalid_input(format!("unknown command {other}")));
        }
    }
    .map_err(|e| GraphError::query(e.to_string()))?;
    serde_json::to_string_pretty(&value).map_err(|e| GraphError::query(e.to_string()))
}
