use anyhow::{Context, Result};
use azure_data_mcp::config::{find_config_file, get_config, load_config, Config};
use azure_data_mcp::mcp::McpServer;
use azure_data_mcp::models::Record;
use azure_data_mcp::redact::{redact, redact_batch};
use azure_data_mcp::schema::validate;
use azure_data_mcp::services::Services;
use azure_data_mcp::stores::{entity_properties, SearchRequest};
use azure_data_mcp::utils::validate::validate_table_name;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Azure Data MCP - Azure Table Storage and Azure AI Search as MCP tools
#[derive(Parser, Debug)]
#[command(name = "azure-data-mcp")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MCP server for Azure Table Storage and Azure AI Search", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v, -vv)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Format of log lines written to stderr
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the MCP server
    Serve {
        /// Serve over streamable HTTP instead of stdio
        #[arg(long)]
        http: bool,

        /// Host to bind in HTTP mode
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind in HTTP mode
        #[arg(long, default_value_t = 3000)]
        port: u16,

        /// Use an in-process table store instead of Azure
        #[arg(long)]
        in_memory: bool,
    },

    /// List tables in the storage account
    Tables,

    /// Infer the schema of a table from a sample of its rows
    Infer {
        /// Table name
        table: String,

        /// Number of rows to sample
        #[arg(long, short)]
        sample_size: Option<usize>,
    },

    /// Validate an entity against a table's inferred schema
    Validate {
        /// Table name
        table: String,

        /// Entity as a JSON object
        entity: String,
    },

    /// Strip vector fields from JSON documents
    Redact {
        /// Input file (stdin when omitted)
        file: Option<PathBuf>,
    },

    /// Full-text search over an index
    Search {
        /// Index name
        index: String,

        /// Search text
        text: String,

        /// Maximum number of results
        #[arg(long, short)]
        top: Option<usize>,
    },

    /// Check configuration and connectivity
    #[command(alias = "diag")]
    Doctor,
}

fn init_tracing(verbose: u8, quiet: bool, format: LogFormat) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("azure_data_mcp={}", level)),
    );

    // stdout carries the MCP stdio transport, so logs go to stderr
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn resolve_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = if let Some(path) = path {
        load_config(path).with_context(|| format!("loading {}", path.display()))?
    } else if let Some(path) = find_config_file() {
        tracing::info!("Using config file: {}", path.display());
        load_config(&path).with_context(|| format!("loading {}", path.display()))?
    } else {
        get_config()?
    };
    Ok(config)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_input(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
        }
        None => {
            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input)?;
            Ok(input)
        }
    }
}

/// Table name and storable properties of a `validate` invocation
fn validate_args<'a>(table: &'a str, entity: &str) -> Result<(&'a str, Record)> {
    let table = validate_table_name(table)?;
    let value: Value = serde_json::from_str(entity).context("entity is not valid JSON")?;
    let candidate = entity_properties(&value, &[])?;
    Ok((table, candidate))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet, cli.log_format);

    let config = resolve_config(cli.config.as_ref())?;

    match cli.command {
        None => {
            let services = Services::from_config(&config)?;
            McpServer::new(&services)?.run().await?;
        }

        Some(Commands::Serve {
            http,
            host,
            port,
            in_memory,
        }) => {
            let services = if in_memory {
                Services::in_memory(&config)?
            } else {
                Services::from_config(&config)?
            };
            let server = McpServer::new(&services)?;

            if http {
                let addr = format!("{}:{}", host, port);
                let (bound_addr, handle) = server.run_http(&addr).await?;
                tracing::info!("MCP server listening on {}", bound_addr);

                handle
                    .await
                    .map_err(|e| anyhow::anyhow!("Server task failed: {}", e))?;
            } else {
                server.run().await?;
            }
        }

        Some(Commands::Tables) => {
            let store = Services::from_config(&config)?.table_store()?;
            let tables = store.list_tables().await?;
            if !cli.quiet {
                eprintln!("{} table(s)", tables.len());
            }
            for table in tables {
                println!("{}", table);
            }
        }

        Some(Commands::Infer { table, sample_size }) => {
            let services = Services::from_config(&config)?;
            let store = services.table_store()?;
            let sample_size = sample_size.unwrap_or(services.inference_sample_size());
            let inference = services
                .guard()
                .infer(store.as_ref(), &table, sample_size)
                .await?;
            print_json(&inference.to_json())?;
        }

        Some(Commands::Validate { table, entity }) => {
            let (table, candidate) = validate_args(&table, &entity)?;

            let services = Services::from_config(&config)?;
            let store = services.table_store()?;
            let guard = services.guard();
            let inference = guard
                .infer(store.as_ref(), table, guard.validation_sample_size())
                .await?;
            let report = validate(&inference, &candidate);
            print_json(&serde_json::to_value(&report)?)?;

            if !report.passed() {
                std::process::exit(1);
            }
        }

        Some(Commands::Redact { file }) => {
            let input = read_input(file.as_ref())?;
            let value: Value = serde_json::from_str(&input).context("input is not valid JSON")?;
            let redacted = match &value {
                Value::Array(items) => Value::Array(redact_batch(items)),
                other => redact(other),
            };
            print_json(&redacted)?;
        }

        Some(Commands::Search { index, text, top }) => {
            let search = Services::from_config(&config)?.search()?;
            let request = SearchRequest {
                top,
                ..SearchRequest::text(text)
            };
            request.validate()?;
            let results = search.search(&index, &request).await?;
            print_json(&json!({
                "indexName": index,
                "returned": results.documents.len(),
                "results": redact_batch(&results.documents),
            }))?;
        }

        Some(Commands::Doctor) => {
            println!("Azure Data MCP - Doctor");
            println!("=======================");

            println!("\n[Configuration]");
            println!("{}", toml::to_string_pretty(&config.redacted())?);

            let services = Services::from_config(&config)?;

            println!("[Table storage]");
            match services.table_store() {
                Ok(store) => match store.list_tables().await {
                    Ok(tables) => println!("  OK ({} tables)", tables.len()),
                    Err(e) => println!("  ERROR ({})", e),
                },
                Err(e) => println!("  Not configured ({})", e),
            }

            println!("\n[Search]");
            match services.search() {
                Ok(search) => match search.list_indexes().await {
                    Ok(indexes) => println!("  OK ({} indexes)", indexes.len()),
                    Err(e) => println!("  ERROR ({})", e),
                },
                Err(e) => println!("  Not configured ({})", e),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::parse_from(["azure-data-mcp"]);
        assert_eq!(cli.verbose, 0);
        assert!(!cli.quiet);
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(cli.config.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::parse_from(["azure-data-mcp", "-vv"]);
        assert_eq!(cli.verbose, 2);

        let cli = Cli::parse_from(["azure-data-mcp", "tables", "--verbose"]);
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn test_cli_log_format() {
        let cli = Cli::parse_from(["azure-data-mcp", "--log-format", "json", "doctor"]);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(Cli::try_parse_from(["azure-data-mcp", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn test_cli_serve_command() {
        let cli = Cli::parse_from(["azure-data-mcp", "serve"]);
        match cli.command {
            Some(Commands::Serve {
                http,
                host,
                port,
                in_memory,
            }) => {
                assert!(!http);
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 3000);
                assert!(!in_memory);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_serve_http_in_memory() {
        let cli = Cli::parse_from([
            "azure-data-mcp",
            "serve",
            "--http",
            "--port",
            "8080",
            "--in-memory",
        ]);
        assert!(matches!(
            cli.command,
            Some(Commands::Serve {
                http: true,
                port: 8080,
                in_memory: true,
                ..
            })
        ));
    }

    #[test]
    fn test_cli_infer_command() {
        let cli = Cli::parse_from(["azure-data-mcp", "infer", "orders", "--sample-size", "25"]);
        match cli.command {
            Some(Commands::Infer { table, sample_size }) => {
                assert_eq!(table, "orders");
                assert_eq!(sample_size, Some(25));
            }
            _ => panic!("Expected Infer command"),
        }
    }

    #[test]
    fn test_cli_validate_command() {
        let cli = Cli::parse_from(["azure-data-mcp", "validate", "orders", r#"{"status":"x"}"#]);
        assert!(matches!(cli.command, Some(Commands::Validate { .. })));
        assert!(Cli::try_parse_from(["azure-data-mcp", "validate", "orders"]).is_err());
    }

    #[test]
    fn test_validate_args_strip_system_properties() {
        let (table, candidate) = validate_args(
            " orders ",
            r#"{"PartitionKey":"p","RowKey":"r","Timestamp":"t","odata.etag":"e","status":"x"}"#,
        )
        .unwrap();
        assert_eq!(table, "orders");
        assert_eq!(candidate.keys().collect::<Vec<_>>(), vec!["status"]);

        assert!(validate_args("1orders", r#"{"status":"x"}"#).is_err());
        assert!(validate_args("orders", r#"{"tags":["a"]}"#).is_err());
        assert!(validate_args("orders", "not json").is_err());
    }

    #[test]
    fn test_cli_redact_and_search() {
        let cli = Cli::parse_from(["azure-data-mcp", "redact"]);
        assert!(matches!(cli.command, Some(Commands::Redact { file: None })));

        let cli = Cli::parse_from(["azure-data-mcp", "search", "hotels", "beach", "-t", "5"]);
        match cli.command {
            Some(Commands::Search { index, text, top }) => {
                assert_eq!(index, "hotels");
                assert_eq!(text, "beach");
                assert_eq!(top, Some(5));
            }
            _ => panic!("Expected Search command"),
        }
    }

    #[test]
    fn test_cli_doctor_alias() {
        let cli = Cli::parse_from(["azure-data-mcp", "diag"]);
        assert!(matches!(cli.command, Some(Commands::Doctor)));
    }
}
