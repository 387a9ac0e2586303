//! Querydesk - a keyboard-friendly database workbench.
//!
//! The binary is the headless surface of the workbench: it resolves a
//! connection, opens an editor tab and drives a SQL script through the
//! scheduler statement by statement. Window chrome plugs in on top of the
//! same `Workstation` API.

use std::path::Path;

use tracing::{error, info, warn};

use querydesk::app::Workstation;
use querydesk::cli::{Cli, OutputFormat};
use querydesk::config::{Config, ConnectionConfig};
use querydesk::db::{MockDatabaseClient, QueryResult};
use querydesk::error::{DeskError, Result};
use querydesk::tab::editor::split_statements;

#[tokio::main]
async fn main() {
    // Environment first, so DATABASE_URL and PG* variables from .env apply.
    dotenvy::dotenv().ok();

    querydesk::logging::init_stderr_logging();

    if let Err(e) = run().await {
        error!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse_args();
    let output = cli.output_format().map_err(DeskError::config)?;

    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;

    let connection = resolve_connection(&cli, &config)?;
    let enqueue = cli.enqueue || config.editor.enqueue_by_default;

    let mut workstation = Workstation::new(config);

    let connection_name = if cli.mock_db {
        workstation.add_connection("mock", Box::new(MockDatabaseClient::new()));
        "mock".to_string()
    } else if let Some(conn_config) = connection {
        info!("Connection: {}", conn_config.display_string());
        let name = cli.connection_name().unwrap_or("default").to_string();
        workstation.open_connection(&name, &conn_config).await?;
        name
    } else {
        warn!("No database connection configured");
        println!("No database connection configured. Use --help for usage information.");
        return Ok(());
    };

    match cli.file.as_deref() {
        Some(file) => {
            let index = workstation.new_tab(&connection_name)?;
            run_script(&mut workstation, index, file, enqueue).await?;
        }
        None => {
            println!(
                "Connected to '{connection_name}'. Pass --file <script.sql> to execute statements."
            );
        }
    }

    if output == OutputFormat::Json {
        println!("{}", workstation.audit().to_json());
    }

    workstation.shutdown().await;
    Ok(())
}

/// Resolves the connection configuration with precedence:
/// CLI arguments, then the named connection, then the config default, with
/// environment variables filling remaining gaps.
fn resolve_connection(cli: &Cli, config: &Config) -> Result<Option<ConnectionConfig>> {
    let mut connection = cli.to_connection_config()?;

    if connection.is_none() {
        if let Some(name) = cli.connection_name() {
            connection = config.get_connection(Some(name)).cloned();
            if connection.is_none() {
                return Err(DeskError::config(format!(
                    "Connection '{name}' not found in config file"
                )));
            }
        }
    }

    if connection.is_none() {
        connection = config.get_connection(None).cloned();
    }

    if let Some(conn) = connection.as_mut() {
        conn.apply_env_defaults();
    }

    Ok(connection)
}

/// Executes a SQL file statement by statement through an editor tab.
async fn run_script(
    workstation: &mut Workstation,
    tab_index: usize,
    path: &Path,
    enqueue: bool,
) -> Result<()> {
    let script = std::fs::read_to_string(path)
        .map_err(|e| DeskError::validation(format!("Unable to open {}: {e}", path.display())))?;

    let statements = split_statements(&script);
    info!(
        "Executing {} statements from {}",
        statements.len(),
        path.display()
    );

    for statement in statements {
        let tab = workstation
            .tab_mut(tab_index)
            .ok_or_else(|| DeskError::internal("script tab disappeared"))?;

        tab.set_text(statement);
        let token = tab.run(enqueue)?;
        let id = token.id();
        tab.wait_for(id).await;

        println!("{}", tab.status());
        if let Some(result) = token.result() {
            print_result(&result);
        }
    }

    Ok(())
}

/// Plain-text rendering of a result set.
fn print_result(result: &QueryResult) {
    if result.columns.is_empty() {
        return;
    }

    let header: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    println!("{}", header.join(" | "));

    for row in &result.rows {
        let cells: Vec<String> = row.iter().map(|v| v.to_display_string()).collect();
        println!("{}", cells.join(" | "));
    }

    if let Some(warning) = result.truncation_warning() {
        println!("{warning}");
    }
}
