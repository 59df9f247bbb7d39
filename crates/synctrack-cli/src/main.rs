//! synctrack CLI
//!
//! Command-line tool for initializing and inspecting the change history of
//! a synctrack database.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use synctrack::{col, Connection, ConnectionConfig, Entity};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Change-tracked SQLite storage.
#[derive(Parser)]
#[command(name = "synctrack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL or SQLite path.
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:synctrack.db")]
    database: String,

    /// JSON connection settings; overrides --database.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log every executed statement.
    #[arg(long)]
    trace: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the change history table.
    Init,

    /// Insert, update and delete sample products.
    Demo,

    /// Print the change history.
    History {
        /// Only show entries of this table.
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Count the rows of a table.
    Count {
        /// Table name.
        table: String,
    },
}

#[derive(Debug, Default, Entity)]
struct Product {
    #[column(primary_key, autoincrement)]
    id: i64,
    name: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &cli.config {
        Some(path) => ConnectionConfig::from_file(path)?,
        None => ConnectionConfig::sqlite(cli.database.as_str()),
    };
    let conn = Connection::open(config.with_trace(cli.trace || cli.verbose))?;

    match cli.command {
        Commands::Init => {
            info!("Initializing change history...");
            conn.init_history()?;
            info!("History table created successfully.");
        }

        Commands::Demo => {
            conn.create_table::<Product>()?;
            let mut products = vec![
                Product {
                    id: 0,
                    name: "Orange Juice".to_string(),
                },
                Product {
                    id: 0,
                    name: "Apple Juice".to_string(),
                },
            ];
            conn.insert_all(&mut products, true)?;
            info!(count = products.len(), "Inserted products");

            for product in &mut products {
                product.name.push_str(" Updated");
            }
            conn.update_all(&mut products, true)?;

            let deleted = conn
                .table::<Product>()?
                .delete_where(col("name").starts_with("Apple"))?;
            info!(deleted, "Deleted products");

            let remaining = conn.table::<Product>()?.count()?;
            println!("Products: {remaining}");
            println!("History entries: {}", conn.history_for("Product")?.len());
        }

        Commands::History { table } => {
            let entries = match table {
                Some(table) => conn.history_for(&table)?,
                None => conn.history()?,
            };
            if entries.is_empty() {
                println!("No changes recorded.");
            }
            for entry in entries {
                println!(
                    "{:>6}  {:<24} {}  {}",
                    entry.id, entry.table_name, entry.sync_guid, entry.action
                );
            }
        }

        Commands::Count { table } => {
            let sql = format!(
                "select count(*) from {}",
                conn.dialect().quote_identifier(&table)
            );
            let count: i64 = conn.execute_scalar(&sql, &[])?;
            println!("{table}: {count}");
        }
    }

    conn.close()?;
    Ok(())
}
