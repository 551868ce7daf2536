//! `txdb` - inspect and maintain a mempool transaction store on disk.

mod logging;

use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use tracing::info;
use txdb::{TxDbArgs, TxId};

use crate::logging::{LogArgs, init_logging};

/// Mempool transaction store tool.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    logs: LogArgs,

    #[command(flatten)]
    txdb: TxDbArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print accounted usage, record count and the xref marker.
    Stats,
    /// List stored transaction ids.
    Keys,
    /// Print a stored payload as hex.
    Get {
        /// Transaction id, hex encoded.
        txid: TxId,
    },
    /// Remove every stored record.
    Clear,
    /// Drop the xref marker.
    XrefClear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.logs);

    let db = cli
        .txdb
        .open()
        .wrap_err_with(|| format!("failed to open store at {}", cli.txdb.path.display()))?;

    match cli.command {
        Command::Stats => {
            println!("path:       {}", cli.txdb.path.display());
            println!("disk usage: {}", db.disk_usage());
            println!("tx count:   {}", db.tx_count());
            match db.xref_key() {
                Some(marker) => println!("xref key:   {marker}"),
                None => println!("xref key:   none"),
            }
        }
        Command::Keys => {
            for id in db.keys()? {
                println!("{id}");
            }
        }
        Command::Get { txid } => match db.get_transaction(&txid)? {
            Some(bytes) => println!("{}", hex::encode(bytes)),
            None => eyre::bail!("transaction {txid} not found"),
        },
        Command::Clear => {
            let count = db.tx_count();
            db.clear()?;
            info!(removed = count, "Cleared store");
        }
        Command::XrefClear => {
            db.remove_xref_key()?;
            info!("Removed xref marker");
        }
    }

    Ok(())
}
