//! veilbid CLI
//!
//! Usage:
//!   veilbid [--config node.json] demo [--rsa-bits N] [--closing-secs S] [--min-bid A] [--bid B]
//!   veilbid verify-ledger <ledger.json>
//!   veilbid wallet <wallet.json>

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use veilbid_ledger::{verify_chain, Block};
use veilbid_node::demo::{run_demo, DemoOptions};
use veilbid_node::{logging, NodeConfig};
use veilbid_tokens::TokenWallet;

#[derive(Parser)]
#[command(name = "veilbid")]
#[command(about = "Pseudonymous sealed-bid auctions over blind-signature tokens", long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = logging::DEFAULT_FILTER)]
    log: String,

    /// Node configuration file (JSON); flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a two-peer auction in process and print both settlements
    Demo {
        /// RSA modulus size for the authority, identities and auction keys
        #[arg(long)]
        rsa_bits: Option<usize>,

        /// Seconds until the auction closes
        #[arg(long, default_value = "3")]
        closing_secs: u64,

        #[arg(long, default_value = "100")]
        min_bid: u64,

        #[arg(long, default_value = "150")]
        bid: u64,
    },

    /// Check the hash chain of a ledger file
    VerifyLedger {
        path: PathBuf,
    },

    /// List the tokens held in a wallet file
    Wallet {
        path: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(&cli.log);

    match cli.command {
        Commands::Demo { rsa_bits, closing_secs, min_bid, bid } => {
            let mut node = match &cli.config {
                Some(path) => NodeConfig::load(path)?,
                None => DemoOptions::default().node,
            };
            if let Some(bits) = rsa_bits {
                node.rsa_bits = bits;
            }
            let report = run_demo(&DemoOptions { node, closing_in: Duration::from_secs(closing_secs), min_bid, bid })?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::VerifyLedger { path } => {
            let chain: Vec<Block> = serde_json::from_slice(&std::fs::read(&path)?)?;
            match verify_chain(&chain) {
                Ok(()) => {
                    let tip = chain.last().map_or("-", |b| b.block_hash.as_str());
                    println!("ok: {} blocks, tip {tip}", chain.len());
                }
                Err(fault) => {
                    println!("invalid: {fault}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Wallet { path } => {
            let wallet = TokenWallet::open(&path)?;
            println!("{} token(s)", wallet.len());
            for entry in wallet.entries() {
                println!("{}  issued {}", entry.token_id, entry.issued_at);
            }
        }
    }

    Ok(())
}
