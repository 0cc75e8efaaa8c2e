use std::io;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use bptreedb::cli::{self, Tree};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "bptreedb", version = VERSION, about = "Persistent B+ tree index.")]
struct Cli {
    /// File-name prefix for the two page files (`<prefix>tree.dat` / `<prefix>leaf.dat`).
    #[arg(long, env = "BPTREEDB_PREFIX", default_value = "bptreedb-")]
    prefix: PathBuf,
    /// Buffer pool capacity, per page file.
    #[arg(long, env = "BPTREEDB_CAPACITY", default_value = "64")]
    capacity: usize,
    /// Read a leading command count before the command stream, instead of reading until EOF.
    #[arg(long)]
    batch: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut tree: Tree = match Tree::open(&cli.prefix, cli.capacity) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("failed to open tree: {}", e);
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    let result = if cli.batch {
        cli::run_batch(&mut tree, stdin.lock(), stdout.lock())
    } else {
        cli::run_interactive(&mut tree, stdin.lock(), stdout.lock())
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = tree.close() {
        eprintln!("error closing tree: {}", e);
        std::process::exit(1);
    }
}
