use clap::{Parser, Subcommand};
use intbtree::{Error, FileStore, Tree};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(
    name = "intbtree",
    version = VERSION,
    about = "Point operations against a persistent, on-disk B-tree of int32 keys/values."
)]
struct Cli {
    /// Backing file to open or create.
    #[arg(long, env = "BTREE_PATH", default_value = "intbtree.db")]
    path: PathBuf,
    /// Branching order to bootstrap a new file with. Ignored if `path`
    /// already holds a tree — the order stored on disk always wins.
    #[arg(long, env = "BTREE_ORDER", default_value = "8")]
    order: i32,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Insert a key/value pair. Fails if the key already exists or either
    /// field is the reserved sentinel -1.
    Insert { key: i32, value: i32 },
    /// Look up a key; prints its value, or "not found".
    Search { key: i32 },
    /// Delete a key. A no-op if the key is absent.
    Delete { key: i32 },
    /// Walk the whole tree and verify its structural invariants.
    Check,
    /// Print a human-readable dump of the tree, for diagnostics.
    Display,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let mut tree: Tree<FileStore> = Tree::open(&cli.path, cli.order)?;

    match cli.command {
        Command::Insert { key, value } => {
            tree.insert(key, value)?;
            println!("inserted {} -> {}", key, value);
        }
        Command::Search { key } => match tree.search(key)? {
            Some(value) => println!("{}", value),
            None => println!("not found"),
        },
        Command::Delete { key } => {
            tree.delete(key)?;
            println!("deleted {}", key);
        }
        Command::Check => {
            tree.check()?;
            println!("ok");
        }
        Command::Display => {
            print!("{}", tree.display()?);
        }
    }
    Ok(())
}
