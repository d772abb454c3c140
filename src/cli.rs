use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Ingest a product feed CSV into the similarity index
    Ingest {
        /// path to the feed CSV export
        file: PathBuf,

        /// Feed mapping name from config (defaults to ingest.default_feed)
        #[clap(short, long)]
        feed: Option<String>,
    },

    /// Search products by natural-language need
    Search {
        /// query words
        #[clap(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Only print the number of matches
        #[clap(short, long, default_value = "false")]
        count: bool,
    },

    /// Print the search archive
    Archive {},

    /// Start the HTTP search service
    Daemon {
        /// Address to listen on
        #[clap(long, default_value = "0.0.0.0:8000")]
        addr: String,
    },
}
