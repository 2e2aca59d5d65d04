use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod logging;

use commands::ask::{handle_ask, AskOptions, OutputMode};
use logging::setup_logging;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a question about the course materials
    #[command(about = "Ask a question about the course materials")]
    Ask {
        /// The question to answer
        query: String,

        /// File holding the prior conversation
        #[arg(
            long,
            value_name = "FILE",
            help = "File holding the prior conversation",
            long_help = "Path to a text file with earlier turns of the conversation. It is appended to the system prompt."
        )]
        history: Option<PathBuf>,

        /// Print the answer as it is generated
        #[arg(long, help = "Print the answer as it is generated")]
        stream: bool,

        /// Print the streamed answer as server-sent events
        #[arg(
            long,
            help = "Print the streamed answer as server-sent events",
            conflicts_with = "stream"
        )]
        sse: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Ask {
            query,
            history,
            stream,
            sse,
        }) => {
            setup_logging()?;
            let mode = if sse {
                OutputMode::Sse
            } else if stream {
                OutputMode::Stream
            } else {
                OutputMode::Whole
            };
            handle_ask(AskOptions {
                query,
                history,
                mode,
            })
            .await?;
        }
        None => {
            Cli::command().print_help()?;
            println!();
        }
    }
    Ok(())
}
