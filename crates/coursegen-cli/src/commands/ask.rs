use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use console::style;
use coursegen::sse::encode_chunks;
use coursegen::{CancellationToken, GenerationRequest, Generator, StreamChunk};
use futures::StreamExt;
use tracing::{info, warn};

/// How the answer is written to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Wait for the whole answer
    Whole,
    /// Print content as it arrives
    Stream,
    /// Print the raw server-sent events
    Sse,
}

pub struct AskOptions {
    pub query: String,
    pub history: Option<PathBuf>,
    pub mode: OutputMode,
}

fn read_history(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file {}", path.display()))
}

/// Cancel the token on Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling generation");
            token.cancel();
        }
    });
    cancel
}

fn print_sources(sources: &[String]) {
    if sources.is_empty() {
        return;
    }
    println!("\n{}", style("Sources").green().bold());
    for source in sources {
        println!("  - {}", source);
    }
}

pub async fn handle_ask(options: AskOptions) -> Result<()> {
    let history = options.history.as_deref().map(read_history).transpose()?;
    let generator = Generator::from_env()?;
    info!(
        model = %generator.provider().get_model_config().model_name,
        "answering query"
    );

    let mut request = GenerationRequest::new(&options.query);
    if let Some(history) = history.as_deref() {
        request = request.with_history(history);
    }
    let cancel = cancel_on_interrupt();

    match options.mode {
        OutputMode::Whole => {
            let answer = generator.generate(request, cancel).await?;
            println!("{}", answer.text);
            print_sources(&answer.sources);
        }
        OutputMode::Stream => {
            let mut chunks = generator.generate_stream(request, cancel);
            let mut stdout = std::io::stdout();
            while let Some(chunk) = chunks.next().await {
                match chunk? {
                    StreamChunk::Content { content } => {
                        write!(stdout, "{}", content)?;
                        stdout.flush()?;
                    }
                    StreamChunk::Sources { sources } => {
                        println!();
                        print_sources(&sources);
                    }
                    StreamChunk::Cancelled => {
                        println!("\n{}", style("(cancelled)").yellow());
                    }
                }
            }
            println!();
        }
        OutputMode::Sse => {
            let mut events = encode_chunks(generator.generate_stream(request, cancel));
            while let Some(event) = events.next().await {
                print!("{}", event);
            }
        }
    }

    Ok(())
}
