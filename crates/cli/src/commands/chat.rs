//! `reasonflow chat`: Interactive or single-message chat mode.

use futures::StreamExt;
use reasonflow_agent::{DeltaChunk, EventKind, ReasoningLoop, coalesce};
use reasonflow_config::AppConfig;
use reasonflow_core::message::{Conversation, Message};
use std::io::Write;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Local providers need no key; everything else does.
    if !config.has_api_key() && config.default_provider != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    OPENROUTER_API_KEY=sk-or-v1-...   (recommended)");
        eprintln!("    OPENAI_API_KEY=sk-...             (for OpenAI direct)");
        eprintln!("    REASONFLOW_API_KEY=sk-...         (generic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_path().display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let router = reasonflow_providers::build_from_config(&config)?;
    let provider = router
        .default_provider()
        .ok_or_else(|| format!("Provider '{}' is not configured", config.default_provider))?;
    let tools = reasonflow_tools::default_registry(&config.tools).map(Arc::new);
    let tool_names = tools
        .as_ref()
        .map(|t| t.names().join(", "))
        .unwrap_or_else(|| "none".into());

    let reasoning = ReasoningLoop::from_config(provider, tools, &config);
    tracing::debug!(
        provider = %config.default_provider,
        model = %config.default_model,
        max_iterations = reasoning.max_iterations(),
        "Chat session ready"
    );
    let min_flush_size = config.reasoning.min_flush_size;
    let mut conv = Conversation::new();

    if let Some(msg) = message {
        conv.push(Message::user(&msg));
        respond(&reasoning, &mut conv, min_flush_size).await?;
        return Ok(());
    }

    println!();
    println!("  reasonflow — interactive mode");
    println!();
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", config.default_model);
    println!("  Tools:     {tool_names}");
    println!("  Agent:     {}", config.identity.name);
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        conv.push(Message::user(line));
        println!();
        if let Err(e) = respond(&reasoning, &mut conv, min_flush_size).await {
            eprintln!("  [Error] {e}");
        }
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

/// Run one session and print its chunks as they arrive.
async fn respond(
    reasoning: &ReasoningLoop,
    conv: &mut Conversation,
    min_flush_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut printer = ChunkPrinter::default();
    let mut stdout = std::io::stdout();

    let mut chunks = coalesce(reasoning.run(conv), min_flush_size);
    while let Some(chunk) = chunks.next().await {
        printer.print(&mut stdout, &chunk?)?;
        stdout.flush()?;
    }
    printer.close(&mut stdout)?;
    Ok(())
}

/// Terminal rendering of delta chunks.
///
/// Thinking is dimmed behind a prefix, tool chunks get their own lines, and
/// answer text streams inline.
#[derive(Debug, Default)]
struct ChunkPrinter {
    in_thinking: bool,
    in_answer: bool,
}

impl ChunkPrinter {
    fn print(&mut self, out: &mut impl Write, chunk: &DeltaChunk) -> std::io::Result<()> {
        if chunk.tag != EventKind::Thinking {
            self.end_thinking(out)?;
        }

        match chunk.tag {
            EventKind::Thinking => {
                if !self.in_thinking {
                    write!(out, "{DIM}  [thinking] ")?;
                    self.in_thinking = true;
                }
                write!(out, "{}", chunk.content)?;
                if chunk.finished {
                    self.end_thinking(out)?;
                }
            }
            EventKind::Tool => writeln!(out, "  [tool] {}", chunk.content)?,
            // Streaming tools repeat their whole output per partial
            EventKind::ToolResponse if chunk.finished => {
                writeln!(out, "  [tool output] {}", chunk.content)?
            }
            EventKind::ToolResponse => {}
            EventKind::ToolError => writeln!(out, "  [tool error] {}", chunk.content)?,
            EventKind::Answer => {
                if !self.in_answer {
                    write!(out, "  Assistant > ")?;
                    self.in_answer = true;
                }
                write!(out, "{}", chunk.content)?;
                if chunk.finished {
                    writeln!(out)?;
                    self.in_answer = false;
                }
            }
            EventKind::Error => writeln!(out, "  [error] {}", chunk.content)?,
        }
        Ok(())
    }

    fn end_thinking(&mut self, out: &mut impl Write) -> std::io::Result<()> {
        if self.in_thinking {
            writeln!(out, "{RESET}")?;
            self.in_thinking = false;
        }
        Ok(())
    }

    fn close(&mut self, out: &mut impl Write) -> std::io::Result<()> {
        self.end_thinking(out)?;
        if self.in_answer {
            writeln!(out)?;
            self.in_answer = false;
        }
        Ok(())
    }
}
