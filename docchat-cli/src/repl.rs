//! Line-oriented question loop.

use docchat_core::{ChatMemory, IndexHandle, RagPipeline, RagResponse};
use std::io::{self, BufRead, Write};
use std::path::Path;

use crate::loader;

/// Answer a single question and exit.
pub async fn run_single_question(
    pipeline: &RagPipeline,
    handle: &IndexHandle,
    question: &str,
) -> anyhow::Result<()> {
    let mut memory = ChatMemory::new();
    let response = pipeline.ask(question, handle, &mut memory).await?;
    print_response(&response);
    Ok(())
}

/// Read questions from stdin until EOF or `exit`.
pub async fn run_interactive(
    pipeline: &RagPipeline,
    handle: &IndexHandle,
    data_dir: &Path,
) -> anyhow::Result<()> {
    println!("  Ask a question about your documents. Type /help for commands, exit to quit.\n");

    let mut memory = ChatMemory::new();
    let stdin = io::stdin();
    loop {
        print!("\x1b[1;34m> \x1b[0m");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input).is_err() || input.is_empty() {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "exit" | "quit" | "/quit" | "/exit" | "/q" => {
                println!("Goodbye!");
                break;
            }
            "/help" | "/?" => {
                println!("  /history   show this session's questions and answers");
                println!("  /rebuild   reload the data folder and rebuild the index");
                println!("  exit       leave");
            }
            "/history" => {
                if memory.is_empty() {
                    println!("  No questions yet.");
                } else {
                    println!("{}", memory.render_for_prompt(None));
                }
            }
            "/rebuild" => match rebuild(pipeline, handle, data_dir).await {
                Ok(chunks) => println!("  Index rebuilt: {chunks} chunks."),
                Err(e) => eprintln!("\x1b[31mRebuild failed:\x1b[0m {e:#}"),
            },
            question => match pipeline.ask(question, handle, &mut memory).await {
                Ok(response) => print_response(&response),
                Err(e) => eprintln!("\x1b[31mError:\x1b[0m {e}"),
            },
        }
    }
    Ok(())
}

async fn rebuild(
    pipeline: &RagPipeline,
    handle: &IndexHandle,
    data_dir: &Path,
) -> anyhow::Result<usize> {
    let documents = loader::load_documents(data_dir)?;
    let report = pipeline.rebuild(handle, &documents).await?;
    Ok(report.chunks)
}

fn print_response(response: &RagResponse) {
    println!("\n\x1b[32mAnswer:\x1b[0m {}\n", response.answer.trim());
    if !response.sources.is_empty() {
        println!("\x1b[90mSources:\x1b[0m");
        for (i, source) in response.sources.iter().enumerate() {
            println!(
                "\x1b[90m  [{}] {} ({}, score {:.2})\x1b[0m",
                i + 1,
                source.source_name,
                source.chunk_id,
                source.relevance_score
            );
        }
    }
    let stats = &response.retrieval_stats;
    tracing::debug!(
        queries = stats.queries_searched,
        candidates = stats.candidates,
        used = stats.chunks_used,
        elapsed_ms = stats.total_time_ms,
        "Answered"
    );
    println!();
}
