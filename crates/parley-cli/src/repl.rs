//! Interactive REPL over a [`ChatSession`].
//!
//! Uses `rustyline` for readline-style editing with persistent history. The
//! conversation started by the first message carries over to the next ones.

use anyhow::Result;
use colored::Colorize;
use rustyline::config::Configurer;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tracing::debug;

use parley_chat::ChatSession;

use crate::{exchange, helpers, ChatOptions};

/// Exit commands (case-insensitive match).
const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

/// Start a fresh conversation.
const NEW_COMMAND: &str = "/new";

/// Run the interactive REPL loop.
pub async fn run(session: ChatSession, mut options: ChatOptions) -> Result<()> {
    helpers::print_banner();
    let provider = session.provider().await;
    println!(
        "{}",
        format!("Provider: {} ({})", provider.name, provider.model).dimmed()
    );
    if options.use_tools {
        println!(
            "{}",
            format!("Tools: {}", session.tool_names().join(", ")).dimmed()
        );
    }
    println!(
        "{}",
        "Type a message, \"/new\" for a new conversation, or \"exit\" to quit.".dimmed()
    );
    println!();

    let mut editor = create_editor()?;

    loop {
        let input = match editor.readline("You: ") {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted) => break,
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }

        if is_exit_command(trimmed) {
            println!("\nGoodbye!");
            break;
        }

        let _ = editor.add_history_entry(&input);

        if trimmed.eq_ignore_ascii_case(NEW_COMMAND) {
            options.conversation = None;
            println!("{}", "Started a new conversation.".dimmed());
            continue;
        }

        debug!(conversation = ?options.conversation, input = trimmed, "processing input");
        if !options.stream {
            helpers::print_thinking();
        }
        let result = exchange(&session, trimmed, &options).await;
        if !options.stream {
            helpers::clear_thinking();
        }

        match result {
            Ok(conversation_id) => options.conversation = Some(conversation_id),
            Err(e) => eprintln!("\n{} {e:#}\n", "Error:".red().bold()),
        }
    }

    save_history(&mut editor);

    Ok(())
}

/// Create a rustyline editor with history.
fn create_editor() -> Result<Editor<(), DefaultHistory>> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;

    let history_path = history_path();
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
        debug!("loaded REPL history from {}", history_path.display());
    }

    Ok(editor)
}

/// Save history to disk.
fn save_history(editor: &mut Editor<(), DefaultHistory>) {
    let path = history_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = editor.save_history(&path) {
        debug!("failed to save history: {e}");
    }
}

/// Path to the history file.
fn history_path() -> std::path::PathBuf {
    parley_core::utils::get_data_path()
        .join("history")
        .join("cli_history")
}

/// Check if input is an exit command.
fn is_exit_command(input: &str) -> bool {
    let lower = input.to_lowercase();
    EXIT_COMMANDS.contains(&lower.as_str())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_commands() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("EXIT"));
        assert!(is_exit_command("/quit"));
        assert!(is_exit_command(":q"));
        assert!(!is_exit_command("hello"));
        assert!(!is_exit_command("/new"));
    }

    #[test]
    fn history_path_under_data_dir() {
        let path = history_path();
        assert!(path.to_string_lossy().contains(".parley"));
        assert!(path.to_string_lossy().contains("cli_history"));
    }
}
