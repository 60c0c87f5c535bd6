//! Session inspection commands

use crate::cli::SessionCommand;
use crate::config::Config;
use crate::error::{PalaverError, Result};
use crate::session::{ChatSession, MessageStatus, Role, SessionSummary};
use crate::storage::{open_store, SessionStore};
use chrono::{Local, TimeZone};
use colored::Colorize;
use prettytable::{format, Table};

/// Handle `palaver sessions ...`
pub async fn handle_sessions(config: &Config, command: SessionCommand) -> Result<()> {
    let store = open_store(&config.storage)?;
    run(store.as_ref(), command).await
}

async fn run(store: &dyn SessionStore, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::List { json } => {
            let sessions = store.list().await.map_err(PalaverError::from)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&sessions).map_err(PalaverError::Serialization)?
                );
                return Ok(());
            }
            print_session_table(&sessions);
        }
        SessionCommand::Show { id, json } => {
            let session = store.get(&id).await.map_err(PalaverError::from)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&session).map_err(PalaverError::Serialization)?
                );
                return Ok(());
            }
            print_transcript(&session);
        }
        SessionCommand::Delete { id } => {
            store.delete(&id).await.map_err(PalaverError::from)?;
            println!("{}", format!("Deleted session {}", id).green());
        }
    }

    Ok(())
}

/// Print summaries as a table, most recent first
pub fn print_session_table(sessions: &[SessionSummary]) {
    if sessions.is_empty() {
        println!("{}", "No sessions found.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Created".bold(),
        "Last Updated".bold()
    ]);

    for session in sessions {
        table.add_row(prettytable::row![
            session.id.cyan(),
            truncate(&session.title, 40),
            format_timestamp(session.created_at),
            format_timestamp(session.updated_at)
        ]);
    }

    println!();
    table.printstd();
    println!();
    println!(
        "Use {} to continue a session.",
        "palaver chat --resume <ID>".cyan()
    );
    println!();
}

/// Print a session's messages in order
pub fn print_transcript(session: &ChatSession) {
    println!("\n{} {}", session.title.bold(), format!("({})", session.id).dimmed());
    println!(
        "{}\n",
        format!(
            "created {}, updated {}",
            format_timestamp(session.created_at),
            format_timestamp(session.updated_at)
        )
        .dimmed()
    );

    for message in &session.messages {
        let who = match message.role {
            Role::User => "you".green().bold(),
            Role::Assistant => message.model_id.as_str().blue().bold(),
        };
        let marker = match message.status {
            MessageStatus::Complete => String::new(),
            MessageStatus::Stopped => format!(" {}", "[stopped]".yellow()),
            MessageStatus::Failed => format!(" {}", "[failed]".red()),
        };
        println!("{}{}: {}\n", who, marker, message.content);
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars - 3).collect();
    format!("{}...", kept)
}

/// Local time for a Unix millisecond timestamp
fn format_timestamp(millis: i64) -> String {
    match Local.timestamp_millis_opt(millis).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M").to_string(),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Message;
    use crate::storage::MemoryStore;

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("short", 40), "short");
        assert_eq!(truncate("ééééééééééé", 8), "ééééé...");
    }

    #[test]
    fn test_format_timestamp() {
        assert_ne!(format_timestamp(1_700_000_000_000), "-");
        assert_eq!(format_timestamp(i64::MAX), "-");
    }

    #[tokio::test]
    async fn test_delete_unknown_session_is_not_found() {
        let store = MemoryStore::new();
        let err = run(&store, SessionCommand::Delete { id: "nope".into() })
            .await
            .unwrap_err();
        assert!(matches!(
            crate::error::classify(&err),
            Some(PalaverError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_show_delete() {
        let store = MemoryStore::new();
        store
            .save("chat-1", "Greeting", &[Message::user("hi", "m")])
            .await
            .unwrap();

        run(&store, SessionCommand::List { json: false }).await.unwrap();
        run(&store, SessionCommand::List { json: true }).await.unwrap();
        run(
            &store,
            SessionCommand::Show {
                id: "chat-1".into(),
                json: false,
            },
        )
        .await
        .unwrap();
        run(&store, SessionCommand::Delete { id: "chat-1".into() })
            .await
            .unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
