/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `serve`: HTTP backend over the configured store and Ollama host
- `chat`: Interactive chat REPL driven by a session orchestrator
- `sessions`: List, show and delete stored sessions
- `models`: List models offered by the Ollama host
*/

use crate::config::Config;
use crate::error::{PalaverError, Result};
use crate::gateway::{ModelGateway, OllamaGateway};
use crate::storage::{open_store, SessionStore};
use crate::transport::{RemoteGateway, RemoteStore};
use std::sync::Arc;

// Special commands parser for the chat REPL
pub mod special_commands;

// Model listing
pub mod models;

// Session inspection
pub mod sessions;

/// Store and gateway for a command, local or through a remote backend
///
/// `backend_url` wins when set; otherwise the configured store and Ollama
/// host are used directly.
pub fn build_backends(
    config: &Config,
) -> Result<(Arc<dyn SessionStore>, Arc<dyn ModelGateway>)> {
    match &config.chat.backend_url {
        Some(url) => {
            tracing::info!(backend = %url, "Using remote backend");
            Ok((
                Arc::new(RemoteStore::new(url)?),
                Arc::new(RemoteGateway::new(url)?),
            ))
        }
        None => Ok((
            open_store(&config.storage)?,
            Arc::new(OllamaGateway::new(&config.ollama)?),
        )),
    }
}

// HTTP backend command handler
pub mod serve {
    //! `palaver serve`
    //!
    //! Binds the configured address and serves the streaming and session
    //! endpoints until Ctrl-C.

    use super::*;
    use crate::transport::{build_router, serve, AppState};
    use tokio::net::TcpListener;

    /// Run the HTTP backend until interrupted
    pub async fn run_serve(config: Config) -> Result<()> {
        let addr = config.server.socket_addr()?;
        let store = open_store(&config.storage)?;
        let gateway: Arc<dyn ModelGateway> = Arc::new(OllamaGateway::new(&config.ollama)?);

        let health = gateway.health().await;
        if let Some(error) = &health.error {
            tracing::warn!("Ollama is not reachable yet: {}", error);
        }

        let router = build_router(AppState::new(store, gateway), &config.server);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| PalaverError::Config(format!("Cannot bind {}: {}", addr, e)))?;

        serve(listener, router, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await
    }
}

// Chat command handler
pub mod chat {
    //! Interactive chat REPL.
    //!
    //! Builds a [`SessionOrchestrator`] over the configured store and
    //! gateway and runs a readline loop. Input is sent as a turn; replies
    //! stream to the terminal as they arrive. Ctrl-C while a reply is
    //! streaming stops it and keeps the partial text.

    use super::special_commands::{parse_special_command, print_help, SpecialCommand};
    use super::*;
    use crate::orchestrator::{
        OrchestratorEvent, OrchestratorSettings, PinnedViewport, SendOutcome, SessionOrchestrator,
        TurnOutcome,
    };
    use colored::Colorize;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;
    use std::io::Write;
    use std::time::Duration;
    use tokio::sync::broadcast;

    /// Start the interactive chat
    pub async fn run_chat(config: Config, resume: Option<String>) -> Result<()> {
        tracing::info!("Starting interactive chat");

        let (store, gateway) = build_backends(&config)?;
        let orchestrator = SessionOrchestrator::new(
            store,
            Arc::clone(&gateway),
            Arc::new(PinnedViewport),
            OrchestratorSettings::from(&config),
        );
        let mut model = config.ollama.model.clone();

        let Some(active) = orchestrator.initialize(resume.as_deref()).await? else {
            return Ok(());
        };

        let mut rl = DefaultEditor::new()
            .map_err(|e| PalaverError::Config(format!("Cannot start line editor: {}", e)))?;

        print_welcome_banner(&model);
        if let Some(session) = orchestrator.session(&active) {
            println!("Session: {} ({})\n", session.title.bold(), session.id.dimmed());
        }

        loop {
            match rl.readline(&format!("{} ", ">".green().bold())) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(trimmed);

                    let command = match parse_special_command(trimmed) {
                        Ok(command) => command,
                        Err(e) => {
                            eprintln!("{}", e.to_string().red());
                            continue;
                        }
                    };

                    match command {
                        SpecialCommand::None => {
                            if let Err(e) = run_turn(&orchestrator, trimmed, &model).await {
                                eprintln!("{} {}\n", "Error:".red(), e);
                            }
                        }
                        SpecialCommand::Exit => break,
                        SpecialCommand::Help => print_help(),
                        SpecialCommand::SwitchModel(name) => {
                            println!("Using model {}\n", name.cyan());
                            model = name;
                        }
                        other => {
                            if let Err(e) = handle_command(&orchestrator, gateway.as_ref(), other).await {
                                eprintln!("{} {}\n", "Error:".red(), e);
                            }
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("CTRL-C");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    println!("CTRL-D");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {:?}", err);
                    break;
                }
            }
        }

        let flush = Duration::from_secs(config.chat.flush_timeout_seconds);
        if tokio::time::timeout(flush, orchestrator.shutdown()).await.is_err() {
            tracing::warn!("Timed out waiting for pending saves");
        }

        println!("Goodbye!");
        Ok(())
    }

    /// Send one turn and print its reply as it streams
    async fn run_turn(orchestrator: &SessionOrchestrator, input: &str, model: &str) -> Result<()> {
        let mut events = orchestrator.subscribe();
        let handle = match orchestrator.send_turn(input, model)? {
            SendOutcome::Started(handle) => handle,
            SendOutcome::Rejected => {
                println!("{}", "A reply is still streaming for this session.".yellow());
                return Ok(());
            }
        };
        let session_id = handle.session_id().to_string();

        println!();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(OrchestratorEvent::Delta { session_id: id, text, .. }) if id == session_id => {
                        print!("{}", text);
                        let _ = std::io::stdout().flush();
                    }
                    Ok(OrchestratorEvent::TurnFinished { session_id: id, outcome }) if id == session_id => {
                        print_outcome(&outcome);
                        break;
                    }
                    Ok(OrchestratorEvent::SaveFailed { reason, .. }) => {
                        tracing::warn!("Save failed, will retry on next save: {}", reason);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Event feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    orchestrator.cancel_turn(&session_id);
                }
            }
        }

        handle.wait().await;
        Ok(())
    }

    fn print_outcome(outcome: &TurnOutcome) {
        match outcome {
            TurnOutcome::Completed => println!("\n"),
            TurnOutcome::Cancelled => println!(" {}\n", "[stopped]".yellow()),
            TurnOutcome::Errored(reason) => println!("\n{} {}\n", "Error:".red(), reason),
        }
    }

    async fn handle_command(
        orchestrator: &SessionOrchestrator,
        gateway: &dyn ModelGateway,
        command: SpecialCommand,
    ) -> Result<()> {
        match command {
            SpecialCommand::NewSession => {
                let id = orchestrator.new_session().await?;
                println!("Started session {}\n", id.cyan());
            }
            SpecialCommand::ListSessions => {
                let sessions = orchestrator.list_sessions().await?;
                super::sessions::print_session_table(&sessions);
            }
            SpecialCommand::SwitchSession(id) => {
                orchestrator.switch_session(&id).await?;
                if let Some(session) = orchestrator.active_session() {
                    println!("Switched to {}\n", session.title.bold());
                }
            }
            SpecialCommand::Rename(title) => {
                let id = orchestrator
                    .active_session_id()
                    .ok_or_else(|| PalaverError::Validation("No active session".to_string()))?;
                orchestrator.rename_session(&id, &title).await?;
                println!("Renamed to {}\n", title.bold());
            }
            SpecialCommand::Delete(id) => {
                let id = match id.or_else(|| orchestrator.active_session_id()) {
                    Some(id) => id,
                    None => return Ok(()),
                };
                orchestrator.delete_session(&id).await?;
                println!("{}", format!("Deleted session {}", id).green());
                if let Some(session) = orchestrator.active_session() {
                    println!("Now in {} ({})\n", session.title.bold(), session.id.dimmed());
                }
            }
            SpecialCommand::History => {
                if let Some(session) = orchestrator.active_session() {
                    super::sessions::print_transcript(&session);
                }
            }
            SpecialCommand::ListModels => {
                let models = gateway.list_models().await?;
                super::models::print_models(&models, "backend", false)?;
            }
            SpecialCommand::SwitchModel(_)
            | SpecialCommand::Help
            | SpecialCommand::Exit
            | SpecialCommand::None => {}
        }
        Ok(())
    }

    /// Display welcome banner at the start of the chat
    fn print_welcome_banner(model: &str) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║               Palaver Interactive Chat - Welcome!            ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");
        println!("Model: {}", model.cyan());
        println!("Type '/help' for available commands, 'exit' to quit\n");
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::storage::MemoryStore;
        use crate::test_utils::ScriptedGateway;

        fn orchestrator() -> SessionOrchestrator {
            SessionOrchestrator::new(
                Arc::new(MemoryStore::new()),
                Arc::new(ScriptedGateway::hello()),
                Arc::new(PinnedViewport),
                OrchestratorSettings::default(),
            )
        }

        #[tokio::test]
        async fn test_run_turn_streams_and_returns() {
            let orchestrator = orchestrator();
            orchestrator.initialize(None).await.unwrap();
            run_turn(&orchestrator, "hello", "m").await.unwrap();

            let session = orchestrator.active_session().unwrap();
            assert_eq!(session.messages.len(), 2);
            assert_eq!(session.messages[1].content, "Hello");
        }

        #[tokio::test]
        async fn test_handle_rename_and_delete() {
            let orchestrator = orchestrator();
            let gateway = ScriptedGateway::hello();
            let first = orchestrator.initialize(None).await.unwrap().unwrap();

            handle_command(&orchestrator, &gateway, SpecialCommand::Rename("Plans".into()))
                .await
                .unwrap();
            assert_eq!(orchestrator.active_session().unwrap().title, "Plans");

            handle_command(&orchestrator, &gateway, SpecialCommand::Delete(None))
                .await
                .unwrap();
            let replacement = orchestrator.active_session_id().unwrap();
            assert_ne!(replacement, first);
        }

        #[tokio::test]
        async fn test_switch_to_unknown_session_fails() {
            let orchestrator = orchestrator();
            let gateway = ScriptedGateway::hello();
            orchestrator.initialize(None).await.unwrap();
            assert!(handle_command(
                &orchestrator,
                &gateway,
                SpecialCommand::SwitchSession("missing".into())
            )
            .await
            .is_err());
        }

        #[test]
        fn test_build_backends_remote() {
            let mut config = Config::default();
            config.chat.backend_url = Some("http://127.0.0.1:8000".into());
            let (store, _) = build_backends(&config).unwrap();
            assert_eq!(store.backend_name(), "remote");
        }
    }
}
