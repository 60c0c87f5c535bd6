//! Special commands parser for interactive chat
//!
//! Lines starting with `/` manage sessions instead of being sent to the
//! model. Command names are case-insensitive; arguments are kept as typed.

use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command was given an argument it does not take
    #[error("Unsupported argument for {command}: {arg}\n\nType '/help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Commands understood by the chat REPL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Start a new, empty session
    NewSession,
    /// List stored sessions
    ListSessions,
    /// Make another session active
    SwitchSession(String),
    /// Rename the active session
    Rename(String),
    /// Delete a session, the active one when no id is given
    Delete(Option<String>),
    /// Print the active session's transcript
    History,
    /// Use a different model for new turns
    SwitchModel(String),
    /// List models the backend can serve
    ListModels,
    Help,
    Exit,
    /// Not a special command; send the input as a turn
    None,
}

/// Parse one line of REPL input
///
/// # Errors
///
/// Returns [`CommandError`] for unknown commands and bad arguments.
///
/// # Examples
///
/// ```
/// use palaver::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(
///     parse_special_command("/rename Weekend plans").unwrap(),
///     SpecialCommand::Rename("Weekend plans".to_string())
/// );
/// assert_eq!(parse_special_command("hello").unwrap(), SpecialCommand::None);
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();

    match trimmed.to_lowercase().as_str() {
        "exit" | "quit" => return Ok(SpecialCommand::Exit),
        _ => {}
    }

    if !trimmed.starts_with('/') {
        return Ok(SpecialCommand::None);
    }

    let (command, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((command, arg)) => (command.to_lowercase(), Some(arg.trim()).filter(|a| !a.is_empty())),
        None => (trimmed.to_lowercase(), None),
    };

    let no_arg = |cmd: SpecialCommand| match arg {
        Some(arg) => Err(CommandError::UnsupportedArgument {
            command: command.clone(),
            arg: arg.to_string(),
        }),
        None => Ok(cmd),
    };
    let required = |usage: &str| {
        arg.map(str::to_string)
            .ok_or_else(|| CommandError::MissingArgument {
                command: command.clone(),
                usage: usage.to_string(),
            })
    };

    match command.as_str() {
        "/new" => no_arg(SpecialCommand::NewSession),
        "/list" | "/sessions" => no_arg(SpecialCommand::ListSessions),
        "/switch" | "/open" => Ok(SpecialCommand::SwitchSession(required("/switch <id>")?)),
        "/rename" | "/title" => Ok(SpecialCommand::Rename(required("/rename <title>")?)),
        "/delete" | "/rm" => Ok(SpecialCommand::Delete(arg.map(str::to_string))),
        "/history" => no_arg(SpecialCommand::History),
        "/model" => Ok(SpecialCommand::SwitchModel(required("/model <name>")?)),
        "/models" => no_arg(SpecialCommand::ListModels),
        "/help" | "/?" => no_arg(SpecialCommand::Help),
        "/exit" | "/quit" => no_arg(SpecialCommand::Exit),
        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

/// Print REPL help
pub fn print_help() {
    println!(
        r#"
Special Commands for Interactive Chat
=====================================

SESSIONS:
  /new              - Start a new session
  /list             - List stored sessions (most recent first)
  /switch <id>      - Switch to another session
  /rename <title>   - Rename the active session
  /delete [id]      - Delete a session (the active one by default)
  /history          - Print the active session's transcript

MODELS:
  /models           - List models available from the backend
  /model <name>     - Use a different model for new turns

SESSION CONTROL:
  Ctrl-C            - Stop the reply that is streaming
  /help, /?         - Show this help message
  /exit, exit, quit - Leave the chat

NOTES:
  - Command names are case-insensitive
  - Anything not starting with / is sent to the model
  - Stopped and failed replies stay in history, marked as such
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(
            parse_special_command("what is rust?").unwrap(),
            SpecialCommand::None
        );
    }

    #[test]
    fn test_exit_aliases() {
        for input in ["exit", "QUIT", "/exit", "/quit"] {
            assert_eq!(parse_special_command(input).unwrap(), SpecialCommand::Exit);
        }
    }

    #[test]
    fn test_session_commands() {
        assert_eq!(
            parse_special_command("/NEW").unwrap(),
            SpecialCommand::NewSession
        );
        assert_eq!(
            parse_special_command("/list").unwrap(),
            SpecialCommand::ListSessions
        );
        assert_eq!(
            parse_special_command("/switch chat-01ABC").unwrap(),
            SpecialCommand::SwitchSession("chat-01ABC".to_string())
        );
        assert_eq!(
            parse_special_command("/delete").unwrap(),
            SpecialCommand::Delete(None)
        );
        assert_eq!(
            parse_special_command("/rm chat-1").unwrap(),
            SpecialCommand::Delete(Some("chat-1".to_string()))
        );
    }

    #[test]
    fn test_rename_keeps_argument_case_and_spaces() {
        assert_eq!(
            parse_special_command("/rename   Trip to Lisbon  ").unwrap(),
            SpecialCommand::Rename("Trip to Lisbon".to_string())
        );
    }

    #[test]
    fn test_missing_argument() {
        let err = parse_special_command("/switch").unwrap_err();
        assert_eq!(
            err,
            CommandError::MissingArgument {
                command: "/switch".to_string(),
                usage: "/switch <id>".to_string()
            }
        );
        assert!(parse_special_command("/model").is_err());
    }

    #[test]
    fn test_unsupported_argument() {
        assert!(matches!(
            parse_special_command("/new now"),
            Err(CommandError::UnsupportedArgument { .. })
        ));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse_special_command("/frobnicate"),
            Err(CommandError::UnknownCommand("/frobnicate".to_string()))
        );
    }

    #[test]
    fn test_model_commands() {
        assert_eq!(
            parse_special_command("/model llama3.2:latest").unwrap(),
            SpecialCommand::SwitchModel("llama3.2:latest".to_string())
        );
        assert_eq!(
            parse_special_command("/models").unwrap(),
            SpecialCommand::ListModels
        );
    }
}
