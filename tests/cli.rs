//! Binary smoke tests

use assert_cmd::Command;
use palaver::session::Message;
use palaver::storage::{JsonFileStore, SessionStore};
use predicates::prelude::*;
use tempfile::TempDir;

fn palaver() -> Command {
    let mut cmd = Command::cargo_bin("palaver").unwrap();
    cmd.env_remove("PALAVER_STORAGE_BACKEND")
        .env_remove("PALAVER_STORAGE_PATH")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    palaver()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("sessions"))
        .stdout(predicate::str::contains("models"));
}

#[test]
fn test_sessions_list_json_on_empty_memory_store() {
    palaver()
        .args(["--storage-backend", "memory", "sessions", "list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("[]"));
}

#[test]
fn test_sessions_show_and_delete_against_json_store() {
    let tmp = TempDir::new().unwrap();
    let chats = tmp.path().join("chats");
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        JsonFileStore::new(chats.clone())
            .save("chat-cli", "From the CLI", &[Message::user("ping", "m")])
            .await
            .unwrap();
    });
    let path = chats.to_str().unwrap();

    palaver()
        .args(["--storage-backend", "json", "--storage-path", path])
        .args(["sessions", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("chat-cli"))
        .stdout(predicate::str::contains("From the CLI"));

    palaver()
        .args(["--storage-backend", "json", "--storage-path", path])
        .args(["sessions", "show", "chat-cli"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ping"));

    palaver()
        .args(["--storage-backend", "json", "--storage-path", path])
        .args(["sessions", "delete", "chat-cli"])
        .assert()
        .success();

    palaver()
        .args(["--storage-backend", "json", "--storage-path", path])
        .args(["sessions", "show", "chat-cli"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_unknown_storage_backend_is_rejected() {
    palaver()
        .args(["--storage-backend", "floppy", "sessions", "list"])
        .assert()
        .failure();
}
