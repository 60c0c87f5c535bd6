//! Behaviour every session store backend must share

use palaver::session::{Message, MessageStatus};
use palaver::storage::{JsonFileStore, MemoryStore, SessionStore, SqliteStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn backends() -> (Vec<Arc<dyn SessionStore>>, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let stores: Vec<Arc<dyn SessionStore>> = vec![
        Arc::new(JsonFileStore::new(tmp.path().join("chats"))),
        Arc::new(
            SqliteStore::new_with_path(tmp.path().join("sessions.db"))
                .expect("failed to open sqlite store"),
        ),
        Arc::new(MemoryStore::new()),
    ];
    (stores, tmp)
}

fn conversation() -> Vec<Message> {
    vec![
        Message::user("What is a monad?", "llama3.2"),
        Message::assistant("A monoid in the category", "llama3.2")
            .with_status(MessageStatus::Stopped),
    ]
}

#[tokio::test]
async fn test_round_trip_preserves_title_and_message_order() {
    let (stores, _tmp) = backends();
    for store in stores {
        let messages = conversation();
        store.save("chat-rt", "Monads", &messages).await.unwrap();

        let loaded = store.get("chat-rt").await.unwrap();
        assert_eq!(loaded.title, "Monads", "backend {}", store.backend_name());
        assert_eq!(loaded.messages, messages, "backend {}", store.backend_name());
    }
}

#[tokio::test]
async fn test_created_at_is_preserved_and_updated_at_never_precedes_it() {
    let (stores, _tmp) = backends();
    for store in stores {
        let first = store.save("chat-ts", "New Chat", &[]).await.unwrap();
        assert_eq!(first.created_at, first.updated_at);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.save("chat-ts", "Renamed", &conversation()).await.unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= second.created_at);
        assert!(second.updated_at >= first.updated_at);
    }
}

#[tokio::test]
async fn test_save_overwrites_messages() {
    let (stores, _tmp) = backends();
    for store in stores {
        store.save("chat-ow", "t", &conversation()).await.unwrap();
        store
            .save("chat-ow", "t", &[Message::user("only", "m")])
            .await
            .unwrap();
        let loaded = store.get("chat-ow").await.unwrap();
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].content, "only");
    }
}

#[tokio::test]
async fn test_list_is_most_recent_first_without_bodies() {
    let (stores, _tmp) = backends();
    for store in stores {
        store.save("chat-a", "A", &conversation()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.save("chat-b", "B", &[]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.save("chat-a", "A again", &conversation()).await.unwrap();

        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["chat-a", "chat-b"], "backend {}", store.backend_name());
    }
}

#[tokio::test]
async fn test_delete_twice_is_not_found_both_times_after_first() {
    let (stores, _tmp) = backends();
    for store in stores {
        store.save("chat-del", "t", &[]).await.unwrap();
        store.delete("chat-del").await.unwrap();

        let again = store.delete("chat-del").await;
        let third = store.delete("chat-del").await;
        assert_eq!(again, Err(StoreError::NotFound("chat-del".into())));
        assert_eq!(again, third);
        assert!(store.get("chat-del").await.unwrap_err().is_not_found());
    }
}

#[tokio::test]
async fn test_invalid_ids_are_rejected() {
    let (stores, _tmp) = backends();
    for store in stores {
        for id in ["../escape", "a/b", "", "spaces here"] {
            assert_eq!(
                store.save(id, "t", &[]).await,
                Err(StoreError::InvalidId(id.to_string()))
            );
        }
    }
}

#[tokio::test]
async fn test_concurrent_saves_to_different_ids_are_independent() {
    let (stores, _tmp) = backends();
    for store in stores {
        let mut tasks = Vec::new();
        for n in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let id = format!("chat-{}", n);
                let messages = vec![Message::user(format!("message {}", n), "m")];
                store.save(&id, &format!("Title {}", n), &messages).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        for n in 0..8 {
            let loaded = store.get(&format!("chat-{}", n)).await.unwrap();
            assert_eq!(loaded.title, format!("Title {}", n));
            assert_eq!(loaded.messages[0].content, format!("message {}", n));
        }
        assert_eq!(store.list().await.unwrap().len(), 8);
    }
}
