#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use shaver_db::Database;
use shaver_db::models::FileRow;
use shaver_gateway::convert;
use shaver_gateway::identity::Identity;
use shaver_gateway::registry::Registry;
use shaver_gateway::service::ChatService;
use shaver_types::api::CreateGroupRequest;
use shaver_types::events::{ChatEvent, PostBody};
use shaver_types::models::{Group, Message, MessageKind};

pub struct Harness {
    pub db: Arc<Database>,
    pub service: ChatService,
}

pub fn harness() -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let service = ChatService::new(db.clone(), Registry::new(), Duration::from_secs(5));
    Harness { db, service }
}

impl Harness {
    /// Insert an account directly; password hashing is the API's concern.
    pub fn user(&self, name: &str) -> Identity {
        let id = Uuid::new_v4();
        self.db
            .create_user(
                &id.to_string(),
                name,
                &format!("{}@example.com", name),
                "not-a-real-hash",
                &convert::stamp(convert::now()),
            )
            .unwrap();
        Identity {
            user_id: id,
            username: name.to_string(),
        }
    }

    pub async fn group(&self, creator: &Identity, name: &str) -> Group {
        self.service
            .create_group(
                creator,
                CreateGroupRequest {
                    name: name.to_string(),
                    description: None,
                    is_private: false,
                },
            )
            .await
            .unwrap()
    }

    /// Current invite code, read the way an admin would see it.
    pub async fn code(&self, admin: &Identity, group_id: Uuid) -> String {
        self.service
            .group_for_member(admin.user_id, group_id)
            .await
            .unwrap()
            .invite_code
            .unwrap()
    }

    pub async fn join(&self, user: &Identity, admin: &Identity, group_id: Uuid) {
        let code = self.code(admin, group_id).await;
        self.service.join(user, &code).await.unwrap();
    }

    /// Record an upload row as the files API would, returning its id.
    pub fn upload(&self, uploader: &Identity, group_id: Uuid, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.db
            .insert_file(&FileRow {
                id: id.to_string(),
                group_id: group_id.to_string(),
                uploader_id: uploader.user_id.to_string(),
                name: name.to_string(),
                size: 5,
                sha256: "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824".into(),
                created_at: convert::stamp(convert::now()),
            })
            .unwrap();
        id
    }

    pub async fn say(&self, user: &Identity, group_id: Uuid, text: &str) -> Message {
        self.service
            .post_message(user, group_id, MessageKind::Text, text_body(text))
            .await
            .unwrap()
    }
}

pub fn text_body(text: &str) -> PostBody {
    PostBody {
        content: Some(text.to_string()),
        ..PostBody::default()
    }
}

/// Drain everything queued so far, keeping only user-posted messages.
pub fn posted(rx: &mut UnboundedReceiver<ChatEvent>) -> Vec<Message> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ChatEvent::NewMessage { message } = event {
            if message.message_type != MessageKind::System {
                out.push(message);
            }
        }
    }
    out
}
