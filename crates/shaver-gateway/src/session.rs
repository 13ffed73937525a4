use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shaver_types::events::{ChatCommand, ChatEvent};
use shaver_types::roles::Action;

use crate::error::ChatError;
use crate::identity::{Identity, IdentityVerifier};
use crate::registry::ConnectionId;
use crate::service::ChatService;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

/// Close code sent to the connections of a member who was just removed.
pub const CLOSE_REMOVED: u16 = 4003;
const CLOSE_GOING_AWAY: u16 = 1001;

/// Lifecycle of one group connection. Moves strictly forward; any state may
/// jump to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Active,
    Closed,
}

impl SessionState {
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticated) | (Authenticated, Active) | (Connecting | Authenticated | Active, Closed)
        )
    }
}

struct Session {
    id: Uuid,
    state: SessionState,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Connecting,
        }
    }

    fn advance(&mut self, next: SessionState) {
        if self.state.can_advance_to(next) {
            debug!("Session {}: {:?} -> {:?}", self.id, self.state, next);
            self.state = next;
        } else {
            warn!("Session {}: ignoring {:?} -> {:?}", self.id, self.state, next);
        }
    }
}

/// Serve one WebSocket connection to `group_id`.
///
/// The token is checked first, then membership. On failure the socket is
/// closed with the error's close code (4001 unauthenticated, 4003 not a
/// member, 4004 unknown group) before any group event is sent.
pub async fn handle_connection(
    socket: WebSocket,
    service: ChatService,
    verifier: Arc<dyn IdentityVerifier>,
    group_id: Uuid,
    token: Option<String>,
) {
    let mut session = Session::new();
    let (mut sender, receiver) = socket.split();

    let identity = match token
        .as_deref()
        .ok_or(ChatError::Unauthenticated)
        .and_then(|t| verifier.verify(t))
    {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Rejected connection to group {}: {}", group_id, e);
            session.advance(SessionState::Closed);
            close_with(&mut sender, e.close_code(), &e.public_message()).await;
            return;
        }
    };
    session.advance(SessionState::Authenticated);

    if let Err(e) = service
        .authority()
        .require(identity.user_id, group_id, Action::PostMessage, None)
        .await
    {
        warn!(
            "{} ({}) refused on group {}: {}",
            identity.username, identity.user_id, group_id, e
        );
        session.advance(SessionState::Closed);
        close_with(&mut sender, e.close_code(), &e.public_message()).await;
        return;
    }

    let registry = service.registry().clone();
    let already_online = registry
        .online_users(group_id)
        .await
        .contains(&identity.user_id);
    let (conn_id, rx) = match registry.register(group_id, identity.user_id).await {
        Ok(registered) => registered,
        Err(e) => {
            session.advance(SessionState::Closed);
            close_with(&mut sender, e.close_code(), &e.public_message()).await;
            return;
        }
    };

    // A removal that landed between the check above and register() found no
    // connection to evict. Membership rows are deleted before eviction, so
    // reading them again after registering closes that window.
    let role = match service.authority().role_of(identity.user_id, group_id).await {
        Ok(Some(role)) => role,
        Ok(None) => {
            registry.unregister(group_id, conn_id).await;
            warn!(
                "{} ({}) was removed from group {} while connecting",
                identity.username, identity.user_id, group_id
            );
            session.advance(SessionState::Closed);
            close_with(&mut sender, CLOSE_REMOVED, "removed from group").await;
            return;
        }
        Err(e) => {
            registry.unregister(group_id, conn_id).await;
            session.advance(SessionState::Closed);
            close_with(&mut sender, e.close_code(), &e.public_message()).await;
            return;
        }
    };
    session.advance(SessionState::Active);
    info!(
        "{} ({}) connected to group {} as {}",
        identity.username,
        identity.user_id,
        group_id,
        role.as_str()
    );

    let ready = ChatEvent::Ready {
        group_id,
        user_id: identity.user_id,
        username: identity.username.clone(),
        role,
        online_users: registry.online_users(group_id).await,
    };
    registry.send_to(group_id, conn_id, ready).await;
    if !already_online {
        registry
            .broadcast(
                group_id,
                ChatEvent::UserJoined {
                    group_id,
                    user_id: identity.user_id,
                    username: identity.username.clone(),
                },
                Some(conn_id),
            )
            .await;
    }

    run_connection_loop(sender, receiver, rx, &service, &identity, group_id, conn_id).await;

    let last = registry.unregister(group_id, conn_id).await;
    if last {
        registry
            .broadcast(
                group_id,
                ChatEvent::UserLeft {
                    group_id,
                    user_id: identity.user_id,
                    username: identity.username.clone(),
                },
                None,
            )
            .await;
    }
    session.advance(SessionState::Closed);
    info!(
        "{} ({}) disconnected from group {}",
        identity.username, identity.user_id, group_id
    );
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: mpsc::UnboundedReceiver<ChatEvent>,
    service: &ChatService,
    identity: &Identity,
    group_id: Uuid,
    conn_id: ConnectionId,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Outbound: queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;
        let mut removed = false;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else {
                        // Queue dropped by the registry: removal or shutdown.
                        let (code, reason) = if removed {
                            (CLOSE_REMOVED, "removed from group")
                        } else {
                            (CLOSE_GOING_AWAY, "server shutting down")
                        };
                        close_with(&mut sender, code, reason).await;
                        break;
                    };
                    removed |= matches!(event, ChatEvent::Removed { .. });

                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to serialize event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= MAX_MISSED_PONGS {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Inbound: client commands -> service
    let service_recv = service.clone();
    let identity_recv = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let result = match serde_json::from_str::<ChatCommand>(&text) {
                        Ok(cmd) => {
                            handle_command(&service_recv, &identity_recv, group_id, conn_id, cmd).await
                        }
                        Err(e) => {
                            warn!(
                                "{} ({}) bad command: {} -- raw: {}",
                                identity_recv.username,
                                identity_recv.user_id,
                                e,
                                truncate(&text, 200)
                            );
                            Err(ChatError::validation(format!("unrecognised command: {}", e)))
                        }
                    };
                    if let Err(e) = result {
                        report(&service_recv, group_id, conn_id, &e).await;
                    }
                }
                Message::Binary(_) => {
                    let e = ChatError::validation("binary frames are not supported");
                    report(&service_recv, group_id, conn_id, &e).await;
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                Message::Ping(_) => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn handle_command(
    service: &ChatService,
    identity: &Identity,
    group_id: Uuid,
    conn_id: ConnectionId,
    cmd: ChatCommand,
) -> Result<(), ChatError> {
    match cmd {
        ChatCommand::Typing { is_typing } => {
            service.typing(identity, group_id, is_typing, Some(conn_id)).await
        }
        cmd => {
            let Some((kind, body)) = cmd.into_post() else {
                return Ok(());
            };
            service.post_message(identity, group_id, kind, body).await?;
            Ok(())
        }
    }
}

/// Tell this connection (and only this one) that its command failed.
async fn report(service: &ChatService, group_id: Uuid, conn_id: ConnectionId, e: &ChatError) {
    if let ChatError::Internal(inner) = e {
        error!("Command failed in group {}: {:#}", group_id, inner);
    }
    let event = ChatEvent::Error {
        code: e.code().to_string(),
        message: e.public_message(),
    };
    service.registry().send_to(group_id, conn_id, event).await;
}

async fn close_with(sender: &mut SplitSink<WebSocket, Message>, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_only_move_forward() {
        use SessionState::*;
        assert!(Connecting.can_advance_to(Authenticated));
        assert!(Authenticated.can_advance_to(Active));
        assert!(!Connecting.can_advance_to(Active));
        assert!(!Active.can_advance_to(Authenticated));
        assert!(!Closed.can_advance_to(Active));
    }

    #[test]
    fn every_live_state_can_close() {
        use SessionState::*;
        for state in [Connecting, Authenticated, Active] {
            assert!(state.can_advance_to(Closed));
        }
        assert!(!Closed.can_advance_to(Closed));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 200), "hi");
    }
}
