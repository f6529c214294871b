//! Delivery router: the persist-then-fan-out core.
//!
//! Every outbound operation is a short sequence over the store and the
//! connection registry: validate, persist, resolve live connections, emit.
//! A recipient with no live connections is not an error; the message waits
//! unread and is replayed when that user reconnects.

use std::collections::{BTreeSet, HashMap};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use courier_database::{conversation_id, ContentType, PrivateMessage, StoreError};
use courier_presence::ConnectionId;

use crate::error::GatewayResult;
use crate::events::{ClientEvent, ContactSummary, ServerEvent};
use crate::filter::apply_filter;
use crate::state::AppState;

/// Per-connection state: the verified identity, and the registry handle once
/// the client has joined. The identity is set at upgrade time and never
/// changes.
pub struct ConnectionContext {
    identity: String,
    connection_id: Option<ConnectionId>,
}

impl ConnectionContext {
    pub fn new(identity: String) -> Self {
        Self {
            identity,
            connection_id: None,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }
}

/// Dispatch one decoded client event.
pub async fn handle_client_event(
    event: ClientEvent,
    out_tx: &mpsc::Sender<ServerEvent>,
    state: &AppState,
    ctx: &mut ConnectionContext,
) -> GatewayResult<()> {
    match event {
        ClientEvent::Join { username } => handle_join(username, out_tx, state, ctx).await,
        ClientEvent::Send {
            to,
            from,
            content,
            content_type,
            file_name,
        } => handle_send(to, from, content, content_type, file_name, out_tx, state, ctx).await,
        ClientEvent::Edit {
            message_id,
            new_content,
        } => handle_edit(message_id, new_content, out_tx, state, ctx).await,
        ClientEvent::Delete { message_id } => {
            handle_delete(message_id, out_tx, state, ctx).await
        }
        ClientEvent::Typing { is_typing } => handle_typing(is_typing, out_tx, state, ctx).await,
        ClientEvent::Read { with } => handle_read(with, out_tx, state, ctx).await,
        ClientEvent::History { with, limit } => {
            handle_history(with, limit, out_tx, state, ctx).await
        }
        ClientEvent::Contacts => handle_contacts(out_tx, state, ctx).await,
    }
}

async fn handle_join(
    username: String,
    out_tx: &mpsc::Sender<ServerEvent>,
    state: &AppState,
    ctx: &mut ConnectionContext,
) -> GatewayResult<()> {
    if username != ctx.identity {
        out_tx
            .send(ServerEvent::Error {
                message: "join identity does not match connection identity".to_string(),
            })
            .await?;
        return Ok(());
    }

    if ctx.connection_id.is_some() {
        // repeated join: refresh the snapshot, nothing else changed
        out_tx
            .send(ServerEvent::OnlineList(state.registry().online_users()))
            .await?;
        return Ok(());
    }

    let (id, transition) = state.registry().register(&ctx.identity, out_tx.clone());
    ctx.connection_id = Some(id);

    if let Some(change) = transition {
        info!(username = %ctx.identity, "user online");
        state
            .registry()
            .broadcast(ServerEvent::OnlineList(state.registry().online_users()));
        state.registry().broadcast(ServerEvent::Joined {
            username: change.username,
            timestamp: change.timestamp,
        });
    } else {
        // additional device of an already-online user: snapshot for this
        // connection only
        out_tx
            .send(ServerEvent::OnlineList(state.registry().online_users()))
            .await?;
    }

    replay_unread(state, &ctx.identity).await;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_send(
    to: String,
    from: String,
    content: String,
    content_type: ContentType,
    file_name: Option<String>,
    out_tx: &mpsc::Sender<ServerEvent>,
    state: &AppState,
    ctx: &ConnectionContext,
) -> GatewayResult<()> {
    if !require_joined(ctx, out_tx).await? {
        return Ok(());
    }
    if from != ctx.identity {
        out_tx
            .send(ServerEvent::Error {
                message: "sender does not match connection identity".to_string(),
            })
            .await?;
        return Ok(());
    }

    let message = match state
        .messages()
        .append(&from, &to, &content, content_type, file_name.as_deref())
        .await
    {
        Ok(message) => message,
        Err(error) => return report_store_error(error, "send message", out_tx).await,
    };

    // fan-out targets recipient connections only; an offline recipient keeps
    // the message unread for replay
    let delivered = state
        .registry()
        .send_to_user(&to, ServerEvent::MessageReceived(moderated(state, &message)));
    info!(
        public_id = %message.public_id,
        recipient = %to,
        connections = delivered,
        "message dispatched"
    );

    // the dedicated acknowledgement carries the authoritative record
    out_tx.send(ServerEvent::MessageSent(message)).await?;
    Ok(())
}

async fn handle_edit(
    message_id: String,
    new_content: String,
    out_tx: &mpsc::Sender<ServerEvent>,
    state: &AppState,
    ctx: &ConnectionContext,
) -> GatewayResult<()> {
    if !require_joined(ctx, out_tx).await? {
        return Ok(());
    }

    let updated = match state
        .messages()
        .edit(&message_id, &ctx.identity, &new_content)
        .await
    {
        Ok(updated) => updated,
        Err(error) => return report_store_error(error, "edit message", out_tx).await,
    };

    let event = ServerEvent::MessageEdited {
        message_id: updated.public_id.clone(),
        new_content: updated.content.clone(),
        edited_at: updated.edited_at.clone().unwrap_or_default(),
    };
    fan_out_to_participants(state, &updated, event);
    Ok(())
}

async fn handle_delete(
    message_id: String,
    out_tx: &mpsc::Sender<ServerEvent>,
    state: &AppState,
    ctx: &ConnectionContext,
) -> GatewayResult<()> {
    if !require_joined(ctx, out_tx).await? {
        return Ok(());
    }

    let removed = match state.messages().delete(&message_id, &ctx.identity).await {
        Ok(removed) => removed,
        Err(error) => return report_store_error(error, "delete message", out_tx).await,
    };

    let event = ServerEvent::MessageDeleted {
        message_id: removed.public_id.clone(),
    };
    fan_out_to_participants(state, &removed, event);
    Ok(())
}

async fn handle_typing(
    is_typing: bool,
    out_tx: &mpsc::Sender<ServerEvent>,
    state: &AppState,
    ctx: &ConnectionContext,
) -> GatewayResult<()> {
    if !require_joined(ctx, out_tx).await? {
        return Ok(());
    }

    let event = ServerEvent::Typing {
        username: ctx.identity.clone(),
        is_typing,
    };
    match ctx.connection_id {
        Some(id) => state.registry().broadcast_except(event, id),
        None => state.registry().broadcast(event),
    }
    Ok(())
}

async fn handle_read(
    with: String,
    out_tx: &mpsc::Sender<ServerEvent>,
    state: &AppState,
    ctx: &ConnectionContext,
) -> GatewayResult<()> {
    let conversation = conversation_id(&ctx.identity, &with);
    let updated = match state.messages().mark_read(&conversation, &ctx.identity).await {
        Ok(updated) => updated,
        Err(error) => return report_store_error(error, "mark conversation read", out_tx).await,
    };

    out_tx.send(ServerEvent::Read { with, updated }).await?;
    Ok(())
}

async fn handle_history(
    with: String,
    limit: Option<i64>,
    out_tx: &mpsc::Sender<ServerEvent>,
    state: &AppState,
    ctx: &ConnectionContext,
) -> GatewayResult<()> {
    let conversation = conversation_id(&ctx.identity, &with);
    let limit = limit.unwrap_or(state.channel().history_limit);

    let messages = match state.messages().conversation(&conversation, Some(limit)).await {
        Ok(messages) => messages,
        Err(error) => return report_store_error(error, "load history", out_tx).await,
    };

    let messages = messages
        .into_iter()
        .map(|message| moderated(state, &message))
        .collect();

    out_tx.send(ServerEvent::History { with, messages }).await?;
    Ok(())
}

async fn handle_contacts(
    out_tx: &mpsc::Sender<ServerEvent>,
    state: &AppState,
    ctx: &ConnectionContext,
) -> GatewayResult<()> {
    let contacts = match state.messages().recent_contacts(&ctx.identity).await {
        Ok(contacts) => contacts,
        Err(error) => return report_store_error(error, "load contacts", out_tx).await,
    };
    let unread: HashMap<String, i64> = match state.messages().unread_counts(&ctx.identity).await {
        Ok(counts) => counts.into_iter().collect(),
        Err(error) => return report_store_error(error, "load contacts", out_tx).await,
    };

    let summaries = contacts
        .into_iter()
        .map(|contact| {
            let conversation = conversation_id(&ctx.identity, &contact.peer);
            ContactSummary {
                unread_count: unread.get(&conversation).copied().unwrap_or(0),
                peer: contact.peer,
                last_message_at: contact.last_message_at,
                last_content: contact.last_content,
            }
        })
        .collect();

    out_tx.send(ServerEvent::Contacts(summaries)).await?;
    Ok(())
}

/// Replay unread messages to every live connection of a user, oldest first,
/// then mark them read in one batch per conversation.
///
/// Runs under a per-user lock: a second connection joining mid-replay waits
/// and then finds an empty unread set, so each message is replayed once.
pub async fn replay_unread(state: &AppState, username: &str) {
    let lock = state.replay_lock(username).await;
    let _guard = lock.lock().await;

    let pending = match state.messages().unread_for(username).await {
        Ok(pending) => pending,
        Err(err) => {
            error!(username, error = %err, "failed to load unread messages for replay");
            return;
        }
    };
    if pending.is_empty() {
        return;
    }

    let mut conversations = BTreeSet::new();
    for message in &pending {
        conversations.insert(message.conversation_id.clone());
        state
            .registry()
            .send_to_user(username, ServerEvent::MessageReceived(moderated(state, message)));
    }

    info!(username, count = pending.len(), "replayed unread messages");

    for conversation in conversations {
        if let Err(err) = state.messages().mark_read(&conversation, username).await {
            error!(username, conversation, error = %err, "failed to mark replayed messages read");
        }
    }
}

/// Unregister on transport disconnect and announce the presence change.
pub fn handle_disconnect(state: &AppState, ctx: &ConnectionContext) {
    let Some(id) = ctx.connection_id else {
        return;
    };

    if let Some(change) = state.registry().unregister(&ctx.identity, id) {
        info!(username = %ctx.identity, "user offline");
        state
            .registry()
            .broadcast(ServerEvent::OnlineList(state.registry().online_users()));
        state.registry().broadcast(ServerEvent::Left {
            username: change.username,
            timestamp: change.timestamp,
        });
    }
}

/// Emit an event to every live connection of both participants.
fn fan_out_to_participants(state: &AppState, message: &PrivateMessage, event: ServerEvent) {
    state.registry().send_to_user(&message.sender, event.clone());
    if message.recipient != message.sender {
        state.registry().send_to_user(&message.recipient, event);
    }
}

/// Copy of the record with the moderation hook applied to its content.
fn moderated(state: &AppState, message: &PrivateMessage) -> PrivateMessage {
    let mut message = message.clone();
    message.content = apply_filter(state.filter(), &message.content);
    message
}

async fn require_joined(
    ctx: &ConnectionContext,
    out_tx: &mpsc::Sender<ServerEvent>,
) -> GatewayResult<bool> {
    if ctx.connection_id.is_some() {
        return Ok(true);
    }
    out_tx
        .send(ServerEvent::Error {
            message: "join before sending events".to_string(),
        })
        .await?;
    Ok(false)
}

/// Store rejections go back to the requester verbatim; infrastructure
/// failures are logged and reported generically. Neither tears the
/// connection down.
async fn report_store_error(
    err: StoreError,
    action: &str,
    out_tx: &mpsc::Sender<ServerEvent>,
) -> GatewayResult<()> {
    let message = if err.is_rejection() {
        warn!(action, error = %err, "store rejected operation");
        err.to_string()
    } else {
        error!(action, error = %err, "store operation failed");
        format!("failed to {action}")
    };

    out_tx.send(ServerEvent::Error { message }).await?;
    Ok(())
}
