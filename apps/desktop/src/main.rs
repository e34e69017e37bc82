use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use client_core::{connect_push, ChatSession, HttpChatApi, SessionUpdate};
use shared::{
    domain::UserId,
    protocol::{MessagePayload, SendMessageRequest, UserSummary},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server_url: String,
    /// Session token, as printed by `tools issue-token`.
    #[arg(long, env = "CHAT_TOKEN")]
    token: String,
    /// Must be the user the token was issued for.
    #[arg(long)]
    user_id: i64,
    /// Conversation to open on start.
    #[arg(long)]
    peer: Option<i64>,
}

fn print_message(me: UserId, message: &MessagePayload) {
    let who = if message.sender_id == me {
        "me".to_string()
    } else {
        message.sender_id.to_string()
    };
    let image = message
        .image
        .as_deref()
        .map(|url| format!(" [image {url}]"))
        .unwrap_or_default();
    println!(
        "[{}] {who}: {}{image}",
        message.created_at.format("%H:%M"),
        message.text
    );
}

/// The roster never lists the caller, so finding `me` in it means the
/// token belongs to someone else.
fn check_identity(me: UserId, roster: &[UserSummary]) -> Result<()> {
    if roster.iter().any(|user| user.user_id == me) {
        bail!("--user-id {me} does not match the session token");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("warn").init();
    let args = Args::parse();
    let me = UserId(args.user_id);

    let api = Arc::new(HttpChatApi::new(&args.server_url, &args.token)?);
    let session = ChatSession::new(api, me);

    let roster = session.load_users().await?;
    check_identity(me, &roster)?;

    let (push, events) = connect_push(&args.server_url, &args.token).await?;
    let _subscription = session.subscribe(events);

    let mut updates = session.updates();
    tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            match update {
                SessionUpdate::MessageAdded(message) => print_message(me, &message),
                SessionUpdate::OnlineUsersChanged(user_ids) => {
                    let ids: Vec<String> = user_ids.iter().map(ToString::to_string).collect();
                    println!("* online: {}", ids.join(", "));
                }
                SessionUpdate::ConversationLoaded { peer, messages } => {
                    println!("* conversation with {peer} ({} messages)", messages.len());
                    for message in &messages {
                        print_message(me, message);
                    }
                }
                SessionUpdate::PushLost(reason) => println!("* live updates stopped: {reason}"),
            }
        }
    });

    for user in &roster {
        println!("{}\t{}\t{}", user.user_id, user.username, user.full_name);
    }
    if let Some(peer) = args.peer {
        session.open_conversation(UserId(peer)).await?;
    }
    println!("commands: /open <user_id>, /close, /users, /online, /quit; anything else is sent");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, ' ');
        match (parts.next(), parts.next()) {
            (Some("/quit"), _) => break,
            (Some("/open"), Some(peer)) => match peer.trim().parse::<i64>() {
                Ok(peer) => {
                    if let Err(err) = session.open_conversation(UserId(peer)).await {
                        println!("! {err}");
                    }
                }
                Err(_) => println!("! usage: /open <user_id>"),
            },
            (Some("/close"), _) => session.close_conversation().await,
            (Some("/users"), _) => {
                for user in session.users().await {
                    let status = if session.is_online(user.user_id).await {
                        "online"
                    } else {
                        "offline"
                    };
                    println!("{}\t{}\t{status}", user.user_id, user.username);
                }
            }
            (Some("/online"), _) => {
                let ids: Vec<String> = session
                    .online_users()
                    .await
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                println!("* online: {}", ids.join(", "));
            }
            _ => {
                if let Err(err) = session
                    .send_message(SendMessageRequest::text(line.to_string()))
                    .await
                {
                    warn!(error = %err, "send failed");
                    println!("! {err}");
                }
            }
        }
    }

    push.close();
    Ok(())
}
