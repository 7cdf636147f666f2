use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use client_core::{
    ChatApi, EventChannel, HttpChatApi, MemoryCredentialStore, PreviewIndex, Roster, RosterEvent,
    SessionGate, SessionState, WsEventTransport,
};
use shared::protocol::AuthRequest;
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: String,
    #[arg(long)]
    ws_url: String,
    #[arg(long)]
    api_key: String,
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
    /// Create the account before logging in.
    #[arg(long)]
    register: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let api = Arc::new(HttpChatApi::new(
        args.server_url.clone(),
        args.api_key.clone(),
    ));
    let gate = SessionGate::new(Arc::new(MemoryCredentialStore::new()));

    let request = AuthRequest::new(args.username.clone(), args.password.clone());
    let token = if args.register {
        api.register(&request).await?
    } else {
        api.login(&request).await?
    };
    gate.store_token(&token).await?;

    let token = match gate.resolve().await {
        SessionState::Authenticated(token) => token,
        SessionState::Unauthenticated => return Err(anyhow!("login did not yield a session")),
    };

    let transport = WsEventTransport::connect(&args.ws_url).await?;
    let channel = EventChannel::new(transport);
    let roster = Roster::new(api, channel, PreviewIndex::new());
    let (self_user, users) = roster.load(&token).await?;
    roster.attach(&self_user.id).await;

    println!("Logged in as {} ({})", self_user.username, self_user.id);
    for user in &users {
        let preview = roster
            .previews()
            .get(&user.id)
            .unwrap_or_else(|| "No messages yet".to_string());
        println!("{:<20} {preview}", user.username);
    }

    info!("watching for live preview updates, ctrl-c to quit");
    let mut events = roster.subscribe_events();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                if let Ok(RosterEvent::PreviewUpdated { peer_id }) = event {
                    if let Some(preview) = roster.previews().get(&peer_id) {
                        println!("{peer_id}: {preview}");
                    }
                }
            }
        }
    }

    Ok(())
}
