mod commands;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    load_settings, load_settings_from, ChatSession, ClientEvent, HttpChatApi, MessageDraft,
    WsEventChannel,
};
use shared::{
    domain::{ThreadRef, UserId},
    protocol::{Attachment, GroupMessagePayload, MessagePayload},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{debug, warn};

use crate::commands::{parse, Command, HELP};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    user_id: i64,
    /// Overrides `server_url` from the settings file.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from(path, |key| std::env::var(key).ok()),
        None => load_settings(),
    };
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    let me = UserId(args.user_id);

    let channel = WsEventChannel::connect(settings.ws_url(me)?, &settings);
    let api = Arc::new(HttpChatApi::new(settings.server_url.clone(), me));
    let session = ChatSession::start(me, settings, channel.clone(), api).await;
    println!("Logged in as user_id={me}. Type /help for commands.");

    let mut events = session.subscribe_events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        if let Err(err) = run(&session, command).await {
                            println!("error: {err:#}");
                        }
                    }
                    Err(err) => println!("{err}"),
                }
            }
            event = events.recv() => match event {
                Ok(event) => render_event(&session, &event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "console: display fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.logout();
    channel.close();
    Ok(())
}

fn focused(session: &ChatSession) -> Result<ThreadRef> {
    session
        .read(|engine| engine.focus())
        .context("no thread focused; use /chat or /group first")
}

async fn run(session: &Arc<ChatSession>, command: Command) -> Result<()> {
    match command {
        Command::Help => println!("{HELP}"),
        Command::List => print_lists(session),
        Command::Users => {
            for user in session.chatable_users().await? {
                println!(
                    "  {} {} {} ({})",
                    user.user_id,
                    user.first_name,
                    user.last_name,
                    user.department.as_deref().unwrap_or("-")
                );
            }
        }
        Command::OpenConversation(user_id) => {
            let summary = session.open_conversation(user_id).await?;
            println!(
                "conversation {} with {}",
                summary.conversation_id, summary.other.first_name
            );
        }
        Command::SelectConversation(id) => {
            session.select_conversation(id).await?;
            print_history(session);
        }
        Command::SelectGroup(id) => {
            session.select_group(id).await?;
            print_history(session);
        }
        Command::Leave => session.clear_focus(),
        Command::Older => {
            let added = session.load_older(focused(session)?).await?;
            println!("loaded {added} older messages");
            if added > 0 {
                print_history(session);
            }
        }
        Command::Read => session.mark_read(focused(session)?)?,
        Command::Typing => session.note_typing(focused(session)?)?,
        Command::Delete {
            message_id,
            for_everyone,
        } => {
            session
                .delete_message(focused(session)?, &message_id, for_everyone)
                .await?
        }
        Command::CreateGroup { name, members } => {
            let group = session.create_group(name, members).await?;
            println!("created group {} '{}'", group.group_id, group.name);
        }
        Command::Resync => session.resync().await,
        Command::Send(text) => {
            let thread = focused(session)?;
            let id = session
                .send_message(thread, MessageDraft::text(text), None)
                .await?;
            debug!(message_id = %id, "console: message sent");
        }
        Command::Quit => {}
    }
    Ok(())
}

fn print_lists(session: &ChatSession) {
    session.read(|engine| {
        println!("conversations:");
        for c in engine.direct().conversations() {
            let online = if c.other.is_online { "*" } else { " " };
            println!(
                " {online} {:>4}  {} {}  unread={}",
                c.conversation_id, c.other.first_name, c.other.last_name, c.unread_count
            );
        }
        println!("groups:");
        for g in engine.groups().groups() {
            println!(
                "   {:>4}  {} ({} members)  unread={}",
                g.group_id,
                g.name,
                g.participant_ids.len(),
                g.unread_count
            );
        }
    });
}

fn describe_attachment(attachment: &Option<Attachment>) -> String {
    attachment
        .as_ref()
        .map(|a| format!(" [{:?}: {}]", a.kind, a.filename))
        .unwrap_or_default()
}

fn direct_line(message: &MessagePayload) -> String {
    if message.deleted_for_everyone {
        return format!("{} <{}> (deleted)", message.message_id, message.sender_id);
    }
    format!(
        "{} <{}> {}{} [{:?}]",
        message.message_id,
        message.sender_id,
        message.content.as_deref().unwrap_or(""),
        describe_attachment(&message.attachment),
        message.status
    )
}

fn group_line(message: &GroupMessagePayload) -> String {
    if let Some(notice) = &message.system {
        return format!("* {:?} by {}", notice.kind, notice.actor_id);
    }
    if message.deleted_for_everyone {
        return format!("{} <{}> (deleted)", message.message_id, message.sender_id);
    }
    format!(
        "{} <{}> {}{}",
        message.message_id,
        message.sender_id,
        message.content.as_deref().unwrap_or(""),
        describe_attachment(&message.attachment)
    )
}

fn print_history(session: &ChatSession) {
    session.read(|engine| match engine.focus() {
        Some(ThreadRef::Direct(_)) => {
            for message in engine.direct().messages() {
                println!("  {}", direct_line(message));
            }
        }
        Some(ThreadRef::Group(_)) => {
            for message in engine.groups().messages() {
                println!("  {}", group_line(message));
            }
        }
        None => {}
    });
}

fn print_latest(session: &ChatSession, thread: ThreadRef) {
    let line = session.read(|engine| match thread {
        ThreadRef::Direct(_) => engine.direct().messages().last().map(direct_line),
        ThreadRef::Group(_) => engine.groups().messages().last().map(group_line),
    });
    if let Some(line) = line {
        println!("  {line}");
    }
}

fn render_event(session: &ChatSession, event: &ClientEvent) {
    match event {
        ClientEvent::MessagesChanged(thread) => print_latest(session, *thread),
        ClientEvent::TypingChanged(thread) => {
            let typing = session.read(|engine| engine.typing().typing_in(*thread));
            if !typing.is_empty() {
                let names: Vec<String> = typing.iter().map(ToString::to_string).collect();
                println!("  ({} typing)", names.join(", "));
            }
        }
        ClientEvent::UnreadChanged { direct, group } => {
            println!("[unread] direct={direct} group={group}");
        }
        ClientEvent::FocusChanged(Some(thread)) => println!("[focus] {thread:?}"),
        ClientEvent::FocusChanged(None) => println!("[focus] none"),
        ClientEvent::SendFailed {
            temp_id, reason, ..
        } => println!("[send failed] {temp_id}: {reason}"),
        ClientEvent::Connection(state) => println!("[connection] {state:?}"),
        ClientEvent::ServerError(err) => println!("[server] {err}"),
        ClientEvent::ConversationsChanged
        | ClientEvent::GroupsChanged
        | ClientEvent::PresenceChanged => debug!(?event, "console: list changed"),
    }
}
