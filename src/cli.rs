//! CLI interface for the messenger client
//!
//! Command parsing, output formatting and the interactive loop that drives
//! a [`ClientManager`] from stdin.

use crate::error::{ClientError, Result};
use crate::models::{ChatId, Conversation, LoginCredentials, Message, MessageId, RegisterCredentials, UserProfile};
use crate::services::websocket_manager::{ConnectionState, ConnectionStatus};
use crate::services::ClientManager;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Command types for the terminal front-end
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login { nickname: String, password: String },
    Register { nickname: String, email: String, password: String },
    Logout,
    Chats,
    Open(ChatId),
    New(String),
    Rename { id: ChatId, name: String },
    RemoveChat(ChatId),
    Typing(bool),
    Edit { id: MessageId, text: String },
    Delete(MessageId),
    Search(String),
    Friends,
    Requests,
    Add(String),
    Accept(String),
    Reject(String),
    Status,
    Message(String),
    Quit,
}

fn usage(text: &str) -> ClientError {
    ClientError::InvalidCommand(format!("Usage: {}", text))
}

/// Parse a line of user input
pub fn parse_command(input: &str) -> Result<Command> {
    let input = input.trim();
    if !input.starts_with('/') {
        return Ok(Command::Message(input.to_string()));
    }

    let (name, rest) = input.split_once(' ').unwrap_or((input, ""));
    let rest = rest.trim();
    let args: Vec<&str> = rest.split_whitespace().collect();

    match (name, args.as_slice()) {
        ("/quit" | "/exit", _) => Ok(Command::Quit),
        ("/logout", _) => Ok(Command::Logout),
        ("/chats", _) => Ok(Command::Chats),
        ("/friends", _) => Ok(Command::Friends),
        ("/requests", _) => Ok(Command::Requests),
        ("/status", _) => Ok(Command::Status),
        ("/login", [nickname, password]) => Ok(Command::Login {
            nickname: nickname.to_string(),
            password: password.to_string(),
        }),
        ("/login", _) => Err(usage("/login <nickname> <password>")),
        ("/register", [nickname, email, password]) => Ok(Command::Register {
            nickname: nickname.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }),
        ("/register", _) => Err(usage("/register <nickname> <email> <password>")),
        ("/open", [id]) => Ok(Command::Open(ChatId::new(*id))),
        ("/open", _) => Err(usage("/open <chat-id>")),
        ("/new", _) if !rest.is_empty() => Ok(Command::New(rest.to_string())),
        ("/new", _) => Err(usage("/new <name>")),
        ("/rename", [id, ..]) if rest.len() > id.len() => Ok(Command::Rename {
            id: ChatId::new(*id),
            name: rest[id.len()..].trim().to_string(),
        }),
        ("/rename", _) => Err(usage("/rename <chat-id> <name>")),
        ("/rmchat", [id]) => Ok(Command::RemoveChat(ChatId::new(*id))),
        ("/rmchat", _) => Err(usage("/rmchat <chat-id>")),
        ("/typing", ["on"]) => Ok(Command::Typing(true)),
        ("/typing", ["off"]) => Ok(Command::Typing(false)),
        ("/typing", _) => Err(usage("/typing on|off")),
        ("/edit", [id, ..]) => {
            let text = rest[id.len()..].trim();
            if text.is_empty() {
                return Err(usage("/edit <message-id> <text>"));
            }
            Ok(Command::Edit {
                id: MessageId::new(*id),
                text: text.to_string(),
            })
        }
        ("/edit", _) => Err(usage("/edit <message-id> <text>")),
        ("/delete", [id]) => Ok(Command::Delete(MessageId::new(*id))),
        ("/delete", _) => Err(usage("/delete <message-id>")),
        ("/search", [nickname]) => Ok(Command::Search(nickname.to_string())),
        ("/search", _) => Err(usage("/search <nickname>")),
        ("/add", [user]) => Ok(Command::Add(user.to_string())),
        ("/add", _) => Err(usage("/add <user-id>")),
        ("/accept", [user]) => Ok(Command::Accept(user.to_string())),
        ("/accept", _) => Err(usage("/accept <user-id>")),
        ("/reject", [user]) => Ok(Command::Reject(user.to_string())),
        ("/reject", _) => Err(usage("/reject <user-id>")),
        _ => Err(ClientError::InvalidCommand(format!("Unknown command: {}", name))),
    }
}

/// Format a message for display
pub fn format_message(message: &Message) -> String {
    let author = message
        .sender
        .as_ref()
        .map_or(message.sender_id.as_str(), |s| s.nickname.as_str());
    let marker = if message.is_pending() { " (sending)" } else { "" };
    format!(
        "[{}] <{}> {}{}  ({})",
        message.created_at.format("%H:%M"),
        author,
        message.content,
        marker,
        message.id
    )
}

pub fn format_conversation(chat: &Conversation) -> String {
    let kind = if chat.is_group { "group" } else { "direct" };
    match &chat.last_message {
        Some(last) => format!("{}  {} [{}]: {}", chat.id, chat.name, kind, last.content),
        None => format!("{}  {} [{}]", chat.id, chat.name, kind),
    }
}

pub fn format_user(user: &UserProfile) -> String {
    format!("{}  {}", user.id, user.nickname)
}

pub fn format_status(status: &ConnectionStatus) -> String {
    match status.state {
        ConnectionState::Connected => "* connected".to_string(),
        ConnectionState::Connecting if status.attempt > 0 => {
            format!("* reconnecting (attempt {})", status.attempt)
        }
        ConnectionState::Connecting => "* connecting".to_string(),
        ConnectionState::Reconnecting => {
            format!("* connection lost, retry {} scheduled", status.attempt)
        }
        ConnectionState::Disconnected => "* disconnected".to_string(),
    }
}

/// Async stdin reader that yields one line at a time
///
/// # Returns
/// - `Ok(Some(line))` - User entered a line
/// - `Ok(None)` - EOF reached (Ctrl+D)
/// - `Err(e)` - I/O error
pub async fn read_line_async(reader: &mut BufReader<tokio::io::Stdin>) -> Result<Option<String>> {
    print!("> ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    match reader.read_line(&mut line).await? {
        0 => Ok(None),
        _ => Ok(Some(line.trim_end_matches(['\r', '\n']).to_string())),
    }
}

/// Run one command. Returns false when the loop should stop.
async fn execute(manager: &mut ClientManager, command: Command) -> Result<bool> {
    match command {
        Command::Quit => return Ok(false),
        Command::Login { nickname, password } => {
            let user_id = manager.login(&LoginCredentials::new(nickname, password)).await?;
            println!("Logged in as {}", user_id);
        }
        Command::Register {
            nickname,
            email,
            password,
        } => {
            let credentials = RegisterCredentials::new(nickname, email, password);
            let user_id = manager.register(&credentials).await?;
            println!("Registered as {}", user_id);
        }
        Command::Logout => {
            manager.logout()?;
            install_status_printer(manager);
            println!("Logged out");
        }
        Command::Chats => {
            for chat in manager.conversations().refresh().await? {
                println!("{}", format_conversation(&chat));
            }
        }
        Command::Open(chat_id) => {
            let chat = manager.open_conversation(&chat_id).await?;
            for message in chat.messages() {
                println!("{}", format_message(&message));
            }
            println!("#{} ({:?})", chat_id, chat.view_state());
        }
        Command::New(name) => {
            let chat = manager.conversations().create(&name, true, Vec::new()).await?;
            println!("Created {}", format_conversation(&chat));
        }
        Command::Rename { id, name } => {
            let chat = manager.conversations().rename(&id, &name).await?;
            println!("Renamed {}", format_conversation(&chat));
        }
        Command::RemoveChat(id) => {
            manager.conversations().delete(&id).await?;
            if manager
                .active_conversation()
                .is_some_and(|chat| chat.chat_id() == &id)
            {
                manager.close_conversation();
            }
            println!("Deleted chat {}", id);
        }
        Command::Typing(is_typing) => {
            active(manager)?.set_typing(is_typing);
        }
        Command::Edit { id, text } => {
            let chat = active(manager)?;
            chat.edit_message(&id, &text).await?;
        }
        Command::Delete(id) => {
            let chat = active(manager)?;
            chat.delete_message(&id).await?;
            println!("Deleted {}", id);
        }
        Command::Search(nickname) => {
            for user in manager.api().search_users(&nickname).await? {
                println!("{}", format_user(&user));
            }
        }
        Command::Friends => {
            for friend in manager.api().friends().await? {
                println!("{}", format_user(&friend));
            }
        }
        Command::Requests => {
            for request in manager.api().friend_requests().await? {
                println!("{:?}  {}", request.status, format_user(&request.sender));
            }
        }
        Command::Add(user_id) => {
            manager.api().send_friend_request(&user_id).await?;
            println!("Friend request sent to {}", user_id);
        }
        Command::Accept(user_id) => {
            manager.api().accept_friend_request(&user_id).await?;
            println!("Accepted {}", user_id);
        }
        Command::Reject(user_id) => {
            manager.api().reject_friend_request(&user_id).await?;
            println!("Rejected {}", user_id);
        }
        Command::Status => {
            let status = *manager.connection().watch_status().borrow();
            println!("{}", format_status(&status));
            if let Some(chat) = manager.active_conversation() {
                println!("#{} {:?}", chat.chat_id(), chat.view_state());
            }
        }
        Command::Message(text) => {
            let chat = active(manager)?;
            chat.send_message(&text).await?;
        }
    }
    Ok(true)
}

fn active(manager: &ClientManager) -> Result<&crate::services::ChatSynchronizer<crate::api::ApiClient>> {
    manager
        .active_conversation()
        .ok_or_else(|| ClientError::State("No open chat; use /open <chat-id>".to_string()))
}

fn install_status_printer(manager: &ClientManager) {
    manager.connection().subscribe_status(|status| {
        println!("{}", format_status(status));
    });
}

/// Interactive loop: one command per stdin line until `/quit` or EOF.
/// Errors from individual commands are printed and the loop continues.
pub async fn run_client_loop(manager: &mut ClientManager) -> Result<()> {
    manager.set_message_listener(Arc::new(|message: &Message| {
        println!("{}", format_message(message));
    }));
    install_status_printer(manager);

    if !manager.start() {
        println!("Not logged in. Use /login <nickname> <password> or /register <nickname> <email> <password>");
    }

    let mut reader = BufReader::new(tokio::io::stdin());
    while let Some(line) = read_line_async(&mut reader).await? {
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        match execute(manager, command).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                log::debug!("Command failed: {:?}", e);
                println!("Error: {}", e);
            }
        }
    }

    manager.shutdown();
    Ok(())
}
