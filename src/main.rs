use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wa_session::{
    qr,
    store::{
        ContactFilter, ContactStore, MemoryStore, MessageFilter, MessageStatus, MessageStore,
        Page, StatusStore,
    },
    transport::mock::{self, MockFactory, MockTransport},
    types::{normalize_chat_id, SendOptions},
    ClientError, EventKind, SessionClient, SessionConfig, SessionEvent, TransportEvent,
};

/// Session manager CLI: run a scripted session and inspect the stored records.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, default_value = "./data/config.json")]
    config: PathBuf,

    /// Override the store snapshot path from the config.
    #[arg(long)]
    store: Option<String>,

    /// Choose a command to run.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a session against the in-process transport and save the result.
    Simulate {
        /// Send a message to this chat once connected.
        #[arg(long)]
        to: Option<String>,
        /// Body of the outbound message.
        #[arg(long, default_value = "Hello from wa-session")]
        message: String,
    },
    /// List stored contacts.
    Contacts {
        #[arg(long)]
        unread_only: bool,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// List stored messages.
    Messages {
        #[arg(long)]
        chat: Option<String>,
        #[arg(long, value_parser = parse_status)]
        status: Option<MessageStatus>,
        #[arg(long)]
        from_me: Option<bool>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Print the latest API status snapshot.
    Status,
    /// Print the current configuration.
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = SessionConfig::from_json_file(&cli.config)?;
    if let Some(path) = cli.store {
        config = config.with_store_path(path);
    }

    match cli.command {
        Commands::Simulate { to, message } => simulate(config, to, &message).await?,
        Commands::Contacts {
            unread_only,
            name,
            limit,
            offset,
        } => {
            let store = MemoryStore::open(&config.store_path)?;
            let filter = ContactFilter {
                unread_only,
                name_contains: name,
            };
            for contact in store.list_contacts(&filter, Page::new(limit, offset))? {
                let last = contact
                    .last_message
                    .map(|m| format!("{} [{}]", m.content, m.status))
                    .unwrap_or_default();
                println!(
                    "{:<24} {:<20} unread={:<3} {}",
                    contact.id, contact.name, contact.unread_count, last
                );
            }
        }
        Commands::Messages {
            chat,
            status,
            from_me,
            limit,
            offset,
        } => {
            let store = MemoryStore::open(&config.store_path)?;
            let filter = MessageFilter {
                chat_id: chat.as_deref().map(normalize_chat_id).transpose()?,
                status,
                from_me,
                ..Default::default()
            };
            for message in store.list_messages(&filter, Page::new(limit, offset))? {
                println!(
                    "{} {:<24} {} {:<9} {}",
                    message.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    message.chat_id,
                    if message.from_me { ">" } else { "<" },
                    message.status,
                    message.content
                );
            }
        }
        Commands::Status => {
            let store = MemoryStore::open(&config.store_path)?;
            match store.latest_status()? {
                Some(status) => println!("Status: {:?}", status),
                None => println!("No status recorded yet."),
            }
        }
        Commands::ShowConfig => {
            println!("Config: {:?}", config);
        }
    }

    Ok(())
}

async fn simulate(
    config: SessionConfig,
    to: Option<String>,
    message: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::open(&config.store_path)?);
    let transport = demo_transport();
    let factory = Arc::new(MockFactory::with(transport.clone()));
    let client = SessionClient::new(config.clone(), factory, store.clone());

    client.events().subscribe(EventKind::Qr, |event| {
        if let SessionEvent::Qr { code } = event {
            println!("Scan this code to link the device:\n{}", qr::render_qr_ascii(code)?);
        }
        Ok(())
    });
    client.events().subscribe(EventKind::StateChange, |event| {
        if let SessionEvent::StateChange(snapshot) = event {
            println!("State: {}", snapshot.state);
        }
        Ok(())
    });
    client.on_message(|message| {
        println!("New message from {}: {}", message.chat_id, message.content);
        Ok(())
    });

    client.initialize().await?;
    let code = format!("2@{}", mock::generate_message_id());
    transport.emit(TransportEvent::Qr(code)).await;
    transport.emit(TransportEvent::Authenticated).await;
    transport.emit(TransportEvent::Ready).await;

    if let Some(to) = to {
        match client
            .send_message(&to, message, &SendOptions::default())
            .await
        {
            Ok(sent) => {
                println!("Sent {} to {}", sent.id, sent.chat_id);
                let echo = mock::outgoing(&sent.chat_id, &sent.id, &sent.content, 0);
                transport.emit(TransportEvent::MessageAck(echo, 3)).await;
            }
            Err(ClientError::InvalidChatId(err)) => eprintln!("Cannot send: {err}"),
            Err(err) => return Err(err.into()),
        }
    }

    transport
        .emit(TransportEvent::Message(mock::incoming(
            DEMO_CHATS[0].0,
            &mock::generate_message_id(),
            "Are you there?",
            chrono::Utc::now().timestamp(),
        )))
        .await;

    client.disconnect().await?;
    store.save_snapshot(&config.store_path)?;
    println!("Saved store to {}", config.store_path);
    Ok(())
}

const DEMO_CHATS: [(&str, &str); 2] = [
    ("5511999990001@c.us", "Ana"),
    ("5511999990002@c.us", "Bruno"),
];

fn demo_transport() -> MockTransport {
    let now = chrono::Utc::now().timestamp();
    DEMO_CHATS
        .iter()
        .enumerate()
        .fold(MockTransport::new(), |transport, (i, (id, name))| {
            let history = vec![
                mock::outgoing(id, &format!("DEMO{i}A"), "Hi!", now - 3_600),
                mock::incoming(id, &format!("DEMO{i}B"), &format!("Hi, this is {name}"), now - 1_800),
            ];
            transport.with_chat(mock::chat(id, name, 1), history)
        })
}

fn parse_status(raw: &str) -> Result<MessageStatus, String> {
    match raw.to_ascii_lowercase().as_str() {
        "sent" => Ok(MessageStatus::Sent),
        "delivered" => Ok(MessageStatus::Delivered),
        "read" => Ok(MessageStatus::Read),
        "received" => Ok(MessageStatus::Received),
        "failed" => Ok(MessageStatus::Failed),
        other => Err(format!("unknown status `{other}`")),
    }
}
