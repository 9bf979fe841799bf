use dhtalk::crypto::{KeyPair, PublicKey};
use dhtalk::dht::{DhtClient, RecordKey, RemoteDht};
use dhtalk::keyring::Keyring;
use dhtalk::session::{ChatRunner, ChatSession, ReceivedEvent, Role};
use dhtalk::utils::{setup_logger, Config};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::*;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Two-party encrypted chat over a DHT record service.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Address of the DHT service daemon (overrides the config file)
    #[clap(short, long)]
    service: Option<String>,

    /// Enable verbose logging
    #[clap(short, long, action = ArgAction::SetTrue)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate your key pair
    Keygen,

    /// Register a friend's public key
    AddFriend {
        /// Your friend's name
        name: String,
        /// Your friend's public key, hex-encoded
        pubkey: String,
    },

    /// Print the contents of the keyring
    DumpKeystore,

    /// Delete the keyring
    DeleteKeystore,

    /// Begin a conversation with a friend
    Start {
        /// Your friend's name
        name: String,
    },

    /// Reply to a friend's chat
    Respond {
        /// Your friend's name
        name: String,
        /// The chat key your friend gave you
        key: String,
    },

    /// Delete a chat record from the service
    Clean {
        /// Chat key of the record to delete
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dhtalk")
        .join("config.json");
    let mut config = Config::load(&config_path)?;
    if let Some(addr) = &args.service {
        config.service_addr = addr.clone();
    }
    if !config_path.exists() {
        config.save(&config_path)?;
    }
    config.ensure_data_dir()?;

    let log_level = if args.verbose { "debug" } else { &config.log_level };
    setup_logger(log_level);

    let keyring = Keyring::open(&config.keyring_path()).context("Failed to open the keyring")?;

    match args.command {
        Command::Keygen => keygen(&keyring),
        Command::AddFriend { name, pubkey } => add_friend(&keyring, &name, &pubkey),
        Command::DumpKeystore => dump_keystore(&keyring),
        Command::DeleteKeystore => {
            keyring.delete_all()?;
            println!("Keystore deleted.");
            Ok(())
        }
        Command::Start { name } => chat(&config, &keyring, &name, None).await,
        Command::Respond { name, key } => chat(&config, &keyring, &name, Some(key)).await,
        Command::Clean { key } => clean(&config, &key).await,
    }
}

fn keygen(keyring: &Keyring) -> Result<()> {
    if let Some(existing) = keyring.load_self()? {
        println!("You already have a key pair.");
        println!("Your public key is: {}", existing.public.to_hex().cyan());
        return Ok(());
    }

    let keypair = KeyPair::generate();
    keyring.store_self(&keypair)?;

    println!(
        "Your new public key is: {}",
        keypair.public.to_hex().cyan()
    );
    println!("Share it with your friends!");
    Ok(())
}

fn add_friend(keyring: &Keyring, name: &str, pubkey: &str) -> Result<()> {
    let key = PublicKey::from_hex(pubkey).context("Invalid public key")?;
    keyring.add_friend(name, &key)?;

    println!("Added {}.", name.green());
    Ok(())
}

fn dump_keystore(keyring: &Keyring) -> Result<()> {
    match keyring.load_self()? {
        Some(keypair) => {
            println!("Own key pair:");
            println!("    Public: {}", keypair.public.to_hex());
            println!("    Secret: <stored, not shown>");
        }
        None => println!("Own key pair: <unset>"),
    }

    println!();
    println!("Friends:");
    let friends = keyring.friends()?;
    if friends.is_empty() {
        println!("    <unset>");
    } else {
        for friend in friends {
            println!("    {}: {}", friend.name, friend.public_key.to_hex());
        }
    }
    Ok(())
}

/// Runs a conversation end to end. A `shared_key` of None means we initiate
/// and print the record key for the peer; Some means we respond to theirs.
async fn chat(
    config: &Config,
    keyring: &Keyring,
    friend: &str,
    shared_key: Option<String>,
) -> Result<()> {
    let keypair = match keyring.load_self()? {
        Some(keypair) => keypair,
        None => bail!("Use 'keygen' to generate a key pair first."),
    };

    let client = Arc::new(
        RemoteDht::connect(&config.service_addr)
            .await
            .with_context(|| format!("Failed to reach the DHT service at {}", config.service_addr))?,
    );

    let role = if shared_key.is_some() {
        Role::Responder
    } else {
        Role::Initiator
    };
    let mut session =
        ChatSession::new(client, role, keypair, friend).with_retry(config.retry.clone());

    match session.establish_secret(keyring) {
        Err(dhtalk::session::SessionError::UnknownFriend(name)) => {
            bail!("Add {}'s key with 'add-friend' first.", name)
        }
        other => other?,
    }

    match &shared_key {
        None => {
            let token = session.create_record().await?;
            println!("New chat key: {}", token.cyan());
            println!("Give that to your friend!");
        }
        Some(token) => {
            session.open_record(token).await?;
        }
    }

    let runner = ChatRunner::new(session, config.poll_interval());

    // Prime the pumps. The first write also pushes the fresh record out
    // into the network before the peer starts polling.
    runner.send("Hello from the world!").await?;

    let result = chat_loop(&runner, friend).await;

    runner.close_and_delete().await?;
    info!("Chat record released");

    result
}

/// Foreground loop: stdin lines go out, receiver events come in.
async fn chat_loop(runner: &ChatRunner, friend: &str) -> Result<()> {
    let (events_tx, mut events_rx) = mpsc::channel(16);
    let receiver = runner.spawn_receiver(events_tx);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Type a message and press enter. Ctrl-D hangs up.");

    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(ReceivedEvent::Message(text)) => {
                    println!("{} {}", format!("{}>", friend).cyan().bold(), text);
                }
                Some(ReceivedEvent::PeerClosed) => {
                    println!("Other end closed the chat.");
                    break;
                }
                // Receiver task ended on its own; its error surfaces below.
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(text) => {
                    if !text.trim().is_empty() {
                        runner.send(&text).await?;
                    }
                }
                None => {
                    println!("Closing the chat.");
                    runner.send_quit().await?;
                    break;
                }
            },
        }
    }

    receiver.stop().await?;
    Ok(())
}

async fn clean(config: &Config, key: &str) -> Result<()> {
    let record_key = RecordKey::from_token(key)?;

    let client = RemoteDht::connect(&config.service_addr)
        .await
        .with_context(|| format!("Failed to reach the DHT service at {}", config.service_addr))?;

    client.close_record(&record_key).await?;
    client.delete_record(&record_key).await?;

    println!("Deleted {}.", key);
    Ok(())
}
