use crate::ai::{self, ModelInfo};
use crate::channel::{ChannelEvent, LiveChannel};
use crate::error::ChannelError;
use crate::files;
use crate::markup::{self, Style};
use crate::message::{ChannelMode, ChatMessage};
use crate::transport::MessageTransport;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq)]
enum Command {
    /// Switch to the peer room view.
    Peer,
    /// Switch to the AI chat view.
    Ai,
    /// List the models the AI backend offers.
    Models,
    /// Pick the model used for AI chat.
    Model(String),
    /// List files available on the server.
    Files,
    /// Upload a local file.
    Upload(PathBuf),
    /// Download a server file into the download directory.
    Download(String),
    /// Send the text wrapped in an inline style (peer chat only).
    Fmt(Style, String),
    /// Reprint the active log.
    Log,
    Help,
    Quit,
}

const HELP: &str = "\
Commands:
  /peer              switch to the peer room
  /ai                switch to AI chat
  /models            list AI models
  /model <name>      select the AI model
  /files             list server files
  /upload <path>     upload a file
  /download <name>   download a file
  /fmt <style> <text>  send styled text (b, i, u, s, mark)
  /log               reprint the current log
  /help              this text
  /quit              leave
Anything else is sent as a message in the current view.";

/// Parse a `/command` line. Free text returns `None`.
fn parse_command(line: &str) -> Option<Result<Command, String>> {
    let line = line.trim();
    if !line.starts_with('/') {
        return None;
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    Some(match head {
        "/peer" => Ok(Command::Peer),
        "/ai" => Ok(Command::Ai),
        "/models" => Ok(Command::Models),
        "/model" if !rest.is_empty() => Ok(Command::Model(rest.to_string())),
        "/model" => Err("Usage: /model <name>".into()),
        "/files" => Ok(Command::Files),
        "/upload" if !rest.is_empty() => Ok(Command::Upload(PathBuf::from(rest))),
        "/upload" => Err("Usage: /upload <path>".into()),
        "/download" if !rest.is_empty() => Ok(Command::Download(rest.to_string())),
        "/download" => Err("Usage: /download <name>".into()),
        "/fmt" => match rest.split_once(char::is_whitespace) {
            Some((style, text)) if !text.trim().is_empty() => match Style::from_name(style) {
                Some(style) => Ok(Command::Fmt(style, text.trim().to_string())),
                None => Err(format!("Unknown style: {} (b, i, u, s, mark)", style)),
            },
            _ => Err("Usage: /fmt <style> <text>".into()),
        },
        "/log" => Ok(Command::Log),
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        unknown => Err(format!("Unknown command: {} (try /help)", unknown)),
    })
}

/// Line-oriented chat view: owns the channel, reads stdin, prints whatever
/// the active log gains.
pub struct Terminal {
    channel: LiveChannel,
    transport: Arc<dyn MessageTransport>,
    models: Vec<ModelInfo>,
    selected_model: Option<String>,
    download_dir: PathBuf,
}

impl Terminal {
    pub fn new(
        channel: LiveChannel,
        transport: Arc<dyn MessageTransport>,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            channel,
            transport,
            models: Vec::new(),
            selected_model: None,
            download_dir,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        println!(
            "Welcome to ChatBox — connected as {} to {}",
            self.channel.session().identity,
            self.channel.session().base_url
        );
        println!("Type /help for commands.");
        self.channel.open();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                event = self.channel.next_event() => {
                    self.on_channel_event(event);
                }
                line = lines.next_line() => {
                    match line? {
                        Some(line) => {
                            if !self.on_line(&line).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        self.channel.close();
        info!("Session ended");
        Ok(())
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => println!("-- connected --"),
            ChannelEvent::Message(msg) => {
                // Pushed messages live in the peer log; only show them when
                // that log is the one on screen.
                if self.channel.mode() == ChannelMode::Peer {
                    print_message(&msg);
                }
            }
            ChannelEvent::Reconnecting { error, delay } => {
                println!(
                    "-- connection lost ({}), retrying in {:.0?} --",
                    error.unwrap_or_else(|| "stream ended".into()),
                    delay
                );
            }
            ChannelEvent::Disconnected { error } => {
                match error {
                    Some(e) => println!("-- disconnected: {} --", e),
                    None => println!("-- disconnected --"),
                }
            }
        }
    }

    /// Handle one input line; returns false when the session should end.
    async fn on_line(&mut self, line: &str) -> bool {
        match parse_command(line) {
            Some(Ok(Command::Quit)) => return false,
            Some(Ok(command)) => {
                if let Err(e) = self.dispatch(command).await {
                    report(&e);
                }
            }
            Some(Err(usage)) => println!("{}", usage),
            None => {
                if let Err(e) = self.send_text(line).await {
                    report(&e);
                }
            }
        }
        true
    }

    async fn dispatch(&mut self, command: Command) -> Result<(), ChannelError> {
        match command {
            Command::Peer => {
                self.channel.set_mode(ChannelMode::Peer);
                println!("-- peer room --");
                self.reprint_log();
            }
            Command::Ai => {
                self.channel.set_mode(ChannelMode::Ai);
                println!("-- AI chat --");
                if self.models.is_empty() {
                    self.fetch_models().await?;
                }
                self.reprint_log();
            }
            Command::Models => {
                if self.models.is_empty() {
                    self.fetch_models().await?;
                }
                for model in &self.models {
                    let marker = if Some(&model.name) == self.selected_model.as_ref() {
                        "→"
                    } else {
                        " "
                    };
                    println!("{} {}", marker, model.name);
                }
            }
            Command::Model(name) => {
                if self.models.is_empty() {
                    self.fetch_models().await?;
                }
                if !self.models.iter().any(|m| m.name == name) {
                    return Err(ChannelError::Validation(format!(
                        "Unknown model: {} (see /models)",
                        name
                    )));
                }
                self.selected_model = Some(name);
            }
            Command::Files => {
                let files =
                    files::list_files(self.transport.as_ref(), self.channel.session()).await?;
                if files.is_empty() {
                    println!("No files on the server.");
                }
                for file in files {
                    println!("  {}", file);
                }
            }
            Command::Upload(path) => {
                let message =
                    files::upload(self.transport.as_ref(), self.channel.session(), &path).await?;
                println!("{}", message);
            }
            Command::Download(name) => {
                let dest = files::download(
                    self.transport.as_ref(),
                    self.channel.session(),
                    &name,
                    &self.download_dir,
                )
                .await?;
                println!("Saved to {}", dest.display());
            }
            Command::Fmt(style, text) => {
                if self.channel.mode() != ChannelMode::Peer {
                    return Err(ChannelError::Validation(
                        "Formatting is only available in the peer room.".into(),
                    ));
                }
                let (body, _) = markup::wrap(&text, 0..text.len(), style)
                    .ok_or_else(|| ChannelError::Validation("Please enter a message.".into()))?;
                let sent = self.channel.send_peer(&body).await?;
                print_message(&sent);
            }
            Command::Log => self.reprint_log(),
            Command::Help => println!("{}", HELP),
            Command::Quit => unreachable!("handled by on_line"),
        }
        Ok(())
    }

    async fn send_text(&mut self, text: &str) -> Result<(), ChannelError> {
        match self.channel.mode() {
            ChannelMode::Peer => {
                let sent = self.channel.send_peer(text).await?;
                print_message(&sent);
            }
            ChannelMode::Ai => {
                let model = self
                    .selected_model
                    .clone()
                    .ok_or_else(|| ChannelError::Validation("Please select a model.".into()))?;
                println!("Loading...");
                let (sent, reply) = self.channel.send_ai(&model, text).await?;
                print_message(&sent);
                print_message(&reply);
            }
        }
        Ok(())
    }

    async fn fetch_models(&mut self) -> Result<(), ChannelError> {
        self.models = ai::list_models(self.transport.as_ref(), self.channel.session()).await?;
        if self.selected_model.is_none() {
            self.selected_model = self.models.first().map(|m| m.name.clone());
            if let Some(ref name) = self.selected_model {
                info!("Selected model {}", name);
            }
        }
        Ok(())
    }

    fn reprint_log(&self) {
        for msg in self.channel.active_log() {
            print_message(msg);
        }
    }
}

fn print_message(msg: &ChatMessage) {
    println!(
        "[{}] {}: {}",
        msg.sent_at.with_timezone(&chrono::Local).format("%H:%M:%S"),
        msg.author,
        markup::sanitize(&msg.body)
    );
}

fn report(err: &ChannelError) {
    match err {
        ChannelError::Validation(_) => println!("{}", err),
        _ => {
            error!("{}", err);
            println!("An error occurred: {}", err);
        }
    }
}
