use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::env;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::platforms::{PlatformConnection, RosterQuery};
use crate::types::{ChatEvent, ChatMessage, UserStateNotice};

// Type aliases for cleaner code
type WebSocketWriter = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type Rosters = Arc<RwLock<HashMap<String, BTreeSet<String>>>>;

const TWITCH_IRC_URL: &str = "wss://irc-ws.chat.twitch.tv:443";
const OAUTH_PREFIX: &str = "oauth:";

/// Configuration for Twitch connection
#[derive(Debug, Clone)]
pub struct TwitchConfig {
    pub username: String,
    pub oauth_token: String, // oauth:your_token_here
    /// Channels from TWITCH_CHANNELS; empty means use the config file
    pub channels: Vec<String>,
}

impl TwitchConfig {
    /// Load Twitch configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let username = env::var("TWITCH_USERNAME")
            .context("TWITCH_USERNAME environment variable not set")?;

        let oauth_token = env::var("TWITCH_OAUTH_TOKEN")
            .context("TWITCH_OAUTH_TOKEN environment variable not set")?;

        let channels = env::var("TWITCH_CHANNELS")
            .map(|list| parse_channel_list(&list))
            .unwrap_or_default();

        info!("Loaded Twitch config for user '{}'", username);
        debug!("Channels from environment: {:?}", channels);

        Ok(Self {
            username: username.trim().to_lowercase(),
            oauth_token: normalize_oauth_token(&oauth_token),
            channels,
        })
    }
}

/// Comma separated, lowercased, blanks and leading '#' dropped
pub fn parse_channel_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().trim_start_matches('#').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// IRC PASS needs the `oauth:` prefix; add it when the token lacks one
pub fn normalize_oauth_token(token: &str) -> String {
    let token = token.trim();
    if token.starts_with(OAUTH_PREFIX) {
        token.to_string()
    } else {
        debug!("Adding missing oauth: prefix to token");
        format!("{}{}", OAUTH_PREFIX, token)
    }
}

/// One IRC line split into its parts
#[derive(Debug, PartialEq)]
struct IrcLine<'a> {
    tags: HashMap<&'a str, &'a str>,
    prefix: Option<&'a str>,
    command: &'a str,
    params: Vec<&'a str>,
    trailing: Option<&'a str>,
}

impl<'a> IrcLine<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let mut rest = line.trim_end_matches(|c: char| c == '\r' || c == '\n');

        let mut tags = HashMap::new();
        if let Some(tagged) = rest.strip_prefix('@') {
            let (tag_part, remaining) = tagged.split_once(' ')?;
            for tag in tag_part.split(';') {
                if let Some((key, value)) = tag.split_once('=') {
                    tags.insert(key, value);
                }
            }
            rest = remaining;
        }

        let mut prefix = None;
        if let Some(prefixed) = rest.strip_prefix(':') {
            let (prefix_part, remaining) = prefixed.split_once(' ')?;
            prefix = Some(prefix_part);
            rest = remaining;
        }

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };

        let mut words = head.split_whitespace();
        let command = words.next()?;
        Some(Self {
            tags,
            prefix,
            command,
            params: words.collect(),
            trailing,
        })
    }

    /// Nick from `nick!user@host`
    fn nick(&self) -> Option<&'a str> {
        self.prefix
            .and_then(|p| p.split('!').next())
            .filter(|n| !n.is_empty())
    }

    fn channel(&self) -> Option<String> {
        self.params
            .iter()
            .find(|p| p.starts_with('#'))
            .map(|c| c.trim_start_matches('#').to_lowercase())
    }

    fn tag(&self, key: &str) -> Option<&'a str> {
        self.tags.get(key).copied().filter(|v| !v.is_empty())
    }

    fn badges(&self) -> Vec<String> {
        self.tag("badges")
            .map(|badges| {
                badges
                    .split(',')
                    .filter_map(|b| b.split('/').next())
                    .filter(|b| !b.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Handles lines read from the socket: keeps rosters current and turns
/// chat traffic into events
#[derive(Clone)]
struct LineHandler {
    own_username: String,
    events: broadcast::Sender<ChatEvent>,
    rosters: Rosters,
}

impl LineHandler {
    /// Returns the reply to send back, if any (PONG)
    async fn handle(&self, raw: &str) -> Option<String> {
        let line = match IrcLine::parse(raw) {
            Some(line) => line,
            None => {
                debug!("Unparseable IRC line: {}", raw);
                return None;
            }
        };

        match line.command {
            "PING" => {
                return Some(format!("PONG :{}", line.trailing.unwrap_or("tmi.twitch.tv")));
            }
            "PRIVMSG" => {
                if let Some(message) = Self::chat_message(&line) {
                    self.add_to_roster(&message.channel, &message.username).await;
                    self.emit(ChatEvent::Message(message));
                }
            }
            "USERSTATE" => {
                if let Some(channel) = line.channel() {
                    self.emit(ChatEvent::UserState(UserStateNotice {
                        channel,
                        login: line.tag("login").map(str::to_lowercase),
                        display_name: line.tag("display-name").map(String::from),
                    }));
                }
            }
            "JOIN" => {
                if let (Some(channel), Some(user)) = (line.channel(), line.nick()) {
                    let user = user.to_lowercase();
                    self.add_to_roster(&channel, &user).await;
                    if user != self.own_username {
                        self.emit(ChatEvent::Join {
                            channel,
                            username: user,
                        });
                    }
                }
            }
            "PART" => {
                if let (Some(channel), Some(user)) = (line.channel(), line.nick()) {
                    if let Some(roster) = self.rosters.write().await.get_mut(&channel) {
                        roster.remove(&user.to_lowercase());
                    }
                }
            }
            // NAMES reply: <nick> = #channel :user user user
            "353" => {
                if let (Some(channel), Some(users)) = (line.channel(), line.trailing) {
                    let mut rosters = self.rosters.write().await;
                    let roster = rosters.entry(channel).or_default();
                    roster.extend(users.split_whitespace().map(|u| u.to_lowercase()));
                }
            }
            "NOTICE" => {
                if let Some(text) = line.trailing {
                    warn!("Twitch notice: {}", text);
                }
            }
            "RECONNECT" => {
                warn!("Twitch requested a reconnect");
            }
            _ => {}
        }

        None
    }

    fn chat_message(line: &IrcLine<'_>) -> Option<ChatMessage> {
        let channel = line.channel()?;
        let username = line.nick()?.to_lowercase();
        let content = line.trailing.unwrap_or_default();

        Some(ChatMessage {
            platform: "twitch".to_string(),
            channel,
            username,
            display_name: line.tag("display-name").map(String::from),
            content: content.to_string(),
            timestamp: chrono::Utc::now(),
            user_badges: line.badges(),
            is_mod: line.tag("mod") == Some("1"),
            is_subscriber: line.tag("subscriber") == Some("1"),
        })
    }

    async fn add_to_roster(&self, channel: &str, user: &str) {
        self.rosters
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .insert(user.to_string());
    }

    fn emit(&self, event: ChatEvent) {
        // no receivers yet is not an error
        let _ = self.events.send(event);
    }
}

/// Twitch IRC connection implementation
pub struct TwitchConnection {
    config: TwitchConfig,
    event_sender: broadcast::Sender<ChatEvent>,
    websocket_writer: Arc<RwLock<Option<WebSocketWriter>>>,
    is_connected: Arc<RwLock<bool>>,
    rosters: Rosters,
}

impl TwitchConnection {
    pub fn new(config: TwitchConfig) -> Self {
        let (event_sender, _) = broadcast::channel(1000);
        Self {
            config,
            event_sender,
            websocket_writer: Arc::new(RwLock::new(None)),
            is_connected: Arc::new(RwLock::new(false)),
            rosters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn send_raw(&self, line: String) -> Result<()> {
        let mut writer = self.websocket_writer.write().await;
        match writer.as_mut() {
            Some(writer) => writer
                .send(Message::Text(format!("{}\r\n", line)))
                .await
                .context("Failed to write to Twitch WebSocket"),
            None => Err(anyhow::anyhow!("Not connected to Twitch")),
        }
    }
}

#[async_trait]
impl PlatformConnection for TwitchConnection {
    async fn connect(&self) -> Result<()> {
        info!("Connecting to Twitch IRC...");

        let url = Url::parse(TWITCH_IRC_URL).context("Failed to parse Twitch WebSocket URL")?;

        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to Twitch WebSocket")?;

        let (write, mut read) = ws_stream.split();
        *self.websocket_writer.write().await = Some(write);

        // Authenticate with Twitch
        self.send_raw(format!("PASS {}", self.config.oauth_token))
            .await
            .context("Failed to send PASS command")?;
        self.send_raw(format!("NICK {}", self.config.username))
            .await
            .context("Failed to send NICK command")?;

        // membership gives us JOIN/PART and NAMES for rosters
        self.send_raw("CAP REQ :twitch.tv/tags twitch.tv/commands twitch.tv/membership".to_string())
            .await
            .context("Failed to request capabilities")?;

        *self.is_connected.write().await = true;

        let handler = LineHandler {
            own_username: self.config.username.clone(),
            events: self.event_sender.clone(),
            rosters: Arc::clone(&self.rosters),
        };
        let writer = Arc::clone(&self.websocket_writer);
        let is_connected = Arc::clone(&self.is_connected);

        tokio::spawn(async move {
            info!("Twitch message reader started");

            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        for line in text.split("\r\n").filter(|l| !l.trim().is_empty()) {
                            debug!("Received: {}", line);
                            if let Some(reply) = handler.handle(line).await {
                                if let Some(writer) = writer.write().await.as_mut() {
                                    if let Err(e) = writer.send(Message::Text(format!("{}\r\n", reply))).await {
                                        error!("Failed to send PONG: {}", e);
                                    }
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        debug!("Received ping, sending pong");
                        if let Some(writer) = writer.write().await.as_mut() {
                            if let Err(e) = writer.send(Message::Pong(payload)).await {
                                error!("Failed to send pong: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(close_frame))) => {
                        info!("WebSocket connection closed: {:?}", close_frame);
                        break;
                    }
                    Some(Ok(_)) => {
                        debug!("Ignoring non-text WebSocket frame");
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        warn!("WebSocket stream ended");
                        break;
                    }
                }
            }

            *is_connected.write().await = false;
            warn!("Twitch connection handler exited");
        });

        info!("Successfully connected to Twitch IRC");
        Ok(())
    }

    async fn join(&self, channel: &str) -> Result<()> {
        let channel = channel.to_lowercase();
        self.send_raw(format!("JOIN #{}", channel))
            .await
            .with_context(|| format!("Failed to join channel: {}", channel))?;
        self.rosters.write().await.entry(channel).or_default();
        Ok(())
    }

    async fn leave(&self, channel: &str) -> Result<()> {
        let channel = channel.to_lowercase();
        self.send_raw(format!("PART #{}", channel))
            .await
            .with_context(|| format!("Failed to leave channel: {}", channel))?;
        self.rosters.write().await.remove(&channel);
        Ok(())
    }

    async fn send_message(&self, channel: &str, message: &str) -> Result<()> {
        match self.send_raw(format!("PRIVMSG #{} :{}", channel, message)).await {
            Ok(()) => {
                debug!("Sent message to #{}: {}", channel, message);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send message to #{}: {}", channel, e);
                Err(e)
            }
        }
    }

    async fn send_moderation_directive(&self, channel: &str, username: &str) -> Result<()> {
        self.send_message(channel, &format!("/ban {}", username)).await
    }

    fn platform_name(&self) -> &str {
        "twitch"
    }

    async fn is_connected(&self) -> bool {
        *self.is_connected.read().await
    }

    fn get_event_receiver(&self) -> Option<broadcast::Receiver<ChatEvent>> {
        Some(self.event_sender.subscribe())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.is_connected.write().await = false;
        if let Some(mut writer) = self.websocket_writer.write().await.take() {
            if let Err(e) = writer.close().await {
                debug!("Error closing WebSocket: {}", e);
            }
        }
        info!("Disconnected from Twitch");
        Ok(())
    }
}

#[async_trait]
impl RosterQuery for TwitchConnection {
    async fn list_users(&self, channel: &str) -> Result<Vec<String>> {
        if !self.is_connected().await {
            return Err(anyhow::anyhow!("Not connected to Twitch"));
        }
        self.rosters
            .read()
            .await
            .get(&channel.to_lowercase())
            .map(|roster| roster.iter().cloned().collect())
            .ok_or_else(|| anyhow::anyhow!("Not present in #{}", channel))
    }
}
