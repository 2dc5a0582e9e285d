use crate::agent::{ChannelTransport, ClientSyncAgent};
use crate::controller::{EmojiTally, LocalPlayerController, WanderingBot, DEFAULT_RESEND_INTERVAL};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ClientMessage, Hat, ServerMessage, WorldMode};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub hat: Hat,
    pub mode: WorldMode,
    pub tick: Duration,
    /// Zero disables emoji
    pub emoji_every: Duration,
    pub resend_interval: f32,
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3000".to_string(),
            hat: Hat::None,
            mode: WorldMode::Iceberg,
            tick: Duration::from_millis(50),
            emoji_every: Duration::from_secs(5),
            resend_interval: DEFAULT_RESEND_INTERVAL,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// Headless plaza client driven by a [`WanderingBot`]
///
/// Each session opens a WebSocket, joins with the configured hat, then steps
/// the bot once per tick and reports movement through the agent. When the
/// socket drops, [`Client::run_until`] waits `reconnect_delay` and joins again.
pub struct Client {
    config: ClientConfig,
    agent: ClientSyncAgent<ChannelTransport>,
    controller: LocalPlayerController,
    bot: WanderingBot,
    tally: EmojiTally,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_bot(config, WanderingBot::new())
    }

    pub fn with_bot(config: ClientConfig, bot: WanderingBot) -> Self {
        let controller =
            LocalPlayerController::default().with_resend_interval(config.resend_interval);

        Client {
            config,
            agent: ClientSyncAgent::new(ChannelTransport::new()),
            controller,
            bot,
            tally: EmojiTally::new(),
        }
    }

    pub fn agent(&self) -> &ClientSyncAgent<ChannelTransport> {
        &self.agent
    }

    pub fn tally(&self) -> &EmojiTally {
        &self.tally
    }

    /// Runs one WebSocket connection until it closes or fails
    async fn run_session(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to {}", self.config.server_url);
        let (ws_stream, _) = connect_async(self.config.server_url.as_str()).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (sender, mut outbox) = mpsc::unbounded_channel::<ClientMessage>();
        self.agent.transport_mut().attach(sender);

        // Ends once the transport is detached and the queue is drained
        tokio::spawn(async move {
            while let Some(message) = outbox.recv().await {
                let json = match message.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to encode intent: {}", e);
                        continue;
                    }
                };

                if let Err(e) = ws_sender.send(Message::Text(json)).await {
                    debug!("Send failed: {}", e);
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let mut frame_timer = interval(self.config.tick.max(Duration::from_millis(1)));
        frame_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut emoji_timer = if self.config.emoji_every.is_zero() {
            None
        } else {
            let mut timer = interval(self.config.emoji_every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Skip the immediate first tick
            timer.reset();
            Some(timer)
        };

        let mut last_frame = Instant::now();

        loop {
            tokio::select! {
                frame = ws_receiver.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text),
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }

                _ = frame_timer.tick() => {
                    let now = Instant::now();
                    let dt = (now - last_frame).as_secs_f32();
                    last_frame = now;

                    let input = self.bot.next_input();
                    if let Some(intent) = self.controller.update(input, dt) {
                        self.agent.send_move(intent.x, intent.y, intent.direction);
                    }
                }

                _ = next_tick(&mut emoji_timer) => {
                    self.send_random_emoji();
                }
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        let message = match ServerMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring message from server: {}", e);
                return;
            }
        };

        let was_joined = self.agent.is_joined();
        self.agent.handle_server_message(message);

        if !was_joined && self.agent.is_joined() {
            // Announce the current position straight after joining
            self.controller.force_resend();
        }
    }

    fn send_random_emoji(&mut self) {
        if !self.agent.is_joined() {
            return;
        }
        if let Some(emoji) = self.bot.pick_emoji(self.config.mode) {
            if self.agent.send_emoji(emoji) {
                self.tally.record(emoji);
            }
        }
    }

    /// Connects, reconnecting after every drop, until `shutdown` resolves
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future,
    {
        tokio::pin!(shutdown);
        self.agent.confirm_join(self.config.hat);

        loop {
            tokio::select! {
                result = self.run_session() => {
                    match result {
                        Ok(()) => info!("Server closed the connection"),
                        Err(e) => warn!("Connection lost: {}", e),
                    }
                }
                _ = &mut shutdown => break,
            }

            self.agent.transport_mut().detach();
            self.agent.on_disconnect();

            tokio::select! {
                _ = sleep(self.config.reconnect_delay) => {}
                _ = &mut shutdown => break,
            }
        }

        self.agent.transport_mut().detach();
        self.log_summary();
        Ok(())
    }

    fn log_summary(&self) {
        match self.tally.most_used() {
            Some((emoji, count)) => info!(
                "Session over: sent {} emoji, favourite {} ({} times)",
                self.tally.total(),
                emoji,
                count
            ),
            None => info!("Session over: no emoji sent"),
        }
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
