//! Shell Session Handling
//!
//! Each TCP connection gets its own session task running a small state
//! machine:
//!
//! ```text
//! accept
//!   │
//!   ▼
//! AWAIT_AUTH ──token ok, room free──> READY ──exit/EOF──> CLOSED
//!   │  ▲                               │  ▲
//!   │  └── bad token (authorize_again) │  └── commands / attributes
//!   │                                  │
//!   └── auth timer / lockdown / full room / attempts exhausted ──> CLOSED
//! ```
//!
//! Sessions default to echo mode (human-oriented text with ANSI color and
//! a prompt) and can switch to JSON mode (one envelope per line).
//! Attribute lines starting with `@` adjust session modes in either state
//! without consuming an authentication attempt.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::server::commands::{parse, CommandHandler};
use crate::server::lockdown::LockdownTracker;
use crate::server::response::{ansi, render_echo, render_json, Reply, Status};
use crate::server::tokens::TokenFile;
use crate::storage::store::Store;

/// Hard ceiling on one input line, applied even when the configured limit
/// is "unlimited". Protects the read buffer, not the user.
const MAX_LINE_BYTES: u64 = 1024 * 1024;

/// The greeting every fresh connection receives.
const GREETING: &str = "Access token: ";

/// Counters shared by all sessions.
#[derive(Debug, Default)]
pub struct ShellStats {
    pub connections_accepted: AtomicU64,
    pub active_sessions: AtomicU64,
    pub commands_processed: AtomicU64,
    pub logins_failed: AtomicU64,
}

/// Everything a session needs, shared across all connections.
pub struct ShellState {
    pub store: Arc<Store>,
    pub handler: CommandHandler,
    pub tokens: TokenFile,
    pub lockdown: LockdownTracker,
    pub stats: ShellStats,

    auth_timeout: Duration,
    max_input_size: u64,
    use_colors: bool,
    log_connections: bool,
    log_logins: bool,

    /// Live session count per token.
    session_counts: Mutex<HashMap<String, i64>>,
}

impl ShellState {
    /// Builds the shared state from configuration.
    ///
    /// `lockdown_path` is the sidecar location — the process working
    /// directory in production, a scratch directory in tests.
    pub fn new(
        config: &Config,
        store: Arc<Store>,
        tokens: TokenFile,
        lockdown_path: PathBuf,
    ) -> ShellState {
        let lockdown = LockdownTracker::new(
            config.server.cli_lockdown,
            config.server.max_cli_login_attempt,
            config.server.cli_cooldown,
            lockdown_path,
        );
        ShellState {
            handler: CommandHandler::new(Arc::clone(&store)),
            store,
            tokens,
            lockdown,
            stats: ShellStats::default(),
            auth_timeout: Duration::from_millis(config.server.cli_authentication_timeout.max(1000)),
            max_input_size: config.max_input_size(),
            use_colors: config.logs.use_colors,
            log_connections: config.logs.save_cli_connections,
            log_logins: config.logs.save_cli_logins,
            session_counts: Mutex::new(HashMap::new()),
        }
    }

    fn sessions_for(&self, token: &str) -> i64 {
        *self
            .session_counts
            .lock()
            .expect("session count mutex poisoned")
            .get(token)
            .unwrap_or(&0)
    }

    fn adjust_sessions(&self, token: &str, delta: i64) {
        let mut counts = self
            .session_counts
            .lock()
            .expect("session count mutex poisoned");
        let count = counts.entry(token.to_string()).or_insert(0);
        *count += delta;
        if *count <= 0 {
            counts.remove(token);
        }
    }
}

/// Output rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Echo,
    Json,
}

/// One connected shell session.
pub struct Session {
    id: Uuid,
    addr: SocketAddr,
    state: Arc<ShellState>,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    mode: Mode,
    timing: bool,
    alias: String,
    token: Option<String>,
}

/// What a read attempt produced.
enum Input {
    Line(String),
    Oversize(u64),
    Eof,
}

impl Session {
    fn new(stream: TcpStream, addr: SocketAddr, state: Arc<ShellState>) -> Session {
        state.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
        state.stats.active_sessions.fetch_add(1, Ordering::Relaxed);
        let (read_half, write_half) = stream.into_split();
        Session {
            id: Uuid::new_v4(),
            addr,
            state,
            reader: BufReader::new(read_half),
            writer: write_half,
            mode: Mode::Echo,
            timing: false,
            alias: String::new(),
            token: None,
        }
    }

    /// Runs the session to completion.
    async fn run(mut self) {
        if self.state.log_connections {
            info!(session = %self.id, client = %self.addr, "shell session opened");
        }

        let authorized = match self.await_auth().await {
            Ok(authorized) => authorized,
            Err(e) => {
                debug!(session = %self.id, error = %e, "session io error during auth");
                false
            }
        };

        if authorized {
            if let Err(e) = self.command_loop().await {
                debug!(session = %self.id, error = %e, "session io error");
            }
        }

        if let Some(token) = &self.token {
            self.state.adjust_sessions(token, -1);
        }
        self.state.stats.active_sessions.fetch_sub(1, Ordering::Relaxed);
        if self.state.log_connections {
            info!(session = %self.id, client = %self.addr, "shell session closed");
        }
    }

    // ------------------------------------------------------------------
    // AWAIT_AUTH
    // ------------------------------------------------------------------

    /// Drives the authentication phase. Returns true when the session
    /// reached READY.
    async fn await_auth(&mut self) -> std::io::Result<bool> {
        self.writer.write_all(GREETING.as_bytes()).await?;
        self.writer.flush().await?;

        let deadline = tokio::time::Instant::now() + self.state.auth_timeout;
        loop {
            let input = match tokio::time::timeout_at(deadline, self.read_line()).await {
                Ok(input) => input?,
                Err(_) => {
                    let reply =
                        Reply::status("auth", "authentication timed out", Status::Timeout);
                    self.send(&reply).await?;
                    return Ok(false);
                }
            };

            let line = match input {
                Input::Line(line) => line,
                Input::Oversize(_) => {
                    let reply =
                        Reply::status("auth", "input exceeds size limit", Status::SizeLimit);
                    self.send(&reply).await?;
                    continue;
                }
                Input::Eof => return Ok(false),
            };

            if let Some(attr) = line.strip_prefix('@') {
                let reply = self.apply_attribute(attr);
                self.send(&reply).await?;
                if self.mode == Mode::Echo {
                    self.write_raw(GREETING).await?;
                }
                continue;
            }

            match self.try_token(&line) {
                AuthOutcome::Authorized { alias } => {
                    self.alias = alias;
                    self.token = Some(line);
                    let reply = Reply::status(
                        "auth",
                        format!("authorized as {}", self.alias),
                        Status::Authorized,
                    );
                    self.send(&reply).await?;
                    if self.mode == Mode::Echo {
                        let banner = self.banner();
                        self.write_raw(&banner).await?;
                        self.write_prompt().await?;
                    }
                    if self.state.log_logins {
                        info!(session = %self.id, alias = %self.alias, "login succeeded");
                    }
                    return Ok(true);
                }
                AuthOutcome::Denied { closing } => {
                    self.state.stats.logins_failed.fetch_add(1, Ordering::Relaxed);
                    let reply = Reply::status(
                        "auth",
                        "invalid access token",
                        Status::AuthorizeAgain,
                    );
                    self.send(&reply).await?;
                    if closing {
                        return Ok(false);
                    }
                    if self.mode == Mode::Echo {
                        self.write_raw(GREETING).await?;
                    }
                }
                AuthOutcome::RoomFull => {
                    let reply = Reply::status(
                        "auth",
                        "no connection slot left for this token",
                        Status::FullRoom,
                    );
                    self.send(&reply).await?;
                    return Ok(false);
                }
            }
        }
    }

    fn try_token(&self, token: &str) -> AuthOutcome {
        let ip = self.addr.ip().to_string();
        let subject = self.state.lockdown.subject(&ip, token);

        // A locked-out subject is refused before any token validation, with
        // the same reply a bad token gets.
        if let Some(subject) = &subject {
            if self.state.lockdown.is_locked_down(subject) {
                if self.state.log_logins {
                    warn!(session = %self.id, subject = %subject, cause = "lockdown", "login refused");
                }
                return AuthOutcome::Denied { closing: false };
            }
        }

        match self.state.tokens.lookup(token) {
            Some(info) => {
                if info.max_connections >= 0
                    && self.state.sessions_for(token) >= info.max_connections
                {
                    warn!(session = %self.id, alias = %info.alias, "room full for token");
                    return AuthOutcome::RoomFull;
                }
                self.state.adjust_sessions(token, 1);
                AuthOutcome::Authorized {
                    alias: info.alias.clone(),
                }
            }
            None => {
                let closing = match &subject {
                    Some(subject) => {
                        let locked = self.state.lockdown.record_failure(subject);
                        if self.state.log_logins {
                            warn!(session = %self.id, subject = %subject, cause = "bad_token", "login failed");
                        }
                        // The attempt that locks the subject out also ends
                        // the connection.
                        locked
                    }
                    None => false,
                };
                AuthOutcome::Denied { closing }
            }
        }
    }

    // ------------------------------------------------------------------
    // READY
    // ------------------------------------------------------------------

    async fn command_loop(&mut self) -> std::io::Result<()> {
        loop {
            let line = match self.read_line().await? {
                Input::Line(line) => line,
                Input::Oversize(size) => {
                    debug!(session = %self.id, size, "oversized input");
                    let reply =
                        Reply::status("input", "input exceeds size limit", Status::SizeLimit);
                    self.send(&reply).await?;
                    self.write_prompt().await?;
                    continue;
                }
                Input::Eof => return Ok(()),
            };

            if let Some(attr) = line.strip_prefix('@') {
                let reply = self.apply_attribute(attr);
                self.send(&reply).await?;
                self.write_prompt().await?;
                continue;
            }

            let Some(parsed) = parse(&line) else {
                self.write_prompt().await?;
                continue;
            };

            let started = Instant::now();
            let active = self.state.stats.active_sessions.load(Ordering::Relaxed) as usize;
            let mut reply = self.state.handler.dispatch(&parsed, active).await;
            self.state.stats.commands_processed.fetch_add(1, Ordering::Relaxed);

            if self.timing && self.mode == Mode::Echo {
                reply.message = format!(
                    "{}\nTook {}ms to execute.",
                    reply.message,
                    started.elapsed().as_millis()
                );
            }

            let exiting = reply.status == Status::Exit;
            if reply.action == "clear" && self.mode == Mode::Echo {
                self.write_raw(ansi::CLEAR).await?;
            } else {
                self.send(&reply).await?;
            }
            if exiting {
                return Ok(());
            }
            self.write_prompt().await?;
        }
    }

    // ------------------------------------------------------------------
    // Attributes and output
    // ------------------------------------------------------------------

    fn apply_attribute(&mut self, attr: &str) -> Reply {
        match attr.trim() {
            "echo" => {
                self.mode = Mode::Echo;
                Reply::status("attribute", "echo mode", Status::ModeChanged)
            }
            "json" => {
                self.mode = Mode::Json;
                Reply::status("attribute", "json mode", Status::ModeChanged)
            }
            "timing on" => {
                self.timing = true;
                Reply::status("attribute", "timing on", Status::ModeChanged)
            }
            "timing off" => {
                self.timing = false;
                Reply::status("attribute", "timing off", Status::ModeChanged)
            }
            other => Reply::status(
                "attribute",
                format!("unknown attribute: @{}", other),
                Status::CommandMismatch,
            ),
        }
    }

    /// Reads one line, enforcing the configured input limit and the hard
    /// line ceiling.
    async fn read_line(&mut self) -> std::io::Result<Input> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(Input::Eof);
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        let size = trimmed.len() as u64;
        let limit = self.state.max_input_size;
        if (limit > 0 && size > limit) || size > MAX_LINE_BYTES {
            return Ok(Input::Oversize(size));
        }
        Ok(Input::Line(trimmed.to_string()))
    }

    async fn send(&mut self, reply: &Reply) -> std::io::Result<()> {
        let mut out = match self.mode {
            Mode::Json => render_json(reply),
            Mode::Echo => render_echo(reply, self.state.use_colors),
        };
        if out.is_empty() && self.mode == Mode::Echo {
            return Ok(());
        }
        out.push('\n');
        self.writer.write_all(out.as_bytes()).await?;
        self.writer.flush().await
    }

    async fn write_raw(&mut self, text: &str) -> std::io::Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.flush().await
    }

    async fn write_prompt(&mut self) -> std::io::Result<()> {
        if self.mode == Mode::Echo {
            let prompt = format!("{}> ", self.alias);
            self.write_raw(&prompt).await?;
        }
        Ok(())
    }

    fn banner(&self) -> String {
        format!(
            "SnowKV v{} | {} shards | {} bytes resident\n",
            crate::VERSION,
            self.state.store.shard_count(),
            self.state.store.memory_used(),
        )
    }
}

enum AuthOutcome {
    Authorized { alias: String },
    Denied { closing: bool },
    RoomFull,
}

/// Handles one accepted connection to completion.
///
/// This is the entry point the accept loop spawns per client.
pub async fn handle_session(stream: TcpStream, addr: SocketAddr, state: Arc<ShellState>) {
    Session::new(stream, addr, state).run().await;
}
