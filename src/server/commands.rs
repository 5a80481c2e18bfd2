//! Command Parser & Registry
//!
//! Turns a shell input line into a dispatched command:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ tokenize()  │───>│  registry   │───>│  cmd_*()    │      │
//! │  │  + Parsed   │    │  validator  │    │  executors  │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                             Store           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The tokenizer accepts double- and single-quoted strings (no escapes),
//! `--name=value`, `--name` and `-x` boolean flags, and bare tokens. The
//! first token names the command; the rest split into positionals and a
//! flag map.
//!
//! Dispatch outcomes: unknown command → status 3, validator refusal →
//! status 4, executor error → status 5.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::aol::line::parse_value;
use crate::codec::value::Value;
use crate::server::response::{Reply, Status};
use crate::storage::store::{sanitize_key, SetOutcome, Store};

/// A tokenized input line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parsed {
    /// The command name, lowercased.
    pub command: String,

    /// Positional arguments in order.
    pub args: Vec<String>,

    /// Flag map; boolean flags carry `"true"`.
    pub flags: HashMap<String, String>,
}

impl Parsed {
    /// True when any of the given flag names is present.
    pub fn has_flag(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.flags.contains_key(*n))
    }
}

/// Splits an input line into raw tokens.
///
/// Quotes group whitespace into one token and are stripped; there are no
/// escape sequences inside them.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Parses an input line into a [`Parsed`] command.
///
/// Returns `None` for an empty line. A leading dash followed by digits is
/// a positional (negative numbers are values, not flags).
pub fn parse(input: &str) -> Option<Parsed> {
    let mut tokens = tokenize(input).into_iter();
    let command = tokens.next()?.to_lowercase();

    let mut parsed = Parsed {
        command,
        ..Parsed::default()
    };

    for token in tokens {
        if let Some(rest) = token.strip_prefix("--") {
            match rest.split_once('=') {
                Some((name, value)) => {
                    parsed.flags.insert(name.to_string(), value.to_string());
                }
                None => {
                    parsed.flags.insert(rest.to_string(), "true".to_string());
                }
            }
        } else if token.starts_with('-')
            && token.len() > 1
            && !token[1..].chars().all(|c| c.is_ascii_digit() || c == '.')
        {
            parsed
                .flags
                .insert(token[1..].to_string(), "true".to_string());
        } else {
            parsed.args.push(token);
        }
    }
    Some(parsed)
}

/// Registry metadata for one command.
pub struct CommandSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub usage: &'static str,
    pub description: &'static str,
    validator: fn(&Parsed) -> bool,
}

/// The built-in command registry.
pub const REGISTRY: &[CommandSpec] = &[
    CommandSpec {
        name: "help",
        aliases: &[],
        usage: "help [commands...]",
        description: "Show usage for all commands or the named ones",
        validator: |_| true,
    },
    CommandSpec {
        name: "clear",
        aliases: &["cls"],
        usage: "clear",
        description: "Clear the terminal screen",
        validator: |p| p.args.is_empty(),
    },
    CommandSpec {
        name: "exit",
        aliases: &[],
        usage: "exit [status]",
        description: "Close this session",
        validator: |p| match p.args.as_slice() {
            [] => true,
            [code] => code.parse::<i32>().is_ok(),
            _ => false,
        },
    },
    CommandSpec {
        name: "info",
        aliases: &[],
        usage: "info [server|store|memory|sessions...]",
        description: "Show server and store statistics",
        validator: |_| true,
    },
    CommandSpec {
        name: "get",
        aliases: &[],
        usage: "get <key> [keys...]",
        description: "Read one or more keys",
        validator: |p| !p.args.is_empty(),
    },
    CommandSpec {
        name: "set",
        aliases: &[],
        usage: "set <key> <value> [key value...] | set --json <objects...>",
        description: "Write key/value pairs, or merge JSON objects with --json",
        validator: |p| {
            if p.has_flag(&["json", "j"]) {
                !p.args.is_empty()
            } else {
                !p.args.is_empty() && p.args.len() % 2 == 0
            }
        },
    },
    CommandSpec {
        name: "delete",
        aliases: &["remove"],
        usage: "delete <key> [keys...]",
        description: "Delete one or more keys",
        validator: |p| !p.args.is_empty(),
    },
    CommandSpec {
        name: "sanitize",
        aliases: &[],
        usage: "sanitize <key|value> <input...> [--trim]",
        description: "Show what the sanitizer makes of the input",
        validator: |p| p.args.len() >= 2 && matches!(p.args[0].as_str(), "key" | "value"),
    },
];

/// Finds a command spec by name or alias.
pub fn find_command(name: &str) -> Option<&'static CommandSpec> {
    REGISTRY
        .iter()
        .find(|spec| spec.name == name || spec.aliases.contains(&name))
}

/// Executes parsed commands against the store.
#[derive(Clone)]
pub struct CommandHandler {
    store: Arc<Store>,
    started: Instant,
}

impl CommandHandler {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            started: Instant::now(),
        }
    }

    /// Dispatches a parsed line.
    ///
    /// `active_sessions` is threaded in for the `info` command.
    pub async fn dispatch(&self, parsed: &Parsed, active_sessions: usize) -> Reply {
        let Some(spec) = find_command(&parsed.command) else {
            return Reply::status(
                &parsed.command,
                format!("unknown command: {}", parsed.command),
                Status::CommandNotFound,
            );
        };

        if !(spec.validator)(parsed) {
            return Reply::status(
                spec.name,
                format!("usage: {}", spec.usage),
                Status::CommandMismatch,
            );
        }

        let result = match spec.name {
            "help" => self.cmd_help(parsed),
            "clear" => Ok(Reply::ok("clear", "")),
            "exit" => self.cmd_exit(parsed),
            "info" => self.cmd_info(parsed, active_sessions).await,
            "get" => self.cmd_get(parsed).await,
            "set" => self.cmd_set(parsed).await,
            "delete" => self.cmd_delete(parsed).await,
            "sanitize" => self.cmd_sanitize(parsed),
            _ => unreachable!("registry names are matched exhaustively"),
        };

        result.unwrap_or_else(|e| Reply::status(spec.name, e, Status::UnexpectedError))
    }

    fn cmd_help(&self, parsed: &Parsed) -> Result<Reply, String> {
        let mut lines = Vec::new();
        for spec in REGISTRY {
            if !parsed.args.is_empty()
                && !parsed
                    .args
                    .iter()
                    .any(|a| a == spec.name || spec.aliases.contains(&a.as_str()))
            {
                continue;
            }
            let aliases = if spec.aliases.is_empty() {
                String::new()
            } else {
                format!(" (alias: {})", spec.aliases.join(", "))
            };
            lines.push(format!("{}{}\n    {}", spec.usage, aliases, spec.description));
        }
        if lines.is_empty() {
            return Ok(Reply::status(
                "help",
                "no such command",
                Status::CommandMismatch,
            ));
        }
        Ok(Reply::ok("help", lines.join("\n")))
    }

    fn cmd_exit(&self, parsed: &Parsed) -> Result<Reply, String> {
        let code: i32 = parsed
            .args
            .first()
            .map(|c| c.parse().unwrap_or(0))
            .unwrap_or(0);
        let mut reply = Reply::status("exit", "bye", Status::Exit);
        reply.value = Some(Value::Int(i64::from(code)));
        Ok(reply)
    }

    async fn cmd_info(&self, parsed: &Parsed, active_sessions: usize) -> Result<Reply, String> {
        let stats = self.store.stats().await;
        let wants = |section: &str| {
            parsed.args.is_empty() || parsed.args.iter().any(|a| a == section)
        };

        let mut entries: Vec<(String, Value)> = Vec::new();
        if wants("server") {
            entries.push(("version".to_string(), Value::from(crate::VERSION)));
            entries.push((
                "uptime_secs".to_string(),
                Value::Int(self.started.elapsed().as_secs() as i64),
            ));
        }
        if wants("store") {
            entries.push(("keys".to_string(), Value::Int(stats.keys as i64)));
            entries.push((
                "shards".to_string(),
                Value::Int(self.store.shard_count() as i64),
            ));
            entries.push((
                "active_shards".to_string(),
                Value::Int(self.store.active_shard_count() as i64),
            ));
            entries.push(("free_slots".to_string(), Value::Int(stats.free_slots as i64)));
            entries.push(("sets".to_string(), Value::Int(stats.sets as i64)));
            entries.push(("gets".to_string(), Value::Int(stats.gets as i64)));
            entries.push(("removes".to_string(), Value::Int(stats.removes as i64)));
        }
        if wants("memory") {
            entries.push((
                "memory_used".to_string(),
                Value::Int(stats.memory_used as i64),
            ));
        }
        if wants("sessions") {
            entries.push((
                "active_sessions".to_string(),
                Value::Int(active_sessions as i64),
            ));
        }

        if entries.is_empty() {
            return Ok(Reply::status(
                "info",
                "no such section",
                Status::CommandMismatch,
            ));
        }

        let message = entries
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n");
        let mut reply = Reply::ok("info", message);
        reply.value = Some(Value::Map(entries));
        Ok(reply)
    }

    async fn cmd_get(&self, parsed: &Parsed) -> Result<Reply, String> {
        if parsed.args.len() == 1 {
            return Ok(match self.store.get(&parsed.args[0]).await {
                Some(value) => Reply::with_value("get", "", value),
                None => Reply::status("get", "key doesn't exist", Status::KeyNotExist),
            });
        }

        let mut found: Vec<(String, Value)> = Vec::new();
        let mut missing: Vec<String> = Vec::new();
        for key in &parsed.args {
            match self.store.get(key).await {
                Some(value) => found.push((sanitize_key(key, false), value)),
                None => missing.push(key.clone()),
            }
        }

        if missing.is_empty() {
            return Ok(Reply::with_value("get", "", Value::Map(found)));
        }
        let mut reply = Reply::status(
            "get",
            format!("key doesn't exist: {}", missing.join(", ")),
            Status::KeyNotExist,
        );
        if !found.is_empty() {
            reply.value = Some(Value::Map(found));
            reply.print_value = true;
        }
        Ok(reply)
    }

    async fn cmd_set(&self, parsed: &Parsed) -> Result<Reply, String> {
        let mut pairs: Vec<(String, Value)> = Vec::new();

        if parsed.has_flag(&["json", "j"]) {
            for arg in &parsed.args {
                let json: serde_json::Value =
                    serde_json::from_str(arg).map_err(|e| format!("bad JSON: {}", e))?;
                let serde_json::Value::Object(map) = json else {
                    return Err("JSON argument must be an object".to_string());
                };
                for (k, v) in &map {
                    pairs.push((k.clone(), Value::from_json(v)));
                }
            }
        } else {
            for chunk in parsed.args.chunks(2) {
                // Bare CLI values take their natural type; anything that
                // fails the value grammar is a plain string.
                let value =
                    parse_value(&chunk[1]).unwrap_or_else(|| Value::Str(chunk[1].clone()));
                pairs.push((chunk[0].clone(), value));
            }
        }

        let mut inserted = 0usize;
        let mut updated = 0usize;
        let mut failed: Vec<String> = Vec::new();
        for (key, value) in pairs {
            match self.store.set(&key, value).await {
                SetOutcome::Inserted => inserted += 1,
                SetOutcome::Updated => updated += 1,
                SetOutcome::Failed => failed.push(key),
            }
        }

        if !failed.is_empty() {
            return Ok(Reply::status(
                "set",
                format!("failed to set: {}", failed.join(", ")),
                Status::UnexpectedError,
            ));
        }

        let mut parts = Vec::new();
        if inserted > 0 {
            parts.push(format!("{} {} inserted", inserted, entry_word(inserted)));
        }
        if updated > 0 {
            parts.push(format!("{} {} updated", updated, entry_word(updated)));
        }
        Ok(Reply::ok("set", parts.join(", ")))
    }

    async fn cmd_delete(&self, parsed: &Parsed) -> Result<Reply, String> {
        let mut deleted = 0usize;
        for key in &parsed.args {
            if self.store.remove(key).await {
                deleted += 1;
            }
        }
        if deleted == 0 {
            return Ok(Reply::status(
                "delete",
                "key doesn't exist",
                Status::KeyNotExist,
            ));
        }
        let word = if deleted == 1 { "item" } else { "items" };
        Ok(Reply::ok("delete", format!("{} {} deleted", deleted, word)))
    }

    fn cmd_sanitize(&self, parsed: &Parsed) -> Result<Reply, String> {
        let input = parsed.args[1..].join(" ");
        let output = match parsed.args[0].as_str() {
            "key" => sanitize_key(&input, parsed.has_flag(&["trim"])),
            // Value sanitization is the identity today.
            _ => input,
        };
        Ok(Reply::with_value("sanitize", "", Value::Str(output)))
    }
}

fn entry_word(n: usize) -> &'static str {
    if n == 1 {
        "entry"
    } else {
        "entries"
    }
}
