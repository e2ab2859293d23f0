//! Command Dispatch Module
//!
//! Maps a parsed request array onto store operations and produces the
//! reply value. Semantic failures (unknown command, bad arity, bad flag)
//! are error replies, never connection errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Notify, RwLock};

use crate::cache::CacheStore;
use crate::cluster::Cluster;
use crate::metrics::ServerMetrics;
use crate::protocol::Value;

// == Command Handler ==
/// Executes requests against the shared store.
///
/// Holds the capacity-pressure handle: a SET never evicts synchronously,
/// but when it leaves the store over budget the maintenance task is woken
/// instead of waiting for its next tick.
pub struct CommandHandler {
    cache: Arc<RwLock<CacheStore>>,
    cluster: Arc<Cluster>,
    metrics: Arc<ServerMetrics>,
    pressure: Arc<Notify>,
    started: Instant,
}

impl CommandHandler {
    pub fn new(
        cache: Arc<RwLock<CacheStore>>,
        cluster: Arc<Cluster>,
        metrics: Arc<ServerMetrics>,
        pressure: Arc<Notify>,
    ) -> Self {
        Self {
            cache,
            cluster,
            metrics,
            pressure,
            started: Instant::now(),
        }
    }

    // == Execute ==
    /// Dispatches one request and returns its reply.
    pub async fn execute(&self, request: Value) -> Value {
        self.metrics.command_processed();

        let Value::Array(parts) = request else {
            return Value::error("ERR wrong number of arguments");
        };
        if parts.is_empty() {
            return Value::error("ERR wrong number of arguments");
        }

        let mut argv = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Value::Bulk(bytes) => argv.push(bytes),
                _ => return Value::error("ERR invalid request"),
            }
        }

        let command = String::from_utf8_lossy(&argv[0]).to_uppercase();
        let args = &argv[1..];

        match command.as_str() {
            "PING" => self.ping(args),
            "GET" => self.get(args).await,
            "SET" => self.set(args).await,
            "DEL" => self.del(args).await,
            "EXISTS" => self.exists(args).await,
            "KEYS" => self.keys(args).await,
            "FLUSHALL" => self.flushall(args).await,
            "INFO" => self.info(args).await,
            _ => Value::error(format!("ERR unknown command '{command}'")),
        }
    }

    // == PING ==
    fn ping(&self, args: &[Vec<u8>]) -> Value {
        match args {
            [] => Value::simple("PONG"),
            [message] => Value::bulk(message.clone()),
            _ => wrong_arity("ping"),
        }
    }

    // == GET ==
    /// Takes the write guard: a hit mutates access metadata and an
    /// observed expiry removes the entry.
    async fn get(&self, args: &[Vec<u8>]) -> Value {
        if args.len() != 1 {
            return wrong_arity("get");
        }

        match self.cache.write().await.get(&args[0]) {
            Some(value) => Value::Bulk(value),
            None => Value::Null,
        }
    }

    // == SET ==
    async fn set(&self, args: &[Vec<u8>]) -> Value {
        if args.len() < 2 {
            return wrong_arity("set");
        }

        let key = args[0].clone();
        let value = args[1].clone();

        let mut ttl: Option<Duration> = None;
        let mut i = 2;
        while i < args.len() {
            let flag = String::from_utf8_lossy(&args[i]).to_uppercase();
            match flag.as_str() {
                "EX" | "PX" => {
                    let Some(raw) = args.get(i + 1) else {
                        return Value::error("ERR syntax error");
                    };
                    let Ok(amount) = String::from_utf8_lossy(raw).parse::<u64>() else {
                        return Value::error("ERR value is not an integer or out of range");
                    };
                    // zero means never expire; when both flags appear,
                    // the later one wins
                    ttl = if amount == 0 {
                        None
                    } else if flag == "EX" {
                        Some(Duration::from_secs(amount))
                    } else {
                        Some(Duration::from_millis(amount))
                    };
                    i += 2;
                }
                _ => return Value::error("ERR syntax error"),
            }
        }

        let over_capacity = {
            let mut cache = self.cache.write().await;
            cache.set(key, value, ttl);
            cache.is_over_capacity()
        };
        if over_capacity {
            self.pressure.notify_one();
        }

        Value::ok()
    }

    // == DEL ==
    async fn del(&self, args: &[Vec<u8>]) -> Value {
        if args.is_empty() {
            return wrong_arity("del");
        }

        let mut cache = self.cache.write().await;
        let mut deleted = 0i64;
        for arg in args {
            if cache.delete(arg) {
                deleted += 1;
            }
        }
        Value::Integer(deleted)
    }

    // == EXISTS ==
    /// Probes through `get` so expired entries count as absent and access
    /// metadata moves like any other read.
    async fn exists(&self, args: &[Vec<u8>]) -> Value {
        if args.is_empty() {
            return wrong_arity("exists");
        }

        let mut cache = self.cache.write().await;
        let mut found = 0i64;
        for arg in args {
            if cache.get(arg).is_some() {
                found += 1;
            }
        }
        Value::Integer(found)
    }

    // == KEYS ==
    async fn keys(&self, args: &[Vec<u8>]) -> Value {
        if args.len() != 1 {
            return wrong_arity("keys");
        }

        let pattern = &args[0];
        let cache = self.cache.read().await;
        let matched: Vec<Value> = cache
            .keys()
            .into_iter()
            .filter(|key| glob_match(key, pattern))
            .map(Value::Bulk)
            .collect();

        Value::Array(matched)
    }

    // == FLUSHALL ==
    async fn flushall(&self, args: &[Vec<u8>]) -> Value {
        if !args.is_empty() {
            return wrong_arity("flushall");
        }

        self.cache.write().await.clear();
        Value::ok()
    }

    // == INFO ==
    /// Plaintext report: sections separated by blank lines, one
    /// `key:value` per line. An optional argument selects one section.
    async fn info(&self, args: &[Vec<u8>]) -> Value {
        if args.len() > 1 {
            return wrong_arity("info");
        }
        let wanted = args
            .first()
            .map(|arg| String::from_utf8_lossy(arg).to_lowercase());

        let (used_memory, max_memory, entry_count, stats) = {
            let cache = self.cache.read().await;
            (
                cache.size_bytes(),
                cache.max_bytes(),
                cache.count(),
                cache.stats(),
            )
        };

        let mut sections: Vec<(&str, Vec<(String, String)>)> = vec![
            (
                "Server",
                vec![
                    ("hpcs_version".into(), env!("CARGO_PKG_VERSION").into()),
                    (
                        "uptime_in_seconds".into(),
                        self.started.elapsed().as_secs().to_string(),
                    ),
                ],
            ),
            (
                "Memory",
                vec![
                    ("used_memory".into(), used_memory.to_string()),
                    ("maxmemory".into(), max_memory.to_string()),
                ],
            ),
            (
                "Stats",
                vec![
                    ("keyspace_hits".into(), stats.hits.to_string()),
                    ("keyspace_misses".into(), stats.misses.to_string()),
                    ("expired_keys".into(), stats.expired.to_string()),
                    ("evicted_keys".into(), stats.evictions.to_string()),
                ],
            ),
            (
                "Clients",
                vec![(
                    "connected_clients".into(),
                    self.metrics.active_connections().to_string(),
                )],
            ),
            (
                "Keyspace",
                vec![("db0".into(), format!("keys={entry_count}"))],
            ),
        ];

        if self.cluster.enabled() {
            let summary = self.cluster.summary().await;
            sections.push((
                "Cluster",
                vec![
                    ("cluster_enabled".into(), "1".into()),
                    ("cluster_known_nodes".into(), summary.known_nodes.to_string()),
                    ("cluster_alive_nodes".into(), summary.alive_nodes.to_string()),
                ],
            ));
        }

        let mut body = String::new();
        for (name, fields) in sections {
            if let Some(wanted) = &wanted {
                if name.to_lowercase() != *wanted {
                    continue;
                }
            }
            if !body.is_empty() {
                body.push_str("\r\n");
            }
            body.push_str(&format!("# {name}\r\n"));
            for (key, value) in fields {
                body.push_str(&format!("{key}:{value}\r\n"));
            }
        }

        Value::bulk(body.into_bytes())
    }
}

fn wrong_arity(command: &str) -> Value {
    Value::error(format!(
        "ERR wrong number of arguments for '{command}' command"
    ))
}

// == Glob Matching ==
/// Byte-wise glob: `*` matches any run of bytes, `?` exactly one byte,
/// everything else is literal. No escaping, no character classes.
pub fn glob_match(input: &[u8], pattern: &[u8]) -> bool {
    if pattern == b"*" {
        return true;
    }
    if !pattern.contains(&b'*') && !pattern.contains(&b'?') {
        return input == pattern;
    }
    glob_match_at(input, pattern)
}

fn glob_match_at(input: &[u8], pattern: &[u8]) -> bool {
    let Some(&first) = pattern.first() else {
        return input.is_empty();
    };

    if first == b'*' {
        // try every split point, including the empty match
        (0..=input.len()).any(|i| glob_match_at(&input[i..], &pattern[1..]))
    } else {
        match input.first() {
            Some(&byte) if first == b'?' || first == byte => {
                glob_match_at(&input[1..], &pattern[1..])
            }
            _ => false,
        }
    }
}
