//! Closed command vocabulary for the Redis dispatcher.
//!
//! A statement like `ZADD scores 1 alice 2 bob` is tokenized, its first
//! token matched against [`RedisCommand`], and the remaining tokens
//! validated and shaped per command before the native call is built. A
//! command name outside the vocabulary is rejected - the dispatcher never
//! invokes an arbitrarily-named native command.

use crate::models::QueryParam;
use thiserror::Error;

/// Dispatch failure. `Unknown` propagates as a hard
/// `UnsupportedCommand` error; `Arity` is a statement-level failure
/// captured into the query result.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unsupported command: {0}")]
    Unknown(String),

    #[error("{command}: {reason}")]
    Arity {
        command: &'static str,
        reason: String,
    },
}

/// The complete command vocabulary of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedisCommand {
    Get,
    Set,
    Del,
    Exists,
    Expire,
    Ttl,
    Persist,
    Type,
    Keys,
    Scan,
    Incr,
    Decr,
    Append,
    Strlen,
    HSet,
    HGet,
    HGetAll,
    HDel,
    HLen,
    LPush,
    RPush,
    LPop,
    RPop,
    LRange,
    LLen,
    SAdd,
    SRem,
    SMembers,
    SCard,
    ZAdd,
    ZRange,
    ZCard,
    ZScore,
    ZRem,
    Info,
    DbSize,
    Select,
    FlushDb,
    Ping,
    Echo,
    Publish,
    PubSub,
    SlowLog,
}

impl RedisCommand {
    /// Match a command name case-insensitively against the vocabulary.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "SET" => Some(Self::Set),
            "DEL" => Some(Self::Del),
            "EXISTS" => Some(Self::Exists),
            "EXPIRE" => Some(Self::Expire),
            "TTL" => Some(Self::Ttl),
            "PERSIST" => Some(Self::Persist),
            "TYPE" => Some(Self::Type),
            "KEYS" => Some(Self::Keys),
            "SCAN" => Some(Self::Scan),
            "INCR" => Some(Self::Incr),
            "DECR" => Some(Self::Decr),
            "APPEND" => Some(Self::Append),
            "STRLEN" => Some(Self::Strlen),
            "HSET" => Some(Self::HSet),
            "HGET" => Some(Self::HGet),
            "HGETALL" => Some(Self::HGetAll),
            "HDEL" => Some(Self::HDel),
            "HLEN" => Some(Self::HLen),
            "LPUSH" => Some(Self::LPush),
            "RPUSH" => Some(Self::RPush),
            "LPOP" => Some(Self::LPop),
            "RPOP" => Some(Self::RPop),
            "LRANGE" => Some(Self::LRange),
            "LLEN" => Some(Self::LLen),
            "SADD" => Some(Self::SAdd),
            "SREM" => Some(Self::SRem),
            "SMEMBERS" => Some(Self::SMembers),
            "SCARD" => Some(Self::SCard),
            "ZADD" => Some(Self::ZAdd),
            "ZRANGE" => Some(Self::ZRange),
            "ZCARD" => Some(Self::ZCard),
            "ZSCORE" => Some(Self::ZScore),
            "ZREM" => Some(Self::ZRem),
            "INFO" => Some(Self::Info),
            "DBSIZE" => Some(Self::DbSize),
            "SELECT" => Some(Self::Select),
            "FLUSHDB" => Some(Self::FlushDb),
            "PING" => Some(Self::Ping),
            "ECHO" => Some(Self::Echo),
            "PUBLISH" => Some(Self::Publish),
            "PUBSUB" => Some(Self::PubSub),
            "SLOWLOG" => Some(Self::SlowLog),
            _ => None,
        }
    }

    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Set => "SET",
            Self::Del => "DEL",
            Self::Exists => "EXISTS",
            Self::Expire => "EXPIRE",
            Self::Ttl => "TTL",
            Self::Persist => "PERSIST",
            Self::Type => "TYPE",
            Self::Keys => "KEYS",
            Self::Scan => "SCAN",
            Self::Incr => "INCR",
            Self::Decr => "DECR",
            Self::Append => "APPEND",
            Self::Strlen => "STRLEN",
            Self::HSet => "HSET",
            Self::HGet => "HGET",
            Self::HGetAll => "HGETALL",
            Self::HDel => "HDEL",
            Self::HLen => "HLEN",
            Self::LPush => "LPUSH",
            Self::RPush => "RPUSH",
            Self::LPop => "LPOP",
            Self::RPop => "RPOP",
            Self::LRange => "LRANGE",
            Self::LLen => "LLEN",
            Self::SAdd => "SADD",
            Self::SRem => "SREM",
            Self::SMembers => "SMEMBERS",
            Self::SCard => "SCARD",
            Self::ZAdd => "ZADD",
            Self::ZRange => "ZRANGE",
            Self::ZCard => "ZCARD",
            Self::ZScore => "ZSCORE",
            Self::ZRem => "ZREM",
            Self::Info => "INFO",
            Self::DbSize => "DBSIZE",
            Self::Select => "SELECT",
            Self::FlushDb => "FLUSHDB",
            Self::Ping => "PING",
            Self::Echo => "ECHO",
            Self::Publish => "PUBLISH",
            Self::PubSub => "PUBSUB",
            Self::SlowLog => "SLOWLOG",
        }
    }

    /// Validate argument count and shape for this command.
    fn check_args(&self, args: &[String]) -> Result<(), CommandError> {
        let n = args.len();
        match self {
            Self::Get
            | Self::Ttl
            | Self::Persist
            | Self::Type
            | Self::Keys
            | Self::Incr
            | Self::Decr
            | Self::Strlen
            | Self::HGetAll
            | Self::HLen
            | Self::LLen
            | Self::SMembers
            | Self::SCard
            | Self::ZCard
            | Self::Echo => self.exactly(n, 1),

            Self::HGet | Self::Append | Self::ZScore => self.exactly(n, 2),

            Self::Del | Self::Exists => self.at_least(n, 1),

            Self::HDel | Self::LPush | Self::RPush | Self::SAdd | Self::SRem | Self::ZRem => {
                self.at_least(n, 2)
            }

            Self::Set => self.at_least(n, 2),

            Self::Expire => {
                self.exactly(n, 2)?;
                self.integer_arg(&args[1], "TTL seconds")
            }

            Self::Scan => {
                self.at_least(n, 1)?;
                self.integer_arg(&args[0], "cursor")
            }

            Self::Select => {
                self.exactly(n, 1)?;
                self.integer_arg(&args[0], "database index")
            }

            Self::LPop | Self::RPop => {
                if n == 2 {
                    self.integer_arg(&args[1], "count")
                } else {
                    self.exactly(n, 1)
                }
            }

            Self::LRange => {
                self.exactly(n, 3)?;
                self.integer_arg(&args[1], "start")?;
                self.integer_arg(&args[2], "stop")
            }

            Self::ZRange => {
                // key start stop [WITHSCORES]
                if n != 3 && n != 4 {
                    return Err(self.arity("expected key, start, stop"));
                }
                self.integer_arg(&args[1], "start")?;
                self.integer_arg(&args[2], "stop")?;
                if n == 4 && !args[3].eq_ignore_ascii_case("WITHSCORES") {
                    return Err(self.arity(format!("unexpected argument '{}'", args[3])));
                }
                Ok(())
            }

            Self::HSet => {
                // key field value [field value ...]
                if n < 3 || (n - 1) % 2 != 0 {
                    return Err(self.arity("expected key followed by field/value pairs"));
                }
                Ok(())
            }

            Self::ZAdd => {
                // key score member [score member ...]
                if n < 3 || (n - 1) % 2 != 0 {
                    return Err(self.arity("expected key followed by score/member pairs"));
                }
                for pair in args[1..].chunks(2) {
                    if pair[0].parse::<f64>().is_err() {
                        return Err(
                            self.arity(format!("score '{}' is not a number", pair[0]))
                        );
                    }
                }
                Ok(())
            }

            Self::Info => self.at_most(n, 1),
            Self::Ping => self.at_most(n, 1),
            Self::DbSize | Self::FlushDb => self.exactly(n, 0),

            Self::Publish => self.at_least(n, 2),
            Self::PubSub | Self::SlowLog => self.at_least(n, 1),
        }
    }

    fn exactly(&self, n: usize, want: usize) -> Result<(), CommandError> {
        if n == want {
            Ok(())
        } else {
            Err(self.arity(format!("expected {} argument(s), got {}", want, n)))
        }
    }

    fn at_least(&self, n: usize, want: usize) -> Result<(), CommandError> {
        if n >= want {
            Ok(())
        } else {
            Err(self.arity(format!("expected at least {} argument(s), got {}", want, n)))
        }
    }

    fn at_most(&self, n: usize, want: usize) -> Result<(), CommandError> {
        if n <= want {
            Ok(())
        } else {
            Err(self.arity(format!("expected at most {} argument(s), got {}", want, n)))
        }
    }

    fn integer_arg(&self, value: &str, what: &str) -> Result<(), CommandError> {
        if value.parse::<i64>().is_ok() {
            Ok(())
        } else {
            Err(self.arity(format!("{} '{}' is not an integer", what, value)))
        }
    }

    fn arity(&self, reason: impl Into<String>) -> CommandError {
        CommandError::Arity {
            command: self.name(),
            reason: reason.into(),
        }
    }
}

/// Tokenize a statement, dispatch it through the closed vocabulary, and
/// build the native command. Extra `params` are appended as trailing
/// arguments before validation.
pub fn build_command(
    statement: &str,
    params: &[QueryParam],
) -> Result<(RedisCommand, redis::Cmd), CommandError> {
    let mut tokens = statement.split_whitespace();
    let name = tokens
        .next()
        .ok_or_else(|| CommandError::Unknown("<empty>".to_string()))?;
    let command =
        RedisCommand::parse(name).ok_or_else(|| CommandError::Unknown(name.to_string()))?;

    let mut args: Vec<String> = tokens.map(|t| t.to_string()).collect();
    args.extend(params.iter().map(|p| p.as_text()));

    // PUBLISH takes one message argument: everything after the channel is
    // one payload, spaces included.
    if command == RedisCommand::Publish && args.len() > 2 {
        let payload = args.split_off(1).join(" ");
        args.push(payload);
    }

    command.check_args(&args)?;

    let mut cmd = redis::cmd(command.name());
    for arg in &args {
        cmd.arg(arg);
    }
    Ok((command, cmd))
}
