// ABOUTME: Parses chat lines addressed to the bot into relay commands
// ABOUTME: Recognizes connect/disconnect/publish/subscribe/unsubscribe; anything else passes through

use crate::error::RelayError;
use crate::sanitize::sanitize_token;
use redibot_store::Credential;

/// Mention token the transport prepends when a user addresses the bot
pub fn mention_prefix(bot_id: &str) -> String {
    format!("<@{}>", bot_id)
}

/// A verb and its arguments, as typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The verb, in the case the user typed it
    pub name: String,
    /// Whitespace-separated arguments after the verb
    pub args: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Get an argument by index
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(|s| s.as_str())
    }

    /// Arguments from `index` on, joined by single spaces
    pub fn rest(&self, index: usize) -> String {
        self.args.get(index..).map(|r| r.join(" ")).unwrap_or_default()
    }

    /// Interpret the command.
    ///
    /// Fails with `Usage` when a recognized verb is missing its required argument.
    pub fn as_relay(&self) -> Result<RelayCommand, RelayError> {
        let verb = self.name.to_ascii_lowercase();
        match verb.as_str() {
            "connect" => {
                let host = self
                    .arg(0)
                    .ok_or_else(|| RelayError::Usage("connect <host:port> [password]".into()))?;
                Ok(RelayCommand::Connect {
                    endpoint: sanitize_token(host),
                    credential: Credential::new(self.rest(1)),
                })
            }
            "disconnect" => Ok(RelayCommand::Disconnect),
            "publish" => {
                let channel = self
                    .arg(0)
                    .ok_or_else(|| RelayError::Usage("publish <channel> [message...]".into()))?;
                Ok(RelayCommand::Publish {
                    channel: sanitize_token(channel),
                    message: self.rest(1),
                })
            }
            "subscribe" => {
                let channel = self
                    .arg(0)
                    .ok_or_else(|| RelayError::Usage("subscribe <channel>".into()))?;
                Ok(RelayCommand::Subscribe {
                    channel: sanitize_token(channel),
                })
            }
            "unsubscribe" => {
                let channel = self
                    .arg(0)
                    .ok_or_else(|| RelayError::Usage("unsubscribe <channel>".into()))?;
                Ok(RelayCommand::Unsubscribe {
                    channel: sanitize_token(channel),
                })
            }
            _ => Ok(RelayCommand::Execute {
                verb: self.name.clone(),
                args: self.args.clone(),
            }),
        }
    }
}

/// What the dispatcher should do with a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    Connect {
        endpoint: String,
        credential: Credential,
    },
    Disconnect,
    Publish {
        channel: String,
        message: String,
    },
    Subscribe {
        channel: String,
    },
    Unsubscribe {
        channel: String,
    },
    /// Pass-through store command
    Execute {
        verb: String,
        args: Vec<String>,
    },
}

impl RelayCommand {
    /// Verb label for logs and metrics
    pub fn verb(&self) -> &str {
        match self {
            RelayCommand::Connect { .. } => "connect",
            RelayCommand::Disconnect => "disconnect",
            RelayCommand::Publish { .. } => "publish",
            RelayCommand::Subscribe { .. } => "subscribe",
            RelayCommand::Unsubscribe { .. } => "unsubscribe",
            RelayCommand::Execute { .. } => "execute",
        }
    }
}

/// Result of parsing a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// A command addressed to the bot
    Command(Command),
    /// Not for us, or nothing to do
    Ignore,
}

impl ParseResult {
    pub fn is_ignore(&self) -> bool {
        matches!(self, ParseResult::Ignore)
    }

    pub fn as_command(&self) -> Option<&Command> {
        match self {
            ParseResult::Command(cmd) => Some(cmd),
            ParseResult::Ignore => None,
        }
    }
}

/// Parse a chat line.
///
/// Only lines that start with the bot's mention (`<@BOTID>`) are commands.
/// The line is split on whitespace; the first field is the mention itself
/// and the second is the verb. A line holding nothing but the mention is
/// ignored.
pub fn parse_message(body: &str, bot_id: &str) -> ParseResult {
    if !body.starts_with(&mention_prefix(bot_id)) {
        return ParseResult::Ignore;
    }

    let mut fields = body.split_whitespace().skip(1);
    let Some(verb) = fields.next() else {
        return ParseResult::Ignore;
    };
    ParseResult::Command(Command::new(verb, fields.map(str::to_string).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── parse_message tests ───

    #[test]
    fn test_unaddressed_line_is_ignored() {
        assert!(parse_message("get foo", "U1").is_ignore());
        assert!(parse_message("hey <@U1> get foo", "U1").is_ignore());
        assert!(parse_message("<@U2> get foo", "U1").is_ignore());
    }

    #[test]
    fn test_bare_mention_is_ignored() {
        assert!(parse_message("<@U1>", "U1").is_ignore());
        assert!(parse_message("<@U1>   ", "U1").is_ignore());
    }

    #[test]
    fn test_verb_and_args() {
        let parsed = parse_message("<@U1> SET  greeting   hello", "U1");
        assert_eq!(
            parsed.as_command(),
            Some(&Command::new("SET", vec!["greeting".into(), "hello".into()]))
        );
    }

    #[test]
    fn test_mention_glued_to_verb_is_treated_as_first_field() {
        // "<@U1>get" is one field; the verb is whatever follows it
        let parsed = parse_message("<@U1>get foo", "U1");
        assert_eq!(parsed.as_command(), Some(&Command::new("foo", vec![])));
    }

    // ─── as_relay tests ───

    fn relay(line: &str) -> Result<RelayCommand, RelayError> {
        parse_message(line, "U1")
            .as_command()
            .expect("line should parse")
            .as_relay()
    }

    #[test]
    fn test_connect_sanitizes_host_and_joins_password() {
        let cmd = relay("<@U1> connect <http://redis.local:6379|redis.local:6379> pass word").unwrap();
        assert_eq!(
            cmd,
            RelayCommand::Connect {
                endpoint: "redis.local:6379".into(),
                credential: Credential::new("pass word"),
            }
        );
    }

    #[test]
    fn test_connect_without_password() {
        let cmd = relay("<@U1> connect h:1").unwrap();
        assert!(matches!(cmd, RelayCommand::Connect { ref credential, .. } if credential.is_empty()));
    }

    #[test]
    fn test_our_verbs_are_case_insensitive() {
        assert_eq!(
            relay("<@U1> Subscribe news").unwrap(),
            RelayCommand::Subscribe {
                channel: "news".into()
            }
        );
        assert_eq!(relay("<@U1> DISCONNECT").unwrap(), RelayCommand::Disconnect);
    }

    #[test]
    fn test_publish_joins_message() {
        assert_eq!(
            relay("<@U1> publish news hello   big world").unwrap(),
            RelayCommand::Publish {
                channel: "news".into(),
                message: "hello big world".into(),
            }
        );
        assert_eq!(
            relay("<@U1> publish news").unwrap(),
            RelayCommand::Publish {
                channel: "news".into(),
                message: String::new(),
            }
        );
    }

    #[test]
    fn test_missing_arguments_produce_usage() {
        for line in [
            "<@U1> connect",
            "<@U1> publish",
            "<@U1> subscribe",
            "<@U1> unsubscribe",
        ] {
            assert!(
                matches!(relay(line), Err(RelayError::Usage(_))),
                "expected usage error for {line}"
            );
        }
    }

    #[test]
    fn test_other_verbs_pass_through_verbatim() {
        assert_eq!(
            relay("<@U1> hgetall <#C1|users>").unwrap(),
            RelayCommand::Execute {
                verb: "hgetall".into(),
                args: vec!["<#C1|users>".into()],
            }
        );
    }
}
