//! LMS CLI line codec
//!
//! One command per line, tokens separated by a single space. Every token is
//! percent-escaped the way the server does it (`00:04:20:aa:bb:cc` travels as
//! `00%3A04%3A20%3Aaa%3Abb%3Acc`), so tokens with embedded spaces survive the
//! line framing. Replies use the same escaping and echo the request tokens,
//! with any `?` placeholder replaced by the queried value.
//!
//! Documentation: http://HOST:9000/html/docs/cli-api.html

use super::error::{LmsError, Result};

/// Placeholder token for query commands (`player count ?`)
pub const QUERY: &str = "?";

/// A single CLI command: optional player id, verb, arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    player: Option<String>,
    verb: String,
    args: Vec<String>,
}

impl Command {
    /// Server-level command (no player id)
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            player: None,
            verb: verb.into(),
            args: Vec::new(),
        }
    }

    /// Command addressed to one player (native id)
    pub fn for_player(player: impl Into<String>, verb: impl Into<String>) -> Self {
        Self {
            player: Some(player.into()),
            ..Self::new(verb)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn player(&self) -> Option<&str> {
        self.player.as_deref()
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Tokens in wire order
    pub fn tokens(&self) -> Vec<&str> {
        self.player
            .as_deref()
            .into_iter()
            .chain(std::iter::once(self.verb.as_str()))
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Encode as a wire line (without terminator)
    pub fn encode(&self) -> Result<String> {
        encode_tokens(self.tokens())
    }

    /// Whether the command asks the server to fill in a value
    pub fn is_query(&self) -> bool {
        self.args.iter().any(|a| a == QUERY)
    }

    /// Check that a decoded reply starts with this command's tokens.
    ///
    /// `?` placeholders match any reply token. The wire protocol has no
    /// correlation ids, so the echo is the only way to tell a reply belongs
    /// to this request.
    pub fn verify_echo(&self, reply: &[String]) -> Result<()> {
        let tokens = self.tokens();
        if reply.len() < tokens.len() {
            return Err(LmsError::protocol(format!(
                "reply to '{}' has {} tokens, expected at least {}",
                tokens.join(" "),
                reply.len(),
                tokens.len()
            )));
        }

        for (sent, got) in tokens.iter().zip(reply) {
            if *sent != QUERY && *sent != got {
                return Err(LmsError::protocol(format!(
                    "reply does not echo request '{}': got '{}'",
                    tokens.join(" "),
                    reply.join(" ")
                )));
            }
        }
        Ok(())
    }

    /// Value filled in for the first `?` placeholder of a query reply
    pub fn query_value<'a>(&self, reply: &'a [String]) -> Result<&'a str> {
        self.verify_echo(reply)?;
        let position = self
            .tokens()
            .iter()
            .position(|t| *t == QUERY)
            .ok_or_else(|| {
                LmsError::protocol(format!("'{}' is not a query", self.tokens().join(" ")))
            })?;

        Ok(reply[position].as_str())
    }
}

/// Percent-escape a single token (uppercase hex, URI unreserved set kept)
pub fn escape_token(token: &str) -> String {
    urlencoding::encode(token).into_owned()
}

/// Reverse [`escape_token`]; malformed escapes and non-UTF-8 payloads are errors
pub fn unescape_token(token: &str) -> Result<String> {
    let bytes = token.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let well_formed = bytes.len() >= i + 3
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !well_formed {
                return Err(LmsError::protocol(format!(
                    "unterminated escape sequence at byte {} in '{}'",
                    i, token
                )));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    urlencoding::decode(token)
        .map(|s| s.into_owned())
        .map_err(|e| LmsError::protocol(format!("token '{}' is not UTF-8: {}", token, e)))
}

/// Join escaped tokens into one line.
///
/// An empty token has no wire representation (it would vanish between two
/// separators), so it is rejected rather than silently changing the command.
pub fn encode_tokens<I, S>(tokens: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let escaped = tokens
        .into_iter()
        .enumerate()
        .map(|(i, t)| match t.as_ref() {
            "" => Err(LmsError::protocol(format!("token {} is empty", i))),
            t => Ok(escape_token(t)),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(escaped.join(" "))
}

/// Split a reply line on unescaped whitespace and unescape each token
pub fn decode_line(line: &str) -> Result<Vec<String>> {
    line.split_ascii_whitespace().map(unescape_token).collect()
}
