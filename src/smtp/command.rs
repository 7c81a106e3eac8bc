//! SMTP command line parsing.

use std::sync::LazyLock;

use regex::Regex;

static MAIL_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^FROM:\s*<([^<>]*)>(?:\s+(.*))?$").expect("valid MAIL FROM regex")
});

static RCPT_TO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^TO:\s*<([^<>]*)>(?:\s+(.*))?$").expect("valid RCPT TO regex")
});

/// One client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    Mail { from: String, size: Option<usize> },
    Rcpt { to: String },
    Data,
    Rset,
    Noop,
    Quit,
    Vrfy,
    Help,
    StartTls,
    Auth,
    /// Known verb, unusable arguments. Answered with 501.
    Invalid(&'static str),
    Unknown(String),
}

impl Command {
    /// Parse a command line with its line terminator already stripped.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (verb, args) = match line.split_once(' ') {
            Some((v, a)) => (v, a.trim()),
            None => (line, ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "HELO" if args.is_empty() => Self::Invalid("Syntax: HELO hostname"),
            "HELO" => Self::Helo(args.to_string()),
            "EHLO" if args.is_empty() => Self::Invalid("Syntax: EHLO hostname"),
            "EHLO" => Self::Ehlo(args.to_string()),
            "MAIL" => parse_mail(args),
            "RCPT" => match RCPT_TO.captures(args) {
                Some(caps) => Self::Rcpt {
                    to: strip_source_route(&caps[1]),
                },
                None => Self::Invalid("Syntax: RCPT TO:<address>"),
            },
            "DATA" if args.is_empty() => Self::Data,
            "DATA" => Self::Invalid("Syntax: DATA"),
            "RSET" => Self::Rset,
            "NOOP" => Self::Noop,
            "QUIT" => Self::Quit,
            "VRFY" => Self::Vrfy,
            "HELP" => Self::Help,
            "STARTTLS" => Self::StartTls,
            "AUTH" => Self::Auth,
            _ => Self::Unknown(verb.to_string()),
        }
    }
}

fn parse_mail(args: &str) -> Command {
    let Some(caps) = MAIL_FROM.captures(args) else {
        return Command::Invalid("Syntax: MAIL FROM:<address>");
    };

    let mut size = None;
    for param in caps.get(2).map_or("", |m| m.as_str()).split_whitespace() {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        match key.to_ascii_uppercase().as_str() {
            "SIZE" => match value.parse() {
                Ok(n) => size = Some(n),
                Err(_) => return Command::Invalid("Syntax: SIZE=<number>"),
            },
            // BODY=8BITMIME and any other extension parameter has no effect.
            _ => {}
        }
    }

    Command::Mail {
        from: strip_source_route(&caps[1]),
        size,
    }
}

/// Drop an obsolete `@a,@b:` source route prefix.
fn strip_source_route(path: &str) -> String {
    let path = path.trim();
    match path.strip_prefix('@').and_then(|rest| rest.split_once(':')) {
        Some((_, mailbox)) => mailbox.to_string(),
        None => path.to_string(),
    }
}
