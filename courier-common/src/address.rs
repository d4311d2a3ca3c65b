//! Address lists as they appear in `To` and `Cc` headers.
//!
//! Each comma separated entry is either a literal mailbox (`user@domain`,
//! optionally with a display name) or a bare name with no domain, which refers
//! to a user in the [`Directory`](crate::directory::Directory).
//!
//! Entries are parsed with [`mailparse::addrparse`]. Bare names are not valid
//! RFC 5322 mailboxes, so an entry that only parses once qualified with a
//! reserved domain is a directory reference.
//!
//! The alternate form (`{:#}`) renders non-ASCII display names as RFC 2047
//! encoded words, for use in a header block.

use std::fmt::{self, Display};

use mailparse::{MailAddr, SingleInfo};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::encode_text;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Empty address")]
    Empty,
    #[error("Invalid address {entry:?}: {reason}")]
    Unparseable { entry: String, reason: String },
    #[error("Expected a single mailbox in {0:?}")]
    NotAMailbox(String),
    #[error("Invalid local-part: {0:?}")]
    InvalidLocalPart(String),
    #[error("Invalid domain: {0:?}")]
    InvalidDomain(String),
}

/// Lets bare directory names through the mailbox grammar.
const DIRECTORY_DOMAIN: &str = "directory.invalid";

/// RFC 5322 "specials": a display name containing any of these has to be quoted.
const SPECIALS: &[char] = &['(', ')', '<', '>', '@', ',', ':', ';', '.', '\\', '"', '[', ']'];

/// A fully qualified `local-part@domain` address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub local_part: String,
    pub domain: String,
}

impl Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecipientEntry {
    /// An external address, passed through untouched.
    Literal {
        display_name: Option<String>,
        mailbox: Mailbox,
    },
    /// A directory user referenced by name.
    Directory {
        display_name: Option<String>,
        name: String,
    },
}

impl RecipientEntry {
    /// Parse a single entry of an address list.
    ///
    /// # Errors
    ///
    /// Returns an [`AddressError`] when the entry is empty or malformed.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AddressError::Empty);
        }

        match single(input) {
            Ok(info) => {
                let display_name = display_name(info.display_name);
                match info.addr.rsplit_once('@') {
                    Some((local_part, domain)) => {
                        Self::literal(display_name, &info.addr, local_part, domain)
                    }
                    None => Self::directory(display_name, &info.addr),
                }
            }
            // Directory references only parse once given a domain.
            Err(error) => {
                let info = single(&qualify(input)).map_err(|_| error.clone())?;
                let name = info
                    .addr
                    .strip_suffix(DIRECTORY_DOMAIN)
                    .and_then(|name| name.strip_suffix('@'))
                    .ok_or_else(|| error.clone())?;
                if name.contains('@') {
                    return Err(error);
                }
                Self::directory(display_name(info.display_name), name)
            }
        }
    }

    fn literal(
        display_name: Option<String>,
        addr: &str,
        local_part: &str,
        domain: &str,
    ) -> Result<Self, AddressError> {
        if local_part.is_empty() || local_part.contains(char::is_whitespace) {
            return Err(AddressError::InvalidLocalPart(addr.to_string()));
        }
        if domain.is_empty() || domain.contains(char::is_whitespace) {
            return Err(AddressError::InvalidDomain(addr.to_string()));
        }

        Ok(Self::Literal {
            display_name,
            mailbox: Mailbox {
                local_part: local_part.to_string(),
                domain: domain.to_string(),
            },
        })
    }

    fn directory(display_name: Option<String>, name: &str) -> Result<Self, AddressError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AddressError::Empty);
        }
        if name.contains(char::is_whitespace) {
            return Err(AddressError::InvalidLocalPart(name.to_string()));
        }

        Ok(Self::Directory {
            display_name,
            name: name.to_string(),
        })
    }

    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        match self {
            Self::Literal { display_name, .. } | Self::Directory { display_name, .. } => {
                display_name.as_deref()
            }
        }
    }

    /// The mailbox of a literal entry; directory references have none.
    #[must_use]
    pub const fn mailbox(&self) -> Option<&Mailbox> {
        match self {
            Self::Literal { mailbox, .. } => Some(mailbox),
            Self::Directory { .. } => None,
        }
    }
}

impl Display for RecipientEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr: &dyn Display = match self {
            Self::Literal { mailbox, .. } => mailbox,
            Self::Directory { name, .. } => name,
        };

        match self.display_name() {
            Some(display_name) if f.alternate() && !display_name.is_ascii() => {
                write!(f, "{} <{addr}>", encode_text(display_name))
            }
            Some(display_name) => write!(f, "{} <{addr}>", Phrase(display_name)),
            None => write!(f, "{addr}"),
        }
    }
}

/// Display name rendering: bare when safe, quoted and escaped otherwise.
struct Phrase<'a>(&'a str);

impl Display for Phrase<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.contains(SPECIALS) {
            f.write_str("\"")?;
            for ch in self.0.chars() {
                if matches!(ch, '"' | '\\') {
                    f.write_str("\\")?;
                }
                write!(f, "{ch}")?;
            }
            f.write_str("\"")
        } else {
            f.write_str(self.0)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressList(pub Vec<RecipientEntry>);

impl AddressList {
    /// Parse every entry of a header value, failing on the first malformed one.
    ///
    /// # Errors
    ///
    /// Returns the [`AddressError`] of the first entry that does not parse.
    pub fn parse(value: &str) -> Result<Self, AddressError> {
        entries(value).collect::<Result<Vec<_>, _>>().map(Self)
    }

    /// The literal mailboxes in this list, in order.
    pub fn mailboxes(&self) -> impl Iterator<Item = &Mailbox> {
        self.0.iter().filter_map(RecipientEntry::mailbox)
    }
}

impl Display for AddressList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            Display::fmt(entry, f)?;
        }
        Ok(())
    }
}

/// Parse each entry of a header value independently, so one bad entry does not
/// hide the others.
pub fn entries(value: &str) -> impl Iterator<Item = Result<RecipientEntry, AddressError>> + '_ {
    split_list(value)
        .into_iter()
        .filter(|entry| !entry.trim().is_empty())
        .map(RecipientEntry::parse)
}

/// Split on commas that are outside quoted strings and angle brackets.
fn split_list(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    let mut depth = 0usize;

    for (i, ch) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }

        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => depth += 1,
            '>' if !in_quotes => depth = depth.saturating_sub(1),
            ',' if !in_quotes && depth == 0 => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    parts.push(&value[start..]);
    parts
}

/// Parse `entry` as exactly one mailbox.
fn single(entry: &str) -> Result<SingleInfo, AddressError> {
    let parsed = mailparse::addrparse(entry).map_err(|error| AddressError::Unparseable {
        entry: entry.to_string(),
        reason: error.to_string(),
    })?;

    match &parsed[..] {
        [MailAddr::Single(info)] => Ok(info.clone()),
        _ => Err(AddressError::NotAMailbox(entry.to_string())),
    }
}

/// `alice` becomes `alice@directory.invalid`, `Boss <bob>` becomes
/// `Boss <bob@directory.invalid>`.
fn qualify(entry: &str) -> String {
    match entry.strip_suffix('>') {
        Some(head) => format!("{head}@{DIRECTORY_DOMAIN}>"),
        None => format!("{entry}@{DIRECTORY_DOMAIN}"),
    }
}

fn display_name(name: Option<String>) -> Option<String> {
    name.map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}
