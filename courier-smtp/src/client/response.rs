//! SMTP reply parsing (RFC 5321 section 4.2).

use super::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// `false` for `250-...` continuation lines.
    pub is_last: bool,
    pub message: String,
}

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3xx: the server wants more input (e.g. `354` after `DATA`).
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Whether an EHLO reply advertises `keyword` (case-insensitive). The first
    /// line is the server's greeting, not an extension.
    #[must_use]
    pub fn supports(&self, keyword: &str) -> bool {
        self.lines.iter().skip(1).any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(keyword))
        })
    }

    /// Turn a reply into an error unless it is a success.
    ///
    /// # Errors
    ///
    /// [`ClientError::SmtpError`] carrying the code and text of a non-2xx reply.
    pub fn into_success(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    #[must_use]
    pub fn into_error(self) -> ClientError {
        ClientError::SmtpError {
            code: self.code,
            message: self.message(),
        }
    }

    /// Parse one reply line, without its line ending.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ParseError`] if the line is not `NNN[ -]text`.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let code = line
            .get(..3)
            .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| ClientError::ParseError(format!("Invalid status code in '{line}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(other) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{}'",
                    char::from(*other)
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Parse a complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it occupied, or `None` when
    /// more data is needed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ParseError`] on malformed lines or when the lines
    /// of a multi-line reply disagree on the code.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let text = std::str::from_utf8(raw)?.trim_end_matches('\r');
            if text.is_empty() {
                continue;
            }

            let line = Self::parse_line(text)?;
            match code {
                Some(expected) if expected != line.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {expected}, got {}",
                        line.code
                    )));
                }
                Some(_) => {}
                None => code = Some(line.code),
            }

            lines.push(line.message);

            if line.is_last {
                return Ok(Some((Self::new(line.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_forms() {
        assert_eq!(
            Response::parse_line("220 mail.example.com ESMTP").unwrap(),
            ResponseLine {
                code: 220,
                is_last: true,
                message: "mail.example.com ESMTP".to_string(),
            }
        );
        assert!(!Response::parse_line("250-mail.example.com").unwrap().is_last);
        assert_eq!(Response::parse_line("354").unwrap().message, "");
        assert!(Response::parse_line("25").is_err());
        assert!(Response::parse_line("abc hello").is_err());
        assert!(Response::parse_line("250_x").is_err());
    }

    #[test]
    fn test_parse_multi_line_response() {
        let data = b"250-mail.example.com\r\n250-SIZE 10000000\r\n250 STARTTLS\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(consumed, data.len());
        assert!(response.supports("starttls"));
        assert!(response.supports("SIZE"));
        assert!(!response.supports("mail.example.com"));
    }

    #[test]
    fn test_parse_leaves_following_reply() {
        let data = b"250 OK\r\n354 Go ahead\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.lines, vec!["OK"]);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn test_parse_incomplete_response() {
        assert!(Response::parse_response(b"250-mail.example.com\r\n250-SIZE")
            .unwrap()
            .is_none());
        assert!(Response::parse_response(b"").unwrap().is_none());
    }

    #[test]
    fn test_code_mismatch_is_an_error() {
        assert!(Response::parse_response(b"250-one\r\n251 two\r\n").is_err());
    }

    #[test]
    fn test_into_success() {
        assert!(Response::new(250, vec!["OK".into()]).into_success().is_ok());

        let err = Response::new(550, vec!["No such user".into()])
            .into_success()
            .unwrap_err();
        assert!(matches!(err, ClientError::SmtpError { code: 550, .. }));
        assert_eq!(err.to_string(), "SMTP error: 550 - No such user");
    }
}
