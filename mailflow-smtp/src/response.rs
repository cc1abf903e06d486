//! SMTP reply parsing.

use crate::error::{Result, TransportError};

/// A complete server reply, possibly spanning multiple lines.
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

    /// All reply text joined into one string.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.code >= 200 && self.code < 400
    }

    #[must_use]
    pub const fn is_transient_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Try to parse one complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes consumed, or `None` if
    /// the buffer does not yet hold a full reply. Multi-line replies use
    /// the RFC 5321 continuation marker (`250-...` / `250 ...`), and all
    /// lines must carry the same code.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let text = std::str::from_utf8(buffer)
            .map_err(|err| TransportError::Parse(format!("non-UTF-8 reply: {err}")))?;

        let mut lines = Vec::new();
        let mut code = None;
        let mut consumed = 0;

        loop {
            let rest = &text[consumed..];
            let Some(eol) = rest.find('\n') else {
                return Ok(None);
            };

            let line = rest[..eol].trim_end_matches('\r');
            consumed += eol + 1;

            if line.is_empty() {
                continue;
            }

            let (line_code, last, message) = parse_line(line)?;

            match code {
                None => code = Some(line_code),
                Some(expected) if expected != line_code => {
                    return Err(TransportError::Parse(format!(
                        "code changed mid-reply: {expected} then {line_code}"
                    )));
                }
                Some(_) => {}
            }

            lines.push(message.to_string());

            if last {
                let code = code.unwrap_or(line_code);
                return Ok(Some((Self::new(code, lines), consumed)));
            }
        }
    }
}

/// Split one reply line into (code, is-last, message).
fn parse_line(line: &str) -> Result<(u16, bool, &str)> {
    if line.len() < 3 {
        return Err(TransportError::Parse(format!("reply line too short: {line:?}")));
    }

    let code = line[..3]
        .parse::<u16>()
        .map_err(|_| TransportError::Parse(format!("invalid reply code in {line:?}")))?;

    match line.as_bytes().get(3) {
        None => Ok((code, true, "")),
        Some(b' ') => Ok((code, true, &line[4..])),
        Some(b'-') => Ok((code, false, &line[4..])),
        Some(_) => Err(TransportError::Parse(format!(
            "invalid separator after reply code in {line:?}"
        ))),
    }
}
