//! Command responses

use crate::{Result, SonarError};

/// Status code of a successful exchange.
pub const STATUS_OK: &str = "200";

/// A parsed device response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    status: String,
    lines: Vec<String>,
}

impl CommandResponse {
    /// Parse response text up to the first blank line.
    ///
    /// Leading blank lines are skipped. Both `\n` and `\r\n` line endings are
    /// accepted. Text with no content line is a protocol error.
    pub fn parse(text: &str) -> Result<Self> {
        let lines = text
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .skip_while(|line| line.trim().is_empty())
            .take_while(|line| !line.trim().is_empty())
            .map(str::to_string);
        Self::from_lines(lines)
    }

    pub(crate) fn from_lines<I>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let lines: Vec<String> = lines.into_iter().collect();
        let status = lines
            .first()
            .and_then(|line| line.split_whitespace().next())
            .ok_or_else(|| SonarError::protocol_error("CommandResponse", "empty response"))?
            .to_string();
        Ok(Self { status, lines })
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn status_line(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or_default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Cookie echoed by a settings response.
    pub fn settings_cookie(&self) -> Option<u32> {
        self.lines.iter().skip(1).find_map(|line| {
            let mut tokens = line.split_whitespace();
            match (tokens.next(), tokens.next()) {
                (Some("settings_cookie"), Some(value)) => value.parse().ok(),
                _ => None,
            }
        })
    }

    /// Turn a failure status into [`SonarError::CommandRejected`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SonarError::CommandRejected {
                status: self.status.clone(),
                line: self.status_line().to_string(),
            })
        }
    }
}
