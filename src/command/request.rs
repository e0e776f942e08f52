//! Command requests

use chrono::NaiveDateTime;
use std::fmt;

use crate::types::{AcquisitionSettings, Salinity};
use crate::{Result, SonarError};

/// Timestamp layout of the `datetime` line, e.g. `2026-Oct-14 09:03:07`.
pub const DATETIME_FORMAT: &str = "%Y-%b-%d %H:%M:%S";

/// One request on the command channel.
///
/// A request is one or more non-empty lines; the blank line that ends it is
/// added by [`to_wire`](Self::to_wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    lines: Vec<String>,
}

impl CommandRequest {
    /// Build a request from raw lines.
    ///
    /// Blank lines and embedded line breaks are rejected since either would
    /// end the request early on the wire.
    pub fn new<I, S>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        if lines.is_empty() {
            return Err(SonarError::protocol_error("CommandRequest", "request has no lines"));
        }
        if let Some(bad) =
            lines.iter().find(|line| line.trim().is_empty() || line.contains(['\r', '\n']))
        {
            return Err(SonarError::protocol_error(
                "CommandRequest",
                format!("invalid command line {:?}", bad),
            ));
        }
        Ok(Self { lines })
    }

    /// The handshake sent right after connecting.
    pub fn initialize(salinity: Salinity, rcvr_port: u16, datetime: NaiveDateTime) -> Self {
        Self {
            lines: vec![
                "initialize".to_string(),
                format!("salinity {}", salinity.as_command_str()),
                format!("rcvr_port {}", rcvr_port),
                format!("datetime {}", datetime.format(DATETIME_FORMAT)),
            ],
        }
    }

    /// Apply acquisition settings, tagged with `cookie`.
    pub fn settings(settings: &AcquisitionSettings, cookie: u32) -> Self {
        let mut lines = settings.command_lines();
        lines.push(format!("settings_cookie {}", cookie));
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// First token of the first line.
    pub fn verb(&self) -> &str {
        self.lines
            .first()
            .and_then(|line| line.split_whitespace().next())
            .unwrap_or_default()
    }

    /// Wire form, terminated by a blank line.
    pub fn to_wire(&self) -> String {
        let len = self.lines.iter().map(|line| line.len() + 1).sum::<usize>() + 1;
        let mut wire = String::with_capacity(len);
        for line in &self.lines {
            wire.push_str(line);
            wire.push('\n');
        }
        wire.push('\n');
        wire
    }
}

impl fmt::Display for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SystemType;
    use chrono::NaiveDate;

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 7).unwrap().and_hms_opt(9, 4, 5).unwrap()
    }

    #[test]
    fn initialize_matches_device_format() {
        let request = CommandRequest::initialize(Salinity::Brackish, 49152, timestamp());
        assert_eq!(
            request.to_wire(),
            "initialize\nsalinity brackish\nrcvr_port 49152\ndatetime 2026-Mar-07 09:04:05\n\n"
        );
        assert_eq!(request.verb(), "initialize");
    }

    #[test]
    fn settings_request_ends_with_cookie() {
        let settings = AcquisitionSettings::builder(SystemType::Aris1800).build().unwrap();
        let request = CommandRequest::settings(&settings, 17);
        assert_eq!(request.verb(), "set_acquire");
        assert_eq!(request.lines().last().map(String::as_str), Some("settings_cookie 17"));
        assert!(request.to_wire().ends_with("settings_cookie 17\n\n"));
    }

    #[test]
    fn raw_requests_reject_blank_and_multiline_input() {
        assert!(CommandRequest::new(["ping"]).is_ok());
        assert!(CommandRequest::new(Vec::<String>::new()).is_err());
        assert!(CommandRequest::new(["ping", ""]).is_err());
        assert!(CommandRequest::new(["ping\nstop"]).is_err());
    }
}
