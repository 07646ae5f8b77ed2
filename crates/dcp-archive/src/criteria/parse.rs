//! Line-oriented text format for [`SearchCriteria`].
//!
//! One `KEYWORD: value` directive per line. Keywords are case-insensitive.
//! Blank lines and lines starting with `#` are ignored, and an unknown
//! keyword is an error. Serialization writes only the fields that are set.
//!
//! ```text
//! #
//! # Search Criteria
//! #
//! DAPS_SINCE: now - 2 hours
//! NETWORKLIST: coastal
//! CHANNEL: &5
//! PARITY_ERROR: R
//! ```

use crate::criteria::model::{ChannelToken, SearchCriteria, Spacecraft, TriState, MAX_CHANNEL};
use crate::criteria::time::TimeSpec;
use crate::error::{ArchiveError, Result};
use crate::message::{DcpAddress, MessageSource};
use std::fmt;
use std::str::FromStr;

fn parse_time(line: usize, value: &str) -> Result<Option<TimeSpec>> {
    value
        .parse::<TimeSpec>()
        .map(Some)
        .map_err(|msg| ArchiveError::syntax(line, msg))
}

fn parse_tristate(line: usize, keyword: &str, value: &str) -> Result<TriState> {
    TriState::parse(value).ok_or_else(|| {
        ArchiveError::syntax(line, format!("{keyword} expects A, R or O, got '{value}'"))
    })
}

fn parse_flag(line: usize, keyword: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "false" | "f" | "no" | "n" | "off" => Ok(false),
        _ => Err(ArchiveError::syntax(
            line,
            format!("{keyword} expects true or false, got '{value}'"),
        )),
    }
}

fn require<'a>(line: usize, keyword: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() {
        Err(ArchiveError::syntax(line, format!("{keyword} expects a value")))
    } else {
        Ok(value)
    }
}

fn parse_channel_number(line: usize, text: &str) -> Result<u16> {
    let channel: u16 = text
        .trim()
        .parse()
        .map_err(|_| ArchiveError::syntax(line, format!("bad channel '{text}'")))?;
    if channel > MAX_CHANNEL {
        return Err(ArchiveError::syntax(
            line,
            format!("channel {channel} exceeds {MAX_CHANNEL}"),
        ));
    }
    Ok(channel)
}

/// Parses a CHANNEL value into `out`.
///
/// `&N` is an AND token, `|N` or bare `N` an OR token. A detached `&` or `|`
/// applies to the following number. `a-b` expands to AND tokens `a..=b`.
fn parse_channels(line: usize, value: &str, out: &mut Vec<ChannelToken>) -> Result<()> {
    let mut pending_and = None;
    for word in value.split_whitespace() {
        let (and, rest) = match word.as_bytes()[0] {
            b'&' => (Some(true), &word[1..]),
            b'|' => (Some(false), &word[1..]),
            _ => (None, word),
        };
        if rest.is_empty() {
            pending_and = and;
            continue;
        }
        if let Some((start, end)) = rest.split_once('-') {
            let start = parse_channel_number(line, start)?;
            let end = parse_channel_number(line, end)?;
            if start > end {
                return Err(ArchiveError::syntax(
                    line,
                    format!("bad channel range '{rest}'"),
                ));
            }
            out.extend((start..=end).map(ChannelToken::and));
        } else {
            let channel = parse_channel_number(line, rest)?;
            let and = and.or(pending_and).unwrap_or(false);
            out.push(ChannelToken { channel, and });
        }
        pending_and = None;
    }
    if pending_and.is_some() {
        return Err(ArchiveError::syntax(line, "dangling channel combinator"));
    }
    Ok(())
}

fn parse_number<T: FromStr>(line: usize, what: &str, text: Option<&str>) -> Result<T> {
    let text = text.ok_or_else(|| ArchiveError::syntax(line, format!("expected {what}")))?;
    text.parse()
        .map_err(|_| ArchiveError::syntax(line, format!("non-numeric {what} '{text}'")))
}

impl SearchCriteria {
    fn apply_directive(&mut self, line: usize, keyword: &str, value: &str) -> Result<()> {
        match keyword {
            "LRGS_SINCE" | "DRS_SINCE" | "DRSSINCE" | "LRGSSINCE" => {
                self.lrgs_since = parse_time(line, value)?;
            }
            "LRGS_UNTIL" | "DRS_UNTIL" | "DRSUNTIL" | "LRGSUNTIL" => {
                self.lrgs_until = parse_time(line, value)?;
            }
            "DAPS_SINCE" | "DAPSSINCE" => self.daps_since = parse_time(line, value)?,
            "DAPS_UNTIL" | "DAPSUNTIL" => self.daps_until = parse_time(line, value)?,
            "NETWORKLIST" | "NETWORK_LIST" => {
                let name = require(line, keyword, value)?;
                self.network_lists.push(name.to_string());
            }
            "DCP_NAME" => {
                let name = require(line, keyword, value)?;
                self.dcp_names.push(name.to_string());
            }
            "DCP_ADDRESS" | "DCPADDRESS" => {
                require(line, keyword, value)?;
                self.addresses
                    .extend(value.split_whitespace().map(DcpAddress::new));
            }
            "ELECTRONIC_MAIL" => self.electronic_mail = parse_tristate(line, keyword, value)?,
            "DAPS_STATUS" => self.daps_status = parse_tristate(line, keyword, value)?,
            "RETRANSMITTED" => self.retransmitted = parse_tristate(line, keyword, value)?,
            "GLOB_BUL" => self.global_bulletin = parse_tristate(line, keyword, value)?,
            "DCP_BUL" => self.dcp_bulletin = parse_tristate(line, keyword, value)?,
            "PARITY_ERROR" => self.parity_errors = parse_tristate(line, keyword, value)?,
            "CHANNEL" => {
                require(line, keyword, value)?;
                parse_channels(line, value, &mut self.channels)?;
            }
            "SOURCE" => {
                require(line, keyword, value)?;
                for word in value.split_whitespace() {
                    let source = word
                        .parse::<MessageSource>()
                        .map_err(|msg| ArchiveError::syntax(line, msg))?;
                    if !self.add_source(source) {
                        return Err(ArchiveError::syntax(line, "too many sources"));
                    }
                }
            }
            "SPACECRAFT" => {
                self.spacecraft = match value.chars().next().map(|c| c.to_ascii_uppercase()) {
                    Some('E') => Spacecraft::East,
                    Some('W') => Spacecraft::West,
                    _ => {
                        return Err(ArchiveError::syntax(
                            line,
                            format!("SPACECRAFT expects E or W, got '{value}'"),
                        ))
                    }
                };
            }
            "SEQUENCE" => {
                let mut words = value.split_whitespace();
                let start = parse_number(line, "sequence start", words.next())?;
                let end = parse_number(line, "sequence end", words.next())?;
                self.sequence = Some((start, end));
            }
            "BAUD" => {
                require(line, keyword, value)?;
                for word in value.split(|c: char| c.is_whitespace() || c == ',') {
                    if !word.is_empty() {
                        self.bauds.insert(parse_number(line, "baud rate", Some(word))?);
                    }
                }
            }
            "ASCENDING_TIME" => self.ascending_time = parse_flag(line, keyword, value)?,
            "RT_SETTLE_DELAY" => self.realtime_settle = parse_flag(line, keyword, value)?,
            "SINGLE" => self.single = parse_flag(line, keyword, value)?,
            _ => {
                return Err(ArchiveError::syntax(
                    line,
                    format!("unrecognized keyword '{keyword}'"),
                ))
            }
        }
        Ok(())
    }
}

impl FromStr for SearchCriteria {
    type Err = ArchiveError;

    fn from_str(text: &str) -> Result<Self> {
        let mut criteria = SearchCriteria::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (keyword, value) = trimmed.split_once(':').ok_or_else(|| {
                ArchiveError::syntax(line, format!("expected 'KEYWORD: value', got '{trimmed}'"))
            })?;
            let keyword = keyword.trim().to_ascii_uppercase();
            criteria.apply_directive(line, &keyword, value.trim())?;
        }
        Ok(criteria)
    }
}

fn write_tristate(f: &mut fmt::Formatter<'_>, keyword: &str, value: TriState) -> fmt::Result {
    match value.code() {
        Some(code) => writeln!(f, "{keyword}: {code}"),
        None => Ok(()),
    }
}

impl fmt::Display for SearchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("#\n# Search Criteria\n#\n")?;

        let times = [
            ("LRGS_SINCE", &self.lrgs_since),
            ("LRGS_UNTIL", &self.lrgs_until),
            ("DAPS_SINCE", &self.daps_since),
            ("DAPS_UNTIL", &self.daps_until),
        ];
        for (keyword, time) in times {
            if let Some(time) = time {
                writeln!(f, "{keyword}: {time}")?;
            }
        }
        for name in &self.network_lists {
            writeln!(f, "NETWORKLIST: {name}")?;
        }
        for name in &self.dcp_names {
            writeln!(f, "DCP_NAME: {name}")?;
        }
        for address in &self.addresses {
            writeln!(f, "DCP_ADDRESS: {address}")?;
        }

        write_tristate(f, "ELECTRONIC_MAIL", self.electronic_mail)?;
        write_tristate(f, "DAPS_STATUS", self.daps_status)?;
        write_tristate(f, "RETRANSMITTED", self.retransmitted)?;
        write_tristate(f, "GLOB_BUL", self.global_bulletin)?;
        write_tristate(f, "DCP_BUL", self.dcp_bulletin)?;

        for token in &self.channels {
            writeln!(f, "CHANNEL: {token}")?;
        }
        for source in &self.sources {
            writeln!(f, "SOURCE: {source}")?;
        }
        match self.spacecraft {
            Spacecraft::Any => {}
            Spacecraft::East => writeln!(f, "SPACECRAFT: E")?,
            Spacecraft::West => writeln!(f, "SPACECRAFT: W")?,
        }
        if let Some((start, end)) = self.sequence {
            writeln!(f, "SEQUENCE: {start} {end}")?;
        }
        if !self.bauds.is_empty() {
            let bauds: Vec<String> = self.bauds.iter().map(u32::to_string).collect();
            writeln!(f, "BAUD: {}", bauds.join(" "))?;
        }
        if self.ascending_time {
            writeln!(f, "ASCENDING_TIME: true")?;
        }
        if self.realtime_settle {
            writeln!(f, "RT_SETTLE_DELAY: true")?;
        }
        if self.single {
            writeln!(f, "SINGLE: true")?;
        }
        write_tristate(f, "PARITY_ERROR", self.parity_errors)
    }
}
