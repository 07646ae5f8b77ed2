//! Fixed-width GOES DCP header decoding.
//!
//! ```text
//! offset  len  field
//!      0    8  platform address
//!      8   11  YYDDDHHMMSS transmit time
//!     19    1  failure code
//!     20    2  signal strength (dB)
//!     22    2  frequency offset (sign + hex digit)
//!     24    1  modulation index  N|L|H
//!     25    1  data quality      N|F|P
//!     26    3  channel
//!     29    1  spacecraft        E|W
//!     30    2  uplink carrier code
//!     32    5  payload length
//!     37       payload
//! ```
//!
//! Decoding is lenient. A field that fails to parse falls back to a sentinel
//! so that a damaged header never keeps a message out of the archive.

use crate::message::address::DcpAddress;
use crate::message::Timestamp;
use chrono::NaiveDate;

/// Length of the fixed header in bytes.
pub const HEADER_LENGTH: usize = 37;

/// Largest message accepted, header included. Longer messages are truncated.
pub const MAX_DATA_LENGTH: usize = 99_800;

/// Two-digit years below this value belong to the 2000s.
pub const CENTURY_PIVOT: u32 = 70;

const ADDR_OFFSET: usize = 0;
const TIME_OFFSET: usize = 8;
const FAILCODE_OFFSET: usize = 19;
const SIGSTRENGTH_OFFSET: usize = 20;
const FREQOFFSET_OFFSET: usize = 22;
const MODINDEX_OFFSET: usize = 24;
const DATAQUALITY_OFFSET: usize = 25;
const CHANNEL_OFFSET: usize = 26;
const SPACECRAFT_OFFSET: usize = 29;
const UPLINK_OFFSET: usize = 30;
const DATALENGTH_OFFSET: usize = 32;

/// Structured view of a GOES DCP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoesHeader {
    /// Platform address.
    pub address: DcpAddress,
    /// Transmit time in ms since epoch, 0 if unparseable.
    pub transmit_time: Timestamp,
    /// Failure code, `-` for none.
    pub failure_code: char,
    /// Signal strength in dB, 0 if unparseable.
    pub signal_strength: u32,
    /// Signed frequency offset in 50 Hz increments.
    pub frequency_offset: i32,
    /// Modulation index, `U` if unknown.
    pub modulation_index: char,
    /// Data quality, `U` if unknown.
    pub data_quality: char,
    /// Relay channel, 0 if unparseable.
    pub channel: u16,
    /// Spacecraft side, `U` if unknown.
    pub spacecraft: char,
    /// Uplink carrier code, `xx` if absent.
    pub uplink_code: String,
    /// Declared payload length, 0 if unparseable.
    pub data_length: usize,
}

impl GoesHeader {
    /// Decodes the header at the start of `bytes`.
    ///
    /// Never fails: short or damaged input yields sentinel values for the
    /// affected fields.
    pub fn parse(bytes: &[u8]) -> Self {
        let address = field(bytes, ADDR_OFFSET, 8)
            .map(DcpAddress::new)
            .unwrap_or_default();

        let failure_code = byte_at(bytes, FAILCODE_OFFSET).unwrap_or('-');

        let modulation_index = match byte_at(bytes, MODINDEX_OFFSET) {
            Some(c @ ('N' | 'L' | 'H')) => c,
            _ => 'U',
        };
        let data_quality = match byte_at(bytes, DATAQUALITY_OFFSET) {
            Some(c @ ('N' | 'F' | 'P')) => c,
            _ => 'U',
        };
        let spacecraft = match byte_at(bytes, SPACECRAFT_OFFSET) {
            Some(c @ ('E' | 'W')) => c,
            _ => 'U',
        };

        let channel = field(bytes, CHANNEL_OFFSET, 3)
            .and_then(|s| s.replace(' ', "0").parse::<u16>().ok())
            .unwrap_or(0);

        Self {
            address,
            transmit_time: parse_transmit_time(bytes),
            failure_code,
            signal_strength: parse_number(bytes, SIGSTRENGTH_OFFSET, 2),
            frequency_offset: parse_frequency_offset(bytes),
            modulation_index,
            data_quality,
            channel,
            spacecraft,
            uplink_code: field(bytes, UPLINK_OFFSET, 2)
                .unwrap_or("xx")
                .to_string(),
            data_length: parse_number(bytes, DATALENGTH_OFFSET, 5) as usize,
        }
    }
}

/// Resolves a two-digit year through the century window.
pub fn expand_year(two_digit: u32) -> i32 {
    if two_digit < CENTURY_PIVOT {
        2000 + two_digit as i32
    } else {
        1900 + two_digit as i32
    }
}

fn field(bytes: &[u8], offset: usize, len: usize) -> Option<&str> {
    let slice = bytes.get(offset..offset + len)?;
    std::str::from_utf8(slice).ok()
}

fn byte_at(bytes: &[u8], offset: usize) -> Option<char> {
    bytes
        .get(offset)
        .filter(|b| b.is_ascii_graphic())
        .map(|&b| b as char)
}

fn parse_number(bytes: &[u8], offset: usize, len: usize) -> u32 {
    field(bytes, offset, len)
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(0)
}

fn parse_frequency_offset(bytes: &[u8]) -> i32 {
    let Some(text) = field(bytes, FREQOFFSET_OFFSET, 2) else {
        return 0;
    };
    let mut chars = text.chars();
    let (Some(sign), Some(digit)) = (chars.next(), chars.next()) else {
        return 0;
    };
    let Some(value) = digit.to_digit(16) else {
        return 0;
    };
    match sign {
        '-' => -(value as i32),
        '+' | ' ' => value as i32,
        _ => 0,
    }
}

fn parse_transmit_time(bytes: &[u8]) -> Timestamp {
    let Some(text) = field(bytes, TIME_OFFSET, 11) else {
        return 0;
    };
    let num = |range: std::ops::Range<usize>| text.get(range)?.parse::<u32>().ok();
    let (Some(yy), Some(doy), Some(hh), Some(mm), Some(ss)) =
        (num(0..2), num(2..5), num(5..7), num(7..9), num(9..11))
    else {
        return 0;
    };

    NaiveDate::from_yo_opt(expand_year(yy), doy)
        .and_then(|date| date.and_hms_opt(hh, mm, ss))
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or(0)
}
