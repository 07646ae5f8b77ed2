//! Telemetry message model and header codec.

pub mod address;
pub mod failure;
pub mod header;

pub use address::DcpAddress;
pub use failure::{FailureCodes, MAX_FAILURE_CODES};
pub use header::{GoesHeader, HEADER_LENGTH, MAX_DATA_LENGTH};

use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Count of whole days since the Unix epoch; the partition key.
pub type DayNumber = i32;

/// Identifier of a message within its partition.
pub type RecordId = u64;

/// Milliseconds per day.
pub const MS_PER_DAY: i64 = 86_400_000;

/// Failure code marking a message relayed by a network DCP.
pub const NETWORK_DCP_CODE: char = 'G';

/// Failure code marking a parity error.
pub const PARITY_ERROR_CODE: char = '?';

/// Baud rates a message may be classified as.
pub const KNOWN_BAUD_RATES: [u32; 3] = [100, 300, 1200];

/// Returns the day number holding `ts`.
pub fn day_of(ts: Timestamp) -> DayNumber {
    ts.div_euclid(MS_PER_DAY) as DayNumber
}

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum MessageSource {
    /// GOES, type not known.
    #[default]
    Goes,
    /// GOES self-timed transmission.
    GoesSelfTimed,
    /// GOES random transmission.
    GoesRandom,
    /// Network-connected DCP polled directly.
    NetworkDcp,
    /// Iridium short burst data.
    Iridium,
    /// Any other relay.
    Other,
}

impl MessageSource {
    /// All sources, in code order.
    pub const ALL: [MessageSource; 6] = [
        Self::Goes,
        Self::GoesSelfTimed,
        Self::GoesRandom,
        Self::NetworkDcp,
        Self::Iridium,
        Self::Other,
    ];

    /// Numeric code used by the criteria text format and the journal.
    pub fn code(self) -> u8 {
        match self {
            Self::Goes => 0,
            Self::GoesSelfTimed => 1,
            Self::GoesRandom => 2,
            Self::NetworkDcp => 3,
            Self::Iridium => 4,
            Self::Other => 5,
        }
    }

    /// Inverse of [`MessageSource::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Goes => "GOES",
            Self::GoesSelfTimed => "GOES_SELFTIMED",
            Self::GoesRandom => "GOES_RANDOM",
            Self::NetworkDcp => "NETDCP",
            Self::Iridium => "IRIDIUM",
            Self::Other => "OTHER",
        }
    }

    /// True for any GOES variant.
    pub fn is_goes(self) -> bool {
        matches!(self, Self::Goes | Self::GoesSelfTimed | Self::GoesRandom)
    }

    /// Returns true if a message of this source satisfies a `filter` entry.
    ///
    /// Generic `Goes` and the self-timed/random variants match each other.
    pub fn satisfies(self, filter: MessageSource) -> bool {
        self == filter
            || (self.is_goes() && filter == Self::Goes)
            || (self == Self::Goes && filter.is_goes())
    }
}

impl fmt::Display for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MessageSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        if let Ok(code) = upper.parse::<u8>() {
            return Self::from_code(code).ok_or_else(|| format!("unknown source code {code}"));
        }
        match upper.as_str() {
            "GOES" => Ok(Self::Goes),
            "GOES_SELFTIMED" | "GOES_ST" => Ok(Self::GoesSelfTimed),
            "GOES_RANDOM" | "GOES_RD" => Ok(Self::GoesRandom),
            "NETDCP" | "NETWORK_DCP" => Ok(Self::NetworkDcp),
            "IRIDIUM" => Ok(Self::Iridium),
            "OTHER" => Ok(Self::Other),
            _ => Err(format!("unknown source '{s}'")),
        }
    }
}

/// Status flags carried alongside a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageFlags {
    /// Message is a duplicate retransmission.
    pub duplicate: bool,
}

/// A telemetry message as stored in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcpMessage {
    /// Assigned on first persist, stable afterwards.
    pub record_id: Option<RecordId>,
    /// Platform address.
    pub address: DcpAddress,
    /// Archive's own receipt clock.
    pub local_recv_time: Timestamp,
    /// Origination clock.
    pub transmit_time: Timestamp,
    /// Carrier start, if the relay reported one.
    pub carrier_start: Option<Timestamp>,
    /// Carrier stop, if the relay reported one.
    pub carrier_stop: Option<Timestamp>,
    /// Baud rate, 0 if unknown.
    pub baud: u32,
    /// Failure and status codes.
    pub failure_codes: FailureCodes,
    /// Authoritative total length. May exceed `data.len()`.
    pub msg_length: usize,
    /// Raw header and payload bytes held so far.
    pub data: Vec<u8>,
    /// Relay the message arrived through.
    pub source: MessageSource,
    /// Status flags.
    pub flags: MessageFlags,
    /// Relay channel.
    pub channel: u16,
    /// Sequence number assigned by the relay, if any.
    pub sequence_num: Option<u32>,
}

impl DcpMessage {
    /// Creates a message from an explicit address and transmit time.
    ///
    /// Used for relays that do not carry the GOES header. Network DCP
    /// messages are tagged with [`NETWORK_DCP_CODE`].
    pub fn new(
        source: MessageSource,
        address: DcpAddress,
        transmit_time: Timestamp,
        data: Vec<u8>,
    ) -> Self {
        let mut msg = Self {
            record_id: None,
            address,
            local_recv_time: transmit_time,
            transmit_time,
            carrier_start: None,
            carrier_stop: None,
            baud: 0,
            failure_codes: FailureCodes::new(),
            msg_length: data.len(),
            data,
            source,
            flags: MessageFlags::default(),
            channel: 0,
            sequence_num: None,
        };
        if source == MessageSource::NetworkDcp {
            msg.add_failure_code(NETWORK_DCP_CODE);
        }
        msg
    }

    /// Decodes a GOES message from its raw bytes.
    ///
    /// Messages longer than [`MAX_DATA_LENGTH`] bytes, header included, are
    /// truncated with a warning.
    pub fn decode_goes(raw: &[u8], local_recv_time: Timestamp, source: MessageSource) -> Self {
        let limit = MAX_DATA_LENGTH;
        let data = if raw.len() > limit {
            warn!(
                "Message of {} bytes exceeds maximum {}, truncating",
                raw.len(),
                limit
            );
            raw[..limit].to_vec()
        } else {
            raw.to_vec()
        };

        let header = GoesHeader::parse(&data);
        let mut msg = Self::new(source, header.address.clone(), header.transmit_time, data);
        msg.local_recv_time = local_recv_time;
        msg.channel = header.channel;
        msg.add_failure_code(header.failure_code);
        msg
    }

    /// Sets the baud rate.
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Sets the channel.
    pub fn with_channel(mut self, channel: u16) -> Self {
        self.channel = channel;
        self
    }

    /// Sets the local receive time.
    pub fn with_local_recv_time(mut self, ts: Timestamp) -> Self {
        self.local_recv_time = ts;
        self
    }

    /// Sets the sequence number.
    pub fn with_sequence_num(mut self, seq: u32) -> Self {
        self.sequence_num = Some(seq);
        self
    }

    /// Sets carrier start/stop times.
    pub fn with_carrier(mut self, start: Timestamp, stop: Timestamp) -> Self {
        self.carrier_start = Some(start);
        self.carrier_stop = Some(stop);
        self
    }

    /// Adds a failure code, ignoring `-`, duplicates and overflow.
    pub fn add_failure_code(&mut self, code: char) {
        self.failure_codes.add(code);
    }

    /// Primary failure code, `-` if none.
    pub fn failure_code(&self) -> char {
        self.failure_codes.primary().unwrap_or(failure::NO_FAILURE)
    }

    /// Partition key: the transmit day, or the receive day when the header
    /// carried no usable transmit time.
    pub fn partition_day(&self) -> DayNumber {
        if self.transmit_time == 0 {
            day_of(self.local_recv_time)
        } else {
            day_of(self.transmit_time)
        }
    }

    /// True for GOES messages whose primary code is not a normal-message code.
    pub fn is_daps_status(&self) -> bool {
        let code = self.failure_code();
        self.source.is_goes() && code != 'G' && code != PARITY_ERROR_CODE && code != '-'
    }

    /// True if the message carries a parity-error code.
    pub fn has_parity_errors(&self) -> bool {
        self.failure_codes.contains(PARITY_ERROR_CODE)
    }

    /// True if every byte of the body is present.
    pub fn is_complete(&self) -> bool {
        self.data.len() >= self.msg_length
    }

    /// Decodes the GOES header, if this is a GOES message.
    pub fn goes_header(&self) -> Option<GoesHeader> {
        self.source.is_goes().then(|| GoesHeader::parse(&self.data))
    }

    /// Payload bytes following the header, for GOES messages.
    pub fn payload(&self) -> &[u8] {
        if self.source.is_goes() {
            self.data.get(HEADER_LENGTH..).unwrap_or(&[])
        } else {
            &self.data
        }
    }
}
