//! The declarative search criteria model.

use crate::criteria::time::TimeSpec;
use crate::message::{DcpAddress, MessageSource};
use std::collections::BTreeSet;
use std::fmt;

/// Highest channel number a criteria may name.
pub const MAX_CHANNEL: u16 = 511;

/// Maximum number of source filters.
pub const MAX_SOURCES: usize = 12;

/// A four-valued flag filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TriState {
    /// Not configured; always passes.
    #[default]
    Unspecified,
    /// Records with or without the property pass.
    Accept,
    /// Records with the property fail.
    Reject,
    /// Records without the property fail.
    Exclusive,
}

impl TriState {
    /// True if records with the property are wanted at all.
    pub fn includes(self) -> bool {
        matches!(self, Self::Accept | Self::Exclusive)
    }

    /// Returns true if a record where the property is `has` passes.
    pub fn passes(self, has: bool) -> bool {
        match self {
            Self::Unspecified | Self::Accept => true,
            Self::Reject => !has,
            Self::Exclusive => has,
        }
    }

    /// Letter used by the text format, or `None` when unspecified.
    pub fn code(self) -> Option<char> {
        match self {
            Self::Unspecified => None,
            Self::Accept => Some('A'),
            Self::Reject => Some('R'),
            Self::Exclusive => Some('O'),
        }
    }

    /// Parses a text-format letter. `Y` and `N` are accepted as aliases.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().chars().next()?.to_ascii_uppercase() {
            'A' | 'Y' => Some(Self::Accept),
            'R' | 'N' => Some(Self::Reject),
            'O' => Some(Self::Exclusive),
            _ => None,
        }
    }
}

/// One configured channel with its combinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelToken {
    /// Channel number, at most [`MAX_CHANNEL`].
    pub channel: u16,
    /// AND tokens also require the address check; OR tokens do not.
    pub and: bool,
}

impl ChannelToken {
    /// An OR token.
    pub fn or(channel: u16) -> Self {
        Self {
            channel,
            and: false,
        }
    }

    /// An AND token.
    pub fn and(channel: u16) -> Self {
        Self { channel, and: true }
    }
}

impl fmt::Display for ChannelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", if self.and { '&' } else { '|' }, self.channel)
    }
}

/// Spacecraft-side filter. East rejects odd channels, West even ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Spacecraft {
    /// Either side.
    #[default]
    Any,
    /// East only.
    East,
    /// West only.
    West,
}

impl Spacecraft {
    /// Returns true if `channel` belongs to this side.
    pub fn admits(self, channel: u16) -> bool {
        match self {
            Self::Any => true,
            Self::East => channel % 2 == 0,
            Self::West => channel % 2 == 1,
        }
    }
}

/// Immutable filter selecting a subset of archived messages.
///
/// Built with `Default` plus field assignment or the `with_*` helpers, or
/// parsed from the line-oriented text format via `FromStr`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchCriteria {
    /// Earliest local receipt time.
    pub lrgs_since: Option<TimeSpec>,
    /// Latest local receipt time.
    pub lrgs_until: Option<TimeSpec>,
    /// Earliest transmit time.
    pub daps_since: Option<TimeSpec>,
    /// Latest transmit time.
    pub daps_until: Option<TimeSpec>,
    /// Network list names to resolve into addresses.
    pub network_lists: Vec<String>,
    /// DCP names to resolve into addresses.
    pub dcp_names: Vec<String>,
    /// Explicit addresses.
    pub addresses: Vec<DcpAddress>,
    /// Channel tokens in the order given.
    pub channels: Vec<ChannelToken>,
    /// Source filters, at most [`MAX_SOURCES`], no duplicates.
    pub sources: Vec<MessageSource>,
    /// Spacecraft side.
    pub spacecraft: Spacecraft,
    /// Inclusive sequence number window.
    pub sequence: Option<(u32, u32)>,
    /// Allowed baud rates; empty allows all.
    pub bauds: BTreeSet<u32>,
    /// Retransmitted (duplicate) messages.
    pub retransmitted: TriState,
    /// DAPS status messages.
    pub daps_status: TriState,
    /// Messages with parity errors.
    pub parity_errors: TriState,
    /// Electronic mail pseudo-address.
    pub electronic_mail: TriState,
    /// Global bulletin pseudo-address.
    pub global_bulletin: TriState,
    /// DCP bulletin pseudo-address.
    pub dcp_bulletin: TriState,
    /// Return messages in ascending transmit time only.
    pub ascending_time: bool,
    /// Hold back messages received within the settle delay.
    pub realtime_settle: bool,
    /// Return one message per poll.
    pub single: bool,
}

impl SearchCriteria {
    /// Creates empty criteria matching every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transmit time window.
    pub fn with_daps_window(mut self, since: Option<TimeSpec>, until: Option<TimeSpec>) -> Self {
        self.daps_since = since;
        self.daps_until = until;
        self
    }

    /// Sets the receipt time window.
    pub fn with_lrgs_window(mut self, since: Option<TimeSpec>, until: Option<TimeSpec>) -> Self {
        self.lrgs_since = since;
        self.lrgs_until = until;
        self
    }

    /// Adds an explicit address.
    pub fn with_address(mut self, address: impl Into<DcpAddress>) -> Self {
        self.addresses.push(address.into());
        self
    }

    /// Adds a channel token.
    pub fn with_channel(mut self, token: ChannelToken) -> Self {
        self.channels.push(token);
        self
    }

    /// Adds a source filter.
    pub fn with_source(mut self, source: MessageSource) -> Self {
        self.add_source(source);
        self
    }

    /// Adds a source filter, ignoring duplicates.
    ///
    /// Returns false if the filter set is already full.
    pub fn add_source(&mut self, source: MessageSource) -> bool {
        if self.sources.contains(&source) {
            return true;
        }
        if self.sources.len() >= MAX_SOURCES {
            return false;
        }
        self.sources.push(source);
        true
    }

    /// True if any address source is configured.
    pub fn has_address_criteria(&self) -> bool {
        !self.network_lists.is_empty()
            || !self.dcp_names.is_empty()
            || !self.addresses.is_empty()
            || self.electronic_mail.includes()
            || self.global_bulletin.includes()
            || self.dcp_bulletin.includes()
    }

    /// True if either until bound is configured.
    pub fn has_until(&self) -> bool {
        self.daps_until.is_some() || self.lrgs_until.is_some()
    }
}
