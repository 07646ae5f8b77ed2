//! Evaluates [`SearchCriteria`] against decoded messages.

use crate::criteria::model::{SearchCriteria, MAX_CHANNEL};
use crate::message::{DcpMessage, Timestamp};
use crate::netlist::AddressIndex;
use bitvec::prelude::*;
use std::sync::Arc;

const CHANNEL_SLOTS: usize = MAX_CHANNEL as usize + 1;

/// A compiled criteria ready to test messages.
///
/// Relative time bounds are resolved once at construction, so a matcher
/// gives stable answers for the life of a cursor.
#[derive(Debug, Clone)]
pub struct Matcher {
    criteria: Arc<SearchCriteria>,
    index: AddressIndex,
    daps_since: Option<Timestamp>,
    daps_until: Option<Timestamp>,
    /// Channels named by any token.
    channel_seen: BitVec<u64, Lsb0>,
    /// Combinator of the first token naming each channel.
    channel_and: BitVec<u64, Lsb0>,
    has_and: bool,
}

impl Matcher {
    /// Compiles `criteria` with its resolved address index, evaluating
    /// relative time bounds against `now`.
    pub fn new(criteria: Arc<SearchCriteria>, index: AddressIndex, now: Timestamp) -> Self {
        let mut channel_seen = bitvec![u64, Lsb0; 0; CHANNEL_SLOTS];
        let mut channel_and = bitvec![u64, Lsb0; 0; CHANNEL_SLOTS];
        for token in &criteria.channels {
            let slot = usize::from(token.channel);
            if slot < CHANNEL_SLOTS && !channel_seen[slot] {
                channel_seen.set(slot, true);
                channel_and.set(slot, token.and);
            }
        }
        let has_and = criteria.channels.iter().any(|t| t.and);

        Self {
            daps_since: criteria.daps_since.map(|t| t.evaluate(now)),
            daps_until: criteria.daps_until.map(|t| t.evaluate(now)),
            criteria,
            index,
            channel_seen,
            channel_and,
            has_and,
        }
    }

    /// The criteria being matched.
    pub fn criteria(&self) -> &SearchCriteria {
        &self.criteria
    }

    /// The resolved address index.
    pub fn index(&self) -> &AddressIndex {
        &self.index
    }

    /// Resolved transmit-time lower bound.
    pub fn daps_since(&self) -> Option<Timestamp> {
        self.daps_since
    }

    /// Resolved transmit-time upper bound.
    pub fn daps_until(&self) -> Option<Timestamp> {
        self.daps_until
    }

    fn address_channel_pass(&self, msg: &DcpMessage) -> bool {
        let address_pass = self.index.admits(&msg.address);
        if self.criteria.channels.is_empty() {
            return address_pass;
        }

        let slot = usize::from(msg.channel);
        if slot < CHANNEL_SLOTS && self.channel_seen[slot] {
            // An AND token is never satisfied by the channel alone.
            return !self.channel_and[slot] || address_pass;
        }
        !self.has_and && self.index.is_configured() && address_pass
    }

    /// Returns true if `msg` satisfies every configured sub-predicate.
    ///
    /// Receipt-time bounds are not checked here.
    pub fn test(&self, msg: &DcpMessage) -> bool {
        let criteria = &*self.criteria;

        if !criteria.sources.is_empty()
            && !criteria.sources.iter().any(|&f| msg.source.satisfies(f))
        {
            return false;
        }

        if !self.address_channel_pass(msg) {
            return false;
        }

        if self.daps_since.is_some_and(|since| msg.transmit_time < since)
            || self.daps_until.is_some_and(|until| msg.transmit_time > until)
        {
            return false;
        }

        if !criteria.retransmitted.passes(msg.flags.duplicate) {
            return false;
        }

        if !criteria.daps_status.passes(msg.is_daps_status()) {
            return false;
        }

        if !criteria.spacecraft.admits(msg.channel) {
            return false;
        }

        // Sequenced records are matched exactly upstream.
        if criteria.sequence.is_some() && msg.sequence_num.is_some() {
            return false;
        }

        if !criteria.bauds.is_empty() && msg.baud != 0 && !criteria.bauds.contains(&msg.baud) {
            return false;
        }

        criteria.parity_errors.passes(msg.has_parity_errors())
    }
}
