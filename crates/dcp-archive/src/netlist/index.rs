//! Sorted, de-duplicated address index.

use crate::criteria::SearchCriteria;
use crate::error::{ArchiveError, Result};
use crate::message::DcpAddress;
use crate::netlist::cache::NetlistSource;
use crate::netlist::resolver::NameResolver;
use tracing::debug;

/// Ascending array of unique addresses with O(log n) membership.
///
/// An index remembers whether any address source was configured at all, so
/// that an empty network list still restricts matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressIndex {
    addresses: Vec<DcpAddress>,
    configured: bool,
}

impl AddressIndex {
    /// Index that places no restriction on addresses.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Builds an index from explicit addresses.
    pub fn from_addresses(addresses: impl IntoIterator<Item = DcpAddress>) -> Self {
        let mut index = Self {
            addresses: addresses.into_iter().collect(),
            configured: true,
        };
        index.addresses.sort();
        index.addresses.dedup();
        index
    }

    /// Builds the index for `criteria`.
    ///
    /// Merges the named network lists, the DCP names resolved through `names`,
    /// the explicit addresses, and a broadcast pseudo-address for each
    /// broadcast flag that asks for them.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::NetworkListNotFound`] or
    /// [`ArchiveError::UnknownDcpName`] if a reference cannot be resolved.
    pub fn resolve(
        criteria: &SearchCriteria,
        lists: &dyn NetlistSource,
        names: &dyn NameResolver,
    ) -> Result<Self> {
        let mut addresses = Vec::new();

        for list_name in &criteria.network_lists {
            let list = lists
                .network_list(list_name)
                .ok_or_else(|| ArchiveError::NetworkListNotFound(list_name.clone()))?;
            addresses.extend(list.addresses().cloned());
        }

        for name in &criteria.dcp_names {
            let address = names
                .resolve(name)
                .ok_or_else(|| ArchiveError::UnknownDcpName(name.clone()))?;
            addresses.push(address);
        }

        addresses.extend(criteria.addresses.iter().cloned());

        if criteria.electronic_mail.includes() {
            addresses.push(DcpAddress::electronic_mail());
        }
        if criteria.global_bulletin.includes() {
            addresses.push(DcpAddress::global_bulletin());
        }
        if criteria.dcp_bulletin.includes() {
            addresses.push(DcpAddress::dcp_bulletin());
        }

        let configured = !criteria.network_lists.is_empty()
            || !criteria.dcp_names.is_empty()
            || !addresses.is_empty();
        if !configured {
            return Ok(Self::unrestricted());
        }

        let index = Self::from_addresses(addresses);
        debug!("Resolved address index with {} entries", index.len());
        Ok(index)
    }

    /// True if any address source was configured.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Binary-search membership test.
    pub fn contains(&self, address: &DcpAddress) -> bool {
        self.addresses.binary_search(address).is_ok()
    }

    /// Passes every address when unconfigured, else tests membership.
    pub fn admits(&self, address: &DcpAddress) -> bool {
        !self.configured || self.contains(address)
    }

    /// Number of addresses.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// True if the index holds no addresses.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Addresses in ascending order.
    pub fn as_slice(&self) -> &[DcpAddress] {
        &self.addresses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::TriState;
    use crate::netlist::{NameMapper, NetlistSnapshot, NetworkList};

    fn snapshot() -> NetlistSnapshot {
        NetlistSnapshot::from_lists(vec![NetworkList::parse(
            "rivers",
            "CE31A2B4:BIGRIVER\n1234ABCD:SMALLCREEK\nCE31A2B4:DUPLICATE\n",
        )])
    }

    #[test]
    fn test_resolve_merges_and_sorts() {
        let mut criteria = SearchCriteria::default();
        criteria.network_lists.push("rivers".to_string());
        criteria.addresses.push(DcpAddress::new("0000FFFF"));
        criteria.global_bulletin = TriState::Accept;

        let snapshot = snapshot();
        let index = AddressIndex::resolve(&criteria, &snapshot, &snapshot).unwrap();
        let addrs: Vec<&str> = index.as_slice().iter().map(|a| a.as_str()).collect();
        assert_eq!(addrs, vec!["0000FFFF", "11111111", "1234ABCD", "CE31A2B4"]);
        assert!(index.contains(&DcpAddress::new("ce31a2b4")));
    }

    #[test]
    fn test_resolve_names_through_mapper() {
        let mut criteria = SearchCriteria::default();
        criteria.dcp_names.push("smallcreek".to_string());
        let snapshot = snapshot();
        let mapper = NameMapper::new().with_layer(std::sync::Arc::new(snapshot.clone()));

        let index = AddressIndex::resolve(&criteria, &snapshot, &mapper).unwrap();
        assert_eq!(index.as_slice(), &[DcpAddress::new("1234ABCD")]);

        criteria.dcp_names.push("nowhere".to_string());
        let err = AddressIndex::resolve(&criteria, &snapshot, &mapper).unwrap_err();
        assert!(matches!(err, ArchiveError::UnknownDcpName(name) if name == "nowhere"));
    }

    #[test]
    fn test_missing_list_is_error() {
        let mut criteria = SearchCriteria::default();
        criteria.network_lists.push("lakes".to_string());
        let snapshot = snapshot();
        assert!(matches!(
            AddressIndex::resolve(&criteria, &snapshot, &snapshot),
            Err(ArchiveError::NetworkListNotFound(_))
        ));
    }

    #[test]
    fn test_unconfigured_admits_all() {
        let snapshot = snapshot();
        let index = AddressIndex::resolve(&SearchCriteria::default(), &snapshot, &snapshot).unwrap();
        assert!(!index.is_configured());
        assert!(index.admits(&DcpAddress::new("ANYTHING")));
    }

    #[test]
    fn test_empty_list_still_restricts() {
        let snapshot = NetlistSnapshot::from_lists(vec![NetworkList::new("empty")]);
        let mut criteria = SearchCriteria::default();
        criteria.network_lists.push("empty".to_string());
        let index = AddressIndex::resolve(&criteria, &snapshot, &snapshot).unwrap();
        assert!(index.is_configured());
        assert!(!index.admits(&DcpAddress::new("CE31A2B4")));
    }
}
