//! Platform addresses and broadcast pseudo-addresses.

use std::fmt;
use std::str::FromStr;

/// Pseudo-address that carries global bulletins.
pub const GLOBAL_BULLETIN_ADDR: &str = "11111111";

/// Pseudo-address that carries DCP bulletins.
pub const DCP_BULLETIN_ADDR: &str = "22222222";

/// Pseudo-address that carries electronic-mail broadcasts.
pub const ELECTRONIC_MAIL_ADDR: &str = "33333333";

/// Identifier of a data collection platform.
///
/// Addresses compare case-insensitively: they are trimmed and upper-cased on
/// construction so that hex addresses like `ce31a2b4` and `CE31A2B4` collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DcpAddress(String);

impl DcpAddress {
    /// Creates a normalized address.
    pub fn new(address: &str) -> Self {
        Self(address.trim().to_ascii_uppercase())
    }

    /// Global bulletin pseudo-address.
    pub fn global_bulletin() -> Self {
        Self::new(GLOBAL_BULLETIN_ADDR)
    }

    /// DCP bulletin pseudo-address.
    pub fn dcp_bulletin() -> Self {
        Self::new(DCP_BULLETIN_ADDR)
    }

    /// Electronic-mail pseudo-address.
    pub fn electronic_mail() -> Self {
        Self::new(ELECTRONIC_MAIL_ADDR)
    }

    /// Returns the normalized text form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for an empty address.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DcpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DcpAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for DcpAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalization() {
        assert_eq!(DcpAddress::new(" ce31a2b4 "), DcpAddress::new("CE31A2B4"));
        assert_eq!(DcpAddress::new("ce31a2b4").as_str(), "CE31A2B4");
    }

    #[test]
    fn test_address_ordering() {
        let mut addrs = vec![
            DcpAddress::new("CE31A2B4"),
            DcpAddress::new("1234ABCD"),
            DcpAddress::new("88AA0011"),
        ];
        addrs.sort();
        assert_eq!(addrs[0].as_str(), "1234ABCD");
        assert_eq!(addrs[2].as_str(), "CE31A2B4");
    }
}
