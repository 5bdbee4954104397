//! Addressing types.
//!
//! - [`NodeId`]: cluster-unique identifier of a running node
//! - [`EndPointAddress`]: ip + port + ip version, used only to open sockets
//! - [`Uid`]: 128-bit opaque token
//! - [`Address`]: source or destination of a mail
//! - [`Destination`]: where a mail goes, resolved at dispatch time

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Cluster-unique node identifier, assigned by whoever configures the node.
pub type NodeId = u32;

/// IP protocol version of an [`EndPointAddress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpVersion {
    /// IPv4.
    V4,
    /// IPv6.
    V6,
}

/// Network location of a node (bind address or peer address).
///
/// Kept as the raw configuration triple; [`EndPointAddress::socket_addr`]
/// checks that the parts agree with each other.
///
/// # Examples
///
/// ```
/// use orca_core::{EndPointAddress, IpVersion};
///
/// let addr = EndPointAddress::new("127.0.0.1", 4500, IpVersion::V4);
/// assert_eq!(addr.to_string(), "127.0.0.1:4500");
/// assert!(addr.socket_addr().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndPointAddress {
    /// Textual IP address.
    pub ip: String,
    /// TCP port.
    pub port: u16,
    /// Expected IP version of `ip`.
    pub ip_version: IpVersion,
}

impl EndPointAddress {
    /// Create a new address.
    pub fn new(ip: impl Into<String>, port: u16, ip_version: IpVersion) -> Self {
        Self {
            ip: ip.into(),
            port,
            ip_version,
        }
    }

    /// Shorthand for an IPv4 address.
    pub fn v4(ip: impl Into<String>, port: u16) -> Self {
        Self::new(ip, port, IpVersion::V4)
    }

    /// Shorthand for an IPv6 address.
    pub fn v6(ip: impl Into<String>, port: u16) -> Self {
        Self::new(ip, port, IpVersion::V6)
    }

    /// Parse from `ip:port` or `[ipv6]:port`.
    ///
    /// # Errors
    ///
    /// Returns error if the IP or port cannot be parsed.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let (ip_str, port_str) = if let Some(bracket_end) = s.rfind(']') {
            if !s.starts_with('[') {
                return Err(AddressError::InvalidIp(s.to_string()));
            }
            let port_str = s
                .get(bracket_end + 1..)
                .and_then(|rest| rest.strip_prefix(':'))
                .ok_or(AddressError::MissingPort)?;
            (&s[1..bracket_end], port_str)
        } else {
            s.rsplit_once(':').ok_or(AddressError::MissingPort)?
        };

        let ip: IpAddr = ip_str
            .parse()
            .map_err(|_| AddressError::InvalidIp(ip_str.to_string()))?;
        let port: u16 = port_str
            .parse()
            .map_err(|_| AddressError::InvalidPort(port_str.to_string()))?;
        let ip_version = match ip {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        };
        Ok(Self::new(ip_str, port, ip_version))
    }

    /// Resolve into a socket address, checking the ip against `ip_version`.
    ///
    /// # Errors
    ///
    /// Returns error if the ip is malformed or of the other IP version.
    pub fn socket_addr(&self) -> Result<SocketAddr, AddressError> {
        let ip: IpAddr = self
            .ip
            .parse()
            .map_err(|_| AddressError::InvalidIp(self.ip.clone()))?;
        let matches = matches!(
            (ip, self.ip_version),
            (IpAddr::V4(_), IpVersion::V4) | (IpAddr::V6(_), IpVersion::V6)
        );
        if !matches {
            return Err(AddressError::VersionMismatch {
                ip: self.ip.clone(),
                expected: self.ip_version,
            });
        }
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Like [`socket_addr`](Self::socket_addr), also rejecting port 0.
    ///
    /// Peers must be dialable; only a bind address may ask for an
    /// ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns error if the address is malformed or the port is 0.
    pub fn dialable(&self) -> Result<SocketAddr, AddressError> {
        let addr = self.socket_addr()?;
        if addr.port() == 0 {
            return Err(AddressError::InvalidPort("0".to_string()));
        }
        Ok(addr)
    }
}

impl std::fmt::Display for EndPointAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ip_version {
            IpVersion::V4 => write!(f, "{}:{}", self.ip, self.port),
            IpVersion::V6 => write!(f, "[{}]:{}", self.ip, self.port),
        }
    }
}

impl From<SocketAddr> for EndPointAddress {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self::v4(v4.ip().to_string(), v4.port()),
            SocketAddr::V6(v6) => Self::v6(v6.ip().to_string(), v6.port()),
        }
    }
}

/// Error building a socket address from configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// The IP address could not be parsed.
    #[error("invalid IP address: {0:?}")]
    InvalidIp(String),
    /// The port number could not be parsed or is not usable.
    #[error("invalid port: {0:?}")]
    InvalidPort(String),
    /// No port separator (`:`) found in the input.
    #[error("missing port separator")]
    MissingPort,
    /// The IP parses, but as the other protocol version.
    #[error("address {ip:?} is not {expected:?}")]
    VersionMismatch {
        /// The configured ip string.
        ip: String,
        /// The configured version.
        expected: IpVersion,
    },
}

/// 128-bit opaque token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Uid {
    /// First 64 bits.
    pub first: u64,
    /// Second 64 bits.
    pub second: u64,
}

impl Uid {
    /// Create a new token with explicit values.
    pub const fn new(first: u64, second: u64) -> Self {
        Self { first, second }
    }

    /// Check if the token is non-zero.
    pub const fn is_valid(&self) -> bool {
        self.first != 0 || self.second != 0
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}{:016x}", self.first, self.second)
    }
}

/// Identity of a mail source or destination.
///
/// Both forms carry the node that owns them, which is all the transport
/// needs for routing. What `name` or `token` mean on that node is up to the
/// actor runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    /// A named actor living on `node`.
    Actor {
        /// Owning node.
        node: NodeId,
        /// Node-local actor name.
        name: String,
    },
    /// An opaque routable token living on `node`.
    Token {
        /// Owning node.
        node: NodeId,
        /// Node-local token.
        token: Uid,
    },
}

impl Address {
    /// Named actor address.
    pub fn actor(node: NodeId, name: impl Into<String>) -> Self {
        Address::Actor {
            node,
            name: name.into(),
        }
    }

    /// Opaque token address.
    pub fn token(node: NodeId, token: Uid) -> Self {
        Address::Token { node, token }
    }

    /// Node owning this address.
    pub fn node(&self) -> NodeId {
        match self {
            Address::Actor { node, .. } | Address::Token { node, .. } => *node,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Actor { node, name } => write!(f, "{}@{}", name, node),
            Address::Token { node, token } => write!(f, "{}@{}", token, node),
        }
    }
}

/// Where a mail is going.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// A concrete address.
    Address(Address),
    /// A logical `(name, node)` pair, resolved on the target node.
    Named {
        /// Service or actor name.
        name: String,
        /// Target node.
        node: NodeId,
    },
}

impl Destination {
    /// Node this destination resolves to.
    pub fn node(&self) -> NodeId {
        match self {
            Destination::Address(address) => address.node(),
            Destination::Named { node, .. } => *node,
        }
    }
}

impl From<Address> for Destination {
    fn from(address: Address) -> Self {
        Destination::Address(address)
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Address(address) => address.fmt(f),
            Destination::Named { name, node } => write!(f, "{}@{}", name, node),
        }
    }
}
