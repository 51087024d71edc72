//! Contact data structures.

use std::collections::HashMap;

use bytes::Bytes;

/// Length of a public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of a public key prefix used in messages.
pub const PUBLIC_KEY_PREFIX_LEN: usize = 6;

/// Maximum path length in bytes.
pub const MAX_PATH_LEN: usize = 64;

/// Maximum name length in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Contacts keyed by advertised name.
pub type Contacts = HashMap<String, Contact>;

/// A 32-byte public key identifying a contact or device.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Creates a public key from an array.
    #[must_use]
    pub const fn new(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Tries to create a public key from bytes.
    ///
    /// Returns `None` if the slice is not exactly 32 bytes.
    #[must_use]
    pub fn try_from_bytes(bytes: &[u8]) -> Option<Self> {
        <[u8; PUBLIC_KEY_LEN]>::try_from(bytes).ok().map(Self)
    }

    /// Returns the 6-byte prefix used in message addressing.
    #[must_use]
    pub fn prefix(&self) -> [u8; PUBLIC_KEY_PREFIX_LEN] {
        let mut prefix = [0u8; PUBLIC_KEY_PREFIX_LEN];
        prefix.copy_from_slice(&self.0[..PUBLIC_KEY_PREFIX_LEN]);
        prefix
    }

    /// Returns the key as a byte slice.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the key as a hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a public key from a hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not 64 characters.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        Self::try_from_bytes(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_hex()[..12])
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Contact flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContactFlags(u8);

impl ContactFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// Contact is a favourite.
    pub const FAVOURITE: Self = Self(1 << 0);

    /// Creates flags from a raw byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Check if a flag is set.
    #[must_use]
    pub const fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) == flag.0
    }
}

/// Node type, as advertised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContactType {
    /// No type advertised.
    #[default]
    None,
    /// Chat peer (companion radio).
    Chat,
    /// Repeater node.
    Repeater,
    /// Room server.
    Room,
    /// Sensor node.
    Sensor,
    /// Type byte this client does not know.
    Other(u8),
}

impl ContactType {
    /// Parses a contact type from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::None,
            1 => Self::Chat,
            2 => Self::Repeater,
            3 => Self::Room,
            4 => Self::Sensor,
            other => Self::Other(other),
        }
    }

    /// Returns the wire byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Chat => 1,
            Self::Repeater => 2,
            Self::Room => 3,
            Self::Sensor => 4,
            Self::Other(byte) => byte,
        }
    }
}

/// Length of a routing path, or the absence of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathLen {
    /// No cached path; delivery is by flood and the hop count is unknown.
    #[default]
    Flood,
    /// Explicit path of this many hops (0 = direct neighbour).
    Direct(u8),
}

impl PathLen {
    /// Builds a path length from an optional hop count.
    #[must_use]
    pub const fn from_hops(hops: Option<u8>) -> Self {
        match hops {
            Some(n) => Self::Direct(n),
            None => Self::Flood,
        }
    }

    /// Returns true if there is no cached path.
    #[must_use]
    pub const fn is_flood(self) -> bool {
        matches!(self, Self::Flood)
    }

    /// Returns the hop count, if known.
    #[must_use]
    pub const fn hops(self) -> Option<u8> {
        match self {
            Self::Flood => None,
            Self::Direct(n) => Some(n),
        }
    }

    /// Returns the wire byte (0xFF for flood).
    #[must_use]
    pub const fn to_wire(self) -> u8 {
        match self {
            Self::Flood => 0xFF,
            Self::Direct(n) => n,
        }
    }
}

/// Information about a contact.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    /// The contact's public key.
    pub public_key: PublicKey,
    /// Node type.
    pub contact_type: ContactType,
    /// Contact flags.
    pub flags: ContactFlags,
    /// Outbound path length, or flood.
    pub out_path_len: PathLen,
    /// Outbound path data (empty for flood and for zero-hop paths).
    pub out_path: Bytes,
    /// Advertised name.
    pub adv_name: String,
    /// Last advertisement timestamp (Unix seconds).
    pub last_advert: u32,
    /// Advertised latitude in degrees.
    pub adv_lat: f64,
    /// Advertised longitude in degrees.
    pub adv_lon: f64,
    /// Last modification timestamp.
    pub lastmod: u32,
}

impl Contact {
    /// Returns true if this contact uses flood routing.
    #[must_use]
    pub const fn is_flood(&self) -> bool {
        self.out_path_len.is_flood()
    }

    /// Installs an explicit out path, truncated to [`MAX_PATH_LEN`].
    ///
    /// This only changes the local copy; push it with `update_contact`.
    pub fn set_out_path(&mut self, path: &[u8]) {
        let len = path.len().min(MAX_PATH_LEN);
        self.out_path = Bytes::copy_from_slice(&path[..len]);
        self.out_path_len = PathLen::Direct(len as u8);
    }

    /// Forgets the out path so that the next message floods.
    pub fn clear_out_path(&mut self) {
        self.out_path = Bytes::new();
        self.out_path_len = PathLen::Flood;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_from_bytes() {
        let key = PublicKey::try_from_bytes(&[0u8; 32]).unwrap();
        assert_eq!(key.as_bytes(), &[0u8; 32]);
        assert!(PublicKey::try_from_bytes(&[0u8; 31]).is_none());
    }

    #[test]
    fn test_public_key_prefix() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xAB;
        bytes[1] = 0xCD;
        bytes[5] = 0xEF;
        let prefix = PublicKey::new(bytes).prefix();
        assert_eq!(prefix, [0xAB, 0xCD, 0, 0, 0, 0xEF]);
    }

    #[test]
    fn test_public_key_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xAB;
        let key = PublicKey::new(bytes);
        let hex = key.to_hex();
        assert_eq!(&hex[..2], "ab");

        let parsed = PublicKey::from_hex(&hex).unwrap();
        assert_eq!(parsed, key);
        assert!(PublicKey::from_hex("abcd").is_err());
    }

    #[test]
    fn test_contact_type() {
        assert_eq!(ContactType::from_byte(1), ContactType::Chat);
        assert_eq!(ContactType::from_byte(2), ContactType::Repeater);
        assert_eq!(ContactType::from_byte(3), ContactType::Room);
        assert_eq!(ContactType::from_byte(4), ContactType::Sensor);
        assert_eq!(ContactType::from_byte(99), ContactType::Other(99));
        assert_eq!(ContactType::Other(99).as_byte(), 99);
    }

    #[test]
    fn test_path_len() {
        assert!(PathLen::Flood.is_flood());
        assert_eq!(PathLen::Flood.to_wire(), 0xFF);
        assert_eq!(PathLen::Direct(0).hops(), Some(0));
        assert!(!PathLen::Direct(0).is_flood());
        assert_eq!(PathLen::from_hops(None), PathLen::Flood);
    }

    #[test]
    fn test_set_out_path() {
        let mut contact = Contact {
            public_key: PublicKey::new([1; 32]),
            contact_type: ContactType::Chat,
            flags: ContactFlags::NONE,
            out_path_len: PathLen::Flood,
            out_path: Bytes::new(),
            adv_name: "alice".into(),
            last_advert: 0,
            adv_lat: 0.0,
            adv_lon: 0.0,
            lastmod: 0,
        };

        contact.set_out_path(&[0x11, 0x22]);
        assert_eq!(contact.out_path_len, PathLen::Direct(2));
        assert_eq!(&contact.out_path[..], &[0x11, 0x22]);

        contact.clear_out_path();
        assert!(contact.is_flood());
        assert!(contact.out_path.is_empty());
    }
}
