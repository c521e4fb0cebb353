use veil_core::WIRE_VERSION;

/// Maximum cleartext bytes a single protected record may carry.
pub const MAX_PLAINTEXT_LEN: usize = 16 * 1024;

/// Protocol version negotiated by a session. Exactly one exists today; the
/// enum keeps the negotiation surface explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    V1,
}

impl ProtocolVersion {
    pub const fn wire(self) -> u16 {
        match self {
            ProtocolVersion::V1 => WIRE_VERSION,
        }
    }

    pub fn from_wire(value: u16) -> Option<Self> {
        (value == WIRE_VERSION).then_some(ProtocolVersion::V1)
    }
}

/// AEAD cipher suite identifier. A session is bound to exactly one suite at
/// construction and never renegotiates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSuite(u16);

impl CipherSuite {
    pub const AES_128_GCM_SHA256: Self = Self(0x1301);
    pub const CHACHA20_POLY1305_SHA256: Self = Self(0x1303);

    pub const fn id(self) -> u16 {
        self.0
    }

    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0x1301 => Some(Self::AES_128_GCM_SHA256),
            0x1303 => Some(Self::CHACHA20_POLY1305_SHA256),
            _ => None,
        }
    }

    pub const fn key_len(self) -> usize {
        match self.0 {
            0x1301 => 16,
            _ => 32,
        }
    }

    pub const fn iv_len(self) -> usize {
        12
    }

    pub const fn tag_len(self) -> usize {
        16
    }

    /// Largest record this suite can emit, header and tag included. Callers
    /// size wrap destinations from this.
    pub const fn max_record_len(self) -> usize {
        veil_core::RECORD_HEADER_LEN + MAX_PLAINTEXT_LEN + self.tag_len()
    }
}
