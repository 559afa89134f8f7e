//! Operation codes from the KMIP registry.

use std::fmt;

/// A KMIP operation code.
///
/// Operations are opaque 32-bit codes; the constants below cover the KMIP
/// 1.x registry. Ordering follows the numeric value, which is what the
/// dispatch registry iterates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Operation(pub u32);

impl Operation {
    pub const CREATE: Operation = Operation(0x01);
    pub const CREATE_KEY_PAIR: Operation = Operation(0x02);
    pub const REGISTER: Operation = Operation(0x03);
    pub const REKEY: Operation = Operation(0x04);
    pub const DERIVE_KEY: Operation = Operation(0x05);
    pub const CERTIFY: Operation = Operation(0x06);
    pub const RECERTIFY: Operation = Operation(0x07);
    pub const LOCATE: Operation = Operation(0x08);
    pub const CHECK: Operation = Operation(0x09);
    pub const GET: Operation = Operation(0x0A);
    pub const GET_ATTRIBUTES: Operation = Operation(0x0B);
    pub const GET_ATTRIBUTE_LIST: Operation = Operation(0x0C);
    pub const ADD_ATTRIBUTE: Operation = Operation(0x0D);
    pub const MODIFY_ATTRIBUTE: Operation = Operation(0x0E);
    pub const DELETE_ATTRIBUTE: Operation = Operation(0x0F);
    pub const OBTAIN_LEASE: Operation = Operation(0x10);
    pub const GET_USAGE_ALLOCATION: Operation = Operation(0x11);
    pub const ACTIVATE: Operation = Operation(0x12);
    pub const REVOKE: Operation = Operation(0x13);
    pub const DESTROY: Operation = Operation(0x14);
    pub const ARCHIVE: Operation = Operation(0x15);
    pub const RECOVER: Operation = Operation(0x16);
    pub const VALIDATE: Operation = Operation(0x17);
    pub const QUERY: Operation = Operation(0x18);
    pub const CANCEL: Operation = Operation(0x19);
    pub const POLL: Operation = Operation(0x1A);
    pub const NOTIFY: Operation = Operation(0x1B);
    pub const PUT: Operation = Operation(0x1C);
    pub const REKEY_KEY_PAIR: Operation = Operation(0x1D);
    pub const DISCOVER_VERSIONS: Operation = Operation(0x1E);
    pub const ENCRYPT: Operation = Operation(0x1F);
    pub const DECRYPT: Operation = Operation(0x20);
    pub const SIGN: Operation = Operation(0x21);
    pub const SIGNATURE_VERIFY: Operation = Operation(0x22);
    pub const MAC: Operation = Operation(0x23);

    /// Registry name, if this is a known code.
    #[must_use]
    pub const fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::CREATE => "Create",
            Self::CREATE_KEY_PAIR => "CreateKeyPair",
            Self::REGISTER => "Register",
            Self::REKEY => "ReKey",
            Self::DERIVE_KEY => "DeriveKey",
            Self::CERTIFY => "Certify",
            Self::RECERTIFY => "ReCertify",
            Self::LOCATE => "Locate",
            Self::CHECK => "Check",
            Self::GET => "Get",
            Self::GET_ATTRIBUTES => "GetAttributes",
            Self::GET_ATTRIBUTE_LIST => "GetAttributeList",
            Self::ADD_ATTRIBUTE => "AddAttribute",
            Self::MODIFY_ATTRIBUTE => "ModifyAttribute",
            Self::DELETE_ATTRIBUTE => "DeleteAttribute",
            Self::OBTAIN_LEASE => "ObtainLease",
            Self::GET_USAGE_ALLOCATION => "GetUsageAllocation",
            Self::ACTIVATE => "Activate",
            Self::REVOKE => "Revoke",
            Self::DESTROY => "Destroy",
            Self::ARCHIVE => "Archive",
            Self::RECOVER => "Recover",
            Self::VALIDATE => "Validate",
            Self::QUERY => "Query",
            Self::CANCEL => "Cancel",
            Self::POLL => "Poll",
            Self::NOTIFY => "Notify",
            Self::PUT => "Put",
            Self::REKEY_KEY_PAIR => "ReKeyKeyPair",
            Self::DISCOVER_VERSIONS => "DiscoverVersions",
            Self::ENCRYPT => "Encrypt",
            Self::DECRYPT => "Decrypt",
            Self::SIGN => "Sign",
            Self::SIGNATURE_VERIFY => "SignatureVerify",
            Self::MAC => "MAC",
            _ => return None,
        })
    }

    #[must_use]
    pub const fn code(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Operation({:#x})", self.0),
        }
    }
}

impl From<u32> for Operation {
    fn from(code: u32) -> Self {
        Self(code)
    }
}
