//! KMIP error taxonomy.
//!
//! Every failure that surfaces in a batch item carries a [`ResultReason`].
//! The well-known reasons also surface their message text to the client;
//! anything else is reported as `GeneralFailure` with the detail kept in
//! server logs only.

use std::fmt;

/// A KMIP result reason, accompanying a failed batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ResultReason {
    ItemNotFound = 0x01,
    ResponseTooLarge = 0x02,
    AuthenticationNotSuccessful = 0x03,
    InvalidMessage = 0x04,
    OperationNotSupported = 0x05,
    MissingData = 0x06,
    InvalidField = 0x07,
    FeatureNotSupported = 0x08,
    OperationCanceledByRequester = 0x09,
    CryptographicFailure = 0x0A,
    IllegalOperation = 0x0B,
    PermissionDenied = 0x0C,
    ObjectArchived = 0x0D,
    GeneralFailure = 0x100,
}

impl ResultReason {
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Resolves a wire enumeration back to a reason. Unknown codes collapse
    /// to `GeneralFailure` so that a response from a newer peer still parses.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            0x01 => Self::ItemNotFound,
            0x02 => Self::ResponseTooLarge,
            0x03 => Self::AuthenticationNotSuccessful,
            0x04 => Self::InvalidMessage,
            0x05 => Self::OperationNotSupported,
            0x06 => Self::MissingData,
            0x07 => Self::InvalidField,
            0x08 => Self::FeatureNotSupported,
            0x09 => Self::OperationCanceledByRequester,
            0x0A => Self::CryptographicFailure,
            0x0B => Self::IllegalOperation,
            0x0C => Self::PermissionDenied,
            0x0D => Self::ObjectArchived,
            _ => Self::GeneralFailure,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ItemNotFound => "ItemNotFound",
            Self::ResponseTooLarge => "ResponseTooLarge",
            Self::AuthenticationNotSuccessful => "AuthenticationNotSuccessful",
            Self::InvalidMessage => "InvalidMessage",
            Self::OperationNotSupported => "OperationNotSupported",
            Self::MissingData => "MissingData",
            Self::InvalidField => "InvalidField",
            Self::FeatureNotSupported => "FeatureNotSupported",
            Self::OperationCanceledByRequester => "OperationCanceledByRequester",
            Self::CryptographicFailure => "CryptographicFailure",
            Self::IllegalOperation => "IllegalOperation",
            Self::PermissionDenied => "PermissionDenied",
            Self::ObjectArchived => "ObjectArchived",
            Self::GeneralFailure => "GeneralFailure",
        }
    }
}

impl fmt::Display for ResultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A KMIP error: a result reason plus an optional human-readable message.
#[derive(Debug, Clone)]
pub struct KmipError {
    reason: ResultReason,
    message: String,
}

pub type KmipResult<T> = Result<T, KmipError>;

impl KmipError {
    #[must_use]
    pub fn new(reason: ResultReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn operation_not_supported() -> Self {
        Self::new(ResultReason::OperationNotSupported, "Operation not supported")
    }

    #[must_use]
    pub fn feature_not_supported() -> Self {
        Self::new(ResultReason::FeatureNotSupported, "Feature not supported")
    }

    #[must_use]
    pub fn missing_data(what: impl fmt::Display) -> Self {
        Self::new(ResultReason::MissingData, format!("Missing data: {what}"))
    }

    #[must_use]
    pub fn item_not_found(what: impl fmt::Display) -> Self {
        Self::new(ResultReason::ItemNotFound, format!("Item not found: {what}"))
    }

    #[must_use]
    pub fn permission_denied() -> Self {
        Self::new(ResultReason::PermissionDenied, "Permission denied")
    }

    #[must_use]
    pub fn invalid_message(detail: impl fmt::Display) -> Self {
        Self::new(ResultReason::InvalidMessage, format!("Invalid message: {detail}"))
    }

    #[must_use]
    pub fn invalid_field(what: impl fmt::Display) -> Self {
        Self::new(ResultReason::InvalidField, format!("Invalid field: {what}"))
    }

    #[must_use]
    pub fn general(detail: impl fmt::Display) -> Self {
        Self::new(ResultReason::GeneralFailure, detail.to_string())
    }

    #[must_use]
    pub const fn reason(&self) -> ResultReason {
        self.reason
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the message text may be surfaced to the client. Opaque
    /// failures keep their detail server-side.
    #[must_use]
    pub const fn is_well_known(&self) -> bool {
        matches!(
            self.reason,
            ResultReason::OperationNotSupported
                | ResultReason::FeatureNotSupported
                | ResultReason::MissingData
                | ResultReason::ItemNotFound
                | ResultReason::PermissionDenied
                | ResultReason::InvalidMessage
                | ResultReason::InvalidField
        )
    }
}

impl fmt::Display for KmipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(self.reason.name())
        } else {
            f.write_str(&self.message)
        }
    }
}

impl std::error::Error for KmipError {}
