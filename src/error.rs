//! Error types for blepass.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` for efficient on-target logging.

/// Top-level error type used by the boot sequence.
///
/// Every variant is fatal: the caller powers the device off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The Bluetooth stack could not be opened.
    StackOpen(StackError),

    /// A GATT service could not be registered.
    ServiceRegistration(ProfileError),

    /// Advertising could not be configured or started.
    Advertising(StackError),

    /// I²C transaction to the display failed.
    Display,
}

/// Error reported by the vendor Bluetooth stack seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StackError {
    /// Raw error code from the vendor stack.
    Raw(u32),
    /// The referenced connection does not exist (any more).
    NotConnected,
    /// The stack ran out of buffers, handles or timers.
    NoResources,
    /// The request is not valid in the current stack state.
    InvalidState,
}

/// Errors returned by the public profile entry points.
///
/// `code()` yields the small negative integers used on the C-style
/// service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProfileError {
    /// A required argument was empty or out of range.
    InvalidParameter,
    /// The instance id does not map to a registered instance.
    InvalidInstance,
    /// The stack id is zero or differs from the instance's stack.
    InvalidStackId,
    /// No free instance slot or the stack refused the registration.
    InsufficientResources,
    /// An indication is already waiting for its confirmation.
    IndicationOutstanding,
    /// The service has not been initialised.
    NotInitialized,
    /// The stack rejected the request.
    Stack(StackError),
}

impl ProfileError {
    pub const fn code(&self) -> i32 {
        match self {
            ProfileError::InvalidParameter => -1,
            ProfileError::InvalidInstance => -2,
            ProfileError::InvalidStackId => -3,
            ProfileError::InsufficientResources => -4,
            ProfileError::IndicationOutstanding => -5,
            ProfileError::NotInitialized => -6,
            ProfileError::Stack(_) => -7,
        }
    }
}

/// ATT protocol error codes sent back to the remote client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AttError {
    InvalidHandle = 0x01,
    ReadNotPermitted = 0x02,
    WriteNotPermitted = 0x03,
    InvalidPdu = 0x04,
    InsufficientAuthentication = 0x05,
    RequestNotSupported = 0x06,
    InvalidOffset = 0x07,
    AttributeNotLong = 0x0B,
    InsufficientEncryptionKeySize = 0x0C,
    InvalidAttributeValueLength = 0x0D,
    UnlikelyError = 0x0E,
    InsufficientEncryption = 0x0F,
    ValueNotAllowed = 0x13,
    /// Profile-defined: a control point procedure is already running.
    ProcedureAlreadyInProgress = 0x80,
    /// Profile-defined: the CCCD is not configured for the procedure.
    CccdImproperlyConfigured = 0x81,
}

impl AttError {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

// Convenience conversions

impl From<StackError> for ProfileError {
    fn from(e: StackError) -> Self {
        ProfileError::Stack(e)
    }
}

impl From<StackError> for Error {
    fn from(e: StackError) -> Self {
        Error::StackOpen(e)
    }
}

impl From<ProfileError> for Error {
    fn from(e: ProfileError) -> Self {
        Error::ServiceRegistration(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_error_codes_are_small_and_negative() {
        let all = [
            ProfileError::InvalidParameter,
            ProfileError::InvalidInstance,
            ProfileError::InvalidStackId,
            ProfileError::InsufficientResources,
            ProfileError::IndicationOutstanding,
            ProfileError::NotInitialized,
            ProfileError::Stack(StackError::NoResources),
        ];
        for (i, e) in all.iter().enumerate() {
            assert_eq!(e.code(), -(i as i32) - 1);
        }
    }

    #[test]
    fn att_error_wire_codes() {
        assert_eq!(AttError::AttributeNotLong.code(), 0x0B);
        assert_eq!(AttError::InvalidAttributeValueLength.code(), 0x0D);
        assert_eq!(AttError::ProcedureAlreadyInProgress.code(), 0x80);
    }
}
