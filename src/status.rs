//! Status codes returned by the native interface, and the [`ReadResult`] wrapper.

use fmi_sys::fmi2 as binding;

use crate::Error;

/// Normalized `fmi2Status`.
///
/// Every native return code goes through [`Status::from_raw`]; codes outside the FMI 2.0 range are
/// kept as [`Status::Unknown`] instead of being coerced to a known value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// All well
    OK,
    /// Things are not quite right, but the computation can continue.
    Warning,
    /// The FMU rejected the current call (for example the step was too large). The caller may
    /// retry with adjusted arguments.
    Discard,
    /// The instance can no longer be trusted. It must still be terminated and freed.
    Error,
    /// The model computations are irreparably corrupted. No further native call is allowed on
    /// the instance, not even `fmi2FreeInstance`.
    Fatal,
    /// Only returned by the co-simulation interface when `fmi2DoStep` runs asynchronously. The
    /// caller has to poll [`crate::component::Component::do_step_status`].
    Pending,
    /// A status code outside the range defined by FMI 2.0.
    Unknown(u32),
}

impl Status {
    /// The single normalization routine for raw `fmi2Status` values.
    pub fn from_raw(raw: binding::fmi2Status) -> Self {
        match raw {
            binding::fmi2Status_fmi2OK => Status::OK,
            binding::fmi2Status_fmi2Warning => Status::Warning,
            binding::fmi2Status_fmi2Discard => Status::Discard,
            binding::fmi2Status_fmi2Error => Status::Error,
            binding::fmi2Status_fmi2Fatal => Status::Fatal,
            binding::fmi2Status_fmi2Pending => Status::Pending,
            code => Status::Unknown(code),
        }
    }

    pub fn to_raw(self) -> binding::fmi2Status {
        match self {
            Status::OK => binding::fmi2Status_fmi2OK,
            Status::Warning => binding::fmi2Status_fmi2Warning,
            Status::Discard => binding::fmi2Status_fmi2Discard,
            Status::Error => binding::fmi2Status_fmi2Error,
            Status::Fatal => binding::fmi2Status_fmi2Fatal,
            Status::Pending => binding::fmi2Status_fmi2Pending,
            Status::Unknown(code) => code,
        }
    }

    /// Rank used by the worst-of rule: `OK < Warning < Pending < Discard < Error < Fatal`.
    /// Unknown codes rank with `Error`.
    pub fn severity(self) -> u8 {
        match self {
            Status::OK => 0,
            Status::Warning => 1,
            Status::Pending => 2,
            Status::Discard => 3,
            Status::Error | Status::Unknown(_) => 4,
            Status::Fatal => 5,
        }
    }

    /// The more severe of `self` and `other`. On a tie `self` is kept.
    #[must_use]
    pub fn worst(self, other: Status) -> Status {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Worst status of a composed operation. An empty sequence is `OK`.
    pub fn worst_of(statuses: impl IntoIterator<Item = Status>) -> Status {
        statuses.into_iter().fold(Status::OK, Status::worst)
    }

    /// `OK` or `Warning`.
    #[inline]
    pub fn is_success(self) -> bool {
        matches!(self, Status::OK | Status::Warning)
    }

    /// `Error`, `Fatal` or an unknown code: the instance is no longer usable for simulation.
    #[inline]
    pub fn is_error(self) -> bool {
        matches!(self, Status::Error | Status::Fatal | Status::Unknown(_))
    }

    /// Convert into a `Result`, passing `OK`, `Warning` and `Pending` through and turning every
    /// other status into [`Error::Status`].
    pub fn ok(self) -> Result<Status, Error> {
        match self {
            Status::OK | Status::Warning | Status::Pending => Ok(self),
            _ => Err(Error::Status(self)),
        }
    }
}

impl From<binding::fmi2Status> for Status {
    fn from(raw: binding::fmi2Status) -> Self {
        Status::from_raw(raw)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::OK => f.write_str("OK"),
            Status::Warning => f.write_str("Warning"),
            Status::Discard => f.write_str("Discard"),
            Status::Error => f.write_str("Error"),
            Status::Fatal => f.write_str("Fatal"),
            Status::Pending => f.write_str("Pending"),
            Status::Unknown(code) => write!(f, "Unknown({code})"),
        }
    }
}

/// A value read from the native side, paired with the status of the call that produced it.
///
/// The value is only present when the status is a success (`OK` or `Warning`).
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult<T> {
    pub status: Status,
    value: Option<T>,
}

impl<T> ReadResult<T> {
    /// Pair `value` with `status`, dropping the value unless the status is a success.
    pub fn new(status: Status, value: T) -> Self {
        Self {
            status,
            value: status.is_success().then_some(value),
        }
    }

    pub fn failed(status: Status) -> Self {
        Self {
            status,
            value: None,
        }
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn is_success(&self) -> bool {
        self.value.is_some()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ReadResult<U> {
        ReadResult {
            status: self.status,
            value: self.value.map(f),
        }
    }

    /// The value, or [`Error::Status`] carrying the failing status.
    pub fn ok(self) -> Result<T, Error> {
        self.value.ok_or(Error::Status(self.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(Status::from_raw(binding::fmi2Status_fmi2OK), Status::OK);
        assert_eq!(
            Status::from_raw(binding::fmi2Status_fmi2Pending),
            Status::Pending
        );
        assert_eq!(Status::from_raw(17), Status::Unknown(17));
        assert_eq!(Status::Unknown(17).to_raw(), 17);
        assert_eq!(Status::Discard.to_string(), "Discard");
    }

    #[test]
    fn test_worst_of() {
        assert_eq!(Status::worst_of([]), Status::OK);
        assert_eq!(
            Status::worst_of([Status::OK, Status::Discard, Status::Warning]),
            Status::Discard
        );
        assert_eq!(
            Status::worst_of([Status::Error, Status::Fatal, Status::OK]),
            Status::Fatal
        );
        assert_eq!(Status::Error.worst(Status::Unknown(9)), Status::Error);
        assert_eq!(Status::Warning.worst(Status::Pending), Status::Pending);
    }

    #[test]
    fn test_read_result() {
        let ok = ReadResult::new(Status::Warning, 2.5);
        assert_eq!(ok.value(), Some(&2.5));

        let discarded = ReadResult::new(Status::Discard, 2.5);
        assert!(discarded.value().is_none());
        assert!(matches!(
            discarded.ok(),
            Err(Error::Status(Status::Discard))
        ));

        let mapped = ReadResult::new(Status::OK, 2).map(|v| v * 2);
        assert_eq!(mapped.into_value(), Some(4));
    }

    #[test]
    fn test_status_ok() {
        assert!(Status::Pending.ok().is_ok());
        assert!(matches!(Status::Fatal.ok(), Err(Error::Status(Status::Fatal))));
    }
}
