use thiserror::Error;

use crate::core::client::ClientID;

/// Errors surfaced by a [`ClientReserver`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReserveError {
    /// The client already holds the maximum number of reservations.
    #[error("maximum client reservations exceeded")]
    RateLimited,

    /// A release was attempted for a reservation that was never acquired.
    /// This indicates a caller bug.
    #[error("no reservation exists")]
    NoReservation,

    /// An internal invariant was violated; counts were observed outside
    /// their legal range.
    #[error("reservation invariant failure")]
    InvariantFailure,
}

/// Limits "reservations" held by clients, as an abstraction of per-client
/// connection rate limiting.
///
/// Both operations are non-blocking and may be invoked concurrently from
/// any number of tasks; reservation counts for a single client are
/// linearizable.
pub trait ClientReserver: Send + Sync {
    /// Attempt to acquire a reservation for the given client.
    /// Fails with [`ReserveError::RateLimited`] iff the client is at its cap.
    fn try_reserve(&self, client: &ClientID) -> Result<(), ReserveError>;

    /// Release a reservation previously acquired by `try_reserve`.
    fn release(&self, client: &ClientID) -> Result<(), ReserveError>;
}
