//! Per-client connection reservations.
//!
//! A reservation is a transient token granting the right to occupy one
//! concurrent connection slot. The bounded reserver caps reservations
//! uniformly across all clients; entries are removed as soon as a client's
//! count returns to zero so that memory stays bounded under client churn.

use scc::{hash_map::Entry, HashMap};

use crate::{
    core::client::ClientID,
    ports::reserver::{ClientReserver, ReserveError},
};

/// A reserver that never limits anything. Used when the per-client
/// connection cap is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnboundedClientReserver;

impl ClientReserver for UnboundedClientReserver {
    fn try_reserve(&self, _client: &ClientID) -> Result<(), ReserveError> {
        Ok(())
    }

    fn release(&self, _client: &ClientID) -> Result<(), ReserveError> {
        Ok(())
    }
}

/// A reserver that applies a uniform cap on the number of reservations any
/// single client may hold at once.
///
/// Counts live in a sharded concurrent map; each operation takes an
/// exclusive entry for its client, so reservation counts per client are
/// linearizable without a map-wide lock.
pub struct BoundedClientReserver {
    max_per_client: i64,
    reservations: HashMap<ClientID, i64>,
}

impl BoundedClientReserver {
    /// Create a reserver allowing at most `max_per_client` concurrent
    /// reservations per client. `max_per_client` must be at least 1.
    pub fn new(max_per_client: i64) -> Self {
        debug_assert!(max_per_client >= 1);
        Self {
            max_per_client,
            reservations: HashMap::new(),
        }
    }

    /// Number of clients currently holding at least one reservation.
    pub fn active_clients(&self) -> usize {
        self.reservations.len()
    }
}

impl ClientReserver for BoundedClientReserver {
    fn try_reserve(&self, client: &ClientID) -> Result<(), ReserveError> {
        match self.reservations.entry(client.clone()) {
            Entry::Occupied(mut entry) => {
                let count = *entry.get();
                if count < 1 || count > self.max_per_client {
                    return Err(ReserveError::InvariantFailure);
                }
                if count == self.max_per_client {
                    return Err(ReserveError::RateLimited);
                }
                *entry.get_mut() = count + 1;
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert_entry(1);
                Ok(())
            }
        }
    }

    fn release(&self, client: &ClientID) -> Result<(), ReserveError> {
        match self.reservations.entry(client.clone()) {
            // An absent entry means a count of zero: the caller is
            // releasing a reservation it never acquired.
            Entry::Vacant(_) => Err(ReserveError::NoReservation),
            Entry::Occupied(mut entry) => {
                let count = *entry.get();
                if count < 1 || count > self.max_per_client {
                    return Err(ReserveError::InvariantFailure);
                }
                if count == 1 {
                    entry.remove();
                } else {
                    *entry.get_mut() = count - 1;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn alice() -> ClientID {
        ClientID::from_common_name("alice")
    }

    fn bob() -> ClientID {
        ClientID::from_common_name("bob")
    }

    #[test]
    fn test_release_of_fictitious_reservation_fails() {
        let reserver = BoundedClientReserver::new(1);
        assert_eq!(
            reserver.release(&alice()),
            Err(ReserveError::NoReservation)
        );
    }

    #[test]
    fn test_entries_are_removed_when_count_reaches_zero() {
        // Without removal, a large population of clients that each briefly
        // connect would grow the table without bound.
        let reserver = BoundedClientReserver::new(1);
        reserver.try_reserve(&alice()).unwrap();
        reserver.release(&alice()).unwrap();
        assert_eq!(reserver.active_clients(), 0);
    }

    #[test]
    fn test_single_sequential_client() {
        let reserver = BoundedClientReserver::new(3);
        let c = alice();

        reserver.try_reserve(&c).unwrap();
        reserver.try_reserve(&c).unwrap();
        reserver.try_reserve(&c).unwrap();
        assert_eq!(reserver.try_reserve(&c), Err(ReserveError::RateLimited));

        reserver.release(&c).unwrap();
        reserver.try_reserve(&c).unwrap();

        reserver.release(&c).unwrap();
        reserver.release(&c).unwrap();
        reserver.release(&c).unwrap();
        assert_eq!(reserver.active_clients(), 0);
    }

    #[test]
    fn test_clients_are_limited_independently() {
        let reserver = BoundedClientReserver::new(2);

        reserver.try_reserve(&bob()).unwrap();
        reserver.try_reserve(&bob()).unwrap();
        assert_eq!(reserver.try_reserve(&bob()), Err(ReserveError::RateLimited));

        // Bob being at his cap does not affect Alice.
        reserver.try_reserve(&alice()).unwrap();
        reserver.try_reserve(&alice()).unwrap();

        reserver.release(&bob()).unwrap();
        reserver.try_reserve(&bob()).unwrap();
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_cap() {
        let max = 4i64;
        let reserver = Arc::new(BoundedClientReserver::new(max));
        let c = alice();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let reserver = reserver.clone();
            let c = c.clone();
            handles.push(std::thread::spawn(move || {
                let mut held = 0u32;
                for _ in 0..1000 {
                    if reserver.try_reserve(&c).is_ok() {
                        held += 1;
                    }
                    if held > 0 {
                        reserver.release(&c).unwrap();
                        held -= 1;
                    }
                }
                while held > 0 {
                    reserver.release(&c).unwrap();
                    held -= 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        // Every reservation was paired with a release, so the table must
        // be empty again.
        assert_eq!(reserver.active_clients(), 0);
    }

    #[test]
    fn test_unbounded_reserver_never_limits() {
        let reserver = UnboundedClientReserver;
        for _ in 0..100 {
            reserver.try_reserve(&alice()).unwrap();
        }
        reserver.release(&alice()).unwrap();
        reserver.release(&bob()).unwrap();
    }
}
