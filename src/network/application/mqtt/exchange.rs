//! Bookkeeping for in-flight QoS 1 and QoS 2 exchanges.
//!
//! Outbound and inbound exchanges live in separate id spaces: the broker
//! picks ids for what it sends us, we pick ids for what we send it. Both are
//! keyed here by `(Direction, packet_id)` so one fixed-capacity map covers
//! the two.

use heapless::FnvIndexMap;

use super::error::Error;
use super::packet::QoS;

/// Maximum number of exchanges tracked at once, both directions combined.
pub const MAX_INFLIGHT: usize = 16;

/// Who originated the PUBLISH an exchange belongs to.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Direction {
    /// We published.
    Outbound,
    /// The broker published to us.
    Inbound,
}

/// The acknowledgment an exchange is waiting on.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ExchangeState {
    /// Outbound QoS 1, waiting for PUBACK.
    AwaitingPuback,
    /// Outbound QoS 2, waiting for PUBREC.
    AwaitingPubrec,
    /// Inbound QoS 2, PUBREC sent, waiting for PUBREL.
    AwaitingPubrel,
    /// Outbound QoS 2, PUBREL sent, waiting for PUBCOMP.
    AwaitingPubcomp,
}

/// One unfinished QoS 1/2 exchange.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct PendingExchange {
    /// Packet identifier, unique per direction while pending.
    pub packet_id: u16,
    /// QoS of the originating PUBLISH.
    pub qos: QoS,
    /// Who sent the PUBLISH.
    pub direction: Direction,
    /// Next expected acknowledgment.
    pub state: ExchangeState,
    /// Clock reading after which the exchange counts as overdue.
    pub deadline_ms: u64,
}

impl PendingExchange {
    /// A freshly sent outbound publish.
    pub fn outbound(packet_id: u16, qos: QoS, deadline_ms: u64) -> Self {
        let state = match qos {
            QoS::ExactlyOnce => ExchangeState::AwaitingPubrec,
            _ => ExchangeState::AwaitingPuback,
        };
        Self {
            packet_id,
            qos,
            direction: Direction::Outbound,
            state,
            deadline_ms,
        }
    }

    /// An inbound QoS 2 publish for which PUBREC has been sent.
    pub fn inbound(packet_id: u16, deadline_ms: u64) -> Self {
        Self {
            packet_id,
            qos: QoS::ExactlyOnce,
            direction: Direction::Inbound,
            state: ExchangeState::AwaitingPubrel,
            deadline_ms,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ExchangeState {
    fn format(&self, f: defmt::Formatter) {
        match self {
            ExchangeState::AwaitingPuback => defmt::write!(f, "AwaitingPuback"),
            ExchangeState::AwaitingPubrec => defmt::write!(f, "AwaitingPubrec"),
            ExchangeState::AwaitingPubrel => defmt::write!(f, "AwaitingPubrel"),
            ExchangeState::AwaitingPubcomp => defmt::write!(f, "AwaitingPubcomp"),
        }
    }
}

/// Fixed-capacity table of pending exchanges.
#[derive(Debug, Default)]
pub struct ExchangeTable {
    map: FnvIndexMap<(Direction, u16), PendingExchange, MAX_INFLIGHT>,
}

impl ExchangeTable {
    /// An empty table.
    pub fn new() -> Self {
        Self {
            map: FnvIndexMap::new(),
        }
    }

    /// Start tracking `exchange`.
    ///
    /// Fails with [`Error::InflightLimit`] when the table is full and with
    /// [`Error::ProtocolAnomaly`] when the id is already pending in that
    /// direction.
    pub fn insert(&mut self, exchange: PendingExchange) -> Result<(), Error> {
        let key = (exchange.direction, exchange.packet_id);
        if self.map.contains_key(&key) {
            return Err(Error::ProtocolAnomaly(exchange.packet_id));
        }
        self.map
            .insert(key, exchange)
            .map(|_| ())
            .map_err(|_| Error::InflightLimit)
    }

    /// Look up a pending exchange.
    pub fn get(&self, direction: Direction, packet_id: u16) -> Option<&PendingExchange> {
        self.map.get(&(direction, packet_id))
    }

    /// Look up a pending exchange for update.
    pub fn get_mut(&mut self, direction: Direction, packet_id: u16) -> Option<&mut PendingExchange> {
        self.map.get_mut(&(direction, packet_id))
    }

    /// Stop tracking an exchange, returning it if it was pending.
    pub fn remove(&mut self, direction: Direction, packet_id: u16) -> Option<PendingExchange> {
        self.map.remove(&(direction, packet_id))
    }

    /// Whether `packet_id` is pending in `direction`.
    pub fn contains(&self, direction: Direction, packet_id: u16) -> bool {
        self.map.contains_key(&(direction, packet_id))
    }

    /// Whether no more exchanges can be added.
    pub fn is_full(&self) -> bool {
        self.map.len() >= MAX_INFLIGHT
    }

    /// Number of pending exchanges.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Abandon every exchange.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// All pending exchanges in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &PendingExchange> {
        self.map.values()
    }

    /// Outbound exchanges whose deadline has passed at `now_ms`.
    pub fn overdue(&self, now_ms: u64) -> impl Iterator<Item = &PendingExchange> {
        self.map
            .values()
            .filter(move |e| e.direction == Direction::Outbound && e.deadline_ms <= now_ms)
    }
}

/// Sequential packet identifier allocator.
///
/// Hands out 1, 2, 3, ... wrapping back to 1 after 65535 and skipping 0 and
/// any id the caller reports as still in use.
#[derive(Debug, Clone)]
pub struct PacketIds {
    next: u16,
}

impl Default for PacketIds {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketIds {
    /// Start at 1.
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Next id for which `in_use` is false, or `None` if all 65535 are taken.
    pub fn allocate(&mut self, in_use: impl Fn(u16) -> bool) -> Option<u16> {
        for _ in 0..u16::MAX {
            let id = self.next;
            self.next = id.checked_add(1).unwrap_or(1);
            if !in_use(id) {
                return Some(id);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_initial_state() {
        assert_eq!(
            PendingExchange::outbound(1, QoS::AtLeastOnce, 0).state,
            ExchangeState::AwaitingPuback
        );
        assert_eq!(
            PendingExchange::outbound(1, QoS::ExactlyOnce, 0).state,
            ExchangeState::AwaitingPubrec
        );
    }

    #[test]
    fn test_directions_are_separate_id_spaces() {
        let mut table = ExchangeTable::new();
        table.insert(PendingExchange::outbound(5, QoS::ExactlyOnce, 0)).unwrap();
        table.insert(PendingExchange::inbound(5, 0)).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get(Direction::Inbound, 5).map(|e| e.state),
            Some(ExchangeState::AwaitingPubrel)
        );
        assert_eq!(
            table.get(Direction::Outbound, 5).map(|e| e.state),
            Some(ExchangeState::AwaitingPubrec)
        );
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut table = ExchangeTable::new();
        table.insert(PendingExchange::inbound(9, 0)).unwrap();
        assert_eq!(
            table.insert(PendingExchange::inbound(9, 0)),
            Err(Error::ProtocolAnomaly(9))
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_full_table() {
        let mut table = ExchangeTable::new();
        for id in 1..=MAX_INFLIGHT as u16 {
            table.insert(PendingExchange::outbound(id, QoS::AtLeastOnce, 0)).unwrap();
        }
        assert!(table.is_full());
        assert_eq!(
            table.insert(PendingExchange::outbound(100, QoS::AtLeastOnce, 0)),
            Err(Error::InflightLimit)
        );

        table.remove(Direction::Outbound, 3).unwrap();
        assert!(!table.is_full());
        assert!(!table.contains(Direction::Outbound, 3));
    }

    #[test]
    fn test_overdue_only_outbound() {
        let mut table = ExchangeTable::new();
        table.insert(PendingExchange::outbound(1, QoS::AtLeastOnce, 100)).unwrap();
        table.insert(PendingExchange::outbound(2, QoS::ExactlyOnce, 300)).unwrap();
        table.insert(PendingExchange::inbound(3, 50)).unwrap();

        let ids: heapless::Vec<u16, 4> = table.overdue(200).map(|e| e.packet_id).collect();
        assert_eq!(&ids[..], &[1]);

        let ids: heapless::Vec<u16, 4> = table.overdue(300).map(|e| e.packet_id).collect();
        assert_eq!(&ids[..], &[1, 2]);
    }

    #[test]
    fn test_packet_ids_sequential() {
        let mut ids = PacketIds::new();
        assert_eq!(ids.allocate(|_| false), Some(1));
        assert_eq!(ids.allocate(|_| false), Some(2));
        assert_eq!(ids.allocate(|id| id == 3 || id == 4), Some(5));
    }

    #[test]
    fn test_packet_ids_wrap_skips_zero() {
        let mut ids = PacketIds { next: u16::MAX };
        assert_eq!(ids.allocate(|_| false), Some(u16::MAX));
        assert_eq!(ids.allocate(|_| false), Some(1));
    }

    #[test]
    fn test_packet_ids_exhausted() {
        let mut ids = PacketIds::new();
        assert_eq!(ids.allocate(|_| true), None);
    }
}
