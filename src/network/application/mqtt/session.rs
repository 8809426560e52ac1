//! The MQTT session state machine.
//!
//! [`Session`] never touches the transport. It is told what was sent and
//! what arrived, and answers with the packet to send back and the event to
//! report. [`Client`](super::Client) owns one and does the I/O around it.

use heapless::{String, Vec};

use super::error::{DecodeError, Error};
use super::event::{ConnectReturnCode, DisconnectReason};
use super::exchange::{Direction, ExchangeState, ExchangeTable, PacketIds, PendingExchange};
use super::options::Options;
use super::packet::{self, Packet, QoS};

/// Maximum number of topic filters tracked at once.
pub const MAX_SUBSCRIPTIONS: usize = 8;

/// Longest topic or topic filter the session stores.
pub const MAX_TOPIC_LEN: usize = 256;

/// Lifecycle of the connection to the broker.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    /// No transport is open.
    Disconnected,
    /// CONNECT sent, waiting for CONNACK.
    Connecting,
    /// CONNACK accepted the session.
    Connected,
    /// DISCONNECT sent; the transport closes on the next reactor iteration.
    Disconnecting,
}

#[cfg(feature = "defmt")]
impl defmt::Format for State {
    fn format(&self, f: defmt::Formatter) {
        match self {
            State::Disconnected => defmt::write!(f, "Disconnected"),
            State::Connecting => defmt::write!(f, "Connecting"),
            State::Connected => defmt::write!(f, "Connected"),
            State::Disconnecting => defmt::write!(f, "Disconnecting"),
        }
    }
}

/// Broker verdict on a topic filter.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SubscriptionStatus {
    /// SUBSCRIBE sent, no SUBACK yet.
    Pending,
    /// Accepted with the given maximum QoS.
    Granted(QoS),
    /// SUBACK carried 0x80 for this filter.
    Rejected,
}

/// A topic filter the client asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// The filter as sent in SUBSCRIBE.
    pub filter: String<MAX_TOPIC_LEN>,
    /// Requested maximum QoS.
    pub qos: QoS,
    /// Id of the SUBSCRIBE that last carried this filter.
    pub packet_id: u16,
    /// Broker verdict.
    pub status: SubscriptionStatus,
    request_index: usize,
    unsubscribe_id: Option<u16>,
}

impl Subscription {
    /// Whether SUBACK granted this filter.
    pub fn is_granted(&self) -> bool {
        matches!(self.status, SubscriptionStatus::Granted(_))
    }
}

/// Acknowledgment-level outcome of a received packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum SessionEvent {
    Connected,
    ConnectFailed(ConnectReturnCode),
    PublishAcked(u16),
    SubscribeAcked(u16),
    UnsubscribeAcked(u16),
}

/// What the client must do after feeding the session one packet.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub(crate) struct Step {
    /// Packet to send back.
    pub reply: Option<Packet<'static>>,
    /// Event to report to the sink.
    pub event: Option<SessionEvent>,
    /// Hand the inbound PUBLISH to the sink.
    pub deliver: bool,
}

impl Step {
    fn reply(packet: Packet<'static>) -> Self {
        Self {
            reply: Some(packet),
            ..Self::default()
        }
    }

    fn event(event: SessionEvent) -> Self {
        Self {
            event: Some(event),
            ..Self::default()
        }
    }
}

/// Timer verdict from [`Session::tick`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum Tick {
    Idle,
    SendPing,
    Expired(DisconnectReason),
}

/// How an overdue outbound exchange is resent.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum Resend {
    /// Re-send the PUBLISH with DUP set.
    Publish(QoS),
    /// PUBREC already arrived; re-send PUBREL.
    PubRel,
}

/// Protocol state for one client connection.
#[derive(Debug)]
pub(crate) struct Session {
    state: State,
    exchanges: ExchangeTable,
    ids: PacketIds,
    subscriptions: Vec<Subscription, MAX_SUBSCRIPTIONS>,
    pending_subscribes: Vec<u16, MAX_SUBSCRIPTIONS>,
    pending_unsubscribes: Vec<u16, MAX_SUBSCRIPTIONS>,
    clean_session: bool,
    session_present: bool,
    keep_alive_ms: Option<u64>,
    connack_timeout_ms: u64,
    retry_interval_ms: u64,
    last_tx_ms: u64,
    connect_sent_ms: u64,
    ping_sent_ms: Option<u64>,
}

impl Session {
    pub fn new(options: &Options<'_>) -> Self {
        Self {
            state: State::Disconnected,
            exchanges: ExchangeTable::new(),
            ids: PacketIds::new(),
            subscriptions: Vec::new(),
            pending_subscribes: Vec::new(),
            pending_unsubscribes: Vec::new(),
            clean_session: options.clean_session,
            session_present: false,
            keep_alive_ms: options.keep_alive_ms(),
            connack_timeout_ms: u64::from(options.connack_timeout_ms),
            retry_interval_ms: u64::from(options.retry_interval_ms),
            last_tx_ms: 0,
            connect_sent_ms: 0,
            ping_sent_ms: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn session_present(&self) -> bool {
        self.session_present
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn exchanges(&self) -> &ExchangeTable {
        &self.exchanges
    }

    /// Fail unless the session is in `expected`.
    pub fn require(&self, expected: State) -> Result<(), Error> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::Precondition(self.state))
        }
    }

    /// CONNECT has been written to a fresh transport.
    pub fn connect_sent(&mut self, now_ms: u64) {
        self.state = State::Connecting;
        self.session_present = false;
        self.connect_sent_ms = now_ms;
        self.last_tx_ms = now_ms;
        self.ping_sent_ms = None;
    }

    /// DISCONNECT has been sent (or attempted).
    pub fn disconnect_requested(&mut self) {
        self.state = State::Disconnecting;
    }

    /// Any packet went out.
    pub fn packet_sent(&mut self, now_ms: u64) {
        self.last_tx_ms = now_ms;
    }

    /// PINGREQ went out.
    pub fn ping_sent(&mut self, now_ms: u64) {
        self.ping_sent_ms = Some(now_ms);
        self.last_tx_ms = now_ms;
    }

    /// Drop everything tied to the open connection.
    ///
    /// Pending exchanges and unacknowledged subscribes are abandoned without
    /// events. Granted subscriptions survive only for persistent sessions.
    pub fn teardown(&mut self) {
        self.state = State::Disconnected;
        if !self.exchanges.is_empty() {
            info!("abandoning {} pending exchanges", self.exchanges.len());
        }
        self.exchanges.clear();
        self.pending_subscribes.clear();
        self.pending_unsubscribes.clear();
        self.ping_sent_ms = None;
        let keep = !self.clean_session;
        self.subscriptions.retain(|s| keep && s.is_granted());
        for sub in self.subscriptions.iter_mut() {
            sub.unsubscribe_id = None;
        }
    }

    fn allocate_id(&mut self) -> Result<u16, Error> {
        let exchanges = &self.exchanges;
        let subscribes = &self.pending_subscribes;
        let unsubscribes = &self.pending_unsubscribes;
        self.ids
            .allocate(|id| {
                exchanges.contains(Direction::Outbound, id)
                    || subscribes.contains(&id)
                    || unsubscribes.contains(&id)
            })
            .ok_or(Error::InflightLimit)
    }

    /// Reserve an id for an outbound publish. `None` for QoS 0.
    pub fn publish_id(&mut self, qos: QoS) -> Result<Option<u16>, Error> {
        self.require(State::Connected)?;
        if qos == QoS::AtMostOnce {
            return Ok(None);
        }
        if self.exchanges.is_full() {
            return Err(Error::InflightLimit);
        }
        self.allocate_id().map(Some)
    }

    /// Start the exchange for an encoded QoS 1/2 publish.
    pub fn track_publish(&mut self, packet_id: u16, qos: QoS, now_ms: u64) -> Result<(), Error> {
        let deadline = now_ms.saturating_add(self.retry_interval_ms);
        self.exchanges
            .insert(PendingExchange::outbound(packet_id, qos, deadline))
    }

    /// Prepare to resend overdue exchange `packet_id`, pushing its deadline out.
    pub fn resend(&mut self, packet_id: u16, now_ms: u64) -> Result<Resend, Error> {
        self.require(State::Connected)?;
        let deadline = now_ms.saturating_add(self.retry_interval_ms);
        let exchange = self
            .exchanges
            .get_mut(Direction::Outbound, packet_id)
            .ok_or(Error::UnknownPacketId(packet_id))?;
        exchange.deadline_ms = deadline;
        Ok(match exchange.state {
            ExchangeState::AwaitingPubcomp => Resend::PubRel,
            _ => Resend::Publish(exchange.qos),
        })
    }

    /// Reserve an id for a SUBSCRIBE or UNSUBSCRIBE.
    pub fn request_id(&mut self) -> Result<u16, Error> {
        self.require(State::Connected)?;
        self.allocate_id()
    }

    /// Record the filters of a SUBSCRIBE about to be sent.
    pub fn track_subscribe(&mut self, packet_id: u16, topics: &[(&str, QoS)]) -> Result<(), Error> {
        if topics.is_empty() {
            return Err(Error::NoTopics);
        }
        if topics.iter().any(|(f, _)| f.len() > MAX_TOPIC_LEN) {
            return Err(Error::BufferTooSmall);
        }
        let added = topics
            .iter()
            .enumerate()
            .filter(|(i, (f, _))| {
                !self.subscriptions.iter().any(|s| s.filter.as_str() == *f)
                    && !topics[..*i].iter().any(|(g, _)| g == f)
            })
            .count();
        if self.subscriptions.len() + added > MAX_SUBSCRIPTIONS {
            return Err(Error::InflightLimit);
        }
        self.pending_subscribes
            .push(packet_id)
            .map_err(|_| Error::InflightLimit)?;

        for (index, (filter, qos)) in topics.iter().enumerate() {
            if let Some(sub) = self
                .subscriptions
                .iter_mut()
                .find(|s| s.filter.as_str() == *filter)
            {
                sub.qos = *qos;
                sub.packet_id = packet_id;
                sub.status = SubscriptionStatus::Pending;
                sub.request_index = index;
                sub.unsubscribe_id = None;
                continue;
            }
            let mut stored = String::new();
            stored.push_str(filter).map_err(|_| Error::BufferTooSmall)?;
            self.subscriptions
                .push(Subscription {
                    filter: stored,
                    qos: *qos,
                    packet_id,
                    status: SubscriptionStatus::Pending,
                    request_index: index,
                    unsubscribe_id: None,
                })
                .map_err(|_| Error::InflightLimit)?;
        }
        Ok(())
    }

    /// Record the filters of an UNSUBSCRIBE about to be sent.
    pub fn track_unsubscribe(&mut self, packet_id: u16, filters: &[&str]) -> Result<(), Error> {
        if filters.is_empty() {
            return Err(Error::NoTopics);
        }
        self.pending_unsubscribes
            .push(packet_id)
            .map_err(|_| Error::InflightLimit)?;
        for sub in self.subscriptions.iter_mut() {
            if filters.contains(&sub.filter.as_str()) {
                sub.unsubscribe_id = Some(packet_id);
            }
        }
        Ok(())
    }

    /// Evaluate the CONNACK and keep-alive timers.
    pub fn tick(&mut self, now_ms: u64) -> Tick {
        match self.state {
            State::Disconnected => Tick::Idle,
            State::Disconnecting => Tick::Expired(DisconnectReason::Requested),
            State::Connecting => {
                if now_ms.saturating_sub(self.connect_sent_ms) >= self.connack_timeout_ms {
                    Tick::Expired(DisconnectReason::ConnackTimeout)
                } else {
                    Tick::Idle
                }
            }
            State::Connected => {
                let Some(keep_alive) = self.keep_alive_ms else {
                    return Tick::Idle;
                };
                match self.ping_sent_ms {
                    Some(sent) if now_ms.saturating_sub(sent) >= keep_alive => {
                        Tick::Expired(DisconnectReason::KeepAliveTimeout)
                    }
                    Some(_) => Tick::Idle,
                    None if now_ms.saturating_sub(self.last_tx_ms) >= keep_alive => Tick::SendPing,
                    None => Tick::Idle,
                }
            }
        }
    }

    /// Feed one decoded packet.
    ///
    /// Only packets a broker may never send are errors; every other
    /// surprise is logged and ignored.
    pub fn on_packet(&mut self, packet: &Packet<'_>, now_ms: u64) -> Result<Step, Error> {
        match packet {
            Packet::ConnAck(connack) => Ok(self.on_connack(connack.session_present, connack.return_code)),
            Packet::Connect(_)
            | Packet::Subscribe(_)
            | Packet::Unsubscribe(_)
            | Packet::PingReq
            | Packet::Disconnect => Err(DecodeError::UnexpectedPacket(packet.packet_type()).into()),
            _ if self.state != State::Connected => {
                warn!(
                    "packet type {} while {:?}, ignored",
                    packet.packet_type(),
                    self.state
                );
                Ok(Step::default())
            }
            Packet::Publish(publish) => Ok(self.on_publish(publish.packet_id, publish.qos, now_ms)),
            Packet::PubAck(id) => Ok(self.on_puback(*id)),
            Packet::PubRec(id) => Ok(self.on_pubrec(*id, now_ms)),
            Packet::PubRel(id) => Ok(self.on_pubrel(*id)),
            Packet::PubComp(id) => Ok(self.on_pubcomp(*id)),
            Packet::SubAck(suback) => Ok(self.on_suback(suback.packet_id, suback.return_codes)),
            Packet::UnsubAck(id) => Ok(self.on_unsuback(*id)),
            Packet::PingResp => {
                debug!("PINGRESP");
                self.ping_sent_ms = None;
                Ok(Step::default())
            }
        }
    }

    fn on_connack(&mut self, session_present: bool, return_code: u8) -> Step {
        if self.state != State::Connecting {
            warn!("CONNACK while {:?}, ignored", self.state);
            return Step::default();
        }
        if return_code == 0 {
            info!("CONNACK accepted, session present: {}", session_present);
            self.state = State::Connected;
            self.session_present = session_present;
            Step::event(SessionEvent::Connected)
        } else {
            error!("CONNACK refused with code {}", return_code);
            self.teardown();
            Step::event(SessionEvent::ConnectFailed(ConnectReturnCode::from_code(
                return_code,
            )))
        }
    }

    /// Decide delivery and acknowledgment for an inbound PUBLISH.
    pub fn on_publish(&mut self, packet_id: Option<u16>, qos: QoS, now_ms: u64) -> Step {
        let id = match (qos, packet_id) {
            (QoS::AtMostOnce, _) | (_, None) => {
                return Step {
                    deliver: true,
                    ..Step::default()
                };
            }
            (_, Some(id)) => id,
        };

        if qos == QoS::AtLeastOnce {
            return Step {
                reply: Some(Packet::PubAck(id)),
                deliver: true,
                event: None,
            };
        }

        if self.exchanges.contains(Direction::Inbound, id) {
            debug!("duplicate QoS 2 PUBLISH {}, PUBREC resent", id);
            return Step::reply(Packet::PubRec(id));
        }
        let deadline = now_ms.saturating_add(self.retry_interval_ms);
        match self.exchanges.insert(PendingExchange::inbound(id, deadline)) {
            Ok(()) => Step {
                reply: Some(Packet::PubRec(id)),
                deliver: true,
                event: None,
            },
            Err(_) => {
                warn!("exchange table full, QoS 2 PUBLISH {} dropped", id);
                Step::default()
            }
        }
    }

    fn on_puback(&mut self, id: u16) -> Step {
        match self.exchanges.get(Direction::Outbound, id).map(|e| e.state) {
            Some(ExchangeState::AwaitingPuback) => {
                self.exchanges.remove(Direction::Outbound, id);
                Step::event(SessionEvent::PublishAcked(id))
            }
            _ => {
                warn!("unexpected PUBACK {}", id);
                Step::default()
            }
        }
    }

    fn on_pubrec(&mut self, id: u16, now_ms: u64) -> Step {
        let deadline = now_ms.saturating_add(self.retry_interval_ms);
        match self.exchanges.get_mut(Direction::Outbound, id) {
            Some(exchange) if exchange.state == ExchangeState::AwaitingPubrec => {
                exchange.state = ExchangeState::AwaitingPubcomp;
                exchange.deadline_ms = deadline;
                Step::reply(Packet::PubRel(id))
            }
            _ => {
                warn!("unexpected PUBREC {}", id);
                Step::default()
            }
        }
    }

    fn on_pubrel(&mut self, id: u16) -> Step {
        if self.exchanges.remove(Direction::Inbound, id).is_none() {
            warn!("PUBREL {} matches nothing, completing anyway", id);
        }
        Step::reply(Packet::PubComp(id))
    }

    fn on_pubcomp(&mut self, id: u16) -> Step {
        match self.exchanges.get(Direction::Outbound, id).map(|e| e.state) {
            Some(ExchangeState::AwaitingPubcomp) => {
                self.exchanges.remove(Direction::Outbound, id);
                Step::event(SessionEvent::PublishAcked(id))
            }
            _ => {
                warn!("unexpected PUBCOMP {}", id);
                Step::default()
            }
        }
    }

    fn on_suback(&mut self, id: u16, return_codes: &[u8]) -> Step {
        let Some(pos) = self.pending_subscribes.iter().position(|&p| p == id) else {
            warn!("unexpected SUBACK {}", id);
            return Step::default();
        };
        self.pending_subscribes.swap_remove(pos);

        // Filters re-requested by a later SUBSCRIBE wait for that SUBACK.
        for sub in self
            .subscriptions
            .iter_mut()
            .filter(|s| s.status == SubscriptionStatus::Pending && s.packet_id == id)
        {
            sub.status = match return_codes.get(sub.request_index) {
                Some(&packet::SUBACK_FAILURE) | None => SubscriptionStatus::Rejected,
                Some(&code) => match QoS::try_from(code) {
                    Ok(qos) => SubscriptionStatus::Granted(qos),
                    Err(_) => SubscriptionStatus::Rejected,
                },
            };
            if sub.status == SubscriptionStatus::Rejected {
                warn!("subscription to {} rejected", sub.filter.as_str());
            }
        }
        Step::event(SessionEvent::SubscribeAcked(id))
    }

    fn on_unsuback(&mut self, id: u16) -> Step {
        let Some(pos) = self.pending_unsubscribes.iter().position(|&p| p == id) else {
            warn!("unexpected UNSUBACK {}", id);
            return Step::default();
        };
        self.pending_unsubscribes.swap_remove(pos);
        self.subscriptions
            .retain(|s| s.unsubscribe_id != Some(id));
        Step::event(SessionEvent::UnsubscribeAcked(id))
    }
}
