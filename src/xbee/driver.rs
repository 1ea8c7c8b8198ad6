//! XBee module driver over a serial link in API mode.
//!
//! The driver implements [`Radio`] with local AT commands and ZigBee
//! transmit/receive frames. It is generic over the byte link and the two
//! control pins so the same code runs on the UART of the board and on an
//! in-memory link in tests.
//!
//! | Operation | Frame |
//! |-----------|-------|
//! | PAN ID, scan channels, scan duration, JV, NI, WR | AT `ID` `SC` `SD` `JV` `NI` `WR` |
//! | association indication | AT `AI` |
//! | extended / operating PAN, channel | AT `OP` `OI` `CH` |
//! | send | transmit request, waits for transmit status |
//! | receive | receive packet frames, queued LIFO |

use super::config::{INBOUND_QUEUE_CAPACITY, MAX_ENERGY_SCAN_DURATION};
use super::frame::{
    ApiFrame, FrameDecoder, FrameError, RX_OPTION_BROADCAST, UNKNOWN_NETWORK_ADDRESS,
};
use crate::hal::Radio;
use crate::status::{FailureReason, HardwareError, HwResult};
use crate::transport::{Address, Packet, TransmitMode};
use log::{debug, trace, warn};
use std::time::Duration;

/// Time to wait for a response byte before giving up on the module.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);

const BROADCAST_64: [u8; 8] = [0, 0, 0, 0, 0, 0, 0xFF, 0xFF];

/// Frames read while waiting for one response before giving up.
const MAX_FRAMES_PER_RESPONSE: usize = 16;

/// Byte link to the module.
pub trait SerialLink {
    /// Write every byte of `bytes`.
    fn write_all(&mut self, bytes: &[u8]) -> HwResult<()>;

    /// Read into `buf`, waiting at most `timeout` for the first byte.
    ///
    /// Returns the number of bytes read, 0 on timeout.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> HwResult<usize>;

    /// Whether unread bytes are waiting.
    fn bytes_available(&mut self) -> bool;
}

/// Supply and sleep-request lines of the module.
pub trait ModulePins {
    fn set_power(&mut self, on: bool) -> HwResult<()>;

    /// Drive the sleep request line (true asks the module to sleep).
    fn set_sleep_request(&mut self, asleep: bool) -> HwResult<()>;
}

/// XBee radio on a serial link.
pub struct XBeeRadio<S, P> {
    serial: S,
    pins: P,
    powered: bool,
    next_frame_id: u8,
    decoder: FrameDecoder,
    /// Receive frames seen while waiting for a command response.
    stashed: Vec<ApiFrame>,
    pending: Vec<Packet>,
    dropped: usize,
    local_address: Address,
}

impl<S: SerialLink, P: ModulePins> XBeeRadio<S, P> {
    pub fn new(serial: S, pins: P) -> Self {
        Self {
            serial,
            pins,
            powered: false,
            next_frame_id: 1,
            decoder: FrameDecoder::new(),
            stashed: Vec::new(),
            pending: Vec::with_capacity(INBOUND_QUEUE_CAPACITY),
            dropped: 0,
            local_address: Address::Short(UNKNOWN_NETWORK_ADDRESS),
        }
    }

    /// Address recorded as the destination of unicast packets received.
    pub fn with_local_address(mut self, address: Address) -> Self {
        self.local_address = address;
        self
    }

    /// Inbound packets dropped because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    fn take_frame_id(&mut self) -> u8 {
        let id = self.next_frame_id;
        // 0 asks the module not to answer.
        self.next_frame_id = self.next_frame_id.wrapping_add(1).max(1);
        id
    }

    fn pull_bytes(&mut self, timeout: Duration) -> HwResult<usize> {
        let mut buf = [0u8; 64];
        let n = self.serial.read(&mut buf, timeout)?;
        self.decoder.push(&buf[..n]);
        Ok(n)
    }

    /// Write `request` and wait for the frame answering it.
    fn exchange(&mut self, request: ApiFrame) -> HwResult<ApiFrame> {
        if !self.powered {
            return Err(HardwareError::NotExecuted);
        }
        let frame_id = request.frame_id();
        self.serial.write_all(&request.encode())?;

        for _ in 0..MAX_FRAMES_PER_RESPONSE {
            let frame = match self.decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    if self.pull_bytes(RESPONSE_TIMEOUT)? == 0 {
                        debug!("No response from module");
                        return Err(HardwareError::NotExecuted);
                    }
                    continue;
                }
                Err(e) => {
                    warn!("Dropping corrupt frame: {}", e);
                    continue;
                }
            };

            let answers = match (&frame, &request) {
                (ApiFrame::AtResponse { .. }, ApiFrame::AtCommand { .. })
                | (ApiFrame::TransmitStatus { .. }, ApiFrame::TransmitRequest { .. }) => {
                    frame.frame_id() == frame_id
                }
                _ => false,
            };
            if answers {
                return Ok(frame);
            }
            match frame {
                ApiFrame::ReceivePacket { .. } => self.stashed.push(frame),
                ApiFrame::ModemStatus(status) => debug!("Modem status 0x{:02X}", status),
                other => trace!("Ignoring frame 0x{:02X}", other.frame_type()),
            }
        }
        Err(HardwareError::NotExecuted)
    }

    fn at_command(&mut self, command: [u8; 2], parameter: &[u8]) -> HwResult<Vec<u8>> {
        let frame_id = self.take_frame_id();
        let response = self.exchange(ApiFrame::AtCommand {
            frame_id,
            command,
            parameter: parameter.to_vec(),
        })?;
        match response {
            ApiFrame::AtResponse { status: 0, data, .. } => Ok(data),
            ApiFrame::AtResponse { status, .. } => {
                debug!(
                    "AT {} rejected with status {}",
                    String::from_utf8_lossy(&command),
                    status
                );
                Err(HardwareError::failed(FailureReason::CommandStatus(status)))
            }
            _ => Err(HardwareError::failed(FailureReason::Malformed("AT response"))),
        }
    }

    fn at_query<const N: usize>(&mut self, command: [u8; 2]) -> HwResult<[u8; N]> {
        let data = self.at_command(command, &[])?;
        // Numeric registers drop leading zero bytes.
        if data.is_empty() || data.len() > N {
            return Err(HardwareError::failed(FailureReason::Malformed("AT response")));
        }
        let mut out = [0u8; N];
        out[N - data.len()..].copy_from_slice(&data);
        Ok(out)
    }

    fn queue_packet(&mut self, packet: Packet) {
        if self.pending.len() >= INBOUND_QUEUE_CAPACITY {
            self.dropped += 1;
            warn!(
                "Inbound queue full, dropping packet {} from {:?}",
                packet.packet_id, packet.origin
            );
            return;
        }
        self.pending.push(packet);
    }

    fn accept_receive(&mut self, frame: ApiFrame) -> HwResult<()> {
        let ApiFrame::ReceivePacket { options, data, .. } = frame else {
            return Ok(());
        };
        let destination = if options & RX_OPTION_BROADCAST != 0 {
            Address::BROADCAST
        } else {
            self.local_address
        };
        match Packet::decode_rf_data(&data, destination, 0) {
            Ok(mut packet) => {
                if destination == Address::BROADCAST {
                    packet.mode = TransmitMode::Broadcast;
                }
                self.queue_packet(packet);
                Ok(())
            }
            Err(e) => {
                warn!("Discarding undecodable packet: {}", e);
                Err(HardwareError::failed(FailureReason::Malformed("packet")))
            }
        }
    }
}

fn frame_failure(e: &FrameError) -> HardwareError {
    match e {
        FrameError::Checksum { .. } => HardwareError::failed(FailureReason::Checksum),
        _ => HardwareError::failed(FailureReason::Malformed("API frame")),
    }
}

impl<S: SerialLink, P: ModulePins> Radio for XBeeRadio<S, P> {
    fn set_pan(&mut self, pan: &[u8; 8]) -> HwResult<()> {
        self.at_command(*b"ID", pan).map(drop)
    }

    fn set_scanning_channels(&mut self, mask: u16) -> HwResult<()> {
        self.at_command(*b"SC", &mask.to_be_bytes()).map(drop)
    }

    fn set_energy_scan_duration(&mut self, exponent: u8) -> HwResult<()> {
        if exponent > MAX_ENERGY_SCAN_DURATION {
            return Err(HardwareError::failed(FailureReason::InvalidParameter(
                "energy scan duration",
            )));
        }
        self.at_command(*b"SD", &[exponent]).map(drop)
    }

    fn set_channel_verification(&mut self, enabled: bool) -> HwResult<()> {
        self.at_command(*b"JV", &[u8::from(enabled)]).map(drop)
    }

    fn set_node_identifier(&mut self, id: &str) -> HwResult<()> {
        self.at_command(*b"NI", id.as_bytes()).map(drop)
    }

    fn write_config(&mut self) -> HwResult<()> {
        self.at_command(*b"WR", &[]).map(drop)
    }

    fn power_on(&mut self) -> HwResult<()> {
        self.pins.set_power(true)?;
        self.powered = true;
        Ok(())
    }

    fn power_off(&mut self) -> HwResult<()> {
        self.pins.set_power(false)?;
        self.powered = false;
        self.decoder.clear();
        self.stashed.clear();
        self.pending.clear();
        Ok(())
    }

    fn wake(&mut self) -> HwResult<()> {
        if !self.powered {
            return Err(HardwareError::NotExecuted);
        }
        self.pins.set_sleep_request(false)
    }

    fn association_indication(&mut self) -> HwResult<u8> {
        self.at_query::<1>(*b"AI").map(|[ai]| ai)
    }

    fn extended_pan(&mut self) -> HwResult<[u8; 8]> {
        self.at_query::<8>(*b"OP")
    }

    fn operating_pan(&mut self) -> HwResult<u16> {
        self.at_query::<2>(*b"OI").map(u16::from_be_bytes)
    }

    fn channel(&mut self) -> HwResult<u8> {
        self.at_query::<1>(*b"CH").map(|[ch]| ch)
    }

    fn send(&mut self, packet: &Packet) -> HwResult<()> {
        let data = packet
            .encode_rf_data()
            .map_err(|_| HardwareError::failed(FailureReason::InvalidParameter("packet")))?;
        let (dest64, dest16) = match (packet.mode, packet.destination) {
            (TransmitMode::Broadcast, _) => (BROADCAST_64, UNKNOWN_NETWORK_ADDRESS),
            (TransmitMode::Unicast, Address::Long(b)) => (b, UNKNOWN_NETWORK_ADDRESS),
            (TransmitMode::Unicast, Address::Short(s)) => ([0xFF; 8], s),
        };
        let frame_id = self.take_frame_id();
        let status = self.exchange(ApiFrame::TransmitRequest {
            frame_id,
            dest64,
            dest16,
            radius: packet.hops,
            options: 0,
            data,
        })?;
        match status {
            ApiFrame::TransmitStatus {
                delivery_status: 0, ..
            } => Ok(()),
            ApiFrame::TransmitStatus {
                delivery_status, ..
            } => Err(HardwareError::failed(FailureReason::DeliveryStatus(
                delivery_status,
            ))),
            _ => Err(HardwareError::failed(FailureReason::Malformed(
                "transmit status",
            ))),
        }
    }

    fn frame_available(&mut self) -> bool {
        self.powered
            && (!self.stashed.is_empty()
                || self.decoder.buffered() > 0
                || self.serial.bytes_available())
    }

    fn reassemble_frames(&mut self) -> HwResult<()> {
        if !self.powered {
            return Err(HardwareError::NotExecuted);
        }
        while self.serial.bytes_available() {
            if self.pull_bytes(Duration::ZERO)? == 0 {
                break;
            }
        }

        let mut first_error = None;
        let stashed = std::mem::take(&mut self.stashed);
        for frame in stashed {
            if let Err(e) = self.accept_receive(frame) {
                first_error.get_or_insert(e);
            }
        }
        loop {
            match self.decoder.next_frame() {
                Ok(Some(frame @ ApiFrame::ReceivePacket { .. })) => {
                    if let Err(e) = self.accept_receive(frame) {
                        first_error.get_or_insert(e);
                    }
                }
                Ok(Some(ApiFrame::ModemStatus(status))) => {
                    debug!("Modem status 0x{:02X}", status)
                }
                Ok(Some(other)) => trace!("Ignoring frame 0x{:02X}", other.frame_type()),
                Ok(None) => break,
                Err(e) => {
                    warn!("Corrupt inbound frame: {}", e);
                    first_error.get_or_insert(frame_failure(&e));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn pending_packet_count(&self) -> usize {
        self.pending.len()
    }

    fn pop_packet(&mut self) -> Option<Packet> {
        self.pending.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Timer;
    use crate::transport::{DispatchTable, MessageTransport, Origin, TransportError};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    type Responder = Box<dyn FnMut(&ApiFrame) -> Vec<ApiFrame>>;

    /// In-memory module: answers every written frame through `responder`.
    struct FakeLink {
        responder: Responder,
        rx: VecDeque<u8>,
        /// Bytes still on the wire; moved into `rx` on the next read.
        late: Rc<RefCell<VecDeque<u8>>>,
        written: Rc<RefCell<Vec<ApiFrame>>>,
    }

    impl FakeLink {
        fn new(responder: impl FnMut(&ApiFrame) -> Vec<ApiFrame> + 'static) -> Self {
            Self {
                responder: Box::new(responder),
                rx: VecDeque::new(),
                late: Rc::new(RefCell::new(VecDeque::new())),
                written: Rc::new(RefCell::new(Vec::new())),
            }
        }

        /// Answers every AT command with status 0 and `data`.
        fn ok_with(data: Vec<u8>) -> Self {
            Self::new(move |f| match f {
                ApiFrame::AtCommand {
                    frame_id, command, ..
                } => vec![ApiFrame::AtResponse {
                    frame_id: *frame_id,
                    command: *command,
                    status: 0,
                    data: data.clone(),
                }],
                _ => vec![],
            })
        }

        fn inject(&mut self, frame: &ApiFrame) {
            self.rx.extend(frame.encode());
        }
    }

    impl SerialLink for FakeLink {
        fn write_all(&mut self, bytes: &[u8]) -> HwResult<()> {
            let mut decoder = FrameDecoder::new();
            decoder.push(bytes);
            while let Ok(Some(frame)) = decoder.next_frame() {
                for reply in (self.responder)(&frame) {
                    self.rx.extend(reply.encode());
                }
                self.written.borrow_mut().push(frame);
            }
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> HwResult<usize> {
            self.rx.extend(self.late.borrow_mut().drain(..));
            let n = buf.len().min(self.rx.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.rx.pop_front().unwrap();
            }
            Ok(n)
        }

        fn bytes_available(&mut self) -> bool {
            self.rx.extend(self.late.borrow_mut().drain(..));
            !self.rx.is_empty()
        }
    }

    /// Simulated time; `rest` reaches the link once `arrives_at_ms` passes.
    struct WireTimer {
        now_ms: u64,
        arrives_at_ms: u64,
        rest: Vec<u8>,
        late: Rc<RefCell<VecDeque<u8>>>,
    }

    impl Timer for WireTimer {
        fn now_ms(&self) -> u64 {
            self.now_ms
        }

        fn delay_ms(&mut self, ms: u64) {
            self.now_ms += ms;
            if self.now_ms >= self.arrives_at_ms {
                self.late.borrow_mut().extend(self.rest.drain(..));
            }
        }
    }

    fn counting_transport(id: u8) -> (MessageTransport, Rc<RefCell<u32>>) {
        let handled = Rc::new(RefCell::new(0u32));
        let sink = Rc::clone(&handled);
        let mut table = DispatchTable::new();
        table
            .register(id, move |_: &Packet| *sink.borrow_mut() += 1)
            .unwrap();
        (MessageTransport::new(Origin::My([0x12, 0x34]), table), handled)
    }

    #[derive(Default)]
    struct FakePins {
        events: Vec<(&'static str, bool)>,
    }

    impl ModulePins for FakePins {
        fn set_power(&mut self, on: bool) -> HwResult<()> {
            self.events.push(("power", on));
            Ok(())
        }

        fn set_sleep_request(&mut self, asleep: bool) -> HwResult<()> {
            self.events.push(("sleep", asleep));
            Ok(())
        }
    }

    fn powered(link: FakeLink) -> XBeeRadio<FakeLink, FakePins> {
        let mut radio = XBeeRadio::new(link, FakePins::default());
        radio.power_on().unwrap();
        radio
    }

    fn rx_frame(packet_id: u8, payload: &[u8]) -> ApiFrame {
        let packet = Packet::unicast(Origin::My([0x00, 0x01]), Address::BROADCAST, packet_id, payload)
            .unwrap();
        ApiFrame::ReceivePacket {
            source64: [0x00, 0x13, 0xA2, 0x00, 0x40, 0x69, 0x73, 0x7A],
            source16: [0x00, 0x01],
            options: 0x01,
            data: packet.encode_rf_data().unwrap(),
        }
    }

    #[test]
    fn test_commands_not_executed_when_unpowered() {
        let mut radio = XBeeRadio::new(FakeLink::ok_with(vec![]), FakePins::default());
        assert_eq!(radio.write_config(), Err(HardwareError::NotExecuted));
        assert_eq!(radio.association_indication(), Err(HardwareError::NotExecuted));
        assert!(radio.serial().written.borrow().is_empty());
    }

    #[test]
    fn test_set_pan_sends_id_command() {
        let mut radio = powered(FakeLink::ok_with(vec![]));
        radio.set_pan(&[0, 0, 0, 0, 0, 0, 0x13, 0x02]).unwrap();
        let written = radio.serial().written.borrow();
        assert_eq!(
            written[0],
            ApiFrame::AtCommand {
                frame_id: 1,
                command: *b"ID",
                parameter: vec![0, 0, 0, 0, 0, 0, 0x13, 0x02],
            }
        );
    }

    #[test]
    fn test_rejected_command_reports_status() {
        let link = FakeLink::new(|f| match f {
            ApiFrame::AtCommand {
                frame_id, command, ..
            } => vec![ApiFrame::AtResponse {
                frame_id: *frame_id,
                command: *command,
                status: 0x03,
                data: vec![],
            }],
            _ => vec![],
        });
        let mut radio = powered(link);
        assert_eq!(
            radio.set_scanning_channels(0x3FFF),
            Err(HardwareError::failed(FailureReason::CommandStatus(0x03)))
        );
    }

    #[test]
    fn test_silent_module_is_not_executed() {
        let mut radio = powered(FakeLink::new(|_| vec![]));
        assert_eq!(radio.channel(), Err(HardwareError::NotExecuted));
    }

    #[test]
    fn test_energy_scan_duration_checked_locally() {
        let mut radio = powered(FakeLink::ok_with(vec![]));
        assert!(matches!(
            radio.set_energy_scan_duration(MAX_ENERGY_SCAN_DURATION + 1),
            Err(HardwareError::Failed(FailureReason::InvalidParameter(_)))
        ));
        assert!(radio.serial().written.borrow().is_empty());
    }

    #[test]
    fn test_queries_pad_short_registers() {
        let mut radio = powered(FakeLink::ok_with(vec![0x13, 0x02]));
        assert_eq!(radio.operating_pan(), Ok(0x1302));
        assert_eq!(radio.extended_pan(), Ok([0, 0, 0, 0, 0, 0, 0x13, 0x02]));
        assert!(matches!(
            radio.channel(),
            Err(HardwareError::Failed(FailureReason::Malformed(_)))
        ));
    }

    #[test]
    fn test_send_maps_delivery_status() {
        let link = FakeLink::new(|f| match f {
            ApiFrame::TransmitRequest { frame_id, .. } => vec![
                ApiFrame::ModemStatus(0x02),
                ApiFrame::TransmitStatus {
                    frame_id: *frame_id,
                    dest16: [0x00, 0x00],
                    retries: 0,
                    delivery_status: 0x24,
                    discovery_status: 0,
                },
            ],
            _ => vec![],
        });
        let mut radio = powered(link);
        let packet = Packet::unicast(
            Origin::My([0x12, 0x34]),
            Address::Long([0x00, 0x13, 0xA2, 0x00, 0x40, 0x69, 0x73, 0x7A]),
            2,
            b"21.5",
        )
        .unwrap();
        assert_eq!(
            radio.send(&packet),
            Err(HardwareError::failed(FailureReason::DeliveryStatus(0x24)))
        );

        let written = radio.serial().written.borrow();
        let ApiFrame::TransmitRequest {
            dest64,
            dest16,
            radius,
            ..
        } = &written[0]
        else {
            panic!("expected transmit request");
        };
        assert_eq!(dest64, &[0x00, 0x13, 0xA2, 0x00, 0x40, 0x69, 0x73, 0x7A]);
        assert_eq!(dest16, &UNKNOWN_NETWORK_ADDRESS);
        assert_eq!(*radius, 0);
    }

    #[test]
    fn test_receive_queue_is_lifo_and_bounded() {
        let mut link = FakeLink::ok_with(vec![]);
        for i in 0..(INBOUND_QUEUE_CAPACITY as u8 + 2) {
            link.inject(&rx_frame(i, &[i]));
        }
        let mut radio = powered(link);

        assert!(radio.frame_available());
        radio.reassemble_frames().unwrap();
        assert_eq!(radio.pending_packet_count(), INBOUND_QUEUE_CAPACITY);
        assert_eq!(radio.dropped(), 2);
        let newest = radio.pop_packet().unwrap();
        assert_eq!(newest.packet_id, INBOUND_QUEUE_CAPACITY as u8 - 1);
    }

    #[test]
    fn test_receive_during_command_is_kept() {
        let link = FakeLink::new(|f| match f {
            ApiFrame::AtCommand {
                frame_id, command, ..
            } => vec![
                rx_frame(7, b"X"),
                ApiFrame::AtResponse {
                    frame_id: *frame_id,
                    command: *command,
                    status: 0,
                    data: vec![0x00],
                },
            ],
            _ => vec![],
        });
        let mut radio = powered(link);
        assert_eq!(radio.association_indication(), Ok(0x00));
        assert!(radio.frame_available());
        radio.reassemble_frames().unwrap();
        let packet = radio.pop_packet().unwrap();
        assert_eq!(packet.packet_id, 7);
        assert_eq!(packet.payload, b"X".to_vec());
    }

    #[test]
    fn test_corrupt_inbound_frame_reported() {
        let mut link = FakeLink::ok_with(vec![]);
        let mut wire = rx_frame(7, b"X").encode();
        let last = wire.len() - 1;
        wire[last] = wire[last].wrapping_add(1);
        link.rx.extend(wire);
        let mut radio = powered(link);
        assert_eq!(
            radio.reassemble_frames(),
            Err(HardwareError::failed(FailureReason::Checksum))
        );
        assert_eq!(radio.pending_packet_count(), 0);
    }

    #[test]
    fn test_power_off_clears_inbound_state() {
        let mut link = FakeLink::ok_with(vec![]);
        link.inject(&rx_frame(7, b"X"));
        let mut radio = powered(link);
        radio.reassemble_frames().unwrap();
        radio.power_off().unwrap();
        assert_eq!(radio.pending_packet_count(), 0);
        assert!(!radio.frame_available());
        assert_eq!(radio.wake(), Err(HardwareError::NotExecuted));
        assert_eq!(
            radio.pins().events,
            vec![("power", true), ("power", false)]
        );
    }

    #[test]
    fn test_receive_waits_for_frame_arriving_in_two_chunks() {
        let wire = rx_frame(7, b"X").encode();
        let mut link = FakeLink::ok_with(vec![]);
        link.rx.extend(wire[..3].iter().copied());
        let late = Rc::clone(&link.late);
        let mut radio = powered(link);
        let (mut transport, handled) = counting_transport(7);
        let mut timer = WireTimer {
            now_ms: 0,
            arrives_at_ms: 200,
            rest: wire[3..].to_vec(),
            late,
        };

        let summary = transport
            .receive(&mut radio, &mut timer, Duration::from_secs(20))
            .unwrap();

        assert_eq!(summary.handled, 1);
        assert_eq!(*handled.borrow(), 1);
        assert!(timer.now_ms >= 200);
        assert!(timer.now_ms < 20_000);
    }

    #[test]
    fn test_receive_with_partial_frame_times_out() {
        let wire = rx_frame(7, b"X").encode();
        let mut link = FakeLink::ok_with(vec![]);
        link.rx.extend(wire[..3].iter().copied());
        let late = Rc::clone(&link.late);
        let mut radio = powered(link);
        let (mut transport, handled) = counting_transport(7);
        let mut timer = WireTimer {
            now_ms: 0,
            arrives_at_ms: u64::MAX,
            rest: Vec::new(),
            late,
        };

        let result = transport.receive(&mut radio, &mut timer, Duration::from_secs(2));

        assert_eq!(result, Err(TransportError::TimedOut));
        assert!(timer.now_ms >= 2_000);
        assert_eq!(*handled.borrow(), 0);
    }
}
