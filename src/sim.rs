//! In-memory stand-in for a board running gadget-zero, for unit tests.
//!
//! Behaves like the firmware as seen through libusb: configurations 2
//! (source/sink) and 3, one bulk pair on interface 0, the set-pattern vendor
//! request and STALLs for anything it does not understand.
//!
//! The source is double buffered: one packet sits in the endpoint buffer
//! and the next is already generated behind it. Selecting a different
//! pattern restarts the stream counter, and re-selecting the current one
//! changes nothing. Both queued packets predate a switch, so it takes two
//! select-and-drain rounds before reads start at stream offset zero.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use rusb::TransferType;

use crate::bus::Bus;
use crate::descriptor::{ConfigLayout, EndpointInfo, InterfaceLayout};
use crate::device::{REQUEST_GET_CONFIGURATION, REQUEST_SET_CONFIGURATION};
use crate::pattern::Pattern;
use crate::source_sink::REQUEST_SET_PATTERN;

const EP_OUT: u8 = 0x01;
const EP_IN: u8 = 0x81;
const MAX_PACKET: usize = 64;
const CONFIGS: [u8; 2] = [2, 3];
/// Packets generated ahead of the host: endpoint buffer plus one staged.
const SOURCE_DEPTH: usize = 2;

#[derive(Debug)]
struct State {
    configuration: u8,
    claimed: Option<u8>,
    releases: usize,
    pattern: Pattern,
    counter: usize,
    queued: VecDeque<Vec<u8>>,
    sunk: usize,
    last_read_request: Option<usize>,
    accept_unknown_requests: bool,
    short_writes: bool,
    source_depth: usize,
    counter_start: usize,
    noisy_zeros: bool,
}

impl State {
    fn next_packet(&mut self) -> Vec<u8> {
        let mut packet: Vec<u8> = (0..MAX_PACKET)
            .map(|i| self.pattern.byte_at(self.counter + i))
            .collect();
        if self.noisy_zeros && self.pattern == Pattern::Zeros {
            packet[MAX_PACKET / 2] = 0x5a;
        }
        self.counter += MAX_PACKET;
        packet
    }

    fn fill_source(&mut self) {
        while self.queued.len() < self.source_depth {
            let packet = self.next_packet();
            self.queued.push_back(packet);
        }
    }

    fn apply_configuration(&mut self, value: u8) -> rusb::Result<()> {
        if value != 0 && !CONFIGS.contains(&value) {
            return Err(rusb::Error::Pipe);
        }
        self.configuration = value;
        self.pattern = Pattern::Zeros;
        self.counter = self.counter_start;
        self.queued.clear();
        if value == 2 {
            self.fill_source();
        }
        Ok(())
    }

    fn source_sink_ready(&self) -> rusb::Result<()> {
        if self.claimed != Some(0) {
            return Err(rusb::Error::NotFound);
        }
        if self.configuration != 2 {
            // an unconfigured device never acknowledges
            return Err(rusb::Error::Timeout);
        }
        Ok(())
    }
}

/// Shared view of the simulated device's state, usable after the device
/// itself has been moved into (and dropped by) a `Gadget`.
#[derive(Debug, Clone)]
pub struct Tap(Rc<RefCell<State>>);

impl Tap {
    pub fn claimed(&self) -> Option<u8> {
        self.0.borrow().claimed
    }

    pub fn releases(&self) -> usize {
        self.0.borrow().releases
    }

    pub fn last_read_request(&self) -> Option<usize> {
        self.0.borrow().last_read_request
    }

    pub fn sunk(&self) -> usize {
        self.0.borrow().sunk
    }
}

#[derive(Debug)]
pub struct SimulatedGadget {
    state: Rc<RefCell<State>>,
}

impl SimulatedGadget {
    pub fn new() -> Self {
        SimulatedGadget {
            state: Rc::new(RefCell::new(State {
                configuration: 0,
                claimed: None,
                releases: 0,
                pattern: Pattern::Zeros,
                counter: 0,
                queued: VecDeque::new(),
                sunk: 0,
                last_read_request: None,
                accept_unknown_requests: false,
                short_writes: false,
                source_depth: SOURCE_DEPTH,
                counter_start: 0,
                noisy_zeros: false,
            })),
        }
    }

    /// Firmware that silently accepts unknown vendor requests.
    pub fn accepting_unknown_requests() -> Self {
        let sim = Self::new();
        sim.state.borrow_mut().accept_unknown_requests = true;
        sim
    }

    /// Firmware whose sink only takes half of every write.
    pub fn with_short_writes() -> Self {
        let sim = Self::new();
        sim.state.borrow_mut().short_writes = true;
        sim
    }

    /// Firmware that slips a nonzero byte into every zeros packet.
    pub fn with_noisy_zeros() -> Self {
        let sim = Self::new();
        sim.state.borrow_mut().noisy_zeros = true;
        sim
    }

    /// Firmware whose stream counter restarts at `start` instead of zero.
    pub fn with_counter_start(start: usize) -> Self {
        let sim = Self::new();
        sim.state.borrow_mut().counter_start = start;
        sim
    }

    /// Firmware that keeps one more packet queued than the harness drains.
    pub fn with_extra_stale_packet() -> Self {
        let sim = Self::new();
        sim.state.borrow_mut().source_depth = SOURCE_DEPTH + 1;
        sim
    }

    pub fn tap(&self) -> Tap {
        Tap(Rc::clone(&self.state))
    }
}

fn layout(value: u8) -> ConfigLayout {
    ConfigLayout {
        value,
        interfaces: vec![InterfaceLayout {
            number: 0,
            alt_setting: 0,
            endpoints: vec![
                EndpointInfo {
                    address: EP_IN,
                    transfer_type: TransferType::Bulk,
                    max_packet_size: MAX_PACKET as u16,
                },
                EndpointInfo {
                    address: EP_OUT,
                    transfer_type: TransferType::Bulk,
                    max_packet_size: MAX_PACKET as u16,
                },
            ],
        }],
    }
}

impl Bus for SimulatedGadget {
    fn num_configurations(&self) -> rusb::Result<u8> {
        Ok(CONFIGS.len() as u8)
    }

    fn configuration(&self, value: u8) -> rusb::Result<Option<ConfigLayout>> {
        Ok(CONFIGS.contains(&value).then(|| layout(value)))
    }

    fn set_configuration(&mut self, value: u8) -> rusb::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.claimed.is_some() {
            return Err(rusb::Error::Busy);
        }
        state.apply_configuration(value)
    }

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.configuration == 0 || interface != 0 {
            return Err(rusb::Error::NotFound);
        }
        state.claimed = Some(interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.claimed != Some(interface) {
            return Err(rusb::Error::NotFound);
        }
        state.claimed = None;
        state.releases += 1;
        Ok(())
    }

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        _value: u16,
        _index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        let state = self.state.borrow();
        if request_type == 0x80 && request == REQUEST_GET_CONFIGURATION && !buf.is_empty() {
            buf[0] = state.configuration;
            return Ok(1);
        }
        Err(rusb::Error::Pipe)
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        _index: u16,
        _data: &[u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        let mut state = self.state.borrow_mut();
        match (request_type, request) {
            (0x00, REQUEST_SET_CONFIGURATION) => {
                let value = u8::try_from(value).map_err(|_| rusb::Error::Pipe)?;
                state.apply_configuration(value)?;
                Ok(0)
            }
            (0x41, REQUEST_SET_PATTERN) if state.configuration == 2 => {
                // unknown pattern values are accepted and leave the pattern alone
                if let Some(pattern) = Pattern::from_value(value) {
                    if pattern != state.pattern {
                        state.pattern = pattern;
                        state.counter = state.counter_start;
                    }
                }
                Ok(0)
            }
            _ if state.accept_unknown_requests => Ok(0),
            _ => Err(rusb::Error::Pipe),
        }
    }

    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], _timeout: Duration) -> rusb::Result<usize> {
        let mut state = self.state.borrow_mut();
        if endpoint != EP_IN {
            return Err(rusb::Error::InvalidParam);
        }
        state.source_sink_ready()?;
        state.last_read_request = Some(buf.len());
        // the device always sends full packets
        if buf.len() % MAX_PACKET != 0 {
            return Err(rusb::Error::Overflow);
        }
        for chunk in buf.chunks_mut(MAX_PACKET) {
            state.fill_source();
            let queued = state.queued.pop_front();
            if let Some(packet) = queued {
                chunk.copy_from_slice(&packet);
            }
        }
        state.fill_source();
        Ok(buf.len())
    }

    fn write_bulk(&mut self, endpoint: u8, data: &[u8], _timeout: Duration) -> rusb::Result<usize> {
        let mut state = self.state.borrow_mut();
        if endpoint != EP_OUT {
            return Err(rusb::Error::InvalidParam);
        }
        state.source_sink_ready()?;
        let accepted = if state.short_writes {
            data.len() / 2
        } else {
            data.len()
        };
        state.sunk += accepted;
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> SimulatedGadget {
        let mut sim = SimulatedGadget::new();
        sim.set_configuration(2).unwrap();
        sim.claim_interface(0).unwrap();
        sim
    }

    fn select(sim: &mut SimulatedGadget, pattern: Pattern) {
        sim.write_control(0x41, REQUEST_SET_PATTERN, pattern.value(), 0, &[], Duration::ZERO)
            .unwrap();
    }

    fn packet(sim: &mut SimulatedGadget) -> Vec<u8> {
        let mut buf = vec![0u8; MAX_PACKET];
        sim.read_bulk(EP_IN, &mut buf, Duration::ZERO).unwrap();
        buf
    }

    #[test]
    fn pattern_switch_leaves_two_stale_packets() {
        let mut sim = configured();
        select(&mut sim, Pattern::Mod63);
        assert!(packet(&mut sim).iter().all(|&b| b == 0));
        assert!(packet(&mut sim).iter().all(|&b| b == 0));
        assert_eq!(packet(&mut sim), Pattern::Mod63.expected(MAX_PACKET));
    }

    #[test]
    fn reselecting_the_current_pattern_keeps_the_counter() {
        let mut sim = configured();
        select(&mut sim, Pattern::Mod63);
        packet(&mut sim);
        packet(&mut sim);
        let first = packet(&mut sim);
        select(&mut sim, Pattern::Mod63);
        let second = packet(&mut sim);
        assert_eq!(first, Pattern::Mod63.expected(MAX_PACKET));
        assert_eq!(&second[..], &Pattern::Mod63.expected(2 * MAX_PACKET)[MAX_PACKET..]);
    }

    #[test]
    fn noisy_zeros_are_not_all_zero() {
        let mut sim = SimulatedGadget::with_noisy_zeros();
        sim.set_configuration(2).unwrap();
        sim.claim_interface(0).unwrap();
        assert!(packet(&mut sim).iter().any(|&b| b != 0));
    }

    #[test]
    fn odd_sized_reads_overflow() {
        let mut sim = configured();
        let mut buf = vec![0u8; 10];
        assert_eq!(
            sim.read_bulk(EP_IN, &mut buf, Duration::ZERO),
            Err(rusb::Error::Overflow)
        );
    }

    #[test]
    fn transfers_need_a_claimed_interface() {
        let mut sim = SimulatedGadget::new();
        sim.set_configuration(2).unwrap();
        assert_eq!(
            sim.write_bulk(EP_OUT, &[0], Duration::ZERO),
            Err(rusb::Error::NotFound)
        );
    }

    #[test]
    fn sink_counts_accepted_bytes() {
        let mut sim = configured();
        let tap = sim.tap();
        assert_eq!(sim.write_bulk(EP_OUT, &[0; 100], Duration::ZERO), Ok(100));
        assert_eq!(tap.sunk(), 100);
    }
}
