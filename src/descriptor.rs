//! Owned snapshots of the descriptors the harness cares about.
//!
//! `rusb` descriptors borrow libusb memory and cannot be built by hand, so
//! the parts we need are copied out into plain structs. That also lets the
//! simulated device in the unit tests describe itself.

use rusb::{Direction, TransferType};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

impl EndpointInfo {
    pub fn direction(&self) -> Direction {
        if self.address & rusb::constants::LIBUSB_ENDPOINT_DIR_MASK == rusb::constants::LIBUSB_ENDPOINT_IN {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceLayout {
    pub number: u8,
    pub alt_setting: u8,
    pub endpoints: Vec<EndpointInfo>,
}

impl InterfaceLayout {
    /// First bulk endpoint in the given direction.
    pub fn bulk_endpoint(&self, direction: Direction) -> Option<Endpoint> {
        self.endpoints
            .iter()
            .find(|ep| ep.transfer_type == TransferType::Bulk && ep.direction() == direction)
            .map(|ep| Endpoint {
                address: ep.address,
                max_packet_size: ep.max_packet_size,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayout {
    /// bConfigurationValue, the number passed to SET_CONFIGURATION.
    pub value: u8,
    pub interfaces: Vec<InterfaceLayout>,
}

impl ConfigLayout {
    pub fn interface(&self, number: u8, alt_setting: u8) -> Option<&InterfaceLayout> {
        self.interfaces
            .iter()
            .find(|intf| intf.number == number && intf.alt_setting == alt_setting)
    }

    /// Bulk IN/OUT pair of the given interface (alternate setting 0).
    pub fn bulk_pair(&self, interface: u8) -> Result<EndpointPair> {
        let intf = self
            .interface(interface, 0)
            .ok_or(Error::MissingInterface {
                configuration: self.value,
                interface,
            })?;
        let missing = |direction| Error::MissingEndpoint {
            configuration: self.value,
            interface,
            direction,
        };
        let bulk_in = intf
            .bulk_endpoint(Direction::In)
            .ok_or_else(|| missing(Direction::In))?;
        let bulk_out = intf
            .bulk_endpoint(Direction::Out)
            .ok_or_else(|| missing(Direction::Out))?;
        Ok(EndpointPair {
            interface,
            bulk_in,
            bulk_out,
        })
    }
}

impl From<&rusb::ConfigDescriptor> for ConfigLayout {
    fn from(config: &rusb::ConfigDescriptor) -> Self {
        let mut interfaces = Vec::new();
        for interface in config.interfaces() {
            for desc in interface.descriptors() {
                let endpoints = desc
                    .endpoint_descriptors()
                    .map(|ep| EndpointInfo {
                        address: ep.address(),
                        transfer_type: ep.transfer_type(),
                        max_packet_size: ep.max_packet_size(),
                    })
                    .collect();
                interfaces.push(InterfaceLayout {
                    number: desc.interface_number(),
                    alt_setting: desc.setting_number(),
                    endpoints,
                });
            }
        }
        ConfigLayout {
            value: config.number(),
            interfaces,
        }
    }
}

/// A bulk endpoint of the active configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub address: u8,
    pub max_packet_size: u16,
}

impl Endpoint {
    pub fn packet_size(&self) -> usize {
        usize::from(self.max_packet_size)
    }

    /// Rounds `len` up to a whole number of max-size packets.
    pub fn whole_packets(&self, len: usize) -> usize {
        let mps = self.packet_size().max(1);
        len.div_ceil(mps) * mps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPair {
    pub interface: u8,
    pub bulk_in: Endpoint,
    pub bulk_out: Endpoint,
}
