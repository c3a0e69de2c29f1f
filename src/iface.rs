//! Interface registry (spec.md §4.D).
//!
//! Grounded on `include/csp/csp_interface.h` (name, subnet address, mask,
//! default-route flag, and the tx/rx/error/byte counters) and
//! `csp_iflist.h`'s lookup API. The original's intrusive singly-linked
//! `next` pointer list is replaced by a `Vec<Arc<Interface>>` (see
//! `DESIGN.md`'s Open Question on interface registry representation).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::buffer::Packet;
use crate::error::{CspError, Result};
use crate::id::Identifier;

/// Counters mirroring `csp_iface_t`'s stats fields, updated without
/// locking (spec.md §5: "Interface stats counters are updated without
/// locking; readers may observe monotonic values").
#[derive(Debug, Default)]
pub struct Counters {
    pub tx: AtomicU32,
    pub rx: AtomicU32,
    pub tx_error: AtomicU32,
    pub rx_error: AtomicU32,
    pub drop: AtomicU32,
    pub autherr: AtomicU32,
    pub frame: AtomicU32,
    pub txbytes: AtomicU64,
    pub rxbytes: AtomicU64,
    pub irq: AtomicU32,
}

impl Counters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            tx: self.tx.load(Ordering::Relaxed),
            rx: self.rx.load(Ordering::Relaxed),
            tx_error: self.tx_error.load(Ordering::Relaxed),
            rx_error: self.rx_error.load(Ordering::Relaxed),
            drop: self.drop.load(Ordering::Relaxed),
            autherr: self.autherr.load(Ordering::Relaxed),
            frame: self.frame.load(Ordering::Relaxed),
            txbytes: self.txbytes.load(Ordering::Relaxed),
            rxbytes: self.rxbytes.load(Ordering::Relaxed),
            irq: self.irq.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CounterSnapshot {
    pub tx: u32,
    pub rx: u32,
    pub tx_error: u32,
    pub rx_error: u32,
    pub drop: u32,
    pub autherr: u32,
    pub frame: u32,
    pub txbytes: u64,
    pub rxbytes: u64,
    pub irq: u32,
}

/// The driver side of an interface: how the stack hands a packet off to
/// the link. Grounded on spec.md §6's "Interface driver contract".
pub trait InterfaceDriver: Send + Sync {
    /// Transmit `packet` towards `via` (or broadcast/direct if `None`).
    /// Must free the packet on success, matching the original contract.
    fn tx(&self, via: Option<u16>, packet: &Packet, from_me: bool) -> Result<()>;
}

pub struct Interface {
    pub name: heapless::String<10>,
    pub address: u16,
    pub netmask: u8,
    pub is_default: AtomicBool,
    pub counters: Counters,
    driver: Box<dyn InterfaceDriver>,
}

impl Interface {
    pub fn new(name: &str, address: u16, netmask: u8, driver: Box<dyn InterfaceDriver>) -> Result<Self> {
        Ok(Self {
            name: heapless::String::try_from(name).map_err(|_| CspError::Inval)?,
            address,
            netmask,
            is_default: AtomicBool::new(false),
            counters: Counters::default(),
            driver,
        })
    }

    pub fn is_default(&self) -> bool {
        self.is_default.load(Ordering::Relaxed)
    }

    pub fn set_default(&self, v: bool) {
        self.is_default.store(v, Ordering::Relaxed);
    }

    /// Forward `packet` to this interface's driver, updating counters.
    pub async fn transmit(&self, via: Option<u16>, packet: &Packet, from_me: bool) -> Result<()> {
        let len = packet.payload_len().await as u64;
        match self.driver.tx(via, packet, from_me) {
            Ok(()) => {
                self.counters.tx.fetch_add(1, Ordering::Relaxed);
                self.counters.txbytes.fetch_add(len, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.counters.tx_error.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Record an accepted inbound frame (called by `Stack::enqueue` path).
    pub fn record_rx(&self, bytes: u64) {
        self.counters.rx.fetch_add(1, Ordering::Relaxed);
        self.counters.rxbytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.counters.drop.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_error(&self) {
        self.counters.frame.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_autherr(&self) {
        self.counters.autherr.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_within_subnet(&self, addr: u16, host_bits: u8) -> bool {
        if self.netmask >= host_bits {
            return addr == self.address;
        }
        let hostmask = (1u16 << (host_bits - self.netmask)) - 1;
        addr & !hostmask == self.address & !hostmask
    }

    /// `true` iff `addr` is this interface's subnet broadcast address.
    pub fn is_broadcast(&self, addr: u16, host_bits: u8, version: crate::id::IdVersion) -> bool {
        Identifier::is_broadcast(addr, self.netmask, version) && self.is_within_subnet(addr, host_bits)
    }
}

/// Append-only registry of interfaces (spec.md §4.D).
pub struct InterfaceList {
    interfaces: RwLock<Vec<Arc<Interface>>>,
}

impl Default for InterfaceList {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceList {
    pub fn new() -> Self {
        Self { interfaces: RwLock::new(Vec::new()) }
    }

    pub fn register(&self, iface: Interface) -> Arc<Interface> {
        let iface = Arc::new(iface);
        self.interfaces.write().unwrap().push(iface.clone());
        iface
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Interface>> {
        self.interfaces.read().unwrap().iter().find(|i| i.name == name).cloned()
    }

    pub fn get_by_addr(&self, addr: u16) -> Option<Arc<Interface>> {
        self.interfaces.read().unwrap().iter().find(|i| i.address == addr).cloned()
    }

    pub fn get_by_subnet(&self, addr: u16, host_bits: u8) -> Option<Arc<Interface>> {
        self.interfaces
            .read()
            .unwrap()
            .iter()
            .find(|i| i.is_within_subnet(addr, host_bits))
            .cloned()
    }

    pub fn get_by_index(&self, index: usize) -> Option<Arc<Interface>> {
        self.interfaces.read().unwrap().get(index).cloned()
    }

    pub fn index_of(&self, iface: &Arc<Interface>) -> Option<usize> {
        self.interfaces.read().unwrap().iter().position(|i| Arc::ptr_eq(i, iface))
    }

    pub fn default_interfaces(&self) -> Vec<Arc<Interface>> {
        self.interfaces.read().unwrap().iter().filter(|i| i.is_default()).cloned().collect()
    }

    /// Promote every registered interface to default when none carries
    /// the flag, so routing never fails purely for lack of a default
    /// (spec.md §4.D).
    pub fn check_dfl(&self) {
        let interfaces = self.interfaces.read().unwrap();
        if interfaces.iter().any(|i| i.is_default()) {
            return;
        }
        for i in interfaces.iter() {
            i.set_default(true);
        }
    }

    pub fn iter(&self) -> Vec<Arc<Interface>> {
        self.interfaces.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null;
    impl InterfaceDriver for Null {
        fn tx(&self, _via: Option<u16>, _packet: &Packet, _from_me: bool) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn check_dfl_promotes_when_none_default() {
        let list = InterfaceList::new();
        list.register(Interface::new("can0", 1, 5, Box::new(Null)).unwrap());
        list.register(Interface::new("can1", 2, 5, Box::new(Null)).unwrap());
        list.check_dfl();
        assert_eq!(list.default_interfaces().len(), 2);
    }

    #[test]
    fn check_dfl_is_noop_when_one_already_default() {
        let list = InterfaceList::new();
        let a = list.register(Interface::new("can0", 1, 5, Box::new(Null)).unwrap());
        list.register(Interface::new("can1", 2, 5, Box::new(Null)).unwrap());
        a.set_default(true);
        list.check_dfl();
        assert_eq!(list.default_interfaces().len(), 1);
    }
}
