//! Two-interface bridge (spec.md §4.N): forwards every packet received
//! on one side out the other, skipping locally-addressed traffic and
//! honoring each interface's split-horizon flag.
//!
//! `csp_bridge.c` (present in `examples/original_source/src/arch/posix/`)
//! only shows the task-spawn shell around a `csp_bridge_work()` call
//! whose body isn't in the retrieved pack, so the forwarding body here
//! is built from spec.md §4.N directly; it taps the same promiscuous
//! sink `stack.rs`'s `enable_promiscuous_mode`/`publish_promiscuous`
//! pair exposes to passive observability tooling, since a bridge is
//! exactly an automated promiscuous consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::buffer::Packet;
use crate::iface::Interface;
use crate::router;
use crate::stack::Stack;

/// A hook invoked for every packet the bridge considers forwarding,
/// before the split-horizon/local-address decision — spec.md §4.N's
/// "an input hook is available for observability".
pub trait InputHook: Send + Sync {
    fn on_packet(&self, packet: &Packet, from: &Arc<Interface>);
}

/// Two interfaces registered as a bridged pair.
pub struct Bridge {
    iface_a: Arc<Interface>,
    iface_b: Arc<Interface>,
    /// When set, packets entering on that side are never forwarded back
    /// out the *other* side if `other side == where they'd exit on a
    /// direct echo* — concretely, split-horizon on a side disables
    /// forwarding onto that side, matching "disables the echo" in
    /// spec.md §4.N.
    split_horizon_a: AtomicBool,
    split_horizon_b: AtomicBool,
    hook: Option<Box<dyn InputHook>>,
}

impl Bridge {
    pub fn new(iface_a: Arc<Interface>, iface_b: Arc<Interface>) -> Self {
        Self {
            iface_a,
            iface_b,
            split_horizon_a: AtomicBool::new(false),
            split_horizon_b: AtomicBool::new(false),
            hook: None,
        }
    }

    pub fn with_input_hook(mut self, hook: Box<dyn InputHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Disable forwarding onto `iface_a` (packets arriving on B stop
    /// being echoed back out A).
    pub fn set_split_horizon_a(&self, v: bool) {
        self.split_horizon_a.store(v, Ordering::Relaxed);
    }

    pub fn set_split_horizon_b(&self, v: bool) {
        self.split_horizon_b.store(v, Ordering::Relaxed);
    }

    fn exit_side(&self, entry: &Arc<Interface>) -> Option<(&Arc<Interface>, &AtomicBool)> {
        if Arc::ptr_eq(entry, &self.iface_a) {
            Some((&self.iface_b, &self.split_horizon_b))
        } else if Arc::ptr_eq(entry, &self.iface_b) {
            Some((&self.iface_a, &self.split_horizon_a))
        } else {
            None
        }
    }

    async fn handle(&self, stack: &Stack, packet: Packet, from: Arc<Interface>) {
        if let Some(hook) = &self.hook {
            hook.on_packet(&packet, &from);
        }

        let id = packet.identifier().await;
        if router::is_local_destination(stack, id.destination) {
            return;
        }

        let Some((exit, split_horizon)) = self.exit_side(&from) else { return };
        if split_horizon.load(Ordering::Relaxed) {
            return;
        }

        let header_bytes = match id.to_bytes(stack.id_version) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = ?e, "bridge failed to re-encode header");
                return;
            }
        };
        if let Err(e) = packet.prepend(&header_bytes).await {
            tracing::warn!(error = ?e, "bridge failed to prepend header");
            return;
        }
        if let Err(e) = exit.transmit(None, &packet, false).await {
            tracing::warn!(error = ?e, iface = %exit.name, "bridge forward failed");
        }
    }
}

/// Spawn the bridge as its own task, subscribing to `stack`'s
/// promiscuous sink for the lifetime of `stack`.
pub fn spawn(stack: Arc<Stack>, bridge: Arc<Bridge>, capacity: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx: mpsc::Receiver<(Packet, Arc<Interface>)> = stack.enable_promiscuous_mode(capacity).await;
        while let Some((packet, from)) = rx.recv().await {
            bridge.handle(&stack, packet, from).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::InterfaceDriver;
    use crate::error::Result;

    struct Null;
    impl InterfaceDriver for Null {
        fn tx(&self, _via: Option<u16>, _packet: &Packet, _from_me: bool) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn exit_side_picks_the_other_interface() {
        let a = Arc::new(Interface::new("a", 1, 5, Box::new(Null)).unwrap());
        let b = Arc::new(Interface::new("b", 2, 5, Box::new(Null)).unwrap());
        let bridge = Bridge::new(a.clone(), b.clone());

        let (exit, _) = bridge.exit_side(&a).unwrap();
        assert!(Arc::ptr_eq(exit, &b));
        let (exit, _) = bridge.exit_side(&b).unwrap();
        assert!(Arc::ptr_eq(exit, &a));
    }

    #[test]
    fn split_horizon_disables_the_exit_side() {
        let a = Arc::new(Interface::new("a", 1, 5, Box::new(Null)).unwrap());
        let b = Arc::new(Interface::new("b", 2, 5, Box::new(Null)).unwrap());
        let bridge = Bridge::new(a.clone(), b.clone());
        bridge.set_split_horizon_b(true);

        let (_, flag) = bridge.exit_side(&a).unwrap();
        assert!(flag.load(Ordering::Relaxed));
    }
}
