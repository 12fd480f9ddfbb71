// SPDX-License-Identifier: CEPL-1.0
//! Owned native handles and the ledger that records their dependency graph.
//!
//! Every wrapper holds `Rc`s to the wrappers it depends on, so a parent cannot
//! be destroyed while a child exists. The ledger mirrors those links as plain
//! data: each wrapper registers `(kind, parents)` on creation and reports its
//! release on drop, which lets tests and the debug harness check teardown
//! order without a GPU.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use tracing::error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Instance,
    DebugMessenger,
    Surface,
    Device,
    Swapchain,
    ImageView,
    RenderPass,
    Framebuffer,
    CommandPool,
    CommandBuffers,
    Semaphore,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u32);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// `released` went away while `dependent` still referenced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderViolation {
    pub released: ResourceId,
    pub released_kind: ResourceKind,
    pub dependent: ResourceId,
    pub dependent_kind: ResourceKind,
}

/// Number of recent releases kept for `release_order`.
pub const RELEASE_LOG_CAP: usize = 1024;

struct Node {
    kind: ResourceKind,
    parents: Vec<ResourceId>,
    children: HashSet<ResourceId>,
}

/// Only live objects are kept. A released id is forgotten, so memory follows
/// the live set rather than the session history.
#[derive(Default)]
struct LedgerState {
    next_id: u32,
    live: HashMap<ResourceId, Node>,
    released: VecDeque<ResourceKind>,
    violations: Vec<OrderViolation>,
}

/// Shared record of every live owned handle. Cloning shares the same record.
#[derive(Clone, Default)]
pub struct ResourceLedger {
    state: Rc<RefCell<LedgerState>>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: ResourceKind, parents: &[ResourceId]) -> ResourceId {
        let mut st = self.state.borrow_mut();
        let id = ResourceId(st.next_id);
        st.next_id = st.next_id.wrapping_add(1);
        for parent in parents {
            if let Some(node) = st.live.get_mut(parent) {
                node.children.insert(id);
            }
        }
        st.live.insert(
            id,
            Node {
                kind,
                parents: parents.to_vec(),
                children: HashSet::new(),
            },
        );
        id
    }

    /// Marks `id` destroyed. Releasing an object that a live object still
    /// depends on is recorded as a violation.
    pub fn release(&self, id: ResourceId) {
        let mut guard = self.state.borrow_mut();
        let st = &mut *guard;
        let Some(node) = st.live.remove(&id) else {
            return;
        };

        let mut dependents: Vec<ResourceId> = node.children.into_iter().collect();
        dependents.sort();
        for dependent in dependents {
            let Some(dependent_kind) = st.live.get(&dependent).map(|n| n.kind) else {
                continue;
            };
            error!(
                "vk: {} {id} destroyed before its dependent {dependent_kind} {dependent}",
                node.kind
            );
            st.violations.push(OrderViolation {
                released: id,
                released_kind: node.kind,
                dependent,
                dependent_kind,
            });
        }

        for parent in &node.parents {
            if let Some(p) = st.live.get_mut(parent) {
                p.children.remove(&id);
            }
        }

        if st.released.len() == RELEASE_LOG_CAP {
            st.released.pop_front();
        }
        st.released.push_back(node.kind);
    }

    pub fn is_alive(&self, id: ResourceId) -> bool {
        self.state.borrow().live.contains_key(&id)
    }

    /// Kind of a live object.
    pub fn kind(&self, id: ResourceId) -> Option<ResourceKind> {
        self.state.borrow().live.get(&id).map(|n| n.kind)
    }

    /// Parents of a live object; empty once it is released.
    pub fn parents(&self, id: ResourceId) -> Vec<ResourceId> {
        self.state
            .borrow()
            .live
            .get(&id)
            .map(|n| n.parents.clone())
            .unwrap_or_default()
    }

    /// Live objects in creation order.
    pub fn live(&self) -> Vec<(ResourceId, ResourceKind)> {
        let mut live: Vec<(ResourceId, ResourceKind)> = self
            .state
            .borrow()
            .live
            .iter()
            .map(|(id, n)| (*id, n.kind))
            .collect();
        live.sort_by_key(|(id, _)| *id);
        live
    }

    /// Kinds of the most recent releases (at most `RELEASE_LOG_CAP`), oldest
    /// first.
    pub fn release_order(&self) -> Vec<ResourceKind> {
        self.state.borrow().released.iter().copied().collect()
    }

    pub fn violations(&self) -> Vec<OrderViolation> {
        self.state.borrow().violations.clone()
    }
}

/// Native destroy action for one wrapped object.
pub trait Destroy {
    const KIND: ResourceKind;

    /// # Safety
    /// Called once, from `Handle::drop`, after every dependent wrapper is gone
    /// and no pending GPU work references the object.
    unsafe fn destroy(&mut self);
}

/// An owned native object. Dropping it issues exactly one destroy call, then
/// releases the parents it holds.
pub struct Handle<T: Destroy> {
    raw: T,
    id: ResourceId,
    ledger: ResourceLedger,
}

impl<T: Destroy> Handle<T> {
    pub(crate) fn wrap(raw: T, ledger: &ResourceLedger, parents: &[ResourceId]) -> Self {
        let id = ledger.register(T::KIND, parents);
        Self {
            raw,
            id,
            ledger: ledger.clone(),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }
}

impl<T: Destroy> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.raw
    }
}

impl<T: Destroy> Drop for Handle<T> {
    fn drop(&mut self) {
        // SAFETY: dependents hold an `Rc` to this handle, so reaching drop
        // means none are left.
        unsafe { self.raw.destroy() };
        self.ledger.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake<P> {
        destroyed: Rc<RefCell<Vec<&'static str>>>,
        label: &'static str,
        _parent: P,
    }

    macro_rules! fake_kind {
        ($name:ident, $kind:ident) => {
            struct $name<P>(Fake<P>);
            impl<P> Destroy for $name<P> {
                const KIND: ResourceKind = ResourceKind::$kind;
                unsafe fn destroy(&mut self) {
                    self.0.destroyed.borrow_mut().push(self.0.label);
                }
            }
        };
    }

    fake_kind!(FakeInstance, Instance);
    fake_kind!(FakeDevice, Device);
    fake_kind!(FakeView, ImageView);

    fn fake<P>(log: &Rc<RefCell<Vec<&'static str>>>, label: &'static str, parent: P) -> Fake<P> {
        Fake {
            destroyed: log.clone(),
            label,
            _parent: parent,
        }
    }

    #[test]
    fn children_keep_parents_alive_and_drop_leaf_first() {
        let ledger = ResourceLedger::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let instance = Rc::new(Handle::wrap(FakeInstance(fake(&log, "instance", ())), &ledger, &[]));
        let device = Rc::new(Handle::wrap(
            FakeDevice(fake(&log, "device", instance.clone())),
            &ledger,
            &[instance.id()],
        ));
        let view = Handle::wrap(
            FakeView(fake(&log, "view", device.clone())),
            &ledger,
            &[device.id()],
        );
        assert_eq!(ledger.parents(view.id()), vec![device.id()]);

        // Dropping the roots first only drops our extra references.
        drop(instance);
        drop(device);
        assert!(log.borrow().is_empty());
        assert_eq!(ledger.live().len(), 3);

        drop(view);
        assert_eq!(*log.borrow(), vec!["view", "device", "instance"]);
        assert_eq!(
            ledger.release_order(),
            vec![ResourceKind::ImageView, ResourceKind::Device, ResourceKind::Instance]
        );
        assert!(ledger.violations().is_empty());
        assert!(ledger.live().is_empty());
    }

    #[test]
    fn releasing_a_parent_with_live_dependent_is_recorded() {
        let ledger = ResourceLedger::new();
        let device = ledger.register(ResourceKind::Device, &[]);
        let pool = ledger.register(ResourceKind::CommandPool, &[device]);

        ledger.release(device);
        let violations = ledger.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].released, device);
        assert_eq!(violations[0].dependent, pool);
        assert_eq!(violations[0].dependent_kind, ResourceKind::CommandPool);
        assert!(!ledger.is_alive(device));
        assert!(ledger.is_alive(pool));
    }

    #[test]
    fn second_release_is_ignored() {
        let ledger = ResourceLedger::new();
        let sem = ledger.register(ResourceKind::Semaphore, &[]);
        ledger.release(sem);
        ledger.release(sem);
        assert_eq!(ledger.release_order(), vec![ResourceKind::Semaphore]);
    }

    #[test]
    fn repeated_recreation_keeps_ledger_bounded() {
        let ledger = ResourceLedger::new();
        let device = ledger.register(ResourceKind::Device, &[]);

        for _ in 0..20_000 {
            let swapchain = ledger.register(ResourceKind::Swapchain, &[device]);
            let views = [
                ledger.register(ResourceKind::ImageView, &[device, swapchain]),
                ledger.register(ResourceKind::ImageView, &[device, swapchain]),
            ];
            let framebuffers: Vec<ResourceId> = views
                .iter()
                .map(|v| ledger.register(ResourceKind::Framebuffer, &[device, *v]))
                .collect();
            for fb in framebuffers {
                ledger.release(fb);
            }
            for view in views {
                ledger.release(view);
            }
            ledger.release(swapchain);
        }

        assert_eq!(ledger.live(), vec![(device, ResourceKind::Device)]);
        assert_eq!(ledger.state.borrow().live[&device].children.len(), 0);
        assert_eq!(ledger.release_order().len(), RELEASE_LOG_CAP);
        assert_eq!(ledger.release_order().last(), Some(&ResourceKind::Swapchain));
        assert!(ledger.violations().is_empty());

        ledger.release(device);
        assert!(ledger.violations().is_empty());
        assert!(ledger.live().is_empty());
    }

    #[test]
    fn released_child_no_longer_blocks_parent() {
        let ledger = ResourceLedger::new();
        let pool = ledger.register(ResourceKind::CommandPool, &[]);
        let first = ledger.register(ResourceKind::CommandBuffers, &[pool]);
        let second = ledger.register(ResourceKind::CommandBuffers, &[pool]);
        ledger.release(first);
        assert_eq!(ledger.kind(first), None);
        assert_eq!(ledger.parents(second), vec![pool]);

        ledger.release(pool);
        let violations = ledger.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].dependent, second);
    }

    #[test]
    fn moved_handle_destroys_once() {
        let ledger = ResourceLedger::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let handle = Handle::wrap(FakeInstance(fake(&log, "instance", ())), &ledger, &[]);
        let moved = handle;
        drop(moved);
        assert_eq!(*log.borrow(), vec!["instance"]);
    }
}
