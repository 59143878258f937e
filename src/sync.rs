//! Interrupt masking primitives for state shared with interrupt handlers
//!
//! The super-loop never takes a global lock. Each piece of shared state sits
//! in an [`IrqCell`] that names the interrupt sources allowed to touch it.
//! The loop reaches the value only while an [`IrqMask`] holds every one of
//! those sources disabled; a handler reaches it through the [`IsrCtx`] it is
//! handed on entry. Hardware does not nest handlers, so a handler owning a
//! cell has exclusive access for its whole run.

use core::cell::RefCell;

/// Interrupt sources that touch shared state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Irq {
    /// Register bus protocol events
    Bus = 0,
    /// Bus hang guard timer
    BusGuard = 1,
    /// Conversion complete
    Sampler = 2,
    /// Sample trigger timer
    SampleTimer = 3,
    /// One-second clock
    Clock = 4,
    /// Scheduler tick
    Tick = 5,
}

impl Irq {
    pub const ALL: [Irq; 6] = [
        Irq::Bus,
        Irq::BusGuard,
        Irq::Sampler,
        Irq::SampleTimer,
        Irq::Clock,
        Irq::Tick,
    ];
}

/// A set of interrupt sources.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct IrqSet(u8);

impl IrqSet {
    pub const EMPTY: Self = Self(0);

    pub const fn of(irq: Irq) -> Self {
        Self(1 << irq as u8)
    }

    pub const fn with(self, irq: Irq) -> Self {
        Self(self.0 | (1 << irq as u8))
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, irq: Irq) -> bool {
        self.0 & (1 << irq as u8) != 0
    }

    /// True when every source in `other` is also in `self`.
    pub const fn covers(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn iter(self) -> impl Iterator<Item = Irq> {
        Irq::ALL.into_iter().filter(move |irq| self.contains(*irq))
    }
}

/// Per-source interrupt enable control.
///
/// # Safety
///
/// `mask` must not return until none of the sources in `set` can run, and
/// must report exactly the sources it found enabled. Cells rely on this for
/// exclusive access.
pub unsafe trait IrqControl {
    /// Disables `set`, returning the subset that was enabled beforehand.
    fn mask(&self, set: IrqSet) -> IrqSet;

    /// Re-enables `set`.
    fn unmask(&self, set: IrqSet);
}

/// Scoped interrupt disable. Sources masked here come back on drop, on every
/// exit path. Sources that were already off stay off.
pub struct IrqMask<'a, C: IrqControl + ?Sized> {
    ctl: &'a C,
    held: IrqSet,
    restore: IrqSet,
}

impl<'a, C: IrqControl + ?Sized> IrqMask<'a, C> {
    pub fn new(ctl: &'a C, set: IrqSet) -> Self {
        let restore = ctl.mask(set);
        Self {
            ctl,
            held: set,
            restore,
        }
    }

    pub fn covers(&self, set: IrqSet) -> bool {
        self.held.covers(set)
    }
}

impl<C: IrqControl + ?Sized> Drop for IrqMask<'_, C> {
    fn drop(&mut self) {
        if !self.restore.is_empty() {
            self.ctl.unmask(self.restore);
        }
    }
}

/// Proof of running inside the handler for one interrupt source.
pub struct IsrCtx {
    source: Irq,
}

impl IsrCtx {
    /// # Safety
    ///
    /// Only call at the top of the handler for `source`, with no other
    /// handler able to preempt it.
    pub unsafe fn enter(source: Irq) -> Self {
        Self { source }
    }

    pub fn source(&self) -> Irq {
        self.source
    }
}

/// State shared between the super-loop and a fixed group of handlers.
pub struct IrqCell<T> {
    owners: IrqSet,
    value: RefCell<T>,
}

// Access is serialized by masking every owner (loop side) or by running
// inside a non-nesting owner handler (interrupt side).
unsafe impl<T: Send> Sync for IrqCell<T> {}

impl<T> IrqCell<T> {
    pub const fn new(owners: IrqSet, value: T) -> Self {
        Self {
            owners,
            value: RefCell::new(value),
        }
    }

    pub fn owners(&self) -> IrqSet {
        self.owners
    }

    /// Loop-side access. `mask` must hold every owning source disabled.
    pub fn lock<C, R>(&self, mask: &IrqMask<'_, C>, f: impl FnOnce(&mut T) -> R) -> R
    where
        C: IrqControl + ?Sized,
    {
        debug_assert!(mask.covers(self.owners));
        f(&mut self.value.borrow_mut())
    }

    /// Handler-side access from one of the owning sources.
    pub fn with_isr<R>(&self, ctx: &IsrCtx, f: impl FnOnce(&mut T) -> R) -> R {
        debug_assert!(self.owners.contains(ctx.source()));
        f(&mut self.value.borrow_mut())
    }

    /// Masks the owners for the duration of `f`.
    pub fn masked<C, R>(&self, ctl: &C, f: impl FnOnce(&mut T) -> R) -> R
    where
        C: IrqControl + ?Sized,
    {
        let mask = IrqMask::new(ctl, self.owners);
        self.lock(&mask, f)
    }
}
