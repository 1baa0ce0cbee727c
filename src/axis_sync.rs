//! Axis synchronizer
//!
//! Keeps the time axes of several charts scrolling and zooming together. The
//! synchronizer is a small mediator: a set of member axes, the shared visible
//! range, and a propagation flag. While it writes to members it is the only
//! writer, so a member that reports its own change during that write is
//! ignored instead of starting a new round.

use crate::data_types::{AxisId, AxisRange, TimeLimits, VisibleRange};
use crate::view_controller;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// An axis that can be kept in sync.
pub trait SyncedAxis {
    fn axis_id(&self) -> AxisId;

    /// Programmatic write from the synchronizer. Must not be treated as a
    /// user change.
    fn apply_range(&self, range: VisibleRange);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Propagation {
    /// The range reached `targets` other members.
    Applied { targets: usize },
    /// Raised while a propagation was already running.
    Suppressed,
    /// The source is not (or no longer) registered.
    NotMember,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type RangeListener = Rc<dyn Fn(VisibleRange)>;

/// Wheel delta that doubles (or halves) the visible span.
const WHEEL_SENSITIVITY: f32 = 100.0;

struct PropagationGuard<'a>(&'a Cell<bool>);

impl<'a> PropagationGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            return None;
        }
        Some(Self(flag))
    }
}

impl Drop for PropagationGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[derive(Default)]
pub struct AxisSynchronizer {
    shared: Cell<Option<VisibleRange>>,
    members: RefCell<Vec<Rc<dyn SyncedAxis>>>,
    propagating: Cell<bool>,
    listeners: RefCell<Vec<(ListenerId, RangeListener)>>,
    next_listener: Cell<u64>,
}

impl AxisSynchronizer {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn shared_range(&self) -> Option<VisibleRange> {
        self.shared.get()
    }

    /// Forgets the shared range so the next member keeps its own window.
    /// Members and listeners stay.
    pub fn clear_shared_range(&self) {
        self.shared.set(None);
    }

    pub fn member_count(&self) -> usize {
        self.members.borrow().len()
    }

    pub fn is_member(&self, id: AxisId) -> bool {
        self.members.borrow().iter().any(|m| m.axis_id() == id)
    }

    /// Adds `axis` and forces it to the shared range, if one is set.
    pub fn register(&self, axis: Rc<dyn SyncedAxis>) {
        let id = axis.axis_id();
        if self.is_member(id) {
            debug!("axis {:?} already registered", id);
            return;
        }
        self.members.borrow_mut().push(axis.clone());
        if let Some(range) = self.shared.get() {
            // Held so an axis echoing the write is not taken as a source.
            let _guard = PropagationGuard::enter(&self.propagating);
            axis.apply_range(range);
        }
    }

    pub fn unregister(&self, id: AxisId) -> bool {
        let mut members = self.members.borrow_mut();
        let before = members.len();
        members.retain(|m| m.axis_id() != id);
        members.len() != before
    }

    pub fn subscribe(&self, listener: impl Fn(VisibleRange) + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(l, _)| *l != id);
        listeners.len() != before
    }

    /// Called by a member whose range was changed by the user. Every other
    /// member has `range` by the time this returns.
    pub fn on_range_changed(&self, source: AxisId, range: VisibleRange) -> Propagation {
        if !self.is_member(source) {
            return Propagation::NotMember;
        }
        self.propagate(Some(source), range)
    }

    /// Pushes `range` to every member, e.g. after fitting the group to data.
    pub fn broadcast(&self, range: VisibleRange) -> Propagation {
        self.propagate(None, range)
    }

    fn propagate(&self, source: Option<AxisId>, range: VisibleRange) -> Propagation {
        let Some(_guard) = PropagationGuard::enter(&self.propagating) else {
            trace!("range change from {:?} during propagation ignored", source);
            return Propagation::Suppressed;
        };
        self.shared.set(Some(range));

        // Snapshot so members may (un)register from inside `apply_range`.
        let targets: Vec<Rc<dyn SyncedAxis>> = self
            .members
            .borrow()
            .iter()
            .filter(|m| Some(m.axis_id()) != source)
            .cloned()
            .collect();
        for axis in &targets {
            axis.apply_range(range);
        }

        let listeners: Vec<RangeListener> =
            self.listeners.borrow().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(range);
        }

        Propagation::Applied {
            targets: targets.len(),
        }
    }
}

/// Time axis of one chart. User interactions go through the synchronizer;
/// writes coming from the synchronizer do not.
pub struct TimeAxis {
    id: AxisId,
    range: RefCell<AxisRange>,
    sync: RefCell<Weak<AxisSynchronizer>>,
    programmatic_writes: Cell<u64>,
}

impl TimeAxis {
    pub fn new(id: AxisId, range: AxisRange) -> Rc<Self> {
        Rc::new(Self {
            id,
            range: RefCell::new(range),
            sync: RefCell::new(Weak::new()),
            programmatic_writes: Cell::new(0),
        })
    }

    pub fn id(&self) -> AxisId {
        self.id
    }

    pub fn range(&self) -> VisibleRange {
        self.range.borrow().window()
    }

    /// Window cut down to the limits, for rendering.
    pub fn shown_range(&self) -> VisibleRange {
        self.range.borrow().bounded_window()
    }

    /// Keeps the window inside `[earliest, latest]` from now on. Local to this
    /// axis; members are not written.
    pub fn set_limits(&self, earliest: Option<f64>, latest: Option<f64>) {
        self.range
            .borrow_mut()
            .set_limits(TimeLimits::new(earliest, latest));
    }

    /// Number of writes received from the synchronizer.
    pub fn programmatic_writes(&self) -> u64 {
        self.programmatic_writes.get()
    }

    pub fn attach(self: &Rc<Self>, sync: &Rc<AxisSynchronizer>) {
        *self.sync.borrow_mut() = Rc::downgrade(sync);
        sync.register(self.clone());
    }

    pub fn detach(&self) {
        let sync = std::mem::take(&mut *self.sync.borrow_mut());
        if let Some(sync) = sync.upgrade() {
            sync.unregister(self.id);
        }
    }

    fn report(&self) -> Propagation {
        let sync = self.sync.borrow().upgrade();
        match sync {
            Some(sync) => sync.on_range_changed(self.id, self.range()),
            None => Propagation::NotMember,
        }
    }

    pub fn pan(&self, delta_pixels: f32, width_pixels: f32) -> Propagation {
        view_controller::pan_by_pixels(&mut self.range.borrow_mut(), delta_pixels, width_pixels);
        self.report()
    }

    /// Wheel zoom around the pointer at `pointer_pixels`.
    pub fn zoom(&self, wheel_delta: f32, pointer_pixels: f32, width_pixels: f32) -> Propagation {
        let pivot_pct = if width_pixels > 0.0 {
            (pointer_pixels / width_pixels).clamp(0.0, 1.0) as f64
        } else {
            0.5
        };
        let factor = view_controller::wheel_zoom_factor(wheel_delta, WHEEL_SENSITIVITY);
        view_controller::zoom_at_fraction(&mut self.range.borrow_mut(), pivot_pct, factor);
        self.report()
    }

    pub fn center_on(&self, time: f64) -> Propagation {
        view_controller::center_on(&mut self.range.borrow_mut(), time);
        self.report()
    }

    /// Fits the window to `[data_min, data_max]` with a margin. Nothing
    /// happens, and nothing propagates, for an empty or inverted interval.
    pub fn fit(&self, data_min: f64, data_max: f64, margin_pct: f64) -> Option<Propagation> {
        let fitted = view_controller::fit(&mut self.range.borrow_mut(), data_min, data_max, margin_pct);
        fitted.then(|| self.report())
    }

    pub fn set_user_range(&self, range: VisibleRange) -> Propagation {
        {
            let mut axis = self.range.borrow_mut();
            axis.set_window(range);
            axis.clamp();
        }
        self.report()
    }

    /// Time under the pointer, for the crosshair.
    pub fn time_at(&self, pointer_pixels: f32, width_pixels: f32) -> f64 {
        view_controller::time_at_pixel(pointer_pixels, width_pixels, self.range())
    }
}

impl SyncedAxis for TimeAxis {
    fn axis_id(&self) -> AxisId {
        self.id
    }

    fn apply_range(&self, range: VisibleRange) {
        self.range.borrow_mut().set_window(range);
        self.programmatic_writes.set(self.programmatic_writes.get() + 1);
    }
}
