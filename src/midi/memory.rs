//! In-process [`Transport`] with virtual endpoints.
//!
//! Sources are driven by calling [`MemorySource::emit`], destinations
//! record what they are sent. Handy to route between components of the
//! same process, and to exercise a broker without any MIDI hardware.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError, Weak,
};

use super::{
    DelegateSlot, Destination, Direction, Endpoint, Error, Message, RawEvent, Transport,
    TransportDelegate,
};

pub struct MemorySource {
    name: Arc<str>,
    enabled: AtomicBool,
    delegate: Arc<DelegateSlot>,
}

impl MemorySource {
    /// Delivers a batch of events, as if received from the device.
    ///
    /// Returns `false` if the source is disabled, in which case
    /// nothing is delivered.
    pub fn emit(&self, events: &[&dyn RawEvent]) -> bool {
        if !self.is_enabled() {
            log::trace!("Dropping events from disabled source {}", self.name);
            return false;
        }

        self.delegate.received_midi(events, self);

        true
    }

    pub fn emit_msg(&self, msg: Message) -> bool {
        self.emit(&[&msg])
    }
}

impl Endpoint for MemorySource {
    fn name(&self) -> Arc<str> {
        self.name.clone()
    }

    fn direction(&self) -> Direction {
        Direction::Source
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.enabled.store(enabled, Ordering::Release);
        Ok(())
    }
}

pub struct MemoryDestination {
    name: Arc<str>,
    enabled: AtomicBool,
    sent: Mutex<Vec<Message>>,
}

impl MemoryDestination {
    /// Messages sent to this destination so far, oldest first.
    pub fn sent(&self) -> Vec<Message> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Endpoint for MemoryDestination {
    fn name(&self) -> Arc<str> {
        self.name.clone()
    }

    fn direction(&self) -> Direction {
        Direction::Destination
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.enabled.store(enabled, Ordering::Release);
        Ok(())
    }
}

impl Destination for MemoryDestination {
    fn send(&self, msg: &Message) -> Result<(), Error> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*msg);

        Ok(())
    }
}

#[derive(Default)]
struct State {
    unavailable: bool,
    sources: Vec<Arc<MemorySource>>,
    destinations: Vec<Arc<MemoryDestination>>,
}

pub struct MemoryTransport {
    state: Mutex<State>,
    delegate: Arc<DelegateSlot>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            delegate: DelegateSlot::new(),
        }
    }
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulates the transport going away or coming back.
    pub fn set_available(&self, available: bool) {
        self.state().unavailable = !available;
    }

    pub fn is_bound(&self) -> bool {
        self.delegate.is_bound()
    }

    /// Adds a disabled source.
    pub fn add_source(&self, name: &str) -> Arc<MemorySource> {
        let source = Arc::new(MemorySource {
            name: name.into(),
            enabled: AtomicBool::new(false),
            delegate: self.delegate.clone(),
        });
        self.state().sources.push(source.clone());

        self.delegate
            .setup_changed(&format!("MIDI setup changed: source added: {name}"));

        source
    }

    /// Adds a disabled destination.
    pub fn add_destination(&self, name: &str) -> Arc<MemoryDestination> {
        let dest = Arc::new(MemoryDestination {
            name: name.into(),
            enabled: AtomicBool::new(false),
            sent: Mutex::default(),
        });
        self.state().destinations.push(dest.clone());

        self.delegate
            .setup_changed(&format!("MIDI setup changed: destination added: {name}"));

        dest
    }

    /// Removes the first source named `name`.
    pub fn remove_source(&self, name: &str) -> Option<Arc<MemorySource>> {
        let removed = {
            let mut state = self.state();
            let idx = state
                .sources
                .iter()
                .position(|source| source.name.as_ref() == name)?;
            state.sources.remove(idx)
        };

        self.delegate
            .setup_changed(&format!("MIDI setup changed: source removed: {name}"));

        Some(removed)
    }

    /// Removes the first destination named `name`.
    pub fn remove_destination(&self, name: &str) -> Option<Arc<MemoryDestination>> {
        let removed = {
            let mut state = self.state();
            let idx = state
                .destinations
                .iter()
                .position(|dest| dest.name.as_ref() == name)?;
            state.destinations.remove(idx)
        };

        self.delegate
            .setup_changed(&format!("MIDI setup changed: destination removed: {name}"));

        Some(removed)
    }
}

impl Transport for MemoryTransport {
    fn sources(&self) -> Result<Vec<Arc<dyn Endpoint>>, Error> {
        let state = self.state();
        if state.unavailable {
            return Err(Error::TransportUnavailable("memory transport offline".into()));
        }

        Ok(state
            .sources
            .iter()
            .map(|source| source.clone() as Arc<dyn Endpoint>)
            .collect())
    }

    fn destinations(&self) -> Result<Vec<Arc<dyn Destination>>, Error> {
        let state = self.state();
        if state.unavailable {
            return Err(Error::TransportUnavailable("memory transport offline".into()));
        }

        Ok(state
            .destinations
            .iter()
            .map(|dest| dest.clone() as Arc<dyn Destination>)
            .collect())
    }

    fn bind(&self, delegate: Weak<dyn TransportDelegate>) {
        self.delegate.bind(delegate);
    }

    fn unbind(&self, delegate: &Weak<dyn TransportDelegate>) {
        self.delegate.unbind(delegate);
    }

    fn is_bound_to(&self, delegate: &Weak<dyn TransportDelegate>) -> bool {
        self.delegate.is_bound_to(delegate)
    }
}
