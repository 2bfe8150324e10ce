use std::{
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};

use super::{
    io, DelegateSlot, Destination, DeviceMonitor, Direction, Endpoint, Error, Message, RawMidi,
    Transport, TransportDelegate,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A source port as seen by `midir`.
pub struct SourcePort {
    name: Arc<str>,
    client_name: Arc<str>,
    port: Mutex<midir::MidiInputPort>,
    midi_conn: Mutex<io::MidiIn<InputContext>>,
    delegate: Arc<DelegateSlot>,
    me: Weak<SourcePort>,
}

#[derive(Clone)]
struct InputContext {
    delegate: Arc<DelegateSlot>,
    origin: Weak<SourcePort>,
}

impl SourcePort {
    fn new(
        name: Arc<str>,
        client_name: Arc<str>,
        port: midir::MidiInputPort,
        delegate: Arc<DelegateSlot>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name,
            client_name,
            port: Mutex::new(port),
            midi_conn: Mutex::default(),
            delegate,
            me: me.clone(),
        })
    }

    fn connect(&self, midi_conn: &mut io::MidiIn<InputContext>) -> Result<(), Error> {
        let port = self.port.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let ctx = InputContext {
            delegate: self.delegate.clone(),
            origin: self.me.clone(),
        };

        midi_conn.connect(
            &self.client_name,
            self.name.clone(),
            &port,
            |ts, buf, ctx: &mut InputContext| {
                if let Some(origin) = ctx.origin.upgrade() {
                    // midir hands over one wire message at a time
                    let raw = RawMidi::new(ts, buf);
                    ctx.delegate.received_midi(&[&raw], origin.as_ref());
                }
            },
            ctx,
        )?;

        log::info!("Connected for Input to {}", self.name);

        Ok(())
    }
}

impl Endpoint for SourcePort {
    fn name(&self) -> Arc<str> {
        self.name.clone()
    }

    fn direction(&self) -> Direction {
        Direction::Source
    }

    fn is_enabled(&self) -> bool {
        self.midi_conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_connected()
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), Error> {
        let mut midi_conn = self.midi_conn.lock().unwrap_or_else(PoisonError::into_inner);
        match (enabled, midi_conn.is_connected()) {
            (true, false) => self.connect(&mut midi_conn)?,
            (false, true) => {
                midi_conn.disconnect();
                log::debug!("Disconnected Input from {}", self.name);
            }
            _ => (),
        }

        Ok(())
    }
}

/// A destination port as seen by `midir`.
pub struct DestinationPort {
    name: Arc<str>,
    client_name: Arc<str>,
    port: Mutex<midir::MidiOutputPort>,
    midi_conn: Mutex<io::MidiOut>,
}

impl DestinationPort {
    fn new(name: Arc<str>, client_name: Arc<str>, port: midir::MidiOutputPort) -> Arc<Self> {
        Arc::new(Self {
            name,
            client_name,
            port: Mutex::new(port),
            midi_conn: Mutex::default(),
        })
    }

    fn connect(&self, midi_conn: &mut io::MidiOut) -> Result<(), Error> {
        let port = self.port.lock().unwrap_or_else(PoisonError::into_inner).clone();
        midi_conn.connect(&self.client_name, self.name.clone(), &port)?;

        log::info!("Connected for Output to {}", self.name);

        Ok(())
    }
}

impl Endpoint for DestinationPort {
    fn name(&self) -> Arc<str> {
        self.name.clone()
    }

    fn direction(&self) -> Direction {
        Direction::Destination
    }

    fn is_enabled(&self) -> bool {
        self.midi_conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_connected()
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), Error> {
        let mut midi_conn = self.midi_conn.lock().unwrap_or_else(PoisonError::into_inner);
        match (enabled, midi_conn.is_connected()) {
            (true, false) => self.connect(&mut midi_conn)?,
            (false, true) => {
                midi_conn.disconnect();
                log::debug!("Disconnected Output from {}", self.name);
            }
            _ => (),
        }

        Ok(())
    }
}

impl Destination for DestinationPort {
    /// Sends `msg`, connecting first if the port is not enabled yet.
    fn send(&self, msg: &Message) -> Result<(), Error> {
        let buf = msg.to_bytes()?;

        let mut midi_conn = self.midi_conn.lock().unwrap_or_else(PoisonError::into_inner);
        if !midi_conn.is_connected() {
            self.connect(&mut midi_conn)?;
        }

        midi_conn.send(&self.name, &buf)
    }
}

/// Keeps previously known handles for ports still present,
/// so that open connections survive a refresh.
fn reconcile<P, H>(
    known: &mut Vec<Arc<H>>,
    found: Vec<(Arc<str>, P)>,
    name_of: impl Fn(&H) -> &Arc<str>,
    update_port: impl Fn(&H, P),
    create: impl Fn(Arc<str>, P) -> Arc<H>,
) {
    let mut prev = std::mem::take(known);
    for (name, port) in found {
        match prev.iter().position(|handle| *name_of(&**handle) == name) {
            Some(idx) => {
                let handle = prev.remove(idx);
                update_port(&*handle, port);
                known.push(handle);
            }
            None => known.push(create(name, port)),
        }
    }

    for gone in prev {
        log::debug!("MIDI port {} is gone", name_of(&*gone));
    }
}

/// Lists the ports not owned by this client, along with their names.
pub(super) fn list_ports<IO: midir::MidiIO>(
    conn: &IO,
    client_name: &str,
) -> Result<Vec<(Arc<str>, IO::Port)>, Error> {
    let mut ports = Vec::new();
    for port in conn.ports().iter() {
        let name = conn.port_name(port)?;
        if !name.starts_with(client_name) {
            ports.push((name.into(), port.clone()));
        }
    }

    Ok(ports)
}

/// [`Transport`] over the OS MIDI subsystem, by way of `midir`.
pub struct MidirTransport {
    client_name: Arc<str>,
    sources: Mutex<Vec<Arc<SourcePort>>>,
    destinations: Mutex<Vec<Arc<DestinationPort>>>,
    delegate: Arc<DelegateSlot>,
    monitor: Mutex<Option<DeviceMonitor>>,
    poll_interval: Duration,
}

impl MidirTransport {
    pub fn new(client_name: impl Into<Arc<str>>) -> Self {
        Self {
            client_name: client_name.into(),
            sources: Mutex::default(),
            destinations: Mutex::default(),
            delegate: DelegateSlot::new(),
            monitor: Mutex::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the interval at which ports are checked for hot-plug changes.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn client_name(&self) -> &Arc<str> {
        &self.client_name
    }

    fn unavailable(err: impl std::fmt::Display) -> Error {
        Error::TransportUnavailable(err.to_string().into())
    }
}

impl Transport for MidirTransport {
    fn sources(&self) -> Result<Vec<Arc<dyn Endpoint>>, Error> {
        let temp_conn = midir::MidiInput::new(&format!("{} refresh In ports", self.client_name))
            .map_err(Self::unavailable)?;
        let found = list_ports(&temp_conn, &self.client_name)?;

        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        reconcile(
            &mut sources,
            found,
            |source| &source.name,
            |source, port| {
                *source.port.lock().unwrap_or_else(PoisonError::into_inner) = port;
            },
            |name, port| {
                SourcePort::new(name, self.client_name.clone(), port, self.delegate.clone())
            },
        );

        Ok(sources
            .iter()
            .map(|source| source.clone() as Arc<dyn Endpoint>)
            .collect())
    }

    fn destinations(&self) -> Result<Vec<Arc<dyn Destination>>, Error> {
        let temp_conn = midir::MidiOutput::new(&format!("{} refresh Out ports", self.client_name))
            .map_err(Self::unavailable)?;
        let found = list_ports(&temp_conn, &self.client_name)?;

        let mut destinations = self
            .destinations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        reconcile(
            &mut destinations,
            found,
            |dest| &dest.name,
            |dest, port| {
                *dest.port.lock().unwrap_or_else(PoisonError::into_inner) = port;
            },
            |name, port| DestinationPort::new(name, self.client_name.clone(), port),
        );

        Ok(destinations
            .iter()
            .map(|dest| dest.clone() as Arc<dyn Destination>)
            .collect())
    }

    fn bind(&self, delegate: Weak<dyn TransportDelegate>) {
        self.delegate.bind(delegate);

        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if monitor.is_none() {
            match DeviceMonitor::spawn(
                self.client_name.clone(),
                self.poll_interval,
                self.delegate.clone(),
            ) {
                Ok(started) => *monitor = Some(started),
                Err(err) => log::warn!("MIDI hot-plug notifications unavailable: {err}"),
            }
        }
    }

    fn unbind(&self, delegate: &Weak<dyn TransportDelegate>) {
        if self.delegate.unbind(delegate) {
            self.stop_monitor();
        }
    }

    fn is_bound_to(&self, delegate: &Weak<dyn TransportDelegate>) -> bool {
        self.delegate.is_bound_to(delegate)
    }
}

impl MidirTransport {
    fn stop_monitor(&self) {
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(monitor) = monitor {
            monitor.stop();
        }
    }
}

impl Drop for MidirTransport {
    fn drop(&mut self) {
        self.stop_monitor();
    }
}
