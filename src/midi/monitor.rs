use crossbeam_channel::{self as channel, RecvTimeoutError};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use super::{port, DelegateSlot, Error};

#[derive(Debug, Default, PartialEq, Eq)]
struct Snapshot {
    sources: Vec<Arc<str>>,
    destinations: Vec<Arc<str>>,
}

impl Snapshot {
    fn take(midi_in: &midir::MidiInput, midi_out: &midir::MidiOutput, client_name: &str) -> Self {
        Self {
            sources: port_names(midi_in, client_name),
            destinations: port_names(midi_out, client_name),
        }
    }
}

fn port_names<IO: midir::MidiIO>(conn: &IO, client_name: &str) -> Vec<Arc<str>> {
    match port::list_ports(conn, client_name) {
        Ok(ports) => ports.into_iter().map(|(name, _)| name).collect(),
        Err(err) => {
            log::warn!("Couldn't list MIDI ports: {err}");
            Vec::new()
        }
    }
}

/// Polls the OS MIDI ports and reports changes to the delegate.
pub struct DeviceMonitor {
    stop_tx: channel::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceMonitor {
    pub fn spawn(
        client_name: Arc<str>,
        interval: Duration,
        delegate: Arc<DelegateSlot>,
    ) -> Result<Self, Error> {
        let midi_in = midir::MidiInput::new(&format!("{client_name} monitor In ports"))?;
        let midi_out = midir::MidiOutput::new(&format!("{client_name} monitor Out ports"))?;
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("midi-device-monitor".into())
            .spawn(move || {
                let mut prev = Snapshot::take(&midi_in, &midi_out, &client_name);

                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => (),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let cur = Snapshot::take(&midi_in, &midi_out, &client_name);
                    if let Some(reason) = describe_changes(&prev, &cur) {
                        delegate.setup_changed(&reason);
                        prev = cur;
                    }
                }

                log::debug!("MIDI device monitor stopped");
            })
            .map_err(|err| Error::TransportUnavailable(err.to_string().into()))?;

        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop_tx.try_send(());

            if handle.thread().id() == thread::current().id() {
                // Stopped from a setup change notification: the loop exits on its own.
                log::debug!("MIDI device monitor stopping itself");
                return;
            }

            if handle.join().is_err() {
                log::error!("MIDI device monitor panicked");
            }
        }
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn describe_changes(prev: &Snapshot, cur: &Snapshot) -> Option<String> {
    if prev == cur {
        return None;
    }

    let diff = |label: &str, prev: &[Arc<str>], cur: &[Arc<str>]| -> Vec<String> {
        let added = cur.iter().filter(|name| !prev.contains(*name));
        let removed = prev.iter().filter(|name| !cur.contains(*name));

        added
            .map(|name| format!("{label} added: {name}"))
            .chain(removed.map(|name| format!("{label} removed: {name}")))
            .collect()
    };

    let mut changes = diff("source", &prev.sources, &cur.sources);
    changes.extend(diff("destination", &prev.destinations, &cur.destinations));
    if changes.is_empty() {
        changes.push("ports reordered".to_string());
    }

    Some(format!("MIDI setup changed: {}", changes.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(sources: &[&str], destinations: &[&str]) -> Snapshot {
        Snapshot {
            sources: sources.iter().map(|&name| name.into()).collect(),
            destinations: destinations.iter().map(|&name| name.into()).collect(),
        }
    }

    #[test]
    fn monitor_stopped_from_its_own_thread_does_not_join() {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let (monitor_tx, monitor_rx) = channel::bounded::<DeviceMonitor>(1);
        let (done_tx, done_rx) = channel::bounded(1);

        let handle = thread::spawn(move || {
            let monitor = monitor_rx.recv().unwrap();
            monitor.stop();
            done_tx.send(stop_rx.try_recv().is_ok()).unwrap();
        });
        monitor_tx
            .send(DeviceMonitor {
                stop_tx,
                handle: Some(handle),
            })
            .unwrap();

        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(true));
    }

    #[test]
    fn no_change_is_not_reported() {
        let prev = snapshot(&["Keyboard"], &["Synth"]);
        assert_eq!(describe_changes(&prev, &snapshot(&["Keyboard"], &["Synth"])), None);
    }

    #[test]
    fn added_and_removed_ports_are_listed() {
        let prev = snapshot(&["Keyboard"], &["Synth"]);
        let cur = snapshot(&["Keyboard", "Pads"], &[]);

        assert_eq!(
            describe_changes(&prev, &cur).unwrap(),
            "MIDI setup changed: source added: Pads, destination removed: Synth"
        );
    }

    #[test]
    fn reordering_is_reported() {
        let prev = snapshot(&["A", "B"], &[]);
        let cur = snapshot(&["B", "A"], &[]);

        assert_eq!(
            describe_changes(&prev, &cur).unwrap(),
            "MIDI setup changed: ports reordered"
        );
    }
}
