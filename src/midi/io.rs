use std::sync::Arc;

use super::Error;

pub type MidiIn<D> = DirectionalConnection<midir::MidiInput, midir::MidiInputConnection<D>>;
pub type MidiOut = DirectionalConnection<midir::MidiOutput, midir::MidiOutputConnection>;

/// Connection state of a single `midir` client.
///
/// The client is only created on first connection and kept around
/// when disconnecting so that it can be reused.
pub enum DirectionalConnection<IO: midir::MidiIO, C> {
    Connected(C),
    Disconnected(IO),
    None,
}

impl<IO: midir::MidiIO, C> Default for DirectionalConnection<IO, C> {
    fn default() -> Self {
        Self::None
    }
}

impl<IO: midir::MidiIO, C> DirectionalConnection<IO, C> {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

impl<D: Send + 'static> MidiIn<D> {
    pub fn connect<C>(
        &mut self,
        client_name: &str,
        port_name: Arc<str>,
        port: &midir::MidiInputPort,
        callback: C,
        data: D,
    ) -> Result<(), Error>
    where
        C: FnMut(u64, &[u8], &mut D) + Send + 'static,
    {
        self.disconnect();
        let mut midi_input = match std::mem::take(self) {
            Self::Disconnected(midi_input) => midi_input,
            Self::None => midir::MidiInput::new(client_name)?,
            Self::Connected(_) => unreachable!(),
        };
        midi_input.ignore(midir::Ignore::SysexAndActiveSense);

        match midi_input.connect(port, client_name, callback, data) {
            Ok(conn) => {
                *self = Self::Connected(conn);
            }
            Err(err) => {
                *self = Self::Disconnected(err.into_inner());
                let err = Error::Connection(port_name);
                log::error!("{}", err);
                return Err(err);
            }
        }

        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.is_connected() {
            match std::mem::take(self) {
                Self::Connected(conn) => {
                    let (io, _data) = conn.close();
                    *self = Self::Disconnected(io);
                }
                _ => unreachable!(),
            }
        }
    }
}

impl MidiOut {
    pub fn connect(
        &mut self,
        client_name: &str,
        port_name: Arc<str>,
        port: &midir::MidiOutputPort,
    ) -> Result<(), Error> {
        self.disconnect();
        let midi_output = match std::mem::take(self) {
            Self::Disconnected(midi_output) => midi_output,
            Self::None => midir::MidiOutput::new(client_name)?,
            Self::Connected(_) => unreachable!(),
        };

        match midi_output.connect(port, client_name) {
            Ok(conn) => {
                *self = Self::Connected(conn);
            }
            Err(err) => {
                *self = Self::Disconnected(err.into_inner());
                let err = Error::Connection(port_name);
                log::error!("{}", err);
                return Err(err);
            }
        }

        Ok(())
    }

    pub fn send(&mut self, port_name: &Arc<str>, msg: &[u8]) -> Result<(), Error> {
        match self {
            Self::Connected(conn) => {
                conn.send(msg).map_err(|err| {
                    log::error!(
                        "Failed to send MIDI msg {} to {port_name}: {err}",
                        crate::bytes::Displayable::from(msg)
                    );
                    err
                })?;
            }
            _ => {
                log::warn!("Attempt to send a msg, but {port_name} is not connected");
                return Err(Error::NotConnected(port_name.clone()));
            }
        }

        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.is_connected() {
            match std::mem::take(self) {
                Self::Connected(conn) => {
                    let io = conn.close();
                    *self = Self::Disconnected(io);
                }
                _ => unreachable!(),
            }
        }
    }
}
