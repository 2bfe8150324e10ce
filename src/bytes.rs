use std::{borrow::Cow, fmt};

/// Hex rendering of a raw MIDI buffer, for logs and errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Displayable<'a>(Cow<'a, [u8]>);

impl<'a> From<&'a [u8]> for Displayable<'a> {
    fn from(buf: &'a [u8]) -> Self {
        Self(Cow::Borrowed(buf))
    }
}

impl From<Vec<u8>> for Displayable<'static> {
    fn from(buf: Vec<u8>) -> Self {
        Self(Cow::Owned(buf))
    }
}

impl<'a> Displayable<'a> {
    pub fn to_owned(&self) -> Displayable<'static> {
        Displayable(Cow::Owned(self.0.to_vec()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> fmt::Display for Displayable<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.0.iter();

        match iter.next() {
            Some(first) => write!(f, "(hex): {first:02x}")?,
            None => return f.write_str("(empty)"),
        };

        for val in iter {
            write!(f, " {val:02x}")?;
        }

        Ok(())
    }
}
