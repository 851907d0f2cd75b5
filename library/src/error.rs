use ufmt::{uDisplay, uWrite, Formatter};

use crate::Axis;

/// Encoder link failures that outlived their retry budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkError {
    /// Every position transfer in the budget came back with a bad checksum.
    ChecksumRetriesExhausted { axis: Axis, attempts: u16 },
    /// The counter node never echoed the reset command.
    ResetNotConfirmed { axis: Axis, attempts: u16 },
}

impl uDisplay for LinkError {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
        where W: uWrite + ?Sized
    {
        match self {
            LinkError::ChecksumRetriesExhausted { axis, attempts } =>
                ufmt::uwrite!(f, "encoder {} checksum failed {} times", axis, attempts),
            LinkError::ResetNotConfirmed { axis, attempts } =>
                ufmt::uwrite!(f, "encoder {} reset unconfirmed after {} tries", axis, attempts),
        }
    }
}

/// Errors a run step hands back to the polling loop. Any of these stops the
/// machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskError {
    Link(LinkError),
    Fault(&'static str),
}

impl From<LinkError> for TaskError {
    fn from(value: LinkError) -> Self {
        TaskError::Link(value)
    }
}

impl uDisplay for TaskError {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
        where W: uWrite + ?Sized
    {
        match self {
            TaskError::Link(e) => ufmt::uwrite!(f, "{}", e),
            TaskError::Fault(message) => f.write_str(message),
        }
    }
}
