use core::iter::once;

use ufmt::{uDisplay, uWrite, Formatter};

use crate::config::{CMD_READ_CHANNEL_1, CMD_READ_CHANNEL_2, CMD_RESET_CHANNEL_1, CMD_RESET_CHANNEL_2};

/// One motor/encoder pair of the polar plotter. Radius drives the carriage
/// along the arm, angle swings the arm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Axis { Radius, Angle }
pub static AXIS_LIST: [Axis; 2] = [Axis::Radius, Axis::Angle];

impl Axis {
    /// Channel number on the encoder link and motor number on the H-bridge.
    pub fn channel(self) -> u8 {
        match self {
            Axis::Radius => 1,
            Axis::Angle => 2,
        }
    }

    pub fn from_channel(channel: u8) -> Option<Self> {
        match channel {
            1 => Some(Axis::Radius),
            2 => Some(Axis::Angle),
            _ => None,
        }
    }

    pub fn read_command(self) -> u8 {
        match self {
            Axis::Radius => CMD_READ_CHANNEL_1,
            Axis::Angle => CMD_READ_CHANNEL_2,
        }
    }

    pub fn reset_command(self) -> u8 {
        match self {
            Axis::Radius => CMD_RESET_CHANNEL_1,
            Axis::Angle => CMD_RESET_CHANNEL_2,
        }
    }
}

impl uDisplay for Axis {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
        where W: uWrite + ?Sized
    {
        match self {
            Axis::Radius => f.write_str("r"),
            Axis::Angle => f.write_str("theta"),
        }
    }
}

/// A value per axis.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AxisData<T> {
    pub radius: T,
    pub angle: T,
}

impl<T> AxisData<T> {
    pub fn from_clone(state: T) -> Self where T: Clone {
        Self {
            radius: state.clone(),
            angle: state,
        }
    }
    pub fn iter(&self) -> impl Iterator<Item=&T> {
        once(&self.radius).chain(once(&self.angle))
    }
    pub fn iter_mut(&mut self) -> impl Iterator<Item=&mut T> {
        once(&mut self.radius).chain(once(&mut self.angle))
    }
    pub fn match_id(&self, id: Axis) -> &T {
        match id {
            Axis::Radius => &self.radius,
            Axis::Angle => &self.angle,
        }
    }
    pub fn match_id_mut(&mut self, id: Axis) -> &mut T {
        match id {
            Axis::Radius => &mut self.radius,
            Axis::Angle => &mut self.angle,
        }
    }

    pub fn all(&self, predicate: impl Fn(&T) -> bool) -> bool {
        predicate(&self.radius) && predicate(&self.angle)
    }

    pub fn map<TR>(&self, p: impl Fn(&T) -> TR) -> AxisData<TR> {
        AxisData { radius: p(&self.radius), angle: p(&self.angle) }
    }
}
