//! MIDI utilities and message types
//!
//! Provides MIDI message parsing, encoding and the validated channel type.

use std::fmt;

use crate::error::{Error, Result};

/// Status nibble of a Control Change message
pub const CONTROL_CHANGE: u8 = 0xB0;

/// A MIDI channel, 0-15 internally and 1-16 when shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(u8);

impl Channel {
    /// Build from a zero-based channel number (0-15)
    pub fn new(channel: u8) -> Result<Self> {
        if channel <= 0x0F {
            Ok(Self(channel))
        } else {
            Err(Error::InvalidChannel(i64::from(channel) + 1))
        }
    }

    /// Build from the user-facing channel number (1-16)
    pub fn from_user(channel: i64) -> Result<Self> {
        if (1..=16).contains(&channel) {
            Ok(Self((channel - 1) as u8))
        } else {
            Err(Error::InvalidChannel(channel))
        }
    }

    /// Zero-based channel number
    pub fn index(self) -> u8 {
        self.0
    }

    /// One-based channel number as presented to users
    pub fn user(self) -> u8 {
        self.0 + 1
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user())
    }
}

/// MIDI message types
///
/// Values are immutable: the `with_*` helpers return a new message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (0-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Polyphonic Key Pressure: channel (0-15), note (0-127), pressure (0-127)
    PolyPressure { channel: u8, note: u8, pressure: u8 },

    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },

    /// Channel Pressure: channel (0-15), pressure (0-127)
    ChannelPressure { channel: u8, pressure: u8 },

    /// Pitch Bend: channel (0-15), value (0-16383, 14-bit)
    PitchBend { channel: u8, value: u16 },

    /// System Exclusive payload, without the F0/F7 framing
    SysEx { data: Vec<u8> },

    /// MIDI Time Code Quarter Frame
    MidiTimeCode { data: u8 },

    /// Song Position Pointer
    SongPosition { position: u16 },

    /// Song Select
    SongSelect { song: u8 },

    TuneRequest,
    TimingClock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    SystemReset,

    /// Anything we do not decode (undefined status, running status, truncated data).
    /// Forwarded byte for byte.
    Other { bytes: Vec<u8> },
}

fn data_bytes_valid(data: &[u8]) -> bool {
    data.iter().all(|&b| b & 0x80 == 0)
}

impl MidiMessage {
    /// Parse a MIDI message from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;

        // Running status (data byte first) needs the previous status; not decoded
        if status < 0x80 {
            return None;
        }

        // Channel messages (0x80-0xEF)
        if status < 0xF0 {
            let message_type = status & 0xF0;
            let channel = status & 0x0F;
            let needed = match message_type {
                0xC0 | 0xD0 => 1,
                _ => 2,
            };
            // Trailing bytes would be lost on re-encode; keep such input raw
            if rest.len() != needed || !data_bytes_valid(rest) {
                return None;
            }

            let msg = match message_type {
                0x80 => MidiMessage::NoteOff {
                    channel,
                    note: rest[0],
                    velocity: rest[1],
                },
                // Velocity 0 stays a Note On so the status byte is forwarded as received
                0x90 => MidiMessage::NoteOn {
                    channel,
                    note: rest[0],
                    velocity: rest[1],
                },
                0xA0 => MidiMessage::PolyPressure {
                    channel,
                    note: rest[0],
                    pressure: rest[1],
                },
                0xB0 => MidiMessage::ControlChange {
                    channel,
                    cc: rest[0],
                    value: rest[1],
                },
                0xC0 => MidiMessage::ProgramChange {
                    channel,
                    program: rest[0],
                },
                0xD0 => MidiMessage::ChannelPressure {
                    channel,
                    pressure: rest[0],
                },
                0xE0 => {
                    let lsb = rest[0] as u16;
                    let msb = rest[1] as u16;
                    MidiMessage::PitchBend {
                        channel,
                        value: (msb << 7) | lsb,
                    }
                }
                _ => return None,
            };
            Some(msg)
        } else {
            // System messages (0xF0-0xFF)
            match status {
                0xF0 => {
                    // Framed SysEx only: F0 ... F7 with nothing trailing
                    let (&last, body) = rest.split_last()?;
                    if last != 0xF7 || !data_bytes_valid(body) {
                        return None;
                    }
                    Some(MidiMessage::SysEx {
                        data: body.to_vec(),
                    })
                }
                0xF1 => match *rest {
                    [data] if data & 0x80 == 0 => Some(MidiMessage::MidiTimeCode { data }),
                    _ => None,
                },
                0xF2 => {
                    if rest.len() != 2 || !data_bytes_valid(rest) {
                        return None;
                    }
                    let lsb = rest[0] as u16;
                    let msb = rest[1] as u16;
                    Some(MidiMessage::SongPosition {
                        position: (msb << 7) | lsb,
                    })
                }
                0xF3 => match *rest {
                    [song] if song & 0x80 == 0 => Some(MidiMessage::SongSelect { song }),
                    _ => None,
                },
                _ if !rest.is_empty() => None,
                0xF6 => Some(MidiMessage::TuneRequest),
                0xF8 => Some(MidiMessage::TimingClock),
                0xFA => Some(MidiMessage::Start),
                0xFB => Some(MidiMessage::Continue),
                0xFC => Some(MidiMessage::Stop),
                0xFE => Some(MidiMessage::ActiveSensing),
                0xFF => Some(MidiMessage::SystemReset),
                _ => None,
            }
        }
    }

    /// Decode raw bytes, keeping anything undecodable as [`MidiMessage::Other`]
    pub fn from_bytes(data: &[u8]) -> Self {
        Self::parse(data).unwrap_or_else(|| MidiMessage::Other {
            bytes: data.to_vec(),
        })
    }

    /// Encode the message to MIDI bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => vec![0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            MidiMessage::PolyPressure {
                channel,
                note,
                pressure,
            } => vec![0xA0 | (channel & 0x0F), note & 0x7F, pressure & 0x7F],
            MidiMessage::ControlChange { channel, cc, value } => {
                vec![CONTROL_CHANGE | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                vec![0xD0 | (channel & 0x0F), pressure & 0x7F]
            }
            MidiMessage::PitchBend { channel, value } => {
                let lsb = (value & 0x7F) as u8;
                let msb = ((value >> 7) & 0x7F) as u8;
                vec![0xE0 | (channel & 0x0F), lsb, msb]
            }
            MidiMessage::SysEx { ref data } => {
                let mut result = Vec::with_capacity(data.len() + 2);
                result.push(0xF0);
                result.extend_from_slice(data);
                result.push(0xF7);
                result
            }
            MidiMessage::MidiTimeCode { data } => vec![0xF1, data],
            MidiMessage::SongPosition { position } => {
                vec![0xF2, (position & 0x7F) as u8, ((position >> 7) & 0x7F) as u8]
            }
            MidiMessage::SongSelect { song } => vec![0xF3, song & 0x7F],
            MidiMessage::TuneRequest => vec![0xF6],
            MidiMessage::TimingClock => vec![0xF8],
            MidiMessage::Start => vec![0xFA],
            MidiMessage::Continue => vec![0xFB],
            MidiMessage::Stop => vec![0xFC],
            MidiMessage::ActiveSensing => vec![0xFE],
            MidiMessage::SystemReset => vec![0xFF],
            MidiMessage::Other { ref bytes } => bytes.clone(),
        }
    }

    /// Status byte as it goes on the wire (0 for an empty `Other`)
    pub fn status(&self) -> u8 {
        match self {
            MidiMessage::Other { bytes } => bytes.first().copied().unwrap_or(0),
            MidiMessage::SysEx { .. } => 0xF0,
            other => other.to_bytes()[0],
        }
    }

    /// Get the channel for channel messages (0-15), None for everything else
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOff { channel, .. }
            | MidiMessage::NoteOn { channel, .. }
            | MidiMessage::PolyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// First data byte, if the message kind carries one
    pub fn data1(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOff { note, .. }
            | MidiMessage::NoteOn { note, .. }
            | MidiMessage::PolyPressure { note, .. } => Some(note),
            MidiMessage::ControlChange { cc, .. } => Some(cc),
            MidiMessage::ProgramChange { program, .. } => Some(program),
            MidiMessage::ChannelPressure { pressure, .. } => Some(pressure),
            MidiMessage::PitchBend { value, .. } => Some((value & 0x7F) as u8),
            MidiMessage::MidiTimeCode { data } => Some(data),
            MidiMessage::SongPosition { position } => Some((position & 0x7F) as u8),
            MidiMessage::SongSelect { song } => Some(song),
            _ => None,
        }
    }

    /// Second data byte, if the message kind carries one
    pub fn data2(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOff { velocity, .. } | MidiMessage::NoteOn { velocity, .. } => {
                Some(velocity)
            }
            MidiMessage::PolyPressure { pressure, .. } => Some(pressure),
            MidiMessage::ControlChange { value, .. } => Some(value),
            MidiMessage::PitchBend { value, .. } => Some(((value >> 7) & 0x7F) as u8),
            MidiMessage::SongPosition { position } => Some(((position >> 7) & 0x7F) as u8),
            _ => None,
        }
    }

    /// Check if this is a channel message
    pub fn is_channel_message(&self) -> bool {
        self.channel().is_some()
    }

    /// Same message on another channel. Non-channel messages are returned as-is.
    pub fn with_channel(&self, channel: Channel) -> Self {
        let ch = channel.index();
        match *self {
            MidiMessage::NoteOff { note, velocity, .. } => MidiMessage::NoteOff {
                channel: ch,
                note,
                velocity,
            },
            MidiMessage::NoteOn { note, velocity, .. } => MidiMessage::NoteOn {
                channel: ch,
                note,
                velocity,
            },
            MidiMessage::PolyPressure { note, pressure, .. } => MidiMessage::PolyPressure {
                channel: ch,
                note,
                pressure,
            },
            MidiMessage::ControlChange { cc, value, .. } => MidiMessage::ControlChange {
                channel: ch,
                cc,
                value,
            },
            MidiMessage::ProgramChange { program, .. } => MidiMessage::ProgramChange {
                channel: ch,
                program,
            },
            MidiMessage::ChannelPressure { pressure, .. } => MidiMessage::ChannelPressure {
                channel: ch,
                pressure,
            },
            MidiMessage::PitchBend { value, .. } => MidiMessage::PitchBend { channel: ch, value },
            ref other => other.clone(),
        }
    }

    /// Same Control Change with another controller number; other kinds are returned as-is
    pub fn with_controller(&self, controller: u8) -> Self {
        match *self {
            MidiMessage::ControlChange { channel, value, .. } => MidiMessage::ControlChange {
                channel,
                cc: controller,
                value,
            },
            ref other => other.clone(),
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity),
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity),
            MidiMessage::PolyPressure {
                channel,
                note,
                pressure,
            } => write!(f, "PolyPressure ch:{} n:{} p:{}", channel + 1, note, pressure),
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "ProgramChange ch:{} p:{}", channel + 1, program)
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                write!(f, "ChannelPressure ch:{} p:{}", channel + 1, pressure)
            }
            MidiMessage::PitchBend { channel, value } => {
                write!(f, "PitchBend ch:{} v:{}", channel + 1, value)
            }
            MidiMessage::SysEx { ref data } => write!(f, "SysEx {} bytes", data.len()),
            MidiMessage::Other { ref bytes } => write!(f, "Raw [{}]", format_hex(bytes)),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
