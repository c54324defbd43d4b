//! Typed reports for the common AIS message types
//!
//! Fields are exposed as transmitted: integers in the units and scaling of
//! ITU-R M.1371 (longitude and latitude in 1/10000 minute, speed in 1/10 knot,
//! course in 1/10 degree). Converting them is left to the caller.

use crate::armour::PackedPayload;
use crate::bits::BitCursor;
use crate::error::{DecodeError, Result};
use bitfield::bitfield;

bitfield! {
    /// SOTDMA/ITDMA communication state trailing a position report
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct RadioStatus(u32);
    impl Debug;
    /// UTC synchronisation source (0 = direct UTC)
    pub u8, sync_state, _: 18, 17;
    /// Frames until the slot is reallocated
    pub u8, slot_timeout, _: 16, 14;
    /// Slot offset, UTC time or received-station count, depending on timeout
    pub u16, sub_message, _: 13, 0;
}

/// Class A position report (message types 1, 2 and 3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionReport {
    /// 1, 2 or 3
    pub message_type: u8,
    /// Times the message has been repeated
    pub repeat: u8,
    /// Transmitting station
    pub mmsi: u32,
    /// Navigation status (0 = under way using engine, 15 = not defined)
    pub nav_status: u8,
    /// Rate of turn indicator, -128 when not available
    pub rate_of_turn: i8,
    /// 1/10 knot, 1023 when not available
    pub speed_over_ground: u16,
    /// High accuracy (better than 10 m) fix
    pub position_accuracy: bool,
    /// 1/10000 minute, east positive, 181 degrees when not available
    pub longitude: i32,
    /// 1/10000 minute, north positive, 91 degrees when not available
    pub latitude: i32,
    /// 1/10 degree, 3600 when not available
    pub course_over_ground: u16,
    /// Degrees, 511 when not available
    pub true_heading: u16,
    /// UTC second of the fix, 60 and above when not available
    pub timestamp: u8,
    /// Special manoeuvre indicator
    pub maneuver: u8,
    /// Receiver autonomous integrity monitoring in use
    pub raim: bool,
    /// Raw communication state, see [`PositionReport::radio`]
    pub radio_status: u32,
}

impl PositionReport {
    /// Decode a type 1, 2 or 3 payload
    pub fn decode(payload: &PackedPayload) -> Result<Self> {
        let mut c = payload.cursor();
        let message_type = c.read_unsigned(6)? as u8;
        if !(1..=3).contains(&message_type) {
            return Err(DecodeError::UnexpectedType(message_type));
        }
        let repeat = c.read_unsigned(2)? as u8;
        let mmsi = c.read_unsigned(30)?;
        let nav_status = c.read_unsigned(4)? as u8;
        let rate_of_turn = c.read_signed(8)? as i8;
        let speed_over_ground = c.read_unsigned(10)? as u16;
        let position_accuracy = c.read_bool()?;
        let longitude = c.read_signed(28)?;
        let latitude = c.read_signed(27)?;
        let course_over_ground = c.read_unsigned(12)? as u16;
        let true_heading = c.read_unsigned(9)? as u16;
        let timestamp = c.read_unsigned(6)? as u8;
        let maneuver = c.read_unsigned(2)? as u8;
        c.skip(3);
        let raim = c.read_bool()?;
        let radio_status = c.read_unsigned(19)?;

        Ok(PositionReport {
            message_type,
            repeat,
            mmsi,
            nav_status,
            rate_of_turn,
            speed_over_ground,
            position_accuracy,
            longitude,
            latitude,
            course_over_ground,
            true_heading,
            timestamp,
            maneuver,
            raim,
            radio_status,
        })
    }

    /// Typed view of the communication state
    pub fn radio(&self) -> RadioStatus {
        RadioStatus(self.radio_status)
    }
}

/// Static and voyage related data (message type 5)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StaticVoyageData {
    /// Times the message has been repeated
    pub repeat: u8,
    /// Transmitting station
    pub mmsi: u32,
    /// Station compliance with ITU-R M.1371 editions
    pub ais_version: u8,
    /// IMO ship number, 0 when not available
    pub imo: u32,
    /// Radio call sign, padding removed
    pub callsign: String,
    /// Vessel name, padding removed
    pub vessel_name: String,
    /// Ship and cargo type code
    pub ship_type: u8,
    /// Metres from the reference point to the bow
    pub to_bow: u16,
    /// Metres from the reference point to the stern
    pub to_stern: u16,
    /// Metres from the reference point to port
    pub to_port: u8,
    /// Metres from the reference point to starboard
    pub to_starboard: u8,
    /// Type of position fixing device
    pub epfd: u8,
    /// 1-12, 0 when not available
    pub eta_month: u8,
    /// 1-31, 0 when not available
    pub eta_day: u8,
    /// 0-23, 24 when not available
    pub eta_hour: u8,
    /// 0-59, 60 when not available
    pub eta_minute: u8,
    /// 1/10 metre
    pub draught: u8,
    /// Destination, padding removed
    pub destination: String,
    /// Data terminal equipment not ready
    pub dte: bool,
}

impl StaticVoyageData {
    /// Decode a type 5 payload
    pub fn decode(payload: &PackedPayload) -> Result<Self> {
        let mut c = payload.cursor();
        let message_type = c.read_unsigned(6)? as u8;
        if message_type != 5 {
            return Err(DecodeError::UnexpectedType(message_type));
        }
        Self::decode_body(&mut c)
    }

    fn decode_body(c: &mut BitCursor<'_>) -> Result<Self> {
        Ok(StaticVoyageData {
            repeat: c.read_unsigned(2)? as u8,
            mmsi: c.read_unsigned(30)?,
            ais_version: c.read_unsigned(2)? as u8,
            imo: c.read_unsigned(30)?,
            callsign: c.read_string(42)?,
            vessel_name: c.read_string(120)?,
            ship_type: c.read_unsigned(8)? as u8,
            to_bow: c.read_unsigned(9)? as u16,
            to_stern: c.read_unsigned(9)? as u16,
            to_port: c.read_unsigned(6)? as u8,
            to_starboard: c.read_unsigned(6)? as u8,
            epfd: c.read_unsigned(4)? as u8,
            eta_month: c.read_unsigned(4)? as u8,
            eta_day: c.read_unsigned(5)? as u8,
            eta_hour: c.read_unsigned(5)? as u8,
            eta_minute: c.read_unsigned(6)? as u8,
            draught: c.read_unsigned(8)? as u8,
            destination: c.read_string(120)?,
            dte: c.read_bool()?,
        })
    }

    /// Overall length in metres
    pub fn length(&self) -> u16 {
        self.to_bow + self.to_stern
    }
}

/// A decoded payload
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Report {
    /// Types 1, 2 and 3
    Position(PositionReport),
    /// Type 5
    StaticVoyage(StaticVoyageData),
    /// Valid payload of a type without a typed decoder
    Unsupported { message_type: u8, mmsi: u32 },
}

impl Report {
    /// MMSI of the transmitting station
    pub fn mmsi(&self) -> u32 {
        match self {
            Report::Position(p) => p.mmsi,
            Report::StaticVoyage(s) => s.mmsi,
            Report::Unsupported { mmsi, .. } => *mmsi,
        }
    }
}

/// Dispatch on the message type and decode `payload`
pub fn decode_report(payload: &PackedPayload) -> Result<Report> {
    match payload.message_type()? {
        1..=3 => PositionReport::decode(payload).map(Report::Position),
        5 => StaticVoyageData::decode(payload).map(Report::StaticVoyage),
        message_type => {
            let mut c = BitCursor::at(payload, 8);
            Ok(Report::Unsupported {
                message_type,
                mmsi: c.read_unsigned(30)?,
            })
        }
    }
}
