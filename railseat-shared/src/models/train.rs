use serde::{Deserialize, Serialize};
use std::fmt;

/// Vehicle type of a train. Determines which seat classes it carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleType {
    HighSpeed,
    Bullet,
    Regular,
}

impl VehicleType {
    pub fn code(self) -> i16 {
        match self {
            VehicleType::HighSpeed => 0,
            VehicleType::Bullet => 1,
            VehicleType::Regular => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(VehicleType::HighSpeed),
            1 => Some(VehicleType::Bullet),
            2 => Some(VehicleType::Regular),
            _ => None,
        }
    }

    /// Seat classes sold on this vehicle type, in display order.
    pub fn seat_classes(self) -> &'static [SeatClass] {
        match self {
            VehicleType::HighSpeed => &[
                SeatClass::BusinessClass,
                SeatClass::FirstClass,
                SeatClass::SecondClass,
            ],
            VehicleType::Bullet => &[
                SeatClass::SecondClassCabinSeat,
                SeatClass::FirstSleeper,
                SeatClass::SecondSleeper,
                SeatClass::NoSeat,
            ],
            VehicleType::Regular => &[
                SeatClass::SoftSleeper,
                SeatClass::HardSleeper,
                SeatClass::HardSeat,
                SeatClass::NoSeat,
            ],
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VehicleType::HighSpeed => "HIGH_SPEED",
            VehicleType::Bullet => "BULLET",
            VehicleType::Regular => "REGULAR",
        };
        f.write_str(name)
    }
}

/// Seat class. Declaration order matches the numeric code and is the
/// order in which per-class locks are taken.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatClass {
    BusinessClass,
    FirstClass,
    SecondClass,
    SecondClassCabinSeat,
    FirstSleeper,
    SecondSleeper,
    SoftSleeper,
    HardSleeper,
    HardSeat,
    NoSeat,
}

impl SeatClass {
    pub const ALL: [SeatClass; 10] = [
        SeatClass::BusinessClass,
        SeatClass::FirstClass,
        SeatClass::SecondClass,
        SeatClass::SecondClassCabinSeat,
        SeatClass::FirstSleeper,
        SeatClass::SecondSleeper,
        SeatClass::SoftSleeper,
        SeatClass::HardSleeper,
        SeatClass::HardSeat,
        SeatClass::NoSeat,
    ];

    pub fn code(self) -> i16 {
        match self {
            SeatClass::BusinessClass => 0,
            SeatClass::FirstClass => 1,
            SeatClass::SecondClass => 2,
            SeatClass::SecondClassCabinSeat => 3,
            SeatClass::FirstSleeper => 4,
            SeatClass::SecondSleeper => 5,
            SeatClass::SoftSleeper => 6,
            SeatClass::HardSleeper => 7,
            SeatClass::HardSeat => 8,
            SeatClass::NoSeat => 9,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.iter().copied().find(|class| class.code() == code)
    }
}

impl fmt::Display for SeatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SeatClass::BusinessClass => "BUSINESS_CLASS",
            SeatClass::FirstClass => "FIRST_CLASS",
            SeatClass::SecondClass => "SECOND_CLASS",
            SeatClass::SecondClassCabinSeat => "SECOND_CLASS_CABIN_SEAT",
            SeatClass::FirstSleeper => "FIRST_SLEEPER",
            SeatClass::SecondSleeper => "SECOND_SLEEPER",
            SeatClass::SoftSleeper => "SOFT_SLEEPER",
            SeatClass::HardSleeper => "HARD_SLEEPER",
            SeatClass::HardSeat => "HARD_SEAT",
            SeatClass::NoSeat => "NO_SEAT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Train {
    pub id: String,
    pub train_number: String,
    pub vehicle_type: VehicleType,
    pub start_station: String,
    pub end_station: String,
}

/// A sellable (origin, destination) pair within a train's route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    pub origin: String,
    pub destination: String,
}

impl Segment {
    pub fn new(origin: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            destination: destination.into(),
        }
    }

    /// `{train}_{origin}_{destination}`, the suffix shared by every per-segment cache key.
    pub fn key_suffix(&self, train_id: &str) -> String {
        format!("{}_{}_{}", train_id, self.origin, self.destination)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.origin, self.destination)
    }
}
