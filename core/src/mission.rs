use std::fmt;

use time::Time;

use crate::patch::TeamPatch;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MissionError {
    #[error("unknown mission {0}")]
    Unknown(String),
    #[error("mission {id} unlocks at {unlock_at}")]
    Locked { id: String, unlock_at: UnlockTime },
    #[error("mission {id} already completed {max_count} times")]
    Exhausted { id: String, max_count: u32 },
    #[error("invalid time of day {0:?}, expected HH:MM")]
    BadTime(String),
}

/// Local wall-clock time from which a mission can be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnlockTime {
    hour: u8,
    minute: u8,
}

impl UnlockTime {
    pub const fn new(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }

    pub fn parse(value: &str) -> Result<Self, MissionError> {
        let bad = || MissionError::BadTime(value.to_string());
        let (hour, minute) = value.trim().split_once(':').ok_or_else(bad)?;
        let hour = hour.parse::<u8>().map_err(|_| bad())?;
        let minute = minute.parse::<u8>().map_err(|_| bad())?;
        if hour > 23 || minute > 59 {
            return Err(bad());
        }
        Ok(Self { hour, minute })
    }

    pub fn is_reached(&self, now: Time) -> bool {
        (now.hour(), now.minute()) >= (self.hour, self.minute)
    }
}

impl fmt::Display for UnlockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissionDef {
    pub id: &'static str,
    pub label: &'static str,
    pub points: u32,
    /// `None` means always unlocked.
    pub unlock_at: Option<UnlockTime>,
    /// `None` means unlimited completions.
    pub max_count: Option<u32>,
}

impl MissionDef {
    pub const fn new(id: &'static str, label: &'static str, points: u32) -> Self {
        Self {
            id,
            label,
            points,
            unlock_at: None,
            max_count: None,
        }
    }

    pub const fn unlocks_at(mut self, unlock_at: UnlockTime) -> Self {
        self.unlock_at = Some(unlock_at);
        self
    }

    pub const fn capped_at(mut self, max_count: u32) -> Self {
        self.max_count = Some(max_count);
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MissionCategory {
    pub title: &'static str,
    pub points: u32,
    pub missions: &'static [MissionDef],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionAvailability {
    Locked { unlock_at: UnlockTime },
    Available { remaining: Option<u32> },
    Exhausted { max_count: u32 },
}

impl MissionAvailability {
    pub fn is_actionable(&self) -> bool {
        matches!(self, MissionAvailability::Available { .. })
    }
}

pub fn availability(def: &MissionDef, count: u32, now: Time) -> MissionAvailability {
    if let Some(unlock_at) = def.unlock_at {
        if !unlock_at.is_reached(now) {
            return MissionAvailability::Locked { unlock_at };
        }
    }
    match def.max_count {
        Some(max_count) if count >= max_count => MissionAvailability::Exhausted { max_count },
        Some(max_count) => MissionAvailability::Available {
            remaining: Some(max_count - count),
        },
        None => MissionAvailability::Available { remaining: None },
    }
}

/// Increments for one completion: coins by the mission's points, its counter by one.
pub fn completion_patch(
    def: &MissionDef,
    count: u32,
    now: Time,
) -> Result<TeamPatch, MissionError> {
    match availability(def, count, now) {
        MissionAvailability::Locked { unlock_at } => Err(MissionError::Locked {
            id: def.id.to_string(),
            unlock_at,
        }),
        MissionAvailability::Exhausted { max_count } => Err(MissionError::Exhausted {
            id: def.id.to_string(),
            max_count,
        }),
        MissionAvailability::Available { .. } => Ok(TeamPatch::new()
            .increment_coins(i64::from(def.points))
            .increment_mission(def.id, 1)),
    }
}

const BASIC_MISSIONS: &[MissionDef] = &[
    MissionDef::new("m10_1", "Write a prayer", 10),
    MissionDef::new("m10_2", "Start 10 conversations", 10),
    MissionDef::new("m10_3", "Send 10 messages", 10),
    MissionDef::new("m10_4", "Visit the base", 10),
    MissionDef::new("m10_5", "Check in on an acquaintance", 10),
    MissionDef::new("m10_6", "Join one outreach session", 10),
    MissionDef::new("m10_7", "Write a year-end thank-you card", 10),
    MissionDef::new("m10_8", "Compliment teammates three times", 10),
    MissionDef::new("m10_9", "Make one stop", 10),
    MissionDef::new("m10_10", "Share three year-end bucket list items", 10),
];

const CHALLENGE_MISSIONS: &[MissionDef] = &[
    MissionDef::new("m30_1", "Find one new contact", 30),
    MissionDef::new("m30_2", "Revisit the base after a gathering", 30),
    MissionDef::new("m30_3", "Take three festive photos", 30),
    MissionDef::new("m30_4", "Give a teammate a present", 30),
    MissionDef::new("m30_5", "Complete one leaf", 30),
    MissionDef::new("m30_6", "Write a year-end thank-you letter", 30),
];

const SPECIAL_MISSIONS: &[MissionDef] = &[MissionDef::new("m50_1", "Confirmed referral", 50)];

const BONUS_MISSIONS: &[MissionDef] = &[
    MissionDef::new("mb_1", "Find five red items", 30)
        .unlocks_at(UnlockTime::new(19, 0))
        .capped_at(1),
    MissionDef::new("mb_2", "Photo of a human tree", 30)
        .unlocks_at(UnlockTime::new(20, 0))
        .capped_at(1),
    MissionDef::new("mb_3", "Team photo in the mascot pose", 30)
        .unlocks_at(UnlockTime::new(20, 30))
        .capped_at(1),
    MissionDef::new("mb_4", "Carol title quiz", 30)
        .unlocks_at(UnlockTime::new(21, 0))
        .capped_at(1),
];

pub const MISSION_CATALOG: &[MissionCategory] = &[
    MissionCategory {
        title: "Basic",
        points: 10,
        missions: BASIC_MISSIONS,
    },
    MissionCategory {
        title: "Challenge",
        points: 30,
        missions: CHALLENGE_MISSIONS,
    },
    MissionCategory {
        title: "Special",
        points: 50,
        missions: SPECIAL_MISSIONS,
    },
    MissionCategory {
        title: "Bonus",
        points: 30,
        missions: BONUS_MISSIONS,
    },
];

pub fn mission_by_id(id: &str) -> Option<&'static MissionDef> {
    MISSION_CATALOG
        .iter()
        .flat_map(|category| category.missions.iter())
        .find(|mission| mission.id == id)
}
