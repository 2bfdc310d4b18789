use std::fmt;

pub const TEAM_KEY_PREFIX: &str = "team_";
pub const TEAM_ID_MIN: u8 = 1;
pub const TEAM_ID_MAX: u8 = 99;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TeamIdError {
    #[error("team id must be a number, got {0:?}")]
    NotANumber(String),
    #[error("team id {0} is outside 1..=99")]
    OutOfRange(u32),
    #[error("team key {0:?} must look like team_01")]
    MalformedKey(String),
    #[error("team {team} has no zone {zone}")]
    NoSuchZone { team: u8, zone: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TeamId(u8);

impl TeamId {
    pub fn new(value: u32) -> Result<Self, TeamIdError> {
        if value < u32::from(TEAM_ID_MIN) || value > u32::from(TEAM_ID_MAX) {
            return Err(TeamIdError::OutOfRange(value));
        }
        Ok(Self(value as u8))
    }

    pub fn parse(value: &str) -> Result<Self, TeamIdError> {
        let trimmed = value.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(TeamIdError::NotANumber(value.to_string()));
        }
        let number = trimmed
            .parse::<u32>()
            .map_err(|_| TeamIdError::NotANumber(value.to_string()))?;
        Self::new(number)
    }

    /// Document key shared by every client of the team, e.g. `team_01`.
    pub fn key(&self) -> String {
        format!("{TEAM_KEY_PREFIX}{:02}", self.0)
    }

    pub fn from_key(key: &str) -> Result<Self, TeamIdError> {
        let digits = key
            .strip_prefix(TEAM_KEY_PREFIX)
            .filter(|rest| rest.len() == 2)
            .ok_or_else(|| TeamIdError::MalformedKey(key.to_string()))?;
        Self::parse(digits).map_err(|_| TeamIdError::MalformedKey(key.to_string()))
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    pub fn zone_count(&self) -> u8 {
        if self.0 == 1 {
            6
        } else {
            5
        }
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TeamId {
    type Err = TeamIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

pub fn is_valid_team_key(key: &str) -> bool {
    TeamId::from_key(key).is_ok()
}

/// Area within a team. Informational only, never part of the document key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Zone {
    team: TeamId,
    zone: u8,
}

impl Zone {
    pub fn new(team: TeamId, zone: u8) -> Result<Self, TeamIdError> {
        if zone == 0 || zone > team.zone_count() {
            return Err(TeamIdError::NoSuchZone {
                team: team.get(),
                zone,
            });
        }
        Ok(Self { team, zone })
    }

    pub fn team(&self) -> TeamId {
        self.team
    }

    pub fn get(&self) -> u8 {
        self.zone
    }
}
