//! punishment records, stored through their own adapter.
//!
//! Only the data model lives here; issuing and enforcing punishments is the
//! business of the callers. The wire layout is owned by
//! [`PunishmentAdapter`](crate::mapping::adapters::PunishmentAdapter).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use crate::entity::Entity;
use crate::mapping::{Datum, DomainValue, Field, MappingError, MappingResult, TypeDescriptor};

/// type name the punishment adapter claims
pub const PUNISHMENT_TYPE_NAME: &str = "Punishment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PunishmentType {
    Ban,
    Mute,
    Kick,
    Warn,
}

impl PunishmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PunishmentType::Ban => "BAN",
            PunishmentType::Mute => "MUTE",
            PunishmentType::Kick => "KICK",
            PunishmentType::Warn => "WARN",
        }
    }

    /// kicks are instantaneous and never carry a duration
    pub fn supports_duration(&self) -> bool {
        !matches!(self, PunishmentType::Kick)
    }
}

impl fmt::Display for PunishmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PunishmentType {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BAN" => Ok(PunishmentType::Ban),
            "MUTE" => Ok(PunishmentType::Mute),
            "KICK" => Ok(PunishmentType::Kick),
            "WARN" => Ok(PunishmentType::Warn),
            other => Err(invalid(format!("unknown punishment type '{other}'"))),
        }
    }
}

/// who or what is being punished
#[derive(Debug, Clone, PartialEq)]
pub enum PunishmentTarget {
    Player {
        uuid: Uuid,
        name: String,
        last_seen: Option<DateTime<Utc>>,
    },
    IpAddress {
        address: String,
        /// the player the address was resolved from, when known
        player: Option<(Uuid, String)>,
        last_seen: Option<DateTime<Utc>>,
    },
}

impl PunishmentTarget {
    pub fn player(uuid: Uuid, name: impl Into<String>) -> Self {
        PunishmentTarget::Player {
            uuid,
            name: name.into(),
            last_seen: None,
        }
    }

    pub fn ip(address: impl Into<String>) -> Self {
        PunishmentTarget::IpAddress {
            address: address.into(),
            player: None,
            last_seen: None,
        }
    }

    pub fn player_ip(uuid: Uuid, name: impl Into<String>, address: impl Into<String>) -> Self {
        PunishmentTarget::IpAddress {
            address: address.into(),
            player: Some((uuid, name.into())),
            last_seen: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PunishmentTarget::Player { .. } => "PLAYER",
            PunishmentTarget::IpAddress { .. } => "IP_ADDRESS",
        }
    }

    /// display name: the player name, or the address for anonymous ip targets
    pub fn name(&self) -> &str {
        match self {
            PunishmentTarget::Player { name, .. } => name,
            PunishmentTarget::IpAddress {
                player: Some((_, name)),
                ..
            } => name,
            PunishmentTarget::IpAddress { address, .. } => address,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PunishmentIssuer {
    Console,
    Player { uuid: Uuid, name: String },
}

impl PunishmentIssuer {
    pub const CONSOLE_NAME: &'static str = "Console";

    pub fn kind(&self) -> &'static str {
        match self {
            PunishmentIssuer::Console => "CONSOLE",
            PunishmentIssuer::Player { .. } => "PLAYER",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PunishmentIssuer::Console => Self::CONSOLE_NAME,
            PunishmentIssuer::Player { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevocationInfo {
    pub revoker: PunishmentIssuer,
    pub revoked_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Punishment {
    pub id: String,
    pub kind: PunishmentType,
    pub target: PunishmentTarget,
    pub issuer: PunishmentIssuer,
    pub reason: Option<String>,
    pub issued_at: DateTime<Utc>,
    /// `None` for permanent punishments
    pub duration: Option<Duration>,
    pub revocation: Option<RevocationInfo>,
    pub notes: Vec<String>,
}

impl Punishment {
    /// a new permanent punishment issued now; the id is assigned on save
    pub fn new(kind: PunishmentType, target: PunishmentTarget, issuer: PunishmentIssuer) -> Self {
        Self {
            id: String::new(),
            kind,
            target,
            issuer,
            reason: None,
            issued_at: now_millis(),
            duration: None,
            revocation: None,
            notes: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = (duration > Duration::zero()).then_some(duration);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn is_permanent(&self) -> bool {
        self.duration.is_none()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.duration.map(|d| self.issued_at + d)
    }

    pub fn is_revoked(&self) -> bool {
        self.revocation.is_some()
    }

    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        !self.is_revoked() && self.expires_at().map_or(true, |expiry| at < expiry)
    }

    pub fn revoke(&mut self, revoker: PunishmentIssuer, reason: Option<String>) {
        self.revocation = Some(RevocationInfo {
            revoker,
            revoked_at: now_millis(),
            reason,
        });
    }
}

impl Field for Punishment {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Domain(PUNISHMENT_TYPE_NAME)
    }

    fn to_datum(&self) -> Datum {
        Datum::Domain(DomainValue::new(PUNISHMENT_TYPE_NAME, self.clone()))
    }

    fn from_datum(datum: Datum) -> MappingResult<Self> {
        match datum {
            Datum::Domain(value) => value
                .downcast_ref::<Punishment>()
                .cloned()
                .ok_or_else(|| Datum::Domain(value.clone()).mismatch(PUNISHMENT_TYPE_NAME)),
            other => Err(other.mismatch(PUNISHMENT_TYPE_NAME)),
        }
    }
}

impl Entity for Punishment {
    type Id = String;

    fn id(&self) -> Option<String> {
        (!self.id.is_empty()).then(|| self.id.clone())
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// current time truncated to the millisecond precision stored on the wire
pub fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

fn invalid(reason: String) -> MappingError {
    MappingError::InvalidValue {
        type_name: PUNISHMENT_TYPE_NAME,
        reason,
    }
}

const UNITS: [(char, i64); 5] = [('w', 604_800), ('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)];

/// Compact form of a duration, e.g. `1d2h30m`.
///
/// Permanent punishments are written as the empty string.
pub fn format_duration(duration: Option<Duration>) -> String {
    let mut remaining = match duration {
        Some(d) if d > Duration::zero() => d.num_seconds(),
        _ => return String::new(),
    };

    let mut out = String::new();
    for (unit, seconds) in UNITS {
        let count = remaining / seconds;
        if count > 0 {
            out.push_str(&count.to_string());
            out.push(unit);
            remaining %= seconds;
        }
    }
    if out.is_empty() {
        out.push_str("0s");
    }
    out
}

/// parse the compact form written by [`format_duration`]
pub fn parse_duration(text: &str) -> MappingResult<Option<Duration>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let mut total = 0_i64;
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let seconds = UNITS
            .iter()
            .find(|(unit, _)| *unit == c.to_ascii_lowercase())
            .map(|(_, seconds)| *seconds)
            .ok_or_else(|| invalid(format!("unknown duration unit '{c}' in '{text}'")))?;
        let count: i64 = digits
            .parse()
            .map_err(|_| invalid(format!("malformed duration '{text}'")))?;
        total += count * seconds;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(invalid(format!("duration '{text}' is missing a unit")));
    }

    Ok((total > 0).then(|| Duration::seconds(total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_format_round_trip() {
        let d = Duration::days(1) + Duration::hours(2) + Duration::minutes(30);
        assert_eq!(format_duration(Some(d)), "1d2h30m");
        assert_eq!(parse_duration("1d2h30m").unwrap(), Some(d));
        assert_eq!(format_duration(Some(Duration::days(14))), "2w");
        assert_eq!(format_duration(None), "");
        assert_eq!(parse_duration("").unwrap(), None);
    }

    #[test]
    fn test_duration_parse_errors() {
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("h").is_err());
    }

    #[test]
    fn test_expiry_and_revocation() {
        let mut ban = Punishment::new(
            PunishmentType::Ban,
            PunishmentTarget::player(Uuid::new_v4(), "griefer"),
            PunishmentIssuer::Console,
        )
        .with_duration(Duration::hours(1));

        let expiry = ban.expires_at().unwrap();
        assert!(ban.is_active_at(ban.issued_at));
        assert!(!ban.is_active_at(expiry));

        ban.revoke(PunishmentIssuer::Console, Some("appeal accepted".into()));
        assert!(!ban.is_active_at(ban.issued_at));
    }

    #[test]
    fn test_zero_duration_is_permanent() {
        let warn = Punishment::new(
            PunishmentType::Warn,
            PunishmentTarget::ip("10.0.0.1"),
            PunishmentIssuer::Console,
        )
        .with_duration(Duration::zero());
        assert!(warn.is_permanent());
        assert_eq!(warn.target.name(), "10.0.0.1");
    }
}
