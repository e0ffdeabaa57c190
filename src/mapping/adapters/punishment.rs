//! Punishment adapter.
//!
//! Registered ahead of every generic adapter so punishments always use this
//! layout:
//!
//! ```text
//! {
//!   "id": "...", "type": "BAN", "reason": "...",
//!   "target": {"type": "PLAYER", "uuid": "...", "name": "...", "lastSeen": 0},
//!   "issuer": {"type": "PLAYER", "name": "...", "uuid": "..."},
//!   "issuedAt": 1700000000000, "duration": "1d", "expiresAt": 1700086400000,
//!   "revoke-info": {"revokerUUID": "...", "revokerName": "...", "revokedAt": 0, "revokeReason": "..."},
//!   "notes": ["..."]
//! }
//! ```

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::mapping::{
    Datum, DeserializationContext, DomainValue, MappingError, MappingResult, SerializationContext,
    TypeAdapter, TypeDescriptor,
};
use crate::punishment::{
    format_duration, from_millis, parse_duration, Punishment, PunishmentIssuer, PunishmentTarget,
    RevocationInfo, PUNISHMENT_TYPE_NAME,
};

const ID: &str = "id";
const TYPE: &str = "type";
const TARGET: &str = "target";
const ISSUER: &str = "issuer";
const REASON: &str = "reason";
const ISSUED_AT: &str = "issuedAt";
const DURATION: &str = "duration";
const EXPIRES_AT: &str = "expiresAt";
const REVOCATION: &str = "revoke-info";
const NOTES: &str = "notes";

const UUID: &str = "uuid";
const NAME: &str = "name";
const IP_ADDRESS: &str = "ipAddress";
const LAST_SEEN: &str = "lastSeen";
const PLAYER_DATA: &str = "playerData";

const REVOKER_UUID: &str = "revokerUUID";
const REVOKER_NAME: &str = "revokerName";
const REVOKED_AT: &str = "revokedAt";
const REVOKE_REASON: &str = "revokeReason";

pub struct PunishmentAdapter;

impl TypeAdapter for PunishmentAdapter {
    fn name(&self) -> &'static str {
        "punishment"
    }

    fn can_handle(&self, ty: &TypeDescriptor) -> bool {
        matches!(ty, TypeDescriptor::Domain(name) if *name == PUNISHMENT_TYPE_NAME)
    }

    fn serialize(&self, value: &Datum, _ty: &TypeDescriptor, _ctx: &mut SerializationContext<'_>) -> MappingResult<Value> {
        let punishment = match value {
            Datum::Domain(domain) => domain.downcast_ref::<Punishment>(),
            _ => None,
        }
        .ok_or_else(|| value.mismatch(PUNISHMENT_TYPE_NAME))?;

        Ok(Value::Object(write_punishment(punishment)))
    }

    fn deserialize(&self, value: &Value, _ty: &TypeDescriptor, _ctx: &mut DeserializationContext<'_>) -> MappingResult<Datum> {
        let document = value
            .as_object()
            .ok_or_else(|| MappingError::type_mismatch(PUNISHMENT_TYPE_NAME, value))?;
        let punishment = read_punishment(document)?;
        Ok(Datum::Domain(DomainValue::new(PUNISHMENT_TYPE_NAME, punishment)))
    }
}

// ==================== Writing ====================

fn write_punishment(p: &Punishment) -> Map<String, Value> {
    let mut doc = Map::new();
    doc.insert(ID.into(), json!(p.id));
    doc.insert(TYPE.into(), json!(p.kind.as_str()));
    doc.insert(TARGET.into(), Value::Object(write_target(&p.target)));
    doc.insert(ISSUER.into(), Value::Object(write_issuer(&p.issuer)));
    if let Some(reason) = &p.reason {
        doc.insert(REASON.into(), json!(reason));
    }
    doc.insert(ISSUED_AT.into(), json!(p.issued_at.timestamp_millis()));
    doc.insert(DURATION.into(), json!(format_duration(p.duration)));
    doc.insert(
        EXPIRES_AT.into(),
        p.expires_at().map_or(Value::Null, |at| json!(at.timestamp_millis())),
    );
    doc.insert(
        REVOCATION.into(),
        p.revocation.as_ref().map_or(Value::Null, |info| Value::Object(write_revocation(info))),
    );
    doc.insert(NOTES.into(), json!(p.notes));
    doc
}

fn write_target(target: &PunishmentTarget) -> Map<String, Value> {
    let mut doc = Map::new();
    doc.insert(TYPE.into(), json!(target.kind()));
    match target {
        PunishmentTarget::Player { uuid, name, last_seen } => {
            doc.insert(UUID.into(), json!(uuid.to_string()));
            doc.insert(NAME.into(), json!(name));
            if let Some(at) = last_seen {
                doc.insert(LAST_SEEN.into(), json!(at.timestamp_millis()));
            }
        }
        PunishmentTarget::IpAddress { address, player, last_seen } => {
            if let Some((uuid, _)) = player {
                doc.insert(UUID.into(), json!(uuid.to_string()));
            }
            doc.insert(NAME.into(), json!(target.name()));
            if let Some(at) = last_seen {
                doc.insert(LAST_SEEN.into(), json!(at.timestamp_millis()));
            }
            doc.insert(IP_ADDRESS.into(), json!(address));
            if let Some((uuid, name)) = player {
                let mut data = Map::new();
                data.insert(UUID.into(), json!(uuid.to_string()));
                data.insert(NAME.into(), json!(name));
                doc.insert(PLAYER_DATA.into(), Value::Object(data));
            }
        }
    }
    doc
}

fn write_issuer(issuer: &PunishmentIssuer) -> Map<String, Value> {
    let mut doc = Map::new();
    doc.insert(TYPE.into(), json!(issuer.kind()));
    doc.insert(NAME.into(), json!(issuer.name()));
    if let PunishmentIssuer::Player { uuid, .. } = issuer {
        doc.insert(UUID.into(), json!(uuid.to_string()));
    }
    doc
}

fn write_revocation(info: &RevocationInfo) -> Map<String, Value> {
    let mut doc = Map::new();
    if let PunishmentIssuer::Player { uuid, .. } = &info.revoker {
        doc.insert(REVOKER_UUID.into(), json!(uuid.to_string()));
    }
    doc.insert(REVOKER_NAME.into(), json!(info.revoker.name()));
    doc.insert(REVOKED_AT.into(), json!(info.revoked_at.timestamp_millis()));
    doc.insert(REVOKE_REASON.into(), json!(info.reason));
    doc
}

// ==================== Reading ====================

fn invalid(reason: impl Into<String>) -> MappingError {
    MappingError::InvalidValue {
        type_name: PUNISHMENT_TYPE_NAME,
        reason: reason.into(),
    }
}

fn opt_str<'a>(doc: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    doc.get(key).and_then(Value::as_str)
}

fn req_str<'a>(doc: &'a Map<String, Value>, key: &str) -> MappingResult<&'a str> {
    opt_str(doc, key).ok_or_else(|| invalid(format!("missing '{key}'")))
}

fn opt_millis(doc: &Map<String, Value>, key: &str) -> Option<i64> {
    doc.get(key).and_then(Value::as_i64)
}

fn req_doc<'a>(doc: &'a Map<String, Value>, key: &str) -> MappingResult<&'a Map<String, Value>> {
    doc.get(key)
        .and_then(Value::as_object)
        .ok_or_else(|| invalid(format!("missing '{key}' document")))
}

fn parse_uuid(text: &str) -> MappingResult<Uuid> {
    Uuid::parse_str(text).map_err(|e| invalid(format!("bad uuid '{text}': {e}")))
}

fn read_punishment(doc: &Map<String, Value>) -> MappingResult<Punishment> {
    let issued_at = opt_millis(doc, ISSUED_AT).ok_or_else(|| invalid("missing issuedAt timestamp"))?;
    let duration = parse_duration(req_str(doc, DURATION)?)?;

    let revocation = match doc.get(REVOCATION).and_then(Value::as_object) {
        Some(info) => Some(read_revocation(info)?),
        None => None,
    };

    let notes = match doc.get(NOTES) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|n| n.as_str().map(str::to_string).ok_or_else(|| invalid("notes must be strings")))
            .collect::<MappingResult<Vec<_>>>()?,
        _ => Vec::new(),
    };

    Ok(Punishment {
        id: req_str(doc, ID)?.to_string(),
        kind: req_str(doc, TYPE)?.parse()?,
        target: read_target(req_doc(doc, TARGET)?)?,
        issuer: read_issuer(req_doc(doc, ISSUER)?)?,
        reason: opt_str(doc, REASON).map(str::to_string),
        issued_at: from_millis(issued_at),
        duration,
        revocation,
        notes,
    })
}

fn read_target(doc: &Map<String, Value>) -> MappingResult<PunishmentTarget> {
    let last_seen = opt_millis(doc, LAST_SEEN).map(from_millis);
    match req_str(doc, TYPE)? {
        "PLAYER" => Ok(PunishmentTarget::Player {
            uuid: parse_uuid(req_str(doc, UUID)?)?,
            name: req_str(doc, NAME)?.to_string(),
            last_seen,
        }),
        "IP_ADDRESS" => {
            let address = req_str(doc, IP_ADDRESS)?.to_string();
            let player = match doc.get(PLAYER_DATA).and_then(Value::as_object) {
                Some(data) => match (opt_str(data, UUID), opt_str(data, NAME)) {
                    (Some(uuid), Some(name)) => Some((parse_uuid(uuid)?, name.to_string())),
                    _ => None,
                },
                None => None,
            };
            Ok(PunishmentTarget::IpAddress {
                address,
                player,
                last_seen,
            })
        }
        other => Err(invalid(format!("unsupported target type '{other}'"))),
    }
}

fn read_issuer(doc: &Map<String, Value>) -> MappingResult<PunishmentIssuer> {
    match req_str(doc, TYPE)? {
        "CONSOLE" => Ok(PunishmentIssuer::Console),
        "PLAYER" => Ok(PunishmentIssuer::Player {
            uuid: parse_uuid(req_str(doc, UUID)?)?,
            name: req_str(doc, NAME)?.to_string(),
        }),
        other => Err(invalid(format!("unsupported issuer type '{other}'"))),
    }
}

fn read_revocation(doc: &Map<String, Value>) -> MappingResult<RevocationInfo> {
    let name = req_str(doc, REVOKER_NAME)?;
    let revoked_at = opt_millis(doc, REVOKED_AT).ok_or_else(|| invalid("missing revocation data"))?;
    let revoker = match opt_str(doc, REVOKER_UUID) {
        Some(uuid) => PunishmentIssuer::Player {
            uuid: parse_uuid(uuid)?,
            name: name.to_string(),
        },
        None => PunishmentIssuer::Console,
    };

    Ok(RevocationInfo {
        revoker,
        revoked_at: from_millis(revoked_at),
        reason: opt_str(doc, REVOKE_REASON).map(str::to_string),
    })
}
