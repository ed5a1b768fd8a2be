//! Turns one opaque feed record into a normalized action plus the portal
//! records its markup references.
//!
//! A raw record is `[event_id, timestamp_ms, {plext: {markup, text}}]`,
//! where `markup` is an ordered list of tagged tuples (`PLAYER`, `FACTION`,
//! `PORTAL`, `TEXT`, `SENDER`, ...) and `text` is the rendered line. The
//! rendered line drives classification; the markup supplies factions and
//! portal metadata.

use crate::FeedError;
use fieldlapse_core::{Action, ActionKind, ActionVerb, Faction, PortalRecord};
use serde_json::Value;

/// Chatter the simulator never needs; matching records are dropped before
/// classification.
const DROP_PHRASES: [&str; 3] = [
    "is under attack by",
    "Your Kinetic Capsule now ready",
    "Drone returned",
];

/// One normalized feed event: the action to persist and every portal the
/// markup described.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub action: Action,
    pub portals: Vec<PortalRecord>,
}

/// Normalize one raw feed record. `Ok(None)` means the record matched a
/// drop rule; `Err` means it was structurally unreadable.
pub fn normalize_record(record: &Value) -> Result<Option<NormalizedEvent>, FeedError> {
    let entry = record
        .as_array()
        .ok_or(FeedError::Malformed("record is not an array"))?;
    let id = entry
        .first()
        .and_then(Value::as_str)
        .ok_or(FeedError::Malformed("record missing event id"))?;
    let timestamp_ms = entry
        .get(1)
        .and_then(Value::as_i64)
        .ok_or(FeedError::Malformed("record missing timestamp"))?;
    let plext = entry
        .get(2)
        .and_then(|extra| extra.get("plext"))
        .ok_or(FeedError::Malformed("record missing plext"))?;

    let text = plext.get("text").and_then(Value::as_str).unwrap_or_default();
    if DROP_PHRASES.iter().any(|phrase| text.contains(phrase)) {
        return Ok(None);
    }

    let empty = Vec::new();
    let markup = plext
        .get("markup")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    let player_team = first_tag_team(markup, "PLAYER");
    let beacon_team = first_tag_team(markup, "FACTION");
    let (kind, verb) = classify(text, player_team, beacon_team);

    let portals = extract_portals(markup);
    let action = Action {
        id: id.to_string(),
        timestamp_ms,
        kind,
        verb,
        portal_id: portals.first().map(|portal| portal.id.clone()),
        target_portal_id: portals.get(1).map(|portal| portal.id.clone()),
    };
    Ok(Some(NormalizedEvent { action, portals }))
}

/// Keyword classification over the rendered line; first match wins.
/// Classifications that need a faction but find none degrade to `Unknown`.
fn classify(
    text: &str,
    player_team: Option<Faction>,
    beacon_team: Option<Faction>,
) -> (ActionKind, ActionVerb) {
    if text.contains("destroyed") {
        let kind = if text.contains("Resonator") {
            ActionKind::Reso
        } else if text.contains("Link") {
            ActionKind::Link
        } else if text.contains("Control Field") {
            ActionKind::Field
        } else if text.contains("Mod") {
            ActionKind::Mod
        } else {
            ActionKind::Unknown
        };
        return (kind, ActionVerb::Destroy);
    }
    if text.contains("neutralized by") {
        return (ActionKind::Portal, ActionVerb::Destroy);
    }
    if text.contains("won a CAT-") {
        let verb = beacon_team.map_or(ActionVerb::Unknown, ActionVerb::Won);
        return (ActionKind::BattleBeacon, verb);
    }
    if text.contains("deployed") {
        let verb = player_team.map_or(ActionVerb::Unknown, ActionVerb::Deploy);
        return (ActionKind::Reso, verb);
    }
    if text.contains("linked") {
        let verb = player_team.map_or(ActionVerb::Unknown, ActionVerb::Link);
        return (ActionKind::Link, verb);
    }
    if text.contains("created a Control Field") {
        let verb = player_team.map_or(ActionVerb::Unknown, ActionVerb::Field);
        return (ActionKind::Field, verb);
    }
    if text.contains("captured") {
        let verb = player_team.map_or(ActionVerb::Unknown, ActionVerb::Captured);
        return (ActionKind::Portal, verb);
    }
    (ActionKind::Unknown, ActionVerb::Unknown)
}

/// Team carried by the first markup tuple with the given tag.
fn first_tag_team(markup: &[Value], tag: &str) -> Option<Faction> {
    markup.iter().find_map(|entry| {
        let pair = entry.as_array()?;
        if pair.first()?.as_str()? != tag {
            return None;
        }
        let team = pair.get(1)?.get("team")?.as_str()?;
        Faction::from_team_tag(team)
    })
}

/// The first two `PORTAL` tuples, in markup order.
fn extract_portals(markup: &[Value]) -> Vec<PortalRecord> {
    markup
        .iter()
        .filter_map(portal_from_tag)
        .take(2)
        .collect()
}

fn portal_from_tag(entry: &Value) -> Option<PortalRecord> {
    let pair = entry.as_array()?;
    if pair.first()?.as_str()? != "PORTAL" {
        return None;
    }
    let body = pair.get(1)?;
    let id = body.get("guid")?.as_str()?.to_string();
    let lat = body.get("latE6")?.as_i64()? as f64 / 1_000_000.0;
    let lng = body.get("lngE6")?.as_i64()? as f64 / 1_000_000.0;
    let name = body
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let address = body
        .get("address")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let team = body
        .get("team")
        .and_then(Value::as_str)
        .and_then(Faction::from_team_tag)
        .unwrap_or_default();
    Some(PortalRecord {
        id,
        lat,
        lng,
        name,
        address,
        team,
    })
}
