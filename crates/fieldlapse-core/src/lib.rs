//! Core types and the territory simulator shared across the Fieldlapse
//! workspace: normalized feed actions, the planar geometry kernel, the
//! deterministic world-state machine, and the replay driver that hands
//! snapshot frames to downstream sinks.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, trace};

/// Maximum resonator count tracked per portal.
pub const MAX_RESONATORS: u8 = 8;

/// Resonator threshold at or below which a portal can no longer hold links.
pub const LINK_FAILURE_RESONATORS: u8 = 2;

/// Faction owning a portal, link, or field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Faction {
    Res,
    Enl,
    #[default]
    Neutral,
    /// Drawn by the renderer; the simulator never assigns it.
    Machina,
}

impl Faction {
    /// Map a feed `team` tag onto a faction.
    #[must_use]
    pub fn from_team_tag(tag: &str) -> Option<Self> {
        match tag {
            "RESISTANCE" => Some(Self::Res),
            "ENLIGHTENED" => Some(Self::Enl),
            "NEUTRAL" => Some(Self::Neutral),
            "MACHINA" => Some(Self::Machina),
            _ => None,
        }
    }

    /// Short wire name used in persisted verb suffixes and team columns.
    #[must_use]
    pub const fn wire(self) -> &'static str {
        match self {
            Self::Res => "RES",
            Self::Enl => "ENL",
            Self::Neutral => "NEUTRAL",
            Self::Machina => "MACHINA",
        }
    }

    /// Parse the short wire name back into a faction.
    #[must_use]
    pub fn parse_wire(value: &str) -> Option<Self> {
        match value {
            "RES" => Some(Self::Res),
            "ENL" => Some(Self::Enl),
            "NEUTRAL" => Some(Self::Neutral),
            "MACHINA" => Some(Self::Machina),
            _ => None,
        }
    }
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire())
    }
}

/// Coarse category of a feed event, used to disambiguate `destroy` verbs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Portal,
    Link,
    Field,
    Reso,
    Mod,
    BattleBeacon,
    #[default]
    Unknown,
}

impl ActionKind {
    /// Wire name stored in the history database.
    #[must_use]
    pub const fn wire(self) -> &'static str {
        match self {
            Self::Portal => "portal",
            Self::Link => "link",
            Self::Field => "field",
            Self::Reso => "reso",
            Self::Mod => "mod",
            Self::BattleBeacon => "battlebeacon",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a wire name; anything unrecognized degrades to `Unknown`.
    #[must_use]
    pub fn parse_wire(value: &str) -> Self {
        match value {
            "portal" => Self::Portal,
            "link" => Self::Link,
            "field" => Self::Field,
            "reso" => Self::Reso,
            "mod" => Self::Mod,
            "battlebeacon" => Self::BattleBeacon,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire())
    }
}

/// Normalized action verb. Faction-carrying verbs persist with a faction
/// suffix (`captured_RES`, `link_ENL`, ...); `destroy` is shared across
/// subtypes and disambiguated by [`ActionKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ActionVerb {
    Captured(Faction),
    Deploy(Faction),
    Link(Faction),
    Field(Faction),
    Won(Faction),
    Destroy,
    #[default]
    Unknown,
}

impl ActionVerb {
    /// Faction carried by the verb, if any.
    #[must_use]
    pub const fn faction(self) -> Option<Faction> {
        match self {
            Self::Captured(f) | Self::Deploy(f) | Self::Link(f) | Self::Field(f) | Self::Won(f) => {
                Some(f)
            }
            Self::Destroy | Self::Unknown => None,
        }
    }

    /// Parse a persisted wire string; anything unrecognized degrades to
    /// `Unknown`.
    #[must_use]
    pub fn parse_wire(value: &str) -> Self {
        if value == "destroy" {
            return Self::Destroy;
        }
        if let Some((stem, suffix)) = value.rsplit_once('_') {
            if let Some(faction) = Faction::parse_wire(suffix) {
                return match stem {
                    "captured" => Self::Captured(faction),
                    "deploy" => Self::Deploy(faction),
                    "link" => Self::Link(faction),
                    "field" => Self::Field(faction),
                    "won" => Self::Won(faction),
                    _ => Self::Unknown,
                };
            }
        }
        Self::Unknown
    }
}

impl fmt::Display for ActionVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Captured(team) => write!(f, "captured_{}", team.wire()),
            Self::Deploy(team) => write!(f, "deploy_{}", team.wire()),
            Self::Link(team) => write!(f, "link_{}", team.wire()),
            Self::Field(team) => write!(f, "field_{}", team.wire()),
            Self::Won(team) => write!(f, "won_{}", team.wire()),
            Self::Destroy => f.write_str("destroy"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// One normalized feed event, persisted once and replayed any number of
/// times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Stable feed event identifier.
    pub id: String,
    /// Event timestamp in milliseconds.
    pub timestamp_ms: i64,
    pub kind: ActionKind,
    pub verb: ActionVerb,
    /// First referenced portal, when the markup carries one.
    pub portal_id: Option<String>,
    /// Second referenced portal (link/field targets).
    pub target_portal_id: Option<String>,
}

/// Catalog entry for a portal as first observed on the feed. The `team`
/// column is advisory metadata; the simulator derives ownership purely from
/// replayed verbs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortalRecord {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub name: String,
    pub address: String,
    pub team: Faction,
}

// ---------------------------------------------------------------------------
// Geometry kernel
// ---------------------------------------------------------------------------

/// A portal position, treated as a planar point. Spherical distortion is an
/// accepted approximation at the zoom levels the renderer targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Signed cross product of `ab` and `ac`. The sign gives the orientation of
/// `c` relative to the directed segment `a -> b`; the magnitude is twice the
/// triangle area.
#[must_use]
pub fn cross(a: GeoPoint, b: GeoPoint, c: GeoPoint) -> f64 {
    (b.lng - a.lng) * (c.lat - a.lat) - (b.lat - a.lat) * (c.lng - a.lng)
}

fn opposite_signs(x: f64, y: f64) -> bool {
    (x > 0.0 && y < 0.0) || (x < 0.0 && y > 0.0)
}

/// Whether segments `ab` and `cd` share an interior point. Strict sign
/// change on both splits: collinear touches return false, so floating noise
/// on real-world coordinates cannot fabricate a crossing. Endpoint sharing
/// is decided upstream by portal identifier, never by coordinates.
#[must_use]
pub fn proper_intersection(a: GeoPoint, b: GeoPoint, c: GeoPoint, d: GeoPoint) -> bool {
    opposite_signs(cross(a, b, c), cross(a, b, d))
        && opposite_signs(cross(c, d, a), cross(c, d, b))
}

/// Canonical storage key for the unordered portal pair `{a, b}`.
#[must_use]
pub fn link_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}-{b}")
    } else {
        format!("{b}-{a}")
    }
}

// ---------------------------------------------------------------------------
// World simulator
// ---------------------------------------------------------------------------

/// Core error wrapper.
#[derive(Debug, Error)]
pub enum SimError {
    /// Indicates an invalid replay option value.
    #[error("invalid replay options: {0}")]
    InvalidOptions(&'static str),
}

#[derive(Debug, Clone)]
struct PortalState {
    point: GeoPoint,
    team: Faction,
    resonators: u8,
}

/// Endpoints of a stored link, sorted lexicographically.
#[derive(Debug, Clone)]
struct LinkSpan {
    a: String,
    b: String,
}

impl LinkSpan {
    fn touches(&self, portal: &str) -> bool {
        self.a == portal || self.b == portal
    }
}

#[derive(Debug, Clone)]
struct FieldState {
    p1: String,
    p2: String,
    p3: String,
    team: Faction,
}

impl FieldState {
    /// Whether the unordered pair `{a, b}` is one of the triangle's edges.
    fn has_edge(&self, a: &str, b: &str) -> bool {
        let edge = |x: &str, y: &str| (x == a && y == b) || (x == b && y == a);
        edge(&self.p1, &self.p2) || edge(&self.p2, &self.p3) || edge(&self.p3, &self.p1)
    }

    fn touches(&self, portal: &str) -> bool {
        self.p1 == portal || self.p2 == portal || self.p3 == portal
    }
}

/// Serializable view of the current world, consumed by frame renderers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorldSnapshot {
    pub portals: Vec<PortalSnapshot>,
    pub links: Vec<LinkSnapshot>,
    pub fields: Vec<FieldSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortalSnapshot {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub team: Faction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub p1: String,
    pub p2: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSnapshot {
    pub p1: String,
    pub p2: String,
    pub p3: String,
    pub team: Faction,
}

/// Deterministic territory state machine. Replays normalized actions in
/// timestamp order against an in-memory model of portals, links, and
/// fields, and reports whether each step changed anything a renderer would
/// draw.
pub struct WorldSim {
    portals: BTreeMap<String, PortalState>,
    links: BTreeMap<String, LinkSpan>,
    fields: Vec<FieldState>,
}

impl fmt::Debug for WorldSim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldSim")
            .field("portals", &self.portals.len())
            .field("links", &self.links.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}

impl WorldSim {
    /// Seed the simulator with the full portal catalog. Every portal starts
    /// neutral with zero resonators; replayed verbs rebuild ownership.
    pub fn new(catalog: impl IntoIterator<Item = PortalRecord>) -> Self {
        let portals: BTreeMap<String, PortalState> = catalog
            .into_iter()
            .map(|record| {
                (
                    record.id,
                    PortalState {
                        point: GeoPoint::new(record.lat, record.lng),
                        team: Faction::Neutral,
                        resonators: 0,
                    },
                )
            })
            .collect();
        debug!(portals = portals.len(), "seeded portal catalog");
        Self {
            portals,
            links: BTreeMap::new(),
            fields: Vec::new(),
        }
    }

    /// Number of portals in the catalog.
    #[must_use]
    pub fn portal_count(&self) -> usize {
        self.portals.len()
    }

    /// Number of live links.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Number of live fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Current team of a portal, if it is in the catalog.
    #[must_use]
    pub fn portal_team(&self, id: &str) -> Option<Faction> {
        self.portals.get(id).map(|state| state.team)
    }

    /// Current resonator count of a portal, if it is in the catalog.
    #[must_use]
    pub fn resonator_count(&self, id: &str) -> Option<u8> {
        self.portals.get(id).map(|state| state.resonators)
    }

    /// Whether a link joins the unordered pair `{a, b}`.
    #[must_use]
    pub fn has_link(&self, a: &str, b: &str) -> bool {
        self.links.contains_key(&link_key(a, b))
    }

    /// Apply one normalized action. Returns `true` iff the visible state
    /// changed: a portal flipped team, or a link or field was added or
    /// removed. Reinforcement deploys and sub-threshold resonator damage
    /// return `false`.
    pub fn process_action(&mut self, action: &Action) -> bool {
        match (action.kind, action.verb) {
            (ActionKind::Link, ActionVerb::Destroy) => self.apply_link_destroy(action),
            (ActionKind::Reso, ActionVerb::Destroy) => self.apply_resonator_destroy(action),
            (_, ActionVerb::Deploy(team)) | (_, ActionVerb::Captured(team)) => {
                self.apply_deploy(action, team)
            }
            (ActionKind::Link, ActionVerb::Link(team)) => self.apply_link(action, team),
            (_, ActionVerb::Won(team)) => self.apply_beacon(action, team),
            _ => false,
        }
    }

    fn apply_link_destroy(&mut self, action: &Action) -> bool {
        let (Some(p1), Some(p2)) = (action.portal_id.as_deref(), action.target_portal_id.as_deref())
        else {
            return false;
        };
        self.delete_link(&link_key(p1, p2))
    }

    fn apply_resonator_destroy(&mut self, action: &Action) -> bool {
        let Some(id) = action.portal_id.as_deref() else {
            return false;
        };
        let remaining = match self.portals.get_mut(id) {
            Some(state) => {
                state.resonators = state.resonators.saturating_sub(1);
                state.resonators
            }
            None => {
                debug!(portal = id, "resonator destroy on uncataloged portal");
                return false;
            }
        };
        let mut visible = false;
        if remaining <= LINK_FAILURE_RESONATORS {
            visible |= self.remove_links_attached(id);
        }
        if remaining == 0 {
            if let Some(state) = self.portals.get_mut(id) {
                if state.team != Faction::Neutral {
                    state.team = Faction::Neutral;
                    visible = true;
                }
            }
        }
        visible
    }

    fn apply_deploy(&mut self, action: &Action, team: Faction) -> bool {
        let Some(id) = action.portal_id.as_deref() else {
            return false;
        };
        let current = match self.portals.get(id) {
            Some(state) => state.team,
            None => {
                debug!(portal = id, "deploy on uncataloged portal");
                return false;
            }
        };
        if current == team {
            // Reinforcement only moves the resonator counter.
            if let Some(state) = self.portals.get_mut(id) {
                state.resonators = (state.resonators + 1).min(MAX_RESONATORS);
            }
            return false;
        }
        if current != Faction::Neutral {
            // Faction flip tears down everything anchored here.
            self.remove_links_attached(id);
        }
        if let Some(state) = self.portals.get_mut(id) {
            state.team = team;
            state.resonators = 1;
        }
        true
    }

    fn apply_link(&mut self, action: &Action, team: Faction) -> bool {
        let (Some(a), Some(b)) = (action.portal_id.as_deref(), action.target_portal_id.as_deref())
        else {
            return false;
        };
        if a == b {
            return false;
        }
        if !self.portals.contains_key(a) || !self.portals.contains_key(b) {
            debug!(p1 = a, p2 = b, "link between uncataloged portals");
            return false;
        }
        let a = a.to_string();
        let b = b.to_string();
        let mut visible = self.force_team(&a, team);
        visible |= self.force_team(&b, team);

        let key = link_key(&a, &b);
        if self.links.contains_key(&key) {
            return visible;
        }

        // Newer link wins: every stored link properly crossing it dies.
        self.sweep_crossing(&a, &b);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        self.links.insert(
            key,
            LinkSpan {
                a: lo.clone(),
                b: hi.clone(),
            },
        );
        let emitted = self.elect_fields(&lo, &hi, team);
        trace!(p1 = %lo, p2 = %hi, fields = emitted, "link inserted");
        true
    }

    fn apply_beacon(&mut self, action: &Action, winner: Faction) -> bool {
        let Some(id) = action.portal_id.as_deref() else {
            return false;
        };
        let current = match self.portals.get(id) {
            Some(state) => state.team,
            None => return false,
        };
        let mut visible = false;
        if current != Faction::Neutral && current != winner {
            visible |= self.remove_links_attached(id);
        }
        if current != winner {
            if let Some(state) = self.portals.get_mut(id) {
                state.team = winner;
            }
            visible = true;
        }
        visible
    }

    /// Set a portal's team, reporting whether it changed.
    fn force_team(&mut self, id: &str, team: Faction) -> bool {
        match self.portals.get_mut(id) {
            Some(state) if state.team != team => {
                state.team = team;
                true
            }
            _ => false,
        }
    }

    /// Link-delete primitive: removing `{a, b}` also removes every field
    /// with `{a, b}` among its three edges. Returns whether the link
    /// existed.
    fn delete_link(&mut self, key: &str) -> bool {
        let Some(span) = self.links.remove(key) else {
            return false;
        };
        let before = self.fields.len();
        self.fields.retain(|field| !field.has_edge(&span.a, &span.b));
        if self.fields.len() != before {
            trace!(
                key,
                removed = before - self.fields.len(),
                "dependent fields removed with link"
            );
        }
        true
    }

    /// Remove every link incident to `portal`, then scrub any residual
    /// field still touching it.
    fn remove_links_attached(&mut self, portal: &str) -> bool {
        let doomed: Vec<String> = self
            .links
            .iter()
            .filter(|(_, span)| span.touches(portal))
            .map(|(key, _)| key.clone())
            .collect();
        let mut changed = false;
        for key in &doomed {
            changed |= self.delete_link(key);
        }
        let before = self.fields.len();
        self.fields.retain(|field| !field.touches(portal));
        changed |= self.fields.len() != before;
        changed
    }

    /// Delete every stored link that properly crosses the segment `a-b`.
    /// Links sharing an endpoint with the pair are never candidates.
    fn sweep_crossing(&mut self, a: &str, b: &str) -> bool {
        let (Some(pa), Some(pb)) = (
            self.portals.get(a).map(|s| s.point),
            self.portals.get(b).map(|s| s.point),
        ) else {
            return false;
        };
        let doomed: Vec<String> = self
            .links
            .iter()
            .filter(|(_, span)| !span.touches(a) && !span.touches(b))
            .filter_map(|(key, span)| {
                let qa = self.portals.get(&span.a)?.point;
                let qb = self.portals.get(&span.b)?.point;
                proper_intersection(pa, pb, qa, qb).then(|| key.clone())
            })
            .collect();
        let mut removed = false;
        for key in &doomed {
            trace!(key = %key, against = %link_key(a, b), "crossing link removed");
            removed |= self.delete_link(key);
        }
        removed
    }

    /// Portals linked to both `a` and `b`, in id order.
    fn common_neighbors(&self, a: &str, b: &str) -> BTreeSet<String> {
        let mut near_a = BTreeSet::new();
        let mut near_b = BTreeSet::new();
        for span in self.links.values() {
            if span.a == a {
                near_a.insert(span.b.clone());
            } else if span.b == a {
                near_a.insert(span.a.clone());
            }
            if span.a == b {
                near_b.insert(span.b.clone());
            } else if span.b == b {
                near_b.insert(span.a.clone());
            }
        }
        near_a
            .intersection(&near_b)
            .filter(|n| n.as_str() != a && n.as_str() != b)
            .cloned()
            .collect()
    }

    /// Emit at most one field per side of the fresh edge `a-b`: among the
    /// common neighbors on each side, the largest triangle wins, ties
    /// falling to the lexicographically first neighbor id.
    fn elect_fields(&mut self, a: &str, b: &str, team: Faction) -> usize {
        let (Some(pa), Some(pb)) = (
            self.portals.get(a).map(|s| s.point),
            self.portals.get(b).map(|s| s.point),
        ) else {
            return 0;
        };
        let mut positive: Option<(f64, String)> = None;
        let mut negative: Option<(f64, String)> = None;
        for neighbor in self.common_neighbors(a, b) {
            let Some(pn) = self.portals.get(&neighbor).map(|s| s.point) else {
                continue;
            };
            let orient = cross(pa, pb, pn);
            let area = orient.abs();
            let side = if orient > 0.0 {
                &mut positive
            } else if orient < 0.0 {
                &mut negative
            } else {
                continue;
            };
            if side.as_ref().is_none_or(|(best, _)| area > *best) {
                *side = Some((area, neighbor));
            }
        }
        let mut emitted = 0;
        for (_, apex) in [positive, negative].into_iter().flatten() {
            self.fields.push(FieldState {
                p1: a.to_string(),
                p2: b.to_string(),
                p3: apex,
                team,
            });
            emitted += 1;
        }
        emitted
    }

    /// Serializable view of the current world. Portals come out in id
    /// order, links in canonical-key order, fields in creation order.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            portals: self
                .portals
                .iter()
                .map(|(id, state)| PortalSnapshot {
                    id: id.clone(),
                    lat: state.point.lat,
                    lng: state.point.lng,
                    team: state.team,
                })
                .collect(),
            links: self
                .links
                .values()
                .map(|span| LinkSnapshot {
                    p1: span.a.clone(),
                    p2: span.b.clone(),
                })
                .collect(),
            fields: self
                .fields
                .iter()
                .map(|field| FieldSnapshot {
                    p1: field.p1.clone(),
                    p2: field.p2.clone(),
                    p3: field.p3.clone(),
                    team: field.team,
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Replay driver
// ---------------------------------------------------------------------------

/// Sink receiving one frame per emitted snapshot. Implementations report
/// their own failures.
pub trait FrameSink {
    fn on_frame(&mut self, snapshot: &WorldSnapshot, display_ts_ms: i64);
}

/// No-op frame sink.
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn on_frame(&mut self, _snapshot: &WorldSnapshot, _display_ts_ms: i64) {}
}

/// Replay configuration. `simulation_start_ms` bounds which actions are
/// applied; `recording_start_ms` bounds which steps emit frames; the
/// remaining options select and size the stepping mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplayOptions {
    /// Earliest timestamp whose action is replayed.
    pub simulation_start_ms: i64,
    /// Earliest timestamp that produces emitted frames.
    pub recording_start_ms: i64,
    /// Step for time-stepped replay, in seconds.
    pub step_seconds: u32,
    /// Emit one frame per visible change instead of fixed time steps.
    pub per_action: bool,
    /// Pre-recording lookback window used to size the ingest floor.
    pub history_context_ms: i64,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            simulation_start_ms: 0,
            recording_start_ms: 0,
            step_seconds: 60,
            per_action: false,
            history_context_ms: 6 * 60 * 60 * 1000,
        }
    }
}

impl ReplayOptions {
    /// Validate option values.
    pub fn validate(&self) -> Result<(), SimError> {
        if !self.per_action && self.step_seconds == 0 {
            return Err(SimError::InvalidOptions(
                "step_seconds must be non-zero for time-stepped replay",
            ));
        }
        if self.history_context_ms < 0 {
            return Err(SimError::InvalidOptions(
                "history_context_ms must be non-negative",
            ));
        }
        Ok(())
    }

    /// Oldest timestamp the feed ingester must reach so this replay has the
    /// actions it needs.
    #[must_use]
    pub fn ingest_floor_ms(&self) -> i64 {
        self.simulation_start_ms
            .min(self.recording_start_ms - self.history_context_ms)
    }
}

/// Counters reported after a replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub actions_applied: usize,
    pub visible_changes: usize,
    pub frames_emitted: usize,
    pub halted: bool,
    pub last_timestamp_ms: Option<i64>,
}

/// Drives a simulator through an ordered action log, handing frames to a
/// [`FrameSink`]. Cooperative halt between actions via a shared flag.
pub struct ReplayDriver {
    options: ReplayOptions,
    halt: Arc<AtomicBool>,
}

impl ReplayDriver {
    /// Build a driver after validating the options.
    pub fn new(options: ReplayOptions) -> Result<Self, SimError> {
        options.validate()?;
        Ok(Self {
            options,
            halt: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Replay options in effect.
    #[must_use]
    pub fn options(&self) -> &ReplayOptions {
        &self.options
    }

    /// Shared flag that halts the replay between actions when set.
    #[must_use]
    pub fn halt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halt)
    }

    /// Replay `actions` (already in timestamp order) through `sim`.
    pub fn run(
        &self,
        sim: &mut WorldSim,
        actions: &[Action],
        sink: &mut dyn FrameSink,
    ) -> ReplaySummary {
        if self.options.per_action {
            self.run_per_action(sim, actions, sink)
        } else {
            self.run_stepped(sim, actions, sink)
        }
    }

    fn run_per_action(
        &self,
        sim: &mut WorldSim,
        actions: &[Action],
        sink: &mut dyn FrameSink,
    ) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        for action in actions {
            if self.halt.load(Ordering::Relaxed) {
                summary.halted = true;
                break;
            }
            if action.timestamp_ms < self.options.simulation_start_ms {
                continue;
            }
            let visible = sim.process_action(action);
            summary.actions_applied += 1;
            summary.visible_changes += usize::from(visible);
            summary.last_timestamp_ms = Some(action.timestamp_ms);
            if visible && action.timestamp_ms >= self.options.recording_start_ms {
                sink.on_frame(&sim.snapshot(), action.timestamp_ms);
                summary.frames_emitted += 1;
            }
        }
        summary
    }

    fn run_stepped(
        &self,
        sim: &mut WorldSim,
        actions: &[Action],
        sink: &mut dyn FrameSink,
    ) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        let Some(last_ts) = actions.last().map(|action| action.timestamp_ms) else {
            return summary;
        };
        let step_ms = i64::from(self.options.step_seconds) * 1000;
        let mut pending = actions
            .iter()
            .filter(|action| action.timestamp_ms >= self.options.simulation_start_ms)
            .peekable();
        let mut t = self.options.simulation_start_ms;
        loop {
            if self.halt.load(Ordering::Relaxed) {
                summary.halted = true;
                break;
            }
            while let Some(action) = pending.next_if(|action| action.timestamp_ms <= t) {
                let visible = sim.process_action(action);
                summary.actions_applied += 1;
                summary.visible_changes += usize::from(visible);
                summary.last_timestamp_ms = Some(action.timestamp_ms);
            }
            if t >= self.options.recording_start_ms {
                sink.on_frame(&sim.snapshot(), t);
                summary.frames_emitted += 1;
            }
            if t >= last_ts {
                break;
            }
            t += step_ms;
        }
        summary
    }
}
