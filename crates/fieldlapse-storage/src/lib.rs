//! DuckDB-backed persistence layer for Fieldlapse.
//!
//! Two append-only relations keyed by stable feed identifiers. All writes
//! are insert-or-ignore: fetch pages overlap and re-runs of the ingester
//! must be idempotent, so the first observation of a row wins.

use duckdb::{Connection, Transaction, params};
use fieldlapse_core::{Action, ActionKind, ActionVerb, Faction, PortalRecord};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Storage error wrapper.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
}

/// Row counts committed by one page write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageWrite {
    pub portals_inserted: usize,
    pub actions_inserted: usize,
}

/// Oldest and newest action timestamps currently stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    pub oldest_ms: i64,
    pub newest_ms: i64,
}

/// Append-only store for normalized portals and actions.
pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    /// Open or create a database at the provided path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// In-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&mut self) -> Result<(), StorageError> {
        self.conn.execute(
            "create table if not exists portals (
                id text primary key,
                lat double not null,
                lng double not null,
                name text not null,
                address text not null,
                team text not null
            )",
            [],
        )?;
        self.conn.execute(
            "create table if not exists actions (
                id text primary key,
                timestamp_ms bigint not null,
                kind text not null,
                verb text not null,
                portal_id text,
                target_portal_id text
            )",
            [],
        )?;
        Ok(())
    }

    fn insert_portals(
        tx: &Transaction<'_>,
        portals: &[PortalRecord],
    ) -> Result<usize, duckdb::Error> {
        if portals.is_empty() {
            return Ok(0);
        }
        let mut stmt = tx.prepare(
            "insert or ignore into portals (id, lat, lng, name, address, team)
             values (?, ?, ?, ?, ?, ?)",
        )?;
        let mut inserted = 0;
        for portal in portals {
            inserted += stmt.execute(params![
                portal.id,
                portal.lat,
                portal.lng,
                portal.name,
                portal.address,
                portal.team.wire(),
            ])?;
        }
        Ok(inserted)
    }

    fn insert_actions(tx: &Transaction<'_>, actions: &[Action]) -> Result<usize, duckdb::Error> {
        if actions.is_empty() {
            return Ok(0);
        }
        let mut stmt = tx.prepare(
            "insert or ignore into actions (
                id, timestamp_ms, kind, verb, portal_id, target_portal_id
            ) values (?, ?, ?, ?, ?, ?)",
        )?;
        let mut inserted = 0;
        for action in actions {
            inserted += stmt.execute(params![
                action.id,
                action.timestamp_ms,
                action.kind.wire(),
                action.verb.to_string(),
                action.portal_id,
                action.target_portal_id,
            ])?;
        }
        Ok(inserted)
    }

    /// Persist one fetch page atomically. Rows whose keys already exist are
    /// skipped, so overlapping pages and re-runs commit cleanly.
    pub fn insert_page(
        &mut self,
        portals: &[PortalRecord],
        actions: &[Action],
    ) -> Result<PageWrite, StorageError> {
        let tx = self.conn.transaction()?;
        let portals_inserted = Self::insert_portals(&tx, portals)?;
        let actions_inserted = Self::insert_actions(&tx, actions)?;
        tx.commit()?;
        debug!(
            portals = portals_inserted,
            actions = actions_inserted,
            "page committed"
        );
        Ok(PageWrite {
            portals_inserted,
            actions_inserted,
        })
    }

    /// Full portal catalog, unordered.
    pub fn load_portals(&mut self) -> Result<Vec<PortalRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("select id, lat, lng, name, address, team from portals")?;
        let mut rows = stmt.query([])?;
        let mut portals = Vec::new();
        while let Some(row) = rows.next()? {
            let team: String = row.get(5)?;
            portals.push(PortalRecord {
                id: row.get(0)?,
                lat: row.get(1)?,
                lng: row.get(2)?,
                name: row.get(3)?,
                address: row.get(4)?,
                team: Faction::parse_wire(&team).unwrap_or_default(),
            });
        }
        Ok(portals)
    }

    /// The replay log: all actions in timestamp order, event id breaking
    /// timestamp ties deterministically.
    pub fn load_actions(&mut self) -> Result<Vec<Action>, StorageError> {
        let mut stmt = self.conn.prepare(
            "select id, timestamp_ms, kind, verb, portal_id, target_portal_id
             from actions
             order by timestamp_ms asc, id asc",
        )?;
        let mut rows = stmt.query([])?;
        let mut actions = Vec::new();
        while let Some(row) = rows.next()? {
            let kind: String = row.get(2)?;
            let verb: String = row.get(3)?;
            actions.push(Action {
                id: row.get(0)?,
                timestamp_ms: row.get(1)?,
                kind: ActionKind::parse_wire(&kind),
                verb: ActionVerb::parse_wire(&verb),
                portal_id: row.get(4)?,
                target_portal_id: row.get(5)?,
            });
        }
        Ok(actions)
    }

    /// Number of stored portals.
    pub fn portal_count(&mut self) -> Result<i64, StorageError> {
        let count = self
            .conn
            .query_row("select count(*) from portals", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Number of stored actions.
    pub fn action_count(&mut self) -> Result<i64, StorageError> {
        let count = self
            .conn
            .query_row("select count(*) from actions", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Oldest and newest stored action timestamps, if any actions exist.
    pub fn time_bounds(&mut self) -> Result<Option<TimeBounds>, StorageError> {
        let bounds: (Option<i64>, Option<i64>) = self.conn.query_row(
            "select min(timestamp_ms), max(timestamp_ms) from actions",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(match bounds {
            (Some(oldest_ms), Some(newest_ms)) => Some(TimeBounds {
                oldest_ms,
                newest_ms,
            }),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_portal(id: &str, team: Faction) -> PortalRecord {
        PortalRecord {
            id: id.to_string(),
            lat: 51.5,
            lng: -0.1,
            name: format!("Portal {id}"),
            address: "1 Test Lane".to_string(),
            team,
        }
    }

    fn sample_action(id: &str, timestamp_ms: i64) -> Action {
        Action {
            id: id.to_string(),
            timestamp_ms,
            kind: ActionKind::Portal,
            verb: ActionVerb::Captured(Faction::Res),
            portal_id: Some("p1".to_string()),
            target_portal_id: None,
        }
    }

    #[test]
    fn first_observed_portal_metadata_wins() {
        let mut store = HistoryStore::open_in_memory().expect("store");
        let first = store
            .insert_page(&[sample_portal("p1", Faction::Res)], &[])
            .expect("first page");
        assert_eq!(first.portals_inserted, 1);

        let second = store
            .insert_page(&[sample_portal("p1", Faction::Enl)], &[])
            .expect("second page");
        assert_eq!(second.portals_inserted, 0);

        let portals = store.load_portals().expect("portals");
        assert_eq!(portals.len(), 1);
        assert_eq!(portals[0].team, Faction::Res);
    }

    #[test]
    fn actions_replay_in_timestamp_then_id_order() {
        let mut store = HistoryStore::open_in_memory().expect("store");
        let page = vec![
            sample_action("ev-c", 3_000),
            sample_action("ev-b", 1_000),
            sample_action("ev-a", 1_000),
        ];
        store.insert_page(&[], &page).expect("page");

        let actions = store.load_actions().expect("actions");
        let ids: Vec<&str> = actions.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["ev-a", "ev-b", "ev-c"]);
    }

    #[test]
    fn unknown_wire_strings_degrade_to_unknown() {
        let mut store = HistoryStore::open_in_memory().expect("store");
        store
            .conn
            .execute(
                "insert into actions values ('ev-x', 5, 'warp', 'levitated_RES', null, null)",
                [],
            )
            .expect("raw insert");
        let actions = store.load_actions().expect("actions");
        assert_eq!(actions[0].kind, ActionKind::Unknown);
        assert_eq!(actions[0].verb, ActionVerb::Unknown);
    }

    #[test]
    fn time_bounds_track_stored_actions() {
        let mut store = HistoryStore::open_in_memory().expect("store");
        assert_eq!(store.time_bounds().expect("empty"), None);
        store
            .insert_page(
                &[],
                &[sample_action("ev-a", 2_000), sample_action("ev-b", 9_000)],
            )
            .expect("page");
        assert_eq!(
            store.time_bounds().expect("bounds"),
            Some(TimeBounds {
                oldest_ms: 2_000,
                newest_ms: 9_000
            })
        );
    }
}
