//! The node directory: a reconciling store of every radio seen on the mesh.
//!
//! Nodes are keyed by their stable node id, with the MAC address as a second
//! unique key. All nodes are held in memory in first-seen order; every
//! mutation is written to SQLite in its own transaction and only applied to
//! memory after the commit succeeds.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use meshchat_shared::NodePatch;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Node;

const NODE_COLUMNS: &str = "row_id, node_id, mac_address, node_num, long_name, short_name,
     hw_model, role, snr, last_heard, battery_level, voltage, channel_utilization,
     air_util_tx, latitude, longitude, altitude, is_local_radio, first_seen, last_seen";

pub struct NodeDirectory {
    db: Database,
    nodes: Vec<Node>,
}

impl NodeDirectory {
    /// Wrap an open database and load every known node.
    pub fn open(db: Database) -> Result<Self> {
        let nodes = load_nodes(db.conn())?;
        tracing::debug!(count = nodes.len(), "node directory loaded");
        Ok(Self { db, nodes })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// All nodes in first-seen order.
    pub fn list(&self) -> &[Node] {
        &self.nodes
    }

    pub fn get(&self, node_id: &str) -> Option<&Node> {
        self.position_by_id(node_id).map(|i| &self.nodes[i])
    }

    pub fn get_by_mac(&self, mac_address: &str) -> Option<&Node> {
        self.position_by_mac(mac_address).map(|i| &self.nodes[i])
    }

    /// The node currently flagged as the locally attached radio.
    pub fn local(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.is_local_radio)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert or update a node.
    ///
    /// Looks the node up by `node_id` first and by `mac_address` second. A
    /// record first seen by MAC only adopts the node id the first time both
    /// are reported together, absorbing any separate record already held
    /// under that id. Fails with [`StoreError::Conflict`] when the
    /// MAC already belongs to another node; the directory is left unchanged.
    pub fn upsert(
        &mut self,
        node_id: Option<&str>,
        mac_address: Option<&str>,
        patch: &NodePatch,
    ) -> Result<Node> {
        if node_id.is_none() && mac_address.is_none() {
            return Err(StoreError::MissingIdentity);
        }

        let target = self.resolve(node_id, mac_address)?;
        let now = Utc::now();

        let mut candidate = match target {
            Some(slot) => {
                let mut node = self.nodes[slot.index].clone();
                if let Some(other) = slot.absorbed {
                    node.absorb(&self.nodes[other]);
                }
                node
            }
            None => Node::new(node_id.map(str::to_string), None, now),
        };
        if candidate.node_id.is_none() {
            candidate.node_id = node_id.map(str::to_string);
        }
        if let Some(mac) = mac_address {
            candidate.mac_address = Some(mac.to_string());
        }
        candidate.merge(patch);
        candidate.last_seen = now;

        let tx = self.db.conn_mut().transaction()?;
        match target {
            Some(slot) => {
                if let Some(other) = slot.absorbed {
                    delete_node(&tx, self.nodes[other].row_id)?;
                }
                update_node(&tx, &candidate)?;
            }
            None => candidate.row_id = insert_node(&tx, &candidate)?,
        }
        tx.commit()?;

        match target {
            Some(slot) => {
                tracing::debug!(node = ?candidate.node_id, mac = ?candidate.mac_address, "node updated");
                self.nodes[slot.index] = candidate.clone();
                if let Some(other) = slot.absorbed {
                    let merged = self.nodes.remove(other);
                    tracing::info!(
                        node = ?candidate.node_id,
                        merged_row = merged.row_id,
                        "merged duplicate node record"
                    );
                }
            }
            None => {
                tracing::info!(node = ?candidate.node_id, mac = ?candidate.mac_address, "new node");
                self.nodes.push(candidate.clone());
            }
        }

        Ok(candidate)
    }

    /// Flag `node_id` as the local radio and clear the flag everywhere else.
    pub fn mark_local(&mut self, node_id: &str) -> Result<()> {
        if self.position_by_id(node_id).is_none() {
            return Err(StoreError::UnknownNode(node_id.to_string()));
        }

        let tx = self.db.conn_mut().transaction()?;
        tx.execute(
            "UPDATE nodes SET is_local_radio = 0 WHERE is_local_radio = 1",
            [],
        )?;
        tx.execute(
            "UPDATE nodes SET is_local_radio = 1 WHERE node_id = ?1",
            params![node_id],
        )?;
        tx.commit()?;

        for node in &mut self.nodes {
            node.is_local_radio = node.node_id.as_deref() == Some(node_id);
        }
        tracing::info!(node = %node_id, "local radio marked");
        Ok(())
    }

    /// Clear the local-radio flag on every node.
    pub fn clear_local(&mut self) -> Result<()> {
        self.db.conn().execute(
            "UPDATE nodes SET is_local_radio = 0 WHERE is_local_radio = 1",
            [],
        )?;
        for node in &mut self.nodes {
            node.is_local_radio = false;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn position_by_id(&self, node_id: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.node_id.as_deref() == Some(node_id))
    }

    fn position_by_mac(&self, mac_address: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.mac_address.as_deref() == Some(mac_address))
    }

    /// Find the record an upsert applies to, or `None` for a new node.
    fn resolve(&self, node_id: Option<&str>, mac_address: Option<&str>) -> Result<Option<Slot>> {
        let by_id = node_id.and_then(|id| self.position_by_id(id));
        let by_mac = mac_address.and_then(|mac| self.position_by_mac(mac));

        let conflict = |index: usize| StoreError::Conflict {
            mac_address: mac_address.unwrap_or_default().to_string(),
            existing_node_id: self.nodes[index].node_id.clone(),
            requested_node_id: node_id.map(str::to_string),
        };

        match (by_id, by_mac) {
            // The MAC was first seen without an id: same radio, two rows.
            (Some(i), Some(m)) if i != m && self.nodes[m].node_id.is_none() => Ok(Some(Slot {
                index: i.min(m),
                absorbed: Some(i.max(m)),
            })),
            (Some(i), Some(m)) if i != m => Err(conflict(m)),
            (Some(i), _) => Ok(Some(Slot::at(i))),
            // The MAC is known under another node id.
            (None, Some(m)) if node_id.is_some() && self.nodes[m].node_id.is_some() => {
                Err(conflict(m))
            }
            (None, Some(m)) => Ok(Some(Slot::at(m))),
            (None, None) => Ok(None),
        }
    }
}

/// The record an upsert lands on.
#[derive(Debug, Clone, Copy)]
struct Slot {
    index: usize,
    /// A later record for the same radio, folded into `index` and removed.
    absorbed: Option<usize>,
}

impl Slot {
    fn at(index: usize) -> Self {
        Self {
            index,
            absorbed: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SQL
// ---------------------------------------------------------------------------

fn load_nodes(conn: &Connection) -> Result<Vec<Node>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes ORDER BY row_id ASC"
    ))?;
    let rows = stmt.query_map([], row_to_node)?;

    let mut nodes = Vec::new();
    for row in rows {
        nodes.push(row?);
    }
    Ok(nodes)
}

fn insert_node(conn: &Connection, node: &Node) -> Result<i64> {
    conn.execute(
        "INSERT INTO nodes (node_id, mac_address, node_num, long_name, short_name,
             hw_model, role, snr, last_heard, battery_level, voltage, channel_utilization,
             air_util_tx, latitude, longitude, altitude, is_local_radio, first_seen, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            node.node_id,
            node.mac_address,
            node.node_num,
            node.long_name,
            node.short_name,
            node.hw_model,
            node.role,
            node.snr,
            node.last_heard.map(|t| t.to_rfc3339()),
            node.battery_level,
            node.voltage,
            node.channel_utilization,
            node.air_util_tx,
            node.latitude,
            node.longitude,
            node.altitude,
            node.is_local_radio,
            node.first_seen.to_rfc3339(),
            node.last_seen.to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn delete_node(conn: &Connection, row_id: i64) -> Result<()> {
    conn.execute("DELETE FROM nodes WHERE row_id = ?1", params![row_id])?;
    Ok(())
}

fn update_node(conn: &Connection, node: &Node) -> Result<()> {
    conn.execute(
        "UPDATE nodes SET node_id = ?2, mac_address = ?3, node_num = ?4, long_name = ?5,
             short_name = ?6, hw_model = ?7, role = ?8, snr = ?9, last_heard = ?10,
             battery_level = ?11, voltage = ?12, channel_utilization = ?13, air_util_tx = ?14,
             latitude = ?15, longitude = ?16, altitude = ?17, is_local_radio = ?18,
             last_seen = ?19, first_seen = ?20
         WHERE row_id = ?1",
        params![
            node.row_id,
            node.node_id,
            node.mac_address,
            node.node_num,
            node.long_name,
            node.short_name,
            node.hw_model,
            node.role,
            node.snr,
            node.last_heard.map(|t| t.to_rfc3339()),
            node.battery_level,
            node.voltage,
            node.channel_utilization,
            node.air_util_tx,
            node.latitude,
            node.longitude,
            node.altitude,
            node.is_local_radio,
            node.last_seen.to_rfc3339(),
            node.first_seen.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Map a `rusqlite::Row` to a [`Node`].
fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    let last_heard: Option<String> = row.get(9)?;
    let first_seen: String = row.get(18)?;
    let last_seen: String = row.get(19)?;

    Ok(Node {
        row_id: row.get(0)?,
        node_id: row.get(1)?,
        mac_address: row.get(2)?,
        node_num: row.get(3)?,
        long_name: row.get(4)?,
        short_name: row.get(5)?,
        hw_model: row.get(6)?,
        role: row.get(7)?,
        snr: row.get(8)?,
        last_heard: last_heard.map(|s| parse_timestamp(9, &s)).transpose()?,
        battery_level: row.get(10)?,
        voltage: row.get(11)?,
        channel_utilization: row.get(12)?,
        air_util_tx: row.get(13)?,
        latitude: row.get(14)?,
        longitude: row.get(15)?,
        altitude: row.get(16)?,
        is_local_radio: row.get(17)?,
        first_seen: parse_timestamp(18, &first_seen)?,
        last_seen: parse_timestamp(19, &last_seen)?,
    })
}

pub(crate) fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> NodeDirectory {
        NodeDirectory::open(Database::open_in_memory().unwrap()).unwrap()
    }

    fn named(long_name: &str) -> NodePatch {
        NodePatch {
            long_name: Some(long_name.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_merges_fields() {
        let mut dir = directory();
        dir.upsert(Some("!abc123"), Some("AA:BB:CC:DD:EE:FF"), &named("Node A"))
            .unwrap();
        dir.upsert(
            Some("!abc123"),
            Some("AA:BB:CC:DD:EE:FF"),
            &NodePatch {
                short_name: Some("NA".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let node = dir.get("!abc123").unwrap();
        assert_eq!(node.long_name.as_deref(), Some("Node A"));
        assert_eq!(node.short_name.as_deref(), Some("NA"));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut dir = directory();
        let patch = NodePatch {
            long_name: Some("Node A".into()),
            snr: Some(5.5),
            altitude: Some(120),
            ..Default::default()
        };

        let first = dir.upsert(Some("!abc"), Some("MAC-A"), &patch).unwrap();
        let second = dir.upsert(Some("!abc"), Some("MAC-A"), &patch).unwrap();

        assert_eq!(
            Node {
                last_seen: first.last_seen,
                ..second.clone()
            },
            first
        );
        assert!(second.last_seen >= first.last_seen);
        assert_eq!(second.first_seen, first.first_seen);
    }

    #[test]
    fn test_mac_conflict_is_rejected() {
        let mut dir = directory();
        dir.upsert(Some("!node1"), Some("MAC1"), &NodePatch::default())
            .unwrap();

        let err = dir
            .upsert(Some("!node2"), Some("MAC1"), &NodePatch::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert!(!err.is_persistence());

        assert!(dir.get("!node1").is_some());
        assert!(dir.get("!node2").is_none());
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_conflict_between_two_existing_records() {
        let mut dir = directory();
        dir.upsert(Some("!a"), Some("MAC-A"), &NodePatch::default())
            .unwrap();
        dir.upsert(Some("!b"), Some("MAC-B"), &NodePatch::default())
            .unwrap();

        let err = dir
            .upsert(Some("!a"), Some("MAC-B"), &named("stolen"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(dir.get("!a").unwrap().long_name, None);
        assert_eq!(dir.get("!a").unwrap().mac_address.as_deref(), Some("MAC-A"));
    }

    #[test]
    fn test_mac_only_record_adopts_node_id() {
        let mut dir = directory();
        dir.upsert(None, Some("MAC-A"), &named("discovered"))
            .unwrap();
        assert!(dir.get_by_mac("MAC-A").unwrap().node_id.is_none());

        dir.upsert(Some("!abc"), Some("MAC-A"), &NodePatch::default())
            .unwrap();

        assert_eq!(dir.len(), 1);
        let node = dir.get("!abc").unwrap();
        assert_eq!(node.mac_address.as_deref(), Some("MAC-A"));
        assert_eq!(node.long_name.as_deref(), Some("discovered"));
    }

    #[test]
    fn test_mac_only_record_merges_with_id_only_record() {
        let mut dir = directory();
        dir.upsert(None, Some("MAC-A"), &named("discovered")).unwrap();
        dir.upsert(
            Some("!abc123"),
            None,
            &NodePatch {
                battery_level: Some(80),
                ..Default::default()
            },
        )
        .unwrap();
        dir.upsert(Some("!zzz"), None, &NodePatch::default()).unwrap();
        assert_eq!(dir.len(), 3);
        let first_seen = dir.get_by_mac("MAC-A").unwrap().first_seen;

        let node = dir
            .upsert(Some("!abc123"), Some("MAC-A"), &NodePatch::default())
            .unwrap();
        assert_eq!(node.node_id.as_deref(), Some("!abc123"));
        assert_eq!(node.long_name.as_deref(), Some("discovered"));
        assert_eq!(node.battery_level, Some(80));
        assert_eq!(node.first_seen, first_seen);

        let order: Vec<_> = dir.list().iter().map(|n| n.node_id.clone()).collect();
        assert_eq!(order, [Some("!abc123".to_string()), Some("!zzz".to_string())]);

        // Later updates for the radio land on the merged record.
        dir.upsert(Some("!abc123"), Some("MAC-A"), &named("Node A"))
            .unwrap();
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.get_by_mac("MAC-A").unwrap().long_name.as_deref(), Some("Node A"));

        let rows: i64 = dir
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_upsert_without_identity() {
        let mut dir = directory();
        let err = dir.upsert(None, None, &named("ghost")).unwrap_err();
        assert!(matches!(err, StoreError::MissingIdentity));
        assert!(dir.is_empty());
    }

    #[test]
    fn test_list_is_first_seen_order() {
        let mut dir = directory();
        for id in ["!c", "!a", "!b"] {
            dir.upsert(Some(id), None, &NodePatch::default()).unwrap();
        }
        dir.upsert(Some("!a"), None, &named("updated")).unwrap();
        dir.upsert(Some("!d"), None, &NodePatch::default()).unwrap();

        let order: Vec<_> = dir
            .list()
            .iter()
            .map(|n| n.node_id.clone().unwrap())
            .collect();
        assert_eq!(order, ["!c", "!a", "!b", "!d"]);
    }

    #[test]
    fn test_single_local_radio() {
        let mut dir = directory();
        for id in ["!a", "!b", "!c"] {
            dir.upsert(Some(id), None, &NodePatch::default()).unwrap();
        }

        dir.mark_local("!a").unwrap();
        dir.mark_local("!b").unwrap();
        let local: Vec<_> = dir.list().iter().filter(|n| n.is_local_radio).collect();
        assert_eq!(local.len(), 1);
        assert_eq!(dir.local().unwrap().node_id.as_deref(), Some("!b"));

        dir.clear_local().unwrap();
        assert!(dir.local().is_none());

        assert!(matches!(
            dir.mark_local("!missing"),
            Err(StoreError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_reopen_replays_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nodes.db");

        {
            let mut dir = NodeDirectory::open(Database::open_at(&path).unwrap()).unwrap();
            dir.upsert(Some("!b"), Some("MAC-B"), &named("Bravo")).unwrap();
            dir.upsert(Some("!a"), None, &named("Alpha")).unwrap();
            dir.mark_local("!a").unwrap();
        }

        let dir = NodeDirectory::open(Database::open_at(&path).unwrap()).unwrap();
        let names: Vec<_> = dir.list().iter().map(|n| n.display_name().to_string()).collect();
        assert_eq!(names, ["Bravo", "Alpha"]);
        assert_eq!(dir.local().unwrap().node_id.as_deref(), Some("!a"));
        assert_eq!(dir.get_by_mac("MAC-B").unwrap().node_id.as_deref(), Some("!b"));
    }

    #[test]
    fn test_failed_write_leaves_memory_untouched() {
        let mut dir = directory();
        dir.upsert(Some("!a"), None, &named("Alpha")).unwrap();

        // Make every write fail.
        dir.db
            .conn()
            .execute_batch("DROP TABLE nodes;")
            .unwrap();

        let err = dir.upsert(Some("!a"), None, &named("Changed")).unwrap_err();
        assert!(err.is_persistence());
        assert_eq!(dir.get("!a").unwrap().long_name.as_deref(), Some("Alpha"));

        let err = dir.upsert(Some("!new"), None, &NodePatch::default()).unwrap_err();
        assert!(err.is_persistence());
        assert!(dir.get("!new").is_none());
    }
}
