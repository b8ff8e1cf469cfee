//! Whole-history JSON snapshot of the conversation logs.
//!
//! The file holds two namespaces:
//!
//! ```json
//! { "dms": { "!abc123": [ ... ] }, "channels": { "0": [ ... ] } }
//! ```
//!
//! A missing file loads as two empty namespaces.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use meshchat_shared::ConversationKey;

use crate::conversations::{insert_entry_with, ConversationStore};
use crate::error::Result;
use crate::models::ConversationEntry;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationLog {
    #[serde(default)]
    pub dms: BTreeMap<String, Vec<ConversationEntry>>,
    #[serde(default)]
    pub channels: BTreeMap<String, Vec<ConversationEntry>>,
}

impl ConversationLog {
    /// Read a snapshot from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no snapshot, starting empty");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// Write the snapshot, replacing any previous file in one rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;

        tracing::info!(
            path = %path.display(),
            dms = self.dms.len(),
            channels = self.channels.len(),
            "conversation snapshot saved"
        );
        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        self.dms.values().chain(self.channels.values()).map(Vec::len).sum()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    pub entries_imported: usize,
    pub entries_skipped: usize,
}

impl ConversationStore {
    /// Export every conversation log.
    pub fn snapshot(&mut self) -> Result<ConversationLog> {
        let mut log = ConversationLog::default();
        for key in self.conversations()? {
            let entries = self.log(&key)?.to_vec();
            match key {
                ConversationKey::Direct(id) => log.dms.insert(id, entries),
                ConversationKey::Channel(id) => log.channels.insert(id, entries),
            };
        }
        Ok(log)
    }

    /// Append a snapshot's entries, skipping ids already stored.
    pub fn import_snapshot(&mut self, log: &ConversationLog) -> Result<ImportStats> {
        let mut stats = ImportStats::default();

        let tx = self.db_mut().conn_mut().transaction()?;
        let namespaces = log
            .dms
            .iter()
            .map(|(id, entries)| (ConversationKey::direct(id.as_str()), entries))
            .chain(
                log.channels
                    .iter()
                    .map(|(id, entries)| (ConversationKey::channel(id.as_str()), entries)),
            );
        for (key, entries) in namespaces {
            // The namespace decides where an entry lives, not its own field.
            let channel_id = key.is_channel().then(|| key.id().to_string());
            for entry in entries {
                let entry = ConversationEntry {
                    channel_id: channel_id.clone(),
                    ..entry.clone()
                };
                if insert_entry_with(&tx, &key, &entry, true)? == 1 {
                    stats.entries_imported += 1;
                } else {
                    stats.entries_skipped += 1;
                }
            }
        }
        tx.commit()?;

        self.invalidate();
        tracing::info!(
            imported = stats.entries_imported,
            skipped = stats.entries_skipped,
            "conversation snapshot imported"
        );
        Ok(stats)
    }

    /// Export and write to `path`.
    pub fn save_snapshot(&mut self, path: &Path) -> Result<()> {
        self.snapshot()?.save(path)
    }

    /// Read `path` (if present) and import it.
    pub fn load_snapshot(&mut self, path: &Path) -> Result<ImportStats> {
        let log = ConversationLog::load(path)?;
        self.import_snapshot(&log)
    }

    #[cfg(test)]
    fn entry_rows(&self) -> i64 {
        self.db()
            .conn()
            .query_row("SELECT COUNT(*) FROM conversation_entries", [], |r| r.get(0))
            .unwrap()
    }
}
