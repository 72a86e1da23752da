//! Identity index: lightweight, always-resident summaries of every player,
//! reachable by idnum or by case-folded name.

use std::collections::BTreeMap;

use log::{debug, error, info};
use serde::Serialize;

use crate::logutil::escape_log;
use crate::playerdb::account::AccountStore;
use crate::playerdb::errors::PlayerDbError;
use crate::playerdb::flags::PlayerFlags;
use crate::playerdb::types::{AccountId, EmpireVnum, Idnum, PlayerRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlayerIndexEntry {
    pub idnum: Idnum,
    /// Case-folded name; the lookup key.
    pub name: String,
    /// Name as the player spells it.
    pub fullname: String,
    pub account_id: Option<AccountId>,
    pub birth: i64,
    pub last_logon: i64,
    /// Seconds.
    pub played: i64,
    pub access_level: i32,
    pub plr_flags: PlayerFlags,
    pub loyalty: Option<EmpireVnum>,
    pub last_host: Option<String>,
}

impl PlayerIndexEntry {
    /// Summarize a full record.
    pub fn from_record(record: &PlayerRecord) -> Self {
        Self {
            idnum: record.idnum,
            name: record.key_name(),
            fullname: record.name.clone(),
            account_id: record.account_id,
            birth: record.birth,
            last_logon: record.prev_logon,
            played: record.played,
            access_level: record.access_level,
            plr_flags: record.player_flags,
            loyalty: record.loyalty,
            last_host: record.last_host.clone(),
        }
    }

    pub fn played_hours(&self) -> f64 {
        self.played as f64 / 3600.0
    }
}

/// Two sorted views over one entry set: by idnum (owning) and by name.
#[derive(Debug, Default)]
pub struct PlayerIndex {
    by_idnum: BTreeMap<Idnum, PlayerIndexEntry>,
    by_name: BTreeMap<String, Idnum>,
}

/// What a bootstrap rebuild did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub indexed: usize,
    /// (account id, player name) links dropped because the player could not be loaded.
    pub dropped_links: Vec<(AccountId, String)>,
    pub deleted_accounts: Vec<AccountId>,
    pub top_idnum: Idnum,
    pub top_account_id: AccountId,
}

impl PlayerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_idnum.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_idnum.is_empty()
    }

    /// Entries in ascending idnum order.
    pub fn iter(&self) -> impl Iterator<Item = &PlayerIndexEntry> {
        self.by_idnum.values()
    }

    /// Entries in name order.
    pub fn iter_by_name(&self) -> impl Iterator<Item = &PlayerIndexEntry> {
        self.by_name.values().filter_map(|id| self.by_idnum.get(id))
    }

    pub fn top_idnum(&self) -> Idnum {
        self.by_idnum.keys().next_back().copied().unwrap_or(0)
    }

    pub fn find_by_idnum(&self, idnum: Idnum) -> Option<&PlayerIndexEntry> {
        self.by_idnum.get(&idnum)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&PlayerIndexEntry> {
        let key = name.trim().to_lowercase();
        self.by_name.get(&key).and_then(|id| self.by_idnum.get(id))
    }

    /// Add a new entry. Re-inserting an identical idnum/name pair replaces the
    /// summary; any other collision is rejected and leaves the index unchanged.
    pub fn insert(&mut self, mut entry: PlayerIndexEntry) -> Result<(), PlayerDbError> {
        entry.name = entry.name.trim().to_lowercase();
        if let Some(existing) = self.by_idnum.get(&entry.idnum) {
            if existing.name != entry.name {
                return Err(PlayerDbError::DuplicateIdnum(entry.idnum));
            }
        }
        if let Some(&other) = self.by_name.get(&entry.name) {
            if other != entry.idnum {
                return Err(PlayerDbError::DuplicateName(entry.name));
            }
        }
        self.by_name.insert(entry.name.clone(), entry.idnum);
        self.by_idnum.insert(entry.idnum, entry);
        Ok(())
    }

    /// Insert or refresh an entry, following a rename if the idnum is
    /// already indexed under another name.
    pub fn update(&mut self, mut entry: PlayerIndexEntry) -> Result<(), PlayerDbError> {
        entry.name = entry.name.trim().to_lowercase();
        if let Some(&other) = self.by_name.get(&entry.name) {
            if other != entry.idnum {
                return Err(PlayerDbError::DuplicateName(entry.name));
            }
        }
        if let Some(old) = self.by_idnum.get(&entry.idnum) {
            if old.name != entry.name {
                debug!("index rename #{}: '{}' -> '{}'", entry.idnum, old.name, entry.name);
                let old_name = old.name.clone();
                self.by_name.remove(&old_name);
            }
        }
        self.by_name.insert(entry.name.clone(), entry.idnum);
        self.by_idnum.insert(entry.idnum, entry);
        Ok(())
    }

    /// Remove an entry from both views.
    pub fn remove(&mut self, idnum: Idnum) -> Option<PlayerIndexEntry> {
        let entry = self.by_idnum.remove(&idnum)?;
        if self.by_name.get(&entry.name) == Some(&idnum) {
            self.by_name.remove(&entry.name);
        }
        Some(entry)
    }

    /// Bootstrap: load every unresolved account link through `load`, index
    /// it and resolve the link. Links that fail to load (or collide with an
    /// already-indexed player) are dropped; accounts left empty are deleted.
    pub fn rebuild_from<F>(&mut self, accounts: &mut AccountStore, mut load: F) -> Result<RebuildReport, PlayerDbError>
    where
        F: FnMut(&str) -> Result<PlayerRecord, PlayerDbError>,
    {
        let mut report = RebuildReport::default();

        for (account_id, name) in accounts.unresolved_links() {
            let outcome = match load(&name) {
                Ok(record) if record.idnum > 0 => {
                    let mut entry = PlayerIndexEntry::from_record(&record);
                    entry.account_id = Some(account_id);
                    let owner = self.find_by_idnum(entry.idnum).map(|e| e.account_id);
                    let inserted = match owner {
                        Some(owner) if owner != Some(account_id) => Err(format!(
                            "idnum {} already listed under account #{}",
                            entry.idnum,
                            owner.unwrap_or_default()
                        )),
                        _ => self.insert(entry).map_err(|e| e.to_string()),
                    };
                    inserted.map(|()| record.idnum)
                }
                Ok(record) => Err(format!("invalid idnum {}", record.idnum)),
                // a record that exists but cannot be trusted stops the boot
                Err(e) if e.is_structural() => return Err(e),
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(idnum) => {
                    accounts.resolve_link(account_id, &name, idnum);
                    report.indexed += 1;
                }
                Err(reason) => {
                    error!(
                        "dropping player '{}' from account #{}: {}",
                        escape_log(&name),
                        account_id,
                        escape_log(&reason)
                    );
                    report.dropped_links.push((account_id, name.clone()));
                    if accounts.drop_link(account_id, &name)? {
                        error!("account #{account_id} had no loadable players and was deleted");
                        report.deleted_accounts.push(account_id);
                    }
                }
            }
        }

        report.top_idnum = self.top_idnum();
        report.top_account_id = accounts.top_id();
        info!(
            "player index rebuilt: {} players, {} links dropped, {} accounts deleted",
            self.len(),
            report.dropped_links.len(),
            report.deleted_accounts.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(idnum: Idnum, name: &str) -> PlayerIndexEntry {
        PlayerIndexEntry {
            idnum,
            name: name.to_string(),
            fullname: name.to_string(),
            ..PlayerIndexEntry::default()
        }
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let mut index = PlayerIndex::new();
        index.insert(entry(3, "Alice")).expect("insert");
        assert_eq!(index.find_by_name("ALICE").map(|e| e.idnum), Some(3));
        assert_eq!(index.find_by_idnum(3).map(|e| e.name.as_str()), Some("alice"));
    }

    #[test]
    fn collisions_are_rejected_without_side_effects() {
        let mut index = PlayerIndex::new();
        index.insert(entry(1, "Alice")).expect("insert");
        assert!(matches!(index.insert(entry(1, "Bob")), Err(PlayerDbError::DuplicateIdnum(1))));
        assert!(matches!(index.insert(entry(2, "alice")), Err(PlayerDbError::DuplicateName(_))));
        assert_eq!(index.len(), 1);
        assert!(index.find_by_name("bob").is_none());
        assert!(index.find_by_idnum(2).is_none());
    }

    #[test]
    fn update_follows_rename() {
        let mut index = PlayerIndex::new();
        index.insert(entry(1, "Alice")).expect("insert");
        index.update(entry(1, "Alicia")).expect("rename");
        assert!(index.find_by_name("alice").is_none());
        assert_eq!(index.find_by_name("alicia").map(|e| e.idnum), Some(1));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn views_stay_in_sync_after_removals() {
        let mut index = PlayerIndex::new();
        for (id, name) in [(5, "Eve"), (2, "Bob"), (9, "Zed"), (1, "Amy")] {
            index.insert(entry(id, name)).expect("insert");
        }
        index.remove(2);
        let ids: Vec<_> = index.iter().map(|e| e.idnum).collect();
        let names: Vec<_> = index.iter_by_name().map(|e| e.name.clone()).collect();
        assert_eq!(ids, vec![1, 5, 9]);
        assert_eq!(names, vec!["amy", "eve", "zed"]);
        assert_eq!(index.top_idnum(), 9);
        assert!(index.remove(2).is_none());
    }
}
