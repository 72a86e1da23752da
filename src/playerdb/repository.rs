//! The player repository: identity index, account store and player files
//! behind one explicitly constructed object.
//!
//! Nothing here is global. The game constructs a repository once with
//! [`PlayerRepository::open`], which loads every account and rebuilds the
//! identity index from the player files they list, then passes it by
//! reference to login, save and membership code.

use std::io::BufReader;

use log::{debug, error, info, warn};

use crate::logutil::escape_log;
use crate::playerdb::account::AccountStore;
use crate::playerdb::codec::{self, DecodeContext};
use crate::playerdb::empire::EmpireTable;
use crate::playerdb::errors::PlayerDbError;
use crate::playerdb::flags::PlayerFlags;
use crate::playerdb::index::{PlayerIndex, PlayerIndexEntry, RebuildReport};
use crate::playerdb::membership;
use crate::playerdb::timeout::MemberTimeout;
use crate::playerdb::types::{AccountId, Idnum, PlayerRecord, RoomVnum, NOTHING, NOWHERE};
use crate::playerdb::world::{OnlinePlayers, WorldMap};
use crate::storage::{self, DataLayout};

/// Policy knobs the repository needs when decoding records.
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    /// Absence after which a login restores the player.
    pub restore_after_secs: i64,
    pub timeout: MemberTimeout,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            restore_after_secs: 3600,
            timeout: MemberTimeout::default(),
        }
    }
}

/// A player obtained by [`PlayerRepository::find_or_load`].
#[derive(Debug)]
pub enum Found<'o> {
    /// The live, in-game instance.
    Online(&'o PlayerRecord),
    /// A transient copy read from disk; flagged to keep its login info.
    File(PlayerRecord),
}

impl Found<'_> {
    pub fn record(&self) -> &PlayerRecord {
        match self {
            Found::Online(r) => r,
            Found::File(r) => r,
        }
    }

    pub fn is_from_file(&self) -> bool {
        matches!(self, Found::File(_))
    }
}

pub struct PlayerRepository {
    layout: DataLayout,
    options: RepositoryOptions,
    index: PlayerIndex,
    accounts: AccountStore,
    top_idnum: Idnum,
    boot: RebuildReport,
}

/// Read and decode one player file without touching the index or accounts.
fn read_record_file(layout: &DataLayout, name: &str, ctx: &DecodeContext) -> Result<PlayerRecord, PlayerDbError> {
    let path = layout
        .player_file(name)
        .ok_or_else(|| PlayerDbError::InvalidName(name.to_string()))?;
    let Some(file) = storage::open_if_exists(&path)? else {
        return Err(PlayerDbError::NotFound(name.to_string()));
    };
    let decoded = codec::decode(BufReader::new(file), name, ctx)?;
    debug!(
        "read player '{}' (#{}) with {} warnings",
        escape_log(&decoded.record.name),
        decoded.record.idnum,
        decoded.warnings.len()
    );
    Ok(decoded.record)
}

impl PlayerRepository {
    /// Load accounts and rebuild the identity index. Structural problems in
    /// account files or player files are fatal; links to players that cannot
    /// be found are dropped.
    pub fn open(layout: DataLayout, options: RepositoryOptions, now: i64) -> Result<Self, PlayerDbError> {
        layout.ensure_dirs()?;
        let mut accounts = AccountStore::open(layout.clone())?;
        let mut index = PlayerIndex::new();
        let ctx = DecodeContext {
            now,
            restore_after_secs: options.restore_after_secs,
            timeout: options.timeout.clone(),
        };
        let boot = index.rebuild_from(&mut accounts, |name| read_record_file(&layout, name, &ctx))?;
        let top_idnum = boot.top_idnum;
        info!(
            "player repository open at {}: {} players in {} accounts",
            layout.root().display(),
            index.len(),
            accounts.len()
        );
        Ok(Self {
            layout,
            options,
            index,
            accounts,
            top_idnum,
            boot,
        })
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn index(&self) -> &PlayerIndex {
        &self.index
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub(crate) fn accounts_mut(&mut self) -> &mut AccountStore {
        &mut self.accounts
    }

    /// What the bootstrap rebuild repaired.
    pub fn boot_report(&self) -> &RebuildReport {
        &self.boot
    }

    pub fn top_idnum(&self) -> Idnum {
        self.top_idnum
    }

    pub fn decode_context(&self, now: i64) -> DecodeContext {
        DecodeContext {
            now,
            restore_after_secs: self.options.restore_after_secs,
            timeout: self.options.timeout.clone(),
        }
    }

    /// Next free idnum; never reused within a process.
    pub fn allocate_idnum(&mut self) -> Idnum {
        self.top_idnum += 1;
        self.top_idnum
    }

    /// Decode a player file with no side effects.
    pub fn read_record(&self, name: &str, now: i64) -> Result<PlayerRecord, PlayerDbError> {
        read_record_file(&self.layout, name, &self.decode_context(now))
    }

    /// Load a player for play: decode the file and make sure the player is
    /// indexed and belongs to an account.
    pub fn load_player(&mut self, name: &str, now: i64) -> Result<PlayerRecord, PlayerDbError> {
        let key = self
            .index
            .find_by_name(name)
            .map(|e| e.fullname.clone())
            .unwrap_or_else(|| name.trim().to_string());
        let mut record = self.read_record(&key, now)?;
        if record.idnum > 0 {
            self.ensure_account(&mut record, now)?;
        }
        Ok(record)
    }

    /// Make sure the record is indexed and linked to exactly one account.
    /// Prefers the account that already lists the player, then the stored
    /// account id, then a temporary account chosen during creation, and
    /// finally creates a fresh account.
    pub fn ensure_account(&mut self, record: &mut PlayerRecord, now: i64) -> Result<AccountId, PlayerDbError> {
        if record.idnum <= 0 {
            return Err(PlayerDbError::NoIdnum(record.name.clone()));
        }
        let mut entry = PlayerIndexEntry::from_record(record);
        if let Some(other) = self.index.find_by_name(&entry.name) {
            if other.idnum != entry.idnum {
                return Err(PlayerDbError::DuplicateName(entry.name));
            }
        }

        let existing = self.accounts.account_of(&entry);
        let stored = record.account_id.filter(|id| self.accounts.find(*id).is_some());
        let temporary = Some(record.temporary_account_id)
            .filter(|id| *id != NOTHING && self.accounts.find(*id).is_some());

        let account_id = match existing.or(stored).or(temporary) {
            Some(id) => {
                self.accounts.link(id, &entry)?;
                id
            }
            None => {
                if let Some(missing) = record.account_id {
                    warn!(
                        "player '{}' referenced missing account #{}; creating a new one",
                        escape_log(&record.name),
                        missing
                    );
                }
                self.accounts.create_for(&entry, now)?
            }
        };
        if temporary.is_some() {
            record.temporary_account_id = NOTHING;
        }

        record.account_id = Some(account_id);
        entry.account_id = Some(account_id);
        self.index.update(entry)?;
        self.top_idnum = self.top_idnum.max(record.idnum);
        Ok(account_id)
    }

    /// Move an indexed player onto an existing account. An account left
    /// empty by the move is deleted; returns whether that happened. The
    /// player's record picks up the new account on its next save.
    pub fn link_player(&mut self, name: &str, account_id: AccountId) -> Result<bool, PlayerDbError> {
        let mut entry = self.indexed_entry(name)?;
        if self.accounts.find(account_id).is_none() {
            return Err(PlayerDbError::AccountNotFound(account_id));
        }
        if self.accounts.account_of(&entry) == Some(account_id) {
            return Ok(false);
        }
        let emptied = self.accounts.unlink(&entry)?;
        self.accounts.link(account_id, &entry)?;
        entry.account_id = Some(account_id);
        self.index.update(entry)?;
        Ok(emptied)
    }

    /// Split an indexed player off onto a fresh account of their own.
    /// Returns the new account id and whether the old account was deleted.
    pub fn unlink_player(&mut self, name: &str, now: i64) -> Result<(AccountId, bool), PlayerDbError> {
        let mut entry = self.indexed_entry(name)?;
        let emptied = self.accounts.unlink(&entry)?;
        let account_id = self.accounts.create_for(&entry, now)?;
        entry.account_id = Some(account_id);
        self.index.update(entry)?;
        info!("'{}' split off onto account #{account_id}", escape_log(name));
        Ok((account_id, emptied))
    }

    fn indexed_entry(&self, name: &str) -> Result<PlayerIndexEntry, PlayerDbError> {
        self.index
            .find_by_name(name)
            .cloned()
            .ok_or_else(|| PlayerDbError::NotFound(name.to_string()))
    }

    /// Give a brand-new record its idnum, index entry and account.
    pub fn register_new(&mut self, record: &mut PlayerRecord, now: i64) -> Result<AccountId, PlayerDbError> {
        if record.idnum <= 0 {
            record.idnum = self.allocate_idnum();
            debug!("assigned idnum {} to '{}'", record.idnum, escape_log(&record.name));
        }
        self.ensure_account(record, now)
    }

    /// The online instance when there is one, otherwise a transient copy
    /// from disk. `Ok(None)` when no such player exists.
    pub fn find_or_load<'o, O>(&self, name: &str, online: &'o O, now: i64) -> Result<Option<Found<'o>>, PlayerDbError>
    where
        O: OnlinePlayers + ?Sized,
    {
        let Some(entry) = self.index.find_by_name(name) else {
            return Ok(None);
        };
        self.find_or_load_entry(entry.idnum, &entry.fullname, online, now)
    }

    pub(crate) fn find_or_load_entry<'o, O>(
        &self,
        idnum: Idnum,
        name: &str,
        online: &'o O,
        now: i64,
    ) -> Result<Option<Found<'o>>, PlayerDbError>
    where
        O: OnlinePlayers + ?Sized,
    {
        if let Some(live) = online.find_online(idnum) {
            return Ok(Some(Found::Online(live)));
        }
        match self.read_record(name, now) {
            Ok(mut record) => {
                record.player_flags.insert(PlayerFlags::KEEP_LAST_LOGIN_INFO);
                Ok(Some(Found::File(record)))
            }
            Err(PlayerDbError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write a player to disk and refresh their index summary.
    ///
    /// `location` is where the player is standing; it becomes the loadroom
    /// unless the player always resumes at a fixed loadroom.
    pub fn save_player(
        &mut self,
        record: &mut PlayerRecord,
        location: Option<RoomVnum>,
        world: &dyn WorldMap,
        now: i64,
    ) -> Result<(), PlayerDbError> {
        if record.idnum <= 0 {
            error!("refusing to save '{}' without an idnum", escape_log(&record.name));
            return Err(PlayerDbError::NoIdnum(record.name.clone()));
        }
        let path = self
            .layout
            .player_file(&record.name)
            .ok_or_else(|| PlayerDbError::InvalidName(record.name.clone()))?;
        if let Some(other) = self.index.find_by_name(&record.name) {
            if other.idnum != record.idnum {
                return Err(PlayerDbError::DuplicateName(record.key_name()));
            }
        }

        if !record.player_flags.contains(PlayerFlags::LOADROOM) {
            match location {
                Some(room) => {
                    record.load_room = room;
                    record.load_room_check = world.map_location_for(room).unwrap_or(NOWHERE);
                }
                None => {
                    record.load_room = NOWHERE;
                    record.load_room_check = NOWHERE;
                }
            }
        }
        record.checkpoint_session(now);
        // the index owns account membership once the player is indexed
        if let Some(current) = self.index.find_by_idnum(record.idnum).and_then(|e| e.account_id) {
            record.account_id = Some(current);
        }

        let text = codec::encode_to_string(record)?;
        storage::write_file_locked(&path, text.as_bytes())?;

        self.index.update(PlayerIndexEntry::from_record(record))?;
        self.top_idnum = self.top_idnum.max(record.idnum);
        if let Some(account_id) = record.account_id.filter(|id| self.accounts.find(*id).is_some()) {
            self.accounts.refresh_last_logon(account_id, &self.index)?;
        }
        debug!("saved player '{}' (#{})", escape_log(&record.name), record.idnum);
        Ok(())
    }

    /// Refresh a player's index summary without writing their file.
    pub fn refresh_index(&mut self, record: &PlayerRecord) -> Result<(), PlayerDbError> {
        if record.idnum <= 0 {
            return Err(PlayerDbError::NoIdnum(record.name.clone()));
        }
        self.index.update(PlayerIndexEntry::from_record(record))
    }

    /// Save an offline-edited copy at its own loadroom and release it.
    pub fn store_loaded(&mut self, mut record: PlayerRecord, world: &dyn WorldMap, now: i64) -> Result<(), PlayerDbError> {
        let location = Some(record.load_room).filter(|r| *r != NOWHERE);
        self.save_player(&mut record, location, world, now)
    }

    /// Permanently delete a player: leave their empire, unlink them from
    /// their account, drop the index entry and remove their files, then
    /// recount the empire they left. Returns true when their account was
    /// deleted along with them.
    pub fn delete_player<O>(
        &mut self,
        record: &mut PlayerRecord,
        empires: &mut EmpireTable,
        online: &O,
        now: i64,
    ) -> Result<bool, PlayerDbError>
    where
        O: OnlinePlayers + ?Sized,
    {
        let loyalty = record.loyalty.take();
        record.rank = 0;

        let entry = self
            .index
            .find_by_idnum(record.idnum)
            .cloned()
            .unwrap_or_else(|| PlayerIndexEntry::from_record(record));
        let account_deleted = self.accounts.unlink(&entry)?;
        self.index.remove(record.idnum);

        if let Some(path) = self.layout.player_file(&record.name) {
            storage::remove_file_if_exists(&path)?;
            storage::remove_file_if_exists(&storage::lock_path(&path))?;
        }
        if let Some(path) = self.layout.script_vars_file(&record.name) {
            storage::remove_file_if_exists(&path)?;
        }
        record.player_flags.insert(PlayerFlags::DELETED);
        record.account_id = None;
        info!("deleted player '{}' (#{})", escape_log(&record.name), record.idnum);

        if let Some(vnum) = loyalty.filter(|v| empires.contains(*v)) {
            membership::read_empire_members(self, empires, online, Some(vnum), false, now)?;
        }
        Ok(account_deleted)
    }

    /// Cross-check the identity chain: every index entry belongs to exactly
    /// one account and every account lists at least one indexed player.
    /// Returns a description of each problem found.
    pub fn verify(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for entry in self.index.iter() {
            let owners: Vec<AccountId> = self
                .accounts
                .iter()
                .filter(|a| a.players.iter().any(|p| p.idnum == Some(entry.idnum)))
                .map(|a| a.id)
                .collect();
            match owners.as_slice() {
                [] => problems.push(format!("player #{} '{}' has no account", entry.idnum, entry.name)),
                [one] if entry.account_id != Some(*one) => problems.push(format!(
                    "player #{} '{}' indexed under account {:?} but listed by #{}",
                    entry.idnum, entry.name, entry.account_id, one
                )),
                [_] => {}
                many => problems.push(format!(
                    "player #{} '{}' listed by {} accounts",
                    entry.idnum,
                    entry.name,
                    many.len()
                )),
            }
        }
        for account in self.accounts.iter() {
            if account.players.is_empty() {
                problems.push(format!("account #{} has no players", account.id));
            }
            for link in &account.players {
                match link.idnum.and_then(|id| self.index.find_by_idnum(id)) {
                    Some(_) => {}
                    None => problems.push(format!(
                        "account #{} lists unresolved player '{}'",
                        account.id, link.name
                    )),
                }
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playerdb::world::{EmptyWorld, NoOnlinePlayers};
    use tempfile::TempDir;

    const NOW: i64 = 1_700_000_000;

    fn open(tmp: &TempDir) -> PlayerRepository {
        PlayerRepository::open(DataLayout::new(tmp.path()), RepositoryOptions::default(), NOW).expect("open")
    }

    fn new_player(repo: &mut PlayerRepository, name: &str) -> PlayerRecord {
        let mut rec = PlayerRecord::new(name, NOW);
        rec.password = Some("hash".into());
        repo.register_new(&mut rec, NOW).expect("register");
        repo.save_player(&mut rec, None, &EmptyWorld, NOW).expect("save");
        rec
    }

    #[test]
    fn register_assigns_idnum_and_account() {
        let tmp = TempDir::new().expect("tempdir");
        let mut repo = open(&tmp);
        let rec = new_player(&mut repo, "Alice");
        assert_eq!(rec.idnum, 1);
        let account = rec.account_id.expect("account");
        assert!(repo.accounts().find(account).expect("acct").has_player("alice"));
        assert_eq!(repo.index().find_by_name("alice").map(|e| e.account_id), Some(Some(account)));
        assert!(repo.verify().is_empty());
    }

    #[test]
    fn reopen_rebuilds_index_from_accounts() {
        let tmp = TempDir::new().expect("tempdir");
        {
            let mut repo = open(&tmp);
            new_player(&mut repo, "Alice");
            new_player(&mut repo, "Bob");
        }
        let repo = open(&tmp);
        assert_eq!(repo.index().len(), 2);
        assert_eq!(repo.top_idnum(), 2);
        assert!(repo.boot_report().dropped_links.is_empty());
        assert!(repo.verify().is_empty());
    }

    #[test]
    fn find_or_load_flags_file_copies() {
        let tmp = TempDir::new().expect("tempdir");
        let mut repo = open(&tmp);
        new_player(&mut repo, "Alice");
        let found = repo
            .find_or_load("ALICE", &NoOnlinePlayers, NOW)
            .expect("load")
            .expect("found");
        assert!(found.is_from_file());
        assert!(found.record().player_flags.contains(PlayerFlags::KEEP_LAST_LOGIN_INFO));
        assert!(repo.find_or_load("nobody", &NoOnlinePlayers, NOW).expect("load").is_none());
    }

    #[test]
    fn offline_store_keeps_last_logon() {
        let tmp = TempDir::new().expect("tempdir");
        let mut repo = open(&tmp);
        let rec = new_player(&mut repo, "Alice");
        let Some(Found::File(mut copy)) = repo.find_or_load("alice", &NoOnlinePlayers, NOW + 500).expect("load") else {
            panic!("expected a file copy");
        };
        copy.bonus_exp = 9;
        repo.store_loaded(copy, &EmptyWorld, NOW + 500).expect("store");
        let back = repo.read_record("alice", NOW + 600).expect("read");
        assert_eq!(back.bonus_exp, 9);
        assert_eq!(back.prev_logon, rec.prev_logon);
        assert_eq!(back.played, rec.played);
    }

    #[test]
    fn save_rejects_name_held_by_another_idnum() {
        let tmp = TempDir::new().expect("tempdir");
        let mut repo = open(&tmp);
        new_player(&mut repo, "Alice");
        let mut impostor = PlayerRecord::new("alice", NOW);
        impostor.idnum = 42;
        assert!(matches!(
            repo.save_player(&mut impostor, None, &EmptyWorld, NOW),
            Err(PlayerDbError::DuplicateName(_))
        ));
    }
}
