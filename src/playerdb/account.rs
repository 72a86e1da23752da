//! Account store.
//!
//! An account groups the player characters owned by one person. Each account
//! is persisted as its own file; a compact id-range index lists which account
//! files exist so the store can be opened without a directory scan.
//!
//! Account file:
//!
//! ```text
//! #12
//! 1700000000 ab
//! free-form notes
//! ending with a tilde~
//! P alice
//! P bob
//! S
//! ```
//!
//! Index file: one `lo-hi` (or single `id`) range per line, terminated by `$`.

use std::collections::BTreeMap;
use std::io::Read;

use log::{debug, info, warn};

use crate::logutil::escape_log;
use crate::playerdb::errors::PlayerDbError;
use crate::playerdb::flags;
use crate::playerdb::index::{PlayerIndex, PlayerIndexEntry};
use crate::playerdb::types::{AccountId, Idnum};
use crate::storage::{self, DataLayout};

/// One player listed under an account. `idnum` is filled in once the player
/// has been matched to an index entry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AccountPlayerLink {
    /// Case-folded player name.
    pub name: String,
    pub idnum: Option<Idnum>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Account {
    pub id: AccountId,
    pub last_logon: i64,
    pub notes: String,
    pub flags: u64,
    pub players: Vec<AccountPlayerLink>,
}

impl Account {
    fn new(id: AccountId) -> Self {
        Self {
            id,
            last_logon: 0,
            notes: String::new(),
            flags: 0,
            players: Vec::new(),
        }
    }

    pub fn has_player(&self, name: &str) -> bool {
        let key = name.to_lowercase();
        self.players.iter().any(|p| p.name == key)
    }

    fn position_of(&self, entry: &PlayerIndexEntry) -> Option<usize> {
        self.players
            .iter()
            .position(|p| p.idnum == Some(entry.idnum))
            .or_else(|| self.players.iter().position(|p| p.name == entry.name))
    }
}

pub struct AccountStore {
    layout: DataLayout,
    accounts: BTreeMap<AccountId, Account>,
    top_id: AccountId,
}

fn format_err(file: &str, line: usize, reason: impl Into<String>) -> PlayerDbError {
    PlayerDbError::Format {
        file: file.to_string(),
        line,
        reason: reason.into(),
    }
}

/// Parse one account file. Any deviation from the format is structural.
pub fn parse_account(text: &str, expected_id: AccountId, file: &str) -> Result<Account, PlayerDbError> {
    let mut lines = text.lines().map(|l| l.trim_end_matches('\r')).enumerate();
    let mut next = |what: &str| {
        lines
            .next()
            .map(|(i, l)| (i + 1, l))
            .ok_or_else(|| format_err(file, 0, format!("unexpected end of file, expected {what}")))
    };

    let (no, header) = next("#id")?;
    let id: AccountId = header
        .strip_prefix('#')
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| format_err(file, no, "expected #id header"))?;
    if id != expected_id {
        return Err(format_err(file, no, format!("holds account #{id}, expected #{expected_id}")));
    }

    let (no, first) = next("last logon and flags")?;
    let mut parts = first.split_whitespace();
    let last_logon: i64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| format_err(file, no, "bad last logon"))?;
    let flag_text = parts.next().ok_or_else(|| format_err(file, no, "missing flags"))?;
    let (acct_flags, bad) = flags::from_alpha(flag_text);
    if let Some(bad) = bad {
        warn!("account #{id}: {bad}");
    }

    let mut notes = Vec::new();
    loop {
        let (_, line) = next("notes terminated by ~")?;
        if let Some(last) = line.strip_suffix('~') {
            notes.push(last);
            break;
        }
        notes.push(line);
    }

    let mut account = Account {
        id,
        last_logon,
        notes: notes.join("\n"),
        flags: acct_flags,
        players: Vec::new(),
    };

    loop {
        let (no, line) = next("P or S")?;
        if line == "S" {
            return Ok(account);
        }
        match line.strip_prefix("P ") {
            Some(name) if !name.trim().is_empty() => {
                let name = name.trim().to_lowercase();
                if account.has_player(&name) {
                    warn!("account #{id}: duplicate player link '{}'", escape_log(&name));
                    continue;
                }
                account.players.push(AccountPlayerLink { name, idnum: None });
            }
            _ => return Err(format_err(file, no, "expected 'P <name>' or 'S'")),
        }
    }
}

/// Canonical account file text.
pub fn encode_account(account: &Account) -> String {
    let mut out = format!("#{}\n{} {}\n", account.id, account.last_logon, flags::to_alpha(account.flags));
    out.push_str(&account.notes.replace('~', "").replace('\r', ""));
    out.push_str("~\n");
    for link in &account.players {
        out.push_str("P ");
        out.push_str(&link.name);
        out.push('\n');
    }
    out.push_str("S\n");
    out
}

/// Parse the id-range index into the list of account ids it names.
pub fn parse_index(text: &str, file: &str) -> Result<Vec<AccountId>, PlayerDbError> {
    let mut ids = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "$" {
            return Ok(ids);
        }
        let range = match line.split_once('-') {
            Some((lo, hi)) => lo.trim().parse().ok().zip(hi.trim().parse().ok()),
            None => line.parse().ok().map(|id| (id, id)),
        };
        let (lo, hi): (AccountId, AccountId) = range.ok_or_else(|| format_err(file, i + 1, "bad id range"))?;
        if lo > hi {
            return Err(format_err(file, i + 1, "descending id range"));
        }
        ids.extend(lo..=hi);
    }
    Err(format_err(file, 0, "missing $ terminator"))
}

/// Compress ascending ids into ranges.
pub fn encode_index<I: IntoIterator<Item = AccountId>>(ids: I) -> String {
    let mut out = String::new();
    let mut run: Option<(AccountId, AccountId)> = None;
    let flush = |run: (AccountId, AccountId), out: &mut String| {
        if run.0 == run.1 {
            out.push_str(&format!("{}\n", run.0));
        } else {
            out.push_str(&format!("{}-{}\n", run.0, run.1));
        }
    };
    for id in ids {
        run = match run {
            Some((lo, hi)) if id == hi + 1 => Some((lo, id)),
            Some(prev) => {
                flush(prev, &mut out);
                Some((id, id))
            }
            None => Some((id, id)),
        };
    }
    if let Some(prev) = run {
        flush(prev, &mut out);
    }
    out.push_str("$\n");
    out
}

impl AccountStore {
    /// A store with no accounts; nothing is read or written.
    pub fn empty(layout: DataLayout) -> Self {
        Self {
            layout,
            accounts: BTreeMap::new(),
            top_id: 0,
        }
    }

    /// Load the index and every account it lists. A listed account whose file
    /// is missing or malformed is a structural error.
    pub fn open(layout: DataLayout) -> Result<Self, PlayerDbError> {
        let mut store = Self::empty(layout);
        let index_path = store.layout.account_index();
        let Some(mut file) = storage::open_if_exists(&index_path)? else {
            debug!("no account index at {}", index_path.display());
            return Ok(store);
        };
        let mut text = String::new();
        file.read_to_string(&mut text)?;
        let ids = parse_index(&text, &index_path.display().to_string())?;

        for id in ids {
            let path = store.layout.account_file(id);
            let body = std::fs::read_to_string(&path)?;
            let account = parse_account(&body, id, &path.display().to_string())?;
            store.top_id = store.top_id.max(id);
            store.accounts.insert(id, account);
        }
        info!("loaded {} accounts", store.accounts.len());
        Ok(store)
    }

    pub fn find(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn ids(&self) -> Vec<AccountId> {
        self.accounts.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Highest account id ever seen; the next account gets `top_id() + 1`.
    pub fn top_id(&self) -> AccountId {
        self.top_id
    }

    /// The account that lists this player, by idnum or case-folded name.
    pub fn account_of(&self, entry: &PlayerIndexEntry) -> Option<AccountId> {
        self.accounts
            .values()
            .find(|a| a.position_of(entry).is_some())
            .map(|a| a.id)
    }

    fn ensure_unlinked_elsewhere(&self, entry: &PlayerIndexEntry, target: Option<AccountId>) -> Result<(), PlayerDbError> {
        match self.account_of(entry) {
            Some(other) if Some(other) != target => Err(PlayerDbError::LinkedElsewhere {
                name: entry.name.clone(),
                account: other,
            }),
            _ => Ok(()),
        }
    }

    /// Create a new account holding just this player.
    pub fn create_for(&mut self, entry: &PlayerIndexEntry, now: i64) -> Result<AccountId, PlayerDbError> {
        self.ensure_unlinked_elsewhere(entry, None)?;
        let id = self.top_id + 1;
        let mut account = Account::new(id);
        account.last_logon = now;
        account.players.push(AccountPlayerLink {
            name: entry.name.clone(),
            idnum: Some(entry.idnum),
        });
        self.top_id = id;
        self.accounts.insert(id, account);
        self.persist(id)?;
        self.persist_index()?;
        info!("created account #{} for '{}'", id, escape_log(&entry.name));
        Ok(id)
    }

    /// Add a player to an existing account. A matching unresolved link is
    /// resolved in place instead of duplicated.
    pub fn link(&mut self, account_id: AccountId, entry: &PlayerIndexEntry) -> Result<(), PlayerDbError> {
        if !self.accounts.contains_key(&account_id) {
            return Err(PlayerDbError::AccountNotFound(account_id));
        }
        self.ensure_unlinked_elsewhere(entry, Some(account_id))?;
        let account = self
            .accounts
            .get_mut(&account_id)
            .ok_or(PlayerDbError::AccountNotFound(account_id))?;

        match account.players.iter_mut().find(|p| p.name == entry.name) {
            Some(link) => match link.idnum {
                None => link.idnum = Some(entry.idnum),
                Some(id) if id == entry.idnum => return Ok(()),
                Some(_) => return Err(PlayerDbError::DuplicateName(entry.name.clone())),
            },
            None => {
                // a renamed player keeps their resolved link
                if let Some(link) = account.players.iter_mut().find(|p| p.idnum == Some(entry.idnum)) {
                    link.name = entry.name.clone();
                } else {
                    account.players.push(AccountPlayerLink {
                        name: entry.name.clone(),
                        idnum: Some(entry.idnum),
                    });
                }
            }
        }
        self.persist(account_id)
    }

    /// Remove a player from whichever account lists them. Returns true when
    /// that emptied and deleted the account.
    pub fn unlink(&mut self, entry: &PlayerIndexEntry) -> Result<bool, PlayerDbError> {
        let account_id = match entry.account_id.filter(|id| {
            self.accounts
                .get(id)
                .is_some_and(|a| a.position_of(entry).is_some())
        }) {
            Some(id) => id,
            None => match self.account_of(entry) {
                Some(id) => id,
                None => return Ok(false),
            },
        };
        self.remove_link(account_id, entry)
    }

    fn remove_link(&mut self, account_id: AccountId, entry: &PlayerIndexEntry) -> Result<bool, PlayerDbError> {
        let account = self
            .accounts
            .get_mut(&account_id)
            .ok_or(PlayerDbError::AccountNotFound(account_id))?;
        if let Some(pos) = account.position_of(entry) {
            account.players.remove(pos);
        }
        if account.players.is_empty() {
            self.delete(account_id)?;
            return Ok(true);
        }
        self.persist(account_id)?;
        Ok(false)
    }

    /// Drop a link that could not be resolved. Returns true when the account
    /// was left empty and deleted.
    pub(crate) fn drop_link(&mut self, account_id: AccountId, name: &str) -> Result<bool, PlayerDbError> {
        let account = self
            .accounts
            .get_mut(&account_id)
            .ok_or(PlayerDbError::AccountNotFound(account_id))?;
        account.players.retain(|p| p.name != name);
        if account.players.is_empty() {
            self.delete(account_id)?;
            return Ok(true);
        }
        self.persist(account_id)?;
        Ok(false)
    }

    pub(crate) fn resolve_link(&mut self, account_id: AccountId, name: &str, idnum: Idnum) {
        if let Some(link) = self
            .accounts
            .get_mut(&account_id)
            .and_then(|a| a.players.iter_mut().find(|p| p.name == name))
        {
            link.idnum = Some(idnum);
        }
    }

    /// Names of links not yet matched to an index entry, per account.
    pub(crate) fn unresolved_links(&self) -> Vec<(AccountId, String)> {
        self.accounts
            .values()
            .flat_map(|a| {
                a.players
                    .iter()
                    .filter(|p| p.idnum.is_none())
                    .map(move |p| (a.id, p.name.clone()))
            })
            .collect()
    }

    /// Recompute an account's last logon as the newest of its players'.
    pub fn refresh_last_logon(&mut self, account_id: AccountId, index: &PlayerIndex) -> Result<(), PlayerDbError> {
        let Some(account) = self.accounts.get_mut(&account_id) else {
            return Err(PlayerDbError::AccountNotFound(account_id));
        };
        let newest = account
            .players
            .iter()
            .filter_map(|p| p.idnum.and_then(|id| index.find_by_idnum(id)))
            .map(|e| e.last_logon)
            .max()
            .unwrap_or(account.last_logon);
        if newest != account.last_logon {
            account.last_logon = newest;
            self.persist(account_id)?;
        }
        Ok(())
    }

    pub fn set_notes(&mut self, account_id: AccountId, notes: &str) -> Result<(), PlayerDbError> {
        let account = self
            .accounts
            .get_mut(&account_id)
            .ok_or(PlayerDbError::AccountNotFound(account_id))?;
        account.notes = notes.to_string();
        self.persist(account_id)
    }

    /// The index is rewritten before the file goes, so an interrupted delete
    /// leaves at worst an unlisted account file, which `open` never reads.
    fn delete(&mut self, account_id: AccountId) -> Result<(), PlayerDbError> {
        self.accounts.remove(&account_id);
        self.persist_index()?;
        let path = self.layout.account_file(account_id);
        storage::remove_file_if_exists(&path)?;
        storage::remove_file_if_exists(&storage::lock_path(&path))?;
        info!("deleted empty account #{account_id}");
        Ok(())
    }

    fn persist(&self, account_id: AccountId) -> Result<(), PlayerDbError> {
        let account = self
            .accounts
            .get(&account_id)
            .ok_or(PlayerDbError::AccountNotFound(account_id))?;
        let path = self.layout.account_file(account_id);
        storage::write_file_locked(&path, encode_account(account).as_bytes())?;
        Ok(())
    }

    fn persist_index(&self) -> Result<(), PlayerDbError> {
        let text = encode_index(self.accounts.keys().copied());
        storage::write_file_locked(&self.layout.account_index(), text.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(idnum: Idnum, name: &str) -> PlayerIndexEntry {
        PlayerIndexEntry {
            idnum,
            name: name.to_lowercase(),
            fullname: name.to_string(),
            ..PlayerIndexEntry::default()
        }
    }

    #[test]
    fn index_ranges_compress_and_expand() {
        let text = encode_index([1, 2, 3, 5, 8, 9]);
        assert_eq!(text, "1-3\n5\n8-9\n$\n");
        assert_eq!(parse_index(&text, "index").expect("parse"), vec![1, 2, 3, 5, 8, 9]);
        assert_eq!(encode_index(Vec::<AccountId>::new()), "$\n");
    }

    #[test]
    fn index_without_terminator_is_structural() {
        let err = parse_index("1-3\n", "index").unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn account_file_round_trip() {
        let account = Account {
            id: 4,
            last_logon: 99,
            notes: "line one\nline two".into(),
            flags: 0b101,
            players: vec![
                AccountPlayerLink { name: "alice".into(), idnum: None },
                AccountPlayerLink { name: "bob".into(), idnum: None },
            ],
        };
        let text = encode_account(&account);
        assert_eq!(text, "#4\n99 ac\nline one\nline two~\nP alice\nP bob\nS\n");
        assert_eq!(parse_account(&text, 4, "4.acct").expect("parse"), account);
    }

    #[test]
    fn account_file_errors_are_structural() {
        assert!(parse_account("#4\n99 0\nnotes~\nP alice\n", 4, "f").unwrap_err().is_structural());
        assert!(parse_account("#5\n99 0\n~\nS\n", 4, "f").is_err());
        assert!(parse_account("#4\n99 0\n~\nQ x\nS\n", 4, "f").is_err());
    }

    #[test]
    fn link_resolves_pending_name_instead_of_duplicating() {
        let tmp = TempDir::new().expect("tempdir");
        let layout = DataLayout::new(tmp.path());
        let mut store = AccountStore::empty(layout);
        let id = store.create_for(&entry(1, "Alice"), 10).expect("create");
        store.accounts.get_mut(&id).expect("acct").players.push(AccountPlayerLink {
            name: "bob".into(),
            idnum: None,
        });
        store.link(id, &entry(2, "Bob")).expect("link");
        let acct = store.find(id).expect("acct");
        assert_eq!(acct.players.len(), 2);
        assert_eq!(acct.players[1].idnum, Some(2));
    }

    #[test]
    fn link_to_second_account_requires_unlink() {
        let tmp = TempDir::new().expect("tempdir");
        let mut store = AccountStore::empty(DataLayout::new(tmp.path()));
        let bob = entry(2, "Bob");
        let first = store.create_for(&bob, 10).expect("create");
        let second = store.create_for(&entry(3, "Carol"), 10).expect("create");
        match store.link(second, &bob) {
            Err(PlayerDbError::LinkedElsewhere { account, .. }) => assert_eq!(account, first),
            other => panic!("expected LinkedElsewhere, got {other:?}"),
        }
        assert!(store.unlink(&bob).expect("unlink"));
        store.link(second, &bob).expect("link after unlink");
        assert!(store.find(first).is_none());
    }

    #[test]
    fn unlink_last_player_deletes_account_on_disk() {
        let tmp = TempDir::new().expect("tempdir");
        let layout = DataLayout::new(tmp.path());
        let mut store = AccountStore::empty(layout.clone());
        let alice = entry(1, "Alice");
        let id = store.create_for(&alice, 10).expect("create");
        assert!(layout.account_file(id).exists());
        assert!(store.unlink(&alice).expect("unlink"));
        assert!(!layout.account_file(id).exists());
        let reopened = AccountStore::open(layout).expect("open");
        assert!(reopened.is_empty());
    }

    #[test]
    fn unlisted_account_file_is_ignored_on_open() {
        let tmp = TempDir::new().expect("tempdir");
        let layout = DataLayout::new(tmp.path());
        let mut store = AccountStore::empty(layout.clone());
        let keep = store.create_for(&entry(1, "Alice"), 10).expect("create");
        let gone = store.create_for(&entry(2, "Bob"), 10).expect("create");
        let orphan = std::fs::read_to_string(layout.account_file(gone)).expect("read");

        store.unlink(&entry(2, "Bob")).expect("unlink");
        // the file removal never happened
        std::fs::write(layout.account_file(gone), orphan).expect("restore orphan");

        let reopened = AccountStore::open(layout).expect("open");
        assert_eq!(reopened.ids(), vec![keep]);
    }
}
