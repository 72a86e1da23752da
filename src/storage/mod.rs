//! # Storage Module - On-disk Layout and Atomic Writes
//!
//! Every durable file the player database owns lives under one data directory:
//!
//! ```text
//! data/
//! ├── players/
//! │   ├── a/alice.plr     ← one tagged-text record per player, bucketed by initial
//! │   └── a/alice.mem     ← pending script variables (owned by the game, removed on delete)
//! ├── accounts/
//! │   ├── index           ← compact id ranges of existing accounts
//! │   └── 12.acct         ← one file per account
//! └── empires.json        ← empire aggregates
//! ```
//!
//! All writes go through [`write_file_locked`]: a `.<name>.lock` sibling is
//! locked exclusively, the content is written to a unique temporary sibling,
//! flushed and fsynced, then renamed over the destination. The destination
//! only ever appears through that rename, so a crash mid-write leaves either
//! the previous file or no file at all.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::debug;

use crate::validation::player_file_stem;

/// Player record file suffix.
pub const PLR_SUFFIX: &str = "plr";
/// Script-variable file suffix.
pub const MEM_SUFFIX: &str = "mem";
/// Account file suffix.
pub const ACCT_SUFFIX: &str = "acct";

/// Paths of every file the database owns.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn players_dir(&self) -> PathBuf {
        self.root.join("players")
    }

    pub fn accounts_dir(&self) -> PathBuf {
        self.root.join("accounts")
    }

    pub fn account_index(&self) -> PathBuf {
        self.accounts_dir().join("index")
    }

    pub fn account_file(&self, id: i32) -> PathBuf {
        self.accounts_dir().join(format!("{id}.{ACCT_SUFFIX}"))
    }

    pub fn empire_table(&self) -> PathBuf {
        self.root.join("empires.json")
    }

    fn player_path(&self, name: &str, suffix: &str) -> Option<PathBuf> {
        let stem = player_file_stem(name)?;
        let bucket = stem.chars().next()?.to_string();
        Some(self.players_dir().join(bucket).join(format!("{stem}.{suffix}")))
    }

    /// Player record path, or `None` when the name cannot map to a file.
    pub fn player_file(&self, name: &str) -> Option<PathBuf> {
        self.player_path(name, PLR_SUFFIX)
    }

    pub fn script_vars_file(&self, name: &str) -> Option<PathBuf> {
        self.player_path(name, MEM_SUFFIX)
    }

    /// Create the directory skeleton.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(self.players_dir())?;
        fs::create_dir_all(self.accounts_dir())?;
        Ok(())
    }
}

/// Lock file guarding writes to `path`.
pub fn lock_path(path: &Path) -> PathBuf {
    let base = path.file_name().and_then(|s| s.to_str()).unwrap_or("data");
    path.with_file_name(format!(".{base}.lock"))
}

/// Atomically replace `path` with `content` under an exclusive lock.
pub fn write_file_locked(path: &Path, content: &[u8]) -> io::Result<()> {
    write_file_locked_staged(path, content, |_| Ok(()))
}

/// [`write_file_locked`], calling `staged` with the synced temp file just
/// before it is renamed over `path`. An error from `staged` abandons the write.
fn write_file_locked_staged<F>(path: &Path, content: &[u8], staged: F) -> io::Result<()>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    // Step 1: lock the sibling lock file, never the destination itself
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(lock_path(path))?;
    lock_file.lock_exclusive()?;

    // Step 2: unique temp sibling, fully written and synced
    let base = path.file_name().and_then(|s| s.to_str()).unwrap_or("data");
    let mut counter = 0u32;
    let tmp_path = loop {
        let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut tmp) => {
                tmp.write_all(content)?;
                tmp.flush()?;
                tmp.sync_all()?;
                break candidate;
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
            }
            Err(e) => return Err(e),
        }
    };

    // Step 3: atomic replace
    if let Err(e) = staged(&tmp_path).and_then(|()| fs::rename(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    // Step 4: persist the rename (best-effort)
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }

    drop(lock_file);
    debug!("wrote {}", path.display());
    Ok(())
}

/// Remove a file, treating "already gone" as success. Returns whether a file was removed.
pub fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Open a file for reading; a missing file is `Ok(None)`.
pub fn open_if_exists(path: &Path) -> io::Result<Option<File>> {
    match File::open(path) {
        Ok(f) => Ok(Some(f)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
