//! Test utilities & fixtures.
//! Provides access to the integration data tree under `tests/test-data-int`
//! and a configurable in-memory world.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use empiredb::playerdb::types::{EmpireVnum, RoomVnum};
use empiredb::playerdb::{PlayerRecord, PlayerRepository, RepositoryOptions, WorldMap};
use empiredb::storage::DataLayout;

/// Wall clock used by every fixture; records in the tree were last seen two days earlier.
#[allow(dead_code)]
pub const NOW: i64 = 1_700_000_000;

/// Return the path to the static integration test fixture directory.
/// Kept small & deterministic. Tests should copy to a temp dir if they mutate.
pub fn fixture_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("test-data-int")
}

fn copy_tree(src: &Path, dst: &Path) {
    std::fs::create_dir_all(dst).unwrap();
    for entry in std::fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let target = dst.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_tree(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), &target).unwrap();
        }
    }
}

/// Return a writable copy (temp dir) of the whole fixture tree: accounts,
/// player files and the empire table.
#[allow(dead_code)]
pub fn writable_fixture() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().expect("tempdir");
    copy_tree(&fixture_root(), tmp.path());
    tmp
}

#[allow(dead_code)]
pub fn open_repo(root: &Path, now: i64) -> PlayerRepository {
    PlayerRepository::open(DataLayout::new(root), RepositoryOptions::default(), now).expect("open repository")
}

/// A fresh player with a password and some history, registered and saved.
#[allow(dead_code)]
pub fn make_player(repo: &mut PlayerRepository, name: &str, now: i64) -> PlayerRecord {
    let mut rec = PlayerRecord::new(name, now - 200 * 86_400);
    rec.password = Some("x".into());
    rec.played = 100 * 3600;
    rec.pools.max = [60, 100, 50, 10];
    rec.pools.current = [60, 100, 50, 10];
    rec.transient.session_logon = now;
    repo.register_new(&mut rec, now).expect("register");
    repo.save_player(&mut rec, None, &TestWorld::default(), now)
        .expect("save");
    rec
}

/// A world made of a handful of rooms, each optionally on a map tile.
#[derive(Debug, Default, Clone)]
#[allow(dead_code)]
pub struct TestWorld {
    pub rooms: HashMap<RoomVnum, Option<RoomVnum>>,
    pub hostile: HashSet<RoomVnum>,
    pub home: Option<RoomVnum>,
    pub start_room: Option<RoomVnum>,
}

#[allow(dead_code)]
impl TestWorld {
    /// A room sitting on its own map tile.
    pub fn with_room(mut self, room: RoomVnum) -> Self {
        self.rooms.insert(room, Some(room));
        self
    }

    pub fn with_room_on(mut self, room: RoomVnum, map_loc: RoomVnum) -> Self {
        self.rooms.insert(room, Some(map_loc));
        self
    }

    pub fn hostile(mut self, room: RoomVnum) -> Self {
        self.hostile.insert(room);
        self
    }

    pub fn home(mut self, room: RoomVnum) -> Self {
        self.home = Some(room);
        self
    }

    pub fn start_room(mut self, room: RoomVnum) -> Self {
        self.start_room = Some(room);
        self
    }
}

impl WorldMap for TestWorld {
    fn room_exists(&self, room: RoomVnum) -> bool {
        self.rooms.contains_key(&room)
    }

    fn map_location_for(&self, room: RoomVnum) -> Option<RoomVnum> {
        self.rooms.get(&room).copied().flatten()
    }

    fn is_hostile_territory(&self, room: RoomVnum, _loyalty: Option<EmpireVnum>) -> bool {
        self.hostile.contains(&room)
    }

    fn find_home(&self, _record: &PlayerRecord) -> Option<RoomVnum> {
        self.home
    }

    fn find_load_room(&self, _record: &PlayerRecord) -> Option<RoomVnum> {
        self.start_room
    }
}
