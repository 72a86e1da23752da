mod common;

use std::collections::HashSet;

use common::{open_repo, writable_fixture, TestWorld, NOW};
use empiredb::playerdb::flags::{AffectFlags, PrefFlags};
use empiredb::playerdb::types::{atype, lore, Condition, LoreEntry, Pool, Position, RoomVnum};
use empiredb::playerdb::{
    enter_game, EmpireTable, GameHooks, LoginContext, LoginEnv, LoginOutcome, LoginPolicy, NoOnlinePlayers,
    PlayerRecord, PlayerRepository,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Records what the login asked the live game to do.
#[derive(Default)]
struct RecordingHooks {
    placed: Vec<RoomVnum>,
    closed_channels: HashSet<String>,
    greeted: bool,
    registered: bool,
}

impl GameHooks for RecordingHooks {
    fn place_in_room(&mut self, _record: &mut PlayerRecord, room: RoomVnum) {
        self.placed.push(room);
    }

    fn join_slash_channel(&mut self, _record: &PlayerRecord, channel: &str) -> bool {
        !self.closed_channels.contains(channel)
    }

    fn greet(&mut self, _record: &PlayerRecord) {
        self.greeted = true;
    }

    fn register_lookup(&mut self, _record: &PlayerRecord) {
        self.registered = true;
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    repo: PlayerRepository,
    empires: EmpireTable,
    policy: LoginPolicy,
    hooks: RecordingHooks,
}

impl Harness {
    fn new() -> Self {
        let tmp = writable_fixture();
        let repo = open_repo(tmp.path(), NOW);
        let empires = EmpireTable::load(&tmp.path().join("empires.json")).expect("empires");
        Self {
            _tmp: tmp,
            repo,
            empires,
            policy: LoginPolicy::default(),
            hooks: RecordingHooks::default(),
        }
    }

    fn load(&mut self, name: &str, now: i64) -> PlayerRecord {
        self.repo.load_player(name, now).expect("load")
    }

    fn login(&mut self, record: &mut PlayerRecord, world: &TestWorld, fresh: bool, now: i64) -> LoginOutcome {
        let ctx = LoginContext {
            host: Some("192.0.2.44"),
            fresh,
            now,
            policy: &self.policy,
        };
        let mut env = LoginEnv {
            world,
            hooks: &mut self.hooks,
            online: &NoOnlinePlayers,
        };
        let mut rng = StdRng::seed_from_u64(42);
        enter_game(&mut self.repo, &mut self.empires, record, &ctx, &mut env, &mut rng).expect("enter game")
    }
}

#[test]
fn valid_loadroom_is_kept_and_long_absence_restores() {
    let mut h = Harness::new();
    let world = TestWorld::default().with_room(3001).start_room(5000);
    let mut carol = h.load("carol", NOW);
    assert!(carol.is_restore_pending());

    let out = h.login(&mut carol, &world, false, NOW);
    assert_eq!(out.room, 3001);
    assert!(!out.loadroom_rejected);
    assert!(out.restored);
    assert_eq!(h.hooks.placed, vec![3001]);
    assert_eq!(carol.transient.in_room, Some(3001));
    assert_eq!(carol.pools.current(Pool::Health), 60);
    assert_eq!(carol.pools.current(Pool::Mana), 50);
    assert_eq!(carol.conditions[Condition::Full.index()], 0);
    assert!(!carol.is_restore_pending());
    assert_eq!(carol.transient.position, Position::Standing);
    assert!(h.hooks.greeted && h.hooks.registered);
    assert_eq!(carol.transient.lookup_id, Some(11));
}

#[test]
fn region_mismatch_sends_player_to_a_fresh_start_room() {
    let mut h = Harness::new();
    // room 3001 now sits on a different map tile than when carol logged out
    let world = TestWorld::default().with_room_on(3001, 4000).start_room(5000);
    let mut carol = h.load("carol", NOW);

    let out = h.login(&mut carol, &world, false, NOW);
    assert!(out.loadroom_rejected);
    assert_eq!(out.room, 5000);
    assert_eq!(carol.last_room, 3001);
}

#[test]
fn region_mismatch_prefers_home_over_a_start_room() {
    let mut h = Harness::new();
    let world = TestWorld::default().with_room_on(3001, 4000).home(700).start_room(5000);
    let mut carol = h.load("carol", NOW);

    let out = h.login(&mut carol, &world, false, NOW);
    assert!(out.loadroom_rejected);
    assert!(out.sent_home);
    assert_eq!(out.room, 700);
}

#[test]
fn player_without_a_loadroom_is_not_sent_home() {
    let mut h = Harness::new();
    let world = TestWorld::default().home(700).start_room(5000);
    let mut dave = h.load("dave", NOW);

    let out = h.login(&mut dave, &world, false, NOW);
    assert!(!out.loadroom_rejected);
    assert!(!out.sent_home);
    assert_eq!(out.room, 5000);
}

#[test]
fn restore_prunes_superseded_empire_lore() {
    let mut h = Harness::new();
    let world = TestWorld::default().with_room(3001);
    let mut carol = h.load("carol", NOW);
    carol.lore.insert(
        0,
        LoreEntry {
            kind: lore::JOIN_EMPIRE,
            date: 1_600_000_000,
            text: "Joined the empire of the Hollow Crown.".to_string(),
        },
    );

    let out = h.login(&mut carol, &world, false, NOW);
    assert!(out.restored);
    assert_eq!(carol.lore.len(), 1);
    assert_eq!(carol.lore[0].text, "Joined the empire of Aldoria.");
}

#[test]
fn nothing_valid_falls_back_to_the_default_room() {
    let mut h = Harness::new();
    let world = TestWorld::default().with_room_on(3001, 4000);
    let mut carol = h.load("carol", NOW);
    let out = h.login(&mut carol, &world, false, NOW);
    assert_eq!(out.room, 0);

    h.policy.fallback_room = 1200;
    let mut dave = h.load("dave", NOW);
    let out = h.login(&mut dave, &TestWorld::default(), false, NOW);
    assert_eq!(out.room, 1200);
}

#[test]
fn autorecall_after_absence_goes_home() {
    let mut h = Harness::new();
    let world = TestWorld::default().with_room(3001).home(700).start_room(5000);
    let mut carol = h.load("carol", NOW);
    carol.preferences.insert(PrefFlags::AUTORECALL);

    let out = h.login(&mut carol, &world, false, NOW);
    assert!(out.sent_home);
    assert_eq!(out.room, 700);
}

#[test]
fn autorecall_without_absence_stays_put() {
    let mut h = Harness::new();
    let world = TestWorld::default().with_room(3001).home(700);
    let soon = 1_699_827_200 + 60;
    let mut carol = h.load("carol", soon);
    carol.preferences.insert(PrefFlags::AUTORECALL);
    carol.pools.set_current(Pool::Health, 0);

    let out = h.login(&mut carol, &world, false, soon);
    assert!(!out.restored);
    assert!(!out.sent_home);
    assert_eq!(out.room, 3001);
    assert_eq!(carol.pools.current(Pool::Health), 1);
    assert_eq!(carol.conditions[Condition::Full.index()], 12);
}

#[test]
fn hostile_territory_without_a_home_uses_the_start_room() {
    let mut h = Harness::new();
    let world = TestWorld::default().with_room(3001).hostile(3001).start_room(5000);
    let mut carol = h.load("carol", NOW);

    let out = h.login(&mut carol, &world, false, NOW);
    assert!(!out.sent_home);
    assert_eq!(out.room, 5000);
}

#[test]
fn closed_channels_are_dropped() {
    let mut h = Harness::new();
    h.hooks.closed_channels.insert("traders".to_string());
    let world = TestWorld::default().with_room(3001);
    let mut carol = h.load("carol", NOW);

    let out = h.login(&mut carol, &world, false, NOW);
    assert_eq!(out.dropped_channels, vec!["traders".to_string()]);
    assert_eq!(carol.slash_channels, vec!["ooc".to_string()]);
}

#[test]
fn fresh_login_during_war_is_delayed() {
    let mut h = Harness::new();
    h.empires.get_mut(1).unwrap().at_war = true;
    let world = TestWorld::default().with_room(3001);

    let mut carol = h.load("carol", NOW);
    let out = h.login(&mut carol, &world, true, NOW);
    assert!(out.war_delayed);
    let delay = carol
        .affects
        .iter()
        .find(|af| af.kind == atype::WAR_DELAY)
        .expect("war delay affect");
    assert_eq!(delay.duration, 9);
    assert!(delay
        .bitvector
        .contains(AffectFlags::IMMUNE_PHYSICAL | AffectFlags::NO_ATTACK | AffectFlags::STUNNED));

    // reconnecting to a live session is not delayed
    let mut dave = h.load("dave", NOW);
    let out = h.login(&mut dave, &world, false, NOW);
    assert!(!out.war_delayed);
    assert!(!dave.has_affect(atype::WAR_DELAY));
}

#[test]
fn login_saves_and_recounts_the_empire() {
    let mut h = Harness::new();
    let world = TestWorld::default().with_room(3001);
    let mut carol = h.load("carol", NOW);
    h.login(&mut carol, &world, false, NOW);

    let empire = h.empires.get(1).unwrap();
    assert_eq!(empire.total_member_count, 3);
    assert_eq!(empire.members, 2);

    assert_eq!(carol.last_host.as_deref(), Some("192.0.2.44"));
    assert_eq!(carol.creation_host.as_deref(), Some("192.0.2.44"));
    assert_eq!(carol.prev_logon, NOW);
    let on_disk = h.repo.read_record("carol", NOW).unwrap();
    assert_eq!(on_disk.load_room, 3001);
    assert_eq!(on_disk.prev_logon, NOW);
    assert_eq!(h.repo.index().find_by_idnum(11).map(|e| e.last_logon), Some(NOW));
}

#[test]
fn loyalty_to_a_vanished_empire_is_cleared() {
    let mut h = Harness::new();
    h.empires.remove(1);
    let mut erin = h.load("erin", NOW);
    h.login(&mut erin, &TestWorld::default(), false, NOW);
    assert_eq!(erin.loyalty, None);
    assert_eq!(erin.rank, 0);
    assert_eq!(h.repo.index().find_by_idnum(14).and_then(|e| e.loyalty), None);
}

#[test]
fn timed_out_member_rereads_empire_techs() {
    let mut h = Harness::new();
    let world = TestWorld::default().with_room(3001);
    let mut erin = h.load("erin", NOW + 20 * 86_400);
    assert!(erin.transient.reread_empire_tech_on_login);

    let out = h.login(&mut erin, &world, false, NOW + 20 * 86_400);
    assert!(out.reread_tech);
    assert!(!erin.transient.reread_empire_tech_on_login);
    assert!(h.empires.get(1).unwrap().learned_abilities.contains(&40));
}
