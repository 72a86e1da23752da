//! Entering the game: reconcile a freshly loaded record with the live world.
//!
//! [`enter_game`] runs the same fixed sequence for every login. World
//! lookups that fail fall back to the next option, down to the configured
//! fallback room, so a login always ends with the player placed somewhere.
//! Only storage failures (saving the record, reading other players during
//! the empire recount) are returned as errors.

use log::{debug, info};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::logutil::escape_log;
use crate::playerdb::empire::EmpireTable;
use crate::playerdb::errors::PlayerDbError;
use crate::playerdb::flags::{AffectFlags, PlayerFlags, PrefFlags};
use crate::playerdb::membership;
use crate::playerdb::repository::PlayerRepository;
use crate::playerdb::types::{
    atype, level, Affect, Condition, PlayerRecord, Pool, Position, RoomVnum, NOWHERE, NUM_SIMPLE_DIRS,
};
use crate::playerdb::world::{GameHooks, OnlinePlayers, WorldMap};

/// Login policy, loaded from the `[login]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginPolicy {
    /// Absence after which a login refills the player.
    pub restore_after_secs: i64,
    /// Real seconds a player at war is stunned after a fresh login.
    pub war_login_delay_secs: i64,
    /// Real seconds per affect tick; converts the delay into affect duration.
    pub affect_tick_secs: i64,
    /// Room used when nothing else resolves.
    pub fallback_room: RoomVnum,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            restore_after_secs: 3600,
            war_login_delay_secs: 90,
            affect_tick_secs: 10,
            fallback_room: 0,
        }
    }
}

/// Per-login inputs from the connection layer.
#[derive(Debug, Clone)]
pub struct LoginContext<'a> {
    /// Remote host of the connection, if known.
    pub host: Option<&'a str>,
    /// False when the player is reconnecting to a body still in game.
    pub fresh: bool,
    pub now: i64,
    pub policy: &'a LoginPolicy,
}

/// The collaborators a login talks to.
pub struct LoginEnv<'a> {
    pub world: &'a dyn WorldMap,
    pub hooks: &'a mut dyn GameHooks,
    pub online: &'a dyn OnlinePlayers,
}

/// Where the player ended up and which policies fired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginOutcome {
    pub room: RoomVnum,
    /// The stored loadroom was rejected.
    pub loadroom_rejected: bool,
    pub sent_home: bool,
    pub restored: bool,
    pub reread_tech: bool,
    pub war_delayed: bool,
    /// Saved channels that no longer exist.
    pub dropped_channels: Vec<String>,
}

/// Clear runtime-only state left over from a previous session.
pub fn reset_char(record: &mut PlayerRecord) {
    let t = &mut record.transient;
    t.in_room = None;
    t.position = Position::Standing;
    t.fighting = None;
    t.equipment.clear();
    t.carry_items = 0;
    t.lookup_id = None;
    if record.pools.current(Pool::Move) <= 0 {
        record.pools.set_current(Pool::Move, 1);
    }
}

/// Identity, access and host bookkeeping. Loyalty to an empire that no
/// longer exists is dropped.
fn settle_identity(
    repo: &mut PlayerRepository,
    empires: &EmpireTable,
    record: &mut PlayerRecord,
    ctx: &LoginContext<'_>,
) -> Result<(), PlayerDbError> {
    record.player_flags.remove(PlayerFlags::KEEP_LAST_LOGIN_INFO);
    if let Some(host) = ctx.host {
        if record.creation_host.is_none() {
            record.creation_host = Some(host.to_string());
        }
        record.last_host = Some(host.to_string());
    }

    if record.idnum <= 0 || repo.index().find_by_idnum(record.idnum).is_none() {
        record.idnum = 0;
        repo.register_new(record, ctx.now)?;
        info!("assigned idnum {} to '{}' at login", record.idnum, escape_log(&record.name));
    }

    if record.immortal_level > -1 {
        record.access_level = level::TOP - record.immortal_level;
    }
    if record.player_flags.contains(PlayerFlags::INVSTART) {
        record.invis_level = record.access_level;
    }

    if let Some(vnum) = record.loyalty.filter(|v| !empires.contains(*v)) {
        debug!("'{}' was loyal to missing empire #{vnum}", escape_log(&record.name));
        record.loyalty = None;
        record.rank = 0;
    }
    Ok(())
}

/// Pick the spawn room: a still-valid loadroom, else home when the loadroom
/// was rejected or discarded, else a start room, else the fallback room.
/// Never fails.
fn resolve_room(record: &mut PlayerRecord, world: &dyn WorldMap, policy: &LoginPolicy, out: &mut LoginOutcome) -> RoomVnum {
    let mut candidate = None;
    if record.load_room != NOWHERE && world.room_exists(record.load_room) {
        candidate = Some(record.load_room);
        if !record.player_flags.contains(PlayerFlags::LOADROOM) {
            let map_loc = world.map_location_for(record.load_room);
            if record.load_room_check == NOWHERE || map_loc != Some(record.load_room_check) {
                // keep them on the same part of the map when re-detecting
                record.last_room = record.load_room_check;
                candidate = None;
                out.loadroom_rejected = true;
            }
        }
    }

    let mut try_home = out.loadroom_rejected;
    let restore = record.is_restore_pending();
    if candidate.is_some() && restore && record.preferences.contains(PrefFlags::AUTORECALL) {
        candidate = None;
        try_home = true;
    }
    if let Some(room) = candidate {
        if restore && world.is_hostile_territory(room, record.loyalty) {
            candidate = None;
            try_home = true;
        }
    }

    if try_home {
        candidate = world.find_home(record);
        out.sent_home = candidate.is_some();
    }
    candidate
        .or_else(|| world.find_load_room(record))
        .unwrap_or(policy.fallback_room)
}

fn restore_after_absence<R: Rng + ?Sized>(record: &mut PlayerRecord, rng: &mut R) {
    for pool in Pool::ALL {
        record.pools.refill(*pool);
    }
    record.pools.deficit = Default::default();
    for cond in [Condition::Full, Condition::Thirst, Condition::Drunk] {
        let c = &mut record.conditions[cond.index()];
        *c = (*c).min(0);
    }
    record.confused_dir = rng.gen_range(0..NUM_SIMPLE_DIRS);
    record.recent_deaths = 0;
    record.remove_affects(atype::DEATH_PENALTY);
    record.transient.restore_on_login = false;
    record.clean_lore();
}

/// Bring a loaded player into the game.
pub fn enter_game<R: Rng + ?Sized>(
    repo: &mut PlayerRepository,
    empires: &mut EmpireTable,
    record: &mut PlayerRecord,
    ctx: &LoginContext<'_>,
    env: &mut LoginEnv<'_>,
    rng: &mut R,
) -> Result<LoginOutcome, PlayerDbError> {
    let now = ctx.now;
    let mut out = LoginOutcome::default();

    reset_char(record);
    settle_identity(repo, empires, record, ctx)?;

    let room = resolve_room(record, env.world, ctx.policy, &mut out);
    out.room = room;
    env.hooks.place_in_room(record, room);
    record.transient.in_room = Some(room);
    env.hooks.affect_total(record);
    repo.save_player(record, Some(room), env.world, now)?;
    env.hooks.update_class(record);
    record.map_mark = NOWHERE;

    let saved_channels = std::mem::take(&mut record.slash_channels);
    for channel in saved_channels {
        if channel.trim().is_empty() {
            continue;
        }
        if env.hooks.join_slash_channel(record, &channel) {
            record.slash_channels.push(channel);
        } else {
            out.dropped_channels.push(channel);
        }
    }

    if record.is_restore_pending() {
        restore_after_absence(record, rng);
        out.restored = true;
    } else {
        for pool in [Pool::Health, Pool::Blood] {
            let cur = record.pools.current(pool).max(1);
            record.pools.set_current(pool, cur);
        }
    }

    record.transient.position = if record.effective_affect_flags().intersects(AffectFlags::concealment()) {
        Position::Sleeping
    } else {
        Position::Standing
    };

    if let Some(vnum) = record.loyalty {
        if record.transient.reread_empire_tech_on_login {
            repo.save_player(record, Some(room), env.world, now)?;
            membership::reread_empire_tech(repo, empires, env.online, Some(vnum), now)?;
            record.transient.reread_empire_tech_on_login = false;
            out.reread_tech = true;
        } else {
            membership::read_empire_members(repo, empires, env.online, Some(vnum), false, now)?;
        }
    }

    record
        .transient
        .coins
        .retain(|c| c.amount > 0 && c.empire.map_or(true, |v| empires.contains(v)));

    env.hooks.assign_class_abilities(record);

    if ctx.fresh && record.loyalty.is_some_and(|v| empires.is_at_war(v)) {
        let duration = ctx.policy.war_login_delay_secs / ctx.policy.affect_tick_secs.max(1);
        record.join_affect(Affect {
            kind: atype::WAR_DELAY,
            cast_by: record.idnum,
            duration: i32::try_from(duration).unwrap_or(i32::MAX),
            bitvector: AffectFlags::IMMUNE_PHYSICAL | AffectFlags::NO_ATTACK | AffectFlags::STUNNED,
            ..Affect::default()
        });
        out.war_delayed = true;
    }

    record.transient.lookup_id = Some(record.idnum);
    env.hooks.read_saved_vars(record);
    env.hooks.greet(record);
    env.hooks.register_lookup(record);

    record.prev_logon = record.transient.session_logon;
    repo.refresh_index(record)?;

    info!(
        "'{}' (#{}) entered the game in room {}{}",
        escape_log(&record.name),
        record.idnum,
        room,
        if out.restored { " (restored)" } else { "" }
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn reset_char_clears_session_state() {
        let mut rec = PlayerRecord::new("Bob", 0);
        rec.transient.fighting = Some(3);
        rec.transient.equipment = vec![1, 2];
        rec.transient.position = Position::Dead;
        reset_char(&mut rec);
        assert_eq!(rec.transient.fighting, None);
        assert!(rec.transient.equipment.is_empty());
        assert_eq!(rec.transient.position, Position::Standing);
        assert_eq!(rec.pools.current(Pool::Move), 1);
    }

    #[test]
    fn restore_refills_and_clamps_conditions() {
        let mut rec = PlayerRecord::new("Bob", 0);
        rec.pools.max = [50, 40, 30, 10];
        rec.pools.deficit = [1, 2, 3, 4];
        rec.conditions[Condition::Full.index()] = 12;
        rec.conditions[Condition::Drunk.index()] = -1;
        rec.recent_deaths = 3;
        rec.affects.push(Affect {
            kind: atype::DEATH_PENALTY,
            ..Affect::default()
        });
        rec.transient.restore_on_login = true;
        let mut rng = StdRng::seed_from_u64(7);
        restore_after_absence(&mut rec, &mut rng);
        assert_eq!(rec.pools.current, [50, 40, 30, 10]);
        assert_eq!(rec.pools.deficit, [0; 4]);
        assert_eq!(rec.conditions[Condition::Full.index()], 0);
        assert_eq!(rec.conditions[Condition::Drunk.index()], -1);
        assert_eq!(rec.recent_deaths, 0);
        assert!(!rec.has_affect(atype::DEATH_PENALTY));
        assert!((0..NUM_SIMPLE_DIRS).contains(&rec.confused_dir));
        assert!(!rec.is_restore_pending());
    }
}
