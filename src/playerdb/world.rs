//! Interfaces to the systems the player database consults but does not own:
//! room geography, the live game (placement, class, scripts, channels) and
//! the table of players currently in game.

use crate::playerdb::types::{EmpireVnum, Idnum, PlayerRecord, RoomVnum};

/// Geography questions asked while choosing where a player wakes up.
pub trait WorldMap {
    fn room_exists(&self, room: RoomVnum) -> bool;

    /// The map tile a room sits on, `None` for rooms off the map or unknown rooms.
    fn map_location_for(&self, room: RoomVnum) -> Option<RoomVnum>;

    /// True when the room is claimed by an empire hostile to `loyalty`.
    fn is_hostile_territory(&self, room: RoomVnum, loyalty: Option<EmpireVnum>) -> bool;

    /// The player's home room, if they have one.
    fn find_home(&self, record: &PlayerRecord) -> Option<RoomVnum>;

    /// A start room for a player with no usable loadroom or home.
    fn find_load_room(&self, record: &PlayerRecord) -> Option<RoomVnum>;
}

/// Side effects the live game performs during login. Every method defaults
/// to a no-op so offline tools can pass [`NoHooks`].
pub trait GameHooks {
    fn place_in_room(&mut self, _record: &mut PlayerRecord, _room: RoomVnum) {}

    /// Recompute derived stats from gear and affects.
    fn affect_total(&mut self, _record: &mut PlayerRecord) {}

    /// Rejoin a saved channel without announcing it. Returns false when the
    /// channel no longer exists.
    fn join_slash_channel(&mut self, _record: &PlayerRecord, _channel: &str) -> bool {
        true
    }

    fn update_class(&mut self, _record: &mut PlayerRecord) {}

    fn assign_class_abilities(&mut self, _record: &mut PlayerRecord) {}

    /// Replay the player's pending script variables (`.mem` file).
    fn read_saved_vars(&mut self, _record: &mut PlayerRecord) {}

    /// Arrival messages and greeting triggers.
    fn greet(&mut self, _record: &PlayerRecord) {}

    fn register_lookup(&mut self, _record: &PlayerRecord) {}
}

/// Players currently in game, by idnum.
pub trait OnlinePlayers {
    fn find_online(&self, idnum: Idnum) -> Option<&PlayerRecord>;
}

/// No live game attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl GameHooks for NoHooks {}

/// Nobody is online; every lookup goes to disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOnlinePlayers;

impl OnlinePlayers for NoOnlinePlayers {
    fn find_online(&self, _idnum: Idnum) -> Option<&PlayerRecord> {
        None
    }
}

/// A world with no rooms: every loadroom is invalid and every fallback fails,
/// leaving the configured default room.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyWorld;

impl WorldMap for EmptyWorld {
    fn room_exists(&self, _room: RoomVnum) -> bool {
        false
    }

    fn map_location_for(&self, _room: RoomVnum) -> Option<RoomVnum> {
        None
    }

    fn is_hostile_territory(&self, _room: RoomVnum, _loyalty: Option<EmpireVnum>) -> bool {
        false
    }

    fn find_home(&self, _record: &PlayerRecord) -> Option<RoomVnum> {
        None
    }

    fn find_load_room(&self, _record: &PlayerRecord) -> Option<RoomVnum> {
        None
    }
}

impl OnlinePlayers for std::collections::HashMap<Idnum, PlayerRecord> {
    fn find_online(&self, idnum: Idnum) -> Option<&PlayerRecord> {
        self.get(&idnum)
    }
}
