use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::playerdb::flags::{AffectFlags, PlayerFlags, PrefFlags};

pub type Idnum = i32;
pub type RoomVnum = i32;
pub type EmpireVnum = i32;
pub type AccountId = i32;

/// Sentinel for "no room".
pub const NOWHERE: RoomVnum = -1;
/// Sentinel for "no thing" (vnums, account ids).
pub const NOTHING: i32 = -1;
/// Sentinel for "no player".
pub const NOBODY: Idnum = -1;
/// Condition value meaning the condition never changes.
pub const UNLIMITED: i32 = -1;

pub const MAX_IGNORES: usize = 15;
pub const MAX_REWARDS_PER_DAY: usize = 50;
pub const NUM_ACTION_VNUMS: usize = 3;
pub const NUM_SKILLS: u32 = 64;
pub const NUM_ABILITIES: u32 = 512;
/// Number of compass directions a confused player may wander.
pub const NUM_SIMPLE_DIRS: i32 = 4;
pub const MAX_TITLE_LENGTH: usize = 80;
pub const BASIC_SKILL_CAP: i32 = 50;
pub const MAX_ATTRIBUTE: i32 = 5;

/// Access levels.
pub mod level {
    pub const BASIC: i32 = 1;
    pub const APPROVED: i32 = 2;
    pub const START_IMM: i32 = 31;
    pub const GOD: i32 = 32;
    pub const IMPL: i32 = 34;
    pub const TOP: i32 = 34;
}

/// Affect type ids this subsystem touches directly.
pub mod atype {
    pub const DEATH_PENALTY: i32 = 11;
    pub const WAR_DELAY: i32 = 29;
}

/// Lore kinds recording empire standing. Only the newest of each kind
/// survives [`PlayerRecord::clean_lore`].
pub mod lore {
    pub const JOIN_EMPIRE: i32 = 1;
    pub const DEFECT_EMPIRE: i32 = 2;
    pub const KICKED_EMPIRE: i32 = 3;
    pub const PROMOTED: i32 = 4;
    pub const FOUND_EMPIRE: i32 = 5;

    pub const EMPIRE_STANDING: &[i32] = &[JOIN_EMPIRE, DEFECT_EMPIRE, KICKED_EMPIRE, PROMOTED, FOUND_EMPIRE];
}

macro_rules! named_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            /// Case-insensitive lookup by file label.
            pub fn from_name(text: &str) -> Option<Self> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.name().eq_ignore_ascii_case(text.trim()))
            }

            pub fn index(self) -> usize {
                self as usize
            }
        }
    };
}

named_enum!(
    /// Resource pools.
    Pool {
        Health => "Health",
        Move => "Move",
        Mana => "Mana",
        Blood => "Blood",
    }
);

named_enum!(
    Attribute {
        Strength => "Strength",
        Dexterity => "Dexterity",
        Charisma => "Charisma",
        Greatness => "Greatness",
        Intelligence => "Intelligence",
        Wits => "Wits",
    }
);

named_enum!(
    Condition {
        Drunk => "Drunk",
        Full => "Full",
        Thirst => "Thirst",
    }
);

named_enum!(
    Sex {
        Neutral => "neutral",
        Male => "male",
        Female => "female",
    }
);

pub const NUM_POOLS: usize = 4;
pub const NUM_ATTRIBUTES: usize = 6;
pub const NUM_CONDITIONS: usize = 3;

impl Default for Sex {
    fn default() -> Self {
        Sex::Neutral
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pools {
    pub current: [i32; NUM_POOLS],
    pub max: [i32; NUM_POOLS],
    pub deficit: [i32; NUM_POOLS],
}

impl Pools {
    pub fn current(&self, pool: Pool) -> i32 {
        self.current[pool.index()]
    }

    pub fn max(&self, pool: Pool) -> i32 {
        self.max[pool.index()]
    }

    pub fn set_current(&mut self, pool: Pool, value: i32) {
        self.current[pool.index()] = value;
    }

    pub fn refill(&mut self, pool: Pool) {
        self.current[pool.index()] = self.max[pool.index()];
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    /// Stored base scores.
    pub real: [i32; NUM_ATTRIBUTES],
    /// Scores after affects; reset to `real` on load.
    pub current: [i32; NUM_ATTRIBUTES],
}

impl Attributes {
    pub fn real(&self, att: Attribute) -> i32 {
        self.real[att.index()]
    }

    pub fn get(&self, att: Attribute) -> i32 {
        self.current[att.index()]
    }

    pub fn set_real(&mut self, att: Attribute, value: i32) {
        self.real[att.index()] = value;
        self.current[att.index()] = value;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillEntry {
    pub level: i32,
    /// Written with two decimals; sub-hundredth precision does not survive a save.
    pub exp: f64,
    pub resets: i32,
    pub blocked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityEntry {
    pub purchased: bool,
    pub levels_gained: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affect {
    pub kind: i32,
    pub cast_by: Idnum,
    pub duration: i32,
    pub modifier: i32,
    pub location: i32,
    pub bitvector: AffectFlags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cooldown {
    pub kind: i32,
    /// Absolute expiry, epoch seconds.
    pub expire_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverTimeEffect {
    pub kind: i32,
    pub cast_by: Idnum,
    pub duration: i32,
    pub damage_type: i32,
    pub damage: i32,
    pub stack: i32,
    pub max_stack: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub from: Idnum,
    pub kind: i32,
    pub location: RoomVnum,
    pub time: i64,
    pub data: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoreEntry {
    pub kind: i32,
    pub date: i64,
    pub text: String,
}

/// An in-progress timed action; `action == 0` means idle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionState {
    pub action: i32,
    pub cycle: i32,
    pub timer: i32,
    pub room: RoomVnum,
    pub vnums: [i32; NUM_ACTION_VNUMS],
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OlcPermissions {
    pub min_vnum: i32,
    pub max_vnum: i32,
    pub flags: u64,
}

impl OlcPermissions {
    pub fn is_empty(&self) -> bool {
        self.min_vnum <= 0 && self.max_vnum <= 0 && self.flags == 0
    }
}

/// Currency held by the player; owned by the economy layer and never written
/// to the player file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinStack {
    /// `None` is the generic, empire-less currency.
    pub empire: Option<EmpireVnum>,
    pub amount: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Dead,
    Sleeping,
    Resting,
    Sitting,
    Fighting,
    #[default]
    Standing,
}

/// Things noticed while loading a record that did not stop the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadIssue {
    MissingName,
    MissingPassword,
    InvalidIdnum,
}

/// Runtime-only state. Never persisted; cleared at the start of every login.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transient {
    pub in_room: Option<RoomVnum>,
    pub position: Position,
    pub fighting: Option<Idnum>,
    pub equipment: Vec<i32>,
    pub carry_items: i32,
    /// Identity handle in the live lookup table once the player is in game.
    pub lookup_id: Option<Idnum>,
    /// Wall-clock time this copy was created or last checkpointed.
    pub session_logon: i64,
    /// Away long enough for a free restore at login.
    pub restore_on_login: bool,
    /// Timed out of empire membership; the empire must re-read its techs at login.
    pub reread_empire_tech_on_login: bool,
    pub load_issues: Vec<LoadIssue>,
    pub coins: Vec<CoinStack>,
}

/// The complete persisted state of one player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerRecord {
    // identity and auth
    pub name: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub idnum: Idnum,
    pub account_id: Option<AccountId>,
    pub temporary_account_id: i32,
    pub access_level: i32,
    pub immortal_level: i32,
    pub invis_level: i32,
    pub bad_passwords: i32,
    pub creation_host: Option<String>,
    pub last_host: Option<String>,
    pub referred_by: Option<String>,
    pub promo_id: i32,

    // empire
    pub loyalty: Option<EmpireVnum>,
    pub rank: i32,
    pub pledge: EmpireVnum,

    // time, epoch seconds
    pub birth: i64,
    pub prev_logon: i64,
    pub played: i64,
    pub last_death: i64,
    pub daily_cycle: i32,

    pub pools: Pools,
    pub attributes: Attributes,
    pub conditions: [i32; NUM_CONDITIONS],
    pub extra_attributes: BTreeMap<String, i32>,
    pub skills: BTreeMap<u32, SkillEntry>,
    pub abilities: BTreeMap<u32, AbilityEntry>,
    pub skill_level: i32,
    pub highest_known_level: i32,
    pub last_known_level: i32,
    pub class: i32,
    pub class_progression: i32,
    pub class_role: i32,
    pub archetype: i32,
    pub can_gain_new_skills: bool,
    pub can_get_bonus_skills: bool,
    pub bonus_exp: i32,
    pub bonus_traits: u64,

    pub affects: Vec<Affect>,
    pub cooldowns: Vec<Cooldown>,
    pub dots: Vec<OverTimeEffect>,
    pub offers: Vec<Offer>,
    pub lore: Vec<LoreEntry>,
    pub slash_channels: Vec<String>,
    pub ignore_list: Vec<Idnum>,
    pub rewarded_today: Vec<i32>,
    pub resources: BTreeMap<String, i32>,
    pub custom_colors: BTreeMap<String, char>,

    // location
    pub load_room: RoomVnum,
    pub load_room_check: RoomVnum,
    pub last_room: RoomVnum,
    pub last_direction: i32,
    pub tomb_room: RoomVnum,
    pub map_mark: RoomVnum,
    pub adventure_summon_loc: RoomVnum,
    pub adventure_summon_map: RoomVnum,
    pub action: ActionState,
    pub confused_dir: i32,

    // flags
    pub player_flags: PlayerFlags,
    pub preferences: PrefFlags,
    pub affect_flags: AffectFlags,
    pub syslog_flags: u64,
    pub mount_flags: u64,
    pub grants: u64,
    pub injuries: u64,
    pub olc: OlcPermissions,

    // presentation
    pub sex: Sex,
    pub disguised_name: Option<String>,
    pub disguised_sex: Sex,
    pub lastname: Option<String>,
    pub title: Option<String>,
    pub prompt: Option<String>,
    pub fight_prompt: Option<String>,
    pub poofin: Option<String>,
    pub poofout: Option<String>,
    pub description: Option<String>,
    pub admin_notes: Option<String>,
    pub apparent_age: i32,

    // misc counters
    pub last_corpse_id: i32,
    pub last_tell: Idnum,
    pub last_tip: i32,
    pub mapsize: i32,
    pub morph: i32,
    pub mount_vnum: i32,
    pub recent_deaths: i32,
    pub using_poison: i32,

    #[serde(skip)]
    pub transient: Transient,
}

impl PlayerRecord {
    /// A blank record with creation defaults; `now` seeds birth and session logon.
    pub fn new(name: &str, now: i64) -> Self {
        Self {
            name: name.to_string(),
            password: None,
            idnum: 0,
            account_id: None,
            temporary_account_id: NOTHING,
            access_level: 0,
            immortal_level: -1,
            invis_level: 0,
            bad_passwords: 0,
            creation_host: None,
            last_host: None,
            referred_by: None,
            promo_id: 0,
            loyalty: None,
            rank: 0,
            pledge: NOTHING,
            birth: now,
            prev_logon: 0,
            played: 0,
            last_death: 0,
            daily_cycle: 0,
            pools: Pools::default(),
            attributes: Attributes::default(),
            conditions: [0; NUM_CONDITIONS],
            extra_attributes: BTreeMap::new(),
            skills: BTreeMap::new(),
            abilities: BTreeMap::new(),
            skill_level: 0,
            highest_known_level: 0,
            last_known_level: 0,
            class: 0,
            class_progression: 0,
            class_role: 0,
            archetype: 0,
            can_gain_new_skills: false,
            can_get_bonus_skills: false,
            bonus_exp: 0,
            bonus_traits: 0,
            affects: Vec::new(),
            cooldowns: Vec::new(),
            dots: Vec::new(),
            offers: Vec::new(),
            lore: Vec::new(),
            slash_channels: Vec::new(),
            ignore_list: Vec::new(),
            rewarded_today: Vec::new(),
            resources: BTreeMap::new(),
            custom_colors: BTreeMap::new(),
            load_room: NOWHERE,
            load_room_check: NOWHERE,
            last_room: NOWHERE,
            last_direction: 0,
            tomb_room: NOWHERE,
            map_mark: NOWHERE,
            adventure_summon_loc: NOWHERE,
            adventure_summon_map: NOWHERE,
            action: ActionState::default(),
            confused_dir: 0,
            player_flags: PlayerFlags::empty(),
            preferences: PrefFlags::empty(),
            affect_flags: AffectFlags::empty(),
            syslog_flags: 0,
            mount_flags: 0,
            grants: 0,
            injuries: 0,
            olc: OlcPermissions::default(),
            sex: Sex::Neutral,
            disguised_name: None,
            disguised_sex: Sex::Neutral,
            lastname: None,
            title: None,
            prompt: None,
            fight_prompt: None,
            poofin: None,
            poofout: None,
            description: None,
            admin_notes: None,
            apparent_age: 0,
            last_corpse_id: 0,
            last_tell: NOBODY,
            last_tip: 0,
            mapsize: 0,
            morph: 0,
            mount_vnum: NOTHING,
            recent_deaths: 0,
            using_poison: 0,
            transient: Transient {
                session_logon: now,
                ..Transient::default()
            },
        }
    }

    /// Case-folded name used for index and file lookups.
    pub fn key_name(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn greatness(&self) -> i32 {
        self.attributes.get(Attribute::Greatness)
    }

    pub fn health(&self) -> i32 {
        self.pools.current(Pool::Health)
    }

    pub fn played_hours(&self) -> f64 {
        self.played as f64 / 3600.0
    }

    pub fn is_restore_pending(&self) -> bool {
        self.transient.restore_on_login
    }

    pub fn has_affect(&self, kind: i32) -> bool {
        self.affects.iter().any(|af| af.kind == kind)
    }

    /// Remove every affect of `kind`; returns how many were removed.
    pub fn remove_affects(&mut self, kind: i32) -> usize {
        let before = self.affects.len();
        self.affects.retain(|af| af.kind != kind);
        before - self.affects.len()
    }

    /// Drop blank lore lines and all but the newest entry of each
    /// empire-standing kind. Returns how many entries were removed.
    pub fn clean_lore(&mut self) -> usize {
        let mut newest: BTreeMap<i32, usize> = BTreeMap::new();
        for (i, entry) in self.lore.iter().enumerate() {
            if !lore::EMPIRE_STANDING.contains(&entry.kind) {
                continue;
            }
            match newest.get(&entry.kind) {
                Some(&kept) if self.lore[kept].date > entry.date => {}
                _ => {
                    newest.insert(entry.kind, i);
                }
            }
        }
        let before = self.lore.len();
        let mut pos = 0;
        self.lore.retain(|entry| {
            let keep = !entry.text.trim().is_empty()
                && (!lore::EMPIRE_STANDING.contains(&entry.kind) || newest.get(&entry.kind) == Some(&pos));
            pos += 1;
            keep
        });
        before - self.lore.len()
    }

    /// Add an affect, merging into an existing one of the same kind by summing
    /// durations.
    pub fn join_affect(&mut self, affect: Affect) {
        if let Some(existing) = self.affects.iter_mut().find(|af| af.kind == affect.kind) {
            existing.duration += affect.duration;
            existing.bitvector |= affect.bitvector;
            existing.modifier = affect.modifier;
        } else {
            self.affects.push(affect);
        }
    }

    /// All affect bits currently on the player: the stored set plus every affect's bitvector.
    pub fn effective_affect_flags(&self) -> AffectFlags {
        self.affects
            .iter()
            .fold(self.affect_flags, |acc, af| acc | af.bitvector)
    }

    /// Add coins of one currency, creating the stack if needed.
    pub fn add_coins(&mut self, empire: Option<EmpireVnum>, amount: i32) {
        let coins = &mut self.transient.coins;
        match coins.iter_mut().find(|c| c.empire == empire) {
            Some(stack) => stack.amount = stack.amount.saturating_add(amount),
            None => coins.push(CoinStack { empire, amount }),
        }
    }

    /// Fold the running session into `played` and stamp the logon time.
    /// Offline-edited copies keep their stored login info untouched.
    pub fn checkpoint_session(&mut self, now: i64) {
        if self.player_flags.contains(PlayerFlags::KEEP_LAST_LOGIN_INFO) {
            return;
        }
        self.played += (now - self.transient.session_logon).max(0);
        self.transient.session_logon = now;
        self.prev_logon = now;
    }

    /// Hash and store a new password (Argon2id, random salt).
    pub fn set_password(&mut self, plain: &str) -> Result<(), crate::playerdb::errors::PlayerDbError> {
        use password_hash::PasswordHasher;
        let salt = password_hash::SaltString::generate(&mut rand::thread_rng());
        let hash = argon2::Argon2::default()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| crate::playerdb::errors::PlayerDbError::Password(e.to_string()))?;
        self.password = Some(hash.to_string());
        Ok(())
    }

    /// Check a password against the stored hash. A missing or corrupt hash never matches.
    pub fn verify_password(&self, plain: &str) -> bool {
        use password_hash::PasswordVerifier;
        let Some(stored) = self.password.as_deref() else {
            return false;
        };
        match password_hash::PasswordHash::new(stored) {
            Ok(parsed) => argon2::Argon2::default()
                .verify_password(plain.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Derive the login-time flags that are never stored.
    pub fn derive_login_flags(
        &mut self,
        now: i64,
        restore_after_secs: i64,
        timeout: &crate::playerdb::timeout::MemberTimeout,
    ) {
        self.transient.restore_on_login = now - self.prev_logon >= restore_after_secs;
        self.transient.reread_empire_tech_on_login =
            timeout.is_timed_out(self.birth, self.prev_logon, self.played_hours(), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_enums_are_case_insensitive() {
        assert_eq!(Pool::from_name("health"), Some(Pool::Health));
        assert_eq!(Attribute::from_name("WITS"), Some(Attribute::Wits));
        assert_eq!(Sex::from_name("Female"), Some(Sex::Female));
        assert_eq!(Condition::from_name("hunger"), None);
    }

    #[test]
    fn new_record_uses_sentinels() {
        let rec = PlayerRecord::new("Bob", 1000);
        assert_eq!(rec.load_room, NOWHERE);
        assert_eq!(rec.pledge, NOTHING);
        assert_eq!(rec.last_tell, NOBODY);
        assert_eq!(rec.birth, 1000);
        assert_eq!(rec.key_name(), "bob");
    }

    #[test]
    fn join_affect_adds_duration() {
        let mut rec = PlayerRecord::new("Bob", 0);
        let af = Affect {
            kind: atype::WAR_DELAY,
            duration: 5,
            bitvector: AffectFlags::STUNNED,
            ..Affect::default()
        };
        rec.join_affect(af.clone());
        rec.join_affect(af);
        assert_eq!(rec.affects.len(), 1);
        assert_eq!(rec.affects[0].duration, 10);
    }

    #[test]
    fn clean_lore_keeps_newest_empire_standing() {
        let mut rec = PlayerRecord::new("Bob", 0);
        let entry = |kind, date, text: &str| LoreEntry {
            kind,
            date,
            text: text.to_string(),
        };
        rec.lore = vec![
            entry(lore::JOIN_EMPIRE, 100, "Joined Aldoria."),
            entry(20, 150, "Slew a dragon."),
            entry(lore::DEFECT_EMPIRE, 200, "Defected from Aldoria."),
            entry(lore::JOIN_EMPIRE, 300, "Joined the Hollow Crown."),
            entry(20, 350, "  "),
        ];
        assert_eq!(rec.clean_lore(), 2);
        let texts: Vec<&str> = rec.lore.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["Slew a dragon.", "Defected from Aldoria.", "Joined the Hollow Crown."]);
        assert_eq!(rec.clean_lore(), 0);
    }

    #[test]
    fn password_hash_verifies() {
        let mut rec = PlayerRecord::new("Bob", 0);
        assert!(!rec.verify_password("secret"));
        rec.set_password("secret").expect("hash");
        assert!(rec.verify_password("secret"));
        assert!(!rec.verify_password("wrong"));
    }

    #[test]
    fn coins_merge_by_currency() {
        let mut rec = PlayerRecord::new("Bob", 0);
        rec.add_coins(None, 10);
        rec.add_coins(None, 5);
        rec.add_coins(Some(3), 1);
        assert_eq!(rec.transient.coins.len(), 2);
        assert_eq!(rec.transient.coins[0].amount, 15);
    }
}
