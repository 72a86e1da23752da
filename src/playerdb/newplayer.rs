//! Character creation: one-time initialization of a brand-new player.
//!
//! [`init_player`] runs when the name is accepted and gives the record its
//! identity; [`start_new_character`] runs once the player finishes creation
//! and sets up everything they start the game with.

use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::logutil::escape_log;
use crate::playerdb::errors::PlayerDbError;
use crate::playerdb::flags::{AffectFlags, PlayerFlags, PrefFlags};
use crate::playerdb::promo::{self, PromoCode};
use crate::playerdb::repository::PlayerRepository;
use crate::playerdb::types::{
    level, Attribute, Condition, PlayerRecord, Pool, MAX_ATTRIBUTE, MAX_TITLE_LENGTH, NOTHING, NUM_SIMPLE_DIRS,
    UNLIMITED,
};
use crate::playerdb::world::GameHooks;
use crate::validation::{validate_player_name, NameRules};

/// Number of syslog channels; the first player ever gets all of them.
pub const NUM_SYSLOG_TYPES: u32 = 16;

/// Blood pool for players; not otherwise used by them.
const PLAYER_BLOOD: i32 = 10;

/// New-player policy, loaded from the `[new_players]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewPlayerPolicy {
    /// Every new player may log in from any site.
    pub siteok_everyone: bool,
    /// New players wait for an immortal to approve them.
    pub require_auth: bool,
    pub default_slash_channels: Vec<String>,
    pub base_health: i32,
    pub base_move: i32,
    pub base_mana: i32,
    /// Size of the tip-of-the-day list; the first tip shown is random.
    pub tip_count: i32,
}

impl Default for NewPlayerPolicy {
    fn default() -> Self {
        Self {
            siteok_everyone: false,
            require_auth: false,
            default_slash_channels: vec!["newbie".to_string(), "ooc".to_string()],
            base_health: 50,
            base_move: 100,
            base_mana: 50,
            tip_count: 20,
        }
    }
}

/// Set a title. Titles starting with `: , - ; ~` attach directly to the
/// name; anything else is separated by a space. No title means the default.
pub fn set_title(record: &mut PlayerRecord, title: Option<&str>) {
    let title = title.unwrap_or("the newbie");
    let mut text = if title.starts_with([':', ',', '-', ';', '~']) {
        title.to_string()
    } else {
        format!(" {title}")
    };
    if title.chars().count() > MAX_TITLE_LENGTH {
        text = text.chars().take(MAX_TITLE_LENGTH).collect();
    }
    record.title = Some(text);
}

/// Reset the record to creation defaults and give it an idnum, index entry
/// and account. A temporary account chosen during creation is joined when it
/// still exists; otherwise the player gets a new account.
pub fn init_player(
    repo: &mut PlayerRepository,
    record: &mut PlayerRecord,
    policy: &NewPlayerPolicy,
    now: i64,
) -> Result<(), PlayerDbError> {
    let temporary = Some(record.temporary_account_id).filter(|id| *id != NOTHING);

    let mut fresh = PlayerRecord::new(&record.name, now);
    fresh.password = record.password.take();
    fresh.idnum = record.idnum;
    fresh.account_id = record.account_id;
    fresh.sex = record.sex;
    fresh.archetype = record.archetype;
    fresh.promo_id = record.promo_id;
    fresh.referred_by = record.referred_by.take();
    fresh.lastname = record.lastname.take();
    fresh.bonus_traits = record.bonus_traits;
    fresh.creation_host = record.creation_host.take();
    fresh.transient = std::mem::take(&mut record.transient);
    *record = fresh;

    record.immortal_level = -1;
    if repo.index().is_empty() {
        record.access_level = level::TOP;
        record.immortal_level = 0;
        for att in Attribute::ALL {
            record.attributes.set_real(*att, MAX_ATTRIBUTE);
        }
        record
            .preferences
            .insert(PrefFlags::HOLYLIGHT | PrefFlags::ROOMFLAGS | PrefFlags::NOHASSLE);
        record.syslog_flags = (1u64 << NUM_SYSLOG_TYPES) - 1;
        info!("'{}' is the first player and starts as implementor", escape_log(&record.name));
    }

    for (pool, base) in [
        (Pool::Health, policy.base_health),
        (Pool::Move, policy.base_move),
        (Pool::Mana, policy.base_mana),
        (Pool::Blood, PLAYER_BLOOD),
    ] {
        record.pools.max[pool.index()] = base;
        record.pools.refill(pool);
    }
    set_title(record, None);

    if let Some(temp) = temporary.filter(|id| repo.accounts().find(*id).is_some()) {
        if let Some(entry) = repo.index().find_by_idnum(record.idnum).cloned() {
            repo.accounts_mut().unlink(&entry)?;
        }
        record.account_id = None;
        record.temporary_account_id = temp;
    }
    if record.idnum > 0 && repo.index().find_by_idnum(record.idnum).is_none() {
        record.idnum = 0;
    }
    repo.register_new(record, now)?;

    record.affect_flags = AffectFlags::empty();
    let cond = if record.access_level == level::IMPL { UNLIMITED } else { 0 };
    record.conditions = [cond; 3];
    Ok(())
}

/// Accept a new name and password and run [`init_player`] on the result.
pub fn create_character(
    repo: &mut PlayerRepository,
    name: &str,
    password: &str,
    rules: &NameRules,
    policy: &NewPlayerPolicy,
    now: i64,
) -> Result<PlayerRecord, PlayerDbError> {
    let name = validate_player_name(name, rules).map_err(|e| PlayerDbError::InvalidName(format!("{name}: {e}")))?;
    if repo.index().find_by_name(&name).is_some() {
        return Err(PlayerDbError::DuplicateName(name.to_lowercase()));
    }
    let mut record = PlayerRecord::new(&name, now);
    record.set_password(password)?;
    init_player(repo, &mut record, policy, now)?;
    record.player_flags.insert(PlayerFlags::NEEDS_NEWBIE_SETUP);
    Ok(record)
}

/// Finish creation: defaults, starting pools, channels and promo code.
/// Returns the promo code applied, if any.
pub fn start_new_character<R: Rng + ?Sized>(
    record: &mut PlayerRecord,
    policy: &NewPlayerPolicy,
    host: Option<&str>,
    hooks: &mut dyn GameHooks,
    rng: &mut R,
    now: i64,
) -> Option<PromoCode> {
    info!("'{}' has joined the game", escape_log(&record.name));
    set_title(record, None);

    record.preferences.insert(PrefFlags::MORTLOG);
    if policy.siteok_everyone {
        record.player_flags.insert(PlayerFlags::SITEOK);
    }
    record.creation_host = host.map(str::to_string);

    if record.access_level < level::APPROVED && !policy.require_auth {
        record.access_level = level::APPROVED;
    }

    for pool in Pool::ALL {
        record.pools.refill(*pool);
    }
    for cond in [Condition::Thirst, Condition::Full, Condition::Drunk] {
        record.conditions[cond.index()] = 0;
    }
    for att in Attribute::ALL {
        let value = record.attributes.real(*att).max(1);
        record.attributes.set_real(*att, value);
    }

    record.last_tip = if policy.tip_count > 0 {
        rng.gen_range(0..policy.tip_count)
    } else {
        0
    };
    record.confused_dir = rng.gen_range(0..NUM_SIMPLE_DIRS);

    record.played = 0;
    record.transient.session_logon = now;

    record.preferences.insert(PrefFlags::AUTOKILL);
    record.custom_colors.clear();

    for channel in &policy.default_slash_channels {
        if !record.slash_channels.iter().any(|c| c.eq_ignore_ascii_case(channel)) {
            record.slash_channels.push(channel.clone());
        }
    }

    let promo = promo::apply_promo(record);
    hooks.update_class(record);
    record.player_flags.remove(PlayerFlags::NEEDS_NEWBIE_SETUP);
    promo
}
