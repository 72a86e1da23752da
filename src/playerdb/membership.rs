//! Empire membership aggregation.
//!
//! Walks every indexed player, loading offline players from disk and
//! discarding them afterward, and recomputes each empire's member counts,
//! greatness and playtime. Active members are counted once per account: the
//! account's best greatness in that empire is what the empire gets.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::logutil::escape_log;
use crate::playerdb::empire::EmpireTable;
use crate::playerdb::errors::PlayerDbError;
use crate::playerdb::repository::PlayerRepository;
use crate::playerdb::types::{level, AccountId, EmpireVnum, Idnum};
use crate::playerdb::world::OnlinePlayers;

/// Counters from one aggregation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MembershipReport {
    /// Players looked at (online or loaded).
    pub scanned: usize,
    pub loaded_from_file: usize,
    /// Loyal players that did not count toward active statistics.
    pub timed_out: usize,
    pub deleted_empires: Vec<EmpireVnum>,
}

/// Account identity used for deduplication. Players without an account
/// count as their own account.
fn dedup_key(account: Option<AccountId>, idnum: Idnum) -> i64 {
    match account {
        Some(id) => i64::from(id),
        None => -i64::from(idnum),
    }
}

/// Recompute membership for one empire (`only`) or all of them.
///
/// With `read_techs` the abilities of active members are merged into each
/// empire's learned set and the empire list is not re-sorted; the caller
/// follows up with its own territory pass.
pub fn read_empire_members<O>(
    repo: &PlayerRepository,
    empires: &mut EmpireTable,
    online: &O,
    only: Option<EmpireVnum>,
    read_techs: bool,
    now: i64,
) -> Result<MembershipReport, PlayerDbError>
where
    O: OnlinePlayers + ?Sized,
{
    let in_scope = |vnum: EmpireVnum| only.map_or(true, |o| o == vnum);
    let mut report = MembershipReport::default();

    for empire in empires.iter_mut().filter(|e| in_scope(e.vnum)) {
        empire.reset_membership();
    }

    let entries: Vec<(Idnum, String, Option<AccountId>, Option<EmpireVnum>)> = repo
        .index()
        .iter()
        .map(|e| (e.idnum, e.fullname.clone(), e.account_id, e.loyalty))
        .collect();

    // best greatness per (empire, account) among active members
    let mut best: BTreeMap<(EmpireVnum, i64), i32> = BTreeMap::new();
    let timeout = &repo.options().timeout;

    for (idnum, name, index_account, index_loyalty) in entries {
        if only.is_some() && index_loyalty != only {
            continue;
        }
        let found = match repo.find_or_load_entry(idnum, &name, online, now)? {
            Some(found) => found,
            None => {
                warn!("membership scan: player '{}' (#{}) has no file", escape_log(&name), idnum);
                continue;
            }
        };
        report.scanned += 1;
        if found.is_from_file() {
            report.loaded_from_file += 1;
        }

        let record = found.record();
        let Some(vnum) = record.loyalty.filter(|v| in_scope(*v)) else {
            continue;
        };
        let Some(empire) = empires.get_mut(vnum) else {
            debug!("player #{idnum} is loyal to missing empire #{vnum}");
            continue;
        };

        let logon = if found.is_from_file() { record.prev_logon } else { now };
        empire.last_logon = empire.last_logon.max(logon);
        if record.access_level >= level::GOD {
            empire.imm_only = true;
        }
        empire.total_member_count += 1;

        if timeout.is_timed_out(record.birth, logon, record.played_hours(), now) {
            report.timed_out += 1;
            continue;
        }

        let key = (vnum, dedup_key(record.account_id.or(index_account), idnum));
        let greatness = record.greatness();
        best.entry(key)
            .and_modify(|g| *g = (*g).max(greatness))
            .or_insert(greatness);

        empire.total_playtime += record.played / 3600;
        if read_techs {
            empire
                .learned_abilities
                .extend(record.abilities.iter().filter(|(_, a)| a.purchased).map(|(id, _)| *id));
        }
    }

    for ((vnum, _), greatness) in best {
        if let Some(empire) = empires.get_mut(vnum) {
            empire.members += 1;
            empire.greatness += greatness;
        }
    }

    let doomed: Vec<EmpireVnum> = empires
        .iter()
        .filter(|e| in_scope(e.vnum) && e.should_delete())
        .map(|e| e.vnum)
        .collect();
    for vnum in doomed {
        empires.remove(vnum);
        report.deleted_empires.push(vnum);
    }

    if !read_techs {
        empires.resort();
    }

    info!(
        "membership pass{}: {} players scanned ({} from disk), {} timed out, {} empires deleted",
        only.map(|v| format!(" for empire #{v}")).unwrap_or_default(),
        report.scanned,
        report.loaded_from_file,
        report.timed_out,
        report.deleted_empires.len()
    );
    Ok(report)
}

/// Rebuild the learned-ability set of one empire (or all) from scratch.
pub fn reread_empire_tech<O>(
    repo: &PlayerRepository,
    empires: &mut EmpireTable,
    online: &O,
    only: Option<EmpireVnum>,
    now: i64,
) -> Result<MembershipReport, PlayerDbError>
where
    O: OnlinePlayers + ?Sized,
{
    for empire in empires.iter_mut().filter(|e| only.map_or(true, |o| o == e.vnum)) {
        empire.learned_abilities.clear();
    }
    read_empire_members(repo, empires, online, only, true, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::playerdb::empire::Empire;
    use crate::playerdb::repository::RepositoryOptions;
    use crate::playerdb::types::{AbilityEntry, Attribute, PlayerRecord};
    use crate::playerdb::world::{EmptyWorld, NoOnlinePlayers};
    use crate::storage::DataLayout;
    use tempfile::TempDir;

    const DAY: i64 = 86_400;
    const NOW: i64 = 1_700_000_000;

    fn add_member(repo: &mut PlayerRepository, name: &str, empire: EmpireVnum, last_seen: i64) -> PlayerRecord {
        let mut rec = PlayerRecord::new(name, NOW - 100 * DAY);
        rec.password = Some("x".into());
        rec.loyalty = Some(empire);
        rec.attributes.set_real(Attribute::Greatness, 4);
        rec.abilities.insert(12, AbilityEntry { purchased: true, levels_gained: 0 });
        rec.transient.session_logon = last_seen - 500 * 3600;
        repo.register_new(&mut rec, last_seen).expect("register");
        repo.save_player(&mut rec, None, &EmptyWorld, last_seen).expect("save");
        rec
    }

    #[test]
    fn timed_out_members_count_only_in_total() {
        let tmp = TempDir::new().expect("tempdir");
        let mut repo = PlayerRepository::open(DataLayout::new(tmp.path()), RepositoryOptions::default(), NOW).expect("open");
        add_member(&mut repo, "Active", 1, NOW - DAY);
        add_member(&mut repo, "Gone", 1, NOW - 60 * DAY);
        let mut empires = EmpireTable::new();
        empires.insert(Empire::new(1, "Rome"));

        let report = reread_empire_tech(&repo, &mut empires, &NoOnlinePlayers, None, NOW).expect("aggregate");
        let rome = empires.get(1).expect("rome");
        assert_eq!(rome.total_member_count, 2);
        assert_eq!(rome.members, 1);
        assert_eq!(rome.greatness, 4);
        assert_eq!(rome.total_playtime, 500);
        assert!(rome.learned_abilities.contains(&12));
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.loaded_from_file, 2);
    }

    #[test]
    fn online_players_are_never_timed_out() {
        let tmp = TempDir::new().expect("tempdir");
        let mut repo = PlayerRepository::open(DataLayout::new(tmp.path()), RepositoryOptions::default(), NOW).expect("open");
        let rec = add_member(&mut repo, "Gone", 1, NOW - 60 * DAY);
        let mut empires = EmpireTable::new();
        empires.insert(Empire::new(1, "Rome"));
        let online: HashMap<Idnum, PlayerRecord> = [(rec.idnum, rec)].into_iter().collect();

        let report = read_empire_members(&repo, &mut empires, &online, Some(1), false, NOW).expect("aggregate");
        assert_eq!(report.loaded_from_file, 0);
        let rome = empires.get(1).expect("rome");
        assert_eq!(rome.members, 1);
        assert_eq!(rome.last_logon, NOW);
        assert_eq!(rome.sort_rank, 1);
    }

    #[test]
    fn memberless_landless_empire_is_deleted() {
        let tmp = TempDir::new().expect("tempdir");
        let repo = PlayerRepository::open(DataLayout::new(tmp.path()), RepositoryOptions::default(), NOW).expect("open");
        let mut empires = EmpireTable::new();
        empires.insert(Empire::new(1, "Ghost"));
        let mut landed = Empire::new(2, "Held");
        landed.territory = 3;
        empires.insert(landed);

        let report = read_empire_members(&repo, &mut empires, &NoOnlinePlayers, None, false, NOW).expect("aggregate");
        assert_eq!(report.deleted_empires, vec![1]);
        assert!(empires.contains(2));
    }
}
