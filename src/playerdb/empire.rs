//! Empire table: the membership aggregates this subsystem maintains, persisted
//! as JSON alongside the player files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::playerdb::errors::PlayerDbError;
use crate::playerdb::types::{EmpireVnum, Idnum, NOBODY};
use crate::storage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Empire {
    pub vnum: EmpireVnum,
    pub name: String,
    #[serde(default = "default_leader")]
    pub leader: Idnum,
    /// Claimed tiles; maintained by the territory subsystem.
    #[serde(default)]
    pub territory: i32,
    #[serde(default)]
    pub at_war: bool,
    /// Set when any member is a god.
    #[serde(default)]
    pub imm_only: bool,

    /// Every loyal player, timed out or not.
    #[serde(default)]
    pub total_member_count: i32,
    /// Active members, one per account.
    #[serde(default)]
    pub members: i32,
    /// Sum over accounts of the best active member's greatness.
    #[serde(default)]
    pub greatness: i32,
    /// Hours.
    #[serde(default)]
    pub total_playtime: i64,
    #[serde(default)]
    pub last_logon: i64,
    /// Ability ids contributed by active members.
    #[serde(default)]
    pub learned_abilities: BTreeSet<u32>,
    /// Position after the last resort, 1-based.
    #[serde(default)]
    pub sort_rank: usize,
}

fn default_leader() -> Idnum {
    NOBODY
}

impl Empire {
    pub fn new(vnum: EmpireVnum, name: &str) -> Self {
        Self {
            vnum,
            name: name.to_string(),
            leader: NOBODY,
            territory: 0,
            at_war: false,
            imm_only: false,
            total_member_count: 0,
            members: 0,
            greatness: 0,
            total_playtime: 0,
            last_logon: 0,
            learned_abilities: BTreeSet::new(),
            sort_rank: 0,
        }
    }

    /// Zero the aggregates before a membership pass.
    pub fn reset_membership(&mut self) {
        self.total_member_count = 0;
        self.members = 0;
        self.greatness = 0;
        self.total_playtime = 0;
        self.last_logon = 0;
        self.imm_only = false;
    }

    /// No loyal players and no land left.
    pub fn should_delete(&self) -> bool {
        self.total_member_count == 0 && self.territory == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmpireTable {
    empires: BTreeMap<EmpireVnum, Empire>,
}

impl EmpireTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from JSON; a missing file is an empty table.
    pub fn load(path: &Path) -> Result<Self, PlayerDbError> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let table: EmpireTable = serde_json::from_str(&text)?;
                debug!("loaded {} empires from {}", table.len(), path.display());
                Ok(table)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), PlayerDbError> {
        let json = serde_json::to_string_pretty(self)?;
        storage::write_file_locked(path, json.as_bytes())?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.empires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.empires.is_empty()
    }

    pub fn get(&self, vnum: EmpireVnum) -> Option<&Empire> {
        self.empires.get(&vnum)
    }

    pub fn get_mut(&mut self, vnum: EmpireVnum) -> Option<&mut Empire> {
        self.empires.get_mut(&vnum)
    }

    pub fn contains(&self, vnum: EmpireVnum) -> bool {
        self.empires.contains_key(&vnum)
    }

    pub fn insert(&mut self, empire: Empire) {
        self.empires.insert(empire.vnum, empire);
    }

    pub fn remove(&mut self, vnum: EmpireVnum) -> Option<Empire> {
        let removed = self.empires.remove(&vnum);
        if removed.is_some() {
            info!("deleted empire #{vnum}");
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &Empire> {
        self.empires.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Empire> {
        self.empires.values_mut()
    }

    pub fn is_at_war(&self, vnum: EmpireVnum) -> bool {
        self.empires.get(&vnum).is_some_and(|e| e.at_war)
    }

    /// Rank empires by greatness, then active members, then vnum.
    pub fn resort(&mut self) {
        let mut order: Vec<(i32, i32, EmpireVnum)> = self
            .empires
            .values()
            .map(|e| (e.greatness, e.members, e.vnum))
            .collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));
        for (pos, (_, _, vnum)) in order.into_iter().enumerate() {
            if let Some(e) = self.empires.get_mut(&vnum) {
                e.sort_rank = pos + 1;
            }
        }
    }

    /// Empires in rank order.
    pub fn ranked(&self) -> Vec<&Empire> {
        let mut list: Vec<&Empire> = self.empires.values().collect();
        list.sort_by_key(|e| (e.sort_rank == 0, e.sort_rank, e.vnum));
        list
    }
}
