//! Tagged-text player record codec.
//!
//! A record is a sequence of `Tag: value` lines ending with `End`. Tags are
//! matched case-insensitively through a static table built on first use.
//! Family tags such as `Current-Health` or `Attribute-Wits` are resolved by
//! their prefix up to and including the dash, after an exact match has been
//! tried (so `Action-vnum` and `Slash-channel` stay distinct tags).
//!
//! Unknown tags and malformed values are reported as [`FieldWarning`]s and the
//! line is skipped. Only truncation (no `End`, or EOF inside a `~` block) is
//! fatal.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::str::FromStr;
use std::sync::OnceLock;

use log::{error, warn};

use crate::logutil::escape_log;
use crate::playerdb::errors::{FieldError, FieldWarning, PlayerDbError};
use crate::playerdb::flags::{self, AffectFlags, PlayerFlags, PrefFlags};
use crate::playerdb::timeout::MemberTimeout;
use crate::playerdb::types::*;

/// Inputs to the derived, never-stored fields computed after a decode.
#[derive(Debug, Clone)]
pub struct DecodeContext {
    pub now: i64,
    pub restore_after_secs: i64,
    pub timeout: MemberTimeout,
}

impl DecodeContext {
    pub fn new(now: i64) -> Self {
        Self {
            now,
            restore_after_secs: 3600,
            timeout: MemberTimeout::default(),
        }
    }
}

/// A decoded record plus every recoverable problem found along the way.
#[derive(Debug)]
pub struct Decoded {
    pub record: PlayerRecord,
    pub warnings: Vec<FieldWarning>,
}

/// One `Tag: value` line, split for a handler.
struct Directive<'a> {
    tag: &'a str,
    /// Text after the dash for family tags (`Health` in `Max-Health`).
    suffix: &'a str,
    value: &'a str,
}

impl<'a> Directive<'a> {
    fn malformed(&self) -> FieldError {
        FieldError::Malformed {
            tag: self.tag.to_string(),
            value: self.value.to_string(),
        }
    }

    fn parse<T: FromStr>(&self, word: &str) -> Result<T, FieldError> {
        word.trim().parse::<T>().map_err(|_| self.malformed())
    }

    fn num<T: FromStr>(&self) -> Result<T, FieldError> {
        self.parse(self.value)
    }

    fn flag(&self) -> Result<bool, FieldError> {
        Ok(self.num::<i32>()? != 0)
    }

    fn words(&self, n: usize) -> Result<Vec<&'a str>, FieldError> {
        let words: Vec<&str> = self.value.split_whitespace().collect();
        if words.len() < n {
            return Err(self.malformed());
        }
        Ok(words)
    }

    /// Trimmed text; empty becomes `None`.
    fn text(&self) -> Option<String> {
        let t = self.value.trim();
        (!t.is_empty()).then(|| t.to_string())
    }

    /// Untrimmed text for fields where leading/trailing spaces are meaningful.
    fn raw(&self) -> Option<String> {
        (!self.value.is_empty()).then(|| self.value.to_string())
    }

    fn out_of_range(&self, index: i64) -> FieldError {
        FieldError::OutOfRange {
            tag: self.tag.to_string(),
            index,
        }
    }

    fn unknown_name(&self) -> FieldError {
        FieldError::UnknownName {
            tag: self.tag.to_string(),
            name: self.suffix.to_string(),
        }
    }
}

type ScalarFn = fn(&mut PlayerRecord, &Directive<'_>) -> Result<(), FieldError>;
type BlockFn = fn(&mut PlayerRecord, String);

#[derive(Clone, Copy)]
enum Handler {
    Scalar(ScalarFn),
    /// `Tag:` followed by lines up to one ending in `~`.
    Block(BlockFn),
    /// `Lore: type date` followed by one line of text.
    Lore,
}

fn set_flags<F>(
    target: &mut F,
    d: &Directive<'_>,
    decode: fn(&str) -> (F, Option<FieldError>),
) -> Result<(), FieldError> {
    let (bits, err) = decode(d.value);
    *target = bits;
    err.map_or(Ok(()), Err)
}

fn set_bits(target: &mut u64, d: &Directive<'_>) -> Result<(), FieldError> {
    set_flags(target, d, flags::from_alpha)
}

fn tag_table() -> &'static HashMap<&'static str, Handler> {
    static TABLE: OnceLock<HashMap<&'static str, Handler>> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

fn build_table() -> HashMap<&'static str, Handler> {
    use Handler::{Block, Lore, Scalar};

    let entries: Vec<(&'static str, Handler)> = vec![
        // identity and auth
        ("name", Scalar(|r, d| {
            r.name = d.text().unwrap_or_default();
            Ok(())
        })),
        ("password", Scalar(|r, d| {
            r.password = d.raw();
            Ok(())
        })),
        ("idnum", Scalar(|r, d| {
            r.idnum = d.num()?;
            Ok(())
        })),
        ("account", Scalar(|r, d| {
            r.account_id = Some(d.num()?);
            Ok(())
        })),
        ("temporary account", Scalar(|r, d| {
            r.temporary_account_id = d.num()?;
            Ok(())
        })),
        ("access level", Scalar(|r, d| {
            r.access_level = d.num()?;
            Ok(())
        })),
        ("immortal level", Scalar(|r, d| {
            r.immortal_level = d.num()?;
            Ok(())
        })),
        ("invis level", Scalar(|r, d| {
            r.invis_level = d.num()?;
            Ok(())
        })),
        ("bad passwords", Scalar(|r, d| {
            r.bad_passwords = d.num()?;
            Ok(())
        })),
        ("creation host", Scalar(|r, d| {
            r.creation_host = d.text();
            Ok(())
        })),
        ("last host", Scalar(|r, d| {
            r.last_host = d.text();
            Ok(())
        })),
        ("referred by", Scalar(|r, d| {
            r.referred_by = d.text();
            Ok(())
        })),
        ("promo id", Scalar(|r, d| {
            r.promo_id = d.num()?;
            Ok(())
        })),
        // empire
        ("empire", Scalar(|r, d| {
            r.loyalty = Some(d.num()?);
            Ok(())
        })),
        ("rank", Scalar(|r, d| {
            r.rank = d.num()?;
            Ok(())
        })),
        ("pledge empire", Scalar(|r, d| {
            r.pledge = d.num()?;
            Ok(())
        })),
        // time
        ("birth", Scalar(|r, d| {
            r.birth = d.num()?;
            Ok(())
        })),
        ("last logon", Scalar(|r, d| {
            r.prev_logon = d.num()?;
            Ok(())
        })),
        ("played", Scalar(|r, d| {
            r.played = d.num()?;
            Ok(())
        })),
        ("last death", Scalar(|r, d| {
            r.last_death = d.num()?;
            Ok(())
        })),
        ("daily cycle", Scalar(|r, d| {
            r.daily_cycle = d.num()?;
            Ok(())
        })),
        // families
        ("current-", Scalar(|r, d| {
            let pool = Pool::from_name(d.suffix).ok_or_else(|| d.unknown_name())?;
            r.pools.current[pool.index()] = d.num()?;
            Ok(())
        })),
        ("max-", Scalar(|r, d| {
            let pool = Pool::from_name(d.suffix).ok_or_else(|| d.unknown_name())?;
            r.pools.max[pool.index()] = d.num()?;
            Ok(())
        })),
        ("deficit-", Scalar(|r, d| {
            let pool = Pool::from_name(d.suffix).ok_or_else(|| d.unknown_name())?;
            r.pools.deficit[pool.index()] = d.num()?;
            Ok(())
        })),
        ("attribute-", Scalar(|r, d| {
            let att = Attribute::from_name(d.suffix).ok_or_else(|| d.unknown_name())?;
            r.attributes.set_real(att, d.num()?);
            Ok(())
        })),
        ("condition-", Scalar(|r, d| {
            let cond = Condition::from_name(d.suffix).ok_or_else(|| d.unknown_name())?;
            r.conditions[cond.index()] = d.num()?;
            Ok(())
        })),
        ("extra-", Scalar(|r, d| {
            let name = d.suffix.trim();
            if name.is_empty() {
                return Err(d.unknown_name());
            }
            r.extra_attributes.insert(name.to_string(), d.num()?);
            Ok(())
        })),
        ("color-", Scalar(|r, d| {
            let name = d.suffix.trim();
            let ch = d.value.trim().chars().next().ok_or_else(|| d.malformed())?;
            if name.is_empty() {
                return Err(d.unknown_name());
            }
            r.custom_colors.insert(name.to_string(), ch);
            Ok(())
        })),
        // tables
        ("ability", Scalar(|r, d| {
            let w = d.words(3)?;
            let id: i64 = d.parse(w[0])?;
            if id < 0 || id >= NUM_ABILITIES as i64 {
                return Err(d.out_of_range(id));
            }
            let entry = AbilityEntry {
                purchased: d.parse::<i32>(w[1])? != 0,
                levels_gained: d.parse(w[2])?,
            };
            r.abilities.insert(id as u32, entry);
            Ok(())
        })),
        ("skill", Scalar(|r, d| {
            let w = d.words(5)?;
            let id: i64 = d.parse(w[0])?;
            if id < 0 || id >= NUM_SKILLS as i64 {
                return Err(d.out_of_range(id));
            }
            let entry = SkillEntry {
                level: d.parse(w[1])?,
                exp: d.parse(w[2])?,
                resets: d.parse(w[3])?,
                blocked: d.parse::<i32>(w[4])? != 0,
            };
            r.skills.insert(id as u32, entry);
            Ok(())
        })),
        ("skill level", Scalar(|r, d| {
            r.skill_level = d.num()?;
            Ok(())
        })),
        ("resource", Scalar(|r, d| {
            let w = d.words(2)?;
            let amount: i32 = d.parse(w[0])?;
            r.resources.insert(w[1..].join(" "), amount);
            Ok(())
        })),
        ("rewarded", Scalar(|r, d| {
            if r.rewarded_today.len() >= MAX_REWARDS_PER_DAY {
                return Err(d.out_of_range(r.rewarded_today.len() as i64));
            }
            let id = d.num()?;
            r.rewarded_today.push(id);
            Ok(())
        })),
        ("ignore", Scalar(|r, d| {
            if r.ignore_list.len() >= MAX_IGNORES {
                return Err(d.out_of_range(r.ignore_list.len() as i64));
            }
            let id = d.num()?;
            r.ignore_list.push(id);
            Ok(())
        })),
        // lists
        ("affect", Scalar(|r, d| {
            let w = d.words(6)?;
            let (bitvector, err) = AffectFlags::from_alpha(w[5]);
            if let Some(err) = err {
                return Err(err);
            }
            r.affects.push(Affect {
                kind: d.parse(w[0])?,
                cast_by: d.parse(w[1])?,
                duration: d.parse(w[2])?,
                modifier: d.parse(w[3])?,
                location: d.parse(w[4])?,
                bitvector,
            });
            Ok(())
        })),
        ("cooldown", Scalar(|r, d| {
            let w = d.words(2)?;
            r.cooldowns.push(Cooldown {
                kind: d.parse(w[0])?,
                expire_time: d.parse(w[1])?,
            });
            Ok(())
        })),
        ("dot effect", Scalar(|r, d| {
            let w = d.words(7)?;
            r.dots.push(OverTimeEffect {
                kind: d.parse(w[0])?,
                cast_by: d.parse(w[1])?,
                duration: d.parse(w[2])?,
                damage_type: d.parse(w[3])?,
                damage: d.parse(w[4])?,
                stack: d.parse(w[5])?,
                max_stack: d.parse(w[6])?,
            });
            Ok(())
        })),
        ("offer", Scalar(|r, d| {
            let w = d.words(5)?;
            r.offers.push(Offer {
                from: d.parse(w[0])?,
                kind: d.parse(w[1])?,
                location: d.parse(w[2])?,
                time: d.parse(w[3])?,
                data: d.parse(w[4])?,
            });
            Ok(())
        })),
        ("lore", Lore),
        ("slash-channel", Scalar(|r, d| {
            let name = d.text().ok_or_else(|| d.malformed())?;
            r.slash_channels.push(name);
            Ok(())
        })),
        // location
        ("load room", Scalar(|r, d| {
            r.load_room = d.num()?;
            Ok(())
        })),
        ("load room check", Scalar(|r, d| {
            r.load_room_check = d.num()?;
            Ok(())
        })),
        ("last room", Scalar(|r, d| {
            r.last_room = d.num()?;
            Ok(())
        })),
        ("last direction", Scalar(|r, d| {
            r.last_direction = d.num()?;
            Ok(())
        })),
        ("tomb room", Scalar(|r, d| {
            r.tomb_room = d.num()?;
            Ok(())
        })),
        ("map mark", Scalar(|r, d| {
            r.map_mark = d.num()?;
            Ok(())
        })),
        ("adventure summon loc", Scalar(|r, d| {
            r.adventure_summon_loc = d.num()?;
            Ok(())
        })),
        ("adventure summon map", Scalar(|r, d| {
            r.adventure_summon_map = d.num()?;
            Ok(())
        })),
        ("action", Scalar(|r, d| {
            let w = d.words(4)?;
            r.action.action = d.parse(w[0])?;
            r.action.cycle = d.parse(w[1])?;
            r.action.timer = d.parse(w[2])?;
            r.action.room = d.parse(w[3])?;
            Ok(())
        })),
        ("action-vnum", Scalar(|r, d| {
            let w = d.words(2)?;
            let pos: i64 = d.parse(w[0])?;
            if pos < 0 || pos >= NUM_ACTION_VNUMS as i64 {
                return Err(d.out_of_range(pos));
            }
            r.action.vnums[pos as usize] = d.parse(w[1])?;
            Ok(())
        })),
        // flag sets
        ("player flags", Scalar(|r, d| set_flags(&mut r.player_flags, d, PlayerFlags::from_alpha))),
        ("preferences", Scalar(|r, d| set_flags(&mut r.preferences, d, PrefFlags::from_alpha))),
        ("affect flags", Scalar(|r, d| set_flags(&mut r.affect_flags, d, AffectFlags::from_alpha))),
        ("syslog flags", Scalar(|r, d| set_bits(&mut r.syslog_flags, d))),
        ("mount flags", Scalar(|r, d| set_bits(&mut r.mount_flags, d))),
        ("grants", Scalar(|r, d| set_bits(&mut r.grants, d))),
        ("injuries", Scalar(|r, d| set_bits(&mut r.injuries, d))),
        ("bonus traits", Scalar(|r, d| set_bits(&mut r.bonus_traits, d))),
        ("olc", Scalar(|r, d| {
            let w = d.words(3)?;
            let (bits, err) = flags::from_alpha(w[2]);
            r.olc = OlcPermissions {
                min_vnum: d.parse(w[0])?,
                max_vnum: d.parse(w[1])?,
                flags: bits,
            };
            err.map_or(Ok(()), Err)
        })),
        // misc
        ("apparent age", Scalar(|r, d| {
            r.apparent_age = d.num()?;
            Ok(())
        })),
        ("archetype", Scalar(|r, d| {
            r.archetype = d.num()?;
            Ok(())
        })),
        ("bonus exp", Scalar(|r, d| {
            r.bonus_exp = d.num()?;
            Ok(())
        })),
        ("can gain new skills", Scalar(|r, d| {
            r.can_gain_new_skills = d.flag()?;
            Ok(())
        })),
        ("can get bonus skills", Scalar(|r, d| {
            r.can_get_bonus_skills = d.flag()?;
            Ok(())
        })),
        ("class", Scalar(|r, d| {
            r.class = d.num()?;
            Ok(())
        })),
        ("class progression", Scalar(|r, d| {
            r.class_progression = d.num()?;
            Ok(())
        })),
        ("class role", Scalar(|r, d| {
            r.class_role = d.num()?;
            Ok(())
        })),
        ("confused direction", Scalar(|r, d| {
            r.confused_dir = d.num()?;
            Ok(())
        })),
        ("disguised name", Scalar(|r, d| {
            r.disguised_name = d.text();
            Ok(())
        })),
        ("disguised sex", Scalar(|r, d| {
            r.disguised_sex = Sex::from_name(d.value).ok_or_else(|| d.malformed())?;
            Ok(())
        })),
        ("sex", Scalar(|r, d| {
            r.sex = Sex::from_name(d.value).ok_or_else(|| d.malformed())?;
            Ok(())
        })),
        ("fight prompt", Scalar(|r, d| {
            r.fight_prompt = d.raw();
            Ok(())
        })),
        ("prompt", Scalar(|r, d| {
            r.prompt = d.raw();
            Ok(())
        })),
        ("poofin", Scalar(|r, d| {
            r.poofin = d.raw();
            Ok(())
        })),
        ("poofout", Scalar(|r, d| {
            r.poofout = d.raw();
            Ok(())
        })),
        ("title", Scalar(|r, d| {
            r.title = d.raw();
            Ok(())
        })),
        ("lastname", Scalar(|r, d| {
            r.lastname = d.text();
            Ok(())
        })),
        ("highest known level", Scalar(|r, d| {
            r.highest_known_level = d.num()?;
            Ok(())
        })),
        ("last known level", Scalar(|r, d| {
            r.last_known_level = d.num()?;
            Ok(())
        })),
        ("last corpse id", Scalar(|r, d| {
            r.last_corpse_id = d.num()?;
            Ok(())
        })),
        ("last tell", Scalar(|r, d| {
            r.last_tell = d.num()?;
            Ok(())
        })),
        ("last tip", Scalar(|r, d| {
            r.last_tip = d.num()?;
            Ok(())
        })),
        ("mapsize", Scalar(|r, d| {
            r.mapsize = d.num()?;
            Ok(())
        })),
        ("morph", Scalar(|r, d| {
            r.morph = d.num()?;
            Ok(())
        })),
        ("mount vnum", Scalar(|r, d| {
            r.mount_vnum = d.num()?;
            Ok(())
        })),
        ("recent deaths", Scalar(|r, d| {
            r.recent_deaths = d.num()?;
            Ok(())
        })),
        ("using poison", Scalar(|r, d| {
            r.using_poison = d.num()?;
            Ok(())
        })),
        // blocks
        ("description", Block(|r, text| r.description = Some(text))),
        ("notes", Block(|r, text| r.admin_notes = Some(text))),
    ];

    entries.into_iter().collect()
}

/// Resolve a tag: exact match first, then the family prefix up to the dash.
fn lookup(tag: &str) -> Option<(Handler, &str)> {
    let table = tag_table();
    let tag = tag.trim();
    let lower = tag.to_ascii_lowercase();
    if let Some(h) = table.get(lower.as_str()) {
        return Some((*h, ""));
    }
    let dash = tag.find('-')?;
    let family = &lower[..=dash];
    table.get(family).map(|h| (*h, &tag[dash + 1..]))
}

/// Skip exactly one character after the colon (normally the space).
fn after_colon(rest: &str) -> &str {
    let mut chars = rest.chars();
    chars.next();
    chars.as_str()
}

type NumberedLines<R> = std::iter::Enumerate<io::Lines<R>>;

fn next_line<R: BufRead>(lines: &mut NumberedLines<R>) -> Result<Option<(usize, String)>, PlayerDbError> {
    match lines.next() {
        None => Ok(None),
        Some((idx, line)) => {
            let mut line = line?;
            if line.ends_with('\r') {
                line.pop();
            }
            Ok(Some((idx + 1, line)))
        }
    }
}

fn read_block<R: BufRead>(lines: &mut NumberedLines<R>, file: &str, tag: &str) -> Result<String, PlayerDbError> {
    let mut parts = Vec::new();
    loop {
        let Some((_, line)) = next_line(lines)? else {
            return Err(PlayerDbError::Truncated {
                file: file.to_string(),
                reason: format!("end of file inside '{tag}' block"),
            });
        };
        if let Some(last) = line.strip_suffix('~') {
            parts.push(last.to_string());
            return Ok(parts.join("\n"));
        }
        parts.push(line);
    }
}

/// Parse a player record.
///
/// `name_hint` is the name used to locate the file; it stands in for a
/// missing `Name:` and labels log lines and errors.
pub fn decode<R: BufRead>(reader: R, name_hint: &str, ctx: &DecodeContext) -> Result<Decoded, PlayerDbError> {
    let mut record = PlayerRecord::new("", ctx.now);
    let mut warnings = Vec::new();
    let mut lines = reader.lines().enumerate();
    let mut ended = false;

    while let Some((line_no, line)) = next_line(&mut lines)? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.eq_ignore_ascii_case("end") {
            ended = true;
            break;
        }

        let Some((tag, rest)) = line.split_once(':') else {
            warnings.push(FieldWarning {
                line: line_no,
                error: FieldError::UnknownTag(trimmed.to_string()),
            });
            continue;
        };
        let value = after_colon(rest);

        match lookup(tag) {
            Some((Handler::Scalar(apply), suffix)) => {
                let d = Directive { tag, suffix, value };
                if let Err(error) = apply(&mut record, &d) {
                    warnings.push(FieldWarning { line: line_no, error });
                }
            }
            Some((Handler::Block(apply), _)) => {
                let text = read_block(&mut lines, name_hint, tag)?;
                apply(&mut record, text);
            }
            Some((Handler::Lore, _)) => {
                let Some((_, text)) = next_line(&mut lines)? else {
                    return Err(PlayerDbError::Truncated {
                        file: name_hint.to_string(),
                        reason: "end of file after 'Lore' header".into(),
                    });
                };
                let d = Directive { tag, suffix: "", value };
                match parse_lore_header(&d) {
                    Ok((kind, date)) => record.lore.push(LoreEntry { kind, date, text }),
                    Err(error) => warnings.push(FieldWarning { line: line_no, error }),
                }
            }
            None => warnings.push(FieldWarning {
                line: line_no,
                error: FieldError::UnknownTag(tag.trim().to_string()),
            }),
        }
    }

    if !ended {
        return Err(PlayerDbError::Truncated {
            file: name_hint.to_string(),
            reason: "missing End".into(),
        });
    }

    for w in &warnings {
        warn!("player '{}' line {}: {}", escape_log(name_hint), w.line, escape_log(&w.error.to_string()));
    }

    finish(&mut record, name_hint, ctx);
    Ok(Decoded { record, warnings })
}

fn parse_lore_header(d: &Directive<'_>) -> Result<(i32, i64), FieldError> {
    let w = d.words(2)?;
    Ok((d.parse(w[0])?, d.parse(w[1])?))
}

/// Convenience wrapper over [`decode`] for in-memory text.
pub fn decode_str(text: &str, name_hint: &str, ctx: &DecodeContext) -> Result<Decoded, PlayerDbError> {
    decode(io::Cursor::new(text.as_bytes()), name_hint, ctx)
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

/// Post-decode validation, safety resets and derived flags.
fn finish(record: &mut PlayerRecord, name_hint: &str, ctx: &DecodeContext) {
    if record.name.is_empty() {
        error!("finished loading player file '{}' but did not find a name", escape_log(name_hint));
        record.name = if name_hint.trim().is_empty() {
            "Unknown".to_string()
        } else {
            capitalize(name_hint.trim())
        };
        record.transient.load_issues.push(LoadIssue::MissingName);
    }
    if record.idnum <= 0 {
        error!("finished loading player file '{}' but did not find an idnum", escape_log(&record.name));
        record.transient.load_issues.push(LoadIssue::InvalidIdnum);
    }
    if record.password.as_deref().map_or(true, str::is_empty) {
        error!("finished loading player file '{}' but did not find a password", escape_log(&record.name));
        record.transient.load_issues.push(LoadIssue::MissingPassword);
    }

    record.player_flags.remove(PlayerFlags::EXTRACTED | PlayerFlags::DONTSET);
    record.attributes.current = record.attributes.real;
    record.derive_login_flags(ctx.now, ctx.restore_after_secs, &ctx.timeout);
}

fn strip_tildes(text: &str) -> String {
    text.replace('~', "")
}

/// Write a record in canonical order.
pub fn encode<W: Write>(record: &PlayerRecord, out: &mut W) -> io::Result<()> {
    let r = record;

    writeln!(out, "Name: {}", r.name)?;
    writeln!(out, "Password: {}", r.password.as_deref().unwrap_or(""))?;
    writeln!(out, "Idnum: {}", r.idnum)?;
    if let Some(account) = r.account_id {
        writeln!(out, "Account: {account}")?;
    }
    if r.temporary_account_id != NOTHING {
        writeln!(out, "Temporary Account: {}", r.temporary_account_id)?;
    }

    match r.loyalty {
        Some(empire) => {
            writeln!(out, "Empire: {empire}")?;
            writeln!(out, "Rank: {}", r.rank)?;
        }
        None if r.pledge != NOTHING => writeln!(out, "Pledge Empire: {}", r.pledge)?,
        None => {}
    }

    if let Some(host) = &r.last_host {
        writeln!(out, "Last Host: {host}")?;
    }
    writeln!(out, "Last Logon: {}", r.prev_logon)?;

    for pool in Pool::ALL {
        let i = pool.index();
        writeln!(out, "Current-{}: {}", pool.name(), r.pools.current[i])?;
        writeln!(out, "Max-{}: {}", pool.name(), r.pools.max[i])?;
        if r.pools.deficit[i] != 0 {
            writeln!(out, "Deficit-{}: {}", pool.name(), r.pools.deficit[i])?;
        }
    }

    // alphabetic from here on
    for (id, ab) in &r.abilities {
        if ab.purchased || ab.levels_gained != 0 {
            writeln!(out, "Ability: {} {} {}", id, u8::from(ab.purchased), ab.levels_gained)?;
        }
    }
    writeln!(out, "Access Level: {}", r.access_level)?;
    if r.action.action != 0 {
        let a = &r.action;
        writeln!(out, "Action: {} {} {} {}", a.action, a.cycle, a.timer, a.room)?;
        for (i, vnum) in a.vnums.iter().enumerate() {
            writeln!(out, "Action-vnum: {i} {vnum}")?;
        }
    }
    if r.adventure_summon_loc != NOWHERE {
        writeln!(out, "Adventure Summon Loc: {}", r.adventure_summon_loc)?;
        writeln!(out, "Adventure Summon Map: {}", r.adventure_summon_map)?;
    }
    for af in &r.affects {
        writeln!(
            out,
            "Affect: {} {} {} {} {} {}",
            af.kind,
            af.cast_by,
            af.duration,
            af.modifier,
            af.location,
            af.bitvector.to_alpha()
        )?;
    }
    writeln!(out, "Affect Flags: {}", r.affect_flags.to_alpha())?;
    if r.apparent_age != 0 {
        writeln!(out, "Apparent Age: {}", r.apparent_age)?;
    }
    writeln!(out, "Archetype: {}", r.archetype)?;
    for att in Attribute::ALL {
        writeln!(out, "Attribute-{}: {}", att.name(), r.attributes.real(*att))?;
    }

    if r.bad_passwords != 0 {
        writeln!(out, "Bad passwords: {}", r.bad_passwords)?;
    }
    writeln!(out, "Birth: {}", r.birth)?;
    writeln!(out, "Bonus Exp: {}", r.bonus_exp)?;
    writeln!(out, "Bonus Traits: {}", flags::to_alpha(r.bonus_traits))?;

    if r.can_gain_new_skills {
        writeln!(out, "Can Gain New Skills: 1")?;
    }
    if r.can_get_bonus_skills {
        writeln!(out, "Can Get Bonus Skills: 1")?;
    }
    writeln!(out, "Class: {}", r.class)?;
    writeln!(out, "Class Progression: {}", r.class_progression)?;
    writeln!(out, "Class Role: {}", r.class_role)?;
    for (name, color) in &r.custom_colors {
        writeln!(out, "Color-{name}: {color}")?;
    }
    for cond in Condition::ALL {
        let value = r.conditions[cond.index()];
        if value != 0 {
            writeln!(out, "Condition-{}: {}", cond.name(), value)?;
        }
    }
    if r.confused_dir != 0 {
        writeln!(out, "Confused Direction: {}", r.confused_dir)?;
    }
    for cool in &r.cooldowns {
        writeln!(out, "Cooldown: {} {}", cool.kind, cool.expire_time)?;
    }
    if let Some(host) = &r.creation_host {
        writeln!(out, "Creation Host: {host}")?;
    }

    writeln!(out, "Daily Cycle: {}", r.daily_cycle)?;
    if let Some(desc) = &r.description {
        writeln!(out, "Description:\n{}~", strip_tildes(desc))?;
    }
    if let Some(name) = &r.disguised_name {
        writeln!(out, "Disguised Name: {name}")?;
    }
    if r.disguised_sex != Sex::Neutral {
        writeln!(out, "Disguised Sex: {}", r.disguised_sex.name())?;
    }
    for dot in &r.dots {
        writeln!(
            out,
            "DoT Effect: {} {} {} {} {} {} {}",
            dot.kind, dot.cast_by, dot.duration, dot.damage_type, dot.damage, dot.stack, dot.max_stack
        )?;
    }

    for (name, value) in &r.extra_attributes {
        if *value != 0 {
            writeln!(out, "Extra-{name}: {value}")?;
        }
    }

    if let Some(prompt) = &r.fight_prompt {
        writeln!(out, "Fight Prompt: {prompt}")?;
    }

    if r.grants != 0 {
        writeln!(out, "Grants: {}", flags::to_alpha(r.grants))?;
    }

    writeln!(out, "Highest Known Level: {}", r.highest_known_level)?;

    for id in r.ignore_list.iter().take(MAX_IGNORES) {
        if *id != 0 {
            writeln!(out, "Ignore: {id}")?;
        }
    }
    if r.immortal_level != -1 {
        writeln!(out, "Immortal Level: {}", r.immortal_level)?;
    }
    writeln!(out, "Injuries: {}", flags::to_alpha(r.injuries))?;
    if r.invis_level != 0 {
        writeln!(out, "Invis Level: {}", r.invis_level)?;
    }

    if r.last_corpse_id != 0 {
        writeln!(out, "Last Corpse Id: {}", r.last_corpse_id)?;
    }
    writeln!(out, "Last Death: {}", r.last_death)?;
    writeln!(out, "Last Direction: {}", r.last_direction)?;
    writeln!(out, "Last Known Level: {}", r.last_known_level)?;
    writeln!(out, "Last Room: {}", r.last_room)?;
    if r.last_tell != NOBODY {
        writeln!(out, "Last Tell: {}", r.last_tell)?;
    }
    if r.last_tip != 0 {
        writeln!(out, "Last Tip: {}", r.last_tip)?;
    }
    if let Some(lastname) = &r.lastname {
        writeln!(out, "Lastname: {lastname}")?;
    }
    writeln!(out, "Load Room: {}", r.load_room)?;
    writeln!(out, "Load Room Check: {}", r.load_room_check)?;
    for lore in &r.lore {
        writeln!(out, "Lore: {} {}\n{}", lore.kind, lore.date, lore.text.replace('\n', " "))?;
    }

    if r.map_mark != NOWHERE {
        writeln!(out, "Map Mark: {}", r.map_mark)?;
    }
    if r.mapsize != 0 {
        writeln!(out, "Mapsize: {}", r.mapsize)?;
    }
    if r.morph != 0 {
        writeln!(out, "Morph: {}", r.morph)?;
    }
    if r.mount_flags != 0 {
        writeln!(out, "Mount Flags: {}", flags::to_alpha(r.mount_flags))?;
    }
    if r.mount_vnum != NOTHING {
        writeln!(out, "Mount Vnum: {}", r.mount_vnum)?;
    }

    if let Some(notes) = &r.admin_notes {
        writeln!(out, "Notes:\n{}~", strip_tildes(notes))?;
    }

    for offer in &r.offers {
        writeln!(
            out,
            "Offer: {} {} {} {} {}",
            offer.from, offer.kind, offer.location, offer.time, offer.data
        )?;
    }
    if !r.olc.is_empty() {
        writeln!(
            out,
            "OLC: {} {} {}",
            r.olc.min_vnum,
            r.olc.max_vnum,
            flags::to_alpha(r.olc.flags)
        )?;
    }

    writeln!(out, "Played: {}", r.played)?;
    writeln!(out, "Player Flags: {}", r.player_flags.to_alpha())?;
    if let Some(poofin) = &r.poofin {
        writeln!(out, "Poofin: {poofin}")?;
    }
    if let Some(poofout) = &r.poofout {
        writeln!(out, "Poofout: {poofout}")?;
    }
    if !r.preferences.is_empty() {
        writeln!(out, "Preferences: {}", r.preferences.to_alpha())?;
    }
    if r.promo_id != 0 {
        writeln!(out, "Promo ID: {}", r.promo_id)?;
    }
    if let Some(prompt) = &r.prompt {
        writeln!(out, "Prompt: {prompt}")?;
    }

    if r.recent_deaths != 0 {
        writeln!(out, "Recent Deaths: {}", r.recent_deaths)?;
    }
    if let Some(referred) = &r.referred_by {
        writeln!(out, "Referred by: {referred}")?;
    }
    for (material, amount) in &r.resources {
        if *amount != 0 {
            writeln!(out, "Resource: {amount} {material}")?;
        }
    }
    for id in r.rewarded_today.iter().take(MAX_REWARDS_PER_DAY) {
        writeln!(out, "Rewarded: {id}")?;
    }

    writeln!(out, "Sex: {}", r.sex.name())?;
    for (id, sk) in &r.skills {
        writeln!(
            out,
            "Skill: {} {} {:.2} {} {}",
            id,
            sk.level,
            sk.exp,
            sk.resets,
            u8::from(sk.blocked)
        )?;
    }
    writeln!(out, "Skill Level: {}", r.skill_level)?;
    for channel in &r.slash_channels {
        writeln!(out, "Slash-channel: {channel}")?;
    }
    if r.syslog_flags != 0 {
        writeln!(out, "Syslog Flags: {}", flags::to_alpha(r.syslog_flags))?;
    }

    if let Some(title) = &r.title {
        writeln!(out, "Title: {title}")?;
    }
    if r.tomb_room != NOWHERE {
        writeln!(out, "Tomb Room: {}", r.tomb_room)?;
    }

    if r.using_poison != 0 {
        writeln!(out, "Using Poison: {}", r.using_poison)?;
    }

    writeln!(out, "End")
}

/// Encode into a `String`.
pub fn encode_to_string(record: &PlayerRecord) -> io::Result<String> {
    let mut buf = Vec::new();
    encode(record, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn ctx() -> DecodeContext {
        DecodeContext::new(NOW)
    }

    #[test]
    fn minimal_record_gets_defaults() {
        let text = "Name: Bob\nIdnum: 5\nPassword: x\nEnd\n";
        let d = decode_str(text, "bob", &ctx()).expect("decode");
        assert!(d.warnings.is_empty());
        let r = d.record;
        assert_eq!(r.name, "Bob");
        assert_eq!(r.idnum, 5);
        assert_eq!(r.password.as_deref(), Some("x"));
        assert_eq!(r.pools, Pools::default());
        assert!(r.skills.is_empty());
        assert!(r.affects.is_empty());
        assert!(r.transient.load_issues.is_empty());
    }

    #[test]
    fn missing_end_is_fatal() {
        let err = decode_str("Name: Bob\nIdnum: 5\n", "bob", &ctx()).unwrap_err();
        assert!(matches!(err, PlayerDbError::Truncated { .. }));
        assert!(err.is_structural());
    }

    #[test]
    fn unterminated_block_is_fatal() {
        let err = decode_str("Name: Bob\nDescription:\nno tilde\nEnd\n", "bob", &ctx()).unwrap_err();
        assert!(matches!(err, PlayerDbError::Truncated { .. }));
    }

    #[test]
    fn unknown_and_malformed_lines_are_warnings() {
        let text = "Name: Bob\nFrobnicate: 3\nIdnum: five\nMax-Stamina: 4\nPassword: x\nIdnum: 7\nEnd\n";
        let d = decode_str(text, "bob", &ctx()).expect("decode");
        assert_eq!(d.record.idnum, 7);
        assert_eq!(d.warnings.len(), 3);
        assert_eq!(d.warnings[0].line, 2);
        assert_eq!(d.warnings[0].error, FieldError::UnknownTag("Frobnicate".into()));
        assert!(matches!(d.warnings[1].error, FieldError::Malformed { .. }));
        assert!(matches!(d.warnings[2].error, FieldError::UnknownName { .. }));
    }

    #[test]
    fn missing_name_uses_hint_and_flags_issues() {
        let d = decode_str("Access Level: 1\nEnd\n", "alice", &ctx()).expect("decode");
        assert_eq!(d.record.name, "Alice");
        assert!(d.record.transient.load_issues.contains(&LoadIssue::MissingName));
        assert!(d.record.transient.load_issues.contains(&LoadIssue::MissingPassword));
        assert!(d.record.transient.load_issues.contains(&LoadIssue::InvalidIdnum));
    }

    #[test]
    fn tags_are_case_insensitive_and_families_resolve() {
        let text = "NAME: Bob\nmax-health: 50\nCURRENT-Move: 3\nattribute-wits: 4\nEnd\n";
        let r = decode_str(text, "bob", &ctx()).expect("decode").record;
        assert_eq!(r.name, "Bob");
        assert_eq!(r.pools.max(Pool::Health), 50);
        assert_eq!(r.pools.current(Pool::Move), 3);
        assert_eq!(r.attributes.get(Attribute::Wits), 4);
    }

    #[test]
    fn title_keeps_spaces_but_lastname_is_trimmed() {
        let text = "Title:  the  Brave \nLastname:  Smith \nEnd\n";
        let r = decode_str(text, "bob", &ctx()).expect("decode").record;
        assert_eq!(r.title.as_deref(), Some(" the  Brave "));
        assert_eq!(r.lastname.as_deref(), Some("Smith"));
    }

    #[test]
    fn runtime_flags_are_cleared_on_load() {
        let text = "Name: Bob\nPlayer Flags: ajkl\nEnd\n";
        let r = decode_str(text, "bob", &ctx()).expect("decode").record;
        assert!(r.player_flags.contains(PlayerFlags::APPROVED));
        assert!(!r.player_flags.contains(PlayerFlags::DONTSET));
        assert!(!r.player_flags.contains(PlayerFlags::EXTRACTED));
        assert!(r.player_flags.contains(PlayerFlags::NEEDS_NEWBIE_SETUP));
    }

    #[test]
    fn restore_flag_follows_absence() {
        let away = format!("Name: Bob\nLast Logon: {}\nEnd\n", NOW - 3600);
        let back = format!("Name: Bob\nLast Logon: {}\nEnd\n", NOW - 60);
        assert!(decode_str(&away, "bob", &ctx()).expect("decode").record.is_restore_pending());
        assert!(!decode_str(&back, "bob", &ctx()).expect("decode").record.is_restore_pending());
    }

    #[test]
    fn bounded_lists_stop_at_capacity() {
        let mut text = String::from("Name: Bob\n");
        for i in 0..(MAX_IGNORES + 2) {
            text.push_str(&format!("Ignore: {}\n", i + 1));
        }
        text.push_str("End\n");
        let d = decode_str(&text, "bob", &ctx()).expect("decode");
        assert_eq!(d.record.ignore_list.len(), MAX_IGNORES);
        assert_eq!(d.warnings.len(), 2);
    }

    #[test]
    fn lore_and_blocks_round_trip() {
        let mut r = PlayerRecord::new("Bob", NOW);
        r.idnum = 9;
        r.password = Some("hash".into());
        r.description = Some("A tall figure.\nWith a ~hat.".into());
        r.lore.push(LoreEntry { kind: 2, date: 1000, text: "Joined the empire".into() });
        r.lore.push(LoreEntry { kind: 3, date: 2000, text: "Left again".into() });
        let text = encode_to_string(&r).expect("encode");
        let back = decode_str(&text, "bob", &ctx()).expect("decode").record;
        assert_eq!(back.description.as_deref(), Some("A tall figure.\nWith a hat."));
        assert_eq!(back.lore, r.lore);
    }

    #[test]
    fn skill_exp_keeps_two_decimals() {
        let mut r = PlayerRecord::new("Bob", NOW);
        r.skills.insert(3, SkillEntry { level: 40, exp: 12.3456, resets: 1, blocked: true });
        let text = encode_to_string(&r).expect("encode");
        assert!(text.contains("Skill: 3 40 12.35 1 1\n"));
        let back = decode_str(&text, "bob", &ctx()).expect("decode").record;
        let sk = &back.skills[&3];
        assert!((sk.exp - 12.35).abs() < 1e-9);
        assert!(sk.blocked);
    }

    #[test]
    fn encode_is_stable_after_decode() {
        let mut r = PlayerRecord::new("Bob", NOW);
        r.idnum = 9;
        r.password = Some("hash".into());
        r.prev_logon = NOW - 10;
        r.player_flags = PlayerFlags::APPROVED | PlayerFlags::KEEP_LAST_LOGIN_INFO;
        r.affects.push(Affect { kind: 4, cast_by: 2, duration: 10, modifier: -1, location: 3, bitvector: AffectFlags::FLY | AffectFlags::BLIND });
        r.slash_channels = vec!["ooc".into(), "trade".into()];
        let once = encode_to_string(&r).expect("encode");
        let decoded = decode_str(&once, "bob", &ctx()).expect("decode").record;
        let twice = encode_to_string(&decoded).expect("encode");
        assert_eq!(once, twice);
    }
}
