//! Promotional codes entered at character creation.
//!
//! The record stores only the numeric id (`Promo ID`); id 0 means none.

use crate::playerdb::types::{Attribute, PlayerRecord, BASIC_SKILL_CAP, MAX_ATTRIBUTE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoCode {
    /// Starting coins.
    CountDeMonet = 1,
    /// Bonus charisma.
    Facebook = 2,
    /// Every starting skill times 1.5.
    SkillUps = 3,
}

impl PromoCode {
    pub const ALL: [PromoCode; 3] = [PromoCode::CountDeMonet, PromoCode::Facebook, PromoCode::SkillUps];

    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.id() == id)
    }

    /// Look up the code a player types during creation.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code().eq_ignore_ascii_case(code.trim()))
    }

    pub fn id(self) -> i32 {
        self as i32
    }

    pub fn code(self) -> &'static str {
        match self {
            PromoCode::CountDeMonet => "countdemonet",
            PromoCode::Facebook => "facebook",
            PromoCode::SkillUps => "skillups",
        }
    }

    pub fn apply(self, record: &mut PlayerRecord) {
        match self {
            PromoCode::CountDeMonet => record.add_coins(None, 100),
            PromoCode::Facebook => {
                let cha = record.attributes.real(Attribute::Charisma);
                record
                    .attributes
                    .set_real(Attribute::Charisma, (cha + 1).clamp(1, MAX_ATTRIBUTE));
            }
            PromoCode::SkillUps => {
                for skill in record.skills.values_mut().filter(|s| s.level > 0) {
                    skill.level = ((f64::from(skill.level) * 1.5) as i32).min(BASIC_SKILL_CAP);
                }
            }
        }
    }
}

/// Apply the record's promo code, if it names one.
pub fn apply_promo(record: &mut PlayerRecord) -> Option<PromoCode> {
    let promo = PromoCode::from_id(record.promo_id)?;
    promo.apply(record);
    Some(promo)
}
