//! # Player Database
//!
//! Persistence and identity for players:
//!
//! - [`codec`] reads and writes the tagged-text player record
//! - [`index`] keeps a summary of every player, by idnum and by name
//! - [`account`] groups players into accounts and persists them
//! - [`repository`] ties the three together and owns the files on disk
//! - [`login`] reconciles a loaded record with the live world
//! - [`membership`] recounts empire members, greatness and playtime
//! - [`newplayer`] and [`promo`] set up brand-new characters
//!
//! The game supplies room geography, live hooks and the online player table
//! through the traits in [`world`].

pub mod account;
pub mod codec;
pub mod empire;
pub mod errors;
pub mod flags;
pub mod index;
pub mod login;
pub mod membership;
pub mod newplayer;
pub mod promo;
pub mod repository;
pub mod timeout;
pub mod types;
pub mod world;

pub use account::{Account, AccountPlayerLink, AccountStore};
pub use codec::{decode, decode_str, encode, encode_to_string, DecodeContext, Decoded};
pub use empire::{Empire, EmpireTable};
pub use errors::{FieldError, FieldWarning, PlayerDbError};
pub use flags::{AffectFlags, PlayerFlags, PrefFlags};
pub use index::{PlayerIndex, PlayerIndexEntry, RebuildReport};
pub use login::{enter_game, LoginContext, LoginEnv, LoginOutcome, LoginPolicy};
pub use membership::MembershipReport;
pub use newplayer::{init_player, set_title, start_new_character, NewPlayerPolicy};
pub use promo::PromoCode;
pub use repository::{Found, PlayerRepository, RepositoryOptions};
pub use timeout::MemberTimeout;
pub use types::PlayerRecord;
pub use world::{EmptyWorld, GameHooks, NoHooks, NoOnlinePlayers, OnlinePlayers, WorldMap};
