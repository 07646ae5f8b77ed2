//! Search criteria: the model, its text format, and the matcher.

pub mod matcher;
pub mod model;
pub mod parse;
pub mod time;

pub use matcher::Matcher;
pub use model::{ChannelToken, SearchCriteria, Spacecraft, TriState, MAX_CHANNEL, MAX_SOURCES};
pub use time::TimeSpec;
