//! Diff pipeline primitives (no rendering dependencies).

mod align;
mod cache;
mod cancel;
mod engine;
mod model;
mod parser;
mod preflight;
mod prefs;
mod search;
mod source;
mod watcher;

pub use align::*;
pub use cache::*;
pub use cancel::*;
pub use engine::*;
pub use model::*;
pub use parser::*;
pub use preflight::*;
pub use prefs::*;
pub use search::*;
pub use source::*;
pub use watcher::*;
