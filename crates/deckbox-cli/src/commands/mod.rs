pub mod card;
pub mod common;
pub mod completions;
pub mod deck;
pub mod queue;
pub mod sync;
