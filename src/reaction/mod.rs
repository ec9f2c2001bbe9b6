//! Reactions to main device changes.

pub mod popup;

pub use popup::{EventPopUp, PopUpReaction};
