//! Speech turn-taking
//!
//! Decides when an utterance is finished, sends it for reflection, speaks
//! the reply and re-arms listening, recovering from every failure on its own.

mod controller;
mod state;

pub use controller::{ControllerHandle, TurnController};
pub use state::{ControllerState, Fragment, Phase, TurnRecord, Utterance};
