//! Matchmaking engine and match handler dispatch

pub mod dispatch;
pub mod matchmaker;

pub use dispatch::{DispatchWorker, FnMatchHandler, MatchDispatcher, MatchHandler};
pub use matchmaker::{MatchAttemptOutcome, Matchmaker};
