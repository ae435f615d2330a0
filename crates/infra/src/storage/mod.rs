//! Media file lifecycle storage.

pub mod mover;

pub use mover::{FileMover, FsFileMover, MoveError, MoveOutcome, MoveRequest};
