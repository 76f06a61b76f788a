//! Remote text session shared between firmware and emulator targets.
//!
//! The grammar lives in [`grammar`] and is implemented with a token/parse
//! pipeline that stays compatible with `no_std`. [`session::LineBuffer`]
//! assembles lines from the byte transport and [`commands`] executes them.

pub mod catalog;
pub mod commands;
pub mod grammar;
pub mod session;

/// Line-oriented byte transport for the remote session.
pub trait RemoteLink {
    /// Next received byte, if one is pending. Never blocks.
    fn read_byte(&mut self) -> Option<u8>;

    /// Sends one reply line. The transport appends the line terminator.
    fn write_line(&mut self, line: &str);
}
