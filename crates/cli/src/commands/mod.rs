//! One-shot subcommands that do not start the server.

pub(crate) mod fees;
pub(crate) mod inspect;
