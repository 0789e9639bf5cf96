//! Ways of feeding the session: the local prompt or one remote client

pub mod capture;
pub mod prompt;
pub mod remote;
