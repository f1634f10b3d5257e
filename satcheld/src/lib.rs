pub mod auth;
pub mod daemon;
pub mod localdir;
pub mod rpc;
pub mod session;
pub mod status;
pub mod watch;

#[cfg(test)]
pub(crate) mod testutil;
