pub mod cli;
pub mod executor;
pub mod parse;
pub mod receiver;
pub mod runner;
pub mod transfer;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
