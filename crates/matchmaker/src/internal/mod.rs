#[macro_use]
pub(crate) mod common;

pub mod ledger;
pub mod matching;
pub mod negotiation;
pub mod quota;
pub mod records;

#[cfg(test)]
mod tests;
