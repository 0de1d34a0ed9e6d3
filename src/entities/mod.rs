// Entity Models
//
// Rows the pipeline reads from or writes to the relational store.

pub mod account;

pub use account::Account;
