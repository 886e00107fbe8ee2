//! Token authentication
//!
//! The scope server authenticates both channels with a bearer token obtained
//! over HTTP. See [`TokenLease`].

mod token;

pub use token::{check_validity, RefreshDue, Token, TokenGrant, TokenLease, TokenService};
