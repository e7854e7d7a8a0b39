//! # API Route Modules
//!
//! - `kyc`: profile-scoped document and face verification sessions, status
//!   summary, retry, and the provider callback.
//! - `profiles`: registration, lookup and descriptive updates of artist and
//!   customer profiles.
//! - `email_login`: email one-time-code issue and verification for customer
//!   login.

pub mod email_login;
pub mod kyc;
pub mod profiles;
