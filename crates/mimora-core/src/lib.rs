//! # mimora-core: Foundational Types for the Mimora Backend
//!
//! Every other crate in the workspace depends on `mimora-core`; it depends on
//! nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `ProfileId` and
//!    `VerificationRequestId` are distinct types. A request id cannot be
//!    passed where a profile id is expected, which matters for webhook
//!    correlation where both arrive as bare strings.
//!
//! 2. **One profile abstraction.** Artists and customers share one profile
//!    model, distinguished by [`ProfileRole`]. The KYC state machine is
//!    written once.
//!
//! 3. **`CanonicalBytes` for anything signed.** Webhook signatures are
//!    computed over `CanonicalBytes`, never over ad hoc `to_vec` output.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `mimora-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

#![deny(missing_docs)]

pub mod canonical;
pub mod error;
pub mod identity;
pub mod otp;

pub use canonical::CanonicalBytes;
pub use error::{CanonicalizationError, MimoraError, OtpError, ValidationError};
pub use identity::{EmailAddress, ProfileId, ProfileRole, VerificationRequestId};
pub use otp::{OneTimeCode, OTP_LENGTH, OTP_TTL_SECS};
