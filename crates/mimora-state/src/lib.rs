//! # mimora-state: KYC Verification State Machine
//!
//! The verification flow is modelled as an explicit enumeration with a pure
//! transition function. Nothing in this crate performs I/O: the orchestrator
//! and the webhook reconciler in `mimora-api` load a request, call
//! [`KycProgress::apply`], and persist whatever it returns.
//!
//! ## Modules
//!
//! - [`kyc`]: `KycStatus`, `KycStep`, `KycProgress`, `KycEvent` and the
//!   transition function.
//! - [`callback`]: normalisation of the provider's free-text
//!   `(status, verification_type)` pair into a [`CallbackOutcome`].
//! - [`log`]: the append-only verification audit log stored on each request.

pub mod callback;
pub mod kyc;
pub mod log;

pub use callback::{CallbackOutcome, VerificationKind};
pub use kyc::{KycEvent, KycProgress, KycStatus, KycStep, KycTransitionError, Transition};
pub use log::{VerificationEntry, VerificationLog};
