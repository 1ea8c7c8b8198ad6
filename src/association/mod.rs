//! Network association.
//!
//! - [`indication`]: association indication codes and their meaning
//! - [`manager`]: radio configuration and the join state machine

pub mod indication;
pub mod manager;

pub use indication::{classify, AssociationState, DiagnosticCategory};
pub use manager::{
    AssociationManager, AssociationMode, AssociationOutcome, ConfigurationReport, NetworkParams,
    ASSOCIATION_TIMEOUT, RUNTIME_POLL_INTERVAL, SETUP_POLL_DELAY,
};
