//! The shared secret in front of the results and reset views.
//!
//! This is a plain string comparison against one password known to HR. It keeps
//! curious coworkers out of the results page of a low-stakes internal vote and
//! nothing more.

use log::warn;

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Access {
    /// Nothing was typed yet. No error message is due.
    NoAttempt,
    Granted,
    Denied,
}

#[derive(Clone)]
pub struct AdminGate {
    secret: String,
}

impl AdminGate {
    pub fn new(secret: &str) -> AdminGate {
        AdminGate {
            secret: secret.to_string(),
        }
    }

    pub fn check(&self, input: &str) -> Access {
        if input.is_empty() {
            Access::NoAttempt
        } else if input == self.secret {
            Access::Granted
        } else {
            warn!("Admin access denied");
            Access::Denied
        }
    }
}

impl std::fmt::Debug for AdminGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminGate").finish_non_exhaustive()
    }
}
