//! User interaction seam.
//!
//! Loading may need a password or a confirmation before signing a certified
//! document. Desktop front-ends implement [`Interaction`]; services run
//! headless and never reach it.

/// Questions the loader may ask a user
pub trait Interaction: Send + Sync {
    /// Ask for the document password
    ///
    /// `None` means the user cancelled the prompt.
    fn request_password(&self) -> Option<String>;

    /// Ask whether a certified document that forbids changes should be signed anyway
    fn confirm_certified_signing(&self) -> bool;
}

/// Interaction that declines every question
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInteraction;

impl Interaction for NoInteraction {
    fn request_password(&self) -> Option<String> {
        None
    }

    fn confirm_certified_signing(&self) -> bool {
        false
    }
}

/// Interaction with canned answers, useful for batch jobs that know the password
#[derive(Debug, Default, Clone)]
pub struct FixedAnswers {
    pub password: Option<String>,
    pub sign_certified: bool,
}

impl Interaction for FixedAnswers {
    fn request_password(&self) -> Option<String> {
        self.password.clone()
    }

    fn confirm_certified_signing(&self) -> bool {
        self.sign_certified
    }
}
