//! Outcome signals
//!
//! A test body returns [`BodyResult`]. `Ok(())` is a normal return; the error
//! side is an [`Interrupt`] that ends the body immediately with a definite
//! outcome. Deliberate outcomes (skip, explicit failure, expected failure) are
//! distinct variants so the executor never confuses them with defects.
//!
//! Any `std::error::Error` converts into [`Interrupt::Error`], so bodies can
//! use `?` on fallible calls:
//!
//! ```ignore
//! fn body(args: Args) -> BodyResult {
//!     let client = args.resource::<Client>("client")?;
//!     if client.offline() {
//!         return skip("client offline");
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;

/// Boxed defect raised by a test body
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result returned by every test body
pub type BodyResult = Result<(), Interrupt>;

/// Early termination of a test body
///
/// Does not implement `std::error::Error`, which keeps the blanket
/// `From<E: Error>` conversion coherent.
#[derive(Debug)]
pub enum Interrupt {
    /// The test is not applicable; maps to SKIPPED
    Skip(Option<String>),
    /// Deliberate failure; maps to FAILED
    Fail(Option<String>),
    /// Known failure; maps to XFAILED
    XFail(Option<String>),
    /// Unexpected defect; maps to ERROR
    Error(BoxError),
}

impl Interrupt {
    /// Skip signal with a reason
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip(Some(reason.into()))
    }

    /// Explicit failure signal with a reason
    pub fn fail(reason: impl Into<String>) -> Self {
        Self::Fail(Some(reason.into()))
    }

    /// Expected-failure signal with a reason
    pub fn xfail(reason: impl Into<String>) -> Self {
        Self::XFail(Some(reason.into()))
    }

    /// Defect carrying only a message
    pub fn error(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Error(message.into())
    }

    /// Human-readable reason or error text
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Skip(reason) | Self::Fail(reason) | Self::XFail(reason) => reason.clone(),
            Self::Error(err) => Some(err.to_string()),
        }
    }

    /// Short kind label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Skip(_) => "skip",
            Self::Fail(_) => "fail",
            Self::XFail(_) => "xfail",
            Self::Error(_) => "error",
        }
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{}: {message}", self.kind()),
            None => f.write_str(self.kind()),
        }
    }
}

impl<E> From<E> for Interrupt
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::Error(Box::new(err))
    }
}

/// End the body as SKIPPED
pub fn skip(reason: impl Into<String>) -> BodyResult {
    Err(Interrupt::skip(reason))
}

/// End the body as FAILED
pub fn fail(reason: impl Into<String>) -> BodyResult {
    Err(Interrupt::fail(reason))
}

/// End the body as XFAILED
pub fn xfail(reason: impl Into<String>) -> BodyResult {
    Err(Interrupt::xfail(reason))
}
