use std::fmt;

use thiserror::Error;

/// Which part of the key round-trip self test failed.
///
/// The numeric codes are the ones peers and wallets have always reported,
/// so they stay fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStep {
    /// Private-key transform of the sample sector failed.
    PrivateFirst = 1,
    /// Public-key transform after the private one failed.
    PublicSecond = 2,
    /// private -> public did not restore the sample.
    ForwardMismatch = 3,
    /// Public-key transform of the sample sector failed.
    PublicFirst = 4,
    /// Private-key transform after the public one failed.
    PrivateSecond = 5,
    /// public -> private did not restore the sample.
    ReverseMismatch = 6,
}

impl VerifyStep {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for VerifyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            VerifyStep::PrivateFirst => "private transform",
            VerifyStep::PublicSecond => "public transform after private",
            VerifyStep::ForwardMismatch => "private/public round trip",
            VerifyStep::PublicFirst => "public transform",
            VerifyStep::PrivateSecond => "private transform after public",
            VerifyStep::ReverseMismatch => "public/private round trip",
        };
        write!(f, "{what} (step {})", self.code())
    }
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("out of memory while allocating {0}")]
    Allocation(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("degenerate key: {0}")]
    DegenerateKey(&'static str),

    #[error("transform undefined: block {block} is not below the modulus")]
    TransformUndefined { block: usize },

    #[error("key verification failed at {0}")]
    KeyVerification(VerifyStep),

    #[error("operation not allowed in state {0}")]
    InvalidState(&'static str),

    #[error("OS entropy source unavailable: {0}")]
    Entropy(String),

    #[error("dataset build failed: {0}")]
    DatasetBuild(String),

    #[error("no hashing VM could be created with any flag set")]
    VmCreation,

    #[error("hash engine error: {0}")]
    Engine(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
