use std::fmt;

use remodel_core::ModelRef;

/// Which models the boot key material must trust after a reseal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResealRequest {
    /// Switch window: both the running and the incoming model must boot.
    DualModel { current: ModelRef, next: ModelRef },
    NewModelOnly { model: ModelRef },
}

impl fmt::Display for ResealRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DualModel { current, next } => write!(f, "{current} and {next}"),
            Self::NewModelOnly { model } => write!(f, "{model}"),
        }
    }
}

/// Opaque boot-sealing collaborator.
pub trait Resealer {
    fn reseal(&mut self, request: &ResealRequest) -> anyhow::Result<()>;
}

impl<F> Resealer for F
where
    F: FnMut(&ResealRequest) -> anyhow::Result<()>,
{
    fn reseal(&mut self, request: &ResealRequest) -> anyhow::Result<()> {
        self(request)
    }
}
