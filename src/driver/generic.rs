//! Generic driver used until a platform is identified.

use std::sync::Arc;

use async_trait::async_trait;

use super::{DriverCore, PlatformDriver};
use crate::error::Result;
use crate::patterns::PatternRegistry;

/// Baseline behavior; every lookup resolves against the `generic`
/// pattern set.
#[derive(Debug)]
pub struct GenericDriver {
    core: DriverCore,
}

impl GenericDriver {
    pub fn new(registry: &Arc<PatternRegistry>) -> Result<Self> {
        Ok(Self {
            core: DriverCore::new(registry, "generic")?,
        })
    }
}

#[async_trait]
impl PlatformDriver for GenericDriver {
    fn platform(&self) -> &'static str {
        "generic"
    }

    fn core(&self) -> &DriverCore {
        &self.core
    }
}
