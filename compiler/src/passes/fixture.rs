use keel_config::DeployOptions;
use keel_scanner::{Descriptor, DescriptorError, DescriptorName, DescriptorSource};
use url::Url;

use super::StageContext;
use crate::catalog::StaticCatalog;

/// A descriptor source with nothing in it.
pub(crate) struct NoDescriptors;

impl DescriptorSource for NoDescriptors {
    fn parse(&self, _: &Url, _: DescriptorName) -> Result<Option<Descriptor>, DescriptorError> {
        Ok(None)
    }
}

pub(crate) struct Fixture {
    pub options: DeployOptions,
    pub catalog: StaticCatalog,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            options: DeployOptions::default(),
            catalog: StaticCatalog::with_defaults(),
        }
    }

    pub fn offline() -> Self {
        Self {
            options: DeployOptions::offline(),
            ..Self::new()
        }
    }

    pub fn cx(&self) -> StageContext<'_> {
        StageContext {
            options: &self.options,
            descriptors: &NoDescriptors,
            catalog: &self.catalog,
        }
    }
}
