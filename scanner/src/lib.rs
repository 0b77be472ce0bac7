mod cache;
pub mod descriptor;
pub mod file;
mod service;

use keel_graph::{ClassIndex, LoaderHandle};
use miette::Diagnostic;
use url::Url;

pub use cache::{ScanCache, ScanKey, ScanLease};
pub use descriptor::{
    ContainerDecl, Descriptor, DescriptorError, DescriptorName, DescriptorSource, DeploymentDecl,
    FileDescriptorSource, ModuleDescriptor, PersistenceDescriptor, ReferenceDecl, ResourceDecl,
    UnitDecl, UnitRefDecl, VendorDescriptor, ComponentDecl,
};
pub use file::IndexFileScanner;
pub use service::ScanService;

#[derive(Debug, thiserror::Error, Diagnostic)]
#[non_exhaustive]
pub enum ScanError {
    #[error("unsupported classpath entry `{url}`")]
    #[diagnostic(code(keel::scan::unsupported_entry))]
    UnsupportedEntry { url: Url },
    #[error("failed to read class index at `{url}`")]
    #[diagnostic(code(keel::scan::io))]
    Io {
        url: Url,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed class index at `{url}`")]
    #[diagnostic(
        code(keel::scan::malformed_index),
        help("class indexes are JSON documents of the form {{ \"classes\": [...] }}")
    )]
    MalformedIndex {
        url: Url,
        #[source]
        source: serde_json::Error,
    },
    #[error("scan worker for {module} failed: {message}")]
    #[diagnostic(code(keel::scan::worker))]
    Worker { module: String, message: String },
}

/// Everything a scanner needs to know about one module.
#[derive(Clone, Debug)]
pub struct ScanRequest {
    /// Module name for logs and errors.
    pub module: String,
    pub classpath: Vec<Url>,
    pub loader: LoaderHandle,
}

impl ScanRequest {
    pub fn key(&self) -> ScanKey {
        ScanKey::for_classpath(&self.classpath)
    }
}

/// Class metadata source for a module classpath.
///
/// Implementations are synchronous; [`ScanService`] runs them on the blocking pool.
pub trait Scanner: Send + Sync {
    fn scan(&self, request: &ScanRequest) -> Result<ClassIndex, ScanError>;
}
