use thiserror::Error;

pub type Result<T> = std::result::Result<T, BuildError>;

/// Fatal build conditions. Any of these unwinds the whole build: a half
/// rewritten tree would describe an invalid package.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("cannot resolve custom attribute directive `{directive}`: {reason}")]
    UnresolvedDirective { directive: String, reason: String },

    #[error("invalid custom attribute directive `{directive}`: {reason}")]
    InvalidDirective { directive: String, reason: String },

    #[error("document has no Product or Module element")]
    MissingProduct,

    #[error("document has {0} Product/Module elements; exactly one is expected")]
    MultipleProducts(usize),

    #[error("more than a single directory is marked as the install dir: {}", .0.join(", "))]
    MultipleInstallDirs(Vec<String>),

    #[error("directory name {name:?} is an unknown environment constant")]
    UnknownEnvironmentConstant { name: String },

    #[error("duplicate {kind} id {id:?}")]
    DuplicateId { kind: String, id: String },

    #[error("cannot determine source base directory: {0}")]
    SourceBaseDir(#[from] std::io::Error),
}
