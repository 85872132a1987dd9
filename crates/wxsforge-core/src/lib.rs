pub mod auto_elements;
pub mod build;
pub mod consts;
pub mod context;
pub mod diagnostics;
pub mod directives;
pub mod doc;
pub mod emit;
pub mod error;
pub mod guid;
pub mod ids;
pub mod normalize;
pub mod options;
pub mod validate;

mod util;

pub use build::{build_document, BuildOutput};
pub use context::BuildContext;
pub use error::BuildError;
pub use options::BuildOptions;

pub use util::sha256_hex;
