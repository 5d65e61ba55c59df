pub mod error;
pub mod options;
pub mod source;

pub use error::{FatError, FatResult};
pub use options::{LongNamePolicy, ReaderOptions};
pub use source::{BlockSource, FileBlockSource};
