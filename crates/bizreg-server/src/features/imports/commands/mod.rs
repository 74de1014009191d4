pub mod commit;
pub mod validate;

pub use commit::{CommitImportCommand, StartedImport};
pub use validate::ValidateImportCommand;
