pub mod health;
pub mod diagnostics;
pub mod doc_snapshot;

pub use health::*;
pub use diagnostics::*;
pub use doc_snapshot::*;
