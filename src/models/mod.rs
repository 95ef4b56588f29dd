pub mod health;
pub mod diagnostics;
pub mod doc_snapshot;
pub mod error;
pub mod identity;
pub mod lorodoc;
pub mod messages;
pub mod snapshot;

pub use health::*;
pub use diagnostics::*;
pub use doc_snapshot::*;
pub use error::*;
pub use identity::*;
pub use messages::*;
pub use snapshot::*;
