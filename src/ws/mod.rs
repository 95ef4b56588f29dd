pub mod awareness;
pub mod connctx;
pub mod registry;
pub mod room;
pub mod shareddoc;
pub mod userctx;
