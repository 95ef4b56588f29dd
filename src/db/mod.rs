pub mod dbcolab;
pub mod memcolab;
pub mod util;
