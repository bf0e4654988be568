pub mod bow;
pub mod broadcast_once;
pub mod duration;

pub use bow::OwnedOrBorrowed;
pub use broadcast_once::BroadcastOnce;
