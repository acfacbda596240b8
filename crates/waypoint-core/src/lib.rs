pub mod identity;
pub mod net;
pub mod player;
pub mod time;
