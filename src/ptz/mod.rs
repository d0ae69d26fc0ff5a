pub mod autotrack;
pub mod device;
pub mod patrol;
