pub mod board;
pub mod device;
pub mod register;
