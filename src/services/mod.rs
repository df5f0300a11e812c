pub mod chunk;
pub mod cursor;
pub mod persistence;
