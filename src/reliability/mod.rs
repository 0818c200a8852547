pub mod halt;
pub mod store;
pub mod wal;
