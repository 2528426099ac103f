//! Low-level I/O: byte-order codec helpers and positional file access.

mod byte_order;
mod file;

pub use byte_order::ByteOrder;
pub use file::SharedFile;
