mod pool;

pub use pool::Storage;
