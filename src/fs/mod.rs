pub mod session;

pub use session::{FileInfo, FsStats, Session};
