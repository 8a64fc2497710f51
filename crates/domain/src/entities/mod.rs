pub mod app_state;
pub mod media_file;
pub mod torrent;

pub use app_state::*;
pub use media_file::*;
pub use torrent::*;
