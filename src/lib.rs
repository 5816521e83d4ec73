pub mod backend;
pub mod config;

pub use backend::buffers::ImageBuffers;
pub use backend::error::{LibraryError, ReaderError};
pub use backend::loader::{ChapterLoader, ChapterView, ImageRef, LoadedChapter};
pub use backend::provider::{Adjacent, ContentProvider};
pub use backend::window::{NavigationWindow, ReaderSession, Slot, SlotPosition, SlotStatus};
pub use config::Config;
