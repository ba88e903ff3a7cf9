pub mod item;
pub mod metadata;
pub mod session;

pub use item::{CrawledItem, FieldStage, ItemMeta};
pub use metadata::{record_field, CrawlMetadata, FieldExtractionStats};
pub use session::{
    derive_session_id, CrawlErrorRecord, CrawlSession, ErrorKind, SessionContent, SessionErrors,
    SessionSnapshot, StopReason,
};
