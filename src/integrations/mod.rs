pub mod mailer;
pub mod storage;

pub use mailer::{Attachment, MailError, Mailer, OutgoingEmail};
pub use storage::{Bucket, ObjectStore, StorageError};
