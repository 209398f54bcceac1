//! Services module
//!
//! Business logic that sits between the HTTP layer and the stores.

pub mod content;
pub mod email;
pub mod library;
pub mod sync;

pub use content::{Azkar, ContentClient, Dua, DuaCategory, DuaSummary, Language, Zikr};
pub use email::{EmailResult, EmailService};
pub use library::{LibraryEvent, LibraryProvider};
pub use sync::{SyncOutcome, SyncReconciler, SyncReport};
