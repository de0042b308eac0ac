//! Trip request form: field state, validation and the dispatch message.

pub mod engine;
pub mod message;
pub mod validation;

pub use self::engine::{FormMode, TripFormEngine};
pub use self::message::{dispatch_url, generate_message};
pub use self::validation::{validate, FormField, ValidationErrors, ValidationPolicy};
