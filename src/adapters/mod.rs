//! Audio source adapters (LMS CLI)

pub mod lms;
