pub mod fences;
pub mod redaction;
