pub mod conversation;
pub mod envelope;
pub mod tabular;

pub use conversation::{
    ConversationLog, ConversationTurn, FailureClass, GREETING, ResultBundle, Role, TurnOutcome,
};
pub use envelope::{
    ENVELOPE_SCHEMA_VERSION, EnvelopeCommandFailure, EnvelopeNotice, ResponseEnvelope,
};
pub use tabular::TabularResult;
