mod definition;
mod ids;
mod session;

pub use ids::{ParseIdError, SessionKey, TestCode, UserId};

pub use definition::{QuestionSource, TestDefinition, TestDefinitionError, TestSummary, TimeBudget};
pub use session::{
    OptionView, Session, SessionQuestion, SessionStateError, SessionStatus, StoredResult,
    SubmissionResult,
};
