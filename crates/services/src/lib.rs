#![forbid(unsafe_code)]

pub mod config;
pub mod engine;
pub mod error;
pub mod host_channel;
pub mod quiz_api;
pub mod result_reporter;
pub mod scheduler;
pub mod sessions;
pub mod test_loader;

pub use quiz_core::Clock;

pub use config::EngineConfig;
pub use engine::QuizEngine;
pub use error::{ApiError, ClockError, ConfigError, LoadError, SessionError, SubmitError};
pub use host_channel::{HostChannel, HostMessage, JsonLinesHost, MemoryHost};
pub use quiz_api::{HttpQuizApi, QuizApi};
pub use result_reporter::{DeliveryMode, ResultReporter, SubmissionReceipt};
pub use scheduler::{ManualScheduler, Scheduler, TaskHandle, TokioScheduler};
pub use test_loader::TestLoader;

pub use sessions::{
    AnswerShuffler, ClockStart, ClockState, ClockTicket, Opened, SessionClock, SessionController,
};
