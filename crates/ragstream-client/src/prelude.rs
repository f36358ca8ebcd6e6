//! Common imports for typical client usage.
pub use crate::{
    ClientConfig, Message, Notice, Notifier, QueryError, QueryFailure, QueryOptions,
    QueryOutcome, Stage, StepStatus, StreamObserver, StreamSnapshot, StreamingQueryClient,
};
