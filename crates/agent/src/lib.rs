//! The response engine: how huddle decides to speak and what it says.
//!
//! Every inbound event flows through one pipeline:
//!
//! 1. **Route**: keep only posts by others ([`EventRouter`])
//! 2. **Decide**: mention, direct message, or judged active thread ([`DecisionEngine`])
//! 3. **Gather context**: replay the thread as a transcript ([`ContextBuilder`])
//! 4. **Reply**: run the tool-use loop ([`AgentLoop`]), either posting once or
//!    streaming into a placeholder ([`StreamPublisher`])
//!
//! [`ConnectionSupervisor`] keeps the event stream alive and feeds the
//! [`Responder`]; [`Sweeper`] prunes threads that have disappeared.

pub mod decision;
pub mod loop_runner;
pub mod responder;
pub mod router;
pub mod state;
pub mod streaming;
pub mod supervisor;
pub mod sweeper;
pub mod transcript;

#[cfg(test)]
mod test_helpers;

pub use decision::{Decision, DecisionEngine, ResponseReason, heuristic_should_respond};
pub use loop_runner::{AgentLoop, StreamDelta};
pub use responder::{HandleOutcome, Responder};
pub use router::EventRouter;
pub use state::ActiveThreads;
pub use streaming::{StreamOutcome, StreamPublisher};
pub use supervisor::{ConnectionSupervisor, EventSink};
pub use sweeper::{SweepReport, Sweeper};
pub use transcript::ContextBuilder;
