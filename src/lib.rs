//! agentrun: run conversational agents end to end.
//!
//! A request flows through the [`provider::ChatClientFactory`] (which wraps
//! the provider client in the configured middleware), the
//! [`permissions`] resolver, [`context`] resolution and the
//! [`agent::AgentFactory`]; the [`protocol::StreamingService`] then streams
//! the run as AG-UI events, which [`protocol::RunDecoder`] consumes on the
//! client side.
//!
//! ```no_run
//! use agentrun::protocol::{ProtocolMessage, RunDecoder, RunRequest, StreamingService};
//! # async fn example(agent: agentrun::agent::RunnableAgent) -> agentrun::error::Result<()> {
//! use futures::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! let request = RunRequest::new(vec![ProtocolMessage::user("Summarize this page")]);
//! let cancel = CancellationToken::new();
//! let events = StreamingService::stream(agent, request, cancel.clone()).map(Ok);
//! let mut decoder = RunDecoder::new();
//! let outcome = decoder.consume(Box::pin(events), cancel).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod hooks;
pub mod middleware;
pub mod permissions;
pub mod protocol;
pub mod provider;
pub mod service;
pub mod tools;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;
