//! The AG-UI streaming protocol: event types, line codec, the server-side
//! emitter and streaming service, and the client-side run decoder.

pub mod buffers;
pub mod codec;
pub mod convert;
pub mod decoder;
pub mod emitter;
pub mod events;
pub mod resume;
pub mod streaming;

pub use buffers::ToolCallBuffers;
pub use codec::{decode_line, encode_line, encode_sse, EventLineCodec};
pub use decoder::{
    DecodedToolCall, DecoderObserver, NoopObserver, RunDecoder, RunEnd, RunStatus, ToolCallStatus,
};
pub use emitter::{EventEmitter, TOOL_EXECUTION_REASON};
pub use events::{
    AguiEvent, AguiEventPayload, InputConfig, InterruptInfo, InterruptKind, InterruptOption,
    ProtocolMessage, ProtocolRole, ProtocolToolCall, ResumeInfo, RunOutcome, RunRequest,
};
pub use resume::{resume_request, resume_with_tool_results, tool_results_from_resume};
pub use streaming::{RunHandle, StreamingService};
