//! Client-side decoding of complete and broken event streams.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use agentrun::error::{AgentRunError, Result};
use agentrun::protocol::{
    encode_sse, AguiEvent, AguiEventPayload, DecodedToolCall, DecoderObserver, EventLineCodec,
    ProtocolRole, RunDecoder, RunEnd, RunStatus, ToolCallStatus,
};

fn lines(raw: &[&str]) -> futures::stream::Iter<std::vec::IntoIter<String>> {
    futures::stream::iter(raw.iter().map(|l| l.to_string()).collect::<Vec<_>>())
}

#[tokio::test]
async fn full_stream_builds_the_transcript() {
    let stream = lines(&[
        r#"{"type":"RUN_STARTED","threadId":"t1","runId":"r1"}"#,
        "",
        r#"{"type":"TEXT_MESSAGE_START","messageId":"m1","role":"assistant"}"#,
        r#"{"type":"TEXT_MESSAGE_CONTENT","messageId":"m1","delta":"Let me "}"#,
        r#"{"type":"TEXT_MESSAGE_CONTENT","messageId":"m1","delta":"check."}"#,
        r#"{"type":"TEXT_MESSAGE_END","messageId":"m1"}"#,
        r#"{"type":"TOOL_CALL_START","toolCallId":"c1","toolCallName":"search","parentMessageId":"m1"}"#,
        r#"{"type":"TOOL_CALL_ARGS","toolCallId":"c1","delta":"{\"q\":"}"#,
        r#"{"type":"TOOL_CALL_ARGS","toolCallId":"c1","delta":"\"rust\"}"}"#,
        r#"{"type":"TOOL_CALL_END","toolCallId":"c1"}"#,
        r#"{"type":"TOOL_CALL_RESULT","toolCallId":"c1","content":"3 hits"}"#,
        "data: not json",
        r#"data: {"type":"STATE_SNAPSHOT","state":{"step":1}}"#,
        r#"{"type":"STATE_DELTA","delta":[{"op":"replace","path":"/step","value":2}]}"#,
        r#"{"type":"RUN_FINISHED","threadId":"t1","runId":"r1","outcome":"success"}"#,
        r#"{"type":"TEXT_MESSAGE_START","messageId":"late","role":"assistant"}"#,
    ]);

    let mut decoder = RunDecoder::new();
    let end = decoder.consume_lines(stream, CancellationToken::new()).await.unwrap();
    assert_eq!(end, RunEnd::Success);
    assert_eq!(decoder.status(), RunStatus::Succeeded);
    assert_eq!(decoder.thread_id(), Some("t1"));
    assert_eq!(decoder.state(), &json!({"step": 2}));

    let transcript = decoder.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].id, "m1");
    assert_eq!(transcript[0].content, "Let me check.");
    assert_eq!(transcript[0].tool_calls.len(), 1);
    assert_eq!(transcript[0].tool_calls[0].function.arguments, r#"{"q":"rust"}"#);
    assert_eq!(transcript[1].role, ProtocolRole::Tool);
    assert_eq!(transcript[1].content, "3 hits");

    let call = decoder.tool_call("c1").unwrap();
    assert_eq!(call.status, ToolCallStatus::Complete);
    assert_eq!(call.parsed_arguments(), Some(json!({"q": "rust"})));
    assert!(decoder.pending_tool_calls().is_empty());
}

#[tokio::test]
async fn stream_ending_early_is_a_transport_failure() {
    let stream = lines(&[
        r#"{"type":"RUN_STARTED","threadId":"t1","runId":"r1"}"#,
        r#"{"type":"TOOL_CALL_START","toolCallId":"c1","toolCallName":"search"}"#,
        r#"{"type":"TOOL_CALL_ARGS","toolCallId":"c1","delta":"{\"q\""}"#,
    ]);

    let mut decoder = RunDecoder::new();
    let err = decoder.consume_lines(stream, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, AgentRunError::Transport(_)), "{err}");
    assert_eq!(decoder.status(), RunStatus::Failed);
    assert!(decoder.tool_call("c1").is_none());
    assert!(decoder.transcript().is_empty());
}

#[tokio::test]
async fn cancelling_mid_tool_call_discards_the_call() {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<AguiEvent>>(8);
    for payload in [
        AguiEventPayload::RunStarted {
            thread_id: "t1".into(),
            run_id: "r1".into(),
        },
        AguiEventPayload::ToolCallStart {
            tool_call_id: "c1".into(),
            tool_call_name: "search".into(),
            parent_message_id: None,
        },
        AguiEventPayload::ToolCallArgs {
            tool_call_id: "c1".into(),
            delta: "{\"q\":".into(),
        },
    ] {
        tx.send(Ok(AguiEvent::untimed(payload))).await.unwrap();
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let mut decoder = RunDecoder::new();
    let err = decoder.consume(ReceiverStream::new(rx), cancel).await.unwrap_err();
    assert!(matches!(err, AgentRunError::Transport(_)));
    assert_eq!(decoder.status(), RunStatus::Failed);
    assert!(decoder.tool_calls().is_empty());
    match decoder.end() {
        Some(RunEnd::Error { message }) => assert!(message.contains("cancelled")),
        other => panic!("unexpected {other:?}"),
    }
    drop(tx);
}

#[tokio::test]
async fn transport_errors_fail_but_decode_errors_are_skipped() {
    let events: Vec<Result<AguiEvent>> = vec![
        Ok(AguiEvent::untimed(AguiEventPayload::RunStarted {
            thread_id: "t1".into(),
            run_id: "r1".into(),
        })),
        Err(AgentRunError::ProtocolDecode("garbled".into())),
        Err(AgentRunError::Transport("connection reset".into())),
    ];
    let mut decoder = RunDecoder::new();
    let err = decoder
        .consume(futures::stream::iter(events), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("connection reset"));
    assert_eq!(decoder.status(), RunStatus::Failed);
}

#[derive(Default)]
struct Recorder {
    log: Vec<String>,
}

impl DecoderObserver for Recorder {
    fn on_status(&mut self, status: RunStatus) {
        self.log.push(format!("status:{status}"));
    }

    fn on_text_delta(&mut self, _message_id: &str, delta: &str) {
        self.log.push(format!("text:{delta}"));
    }

    fn on_tool_call_start(&mut self, call: &DecodedToolCall) {
        self.log.push(format!("start:{}", call.name));
    }

    fn on_tool_call_end(&mut self, call: &DecodedToolCall) {
        self.log.push(format!("call:{}", call.name));
    }

    fn on_tool_call_result(&mut self, call: &DecodedToolCall) {
        self.log.push(format!("result:{}", call.result.as_deref().unwrap_or_default()));
    }

    fn on_custom_event(&mut self, name: &str, value: &serde_json::Value) {
        self.log.push(format!("custom:{name}:{value}"));
    }

    fn on_run_error(&mut self, message: &str, code: Option<&str>) {
        self.log.push(format!("error:{}:{message}", code.unwrap_or("-")));
    }

    fn on_run_finished(&mut self, end: &RunEnd) {
        let label = match end {
            RunEnd::Success => "success".to_string(),
            RunEnd::Error { message } => format!("error {message}"),
            RunEnd::Interrupt(interrupt) => format!("interrupt {}", interrupt.id),
        };
        self.log.push(format!("end:{label}"));
    }
}

#[test]
fn observer_sees_every_transition() {
    let mut decoder = RunDecoder::with_observer(Recorder::default());
    let raw = concat!(
        r#"{"type":"RUN_STARTED","threadId":"t1","runId":"r1"}"#, "\n",
        r#"{"type":"TEXT_MESSAGE_CONTENT","messageId":"m1","delta":"Hi"}"#, "\n",
        r#"{"type":"TOOL_CALL_START","toolCallId":"f1","toolCallName":"confirm"}"#, "\n",
        r#"{"type":"TOOL_CALL_END","toolCallId":"f1"}"#, "\n",
        r#"{"type":"RUN_ERROR","message":"quota low","code":"WARN"}"#, "\n",
        r#"{"type":"RUN_FINISHED","threadId":"t1","runId":"r1","outcome":"interrupt","interrupt":{"id":"i1","reason":"tool_execution"}}"#, "\n",
    );
    let mut codec = EventLineCodec::new();
    for event in codec.feed(raw) {
        decoder.apply(event.unwrap());
    }
    assert!(codec.finish().is_none());

    assert_eq!(decoder.status(), RunStatus::AwaitingToolExecution);
    let log = decoder.into_observer().log;
    assert_eq!(
        log,
        vec![
            "status:running",
            "status:streaming_text",
            "text:Hi",
            "start:confirm",
            "call:confirm",
            "error:WARN:quota low",
            "end:interrupt i1",
            "status:awaiting_tool_execution",
        ]
    );
}

#[test]
fn sse_framing_decodes_back() {
    let event = AguiEvent::untimed(AguiEventPayload::TextMessageEnd {
        message_id: "m1".into(),
    });
    let framed = encode_sse(&event).unwrap();
    assert!(framed.starts_with("data: "));
    assert!(framed.ends_with("\n\n"));

    let mut codec = EventLineCodec::new();
    let mut decoded = codec.feed(&framed[..10]);
    decoded.extend(codec.feed(&framed[10..]));
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded.pop().unwrap().unwrap(), event);
}

#[test]
fn reset_returns_to_idle() {
    let mut decoder = RunDecoder::new();
    decoder.apply(AguiEvent::untimed(AguiEventPayload::RunFinished {
        thread_id: "t".into(),
        run_id: "r".into(),
        outcome: agentrun::protocol::RunOutcome::Error,
        error: None,
        interrupt: None,
    }));
    assert_eq!(
        decoder.end(),
        Some(&RunEnd::Error {
            message: "Unknown error".into()
        })
    );
    decoder.reset();
    assert_eq!(decoder.status(), RunStatus::Idle);
    assert!(decoder.end().is_none());
}

fn feed(decoder: &mut RunDecoder<Recorder>, raw: &[&str]) {
    for line in raw {
        if let Some(event) = agentrun::protocol::decode_line(line).unwrap() {
            decoder.apply(event);
        }
    }
}

#[test]
fn unknown_tool_call_ids_are_ignored() {
    let mut decoder = RunDecoder::with_observer(Recorder::default());
    feed(
        &mut decoder,
        &[
            r#"{"type":"RUN_STARTED","threadId":"t1","runId":"r1"}"#,
            r#"{"type":"TOOL_CALL_ARGS","toolCallId":"ghost","delta":"{}"}"#,
            r#"{"type":"TOOL_CALL_END","toolCallId":"ghost"}"#,
            r#"{"type":"TOOL_CALL_RESULT","toolCallId":"ghost","content":"boo"}"#,
        ],
    );
    assert_eq!(decoder.status(), RunStatus::Running);
    assert!(decoder.tool_calls().is_empty());
    assert!(decoder.transcript().is_empty());
    assert_eq!(decoder.into_observer().log, vec!["status:running"]);
}

#[test]
fn redelivered_tool_call_keeps_its_arguments() {
    let mut decoder = RunDecoder::with_observer(Recorder::default());
    feed(
        &mut decoder,
        &[
            r#"{"type":"RUN_STARTED","threadId":"t1","runId":"r1"}"#,
            r#"{"type":"TOOL_CALL_START","toolCallId":"c1","toolCallName":"search"}"#,
            r#"{"type":"TOOL_CALL_START","toolCallId":"c1","toolCallName":"search"}"#,
            r#"{"type":"TOOL_CALL_ARGS","toolCallId":"c1","delta":"{\"a\":1}"}"#,
            r#"{"type":"TOOL_CALL_END","toolCallId":"c1"}"#,
            r#"{"type":"TOOL_CALL_START","toolCallId":"c1","toolCallName":"search"}"#,
            r#"{"type":"TOOL_CALL_ARGS","toolCallId":"c1","delta":"GARBAGE"}"#,
            r#"{"type":"TOOL_CALL_END","toolCallId":"c1"}"#,
        ],
    );
    assert_eq!(decoder.tool_calls().len(), 1);
    assert_eq!(decoder.tool_call("c1").unwrap().arguments, r#"{"a":1}"#);
    let wire_calls: usize = decoder.transcript().iter().map(|m| m.tool_calls.len()).sum();
    assert_eq!(wire_calls, 1);

    let log = decoder.into_observer().log;
    assert_eq!(log.iter().filter(|l| l.as_str() == "start:search").count(), 1);
    assert_eq!(log.iter().filter(|l| l.as_str() == "call:search").count(), 1);
}

#[test]
fn results_attach_only_to_finished_calls() {
    let mut decoder = RunDecoder::with_observer(Recorder::default());
    feed(
        &mut decoder,
        &[
            r#"{"type":"RUN_STARTED","threadId":"t1","runId":"r1"}"#,
            r#"{"type":"TOOL_CALL_START","toolCallId":"c1","toolCallName":"search"}"#,
            r#"{"type":"TOOL_CALL_RESULT","toolCallId":"c1","content":"early"}"#,
            r#"{"type":"TOOL_CALL_END","toolCallId":"c1"}"#,
        ],
    );
    assert_eq!(decoder.tool_call("c1").unwrap().result, None);
    let roles: Vec<ProtocolRole> = decoder.transcript().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![ProtocolRole::Assistant]);

    feed(&mut decoder, &[r#"{"type":"TOOL_CALL_RESULT","toolCallId":"c1","content":"late"}"#]);
    assert_eq!(decoder.tool_call("c1").unwrap().result.as_deref(), Some("late"));
    let roles: Vec<ProtocolRole> = decoder.transcript().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![ProtocolRole::Assistant, ProtocolRole::Tool]);
    assert!(!decoder.into_observer().log.contains(&"result:early".to_string()));
}

#[test]
fn custom_events_reach_the_observer() {
    let mut decoder = RunDecoder::with_observer(Recorder::default());
    feed(
        &mut decoder,
        &[
            r#"{"type":"RUN_STARTED","threadId":"t1","runId":"r1"}"#,
            r#"{"type":"CUSTOM","name":"navigate","value":{"path":"/content/1"}}"#,
        ],
    );
    assert_eq!(decoder.status(), RunStatus::Running);
    assert_eq!(
        decoder.into_observer().log,
        vec!["status:running", r#"custom:navigate:{"path":"/content/1"}"#]
    );
}
