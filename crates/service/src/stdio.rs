//! JSON-lines transport over standard input and output.
//!
//! Each input line is one `InboundEvent`; each dispatched command is written
//! as one `PaymentCommand` line.

use async_trait::async_trait;
use chrono::Utc;
use domain::{DomainCommand, InboundEvent, PaymentCommand};
use futures_util::stream;
use saga::{CommandAck, CommandDispatcher, EventStream, SagaError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;

/// Parses one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> saga::Result<Option<InboundEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

/// Turns a line reader into an event stream.
///
/// Malformed lines are yielded as errors and reading continues; a read error
/// is yielded once and ends the stream.
pub fn event_stream<R>(reader: R) -> EventStream
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    Box::pin(stream::unfold(Some(reader.lines()), next_event))
}

/// Event stream over the process's standard input.
pub fn stdin_events() -> EventStream {
    event_stream(BufReader::new(tokio::io::stdin()))
}

async fn next_event<R>(
    lines: Option<Lines<R>>,
) -> Option<(saga::Result<InboundEvent>, Option<Lines<R>>)>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = lines?;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_line(&line) {
                Ok(Some(event)) => return Some((Ok(event), Some(lines))),
                Ok(None) => continue,
                Err(err) => return Some((Err(err), Some(lines))),
            },
            Ok(None) => return None,
            Err(err) => return Some((Err(SagaError::Source(err.to_string())), None)),
        }
    }
}

/// Writes commands as JSON lines.
pub struct JsonLinesDispatcher<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesDispatcher<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a dispatcher writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// Dispatcher writing to the process's standard output.
pub type StdoutCommandDispatcher = JsonLinesDispatcher<tokio::io::Stdout>;

impl StdoutCommandDispatcher {
    /// Creates a dispatcher writing to standard output.
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> CommandDispatcher for JsonLinesDispatcher<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn dispatch(&self, command: &PaymentCommand) -> saga::Result<CommandAck> {
        let command_type = command.command_type();
        let mut line = serde_json::to_vec(command)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;
        written.map_err(|err| SagaError::Dispatch {
            command: command_type,
            reason: err.to_string(),
        })?;

        Ok(CommandAck {
            command_id: command.command_id(),
            accepted_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CorrelationKey, SagaId};
    use domain::{AuthorizationId, CommandId, PaymentEvent, VoidAuthorizationData};
    use futures_util::StreamExt;

    #[test]
    fn test_parse_line() {
        let event = InboundEvent::new("pay-1", PaymentEvent::authorization_approved("AUTH-1"));
        let line = serde_json::to_string(&event).unwrap();

        assert_eq!(parse_line(&line).unwrap(), Some(event));
        assert_eq!(parse_line("   ").unwrap(), None);
        assert!(parse_line("{not json").is_err());
    }

    #[tokio::test]
    async fn test_event_stream_skips_blank_and_reports_bad_lines() {
        let event = InboundEvent::new("pay-1", PaymentEvent::processing_failed("boom"));
        let input = format!("\n{}\ngarbage\n", serde_json::to_string(&event).unwrap());

        let items: Vec<_> = event_stream(std::io::Cursor::new(input.into_bytes()))
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &event);
        assert!(matches!(items[1], Err(SagaError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_dispatcher_writes_one_line_per_command() {
        let dispatcher = JsonLinesDispatcher::new(Vec::new());
        let command = PaymentCommand::VoidAuthorization(VoidAuthorizationData {
            command_id: CommandId::for_step(SagaId::new(), "void_authorization"),
            correlation_key: CorrelationKey::new("pay-1"),
            authorization_id: AuthorizationId::new("AUTH-1"),
            reason: "deadline elapsed".to_string(),
        });

        let ack = dispatcher.dispatch(&command).await.unwrap();
        dispatcher.dispatch(&command).await.unwrap();
        assert_eq!(ack.command_id, command.command_id());

        let output = String::from_utf8(dispatcher.into_inner()).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: PaymentCommand = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, command);
        assert!(lines[0].contains(r#""type":"VoidAuthorization""#));
    }
}
