//! Splits the recognizer's stdout into messages.
//!
//! The recognizer writes one JSON document per frame, separated by `\r\n`. Output is read
//! in bounded chunks; every chunk is trimmed and cut on any character of the cut set, and
//! each non-empty piece becomes one message. Text left after the last cut character of a
//! chunk is emitted as a message of its own before the next chunk is read.
//!
//! A multi-byte character cut off at the end of a read is held back and decoded with the
//! next chunk. Invalid UTF-8 is replaced with U+FFFD.

use std::collections::VecDeque;
use std::io;

use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::error::TokenizerError;

pub const DEFAULT_CUTSET: &[char] = &['\r', '\n'];
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2048;

pub struct MessageReader<R> {
    source: R,
    cutset: Vec<char>,
    buffer: Vec<u8>,
    carry: Vec<u8>,
    pending: VecDeque<String>,
    finished: bool,
}

impl<R> MessageReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(source: R) -> Self {
        Self {
            source,
            cutset: DEFAULT_CUTSET.to_vec(),
            buffer: vec![0; DEFAULT_READ_BUFFER_SIZE],
            carry: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    pub fn with_cutset(mut self, cutset: &[char]) -> Self {
        self.cutset = cutset.to_vec();
        self
    }

    /// Size of a single read. A zero size is bumped to one byte.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer = vec![0; size.max(1)];
        self
    }

    /// Return the next message, reading more output when nothing is queued.
    ///
    /// `Ok(None)` means the source closed. A read error is returned once, after which the
    /// reader is finished.
    pub async fn next_message(&mut self) -> Result<Option<String>, TokenizerError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            if self.finished {
                return Ok(None);
            }

            let read = match self.source.read(&mut self.buffer).await {
                Ok(read) => read,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => 0,
                Err(error) => {
                    self.finished = true;
                    return Err(TokenizerError::Read(error));
                }
            };

            if read == 0 {
                debug!("recognizer output closed");
                self.finished = true;
                // a truncated character at the very end is still emitted
                let carry = std::mem::take(&mut self.carry);
                self.split_chunk(&String::from_utf8_lossy(&carry));
                continue;
            }

            let mut bytes = std::mem::take(&mut self.carry);
            bytes.extend_from_slice(&self.buffer[..read]);
            let complete = bytes.len() - incomplete_tail(&bytes);
            self.carry = bytes.split_off(complete);
            self.split_chunk(&String::from_utf8_lossy(&bytes));
        }
    }

    fn split_chunk(&mut self, chunk: &str) {
        let cutset = &self.cutset;
        let mut text = chunk.trim();

        while let Some(index) = text.find(|c: char| cutset.contains(&c)) {
            push_fragment(&mut self.pending, &text[..index]);

            let cut_len = text[index..].chars().next().map_or(1, char::len_utf8);
            text = &text[index + cut_len..];
        }

        push_fragment(&mut self.pending, text);
    }

    /// Expose the reader as a stream of messages. The stream ends when the source closes,
    /// or right after yielding a read error.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, TokenizerError>> {
        futures::stream::unfold(Some(self), |reader| async move {
            let mut reader = reader?;
            match reader.next_message().await {
                Ok(Some(message)) => Some((Ok(message), Some(reader))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
    }
}

/// Number of trailing bytes that start a UTF-8 sequence the chunk does not finish.
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 0,
        };
        return if width > back { back } else { 0 };
    }
    0
}

fn push_fragment(pending: &mut VecDeque<String>, fragment: &str) {
    let fragment = fragment.trim();
    if !fragment.is_empty() {
        pending.push_back(fragment.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_test::io::Builder;

    async fn collect<R: AsyncRead + Unpin>(mut reader: MessageReader<R>) -> Vec<String> {
        let mut messages = Vec::new();
        while let Some(message) = reader.next_message().await.unwrap() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn splits_on_crlf() {
        let source = Builder::new().read(b"{\"a\":1}\r\n{\"b\":2}\r\n").build();

        let messages = collect(MessageReader::new(source)).await;

        assert_eq!(messages, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[tokio::test]
    async fn emits_residual_text_per_chunk() {
        let source = Builder::new()
            .read(b"first\r\nsec")
            .read(b"ond\r\nthird")
            .build();

        let messages = collect(MessageReader::new(source)).await;

        assert_eq!(messages, vec!["first", "sec", "ond", "third"]);
    }

    #[tokio::test]
    async fn trailing_cut_character_emits_nothing_more() {
        let source = Builder::new().read(b"only\n").build();

        let messages = collect(MessageReader::new(source)).await;

        assert_eq!(messages, vec!["only"]);
    }

    #[tokio::test]
    async fn skips_empty_fragments() {
        let source = Builder::new().read(b"  \r\n\r\none\r\r\ntwo  \n").build();

        let messages = collect(MessageReader::new(source)).await;

        assert_eq!(messages, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn custom_cutset() {
        let source = Builder::new().read(b"a;b|c\nd").build();

        let messages = collect(MessageReader::new(source).with_cutset(&[';', '|'])).await;

        assert_eq!(messages, vec!["a", "b", "c\nd"]);
    }

    #[tokio::test]
    async fn buffer_size_bounds_each_read() {
        let source = Builder::new().read(b"abcdef\n").build();

        let messages = collect(MessageReader::new(source).with_buffer_size(4)).await;

        assert_eq!(messages, vec!["abcd", "ef"]);
    }

    #[tokio::test]
    async fn character_split_across_reads() {
        let source = Builder::new()
            .read(&[b'a', 0xC3])
            .read(&[0xA9, b'\n'])
            .build();

        let messages = collect(MessageReader::new(source)).await;

        assert_eq!(messages, vec!["a", "é"]);
    }

    #[tokio::test]
    async fn single_byte_reads_keep_characters_whole() {
        let source = Builder::new().read("€1,5 é\n".as_bytes()).build();

        let messages = collect(MessageReader::new(source).with_buffer_size(1)).await;

        assert_eq!(messages, vec!["€", "1", ",", "5", "é"]);
    }

    #[tokio::test]
    async fn truncated_character_at_end_is_replaced() {
        let source = Builder::new().read(&[b'x', 0xE2, 0x82]).build();

        let messages = collect(MessageReader::new(source)).await;

        assert_eq!(messages, vec!["x", "\u{FFFD}"]);
    }

    #[test]
    fn incomplete_tail_lengths() {
        assert_eq!(incomplete_tail(b"abc"), 0);
        assert_eq!(incomplete_tail("é".as_bytes()), 0);
        assert_eq!(incomplete_tail(&[b'a', 0xC3]), 1);
        assert_eq!(incomplete_tail(&[0xF0, 0x9F, 0x98]), 3);
        assert_eq!(incomplete_tail(&[0x80, 0x80, 0x80]), 0);
    }

    #[tokio::test]
    async fn empty_source_ends_immediately() {
        let source = Builder::new().build();
        let mut reader = MessageReader::new(source);

        assert!(reader.next_message().await.unwrap().is_none());
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_error_is_fatal() {
        let source = Builder::new()
            .read(b"before\n")
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let mut reader = MessageReader::new(source);

        let message = reader.next_message().await.unwrap();
        assert_eq!(message.as_deref(), Some("before"));
        assert!(matches!(
            reader.next_message().await,
            Err(TokenizerError::Read(_))
        ));
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stream_ends_after_error() {
        let source = Builder::new()
            .read(b"one\ntwo\n")
            .read_error(io::Error::new(io::ErrorKind::Other, "boom"))
            .build();

        let items: Vec<_> = MessageReader::new(source).into_stream().collect().await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), "one");
        assert_eq!(items[1].as_ref().unwrap(), "two");
        assert!(items[2].is_err());
    }
}
