use std::io;

use protocol::{OutputChunk, StreamKind};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;

const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Reads `reader` one line at a time and forwards each line, newline
/// included, as a chunk tagged `stream`. Returns when the pipe hits EOF or the
/// receiving side is gone.
///
/// Lines longer than the cap go out in pieces. A piece never ends inside a
/// UTF-8 sequence: the incomplete bytes are carried into the next piece.
pub(super) async fn forward_lines<R: AsyncRead + Unpin>(
    reader: R,
    stream: StreamKind,
    tx: mpsc::Sender<OutputChunk>,
) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        let carried = line.len() as u64;
        let n = (&mut reader)
            .take(MAX_LINE_BYTES - carried)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            if !line.is_empty() {
                let _ = send_piece(&tx, stream, &line).await;
            }
            break;
        }
        let keep = if line.ends_with(b"\n") {
            line.len()
        } else {
            complete_utf8_len(&line)
        };
        if keep == 0 {
            continue;
        }
        let rest = line.split_off(keep);
        if !send_piece(&tx, stream, &line).await {
            break;
        }
        line = rest;
    }
    Ok(())
}

async fn send_piece(tx: &mpsc::Sender<OutputChunk>, stream: StreamKind, bytes: &[u8]) -> bool {
    let chunk = OutputChunk {
        stream,
        text: String::from_utf8_lossy(bytes).into_owned(),
    };
    tx.send(chunk).await.is_ok()
}

/// Length of `bytes` without a trailing incomplete UTF-8 sequence. Invalid
/// bytes in the middle are left for lossy decoding.
fn complete_utf8_len(bytes: &[u8]) -> usize {
    let mut start = 0;
    loop {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(_) => return bytes.len(),
            Err(err) => match err.error_len() {
                Some(len) => start += err.valid_up_to() + len,
                None => return start + err.valid_up_to(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &[u8]) -> Vec<OutputChunk> {
        let (tx, mut rx) = mpsc::channel(16);
        forward_lines(input, StreamKind::Stderr, tx)
            .await
            .expect("forward");
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn splits_on_newline_and_keeps_partial_tail() {
        let chunks = collect(b"first\nsecond\ntail").await;
        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["first\n", "second\n", "tail"]);
        assert!(chunks
            .iter()
            .all(|chunk| chunk.stream == StreamKind::Stderr));
    }

    #[tokio::test]
    async fn long_line_split_keeps_multibyte_chars_whole() {
        let mut input = "a".repeat(MAX_LINE_BYTES as usize - 1);
        input.push_str("é\n");
        let chunks = collect(input.as_bytes()).await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|chunk| !chunk.text.contains('\u{FFFD}')));
        assert_eq!(chunks[1].text, "é\n");
        let joined: String = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        assert_eq!(joined, input);
    }

    #[tokio::test]
    async fn truncated_sequence_at_eof_is_still_emitted() {
        let chunks = collect(b"ok\n\xc3").await;
        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["ok\n", "\u{FFFD}"]);
    }

    #[test]
    fn complete_utf8_len_holds_back_only_a_trailing_partial() {
        assert_eq!(complete_utf8_len(b"abc"), 3);
        assert_eq!(complete_utf8_len(b"ab\xc3"), 2);
        assert_eq!(complete_utf8_len(b"a\xffb\xe2\x82"), 3);
        assert_eq!(complete_utf8_len("é".as_bytes()), 2);
    }

    #[tokio::test]
    async fn stops_when_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        forward_lines(&b"a\nb\n"[..], StreamKind::Stdout, tx)
            .await
            .expect("forward");
    }
}
