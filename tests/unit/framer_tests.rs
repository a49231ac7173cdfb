//! Unit tests for the NDJSON line framer.
//!
//! Covers:
//! - complete lines in one chunk
//! - partial lines buffered across chunk boundaries
//! - whitespace-only lines skipped
//! - malformed JSON rejected by `parse_line` without disturbing framing
//! - oversized lines skipped with resynchronisation at the next newline
//! - EOF flush of an unterminated final line

use mcp_http_bridge::peer::framer::{parse_line, LineFramer};
use mcp_http_bridge::AppError;
use serde_json::json;

fn collect_ok(framer: &mut LineFramer, chunk: &[u8]) -> Vec<String> {
    framer
        .feed(chunk)
        .map(|line| line.expect("framing must succeed"))
        .collect()
}

#[test]
fn single_complete_line_is_yielded_without_newline() {
    let mut framer = LineFramer::new();
    let lines = collect_ok(&mut framer, b"{\"id\":1}\n");
    assert_eq!(lines, vec!["{\"id\":1}".to_owned()]);
    assert_eq!(framer.buffered(), 0);
}

#[test]
fn line_split_across_two_chunks_yields_exactly_two_documents() {
    let mut framer = LineFramer::new();

    let first = collect_ok(&mut framer, b"{\"id\":1}\n{\"id\":2");
    assert_eq!(first.len(), 1, "only the complete line is yielded");

    let second = collect_ok(&mut framer, b"}\n");
    assert_eq!(second.len(), 1, "the remainder completes one more line");

    let docs: Vec<_> = first
        .iter()
        .chain(second.iter())
        .map(|line| parse_line(line).expect("valid json"))
        .collect();
    assert_eq!(docs, vec![json!({"id": 1}), json!({"id": 2})]);
}

#[test]
fn partial_line_stays_buffered_until_newline() {
    let mut framer = LineFramer::new();
    assert!(collect_ok(&mut framer, b"{\"id\":").is_empty());
    assert!(framer.buffered() > 0);
    assert!(collect_ok(&mut framer, b"7").is_empty());
    assert_eq!(collect_ok(&mut framer, b"}\n"), vec!["{\"id\":7}".to_owned()]);
}

#[test]
fn whitespace_only_lines_are_discarded() {
    let mut framer = LineFramer::new();
    let lines = collect_ok(&mut framer, b"\n   \n\t\n{\"id\":3}\n\n");
    assert_eq!(lines, vec!["{\"id\":3}".to_owned()]);
}

#[test]
fn carriage_return_is_stripped() {
    let mut framer = LineFramer::new();
    let lines = collect_ok(&mut framer, b"{\"id\":4}\r\n");
    assert_eq!(lines, vec!["{\"id\":4}".to_owned()]);
}

#[test]
fn unconsumed_lines_are_yielded_by_the_next_feed() {
    let mut framer = LineFramer::new();
    {
        let mut lines = framer.feed(b"{\"id\":1}\n{\"id\":2}\n");
        assert_eq!(lines.next().unwrap().unwrap(), "{\"id\":1}");
    }
    let rest = collect_ok(&mut framer, b"");
    assert_eq!(rest, vec!["{\"id\":2}".to_owned()]);
}

#[test]
fn malformed_line_does_not_desynchronise_following_lines() {
    let mut framer = LineFramer::new();
    let lines = collect_ok(&mut framer, b"not-json\n{\"id\":5}\n");
    assert_eq!(lines.len(), 2);

    let err = parse_line(&lines[0]).expect_err("first line is not json");
    assert!(matches!(err, AppError::Codec(ref msg) if msg.starts_with("malformed json")));
    assert_eq!(parse_line(&lines[1]).unwrap(), json!({"id": 5}));
}

#[test]
fn oversized_line_is_reported_and_framing_recovers() {
    let mut framer = LineFramer::with_max_length(16);
    let mut chunk = vec![b'x'; 64];
    chunk.extend_from_slice(b"\n{\"id\":6}\n");

    let items: Vec<_> = framer.feed(&chunk).collect();
    assert!(
        matches!(items.first(), Some(Err(AppError::Codec(msg))) if msg == "line too long"),
        "first item must be the length error, got {items:?}"
    );
    let good: Vec<_> = items.into_iter().filter_map(Result::ok).collect();
    assert_eq!(good, vec!["{\"id\":6}".to_owned()]);
}

#[test]
fn invalid_utf8_line_is_reported_and_skipped() {
    let mut framer = LineFramer::new();
    let items: Vec<_> = framer.feed(b"\xff\xfe\n{\"id\":8}\n").collect();
    assert!(matches!(items.first(), Some(Err(AppError::Codec(_)))));
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].as_deref().unwrap(), "{\"id\":8}");
}

#[test]
fn finish_flushes_unterminated_final_line() {
    let mut framer = LineFramer::new();
    assert!(collect_ok(&mut framer, b"{\"id\":9}").is_empty());
    let flushed: Vec<_> = framer.finish().map(Result::unwrap).collect();
    assert_eq!(flushed, vec!["{\"id\":9}".to_owned()]);
    assert_eq!(framer.buffered(), 0);
}

#[test]
fn finish_on_empty_buffer_yields_nothing() {
    let mut framer = LineFramer::new();
    assert_eq!(framer.finish().count(), 0);
}
