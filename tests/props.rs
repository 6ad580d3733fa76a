use kernscan::ReverseLineReader;
use proptest::prelude::*;
use std::io::Cursor;

fn reverse(content: &str, buffer_size: usize) -> Vec<String> {
    ReverseLineReader::with_buffer_size(Cursor::new(content.as_bytes()), buffer_size)
        .unwrap()
        .map(|line| line.unwrap().text)
        .collect()
}

/// Lines as they are laid out in the file: split on `\n`, where a final `\n`
/// terminates the last line instead of starting an empty one.
fn file_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    let body = content.strip_suffix('\n').unwrap_or(content);
    body.split('\n').map(str::to_string).collect()
}

fn arb_content() -> impl Strategy<Value = String> {
    // Short alphabet with plenty of newlines and a multi-byte character so
    // empty lines, runs of newlines and split code points all show up.
    proptest::collection::vec(
        prop_oneof![
            4 => Just('a'),
            2 => Just('z'),
            3 => Just('\n'),
            1 => Just('é'),
            1 => Just(' '),
        ],
        0..200,
    )
    .prop_map(|chars| chars.into_iter().collect())
}

// Reversing the reader's output gives back the file's lines, for any buffer size.
proptest! {
    #[test]
    fn prop_round_trip(content in arb_content(), buffer_size in 1usize..64) {
        let mut lines = reverse(&content, buffer_size);
        lines.reverse();
        prop_assert_eq!(lines, file_lines(&content));
    }
}

// The buffer size never changes what is read.
proptest! {
    #[test]
    fn prop_buffer_size_independence(
        content in arb_content(),
        a in 1usize..300,
        b in 1usize..300,
    ) {
        prop_assert_eq!(reverse(&content, a), reverse(&content, b));
    }
}

// Round trip at the extremes: one byte at a time and the whole file at once.
proptest! {
    #[test]
    fn prop_round_trip_extreme_buffers(content in arb_content()) {
        let expected = file_lines(&content);
        for buffer_size in [1, content.len().max(1)] {
            let mut lines = reverse(&content, buffer_size);
            lines.reverse();
            prop_assert_eq!(&lines, &expected);
        }
    }
}
