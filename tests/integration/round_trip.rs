#![allow(missing_docs)]

use std::fs;

use pagebuf::{BufferOptions, EvictionPolicy, PrefetchStrategy, Result, VirtualBuffer};
use proptest::prelude::*;
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum Edit {
    Set { line: usize, text: String },
    Insert { line: usize, text: String },
    Append { text: String },
    Delete { line: usize },
    DeleteRange { line: usize, count: usize },
    InsertChar { line: usize, col: usize, ch: char },
    InsertString { line: usize, col: usize, parts: Vec<String>, sep: &'static str },
    Split { line: usize, col: usize },
    Join { line: usize },
}

fn arb_text() -> impl Strategy<Value = String> {
    "[a-zé ]{0,12}"
}

fn arb_char() -> impl Strategy<Value = char> {
    prop_oneof![
        8 => prop::char::range('a', 'z'),
        1 => Just('\n'),
        1 => Just('\r'),
    ]
}

fn arb_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (any::<usize>(), arb_text()).prop_map(|(line, text)| Edit::Set { line, text }),
        (any::<usize>(), arb_text()).prop_map(|(line, text)| Edit::Insert { line, text }),
        arb_text().prop_map(|text| Edit::Append { text }),
        any::<usize>().prop_map(|line| Edit::Delete { line }),
        (any::<usize>(), 0usize..30).prop_map(|(line, count)| Edit::DeleteRange { line, count }),
        (any::<usize>(), 0usize..16, arb_char())
            .prop_map(|(line, col, ch)| Edit::InsertChar { line, col, ch }),
        (
            any::<usize>(),
            0usize..16,
            prop::collection::vec(arb_text(), 1..4),
            prop::sample::select(vec!["\n", "\r\n", "\r"]),
        )
            .prop_map(|(line, col, parts, sep)| Edit::InsertString { line, col, parts, sep }),
        (any::<usize>(), 0usize..16).prop_map(|(line, col)| Edit::Split { line, col }),
        any::<usize>().prop_map(|line| Edit::Join { line }),
    ]
}

fn byte_at(s: &str, col: usize) -> usize {
    s.char_indices().nth(col).map_or(s.len(), |(at, _)| at)
}

/// Applies `edit` to both the buffer and a plain vector of lines.
fn apply(buf: &mut VirtualBuffer, model: &mut Vec<String>, edit: Edit) -> Result<()> {
    let len = model.len();
    match edit {
        Edit::Set { line, text } => {
            let line = line % len;
            buf.set_line(line, text.clone())?;
            model[line] = text;
        }
        Edit::Insert { line, text } => {
            let line = line % (len + 1);
            buf.insert_line(line, text.clone())?;
            model.insert(line, text);
        }
        Edit::Append { text } => {
            buf.add_line(text.clone())?;
            model.push(text);
        }
        Edit::Delete { line } => {
            let line = line % len;
            buf.delete_line(line)?;
            if len == 1 {
                model[0].clear();
            } else {
                model.remove(line);
            }
        }
        Edit::DeleteRange { line, count } => {
            let start = line % len;
            let end = start + count;
            buf.delete_lines(start, end)?;
            model.drain(start..end.min(len));
            if model.is_empty() {
                model.push(String::new());
            }
        }
        Edit::InsertChar { line, col, ch } => {
            let line = line % len;
            buf.insert_char(line, col, ch)?;
            let at = byte_at(&model[line], col);
            if ch == '\n' || ch == '\r' {
                let tail = model[line].split_off(at);
                model.insert(line + 1, tail);
            } else {
                model[line].insert(at, ch);
            }
        }
        Edit::InsertString { line, col, parts, sep } => {
            let line = line % len;
            buf.insert_string(line, col, &parts.join(sep))?;
            let current = model.remove(line);
            let (head, tail) = current.split_at(byte_at(&current, col));
            let mut parts = parts;
            parts[0].insert_str(0, head);
            if let Some(last) = parts.last_mut() {
                last.push_str(tail);
            }
            for (offset, part) in parts.into_iter().enumerate() {
                model.insert(line + offset, part);
            }
        }
        Edit::Split { line, col } => {
            let line = line % len;
            buf.split_line(line, col)?;
            let at = byte_at(&model[line], col);
            let tail = model[line].split_off(at);
            model.insert(line + 1, tail);
        }
        Edit::Join { line } => {
            if len < 2 {
                return Ok(());
            }
            let line = line % (len - 1);
            buf.join_lines(line)?;
            let next = model.remove(line + 1);
            model[line].push_str(&next);
        }
    }
    Ok(())
}

fn run_round_trip(
    initial: Vec<String>,
    edits: Vec<Edit>,
    page_size: usize,
    cache_size: usize,
    policy: EvictionPolicy,
) -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("doc.txt");
    let mut text = initial.join("\n");
    text.push('\n');
    fs::write(&path, text)?;

    let options = BufferOptions {
        page_size,
        cache_size,
        eviction_policy: policy,
        prefetch_strategy: PrefetchStrategy::Adjacent,
        ..BufferOptions::default()
    };
    let mut buf = VirtualBuffer::open(&path, options)?;
    let mut model = initial;
    assert_eq!(buf.lines()?, model);

    for edit in edits {
        apply(&mut buf, &mut model, edit)?;
        assert_eq!(buf.line_count(), model.len());
    }
    assert_eq!(buf.lines()?, model);
    for (i, expected) in model.iter().enumerate() {
        assert_eq!(&buf.line(i)?, expected);
    }

    buf.save_to_file(&path)?;
    assert!(!buf.is_modified());
    assert_eq!(buf.lines()?, model);

    let reopened = VirtualBuffer::open(
        &path,
        BufferOptions {
            page_size: page_size + 3,
            cache_size: 2,
            ..BufferOptions::default()
        },
    )?;
    assert_eq!(reopened.lines()?, model);

    let copy = dir.path().join("copy.txt");
    reopened.write_to(&mut fs::File::create(&copy)?)?;
    assert_eq!(fs::read(&copy)?, fs::read(&path)?);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_edits_survive_save_and_reopen(
        initial in prop::collection::vec(arb_text(), 1..60),
        edits in prop::collection::vec(arb_edit(), 0..40),
        page_size in 1usize..8,
        cache_size in 1usize..4,
        policy in prop::sample::select(EvictionPolicy::ALL.to_vec()),
    ) {
        prop_assert!(run_round_trip(initial, edits, page_size, cache_size, policy).is_ok());
    }
}

#[test]
fn edits_across_page_boundaries_round_trip() -> Result<()> {
    let initial: Vec<String> = (0..40).map(|i| format!("row {i}")).collect();
    let edits = vec![
        Edit::Split { line: 9, col: 2 },
        Edit::Join { line: 19 },
        Edit::InsertString {
            line: 29,
            col: 4,
            parts: vec!["x".into(), "y".into(), "z".into()],
            sep: "\r",
        },
        Edit::DeleteRange { line: 8, count: 5 },
        Edit::Set { line: 0, text: "first".into() },
        Edit::Append { text: "tail".into() },
    ];
    run_round_trip(initial, edits, 10, 2, EvictionPolicy::Arc)
}

#[test]
fn deleting_every_line_leaves_one_empty_line() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("short.txt");
    fs::write(&path, "only\n")?;
    let mut buf = VirtualBuffer::open(&path, BufferOptions::default())?;
    buf.delete_line(0)?;
    assert_eq!(buf.line_count(), 1);
    assert_eq!(buf.line(0)?, "");
    assert!(buf.is_empty());
    buf.save_to_file(&path)?;
    assert_eq!(fs::read_to_string(&path)?, "\n");
    Ok(())
}
