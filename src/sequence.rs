use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Order in which images are presented to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceOrder {
    #[default]
    OldestFirst,
    NewestFirst,
}

/// Image files in `folder`, naturally sorted by file name.
///
/// Hidden files and files with `backup` in their name are skipped.
pub fn image_sequence(folder: &Path, order: SequenceOrder) -> std::io::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if is_candidate(&path) {
            images.push(path);
        }
    }

    images.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
    if order == SequenceOrder::NewestFirst {
        images.reverse();
    }
    Ok(images)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_candidate(path: &Path) -> bool {
    let name = file_name(path);
    if name.starts_with('.') || name.to_lowercase().contains("backup") {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Compare names so that `img2` sorts before `img10`. Case-insensitive.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a_chunks, b_chunks) = (chunks(a), chunks(b));
    for (x, y) in a_chunks.iter().zip(&b_chunks) {
        let ord = match (x, y) {
            (Chunk::Number(x), Chunk::Number(y)) => {
                let (xt, yt) = (x.trim_start_matches('0'), y.trim_start_matches('0'));
                xt.len().cmp(&yt.len()).then_with(|| xt.cmp(yt))
            }
            (Chunk::Number(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Number(_)) => Ordering::Greater,
            (Chunk::Text(x), Chunk::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a_chunks.len().cmp(&b_chunks.len()).then_with(|| a.cmp(b))
}

enum Chunk<'a> {
    Number(&'a str),
    Text(&'a str),
}

fn chunks(s: &str) -> Vec<Chunk<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut digit_run: Option<bool> = None;

    for (i, c) in s.char_indices() {
        let is_digit = c.is_ascii_digit();
        match digit_run {
            Some(run) if run != is_digit => {
                out.push(chunk(&s[start..i], run));
                start = i;
            }
            _ => {}
        }
        digit_run = Some(is_digit);
    }
    if let Some(run) = digit_run {
        out.push(chunk(&s[start..], run));
    }
    out
}

fn chunk(s: &str, digits: bool) -> Chunk<'_> {
    if digits {
        Chunk::Number(s)
    } else {
        Chunk::Text(s)
    }
}
