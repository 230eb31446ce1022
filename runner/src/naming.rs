use std::{borrow::Cow, path::PathBuf};

/// Values that can be read as and rebuilt from plain text paths
pub trait PathLike: Sized {
    fn as_text(&self) -> Cow<'_, str>;
    fn from_text(text: String) -> Self;
}

impl PathLike for String {
    fn as_text(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.as_str())
    }

    fn from_text(text: String) -> Self {
        text
    }
}

impl PathLike for PathBuf {
    fn as_text(&self) -> Cow<'_, str> {
        self.to_string_lossy()
    }

    fn from_text(text: String) -> Self {
        PathBuf::from(text)
    }
}

/// Inserts a zero padded job index in front of the extension of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobNamer {
    width: usize,
}

impl JobNamer {
    pub fn new(total: usize) -> Self {
        Self {
            width: digits(total.saturating_sub(1)),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn insert<P: PathLike>(&self, path: &P, index: usize) -> P {
        let text = path.as_text();
        let (stem, extension) = split_extension(&text);

        P::from_text(format!(
            "{stem}_{index:0width$}{extension}",
            width = self.width
        ))
    }
}

fn digits(mut value: usize) -> usize {
    let mut count = 1;

    while value >= 10 {
        value /= 10;
        count += 1;
    }

    count
}

/// Split into (stem, extension) where the extension keeps its dot.
/// Only the last path component is considered and leading dots of a file name
/// (hidden files) never start an extension.
fn split_extension(path: &str) -> (&str, &str) {
    let name_start = path.rfind('/').map_or(0, |separator| separator + 1);
    let name = &path[name_start..];

    match name.rfind('.') {
        Some(dot) if name[..dot].chars().any(|c| c != '.') => path.split_at(name_start + dot),
        _ => (path, ""),
    }
}
