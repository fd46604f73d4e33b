use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};

use camino::Utf8Path;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

// Helper to create a consistent spinner
pub fn create_spinner(message: &str, progress: Option<&MultiProgress>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let pb = match progress {
        Some(multi) => multi.add(pb),
        None => pb,
    };
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Last `max_lines` lines of a process transcript.
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// Last `max_lines` lines of a file, starting at byte `offset`.
pub fn read_tail(path: &Utf8Path, offset: u64, max_lines: usize) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;

    let mut tail = VecDeque::with_capacity(max_lines + 1);
    for line in BufReader::new(file).split(b'\n') {
        tail.push_back(String::from_utf8_lossy(&line?).into_owned());
        if tail.len() > max_lines {
            tail.pop_front();
        }
    }
    Ok(Vec::from(tail).join("\n"))
}
