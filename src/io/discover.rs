//! Discover temperature-indexed profiles in a folder.
//!
//! Files are named `<anything><n>K.gr` and processed in increasing `n`.
//! A folder may gain files while a sequential run is in progress; the
//! `ProfileQueue` hands out each new file once and refuses to continue if a
//! newly appeared file would sort before one already handed out.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    pub index: u64,
    pub path: PathBuf,
}

impl ProfileEntry {
    /// File name without extension, used to name dumps.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("profile")
            .to_string()
    }
}

/// The `n` of the last `<n>K.gr` occurrence in a file name.
pub fn temperature_index(file_name: &str) -> Option<u64> {
    let mut found = None;
    let mut rest = file_name;
    let mut offset = 0;
    while let Some(pos) = rest.find("K.gr") {
        let end = offset + pos;
        let digits_start = file_name[..end]
            .rfind(|c: char| !c.is_ascii_digit())
            .map_or(0, |i| i + 1);
        if digits_start < end {
            if let Ok(n) = file_name[digits_start..end].parse::<u64>() {
                found = Some(n);
            }
        }
        offset = end + "K.gr".len();
        rest = &file_name[offset..];
    }
    found
}

/// Every `.gr` file in `folder` carrying a temperature index, in index order
/// (ties broken by file name).
pub fn discover_profiles(folder: &Path) -> Result<Vec<ProfileEntry>, AppError> {
    let entries = fs::read_dir(folder).map_err(|e| AppError::io(folder, e))?;
    let mut out = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        let is_gr = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("gr"))
            == Some(true);
        if !(is_file && is_gr) {
            continue;
        }
        let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
        match temperature_index(name) {
            Some(index) => out.push(ProfileEntry { index, path }),
            None => warn!(file = %path.display(), "no <n>K.gr index in file name; skipping"),
        }
    }

    out.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.path.cmp(&b.path)));
    Ok(out)
}

/// Hands out each discovered profile once, in order.
#[derive(Debug)]
pub struct ProfileQueue {
    folder: PathBuf,
    known: Vec<ProfileEntry>,
    finished: HashSet<PathBuf>,
}

impl ProfileQueue {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            known: Vec::new(),
            finished: HashSet::new(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Rescan the folder and return the profiles not yet finished.
    ///
    /// Fails if the previously known files are no longer a prefix of the
    /// new listing, i.e. a new file sorts before an old one or a file vanished.
    pub fn poll(&mut self) -> Result<Vec<ProfileEntry>, AppError> {
        let listing = discover_profiles(&self.folder)?;
        let prefix_kept = listing.len() >= self.known.len()
            && self.known.iter().zip(&listing).all(|(a, b)| a == b);
        if !prefix_kept {
            return Err(AppError::Precondition(format!(
                "profile order changed in '{}'; new profiles must have higher indices",
                self.folder.display()
            )));
        }
        if listing.len() > self.known.len() {
            debug!(
                folder = %self.folder.display(),
                new = listing.len() - self.known.len(),
                "discovered profiles"
            );
        }
        self.known = listing;
        Ok(self
            .known
            .iter()
            .filter(|e| !self.finished.contains(&e.path))
            .cloned()
            .collect())
    }

    pub fn mark_finished(&mut self, entry: &ProfileEntry) {
        self.finished.insert(entry.path.clone());
    }

    pub fn finished(&self) -> usize {
        self.finished.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "1 0\n2 0\n").unwrap();
    }

    #[test]
    fn index_takes_last_match() {
        assert_eq!(temperature_index("Ni_300K.gr"), Some(300));
        assert_eq!(temperature_index("run5K.gr_10K.gr"), Some(10));
        assert_eq!(temperature_index("Ni_K.gr"), None);
        assert_eq!(temperature_index("Ni_300.gr"), None);
    }

    #[test]
    fn discovery_sorts_numerically() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Ni_1000K.gr");
        touch(dir.path(), "Ni_80K.gr");
        touch(dir.path(), "Ni_300K.gr");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "reference.gr");

        let found = discover_profiles(dir.path()).unwrap();
        let indices: Vec<u64> = found.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![80, 300, 1000]);
        assert_eq!(found[0].stem(), "Ni_80K");
    }

    #[test]
    fn queue_hands_out_new_files_once() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Ni_100K.gr");
        let mut queue = ProfileQueue::new(dir.path());

        let first = queue.poll().unwrap();
        assert_eq!(first.len(), 1);
        queue.mark_finished(&first[0]);
        assert!(queue.poll().unwrap().is_empty());

        touch(dir.path(), "Ni_200K.gr");
        let second = queue.poll().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].index, 200);
        assert_eq!(queue.finished(), 1);
    }

    #[test]
    fn queue_rejects_out_of_order_arrivals() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Ni_200K.gr");
        let mut queue = ProfileQueue::new(dir.path());
        queue.poll().unwrap();

        touch(dir.path(), "Ni_100K.gr");
        let err = queue.poll().unwrap_err();
        assert!(matches!(err, AppError::Precondition(_)), "{err}");
    }
}
