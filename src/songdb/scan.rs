use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::model::Song;
use crate::songdb::store::song_id;

/// Builds song records from file paths
///
/// Metadata comes from the location of the file alone:
/// `<basedir>/<artist>/<album>/<tracknr> - <title>.<ext>`.
#[derive(Debug, Clone)]
pub struct SongBuilder {
    songdbid: String,
    basedir: PathBuf,
    pattern: Regex,
    extensions: HashSet<String>,
    capitalize: bool,
    strip_leading_article: bool,
    leading_articles: Vec<String>,
    remove_accents: bool,
}

impl SongBuilder {
    pub fn new(songdbid: impl Into<String>, basedir: impl Into<PathBuf>, scan: &ScanConfig) -> Result<Self, ScanError> {
        Ok(Self {
            songdbid: songdbid.into(),
            basedir: basedir.into(),
            pattern: Regex::new(&scan.tracknr_and_title_re)?,
            extensions: scan.extensions.iter().map(|e| e.to_lowercase()).collect(),
            capitalize: scan.capitalize,
            strip_leading_article: scan.strip_leading_article,
            leading_articles: scan.leading_articles.iter().map(|a| a.to_lowercase()).collect(),
            remove_accents: scan.remove_accents,
        })
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    /// Whether `path` has one of the configured song extensions
    pub fn is_song_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| self.extensions.contains(&e.to_lowercase()))
    }

    /// Build the record of the song file at `path`
    pub fn build(&self, path: &Path) -> Result<Song, ScanError> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.basedir.join(path)
        };
        let id = song_id(&self.basedir, &path)?;
        let metadata = fs::metadata(&path).map_err(|source| ScanError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (tracknumber, title) = match self.pattern.captures(&file_name) {
            Some(captures) => (
                captures.get(1).and_then(|m| m.as_str().parse().ok()),
                captures.get(2).map(|m| m.as_str().to_string()),
            ),
            None => (None, None),
        };
        let title = title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

        // Directories between basedir and the file, innermost last
        let dirs: Vec<&str> = id.split('/').collect();
        let dirs = &dirs[..dirs.len() - 1];
        let album = dirs.last().copied().unwrap_or_default();
        let artist = if dirs.len() >= 2 { dirs[dirs.len() - 2] } else { "" };

        let mut song = Song::new(self.songdbid.clone(), id.clone(), path.clone());
        song.title = self.normalize(&title.replace('_', " "));
        song.album = self.normalize(&album.replace('_', " "));
        song.artist = self.normalize(&artist.replace('_', " "));
        song.tracknumber = tracknumber;
        song.size = metadata.len();
        Ok(song)
    }

    /// Apply the configured accent removal, article handling and capitalisation
    pub fn normalize(&self, input: &str) -> String {
        let mut result = input.trim().to_string();
        if self.remove_accents {
            result = remove_accents(&result);
        }
        if self.strip_leading_article {
            result = strip_leading_article(&result, &self.leading_articles);
        }
        if self.capitalize {
            result = capitalize(&result);
        }
        result
    }
}

/// Strip diacritics via Unicode NFD decomposition. Letters without a
/// decomposition (Turkish dotless i and friends) are mapped by hand.
pub fn remove_accents(input: &str) -> String {
    input
        .nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .map(|ch| match ch {
            'ğ' => 'g',
            'ı' => 'i',
            'ş' => 's',
            'Ğ' => 'G',
            'İ' => 'I',
            'Ş' => 'S',
            'ø' => 'o',
            'Ø' => 'O',
            'ł' => 'l',
            'Ł' => 'L',
            _ => ch,
        })
        .collect()
}

/// "The Who" -> "Who, The"
pub fn strip_leading_article(input: &str, articles: &[String]) -> String {
    if let Some((first, rest)) = input.split_once(' ') {
        let rest = rest.trim_start();
        if !rest.is_empty() && articles.iter().any(|a| a.eq_ignore_ascii_case(first)) {
            return format!("{}, {}", rest, first);
        }
    }
    input.to_string()
}

/// Upper-case the first letter of every word
pub fn capitalize(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut at_word_start = true;
    for ch in input.chars() {
        if at_word_start {
            result.extend(ch.to_uppercase());
        } else {
            result.push(ch);
        }
        at_word_start = ch.is_whitespace() || ch == '(' || ch == '-';
    }
    result
}
