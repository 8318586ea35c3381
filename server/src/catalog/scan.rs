//! Filesystem scanning for the directory index
//!
//! All scans are shallow: one `read_dir` per call, no recursion. Deeper
//! levels are fetched through separate `expand` calls so a huge networked
//! tree is never walked eagerly.

use std::collections::HashSet;
use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use tracing::debug;

use super::types::{DirectoryNode, NodeKind, SlideSummary};

/// Entries probed when checking whether a directory has subdirectories
const HAS_CHILDREN_PROBE_LIMIT: usize = 10;

/// Deterministic 16-hex-char identifier derived from the absolute path.
/// Identical path always yields the identical identifier.
pub fn stable_slide_id(path: &Path) -> String {
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let mut id = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        id.push_str(&format!("{:02x}", byte));
    }
    id
}

/// Case-insensitive wildcard match supporting `*` and `?`
fn wildcard_match(name: &str, pattern: &str) -> bool {
    let name: Vec<char> = name.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut n, mut p) = (0usize, 0usize);
    let (mut star, mut mark) = (None::<usize>, 0usize);

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            n += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            mark = n;
            p += 1;
        } else if let Some(star_pos) = star {
            p = star_pos + 1;
            mark += 1;
            n = mark;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// Whether `name` matches any exclude pattern. Patterns containing `*?[`
/// use wildcard semantics, anything else matches as a substring.
pub fn should_skip(name: &str, exclude: &[String]) -> bool {
    let lname = name.to_lowercase();
    exclude.iter().any(|pattern| {
        let lpattern = pattern.to_lowercase();
        if lpattern.contains(['*', '?', '[']) {
            wildcard_match(&lname, &lpattern)
        } else {
            lname.contains(&lpattern)
        }
    })
}

/// Whether a file name carries a recognized slide extension
pub fn is_slide_file(name: &str, extensions: &[String]) -> bool {
    let lname = name.to_lowercase();
    extensions
        .iter()
        .any(|ext| lname.ends_with(&format!(".{}", ext)))
}

/// File stem (name without the final extension)
fn file_stem(name: &str) -> &str {
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name)
}

/// Probe whether a directory has any non-excluded subdirectory, looking at
/// only the first few entries to stay cheap on slow mounts.
pub fn quick_has_subdirs(dir: &Path, exclude: &[String]) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for (i, entry) in entries.flatten().enumerate() {
        if i >= HAS_CHILDREN_PROBE_LIMIT {
            // Many entries: assume there is something to expand
            return true;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if entry.file_type().is_ok_and(|t| t.is_dir()) && !should_skip(&name, exclude) {
            return true;
        }
    }
    false
}

/// Shallow scan of one directory: folder and slide nodes for the immediate
/// children, plus the count of recognized slide files.
///
/// A sidecar directory belonging to a multi-file slide (same stem as a slide
/// file in the same directory, the MIRAX layout) is folded into the slide
/// entry instead of appearing as a browsable folder.
pub fn scan_shallow(
    dir: &Path,
    extensions: &[String],
    exclude: &[String],
) -> std::io::Result<(Vec<DirectoryNode>, usize)> {
    let entries: Vec<_> = std::fs::read_dir(dir)?.flatten().collect();

    // Stems of slide files present here, for sidecar folding
    let slide_stems: HashSet<String> = entries
        .iter()
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            if e.file_type().is_ok_and(|t| t.is_file()) && is_slide_file(&name, extensions) {
                Some(file_stem(&name).to_lowercase())
            } else {
                None
            }
        })
        .collect();

    let mut children = Vec::new();
    let mut slide_count = 0;

    for entry in &entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if should_skip(&name, exclude) {
            continue;
        }
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();

        if file_type.is_dir() {
            if slide_stems.contains(&name.to_lowercase()) {
                debug!("Folding sidecar directory into its slide entry: {:?}", path);
                continue;
            }
            children.push(DirectoryNode {
                id: stable_slide_id(&path),
                name,
                path: path.to_string_lossy().to_string(),
                kind: NodeKind::Folder,
                children: None,
                slide_count: 0,
                has_children: quick_has_subdirs(&path, exclude),
            });
        } else if file_type.is_file() && is_slide_file(&name, extensions) {
            slide_count += 1;
            children.push(DirectoryNode {
                id: stable_slide_id(&path),
                name,
                path: path.to_string_lossy().to_string(),
                kind: NodeKind::Slide,
                children: None,
                slide_count: 0,
                has_children: false,
            });
        }
    }

    // Folders before slides, then by name
    children.sort_by(|a, b| {
        (a.kind == NodeKind::Slide, a.name.to_lowercase())
            .cmp(&(b.kind == NodeKind::Slide, b.name.to_lowercase()))
    });

    Ok((children, slide_count))
}

/// Recognized slide files directly inside a directory, with file stats
pub fn list_slides_in(
    dir: &Path,
    extensions: &[String],
    exclude: &[String],
) -> std::io::Result<Vec<SlideSummary>> {
    let mut slides = Vec::new();
    for entry in std::fs::read_dir(dir)?.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if should_skip(&name, exclude) || !is_slide_file(&name, extensions) {
            continue;
        }
        if !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let meta = entry.metadata()?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        slides.push(SlideSummary {
            id: stable_slide_id(&path),
            name,
            path: path.to_string_lossy().to_string(),
            size: meta.len(),
            mtime,
        });
    }
    slides.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(slides)
}
