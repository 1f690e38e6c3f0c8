//! Post-order, lexicographically sorted, ignore-aware walk of a directory
//! tree, exposed as a lazy forward-only iterator (§4.4, §9 "Lazy
//! sequences").

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};

use crate::ignore::MhlIgnoreSpec;

struct Frame {
    abs_path: Utf8PathBuf,
    rel_path: String,
    children: Vec<(String, bool)>,
    next_index: usize,
}

/// Yields `(folder_absolute_path, children)` in post-order: a folder is
/// yielded only after every subfolder beneath it has already been yielded.
/// `children` is the lexicographically sorted `(name, is_dir)` list of
/// entries directly under that folder that were not excluded by the ignore
/// spec. Symlinked directories are followed, but a directory whose
/// canonical path has already been visited on the current path is treated
/// as a leaf to break symlink loops.
pub struct PostOrderWalk<'a> {
    ignore_spec: &'a MhlIgnoreSpec,
    visited_real_paths: HashSet<PathBuf>,
    stack: Vec<Frame>,
}

impl<'a> PostOrderWalk<'a> {
    pub fn new(root: &Utf8Path, ignore_spec: &'a MhlIgnoreSpec) -> Result<Self> {
        let mut walk = Self {
            ignore_spec,
            visited_real_paths: HashSet::new(),
            stack: Vec::new(),
        };
        let frame = walk.read_frame(root, String::new())?;
        walk.stack.push(frame);
        Ok(walk)
    }

    fn read_frame(&mut self, abs_path: &Utf8Path, rel_path: String) -> Result<Frame> {
        if let Ok(real) = abs_path.as_std_path().canonicalize() {
            self.visited_real_paths.insert(real);
        }

        let mut children = Vec::new();
        let read_dir = std::fs::read_dir(abs_path).with_context(|| format!("reading directory '{abs_path}'"))?;
        for entry in read_dir {
            let entry = entry.with_context(|| format!("reading an entry of directory '{abs_path}'"))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = std::fs::metadata(entry.path())
                .with_context(|| format!("reading metadata for '{}'", entry.path().display()))?;
            let is_dir = metadata.is_dir();
            let child_rel = if rel_path.is_empty() { name.clone() } else { format!("{rel_path}/{name}") };
            if self.ignore_spec.matches(&child_rel, is_dir) {
                continue;
            }
            children.push((name, is_dir));
        }
        children.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Frame { abs_path: abs_path.to_owned(), rel_path, children, next_index: 0 })
    }
}

impl<'a> Iterator for PostOrderWalk<'a> {
    type Item = Result<(Utf8PathBuf, Vec<(String, bool)>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;

            if top.next_index >= top.children.len() {
                let frame = self.stack.pop().expect("stack is non-empty, just checked via last_mut");
                return Some(Ok((frame.abs_path, frame.children)));
            }

            let (name, is_dir) = top.children[top.next_index].clone();
            top.next_index += 1;

            if !is_dir {
                continue;
            }

            let child_abs = top.abs_path.join(&name);
            let child_rel = if top.rel_path.is_empty() { name.clone() } else { format!("{}/{name}", top.rel_path) };

            let already_visited = child_abs
                .as_std_path()
                .canonicalize()
                .map(|real| self.visited_real_paths.contains(&real))
                .unwrap_or(false);
            if already_visited {
                continue;
            }

            match self.read_frame(&child_abs, child_rel) {
                Ok(frame) => self.stack.push(frame),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::fs;

    fn ignore_spec(root: &Utf8Path) -> MhlIgnoreSpec {
        MhlIgnoreSpec::defaults_only(root, "ascmhl").unwrap()
    }

    #[test]
    fn visits_subfolders_before_their_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("Clips")).unwrap();
        fs::write(root.join("Clips/test1.mov"), b"hello").unwrap();
        fs::write(root.join("root.txt"), b"world").unwrap();

        let spec = ignore_spec(&root);
        let walk = PostOrderWalk::new(&root, &spec).unwrap();
        let visited: Vec<Utf8PathBuf> = walk.map(|r| r.unwrap().0).collect();

        let clips_index = visited.iter().position(|p| p == &root.join("Clips")).unwrap();
        let root_index = visited.iter().position(|p| p == &root).unwrap();
        assert!(clips_index < root_index, "Clips must be yielded before its parent");
    }

    #[test]
    fn children_are_lexicographically_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        fs::write(root.join("b.txt"), b"b").unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::write(root.join("c.txt"), b"c").unwrap();

        let spec = ignore_spec(&root);
        let walk = PostOrderWalk::new(&root, &spec).unwrap();
        let (_, children) = walk.map(|r| r.unwrap()).last().unwrap();
        let names: Vec<&str> = children.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[test]
    fn sidecar_folder_is_excluded() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("ascmhl")).unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();

        let spec = ignore_spec(&root);
        let walk = PostOrderWalk::new(&root, &spec).unwrap();
        let (_, children) = walk.map(|r| r.unwrap()).last().unwrap();
        assert!(children.iter().all(|(n, _)| n != "ascmhl"));
    }
}
