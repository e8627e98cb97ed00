/// A borrowed filesystem path, split on `/` with empty segments dropped.
#[derive(Clone, Copy)]
pub struct Path<'a>(&'a str);

impl<'a> Path<'a> {
    /// Constructs a path from a string.
    pub fn new(raw: &'a str) -> Self {
        Self(raw)
    }

    /// Checks whether the path starts with `/`.
    pub fn is_absolute(&self) -> bool {
        self.0.starts_with('/')
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns an iterator over the segments of the path.
    pub fn parts(&self) -> impl DoubleEndedIterator<Item = &'a str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Splits the path into its parent path and the final segment.
    /// Returns `None` if the path has no segments (empty or `/`).
    pub fn split_last(&self) -> Option<(Path<'a>, &'a str)> {
        let name = self.parts().next_back()?;
        let parent_len = name.as_ptr() as usize - self.0.as_ptr() as usize;
        Some((Path::new(&self.0[..parent_len]), name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_segments_are_dropped() {
        let parts: Vec<_> = Path::new("//a///b/").parts().collect();
        assert_eq!(parts, ["a", "b"]);
    }

    #[test]
    fn absolute_and_relative() {
        assert!(Path::new("/a/b").is_absolute());
        assert!(!Path::new("a/b").is_absolute());
        assert!(!Path::new("").is_absolute());
    }

    #[test]
    fn split_last_keeps_the_parent() {
        let (parent, name) = Path::new("/a/b/c").split_last().unwrap();
        assert_eq!(name, "c");
        assert_eq!(parent.parts().collect::<Vec<_>>(), ["a", "b"]);
        assert!(parent.is_absolute());

        let (parent, name) = Path::new("file").split_last().unwrap();
        assert_eq!(name, "file");
        assert_eq!(parent.parts().count(), 0);
    }

    #[test]
    fn root_and_empty_have_no_final_segment() {
        assert!(Path::new("/").split_last().is_none());
        assert!(Path::new("").split_last().is_none());
    }

    #[test]
    fn dot_segments_survive_splitting() {
        let parts: Vec<_> = Path::new("./a/../b").parts().collect();
        assert_eq!(parts, [".", "a", "..", "b"]);
    }
}
