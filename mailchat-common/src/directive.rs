//! Configuration directive tree.
//!
//! A configuration file is a list of [`Node`]s. Each node has a name,
//! positional arguments, an optional block of child nodes and the position
//! it was read from. On disk the tree is stored as RON:
//!
//! ```ron
//! [
//!     (name: "hostname", args: ["mx.example.com"]),
//!     (name: "msgpipeline", args: ["local_routing"], line: 4, children: [
//!         (name: "destination", args: ["example.com"], children: [
//!             (name: "deliver_to", args: ["&local_mailboxes"]),
//!         ]),
//!         (name: "default_destination", children: [
//!             (name: "reject", args: ["550", "5.1.1", "User doesn't exist"]),
//!         ]),
//!     ]),
//! ]
//! ```

use std::{
    fmt::{self, Display},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// Where a directive was read from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Location {
    pub file: Arc<str>,
    pub line: u32,
}

impl Location {
    #[must_use]
    pub fn new(file: impl Into<Arc<str>>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A single configuration directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub children: Vec<Node>,

    /// Filled in by the loader.
    #[serde(skip)]
    pub file: Arc<str>,

    #[serde(default)]
    pub line: u32,
}

impl Node {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            children: Vec::new(),
            file: Arc::from(""),
            line: 0,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub const fn at_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    #[must_use]
    pub fn location(&self) -> Location {
        Location {
            file: Arc::clone(&self.file),
            line: self.line,
        }
    }

    /// Children with the given name, in declaration order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Self> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    fn set_file(&mut self, file: &Arc<str>) {
        self.file = Arc::clone(file);
        for child in &mut self.children {
            child.set_file(file);
        }
    }
}

/// Parse a configuration tree from RON text, tagging every node with `file`.
///
/// # Errors
///
/// Returns [`LoadError::Parse`] if the text is not a valid directive list.
pub fn parse(source: &str, file: &str) -> Result<Vec<Node>, LoadError> {
    let mut nodes: Vec<Node> = ron::from_str(source).map_err(|e| LoadError::Parse {
        file: file.to_string(),
        source: e,
    })?;

    let file: Arc<str> = Arc::from(file);
    for node in &mut nodes {
        node.set_file(&file);
    }

    Ok(nodes)
}

/// Read and parse a configuration file.
///
/// # Errors
///
/// Fails if the file cannot be read or parsed.
pub fn load(path: &std::path::Path) -> Result<Vec<Node>, LoadError> {
    let source = std::fs::read_to_string(path).map_err(|e| LoadError::Read {
        file: path.display().to_string(),
        source: e,
    })?;

    parse(&source, &path.display().to_string())
}
