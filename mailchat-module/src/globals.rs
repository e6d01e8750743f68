use std::path::{Path, PathBuf};

use mailchat_common::Node;

use crate::ConfigError;

/// Process-wide settings read from top-level directives before any module
/// block is instantiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Globals {
    pub hostname: String,
    pub autogenerated_msg_domain: Option<String>,
    pub state_dir: PathBuf,
    pub runtime_dir: PathBuf,
    pub debug: bool,
}

impl Default for Globals {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            autogenerated_msg_domain: None,
            state_dir: PathBuf::from("/var/lib/mailchat"),
            runtime_dir: PathBuf::from("/run/mailchat"),
            debug: false,
        }
    }
}

impl Globals {
    /// Separate global directives from module blocks.
    ///
    /// # Errors
    ///
    /// Fails on a global directive with the wrong number of arguments, or a
    /// relative directory.
    pub fn split(nodes: Vec<Node>) -> Result<(Self, Vec<Node>), ConfigError> {
        let mut globals = Self::default();
        let mut blocks = Vec::with_capacity(nodes.len());

        for node in nodes {
            match node.name.as_str() {
                "debug" => {
                    globals.debug = match node.args.first().map(String::as_str) {
                        None | Some("yes" | "true") => true,
                        Some("no" | "false") => false,
                        Some(other) => {
                            return Err(ConfigError::invalid(
                                node.location(),
                                format!("debug: expected yes or no, got {other}"),
                            ));
                        }
                    };
                }
                "hostname" => globals.hostname = single(&node)?,
                "autogenerated_msg_domain" => {
                    globals.autogenerated_msg_domain = Some(single(&node)?);
                }
                "state_dir" => globals.state_dir = absolute(&node)?,
                "runtime_dir" => globals.runtime_dir = absolute(&node)?,
                _ => blocks.push(node),
            }
        }

        Ok((globals, blocks))
    }

    /// Domain used for the sender of generated messages such as bounces.
    #[must_use]
    pub fn generated_domain(&self) -> &str {
        self.autogenerated_msg_domain
            .as_deref()
            .unwrap_or(&self.hostname)
    }

    /// Directory for the persistent state of the named module.
    #[must_use]
    pub fn state_path(&self, kind: &str, name: &str) -> PathBuf {
        self.state_dir.join(kind).join(name)
    }
}

fn single(node: &Node) -> Result<String, ConfigError> {
    match node.args.as_slice() {
        [value] => Ok(value.clone()),
        _ => Err(ConfigError::invalid(
            node.location(),
            format!("{}: expected exactly one argument", node.name),
        )),
    }
}

fn absolute(node: &Node) -> Result<PathBuf, ConfigError> {
    let value = single(node)?;
    if Path::new(&value).is_absolute() {
        Ok(PathBuf::from(value))
    } else {
        Err(ConfigError::invalid(
            node.location(),
            format!("{}: {value} is not an absolute path", node.name),
        ))
    }
}
